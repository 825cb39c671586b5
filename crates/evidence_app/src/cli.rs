use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

/// Export every evidence file of an audit, optionally packed into a zip.
#[derive(Debug, Parser)]
#[command(name = "evidence-export", version, about)]
pub struct Cli {
    /// Audit to export.
    #[arg(long, required_unless_present = "list_audits")]
    pub audit: Option<String>,

    /// List the audits visible to these credentials and exit.
    #[arg(long, conflicts_with = "audit")]
    pub list_audits: bool,

    /// RON configuration file (default: ./evidence-export.ron when present).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Static bearer token; skips the OAuth exchange.
    #[arg(long, env = "VANTA_API_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[arg(long, env = "VANTA_CLIENT_ID")]
    pub client_id: Option<String>,

    #[arg(long, env = "VANTA_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// OAuth scope requested for client credentials.
    #[arg(long)]
    pub scope: Option<String>,

    #[arg(long, value_enum)]
    pub region: Option<Region>,

    /// API base URL; overrides the region.
    #[arg(long)]
    pub server_url: Option<String>,

    /// Directory files (or the zip) are written to.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub structure: Option<Structure>,

    /// Folder name prefix for the separate structure.
    #[arg(long)]
    pub folder_prefix: Option<String>,

    /// Zip file name; `{auditId}` is replaced with the audit id.
    #[arg(long, conflicts_with = "no_zip")]
    pub zip: Option<String>,

    /// Leave the downloaded files in place instead of zipping them.
    #[arg(long)]
    pub no_zip: bool,

    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=9))]
    pub compression_level: Option<u32>,

    /// Simultaneous downloads.
    #[arg(short = 'j', long, value_parser = clap::value_parser!(u64).range(1..=64))]
    pub concurrency: Option<u64>,

    /// Retries per file after the first attempt.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Debug-level logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Also write the log to this file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    #[default]
    Us,
    Eu,
    Aus,
}

impl Region {
    pub fn origin(self) -> &'static str {
        match self {
            Region::Us => "https://api.vanta.com",
            Region::Eu => "https://api.eu.vanta.com",
            Region::Aus => "https://api.aus.vanta.com",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Structure {
    /// All files in one directory.
    #[default]
    Single,
    /// One folder per downloaded file.
    Separate,
}
