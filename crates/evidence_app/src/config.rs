use std::fs;
use std::path::{Path, PathBuf};

use evidence_engine::{
    ArchiveRequest, ExportRequest, FolderStructure, RetryPolicy, DEFAULT_COMPRESSION_LEVEL,
    DEFAULT_CONCURRENCY, DEFAULT_FOLDER_PREFIX,
};
use export_logging::export_info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::Credentials;
use crate::cli::{Cli, Region, Structure};

pub const DEFAULT_CONFIG_FILE: &str = "evidence-export.ron";
pub const DEFAULT_OUTPUT_DIR: &str = "./vanta-export";
pub const DEFAULT_ZIP_NAME: &str = "audit-{auditId}.zip";
pub const DEFAULT_SCOPE: &str = "auditor-api.audit:read auditor-api.auditor:read";
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config file {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("Authentication required: provide either a bearer token or OAuth client credentials (client id + client secret)")]
    MissingCredentials,
    #[error("no audit id given")]
    MissingAudit,
    #[error("invalid server url {url:?}: {message}")]
    ServerUrl { url: String, message: String },
}

/// On-disk configuration. Every field is optional; flags win over the file.
/// Secrets are never read from here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub export: ExportConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub region: Option<Region>,
    pub server_url: Option<String>,
    pub scope: Option<String>,
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub output_dir: Option<PathBuf>,
    pub structure: Option<Structure>,
    pub folder_prefix: Option<String>,
    /// `false` disables the zip step.
    pub zip: Option<bool>,
    pub zip_name: Option<String>,
    pub compression_level: Option<u32>,
    pub concurrency: Option<usize>,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub verbose: Option<bool>,
    pub file: Option<PathBuf>,
}

/// Read the config file. An explicit path must exist; the default one may not.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let (path, required) = match explicit {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };

    let content = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound && !required => {
            return Ok(AppConfig::default());
        }
        Err(source) => return Err(ConfigError::Read { path, source }),
    };

    let config = ron::from_str(&content).map_err(|err| ConfigError::Parse {
        path: path.clone(),
        message: err.to_string(),
    })?;
    export_info!("Loaded configuration from {:?}", path);
    Ok(config)
}

/// Where the audit API lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    /// Scheme, host and port only.
    pub origin: String,
    pub region: Region,
    pub scope: String,
}

/// Everything a run needs, after merging flags, the config file and defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub audit_id: Option<String>,
    pub credentials: Credentials,
    pub api: ApiSettings,
    pub output_dir: PathBuf,
    pub structure: FolderStructure,
    pub folder_prefix: String,
    pub zip_name: Option<String>,
    pub compression_level: u32,
    pub concurrency: usize,
    pub max_retries: u32,
    pub verbose: bool,
    pub log_file: Option<PathBuf>,
}

impl Settings {
    pub fn resolve(cli: Cli, config: AppConfig) -> Result<Self, ConfigError> {
        let AppConfig { api, export, log } = config;

        let credentials = match (cli.token, cli.client_id.or(api.client_id), cli.client_secret) {
            (Some(token), _, _) if !token.trim().is_empty() => Credentials::Bearer(token),
            (_, Some(client_id), Some(client_secret))
                if !client_id.trim().is_empty() && !client_secret.trim().is_empty() =>
            {
                Credentials::ClientCredentials {
                    client_id,
                    client_secret,
                }
            }
            _ => return Err(ConfigError::MissingCredentials),
        };

        let region = cli.region.or(api.region).unwrap_or_default();
        let origin = match cli.server_url.or(api.server_url) {
            Some(url) => server_origin(&url)?,
            None => region.origin().to_string(),
        };
        let scope = cli
            .scope
            .or(api.scope)
            .unwrap_or_else(|| DEFAULT_SCOPE.to_string());

        let audit_id = cli.audit.filter(|a| !a.trim().is_empty());
        if audit_id.is_none() && !cli.list_audits {
            return Err(ConfigError::MissingAudit);
        }

        let zip_enabled = !cli.no_zip && export.zip.unwrap_or(true);
        let zip_name = zip_enabled.then(|| {
            cli.zip
                .or(export.zip_name)
                .unwrap_or_else(|| DEFAULT_ZIP_NAME.to_string())
        });

        let structure = match cli.structure.or(export.structure).unwrap_or_default() {
            Structure::Single => FolderStructure::Single,
            Structure::Separate => FolderStructure::Separate,
        };

        Ok(Self {
            audit_id,
            credentials,
            api: ApiSettings {
                origin,
                region,
                scope,
            },
            output_dir: cli
                .output
                .or(export.output_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            structure,
            folder_prefix: cli
                .folder_prefix
                .or(export.folder_prefix)
                .unwrap_or_else(|| DEFAULT_FOLDER_PREFIX.to_string()),
            zip_name,
            compression_level: cli
                .compression_level
                .or(export.compression_level)
                .unwrap_or(DEFAULT_COMPRESSION_LEVEL)
                .min(9),
            concurrency: cli
                .concurrency
                .map(|c| c as usize)
                .or(export.concurrency)
                .unwrap_or(DEFAULT_CONCURRENCY)
                .max(1),
            max_retries: cli
                .max_retries
                .or(export.max_retries)
                .unwrap_or(DEFAULT_MAX_RETRIES),
            verbose: cli.verbose || log.verbose.unwrap_or(false),
            log_file: cli.log_file.or(log.file),
        })
    }

    /// The engine request for `audit_id`.
    pub fn export_request(&self, audit_id: &str) -> ExportRequest {
        let mut request = ExportRequest::new(audit_id, self.output_dir.clone());
        request.structure = self.structure;
        request.folder_prefix = Some(self.folder_prefix.clone());
        request.concurrency = self.concurrency;
        request.retry = RetryPolicy::with_max_retries(self.max_retries);
        request.archive = self.zip_name.as_ref().map(|name| ArchiveRequest {
            file_name: zip_file_name(name, audit_id),
            compression_level: self.compression_level,
        });
        request
    }
}

/// Expand `{auditId}` and make sure the name ends in `.zip`.
pub fn zip_file_name(template: &str, audit_id: &str) -> String {
    let name = template.replace("{auditId}", audit_id);
    if name.to_ascii_lowercase().ends_with(".zip") {
        name
    } else {
        format!("{name}.zip")
    }
}

fn server_origin(raw: &str) -> Result<String, ConfigError> {
    let parsed = url::Url::parse(raw.trim()).map_err(|err| ConfigError::ServerUrl {
        url: raw.to_string(),
        message: err.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ConfigError::ServerUrl {
            url: raw.to_string(),
            message: "expected an http(s) URL".to_string(),
        });
    }
    Ok(parsed.origin().ascii_serialization())
}
