use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use evidence_app::api::VantaClient;
use evidence_app::auth::TokenProvider;
use evidence_app::cli::Cli;
use evidence_app::config::{load_config, Settings};
use evidence_app::run::{run_export, DEFAULT_TICK};
use evidence_engine::{EngineConfig, ExportHandle, RetryPolicy, TtlCache};
use export_logging::{export_error, export_info, LogDestination};
use log::LevelFilter;

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(code) => code,
        Err(err) => {
            export_error!("{:#}", err);
            eprintln!("Error: {err:#}");
            evidence_core::EXIT_FAILURE
        }
    };
    std::process::exit(code);
}

async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let settings = Settings::resolve(cli, config)?;

    let (destination, level) = match (&settings.log_file, settings.verbose) {
        (Some(path), verbose) => (
            LogDestination::Both(path.clone()),
            if verbose { LevelFilter::Debug } else { LevelFilter::Info },
        ),
        (None, true) => (LogDestination::Terminal, LevelFilter::Debug),
        (None, false) => (LogDestination::Terminal, LevelFilter::Warn),
    };
    export_logging::initialize(destination, level);
    export_info!(
        "Using {} ({:?}) with {:?}",
        settings.api.origin,
        settings.api.region,
        settings.credentials
    );

    let http = VantaClient::http_client().context("cannot build HTTP client")?;
    let api_retry = RetryPolicy::with_max_retries(settings.max_retries);
    let tokens = TokenProvider::new(
        http.clone(),
        settings.api.origin.clone(),
        settings.api.scope.clone(),
        settings.credentials.clone(),
        Arc::new(TtlCache::new()),
    )
    .with_retry(api_retry);
    let client = VantaClient::new(http, &settings.api, tokens).with_retry(api_retry);

    client
        .validate()
        .await
        .context("could not reach the audit API")?;

    let Some(audit_id) = settings.audit_id.clone() else {
        let audits = client.list_audits().await?;
        if audits.is_empty() {
            println!("No audits visible to these credentials.");
        }
        for audit in audits {
            println!(
                "{}\t{}\t{}\t{}",
                audit.id,
                audit.name.unwrap_or_default(),
                audit.framework.unwrap_or_default(),
                audit.status.unwrap_or_default()
            );
        }
        return Ok(evidence_core::EXIT_SUCCESS);
    };

    let request = settings.export_request(&audit_id);
    println!("Exporting audit {} to {}", audit_id, request.output_dir.display());
    let handle = ExportHandle::start(Arc::new(client), request, EngineConfig::default());
    let code = run_export(&handle, &audit_id, DEFAULT_TICK).await;
    if code == evidence_core::EXIT_CANCELLED {
        // The worker may still be unwinding downloads; do not join it.
        std::mem::forget(handle);
    }
    Ok(code)
}
