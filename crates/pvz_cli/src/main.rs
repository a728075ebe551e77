//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `pvz_core` linkage and storage.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Usage: `pvz_cli [DB_PATH]`. Without a path, `PVZ_DB_PATH` is used, and an
//! in-memory database when that is unset too.

use log::error;
use pvz_core::db::schema::latest_version;
use pvz_core::{
    ListRequest, PvzConfig, PvzService, RequestContext, SqlitePvzRepository, Telemetry,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    println!("pvz_core ping={}", pvz_core::ping());
    println!("pvz_core version={}", pvz_core::core_version());

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("event=cli_run module=cli status=error error={message}");
            eprintln!("pvz_cli error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), String> {
    let mut config = PvzConfig::from_env().map_err(|err| err.to_string())?;
    if let Some(path) = std::env::args().nth(1) {
        config.db_path = Some(PathBuf::from(path));
    }

    let telemetry = match config.log_dir.as_deref() {
        Some(log_dir) => Telemetry::with_file_logging(&config.log_level, log_dir)
            .map_err(|err| err.to_string())?,
        None => Telemetry::new(),
    };

    let repo = SqlitePvzRepository::from_config(&config, Arc::new(telemetry))
        .map_err(|err| err.to_string())?;
    match repo.pool().location() {
        Some(path) => println!("pvz_core db={}", path.display()),
        None => println!("pvz_core db=:memory:"),
    }
    println!("pvz_core schema_version={}", latest_version());

    let mut service = PvzService::with_default_page_size(repo, config.default_page_size);
    if let Some(timeout) = config.request_timeout {
        service = service.with_call_timeout(timeout);
    }
    let page = service
        .list_pickup_points(&RequestContext::background(), &ListRequest::default())
        .map_err(|err| err.to_string())?;
    let rendered = serde_json::to_string_pretty(&page).map_err(|err| err.to_string())?;
    println!("{rendered}");

    Ok(())
}
