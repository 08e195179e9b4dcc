#![forbid(unsafe_code)]

use clap::Parser;
use proxy_harness_lib::config::{load_from_path, SessionConfig};
use proxy_harness_lib::telemetry::init_tracing;
use proxy_harness_lib::Session;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Dual-listener proxy test session")]
struct Cli {
    /// Path to configuration TOML file; built-in defaults when omitted
    #[arg(short, long, value_name = "FILE", env = "PROXY_HARNESS_CONFIG")]
    config: Option<PathBuf>,

    /// Log level, overrides the configuration file
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => match load_from_path(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                eprintln!("failed to load configuration: {err}");
                std::process::exit(1);
            }
        },
        None => SessionConfig::default(),
    };

    let level = cli.log_level.as_deref().unwrap_or(&cfg.logging.level);
    if let Err(err) = init_tracing(level, cfg.logging.show_target) {
        eprintln!("failed to initialize tracing: {err}");
        std::process::exit(1);
    }

    let mut session = match Session::launch(cfg).await {
        Ok(session) => session,
        Err(err) => {
            error!(%err, "session failed to start");
            std::process::exit(1);
        }
    };

    if let (Some(ports), Some(client)) = (session.ports(), session.client()) {
        info!(
            http_port = ports.http,
            https_port = ports.https,
            upstream_port = ?session.upstream_port(),
            base_url = %client.base_url(),
            "proxy session ready, press Ctrl-C to stop"
        );
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "failed to listen for Ctrl-C, stopping now");
    }

    let report = session.stop().await;
    if report.is_clean() {
        info!("session stopped cleanly");
    } else {
        for (step, err) in report.failures() {
            warn!(%step, %err, "teardown step failed");
        }
    }
}
