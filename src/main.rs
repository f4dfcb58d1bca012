//! autoresearch CLI entry point.
//!
//! Logs go to stderr so `--json` output on stdout stays machine-readable.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Dependency targets kept at `warn` unless `RUST_LOG` says otherwise.
const QUIET_TARGETS: &str = "hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = autoresearch::cli::parse_cli();

    // Priority: RUST_LOG env var > --log-level CLI arg > default "info"
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},{QUIET_TARGETS}", cli.log_level)));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();

    autoresearch::cli::run_with_cli(cli).await
}
