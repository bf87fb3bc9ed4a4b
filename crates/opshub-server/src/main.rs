use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use opshub_server::config::ServerConfig;

/// Ops Hub vote server.
#[derive(Parser, Debug)]
#[command(name = "opshub-server", version, about)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address; overrides the config file and OPSHUB_LISTEN.
    #[arg(short, long)]
    listen: Option<String>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let mut config = ServerConfig::load(cli.config.as_deref())?;
    if let Some(listen) = &cli.listen {
        config.apply_listen_override(listen);
    }
    tracing::info!(
        listen = %config.server.listen,
        items_root = %config.votes.items_root,
        admins = config.admin.emails.len(),
        "Starting Ops Hub vote server"
    );

    opshub_server::run(config).await
}
