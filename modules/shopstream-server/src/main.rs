use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shopstream_common::{Config, Role};
use shopstream_server::roles::{self, Backends};
use shopstream_server::shutdown::Shutdown;
use shopstream_server::telemetry;

#[derive(Parser)]
#[command(name = "shopstream", about = "Event-driven catalogue, analytics and recommendations")]
struct Cli {
    #[command(subcommand)]
    role: RoleCommand,
}

#[derive(Subcommand, Clone, Copy)]
enum RoleCommand {
    /// Consume product and user events into activity counters
    Analytics,
    /// Consume events into popularity scores and serve ranked reads
    Recommendations,
    /// Product write API, publishing to product-updates
    Products,
    /// User write API, publishing to user-updates
    Users,
    /// Every role in one process on one port
    All,
}

impl RoleCommand {
    fn roles(self) -> Vec<Role> {
        match self {
            RoleCommand::Analytics => vec![Role::Analytics],
            RoleCommand::Recommendations => vec![Role::Recommendations],
            RoleCommand::Products => vec![Role::Products],
            RoleCommand::Users => vec![Role::Users],
            RoleCommand::All => vec![
                Role::Users,
                Role::Products,
                Role::Recommendations,
                Role::Analytics,
            ],
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let roles = cli.role.roles();

    let config = Config::from_env().context("Invalid configuration")?;
    config.log_redacted();

    let port = config.port_for(roles[0]);
    let addr = format!("{}:{}", config.web_host, port);
    let names: Vec<&str> = roles.iter().map(|r| r.as_str()).collect();
    tracing::info!(roles = ?names, "Starting shopstream");

    let metrics = telemetry::install_recorder().context("Failed to install metrics recorder")?;
    telemetry::spawn_upkeep(metrics.clone());

    let backends = Backends::connect(&config).await?;
    let assembled = roles::assemble(&roles, &backends, &config, Some(metrics));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    let shutdown = Shutdown::new();
    shutdown.listen_for_signals();

    roles::run(assembled, listener, shutdown).await
}
