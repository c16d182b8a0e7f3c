use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use mpg::{GatewayComponents, GatewayConfig, Pipeline};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "model-provider-gateway", about = "Multi-provider LLM gateway")]
struct Args {
    /// Bind host.
    #[arg(long, env = "MPG_HOST")]
    host: Option<String>,

    /// Bind port.
    #[arg(long, env = "MPG_PORT")]
    port: Option<u16>,

    /// Gateway configuration (JSON), produced by the deployment tooling.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str::<GatewayConfig>(&raw)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => GatewayConfig::default(),
    };
    config.apply_env_overrides();
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let bind = format!("{}:{}", config.host, config.port);
    let health_check = config.health_check.clone();

    let components =
        Arc::new(GatewayComponents::from_config(config).context("building gateway components")?);

    info!(
        workers = %components.registry.worker_count(),
        "Gateway components initialized"
    );

    let _health_checker = if health_check.enabled {
        Some(
            components
                .registry
                .start_health_checker(Duration::from_secs(health_check.interval_secs)),
        )
    } else {
        None
    };

    let pipeline = Arc::new(Pipeline::new(components));
    let app = mpg::server::build_router(pipeline);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {}", bind))?;
    info!(addr = %bind, "Gateway listening");

    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
