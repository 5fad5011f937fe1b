//! Cinderbox server binary.

use anyhow::{Context, Result};
use cinderbox_core::config::AppConfig;
use cinderbox_driver::{ContainerDriver, DockerDriver};
use cinderbox_engine::{Coordinator, Reaper};
use cinderbox_publisher::FilePublisher;
use cinderbox_server::{create_router, AppState, IdentityService};
use clap::Parser;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Cinderbox - a multi-tenant Python sandbox broker
#[derive(Parser, Debug)]
#[command(name = "cinderboxd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "CINDERBOX_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("cinderbox v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration; the file is optional, env vars can provide or
    // override everything.
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("no config file found at {}", args.config);
    }
    let config: AppConfig = figment
        .merge(Env::prefixed("CINDERBOX_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    // Durable registry.
    let registry = cinderbox_registry::from_config(&config.registry)
        .await
        .context("failed to initialize registry")?;
    registry
        .health_check()
        .await
        .context("registry health check failed")?;
    tracing::info!(path = %config.registry.persist_path.display(), "registry initialized");

    // Container runtime.
    let driver: Arc<dyn ContainerDriver> = Arc::new(
        DockerDriver::new(&config.container.base_image)
            .context("failed to connect to the container runtime")?,
    );
    tracing::info!(base_image = %config.container.base_image, "container runtime connected");

    // Published-file tree.
    let publisher = Arc::new(
        FilePublisher::new(&config.results.root)
            .await
            .context("failed to prepare results directory")?,
    );
    tracing::info!(root = %config.results.root.display(), "results directory ready");

    // The engine.
    let coordinator = Arc::new(Coordinator::new(
        config.container.clone(),
        registry.clone(),
        driver,
        publisher,
    ));

    // Identity service.
    let identity = Arc::new(IdentityService::new(registry, &config.auth));

    // Reaper.
    let reaper = Reaper::new(
        coordinator.clone(),
        config.reaper.clone(),
        config.results.clone(),
    );
    let _reaper_handle = reaper.spawn();
    tracing::info!(
        interval_secs = config.reaper.interval_secs,
        inactivity_threshold_secs = config.reaper.inactivity_threshold_secs,
        "reaper spawned"
    );

    let bind = config.server.bind.clone();
    let state = AppState::new(config, identity, coordinator);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(addr = %bind, "listening");

    axum::serve(listener, router)
        .await
        .context("server terminated")?;
    Ok(())
}
