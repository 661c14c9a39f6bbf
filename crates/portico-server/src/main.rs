//! Portico server: a multi-tenant host for hot-swappable business modules
//!
//! Startup order matters: tracing first, then the bootstrap config, then
//! control-plane migrations, then module discovery and mounting, and only
//! then does the listener bind. No request can observe a module that is
//! registered but not yet mounted.
//!
//! Usage:
//! ```bash
//! # With a config file
//! portico-server --config portico.yaml
//!
//! # Or environment variables only
//! PORTICO_DATABASE_URL=postgres://localhost/portico portico-server
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use portico_hotswap::HotswapCoordinator;
use portico_registry::{DescriptorStore, HandlerRegistry, LifecycleService, RouteMountTable};
use portico_tenancy::{
    migrations, PgPermissionCatalog, PgTenantDirectory, PgToggleStore, TenantConnectionManager,
};

use portico_server::app::{self, AppState};
use portico_server::bootstrap::BootstrapConfig;
use portico_server::health::{DatabaseCheck, HealthState};

/// Portico - multi-tenant module host
#[derive(Parser)]
#[command(name = "portico-server")]
#[command(about = "Multi-tenant application server hosting hot-swappable modules", long_about = None)]
struct Cli {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, value_name = "FILE", env = "PORTICO_CONFIG")]
    config: Option<String>,

    /// Override the bind port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Override the modules directory
    #[arg(long, value_name = "DIR")]
    modules_dir: Option<String>,

    /// Override the PostgreSQL connection string
    #[arg(long, value_name = "URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => BootstrapConfig::from_file(path)?,
        None => BootstrapConfig::default(),
    };
    config.merge_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(dir) = &cli.modules_dir {
        config.modules_dir = dir.into();
    }
    if let Some(url) = &cli.database_url {
        config.database_url = url.clone();
    }
    config.validate()?;

    init_tracing(&config)?;
    info!("Initializing Portico module host");

    // Control-plane pool and migrations.
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    migrations::run_migrations(&pool).await?;
    info!("Control-plane migrations up to date");

    // Long-lived services, constructed once and injected everywhere.
    let directory = Arc::new(PgTenantDirectory::new(pool.clone()));
    let toggles = Arc::new(PgToggleStore::new(pool.clone()));
    let catalog = Arc::new(PgPermissionCatalog::new(pool.clone()));
    let connections = Arc::new(TenantConnectionManager::new(
        pool.clone(),
        config.database_url.clone(),
        directory.clone(),
    ));

    // The handler registry holds the statically-linked module
    // implementations. The bare server binary links none; embedders
    // register their module crates here before discovery runs.
    let handlers = Arc::new(HandlerRegistry::new());
    if handlers.is_empty() {
        warn!("No module handler sets linked into this binary; discovery will skip every module");
    }

    let lifecycle = Arc::new(LifecycleService::new(
        Arc::new(DescriptorStore::new()),
        Arc::new(RouteMountTable::new()),
        handlers,
        connections.clone(),
        directory.clone(),
        catalog,
        config.modules_dir.clone(),
    ));

    // Discovery, registration, and mounting complete before the listener
    // binds.
    let summary = lifecycle.discover_and_register().await?;
    info!(
        registered = summary.registered.len(),
        skipped = summary.skipped.len(),
        "Module discovery complete"
    );
    for skipped in &summary.skipped {
        warn!(module_id = %skipped.id, reason = %skipped.reason, "Module skipped at startup");
    }

    let coordinator = Arc::new(HotswapCoordinator::new(lifecycle.clone()));

    let state = AppState {
        lifecycle,
        coordinator: coordinator.clone(),
        toggles,
        tenants: directory,
        provisioner: connections.clone(),
    };
    let health = HealthState {
        checks: vec![Arc::new(DatabaseCheck::new(pool.clone()))],
        coordinator,
    };
    let router = app::build_router(state, health);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("Portico listening on http://{}", addr);
    info!("  - Module surface:  http://{}/plugins/<id>/...", addr);
    info!("  - Admin API:       http://{}/modules/status", addr);
    info!("  - Health:          http://{}/healthz", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Scoped release of every tenant connection before exit.
    connections.close_all().await;
    pool.close().await;
    info!("Portico stopped");

    Ok(())
}

fn init_tracing(config: &BootstrapConfig) -> anyhow::Result<()> {
    let mut filter = EnvFilter::new(config.logging.level.clone());

    // Suppress sqlx query logs unless explicitly requested.
    if !config.logging.log_sql_queries {
        match "sqlx=warn".parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Warning: failed to set sqlx log filter: {}", e),
        }
    }

    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
