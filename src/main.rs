use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use evidence_custody::audit::AuditStore;
use evidence_custody::config::AppConfig;
use evidence_custody::coordinator::CustodyCoordinator;
use evidence_custody::ledger::LedgerClient;
use evidence_custody::server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "evidence_custody=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting evidence custody service");

    // Load configuration
    let config = AppConfig::load()?;
    info!("Configuration loaded");

    // Initialize audit store and run migrations
    let store = AuditStore::connect(&config.database_url).await?;
    store.run_migrations().await?;
    info!("Audit store connected");

    // Initialize ledger client. A broken anchor configuration halts anchoring
    // entirely; the service then runs log-only rather than half-configured.
    let ledger = if config.ledger.enabled {
        match LedgerClient::connect(
            &config.ledger.endpoint,
            &config.ledger.contract_ref,
            &config.ledger.signing_credential,
            config.ledger.submit_timeout(),
        )
        .await
        {
            Ok(client) => Some(client),
            Err(e) => {
                error!("Ledger client initialization failed: {}", e);
                warn!("Anchoring disabled; continuing in log-only mode");
                None
            }
        }
    } else {
        info!("Anchoring disabled by configuration");
        None
    };

    let coordinator = Arc::new(CustodyCoordinator::new(store.clone(), ledger));

    // Background retention sweep: calls the same explicit purge the admin
    // surface uses, never anything implicit on reads.
    if config.retention.retention_days > 0 {
        let retention = chrono::Duration::days(config.retention.retention_days);
        let sweep_interval = Duration::from_secs(config.retention.sweep_interval_secs);
        let sweep_store = store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            loop {
                interval.tick().await;
                if let Err(e) = sweep_store.purge_older_than(retention).await {
                    error!("Retention sweep failed: {}", e);
                }
            }
        });
        info!(
            days = config.retention.retention_days,
            "Retention sweep started"
        );
    }

    // Build application
    let app = server::router(coordinator);

    // Start server
    let addr = SocketAddr::new(config.server_host.parse()?, config.server_port);
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
