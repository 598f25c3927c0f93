use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use beacon_notification_service::config::Settings;
use beacon_notification_service::groups::StaticGroupDirectory;
use beacon_notification_service::server::{create_app, AppState};
use beacon_notification_service::store::{
    MemoryNotificationStore, NotificationStore, PostgresNotificationStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    init_tracing();

    // Load configuration
    let settings = Settings::new()?;
    tracing::info!("Configuration loaded");

    // Pick the notification store: PostgreSQL when configured, in-memory otherwise
    let store: Arc<dyn NotificationStore> = match settings.database.url.as_deref() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(settings.database.max_connections)
                .connect(url)
                .await?;
            tracing::info!("Connected to PostgreSQL");
            Arc::new(PostgresNotificationStore::new(pool))
        }
        None => {
            tracing::warn!("No database configured, notifications will not survive restarts");
            Arc::new(MemoryNotificationStore::new())
        }
    };

    let directory = Arc::new(StaticGroupDirectory::new(settings.groups.memberships.clone()));

    // Create application state
    let state = AppState::with_collaborators(settings.clone(), store, directory, None);
    tracing::info!("Application state initialized");

    let sessions = state.sessions.clone();

    // Create Axum app
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Tear down every live connection so unsubscribe handlers run
    sessions.disconnect_all().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
