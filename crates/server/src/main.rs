use chrono::Utc;
use db::models::event_outbox::EventOutbox;
use server::AppState;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, prelude::*};
use utils::assets::asset_dir;

const OUTBOX_PRUNE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60 * 60);
const OUTBOX_RETENTION_HOURS: i64 = 24;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter_string = format!(
        "warn,server={level},services={level},db={level},utils={level}",
        level = log_level
    );
    let env_filter = EnvFilter::try_new(filter_string).expect("Failed to create tracing filter");
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();

    if !asset_dir().exists() {
        std::fs::create_dir_all(asset_dir())?;
    }

    let state = AppState::new().await?;

    let prune_db = state.db().clone();
    tokio::spawn(async move {
        loop {
            let cutoff = Utc::now() - chrono::Duration::hours(OUTBOX_RETENTION_HOURS);
            match EventOutbox::prune_published_before(&prune_db.conn, cutoff).await {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "Pruned published outbox events");
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "Failed to prune outbox events");
                }
            }
            tokio::time::sleep(OUTBOX_PRUNE_INTERVAL).await;
        }
    });

    let app_router = server::router(state);

    let port = std::env::var("TASKDECK_PORT")
        .or_else(|_| std::env::var("PORT"))
        .ok()
        .and_then(|s| s.trim().parse::<u16>().ok())
        .unwrap_or_else(|| {
            tracing::info!("No PORT environment variable set, using port 0 for auto-assignment");
            0
        });
    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;
    let actual_port = listener.local_addr()?.port();
    tracing::info!("Server running on http://{host}:{actual_port}");

    let shutdown_rx = spawn_shutdown_watcher();
    axum::serve(listener, app_router)
        .with_graceful_shutdown(wait_for_watch_true(shutdown_rx))
        .await?;

    Ok(())
}

fn spawn_shutdown_watcher() -> watch::Receiver<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            return;
        }
        tracing::info!("Shutdown signal received, starting graceful shutdown");
        let _ = shutdown_tx.send(true);
    });

    shutdown_rx
}

async fn wait_for_watch_true(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }

        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
