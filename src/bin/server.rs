use anyhow::Context;
use coursestream::api::create_api_server;
use coursestream::cloud::CloudUploader;
use coursestream::config::AppConfig;
use coursestream::content::ContentStore;
use coursestream::metrics::{serve_metrics, MetricsConfig};
use coursestream::session::SessionStore;
use coursestream::upload::UploadService;
use coursestream::db;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!("CourseStream upload server starting...");
    tracing::info!("Server: {}", config.bind_addr());
    tracing::info!("Data directory: {}", config.storage.data_dir.display());
    tracing::info!(
        "Cloud provider: {} (finalize: {:?})",
        config.cloud.provider,
        config.finalize_mode
    );

    tokio::fs::create_dir_all(config.storage.chunks_dir()).await?;
    tokio::fs::create_dir_all(config.storage.videos_dir()).await?;

    let pool = db::connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;
    let sessions = SessionStore::new(pool.clone()).await?;
    let contents = ContentStore::new(pool).await?;

    let cloud = CloudUploader::from_config(&config.cloud)?;
    let service = UploadService::new(&config, sessions, contents, cloud);

    if let Some(addr) = config.metrics_addr {
        serve_metrics(MetricsConfig::with_addr(addr)).await?;
    }
    spawn_expiry_sweeper(service.clone(), config.sessions.sweep_interval);

    let app = create_api_server(service, &config.storage);

    let listener = tokio::net::TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr()))?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

fn spawn_expiry_sweeper(service: UploadService, interval: std::time::Duration) {
    tokio::spawn(async move {
        // interval() panics on a zero period
        let mut ticker = tokio::time::interval(interval.max(std::time::Duration::from_secs(1)));
        loop {
            ticker.tick().await;
            if let Err(e) = service.sweep_expired().await {
                tracing::warn!("Expiry sweep failed: {}", e);
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
