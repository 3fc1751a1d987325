//! Prometheus scrape endpoint
//!
//! The recorder is process-global; the endpoint runs on its own listener so
//! scrapes never share the upload router's body limits or CORS rules.

use crate::metrics::recorder::init_metrics;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, MethodRouter};
use axum::Router;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Address of the dedicated metrics listener (`METRICS_ADDR`)
    pub listen_addr: SocketAddr,
    pub endpoint: String,
}

impl MetricsConfig {
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            listen_addr: addr,
            endpoint: "/metrics".to_string(),
        }
    }

    /// Router exposing only the scrape endpoint
    pub fn router(&self) -> Router {
        Router::new().route(&self.endpoint, metrics_route())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to install Prometheus recorder: {0}")]
    SetupFailed(String),

    #[error("Prometheus recorder handle unavailable")]
    AlreadyInitialized,

    #[error("Failed to bind metrics listener {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

/// Install the Prometheus recorder once per process and describe every metric.
///
/// Later calls return the existing handle.
pub fn install_recorder() -> Result<&'static PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError::SetupFailed(e.to_string()))?;
    let _ = PROMETHEUS_HANDLE.set(handle);
    init_metrics();

    PROMETHEUS_HANDLE.get().ok_or(MetricsError::AlreadyInitialized)
}

pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

pub fn metrics_route() -> MethodRouter {
    get(scrape)
}

async fn scrape() -> Response {
    match render_metrics() {
        Some(body) => ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "Metrics recorder not installed").into_response(),
    }
}

/// Install the recorder, bind the listener and serve scrapes on a spawned task.
///
/// Bind errors are returned so a misconfigured `METRICS_ADDR` fails startup.
pub async fn serve_metrics(config: MetricsConfig) -> Result<SocketAddr, MetricsError> {
    install_recorder()?;

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .map_err(|source| MetricsError::Bind {
            addr: config.listen_addr,
            source,
        })?;
    let local_addr = listener.local_addr().map_err(|source| MetricsError::Bind {
        addr: config.listen_addr,
        source,
    })?;
    let app = config.router();

    tracing::info!("Metrics available at http://{}{}", local_addr, config.endpoint);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server stopped: {}", e);
        }
    });

    Ok(local_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::Service;

    #[test]
    fn test_metrics_config_with_addr() {
        let config = MetricsConfig::with_addr("127.0.0.1:9191".parse().unwrap());
        assert_eq!(config.endpoint, "/metrics");
        assert_eq!(config.listen_addr.port(), 9191);
    }

    #[tokio::test]
    async fn test_scrape_after_install() {
        install_recorder().unwrap();
        crate::metrics::record_session_initialized(4);

        let mut app = MetricsConfig::with_addr("127.0.0.1:0".parse().unwrap()).router();
        let response = app
            .call(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let rendered = render_metrics().unwrap();
        assert!(rendered.contains("coursestream_sessions_initialized_total"));
        assert!(rendered.contains(
            "# HELP coursestream_session_declared_chunks Chunk count declared when a session is initialized"
        ));
    }
}
