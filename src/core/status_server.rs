use crate::core::metrics::StreamMetrics;
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use log::{error, info};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;


async fn health() -> &'static str {
    "OK"
}

/// Prometheus text exposition of every registered metric.
pub fn render_metrics(stats: &StreamMetrics) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&stats.registry().gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics text is not UTF-8")
}

async fn metrics(State(stats): State<Arc<StreamMetrics>>) -> impl IntoResponse {
    match render_metrics(&stats) {
        Ok(text) => (StatusCode::OK, [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], text),
        Err(e) => {
            error!("{:#}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, [(header::CONTENT_TYPE, "text/plain")], format!("{:#}", e))
        }
    }
}

pub fn health_router() -> Router {
    Router::new().route("/", get(health)).route("/health", get(health))
}

pub fn metrics_router(stats: Arc<StreamMetrics>) -> Router {
    Router::new()
        .route("/", get(metrics))
        .route("/metrics", get(metrics))
        .with_state(stats)
}

/// Health and metrics on one port.
pub fn combined_router(stats: Arc<StreamMetrics>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/", get(health))
        .with_state(stats)
}

/// A running HTTP endpoint; dropping it does not stop the server, `shutdown` does.
pub struct Endpoint {
    pub addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Endpoint {
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = self.task.await;
    }
}

pub fn spawn_endpoint(listener: TcpListener, router: Router, name: &'static str) -> Result<Endpoint> {
    let addr = listener.local_addr().context("listener has no local address")?;
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await;
        if let Err(e) = served {
            error!("{} endpoint failed on {}: {}", name, addr, e);
        }
    });
    Ok(Endpoint { addr, stop: Some(stop_tx), task })
}

/// Starts the endpoints enabled by a non-zero port. Equal ports share one server.
pub async fn start_status_endpoints(
    bind_host: &str,
    health_port: u16,
    metrics_port: u16,
    stats: Arc<StreamMetrics>,
) -> Result<Vec<Endpoint>> {
    let mut endpoints = Vec::new();
    if health_port > 0 && health_port == metrics_port {
        let listener = bind(bind_host, health_port).await?;
        let endpoint = spawn_endpoint(listener, combined_router(stats), "health/metrics")?;
        info!("🩺 Health + metrics endpoint: http://{}/health, /metrics", endpoint.addr);
        endpoints.push(endpoint);
        return Ok(endpoints);
    }
    if health_port > 0 {
        let listener = bind(bind_host, health_port).await?;
        let endpoint = spawn_endpoint(listener, health_router(), "health")?;
        info!("🩺 Health endpoint: http://{}/", endpoint.addr);
        endpoints.push(endpoint);
    }
    if metrics_port > 0 {
        let listener = bind(bind_host, metrics_port).await?;
        let endpoint = spawn_endpoint(listener, metrics_router(stats), "metrics")?;
        info!("📈 Metrics endpoint: http://{}/ (Prometheus)", endpoint.addr);
        endpoints.push(endpoint);
    }
    Ok(endpoints)
}

async fn bind(host: &str, port: u16) -> Result<TcpListener> {
    TcpListener::bind((host, port))
        .await
        .with_context(|| format!("Failed to bind HTTP endpoint on {}:{}", host, port))
}
