//! HTTP endpoints for Prometheus scraping and liveness probes.

use std::sync::Arc;

use serde_json::json;
use tracing::{error, info};
use warp::http::StatusCode;
use warp::Filter;

use crate::metrics::get_metrics;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Identity of this collector node reported by `/health`
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub node_id: String,
    pub clustered: bool,
}

fn render_metrics() -> (String, StatusCode) {
    match get_metrics() {
        Some(metrics) => match metrics.export_metrics() {
            Ok(text) => (text, StatusCode::OK),
            Err(e) => {
                error!("❌ Failed to export metrics: {}", e);
                (format!("# metrics export failed: {}\n", e), StatusCode::INTERNAL_SERVER_ERROR)
            }
        },
        None => (
            "# metrics not initialized\n".to_string(),
            StatusCode::SERVICE_UNAVAILABLE,
        ),
    }
}

pub fn routes(
    status: Arc<NodeStatus>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let metrics = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| {
            let (body, code) = render_metrics();
            warp::reply::with_status(
                warp::reply::with_header(body, "content-type", PROMETHEUS_CONTENT_TYPE),
                code,
            )
        });

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(move || {
            warp::reply::with_status(
                warp::reply::json(&json!({
                    "status": "healthy",
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                    "service": "apm_collector",
                    "node_id": status.node_id,
                    "clustered": status.clustered,
                })),
                StatusCode::OK,
            )
        });

    metrics.or(health)
}

/// Serve until the process exits
pub async fn start_metrics_server(port: u16, status: NodeStatus) {
    info!("🚀 Metrics server starting on port {}", port);
    info!("📊 Prometheus metrics available at http://0.0.0.0:{}/metrics", port);
    info!("💚 Health check available at http://0.0.0.0:{}/health", port);

    warp::serve(routes(Arc::new(status)))
        .run(([0, 0, 0, 0], port))
        .await;
}
