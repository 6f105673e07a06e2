//! HTTP exposition endpoint
//!
//! `GET <metrics path>` runs one scrape cycle on the blocking pool and
//! answers in the Prometheus text format. `GET /` serves a landing page.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tracing::{error, info};

use crate::client::QueryExecutor;
use crate::metrics::Exporter;

/// Error type for metrics endpoint failures
#[derive(Debug)]
pub enum MetricsError {
    ScrapeAborted,
    EncodingFailed,
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> Response {
        let message = match self {
            MetricsError::ScrapeAborted => "Scrape aborted",
            MetricsError::EncodingFailed => "Failed to encode metrics",
        };
        (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
    }
}

struct AppState<E> {
    exporter: Arc<Exporter<E>>,
    content_type: String,
    metrics_path: String,
}

async fn metrics_handler<E>(State(state): State<Arc<AppState<E>>>) -> Result<Response, MetricsError>
where
    E: QueryExecutor + Send + Sync + 'static,
{
    let exporter = Arc::clone(&state.exporter);
    let body = tokio::task::spawn_blocking(move || exporter.render())
        .await
        .map_err(|e| {
            error!("Scrape task failed: {}", e);
            MetricsError::ScrapeAborted
        })?
        .map_err(|e| {
            error!("Failed to encode metrics: {}", e);
            MetricsError::EncodingFailed
        })?;

    Ok(([(header::CONTENT_TYPE, state.content_type.clone())], body).into_response())
}

async fn landing_page<E>(State(state): State<Arc<AppState<E>>>) -> Html<String> {
    Html(format!(
        "<html>\n\
         <head><title>RethinkDB exporter</title></head>\n\
         <body>\n\
         <h1>RethinkDB exporter</h1>\n\
         <p><a href='{}'>Metrics</a></p>\n\
         </body>\n\
         </html>\n",
        state.metrics_path
    ))
}

/// Routes for the exporter
pub fn router<E>(exporter: Arc<Exporter<E>>, metrics_path: &str) -> Router
where
    E: QueryExecutor + Send + Sync + 'static,
{
    let state = Arc::new(AppState {
        content_type: exporter.content_type(),
        exporter,
        metrics_path: metrics_path.to_string(),
    });

    let mut app = Router::new().route(metrics_path, get(metrics_handler::<E>));
    if metrics_path != "/" {
        app = app.route("/", get(landing_page::<E>));
    }
    app.with_state(state)
}

/// Bind `addr` and serve until the process exits
pub async fn serve<E>(exporter: Arc<Exporter<E>>, addr: SocketAddr, metrics_path: &str) -> anyhow::Result<()>
where
    E: QueryExecutor + Send + Sync + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Listening on {}, metrics at {}", addr, metrics_path);

    axum::serve(listener, router(exporter, metrics_path))
        .await
        .context("HTTP server failed")?;
    Ok(())
}
