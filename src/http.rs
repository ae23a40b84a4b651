//! Point-query endpoint: `GET /gps` returns the latest complete fix.

use std::io;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use log::{debug, info};
use serde_json::json;
use tokio::net::TcpListener;

use crate::broadcast::LocalBroadcastServer;

pub fn router(broadcast: Arc<LocalBroadcastServer>) -> Router {
    Router::new().route("/gps", get(latest_fix)).with_state(broadcast)
}

async fn latest_fix(State(broadcast): State<Arc<LocalBroadcastServer>>) -> Response {
    match broadcast.latest_complete() {
        Some(fix) => Json(fix).into_response(),
        None => {
            debug!(target: "http", "Point query with no complete fix yet");
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "No valid GPS data available" })),
            )
                .into_response()
        }
    }
}

pub async fn serve(listener: TcpListener, broadcast: Arc<LocalBroadcastServer>) -> io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(target: "http", "Point-query endpoint listening on http://{}/gps", addr);
    }
    axum::serve(listener, router(broadcast)).await
}
