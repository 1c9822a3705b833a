//! HTTP front end.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/` | Classify the multipart file field `inputFile` |
//! | GET | `/healthz` | Fleet status as JSON |
//!
//! A successful classification answers `200` with the plain-text body
//! `<name>:<label>`.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tracing::{error, warn};

use crate::error::GatewayError;
use crate::gateway::Gateway;

/// Name of the multipart field carrying the image.
pub const FILE_FIELD: &str = "inputFile";

#[derive(Clone)]
pub struct HttpState {
    pub gateway: Arc<Gateway>,
}

/// Build the gateway router. Request bodies over `max_upload_bytes` are
/// rejected with 413.
pub fn build_router(gateway: Arc<Gateway>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", post(classify))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(HttpState { gateway })
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (status, msg.to_string()).into_response()
}

/// POST /
pub async fn classify(State(state): State<HttpState>, mut multipart: Multipart) -> Response {
    let mut upload = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some(FILE_FIELD) {
                    continue;
                }
                let filename = field.file_name().unwrap_or_default().to_string();
                match field.bytes().await {
                    Ok(bytes) => {
                        upload = Some((filename, bytes));
                        break;
                    }
                    Err(e) => return error_response(&e.body_text(), e.status()),
                }
            }
            Ok(None) => break,
            Err(e) => return error_response(&e.body_text(), e.status()),
        }
    }

    let Some((filename, bytes)) = upload else {
        return error_response("no image file uploaded", StatusCode::BAD_REQUEST);
    };
    if filename.is_empty() {
        return error_response("uploaded file has no filename", StatusCode::BAD_REQUEST);
    }

    match state.gateway.submit(&bytes, &filename).await {
        Ok(result) => match result.display_line() {
            Some(line) => (StatusCode::OK, line).into_response(),
            None => error_response(
                &format!("image not recognized: {}", result.name),
                StatusCode::NOT_FOUND,
            ),
        },
        Err(GatewayError::BadRequest(msg)) => error_response(&msg, StatusCode::BAD_REQUEST),
        Err(e @ GatewayError::Timeout { .. }) => {
            warn!(%filename, error = %e, "classification timed out");
            error_response("timed out waiting for classification", StatusCode::GATEWAY_TIMEOUT)
        }
        Err(e) => {
            error!(%filename, error = %e, "classification failed");
            error_response("internal error", StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /healthz
pub async fn healthz(State(state): State<HttpState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "fleet": state.gateway.fleet_status(),
    }))
}
