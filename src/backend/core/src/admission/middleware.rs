//! Axum middleware that runs every request through an admission controller.
//!
//! ```rust,ignore
//! let controller = Arc::new(AdmissionController::new(config.admission.clone())?);
//! let app = Router::new()
//!     .route("/posts", post(create_post))
//!     .layer(axum::middleware::from_fn_with_state(controller, admission_middleware));
//! ```

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::{AdmissionController, Priority};
use crate::error::SmaError;

/// Header carrying the request priority (`high`, `normal` or `low`).
pub const PRIORITY_HEADER: &str = "x-request-priority";

/// Read the priority of a request. Missing or unrecognised values are normal.
pub fn request_priority(headers: &HeaderMap) -> Priority {
    let Some(value) = headers.get(PRIORITY_HEADER) else {
        return Priority::Normal;
    };

    match value.to_str().ok().map(str::parse::<Priority>) {
        Some(Ok(priority)) => priority,
        _ => {
            tracing::debug!(
                header = PRIORITY_HEADER,
                value = ?value,
                "Ignoring unrecognised request priority"
            );
            Priority::Normal
        }
    }
}

/// Admission middleware.
///
/// The downstream handler runs as the admitted operation, so it counts toward
/// the concurrency limit for as long as it takes to build the response.
/// Rejections render as JSON error bodies: 503 with `Retry-After` when the
/// queue wait expires or the controller is shutting down, 408 when the
/// handler overruns the request timeout.
pub async fn admission_middleware(
    State(controller): State<Arc<AdmissionController>>,
    req: Request,
    next: Next,
) -> Response {
    let priority = request_priority(req.headers());
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let result = controller
        .submit(priority, move || async move {
            Ok::<_, SmaError>(next.run(req).await)
        })
        .await;

    match result {
        Ok(response) => response,
        Err(error) => {
            tracing::warn!(
                controller = %controller.name(),
                method = %method,
                path = %path,
                priority = %priority,
                error_code = %error.code(),
                "Request not served by admission controller"
            );
            error.into_response()
        }
    }
}
