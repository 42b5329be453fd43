pub mod detect;
pub mod health;
pub mod index;
pub mod metrics;
pub mod products;

use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use image::RgbImage;
use serde_json::json;

use crate::error::PrismError;

/// Wrapper that converts `PrismError` into an HTTP response.
pub struct ApiError(pub PrismError);

impl From<PrismError> for ApiError {
    fn from(e: PrismError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        let body = json!({
            "error": self.0.to_string(),
            "status": status,
        });
        (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            axum::Json(body),
        )
            .into_response()
    }
}

/// Decode an uploaded image body.
pub(crate) fn decode_image(body: &Bytes) -> Result<RgbImage, ApiError> {
    if body.is_empty() {
        return Err(ApiError(PrismError::InvalidImage("empty body".into())));
    }
    image::load_from_memory(body)
        .map(|img| img.to_rgb8())
        .map_err(|e| ApiError(PrismError::InvalidImage(e.to_string())))
}

/// Run synchronous core work off the async runtime.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError(PrismError::Internal(format!("worker task failed: {e}"))))?
        .map_err(ApiError::from)
}
