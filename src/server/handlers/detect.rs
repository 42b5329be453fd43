use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::Json;
use image::imageops::{self, FilterType};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PrismError;
use crate::server::AppState;
use crate::types::DetectionResult;

use super::{blocking, decode_image, ApiError};

#[derive(Debug, Default, Deserialize)]
pub struct DetectParams {
    pub min_confidence: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub detections: Vec<DetectionResult>,
    pub count: usize,
    pub width: u32,
    pub height: u32,
    pub processing_ms: f64,
}

pub async fn detect(
    State(state): State<AppState>,
    Query(params): Query<DetectParams>,
    body: Bytes,
) -> Result<Json<DetectResponse>, ApiError> {
    let started = Instant::now();
    if let Some(threshold) = params.min_confidence {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ApiError(PrismError::Validation(format!(
                "min_confidence must be within [0, 1], got {threshold}"
            ))));
        }
    }

    let image = decode_image(&body)?;
    let (width, height) = image.dimensions();
    let max_side = state.config.server.max_image_side;
    let detector = state.detector.clone();

    let detections = blocking(move || {
        let longer = width.max(height);
        if max_side == 0 || longer <= max_side {
            return Ok(detector.detect(&image, params.min_confidence));
        }

        // Detect on a bounded copy and map boxes back to upload coordinates.
        let scale = max_side as f64 / longer as f64;
        let bounded = imageops::resize(
            &image,
            ((width as f64 * scale) as u32).max(1),
            ((height as f64 * scale) as u32).max(1),
            FilterType::Triangle,
        );
        let mut detections = detector.detect(&bounded, params.min_confidence);
        for d in &mut detections {
            d.bbox = d.bbox.scaled(1.0 / scale).clamp(width, height);
        }
        Ok(detections)
    })
    .await?;

    let processing_ms = started.elapsed().as_secs_f64() * 1000.0;
    info!(count = detections.len(), width, height, processing_ms, "detect request served");
    Ok(Json(DetectResponse {
        count: detections.len(),
        detections,
        width,
        height,
        processing_ms,
    }))
}
