use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::detector::{IngestReport, ProductUpdate, ReferenceSummary};
use crate::error::PrismError;
use crate::server::AppState;
use crate::types::{Product, ReferenceImage};

use super::{blocking, decode_image, ApiError};

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    #[serde(flatten)]
    pub product: Product,
    pub indexed_references: usize,
}

#[derive(Debug, Serialize)]
pub struct ProductDetailResponse {
    #[serde(flatten)]
    pub product: Product,
    pub references: Vec<ReferenceSummary>,
}

#[derive(Debug, Serialize)]
pub struct CreateProductResponse {
    pub product: Product,
    pub ingest: IngestReport,
}

#[derive(Debug, Serialize)]
pub struct DeleteProductResponse {
    pub deleted: String,
    pub removed_embeddings: usize,
}

#[derive(Debug, Serialize)]
pub struct DeleteReferenceResponse {
    pub deleted: String,
    pub removed_embeddings: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct AddReferenceParams {
    pub angle: Option<String>,
}

pub async fn list_products(State(state): State<AppState>) -> Json<Vec<ProductResponse>> {
    let counts = state.detector.index().read().product_counts();
    let products = state
        .detector
        .catalog()
        .products()
        .iter()
        .map(|p| ProductResponse {
            indexed_references: counts.get(&p.id).copied().unwrap_or(0),
            product: p.clone(),
        })
        .collect();
    Json(products)
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProductDetailResponse>, ApiError> {
    let product = state.detector.catalog().require(&id)?.clone();
    Ok(Json(ProductDetailResponse {
        references: state.detector.references(&id),
        product,
    }))
}

pub async fn create_product(
    State(state): State<AppState>,
    Json(product): Json<Product>,
) -> Result<(StatusCode, Json<CreateProductResponse>), ApiError> {
    let detector = state.detector.clone();
    let id = product.id.clone();
    let ingest = blocking(move || detector.add_product(product)).await?;
    let product = state.detector.catalog().require(&id)?.clone();
    Ok((
        StatusCode::CREATED,
        Json(CreateProductResponse { product, ingest }),
    ))
}

pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<ProductUpdate>,
) -> Result<Json<Product>, ApiError> {
    let detector = state.detector.clone();
    let product = blocking(move || detector.update_product(&id, update)).await?;
    Ok(Json(product))
}

pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteProductResponse>, ApiError> {
    let detector = state.detector.clone();
    let target = id.clone();
    let removed_embeddings = blocking(move || detector.delete_product(&target)).await?;
    Ok(Json(DeleteProductResponse {
        deleted: id,
        removed_embeddings,
    }))
}

pub async fn add_reference(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<AddReferenceParams>,
    body: Bytes,
) -> Result<(StatusCode, Json<ReferenceImage>), ApiError> {
    let image = decode_image(&body)?;
    let detector = state.detector.clone();
    let reference = blocking(move || detector.add_reference(&id, &image, params.angle)).await?;
    Ok((StatusCode::CREATED, Json(reference)))
}

pub async fn delete_reference(
    State(state): State<AppState>,
    Path((id, ref_id)): Path<(String, String)>,
) -> Result<Json<DeleteReferenceResponse>, ApiError> {
    let in_catalog = state
        .detector
        .catalog()
        .require(&id)?
        .reference_images
        .iter()
        .any(|r| r.id == ref_id);
    let owned = in_catalog
        || state
            .detector
            .references(&id)
            .iter()
            .any(|r| r.ref_id.as_deref() == Some(ref_id.as_str()));
    if !owned {
        return Err(ApiError(PrismError::ReferenceNotFound { ref_id }));
    }

    let detector = state.detector.clone();
    let target = ref_id.clone();
    let removed_embeddings = blocking(move || detector.remove_reference(&target)).await?;
    Ok(Json(DeleteReferenceResponse {
        deleted: ref_id,
        removed_embeddings,
    }))
}
