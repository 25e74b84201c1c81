use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Extension, Json,
};

use crate::error::ApiError;
use crate::models::{CreateProductRequest, ProductResponse};
use crate::server::AppState;
use crate::telemetry::RequestContext;

fn request_context(ctx: Option<Extension<RequestContext>>) -> RequestContext {
    ctx.map(|Extension(ctx)| ctx).unwrap_or_default()
}

/// Handle POST /products
pub async fn create_product(
    State(state): State<AppState>,
    ctx: Option<Extension<RequestContext>>,
    payload: Result<Json<CreateProductRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ProductResponse>), ApiError> {
    let Json(req) = payload.map_err(|rejection| {
        tracing::error!(error = %rejection.body_text(), "Failed to decode request body");
        ApiError::BadRequest(rejection.body_text())
    })?;

    let product = state
        .service
        .create_product(&request_context(ctx), req)?;
    Ok((StatusCode::CREATED, Json(product)))
}

/// Handle GET /products/:id
pub async fn get_product(
    State(state): State<AppState>,
    ctx: Option<Extension<RequestContext>>,
    Path(id): Path<String>,
) -> Result<Json<ProductResponse>, ApiError> {
    let product = state.service.get_product(&request_context(ctx), &id)?;
    Ok(Json(product))
}

/// Handle GET /products
pub async fn list_products(
    State(state): State<AppState>,
    ctx: Option<Extension<RequestContext>>,
) -> Result<Json<Vec<ProductResponse>>, ApiError> {
    let products = state.service.list_products(&request_context(ctx))?;
    Ok(Json(products))
}
