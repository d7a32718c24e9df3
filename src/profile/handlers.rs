use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use tracing::info;

use crate::auth;
use crate::error::AppError;
use crate::profile::UpdateProfileRequest;
use crate::AppState;

/// GET /api/extension/profile
pub async fn get_profile(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user_id = auth::authenticated_user_id(&req, &state.config.auth)?;
    info!("Fetching extension profile for user {}", user_id);

    let view = state.resolver.fetch_profile(&user_id).await?;
    Ok(HttpResponse::Ok().json(view))
}

/// PATCH /api/extension/profile
pub async fn update_profile(
    req: HttpRequest,
    body: web::Json<UpdateProfileRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let user_id = auth::authenticated_user_id(&req, &state.config.auth)?;
    info!("Updating extension profile for user {}", user_id);

    let profile = state
        .resolver
        .update_profile(&user_id, body.into_inner())
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "profile": profile,
    })))
}
