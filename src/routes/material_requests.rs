// Material request routes
// Endpoints:
// - POST   /api/material-requests
// - GET    /api/material-requests/:id
// - PATCH  /api/material-requests/:id            (approval / bulk item approval)
// - POST   /api/material-requests/:id/items
// - GET    /api/projects/:project_id/material-requests
// - GET    /api/tasks/:task_id/material-requests
// - PUT    /api/material-request-items/:item_id
// - DELETE /api/material-request-items/:item_id

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{
    CreateMaterialRequestBody, MaterialRequestDetail, MaterialRequestItem,
    MaterialRequestStatusResponse, NewItemInput, UpdateItemBody, UpdateMaterialRequestBody,
};
use crate::routes::ApiJson;
use crate::AppState;

/// POST /api/material-requests - Create a request with its line items
async fn create_material_request(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(body): ApiJson<CreateMaterialRequestBody>,
) -> Result<(StatusCode, Json<MaterialRequestDetail>), ApiError> {
    tracing::info!("Creating material request for task {} by user {}", body.task_id, user.uid);

    let created = state.material_requests.create(&user, body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/material-requests/:id
async fn get_material_request(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(request_id): Path<String>,
) -> Result<Json<MaterialRequestDetail>, ApiError> {
    Ok(Json(state.material_requests.get(&request_id).await?))
}

/// GET /api/projects/:project_id/material-requests
async fn list_project_material_requests(
    State(state): State<AppState>,
    user: AuthUser,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<MaterialRequestDetail>>, ApiError> {
    tracing::info!("Listing material requests for project {} (user {})", project_id, user.uid);
    Ok(Json(state.material_requests.list_by_project(&project_id).await?))
}

/// GET /api/tasks/:task_id/material-requests
async fn list_task_material_requests(
    State(state): State<AppState>,
    user: AuthUser,
    Path(task_id): Path<String>,
) -> Result<Json<Vec<MaterialRequestDetail>>, ApiError> {
    tracing::info!("Listing material requests for task {} (user {})", task_id, user.uid);
    Ok(Json(state.material_requests.list_by_task(&task_id).await?))
}

/// PATCH /api/material-requests/:id - Approve/reject and patch items
async fn update_material_request(
    State(state): State<AppState>,
    user: AuthUser,
    Path(request_id): Path<String>,
    ApiJson(body): ApiJson<UpdateMaterialRequestBody>,
) -> Result<Json<MaterialRequestDetail>, ApiError> {
    tracing::info!(
        "Updating material request {} to {} by user {}",
        request_id,
        body.status,
        user.uid
    );
    Ok(Json(state.material_requests.update(&user, &request_id, body).await?))
}

/// POST /api/material-requests/:id/items
async fn add_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(request_id): Path<String>,
    ApiJson(body): ApiJson<NewItemInput>,
) -> Result<(StatusCode, Json<MaterialRequestItem>), ApiError> {
    tracing::info!("Adding item to material request {} by user {}", request_id, user.uid);
    let item = state.material_requests.add_item(&request_id, body).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// PUT /api/material-request-items/:item_id
async fn update_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<String>,
    ApiJson(body): ApiJson<UpdateItemBody>,
) -> Result<Json<MaterialRequestItem>, ApiError> {
    tracing::info!("Updating item {} by user {}", item_id, user.uid);
    Ok(Json(state.material_requests.update_item(&item_id, body).await?))
}

/// DELETE /api/material-request-items/:item_id
async fn delete_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<String>,
) -> Result<Json<MaterialRequestStatusResponse>, ApiError> {
    tracing::info!("Deleting item {} by user {}", item_id, user.uid);
    state.material_requests.delete_item(&item_id).await?;
    Ok(Json(MaterialRequestStatusResponse {
        status: "ok".to_string(),
    }))
}

pub fn material_requests_routes() -> Router<AppState> {
    Router::new()
        .route("/api/material-requests", post(create_material_request))
        .route(
            "/api/material-requests/:id",
            get(get_material_request).patch(update_material_request),
        )
        .route("/api/material-requests/:id/items", post(add_item))
        .route(
            "/api/projects/:project_id/material-requests",
            get(list_project_material_requests),
        )
        .route("/api/tasks/:task_id/material-requests", get(list_task_material_requests))
        .route(
            "/api/material-request-items/:item_id",
            put(update_item).delete(delete_item),
        )
}
