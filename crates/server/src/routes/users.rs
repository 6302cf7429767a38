use axum::{
    Json, Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::{delete, get, put},
};
use db::models::user::{CreateUser, UpdateUser, User, UserError};
use serde::Deserialize;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct SetCurrentUserRequest {
    pub user_id: Uuid,
}

pub async fn get_users(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<User>>>, ApiError> {
    let users = User::find_all(&state.db().conn).await?;
    Ok(ResponseJson(ApiResponse::success(users)))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<User>>, ApiError> {
    let user = User::find_by_id(&state.db().conn, user_id)
        .await?
        .ok_or(UserError::NotFound)?;
    Ok(ResponseJson(ApiResponse::success(user)))
}

pub async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUser>,
) -> Result<ResponseJson<ApiResponse<User>>, ApiError> {
    if payload.email.trim().is_empty() || payload.name.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "User email and name must not be empty".to_string(),
        ));
    }
    let user = User::create(&state.db().conn, &payload, Uuid::new_v4()).await?;
    Ok(ResponseJson(ApiResponse::success(user)))
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<UpdateUser>,
) -> Result<ResponseJson<ApiResponse<User>>, ApiError> {
    let user = User::update(&state.db().conn, user_id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(user)))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let rows = User::delete(&state.db().conn, user_id).await?;
    if rows == 0 {
        return Err(ApiError::NotFound("User not found".to_string()));
    }
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn get_current_user(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Option<User>>>, ApiError> {
    let user = User::current(&state.db().conn).await?;
    Ok(ResponseJson(ApiResponse::success(user)))
}

pub async fn set_current_user(
    State(state): State<AppState>,
    Json(payload): Json<SetCurrentUserRequest>,
) -> Result<ResponseJson<ApiResponse<User>>, ApiError> {
    let user = User::set_current(&state.db().conn, payload.user_id).await?;
    Ok(ResponseJson(ApiResponse::success(user)))
}

pub fn router() -> Router<AppState> {
    let inner = Router::new()
        .route("/", get(get_users).post(create_user))
        .route("/current", get(get_current_user).put(set_current_user))
        .route("/{user_id}", get(get_user))
        .route("/{user_id}", put(update_user))
        .route("/{user_id}", delete(delete_user));

    Router::new().nest("/users", inner)
}
