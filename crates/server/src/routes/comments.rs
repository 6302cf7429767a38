use axum::{
    Extension, Json, Router,
    extract::State,
    response::Json as ResponseJson,
    routing::{delete, get, put},
};
use db::models::{
    task::Task,
    task_comment::{CreateComment, TaskComment},
};
use serde::Deserialize;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct AddCommentRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCommentRequest {
    pub text: String,
}

pub async fn get_task_comments(
    Extension(task): Extension<Task>,
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<TaskComment>>>, ApiError> {
    let comments = TaskComment::find_by_task(&state.db().conn, task.id).await?;
    Ok(ResponseJson(ApiResponse::success(comments)))
}

pub async fn add_task_comment(
    Extension(task): Extension<Task>,
    State(state): State<AppState>,
    Json(payload): Json<AddCommentRequest>,
) -> Result<ResponseJson<ApiResponse<TaskComment>>, ApiError> {
    if payload.text.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Comment text must not be empty".to_string(),
        ));
    }
    let session = state.session().await?;
    let comment = TaskComment::create(
        &state.db().conn,
        &CreateComment {
            task_id: task.id,
            author_user_id: session.user_id,
            text: payload.text,
        },
        Uuid::new_v4(),
    )
    .await?;
    Ok(ResponseJson(ApiResponse::success(comment)))
}

pub async fn update_comment(
    State(state): State<AppState>,
    axum::extract::Path(comment_id): axum::extract::Path<Uuid>,
    Json(payload): Json<UpdateCommentRequest>,
) -> Result<ResponseJson<ApiResponse<TaskComment>>, ApiError> {
    if payload.text.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Comment text must not be empty".to_string(),
        ));
    }
    let comment = TaskComment::update_text(&state.db().conn, comment_id, payload.text).await?;
    Ok(ResponseJson(ApiResponse::success(comment)))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    axum::extract::Path(comment_id): axum::extract::Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let rows = TaskComment::delete(&state.db().conn, comment_id).await?;
    if rows == 0 {
        return Err(ApiError::NotFound("Comment not found".to_string()));
    }
    Ok(ResponseJson(ApiResponse::success(())))
}

/// Comment routes that live under a task; the task loader middleware has
/// already resolved the task by the time these run.
pub fn task_router() -> Router<AppState> {
    Router::new().route("/comments", get(get_task_comments).post(add_task_comment))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/comments/{comment_id}", put(update_comment))
        .route("/comments/{comment_id}", delete(delete_comment))
}
