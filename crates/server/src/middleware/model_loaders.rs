use std::{fmt::Display, future::Future};

use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use db::models::{project::Project, task::Task};
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;

// Struct extraction tolerates extra path params on deeper routes
// (e.g. /projects/{project_id}/collaborators/{user_id}).
#[derive(Deserialize)]
pub(crate) struct TaskPathParams {
    task_id: Uuid,
}

#[derive(Deserialize)]
pub(crate) struct ProjectPathParams {
    project_id: Uuid,
}

async fn fetch_model_or_status<M, E, Fut>(
    model_name: &'static str,
    model_id: Uuid,
    load_future: Fut,
) -> Result<M, StatusCode>
where
    E: Display,
    Fut: Future<Output = Result<Option<M>, E>>,
{
    match load_future.await {
        Ok(Some(model)) => Ok(model),
        Ok(None) => {
            tracing::warn!("{model_name} {model_id} not found");
            Err(StatusCode::NOT_FOUND)
        }
        Err(error) => {
            tracing::error!("Failed to fetch {model_name} {model_id}: {error}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn load_request_extension<M, E, Fut>(
    request: Request,
    next: Next,
    model_name: &'static str,
    model_id: Uuid,
    load_future: Fut,
) -> Result<Response, StatusCode>
where
    M: Clone + Send + Sync + 'static,
    E: Display,
    Fut: Future<Output = Result<Option<M>, E>>,
{
    let model = fetch_model_or_status(model_name, model_id, load_future).await?;
    let mut request = request;
    request.extensions_mut().insert(model);
    Ok(next.run(request).await)
}

pub async fn load_task_middleware(
    State(state): State<AppState>,
    Path(params): Path<TaskPathParams>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    load_request_extension(
        request,
        next,
        "task",
        params.task_id,
        Task::find_by_id(&state.db().conn, params.task_id),
    )
    .await
}

pub async fn load_project_middleware(
    State(state): State<AppState>,
    Path(params): Path<ProjectPathParams>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    load_request_extension(
        request,
        next,
        "project",
        params.project_id,
        Project::find_by_id(&state.db().conn, params.project_id),
    )
    .await
}
