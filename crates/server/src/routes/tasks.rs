use axum::{
    Extension, Json, Router,
    extract::{
        Query, State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    middleware::from_fn_with_state,
    response::{IntoResponse, Json as ResponseJson},
    routing::{delete, get, post, put},
};
use chrono::{DateTime, Utc};
use db::models::task::{CreateTask, SortMode, Task, TaskPriority, TaskStatus};
use serde::{Deserialize, Serialize};
use services::services::tasks::TaskPatch;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, error::ApiError, middleware::load_task_middleware};

#[derive(Debug, Deserialize)]
pub struct TaskQuery {
    pub project_id: Option<Uuid>,
    pub sort: Option<SortMode>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub project_id: Option<Uuid>,
    pub assignee_user_id: Option<Uuid>,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Option<TaskPriority>,
    pub status: Option<TaskStatus>,
    pub is_recurring: Option<bool>,
    pub recurrence_rule: Option<String>,
    pub parent_task_id: Option<Uuid>,
    pub reminder_offset_ms: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: TaskStatus,
}

#[derive(Debug, Deserialize)]
pub struct SetSortModeRequest {
    pub mode: SortMode,
}

#[derive(Debug, Serialize)]
pub struct StopTrackingResponse {
    /// Milliseconds added by the session just stopped; null when the
    /// timer was not running.
    pub session_ms: Option<i64>,
}

pub async fn get_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Task>>>, ApiError> {
    let conn = &state.db().conn;
    let tasks = match (query.project_id, query.sort.unwrap_or_default()) {
        (Some(project_id), _) => Task::find_by_project_id(conn, project_id).await?,
        (None, SortMode::DueDate) => Task::find_all_sorted_by_due_date(conn).await?,
        (None, SortMode::Priority) => Task::find_all_sorted_by_priority(conn).await?,
        (None, SortMode::AssignedToMe) => {
            let session = state.session().await?;
            Task::find_active_by_assignee(conn, session.user_id).await?
        }
    };

    Ok(ResponseJson(ApiResponse::success(tasks)))
}

pub async fn get_task(
    Extension(task): Extension<Task>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn get_subtasks(
    Extension(task): Extension<Task>,
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<Task>>>, ApiError> {
    let children = Task::find_children(&state.db().conn, task.id).await?;
    Ok(ResponseJson(ApiResponse::success(children)))
}

pub async fn create_task(
    State(state): State<AppState>,
    Json(payload): Json<CreateTaskRequest>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let session = state.session().await?;
    tracing::debug!("Creating task '{}'", payload.title);

    let data = CreateTask {
        title: payload.title,
        description: payload.description,
        project_id: payload.project_id,
        assignee_user_id: payload.assignee_user_id,
        creator_user_id: session.user_id,
        due_date: payload.due_date,
        priority: payload.priority,
        status: payload.status,
        is_recurring: payload.is_recurring,
        recurrence_rule: payload.recurrence_rule,
        parent_task_id: payload.parent_task_id,
        reminder_offset_ms: payload.reminder_offset_ms,
    };

    let task = state.tasks().create_task(&session, data).await?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn update_task(
    Extension(existing_task): Extension<Task>,
    State(state): State<AppState>,
    Json(patch): Json<TaskPatch>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let session = state.session().await?;
    let task = state
        .tasks()
        .update_task(&session, existing_task.id, patch)
        .await?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn set_task_status(
    Extension(task): Extension<Task>,
    State(state): State<AppState>,
    Json(payload): Json<SetStatusRequest>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let task = state.tasks().set_status(task.id, payload.status).await?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn delete_task(
    Extension(task): Extension<Task>,
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    state.tasks().delete_task(task.id).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn start_timer(
    Extension(task): Extension<Task>,
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<bool>>, ApiError> {
    let started = state.tasks().start_tracking_time(task.id).await?;
    Ok(ResponseJson(ApiResponse::success(started)))
}

pub async fn stop_timer(
    Extension(task): Extension<Task>,
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<StopTrackingResponse>>, ApiError> {
    let session = state.tasks().stop_tracking_time(task.id).await?;
    Ok(ResponseJson(ApiResponse::success(StopTrackingResponse {
        session_ms: session.map(|d| d.num_milliseconds()),
    })))
}

pub async fn reset_timer(
    Extension(task): Extension<Task>,
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    state.tasks().reset_tracking_time(task.id).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn set_sort_mode(
    State(state): State<AppState>,
    Json(payload): Json<SetSortModeRequest>,
) -> Result<ResponseJson<ApiResponse<SortMode>>, ApiError> {
    state.feed().set_sort_mode(payload.mode);
    Ok(ResponseJson(ApiResponse::success(state.feed().sort_mode())))
}

pub async fn stream_tasks_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = handle_tasks_ws(socket, state).await {
            tracing::warn!("tasks WS closed: {}", e);
        }
    })
}

async fn handle_tasks_ws(socket: WebSocket, state: AppState) -> anyhow::Result<()> {
    use futures_util::{SinkExt, StreamExt};

    let mut snapshots = state.feed().subscribe();
    let (mut sender, mut receiver) = socket.split();

    // Drain (and ignore) client messages so pings/pongs keep working.
    tokio::spawn(async move { while let Some(Ok(_)) = receiver.next().await {} });

    loop {
        match snapshots.recv().await {
            Ok(snapshot) => {
                let text = serde_json::to_string(&snapshot)?;
                if sender
                    .send(axum::extract::ws::Message::Text(text.into()))
                    .await
                    .is_err()
                {
                    break; // client disconnected
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "ws subscriber lagged; continuing with next snapshot");
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
    let _ = sender.close().await;
    Ok(())
}

pub fn router(state: &AppState) -> Router<AppState> {
    let task_id_router = Router::new()
        .route("/", get(get_task))
        .route("/", put(update_task))
        .route("/", delete(delete_task))
        .route("/status", put(set_task_status))
        .route("/children", get(get_subtasks))
        .route("/timer/start", post(start_timer))
        .route("/timer/stop", post(stop_timer))
        .route("/timer/reset", post(reset_timer))
        .merge(super::comments::task_router())
        .layer(from_fn_with_state(state.clone(), load_task_middleware));

    let inner = Router::new()
        .route("/", get(get_tasks).post(create_task))
        .route("/sort-mode", put(set_sort_mode))
        .route("/stream/ws", get(stream_tasks_ws))
        .nest("/{task_id}", task_id_router);

    Router::new().nest("/tasks", inner)
}
