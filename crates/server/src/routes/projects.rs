use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    middleware::from_fn_with_state,
    response::Json as ResponseJson,
    routing::{delete, get, put},
};
use db::models::{
    project::{CreateProject, Project, UpdateProject},
    project_collaborator::{CollaboratorRole, ProjectCollaborator},
    task::Task,
};
use serde::Deserialize;
use utils::response::ApiResponse;
use uuid::Uuid;

use services::services::session::UserSession;

use crate::{AppState, error::ApiError, middleware::load_project_middleware};

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
    pub color_hex: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpsertCollaboratorRequest {
    pub user_id: Uuid,
    pub role: CollaboratorRole,
}

pub async fn get_projects(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<Project>>>, ApiError> {
    let projects = Project::find_all(&state.db().conn).await?;
    Ok(ResponseJson(ApiResponse::success(projects)))
}

pub async fn get_project(
    Extension(project): Extension<Project>,
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Project>>, ApiError> {
    // Opening a project counts as accessing it for members; non-members
    // reading it is fine too, there is just nothing to stamp.
    if let Ok(Some(session)) = UserSession::load(&state.db().conn).await
        && let Err(err) = ProjectCollaborator::touch_last_accessed(
            &state.db().conn,
            project.id,
            session.user_id,
        )
        .await
    {
        tracing::debug!(error = %err, project_id = %project.id, "skipping last-access stamp");
    }
    Ok(ResponseJson(ApiResponse::success(project)))
}

pub async fn create_project(
    State(state): State<AppState>,
    Json(payload): Json<CreateProjectRequest>,
) -> Result<ResponseJson<ApiResponse<Project>>, ApiError> {
    if payload.name.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Project name must not be empty".to_string(),
        ));
    }
    let session = state.session().await?;
    let project = Project::create(
        &state.db().conn,
        &CreateProject {
            name: payload.name,
            description: payload.description,
            owner_user_id: session.user_id,
            color_hex: payload.color_hex,
        },
        Uuid::new_v4(),
    )
    .await?;

    // The owner is a collaborator of their own project.
    ProjectCollaborator::upsert(
        &state.db().conn,
        project.id,
        session.user_id,
        CollaboratorRole::Owner,
    )
    .await?;

    Ok(ResponseJson(ApiResponse::success(project)))
}

pub async fn update_project(
    Extension(project): Extension<Project>,
    State(state): State<AppState>,
    Json(payload): Json<UpdateProject>,
) -> Result<ResponseJson<ApiResponse<Project>>, ApiError> {
    let project = Project::update(&state.db().conn, project.id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(project)))
}

pub async fn delete_project(
    Extension(project): Extension<Project>,
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    Project::delete(&state.db().conn, project.id).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn get_project_tasks(
    Extension(project): Extension<Project>,
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<Task>>>, ApiError> {
    let tasks = Task::find_by_project_id(&state.db().conn, project.id).await?;
    Ok(ResponseJson(ApiResponse::success(tasks)))
}

pub async fn get_collaborators(
    Extension(project): Extension<Project>,
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<ProjectCollaborator>>>, ApiError> {
    let collaborators =
        ProjectCollaborator::find_by_project(&state.db().conn, project.id).await?;
    Ok(ResponseJson(ApiResponse::success(collaborators)))
}

pub async fn upsert_collaborator(
    Extension(project): Extension<Project>,
    State(state): State<AppState>,
    Json(payload): Json<UpsertCollaboratorRequest>,
) -> Result<ResponseJson<ApiResponse<ProjectCollaborator>>, ApiError> {
    let collaborator = ProjectCollaborator::upsert(
        &state.db().conn,
        project.id,
        payload.user_id,
        payload.role,
    )
    .await?;
    Ok(ResponseJson(ApiResponse::success(collaborator)))
}

pub async fn remove_collaborator(
    Extension(project): Extension<Project>,
    State(state): State<AppState>,
    Path((_project_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let rows = ProjectCollaborator::remove(&state.db().conn, project.id, user_id).await?;
    if rows == 0 {
        return Err(ApiError::NotFound("Collaborator not found".to_string()));
    }
    Ok(ResponseJson(ApiResponse::success(())))
}

pub fn router(state: &AppState) -> Router<AppState> {
    let project_id_router = Router::new()
        .route("/", get(get_project))
        .route("/", put(update_project))
        .route("/", delete(delete_project))
        .route("/tasks", get(get_project_tasks))
        .route("/collaborators", get(get_collaborators).put(upsert_collaborator))
        .route("/collaborators/{user_id}", delete(remove_collaborator))
        .layer(from_fn_with_state(state.clone(), load_project_middleware));

    let inner = Router::new()
        .route("/", get(get_projects).post(create_project))
        .nest("/{project_id}", project_id_router);

    Router::new().nest("/projects", inner)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use db::{
        DBService,
        models::user::{CreateUser, User},
    };
    use sea_orm::Database;
    use sea_orm_migration::MigratorTrait;
    use services::services::notifier::{
        AssignmentNotification, Notify, ReminderNotification,
    };
    use tower::ServiceExt;

    use super::*;

    struct NullNotifier;

    #[async_trait::async_trait]
    impl Notify for NullNotifier {
        async fn reminder(&self, _notification: ReminderNotification) {}
        async fn assignment(&self, _notification: AssignmentNotification) {}
    }

    async fn setup_app() -> AppState {
        let conn = Database::connect("sqlite::memory:").await.unwrap();
        db_migration::Migrator::up(&conn, None).await.unwrap();
        let db = DBService { conn };

        let user = User::create(
            &db.conn,
            &CreateUser {
                email: "owner@example.com".to_string(),
                name: "Owner".to_string(),
                photo_url: None,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        User::set_current(&db.conn, user.id).await.unwrap();

        AppState::assemble(db, Arc::new(NullNotifier)).await
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn creating_a_project_makes_the_owner_a_collaborator() {
        let state = setup_app().await;
        let app = crate::router(state);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/projects",
                serde_json::json!({ "name": "Side project" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let project_id = body_json(response).await["data"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/projects/{project_id}/collaborators"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        let collaborators = json["data"].as_array().unwrap();
        assert_eq!(collaborators.len(), 1);
        assert_eq!(collaborators[0]["role"], "owner");
    }

    #[tokio::test]
    async fn deleting_a_project_keeps_its_tasks() {
        let state = setup_app().await;
        let app = crate::router(state);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/projects",
                serde_json::json!({ "name": "Doomed" }),
            ))
            .await
            .unwrap();
        let project_id = body_json(response).await["data"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/tasks",
                serde_json::json!({ "title": "Orphan to be", "project_id": project_id }),
            ))
            .await
            .unwrap();
        let task_id = body_json(response).await["data"]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/projects/{project_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/tasks/{task_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json["data"]["project_id"].is_null());
    }
}
