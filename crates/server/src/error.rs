use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use db::{
    DbErr,
    models::{
        collaboration_invite::InviteError, project::ProjectError,
        project_collaborator::CollaboratorError, task::TaskError, task_comment::CommentError,
        user::UserError,
    },
};
use services::services::tasks::TaskServiceError;
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error(transparent)]
    User(#[from] UserError),
    #[error(transparent)]
    Comment(#[from] CommentError),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error(transparent)]
    Invite(#[from] InviteError),
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<TaskServiceError> for ApiError {
    fn from(err: TaskServiceError) -> Self {
        match err {
            TaskServiceError::Task(task_err) => ApiError::Task(task_err),
            TaskServiceError::Database(db_err) => ApiError::Database(db_err),
            TaskServiceError::Validation(msg) => ApiError::BadRequest(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, error_type) = match &self {
            ApiError::Task(err) => match err {
                TaskError::NotFound => (StatusCode::NOT_FOUND, "TaskError"),
                TaskError::ProjectNotFound
                | TaskError::AssigneeNotFound
                | TaskError::ParentNotFound => (StatusCode::BAD_REQUEST, "TaskError"),
                TaskError::TrackingConflict => (StatusCode::CONFLICT, "TaskError"),
                TaskError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "TaskError"),
            },
            ApiError::Project(err) => match err {
                ProjectError::NotFound => (StatusCode::NOT_FOUND, "ProjectError"),
                ProjectError::OwnerNotFound => (StatusCode::BAD_REQUEST, "ProjectError"),
                ProjectError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ProjectError"),
            },
            ApiError::User(err) => match err {
                UserError::NotFound => (StatusCode::NOT_FOUND, "UserError"),
                UserError::DuplicateEmail => (StatusCode::CONFLICT, "UserError"),
                UserError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "UserError"),
            },
            ApiError::Comment(err) => match err {
                CommentError::NotFound => (StatusCode::NOT_FOUND, "CommentError"),
                CommentError::TaskNotFound | CommentError::AuthorNotFound => {
                    (StatusCode::BAD_REQUEST, "CommentError")
                }
                CommentError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CommentError"),
            },
            ApiError::Collaborator(err) => match err {
                CollaboratorError::NotFound => (StatusCode::NOT_FOUND, "CollaboratorError"),
                CollaboratorError::ProjectNotFound | CollaboratorError::UserNotFound => {
                    (StatusCode::BAD_REQUEST, "CollaboratorError")
                }
                CollaboratorError::Database(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "CollaboratorError")
                }
            },
            ApiError::Invite(err) => match err {
                InviteError::NotFound => (StatusCode::NOT_FOUND, "InviteError"),
                InviteError::AlreadyResolved => (StatusCode::CONFLICT, "InviteError"),
                InviteError::ProjectNotFound
                | InviteError::InviterNotFound
                | InviteError::UnknownInvitee => (StatusCode::BAD_REQUEST, "InviteError"),
                InviteError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InviteError"),
            },
            ApiError::Database(db_err) => match db_err {
                DbErr::RecordNotFound(_) => (StatusCode::NOT_FOUND, "DatabaseError"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "DatabaseError"),
            },
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "ConflictError"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        };

        let error_message = match &self {
            ApiError::NotFound(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Conflict(msg)
            | ApiError::Internal(msg) => msg.clone(),
            _ => format!("{}: {}", error_type, self),
        };

        if status_code.is_server_error() {
            tracing::error!(
                status = %status_code,
                error_type,
                error = %self,
                "API request failed"
            );
        }
        let response = ApiResponse::<()>::error(&error_message);
        (status_code, Json(response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_variants_map_to_expected_statuses() {
        assert_eq!(
            ApiError::BadRequest("bad".to_string())
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::NotFound("missing".to_string())
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Conflict("conflict".to_string())
                .into_response()
                .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::Internal("boom".to_string())
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn domain_errors_map_to_expected_statuses() {
        assert_eq!(
            ApiError::from(TaskError::NotFound).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(TaskError::TrackingConflict)
                .into_response()
                .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(ProjectError::OwnerNotFound)
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(UserError::DuplicateEmail)
                .into_response()
                .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(InviteError::AlreadyResolved)
                .into_response()
                .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(DbErr::RecordNotFound("gone".to_string()))
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        );
    }
}
