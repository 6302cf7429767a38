use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const EVENT_TASK_CREATED: &str = "task.created";
pub const EVENT_TASK_UPDATED: &str = "task.updated";
pub const EVENT_TASK_DELETED: &str = "task.deleted";

pub const EVENT_PROJECT_CREATED: &str = "project.created";
pub const EVENT_PROJECT_UPDATED: &str = "project.updated";
pub const EVENT_PROJECT_DELETED: &str = "project.deleted";

pub const EVENT_USER_CREATED: &str = "user.created";
pub const EVENT_USER_UPDATED: &str = "user.updated";
pub const EVENT_USER_DELETED: &str = "user.deleted";

pub const EVENT_COMMENT_CREATED: &str = "comment.created";
pub const EVENT_COMMENT_UPDATED: &str = "comment.updated";
pub const EVENT_COMMENT_DELETED: &str = "comment.deleted";

pub const EVENT_INVITE_CREATED: &str = "invite.created";
pub const EVENT_INVITE_RESOLVED: &str = "invite.resolved";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEventPayload {
    pub task_id: Uuid,
    pub project_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectEventPayload {
    pub project_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEventPayload {
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentEventPayload {
    pub comment_id: Uuid,
    pub task_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteEventPayload {
    pub invite_id: Uuid,
    pub project_id: Uuid,
}
