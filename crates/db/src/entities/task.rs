use sea_orm::entity::prelude::*;

use crate::types::{TaskPriority, TaskStatus};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "tasks")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub uuid: Uuid,
    pub project_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub assignee_user_id: Option<i64>,
    pub creator_user_id: Uuid,
    pub due_date: Option<DateTimeUtc>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub is_recurring: bool,
    pub recurrence_rule: Option<String>,
    pub parent_task_id: Option<i64>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
    pub completed_at: Option<DateTimeUtc>,
    pub reminder_offset_ms: Option<i64>,
    pub time_tracking_started_at: Option<DateTimeUtc>,
    pub time_spent_ms: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
