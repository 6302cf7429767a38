use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;
use uuid::Uuid;

pub use crate::types::{TaskPriority, TaskStatus};

use crate::{
    entities::task,
    events::{EVENT_TASK_CREATED, EVENT_TASK_DELETED, EVENT_TASK_UPDATED, TaskEventPayload},
    models::{event_outbox::EventOutbox, ids},
};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("Task not found")]
    NotFound,
    #[error("Project not found")]
    ProjectNotFound,
    #[error("Assignee not found")]
    AssigneeNotFound,
    #[error("Parent task not found")]
    ParentNotFound,
    #[error("Tracking state changed concurrently")]
    TrackingConflict,
}

/// User-selectable ordering for the task list.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SortMode {
    #[default]
    DueDate,
    Priority,
    AssignedToMe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub assignee_user_id: Option<Uuid>,
    pub creator_user_id: Uuid,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub is_recurring: bool,
    pub recurrence_rule: Option<String>,
    pub parent_task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub reminder_offset_ms: Option<i64>,
    pub time_tracking_started_at: Option<DateTime<Utc>>,
    pub time_spent_ms: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTask {
    pub title: String,
    pub description: Option<String>,
    pub project_id: Option<Uuid>,
    pub assignee_user_id: Option<Uuid>,
    pub creator_user_id: Uuid,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Option<TaskPriority>,
    pub status: Option<TaskStatus>,
    pub is_recurring: Option<bool>,
    pub recurrence_rule: Option<String>,
    pub parent_task_id: Option<Uuid>,
    pub reminder_offset_ms: Option<i64>,
}

impl CreateTask {
    pub fn from_title(title: impl Into<String>, creator_user_id: Uuid) -> Self {
        Self {
            title: title.into(),
            description: None,
            project_id: None,
            assignee_user_id: None,
            creator_user_id,
            due_date: None,
            priority: None,
            status: None,
            is_recurring: None,
            recurrence_rule: None,
            parent_task_id: None,
            reminder_offset_ms: None,
        }
    }
}

/// Fully-resolved replacement values for the mutable task fields; partial
/// payloads are merged against the existing row before this is built.
#[derive(Debug, Clone)]
pub struct UpdateTask {
    pub title: String,
    pub description: Option<String>,
    pub project_id: Option<Uuid>,
    pub assignee_user_id: Option<Uuid>,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub is_recurring: bool,
    pub recurrence_rule: Option<String>,
    pub reminder_offset_ms: Option<i64>,
}

impl From<&Task> for UpdateTask {
    fn from(task: &Task) -> Self {
        Self {
            title: task.title.clone(),
            description: task.description.clone(),
            project_id: task.project_id,
            assignee_user_id: task.assignee_user_id,
            due_date: task.due_date,
            priority: task.priority,
            status: task.status.clone(),
            is_recurring: task.is_recurring,
            recurrence_rule: task.recurrence_rule.clone(),
            reminder_offset_ms: task.reminder_offset_ms,
        }
    }
}

impl Task {
    async fn from_model<C: ConnectionTrait>(db: &C, model: task::Model) -> Result<Self, DbErr> {
        let project_id = match model.project_id {
            Some(id) => ids::project_uuid_by_id(db, id).await?,
            None => None,
        };
        let assignee_user_id = match model.assignee_user_id {
            Some(id) => ids::user_uuid_by_id(db, id).await?,
            None => None,
        };
        let parent_task_id = match model.parent_task_id {
            Some(id) => ids::task_uuid_by_id(db, id).await?,
            None => None,
        };

        Ok(Self {
            id: model.uuid,
            project_id,
            title: model.title,
            description: model.description,
            assignee_user_id,
            creator_user_id: model.creator_user_id,
            due_date: model.due_date,
            priority: model.priority,
            status: model.status,
            is_recurring: model.is_recurring,
            recurrence_rule: model.recurrence_rule,
            parent_task_id,
            created_at: model.created_at,
            updated_at: model.updated_at,
            completed_at: model.completed_at,
            reminder_offset_ms: model.reminder_offset_ms,
            time_tracking_started_at: model.time_tracking_started_at,
            time_spent_ms: model.time_spent_ms,
        })
    }

    async fn collect<C: ConnectionTrait>(
        db: &C,
        models: Vec<task::Model>,
    ) -> Result<Vec<Self>, DbErr> {
        let mut tasks = Vec::with_capacity(models.len());
        for model in models {
            tasks.push(Self::from_model(db, model).await?);
        }
        Ok(tasks)
    }

    pub async fn find_by_id<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<Self>, DbErr> {
        let record = task::Entity::find()
            .filter(task::Column::Uuid.eq(id))
            .one(db)
            .await?;
        match record {
            Some(model) => Ok(Some(Self::from_model(db, model).await?)),
            None => Ok(None),
        }
    }

    pub async fn find_all_sorted_by_due_date<C: ConnectionTrait>(
        db: &C,
    ) -> Result<Vec<Self>, DbErr> {
        let models = task::Entity::find()
            .order_by_asc(task::Column::DueDate)
            .order_by_asc(task::Column::CreatedAt)
            .all(db)
            .await?;
        Self::collect(db, models).await
    }

    pub async fn find_all_sorted_by_priority<C: ConnectionTrait>(
        db: &C,
    ) -> Result<Vec<Self>, DbErr> {
        let models = task::Entity::find()
            .order_by_desc(task::Column::Priority)
            .order_by_asc(task::Column::DueDate)
            .all(db)
            .await?;
        Self::collect(db, models).await
    }

    pub async fn find_by_project_id<C: ConnectionTrait>(
        db: &C,
        project_id: Uuid,
    ) -> Result<Vec<Self>, DbErr> {
        let Some(project_row_id) = ids::project_id_by_uuid(db, project_id).await? else {
            return Ok(Vec::new());
        };
        let models = task::Entity::find()
            .filter(task::Column::ProjectId.eq(project_row_id))
            .order_by_desc(task::Column::Priority)
            .order_by_asc(task::Column::DueDate)
            .all(db)
            .await?;
        Self::collect(db, models).await
    }

    /// Open tasks assigned to `user_id`, soonest due first.
    pub async fn find_active_by_assignee<C: ConnectionTrait>(
        db: &C,
        user_id: Uuid,
    ) -> Result<Vec<Self>, DbErr> {
        let Some(user_row_id) = ids::user_id_by_uuid(db, user_id).await? else {
            return Ok(Vec::new());
        };
        let models = task::Entity::find()
            .filter(task::Column::AssigneeUserId.eq(user_row_id))
            .filter(task::Column::Status.ne(TaskStatus::Done))
            .order_by_asc(task::Column::DueDate)
            .all(db)
            .await?;
        Self::collect(db, models).await
    }

    pub async fn find_children<C: ConnectionTrait>(
        db: &C,
        parent_task_id: Uuid,
    ) -> Result<Vec<Self>, DbErr> {
        let Some(parent_row_id) = ids::task_id_by_uuid(db, parent_task_id).await? else {
            return Ok(Vec::new());
        };
        let models = task::Entity::find()
            .filter(task::Column::ParentTaskId.eq(parent_row_id))
            .order_by_asc(task::Column::CreatedAt)
            .all(db)
            .await?;
        Self::collect(db, models).await
    }

    pub async fn create<C: ConnectionTrait>(
        db: &C,
        data: &CreateTask,
        task_id: Uuid,
    ) -> Result<Self, TaskError> {
        let project_row_id = match data.project_id {
            Some(id) => Some(
                ids::project_id_by_uuid(db, id)
                    .await?
                    .ok_or(TaskError::ProjectNotFound)?,
            ),
            None => None,
        };
        let assignee_row_id = match data.assignee_user_id {
            Some(id) => Some(
                ids::user_id_by_uuid(db, id)
                    .await?
                    .ok_or(TaskError::AssigneeNotFound)?,
            ),
            None => None,
        };
        let parent_row_id = match data.parent_task_id {
            Some(id) => Some(
                ids::task_id_by_uuid(db, id)
                    .await?
                    .ok_or(TaskError::ParentNotFound)?,
            ),
            None => None,
        };

        let status = data.status.clone().unwrap_or_default();
        let now = Utc::now();
        let completed_at = (status == TaskStatus::Done).then_some(now);
        let active = task::ActiveModel {
            uuid: Set(task_id),
            project_id: Set(project_row_id),
            title: Set(data.title.clone()),
            description: Set(data.description.clone()),
            assignee_user_id: Set(assignee_row_id),
            creator_user_id: Set(data.creator_user_id),
            due_date: Set(data.due_date),
            priority: Set(data.priority.unwrap_or_default()),
            status: Set(status),
            is_recurring: Set(data.is_recurring.unwrap_or(false)),
            recurrence_rule: Set(data.recurrence_rule.clone()),
            parent_task_id: Set(parent_row_id),
            created_at: Set(now),
            updated_at: Set(now),
            completed_at: Set(completed_at),
            reminder_offset_ms: Set(data.reminder_offset_ms),
            time_tracking_started_at: Set(None),
            time_spent_ms: Set(0),
            ..Default::default()
        };

        let model = active.insert(db).await?;
        let payload = serde_json::to_value(TaskEventPayload {
            task_id,
            project_id: data.project_id,
        })
        .map_err(|err| DbErr::Custom(err.to_string()))?;
        EventOutbox::enqueue(db, EVENT_TASK_CREATED, "task", task_id, payload).await?;
        Ok(Self::from_model(db, model).await?)
    }

    pub async fn update<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        data: &UpdateTask,
    ) -> Result<Self, TaskError> {
        let record = task::Entity::find()
            .filter(task::Column::Uuid.eq(id))
            .one(db)
            .await?
            .ok_or(TaskError::NotFound)?;

        let project_row_id = match data.project_id {
            Some(id) => Some(
                ids::project_id_by_uuid(db, id)
                    .await?
                    .ok_or(TaskError::ProjectNotFound)?,
            ),
            None => None,
        };
        let assignee_row_id = match data.assignee_user_id {
            Some(id) => Some(
                ids::user_id_by_uuid(db, id)
                    .await?
                    .ok_or(TaskError::AssigneeNotFound)?,
            ),
            None => None,
        };

        let now = Utc::now();
        let completed_at = match (&record.status, &data.status) {
            (TaskStatus::Done, TaskStatus::Done) => record.completed_at,
            (_, TaskStatus::Done) => Some(now),
            _ => None,
        };

        let mut active: task::ActiveModel = record.into();
        active.title = Set(data.title.clone());
        active.description = Set(data.description.clone());
        active.project_id = Set(project_row_id);
        active.assignee_user_id = Set(assignee_row_id);
        active.due_date = Set(data.due_date);
        active.priority = Set(data.priority);
        active.status = Set(data.status.clone());
        active.is_recurring = Set(data.is_recurring);
        active.recurrence_rule = Set(data.recurrence_rule.clone());
        active.completed_at = Set(completed_at);
        active.reminder_offset_ms = Set(data.reminder_offset_ms);
        active.updated_at = Set(now);

        let updated = active.update(db).await?;
        let payload = serde_json::to_value(TaskEventPayload {
            task_id: id,
            project_id: data.project_id,
        })
        .map_err(|err| DbErr::Custom(err.to_string()))?;
        EventOutbox::enqueue(db, EVENT_TASK_UPDATED, "task", id, payload).await?;
        Ok(Self::from_model(db, updated).await?)
    }

    pub async fn update_status<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        status: TaskStatus,
    ) -> Result<Self, TaskError> {
        let record = task::Entity::find()
            .filter(task::Column::Uuid.eq(id))
            .one(db)
            .await?
            .ok_or(TaskError::NotFound)?;

        let now = Utc::now();
        let completed_at = match (&record.status, &status) {
            (TaskStatus::Done, TaskStatus::Done) => record.completed_at,
            (_, TaskStatus::Done) => Some(now),
            _ => None,
        };
        let project_row_id = record.project_id;

        let mut active: task::ActiveModel = record.into();
        active.status = Set(status);
        active.completed_at = Set(completed_at);
        active.updated_at = Set(now);
        let updated = active.update(db).await?;

        let project_id = match project_row_id {
            Some(row_id) => ids::project_uuid_by_id(db, row_id).await?,
            None => None,
        };
        let payload = serde_json::to_value(TaskEventPayload {
            task_id: id,
            project_id,
        })
        .map_err(|err| DbErr::Custom(err.to_string()))?;
        EventOutbox::enqueue(db, EVENT_TASK_UPDATED, "task", id, payload).await?;
        Ok(Self::from_model(db, updated).await?)
    }

    /// Idempotent delete; child tasks go with the parent, so their deleted
    /// events are enqueued alongside.
    pub async fn delete<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<u64, DbErr> {
        let record = task::Entity::find()
            .filter(task::Column::Uuid.eq(id))
            .one(db)
            .await?;

        let Some(record) = record else {
            return Ok(0);
        };

        let children = task::Entity::find()
            .filter(task::Column::ParentTaskId.eq(record.id))
            .all(db)
            .await?;

        let project_id = match record.project_id {
            Some(row_id) => ids::project_uuid_by_id(db, row_id).await?,
            None => None,
        };

        let result = task::Entity::delete_many()
            .filter(task::Column::Id.eq(record.id))
            .exec(db)
            .await?;

        if result.rows_affected > 0 {
            for child in children {
                let payload = serde_json::to_value(TaskEventPayload {
                    task_id: child.uuid,
                    project_id,
                })
                .map_err(|err| DbErr::Custom(err.to_string()))?;
                EventOutbox::enqueue(db, EVENT_TASK_DELETED, "task", child.uuid, payload).await?;
            }
            let payload = serde_json::to_value(TaskEventPayload {
                task_id: id,
                project_id,
            })
            .map_err(|err| DbErr::Custom(err.to_string()))?;
            EventOutbox::enqueue(db, EVENT_TASK_DELETED, "task", id, payload).await?;
        }

        Ok(result.rows_affected)
    }

    /// Starts the timer iff it is not already running; the guard lives in
    /// the UPDATE's WHERE clause, so two racing starts resolve to one
    /// winner. Returns false when the timer was already running.
    pub async fn start_tracking_at<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, TaskError> {
        let record = task::Entity::find()
            .filter(task::Column::Uuid.eq(id))
            .one(db)
            .await?
            .ok_or(TaskError::NotFound)?;

        let result = task::Entity::update_many()
            .col_expr(task::Column::TimeTrackingStartedAt, Expr::value(Some(at)))
            .col_expr(task::Column::UpdatedAt, Expr::value(at))
            .filter(task::Column::Id.eq(record.id))
            .filter(task::Column::TimeTrackingStartedAt.is_null())
            .exec(db)
            .await?;

        if result.rows_affected == 0 {
            return Ok(false);
        }

        Self::enqueue_updated(db, &record).await?;
        Ok(true)
    }

    /// Stops the timer, folding the elapsed session into the accumulated
    /// total. The UPDATE is guarded on the observed tracking-start, a
    /// compare-and-swap; one retry covers an interleaved start/stop pair.
    /// Returns the session duration, or None when the timer was not
    /// running.
    pub async fn stop_tracking_at<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Duration>, TaskError> {
        for _ in 0..2 {
            let record = task::Entity::find()
                .filter(task::Column::Uuid.eq(id))
                .one(db)
                .await?
                .ok_or(TaskError::NotFound)?;

            let Some(started) = record.time_tracking_started_at else {
                return Ok(None);
            };

            let session_ms = (at - started).num_milliseconds().max(0);
            let new_total = record.time_spent_ms + session_ms;

            let result = task::Entity::update_many()
                .col_expr(task::Column::TimeSpentMs, Expr::value(new_total))
                .col_expr(
                    task::Column::TimeTrackingStartedAt,
                    Expr::value(None::<DateTime<Utc>>),
                )
                .col_expr(task::Column::UpdatedAt, Expr::value(at))
                .filter(task::Column::Id.eq(record.id))
                .filter(task::Column::TimeTrackingStartedAt.eq(started))
                .exec(db)
                .await?;

            if result.rows_affected > 0 {
                Self::enqueue_updated(db, &record).await?;
                return Ok(Some(Duration::milliseconds(session_ms)));
            }
        }

        Err(TaskError::TrackingConflict)
    }

    /// The one sanctioned decrease of the accumulated total.
    pub async fn reset_tracking<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<(), TaskError> {
        let record = task::Entity::find()
            .filter(task::Column::Uuid.eq(id))
            .one(db)
            .await?
            .ok_or(TaskError::NotFound)?;

        task::Entity::update_many()
            .col_expr(task::Column::TimeSpentMs, Expr::value(0i64))
            .col_expr(
                task::Column::TimeTrackingStartedAt,
                Expr::value(None::<DateTime<Utc>>),
            )
            .col_expr(task::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(task::Column::Id.eq(record.id))
            .exec(db)
            .await?;

        Self::enqueue_updated(db, &record).await?;
        Ok(())
    }

    async fn enqueue_updated<C: ConnectionTrait>(
        db: &C,
        record: &task::Model,
    ) -> Result<(), DbErr> {
        let project_id = match record.project_id {
            Some(row_id) => ids::project_uuid_by_id(db, row_id).await?,
            None => None,
        };
        let payload = serde_json::to_value(TaskEventPayload {
            task_id: record.uuid,
            project_id,
        })
        .map_err(|err| DbErr::Custom(err.to_string()))?;
        EventOutbox::enqueue(db, EVENT_TASK_UPDATED, "task", record.uuid, payload).await
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::Database;
    use sea_orm_migration::MigratorTrait;

    use crate::models::{
        project::{CreateProject, Project},
        user::{CreateUser, User},
    };

    use super::*;

    async fn setup_db() -> sea_orm::DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db_migration::Migrator::up(&db, None).await.unwrap();
        db
    }

    async fn seed_user(db: &sea_orm::DatabaseConnection, email: &str) -> User {
        User::create(
            db,
            &CreateUser {
                email: email.to_string(),
                name: email.split('@').next().unwrap().to_string(),
                photo_url: None,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap()
    }

    async fn seed_project(db: &sea_orm::DatabaseConnection, owner: &User) -> Project {
        Project::create(
            db,
            &CreateProject {
                name: "Inbox".to_string(),
                description: None,
                owner_user_id: owner.id,
                color_hex: None,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn stop_tracking_adds_exactly_the_session_delta() {
        let db = setup_db().await;
        let creator = seed_user(&db, "alice@example.com").await;
        let task = Task::create(
            &db,
            &CreateTask::from_title("Write report", creator.id),
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        let t0 = Utc::now();
        let t1 = t0 + Duration::milliseconds(90_000);

        assert!(Task::start_tracking_at(&db, task.id, t0).await.unwrap());
        let session = Task::stop_tracking_at(&db, task.id, t1)
            .await
            .unwrap()
            .expect("timer was running");
        assert_eq!(session, Duration::milliseconds(90_000));

        let reloaded = Task::find_by_id(&db, task.id).await.unwrap().unwrap();
        assert_eq!(reloaded.time_spent_ms, 90_000);
        assert!(reloaded.time_tracking_started_at.is_none());
    }

    #[tokio::test]
    async fn tracking_sessions_accumulate() {
        let db = setup_db().await;
        let creator = seed_user(&db, "alice@example.com").await;
        let task = Task::create(
            &db,
            &CreateTask::from_title("Review PR", creator.id),
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        let t0 = Utc::now();
        Task::start_tracking_at(&db, task.id, t0).await.unwrap();
        Task::stop_tracking_at(&db, task.id, t0 + Duration::seconds(30))
            .await
            .unwrap();
        Task::start_tracking_at(&db, task.id, t0 + Duration::seconds(60))
            .await
            .unwrap();
        Task::stop_tracking_at(&db, task.id, t0 + Duration::seconds(90))
            .await
            .unwrap();

        let reloaded = Task::find_by_id(&db, task.id).await.unwrap().unwrap();
        assert_eq!(reloaded.time_spent_ms, 60_000);
    }

    #[tokio::test]
    async fn double_start_keeps_the_original_instant() {
        let db = setup_db().await;
        let creator = seed_user(&db, "alice@example.com").await;
        let task = Task::create(
            &db,
            &CreateTask::from_title("Plan sprint", creator.id),
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        let t0 = Utc::now();
        assert!(Task::start_tracking_at(&db, task.id, t0).await.unwrap());
        assert!(
            !Task::start_tracking_at(&db, task.id, t0 + Duration::seconds(10))
                .await
                .unwrap()
        );

        let reloaded = Task::find_by_id(&db, task.id).await.unwrap().unwrap();
        assert_eq!(reloaded.time_tracking_started_at, Some(t0));
    }

    #[tokio::test]
    async fn stop_without_start_is_a_noop() {
        let db = setup_db().await;
        let creator = seed_user(&db, "alice@example.com").await;
        let task = Task::create(
            &db,
            &CreateTask::from_title("Idle task", creator.id),
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        let stopped = Task::stop_tracking_at(&db, task.id, Utc::now()).await.unwrap();
        assert!(stopped.is_none());
        let reloaded = Task::find_by_id(&db, task.id).await.unwrap().unwrap();
        assert_eq!(reloaded.time_spent_ms, 0);
    }

    #[tokio::test]
    async fn deleting_project_clears_task_link_but_keeps_task() {
        let db = setup_db().await;
        let owner = seed_user(&db, "owner@example.com").await;
        let project = seed_project(&db, &owner).await;

        let mut data = CreateTask::from_title("Survives project", owner.id);
        data.project_id = Some(project.id);
        let task = Task::create(&db, &data, Uuid::new_v4()).await.unwrap();

        Project::delete(&db, project.id).await.unwrap();

        let reloaded = Task::find_by_id(&db, task.id).await.unwrap().unwrap();
        assert!(reloaded.project_id.is_none());
    }

    #[tokio::test]
    async fn deleting_user_clears_assignee_but_keeps_task() {
        let db = setup_db().await;
        let creator = seed_user(&db, "creator@example.com").await;
        let assignee = seed_user(&db, "assignee@example.com").await;

        let mut data = CreateTask::from_title("Survives assignee", creator.id);
        data.assignee_user_id = Some(assignee.id);
        let task = Task::create(&db, &data, Uuid::new_v4()).await.unwrap();

        User::delete(&db, assignee.id).await.unwrap();

        let reloaded = Task::find_by_id(&db, task.id).await.unwrap().unwrap();
        assert!(reloaded.assignee_user_id.is_none());
    }

    #[tokio::test]
    async fn deleting_parent_cascades_to_children() {
        let db = setup_db().await;
        let creator = seed_user(&db, "creator@example.com").await;

        let parent = Task::create(
            &db,
            &CreateTask::from_title("Parent", creator.id),
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        let mut child_data = CreateTask::from_title("Child", creator.id);
        child_data.parent_task_id = Some(parent.id);
        let child = Task::create(&db, &child_data, Uuid::new_v4()).await.unwrap();

        Task::delete(&db, parent.id).await.unwrap();

        assert!(Task::find_by_id(&db, parent.id).await.unwrap().is_none());
        assert!(Task::find_by_id(&db, child.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn priority_ordering_sorts_high_first_then_due_date() {
        let db = setup_db().await;
        let creator = seed_user(&db, "creator@example.com").await;
        let now = Utc::now();

        let mut low = CreateTask::from_title("low", creator.id);
        low.priority = Some(TaskPriority::Low);
        low.due_date = Some(now + Duration::hours(1));
        let mut high_late = CreateTask::from_title("high late", creator.id);
        high_late.priority = Some(TaskPriority::High);
        high_late.due_date = Some(now + Duration::hours(5));
        let mut high_soon = CreateTask::from_title("high soon", creator.id);
        high_soon.priority = Some(TaskPriority::High);
        high_soon.due_date = Some(now + Duration::hours(2));

        Task::create(&db, &low, Uuid::new_v4()).await.unwrap();
        Task::create(&db, &high_late, Uuid::new_v4()).await.unwrap();
        Task::create(&db, &high_soon, Uuid::new_v4()).await.unwrap();

        let sorted = Task::find_all_sorted_by_priority(&db).await.unwrap();
        let titles: Vec<_> = sorted.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["high soon", "high late", "low"]);
    }

    #[tokio::test]
    async fn done_status_stamps_completed_at_once() {
        let db = setup_db().await;
        let creator = seed_user(&db, "creator@example.com").await;
        let task = Task::create(
            &db,
            &CreateTask::from_title("Finishable", creator.id),
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        let done = Task::update_status(&db, task.id, TaskStatus::Done).await.unwrap();
        let first_stamp = done.completed_at.expect("completed_at set");

        let still_done = Task::update_status(&db, task.id, TaskStatus::Done).await.unwrap();
        assert_eq!(still_done.completed_at, Some(first_stamp));

        let reopened = Task::update_status(&db, task.id, TaskStatus::Todo).await.unwrap();
        assert!(reopened.completed_at.is_none());
    }
}
