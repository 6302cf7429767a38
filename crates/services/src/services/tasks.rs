use std::sync::Arc;

use chrono::{Duration, Utc};
use db::{
    DBService, DbErr,
    models::task::{CreateTask, Task, TaskError, TaskStatus, UpdateTask},
};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::services::{
    notifier::{AssignmentNotification, Notify},
    reminders::ReminderScheduler,
    session::UserSession,
};

#[derive(Debug, Error)]
pub enum TaskServiceError {
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("{0}")]
    Validation(String),
}

/// Partial update payload. Omitted fields keep their current value; a
/// description of the empty string clears it.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub project_id: Option<Uuid>,
    pub assignee_user_id: Option<Uuid>,
    pub due_date: Option<chrono::DateTime<Utc>>,
    pub priority: Option<db::types::TaskPriority>,
    pub status: Option<TaskStatus>,
    pub is_recurring: Option<bool>,
    pub recurrence_rule: Option<String>,
    pub reminder_offset_ms: Option<i64>,
}

impl TaskPatch {
    fn merge_into(self, existing: &Task) -> UpdateTask {
        let description = match self.description {
            Some(s) if s.trim().is_empty() => None,
            Some(s) => Some(s),
            None => existing.description.clone(),
        };
        UpdateTask {
            title: self.title.unwrap_or_else(|| existing.title.clone()),
            description,
            project_id: self.project_id.or(existing.project_id),
            assignee_user_id: self.assignee_user_id.or(existing.assignee_user_id),
            due_date: self.due_date.or(existing.due_date),
            priority: self.priority.unwrap_or(existing.priority),
            status: self.status.unwrap_or_else(|| existing.status.clone()),
            is_recurring: self.is_recurring.unwrap_or(existing.is_recurring),
            recurrence_rule: self.recurrence_rule.or_else(|| existing.recurrence_rule.clone()),
            reminder_offset_ms: self.reminder_offset_ms.or(existing.reminder_offset_ms),
        }
    }
}

/// Write-side orchestration for tasks: every mutation goes through the
/// fair write lock (total FIFO ordering, one writer at a time), then the
/// reminder job and notification side effects are recomputed from the
/// persisted row.
#[derive(Clone)]
pub struct TaskService {
    db: DBService,
    scheduler: ReminderScheduler,
    notifier: Arc<dyn Notify>,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl TaskService {
    pub fn new(db: DBService, scheduler: ReminderScheduler, notifier: Arc<dyn Notify>) -> Self {
        Self {
            db,
            scheduler,
            notifier,
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn scheduler(&self) -> &ReminderScheduler {
        &self.scheduler
    }

    pub async fn create_task(
        &self,
        session: &UserSession,
        data: CreateTask,
    ) -> Result<Task, TaskServiceError> {
        if data.title.trim().is_empty() {
            return Err(TaskServiceError::Validation(
                "Task title must not be empty".to_string(),
            ));
        }
        let data = CreateTask {
            creator_user_id: session.user_id,
            ..data
        };

        let task = {
            let _guard = self.write_lock.lock().await;
            Task::create(&self.db.conn, &data, Uuid::new_v4()).await?
        };

        self.scheduler.schedule(&task);
        self.notify_assignment_if_needed(session, None, &task).await;
        Ok(task)
    }

    pub async fn update_task(
        &self,
        session: &UserSession,
        id: Uuid,
        patch: TaskPatch,
    ) -> Result<Task, TaskServiceError> {
        if let Some(title) = &patch.title
            && title.trim().is_empty()
        {
            return Err(TaskServiceError::Validation(
                "Task title must not be empty".to_string(),
            ));
        }

        let (previous_assignee, task) = {
            let _guard = self.write_lock.lock().await;
            let existing = Task::find_by_id(&self.db.conn, id)
                .await?
                .ok_or(TaskError::NotFound)?;
            let previous_assignee = existing.assignee_user_id;
            let data = patch.merge_into(&existing);
            let task = Task::update(&self.db.conn, id, &data).await?;
            (previous_assignee, task)
        };

        self.scheduler.schedule(&task);
        self.notify_assignment_if_needed(session, previous_assignee, &task)
            .await;
        Ok(task)
    }

    pub async fn set_status(
        &self,
        id: Uuid,
        status: TaskStatus,
    ) -> Result<Task, TaskServiceError> {
        let task = {
            let _guard = self.write_lock.lock().await;
            Task::update_status(&self.db.conn, id, status).await?
        };
        self.scheduler.schedule(&task);
        Ok(task)
    }

    /// Idempotent: deleting an absent task reports 0 rows and cancels
    /// nothing.
    pub async fn delete_task(&self, id: Uuid) -> Result<u64, TaskServiceError> {
        let rows = {
            let _guard = self.write_lock.lock().await;
            Task::delete(&self.db.conn, id).await?
        };
        if rows > 0 {
            self.scheduler.cancel(id);
        }
        Ok(rows)
    }

    pub async fn start_tracking_time(&self, id: Uuid) -> Result<bool, TaskServiceError> {
        let _guard = self.write_lock.lock().await;
        Ok(Task::start_tracking_at(&self.db.conn, id, Utc::now()).await?)
    }

    pub async fn stop_tracking_time(&self, id: Uuid) -> Result<Option<Duration>, TaskServiceError> {
        let _guard = self.write_lock.lock().await;
        Ok(Task::stop_tracking_at(&self.db.conn, id, Utc::now()).await?)
    }

    pub async fn reset_tracking_time(&self, id: Uuid) -> Result<(), TaskServiceError> {
        let _guard = self.write_lock.lock().await;
        Ok(Task::reset_tracking(&self.db.conn, id).await?)
    }

    /// Notifies the assignee when a task lands on someone who is neither
    /// the acting user nor the task's creator, and only when the
    /// assignment actually changed.
    async fn notify_assignment_if_needed(
        &self,
        session: &UserSession,
        previous_assignee: Option<Uuid>,
        task: &Task,
    ) {
        let Some(assignee) = task.assignee_user_id else {
            return;
        };
        if previous_assignee == Some(assignee)
            || assignee == session.user_id
            || assignee == task.creator_user_id
        {
            return;
        }

        self.notifier
            .assignment(AssignmentNotification {
                task_id: task.id,
                title: task.title.clone(),
                assignee_user_id: assignee,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use db::models::user::{CreateUser, User};
    use sea_orm::Database;
    use sea_orm_migration::MigratorTrait;

    use crate::services::notifier::ReminderNotification;

    use super::*;

    #[derive(Default)]
    struct CapturingNotifier {
        reminders: Mutex<Vec<ReminderNotification>>,
        assignments: Mutex<Vec<AssignmentNotification>>,
    }

    #[async_trait]
    impl Notify for CapturingNotifier {
        async fn reminder(&self, notification: ReminderNotification) {
            self.reminders.lock().unwrap().push(notification);
        }

        async fn assignment(&self, notification: AssignmentNotification) {
            self.assignments.lock().unwrap().push(notification);
        }
    }

    struct Fixture {
        db: DBService,
        service: TaskService,
        notifier: Arc<CapturingNotifier>,
        session: UserSession,
        creator: User,
    }

    async fn setup() -> Fixture {
        let conn = Database::connect("sqlite::memory:").await.unwrap();
        db_migration::Migrator::up(&conn, None).await.unwrap();
        let db = DBService { conn };

        let creator = User::create(
            &db.conn,
            &CreateUser {
                email: "alice@example.com".to_string(),
                name: "Alice".to_string(),
                photo_url: None,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        let notifier = Arc::new(CapturingNotifier::default());
        let scheduler = ReminderScheduler::new(notifier.clone());
        let service = TaskService::new(db.clone(), scheduler, notifier.clone());
        let session = UserSession::new(creator.id);

        Fixture {
            db,
            service,
            notifier,
            session,
            creator,
        }
    }

    #[tokio::test]
    async fn create_with_future_reminder_schedules_a_job() {
        let fx = setup().await;

        let mut data = CreateTask::from_title("Due later", fx.creator.id);
        data.due_date = Some(Utc::now() + Duration::hours(1));
        data.reminder_offset_ms = Some(30 * 60 * 1000);

        let task = fx.service.create_task(&fx.session, data).await.unwrap();
        assert!(fx.service.scheduler().is_scheduled(task.id));
    }

    #[tokio::test]
    async fn create_with_past_reminder_schedules_nothing() {
        let fx = setup().await;

        let mut data = CreateTask::from_title("Already overdue", fx.creator.id);
        data.due_date = Some(Utc::now() - Duration::hours(1));
        data.reminder_offset_ms = Some(30 * 60 * 1000);

        let task = fx.service.create_task(&fx.session, data).await.unwrap();
        assert!(!fx.service.scheduler().is_scheduled(task.id));
    }

    #[tokio::test]
    async fn delete_cancels_the_pending_reminder() {
        let fx = setup().await;

        let mut data = CreateTask::from_title("Cancel on delete", fx.creator.id);
        data.due_date = Some(Utc::now() + Duration::hours(2));
        data.reminder_offset_ms = Some(0);

        let task = fx.service.create_task(&fx.session, data).await.unwrap();
        assert!(fx.service.scheduler().is_scheduled(task.id));

        let rows = fx.service.delete_task(task.id).await.unwrap();
        assert_eq!(rows, 1);
        assert!(!fx.service.scheduler().is_scheduled(task.id));
    }

    #[tokio::test]
    async fn moving_the_due_date_into_the_past_cancels_the_job() {
        let fx = setup().await;

        let mut data = CreateTask::from_title("Loses its reminder", fx.creator.id);
        data.due_date = Some(Utc::now() + Duration::hours(2));
        data.reminder_offset_ms = Some(0);
        let task = fx.service.create_task(&fx.session, data).await.unwrap();
        assert!(fx.service.scheduler().is_scheduled(task.id));

        // Pushing the due date into the past makes the reminder moot.
        let patch = TaskPatch {
            due_date: Some(Utc::now() - Duration::hours(1)),
            ..Default::default()
        };
        fx.service
            .update_task(&fx.session, task.id, patch)
            .await
            .unwrap();
        assert!(!fx.service.scheduler().is_scheduled(task.id));
    }

    #[tokio::test]
    async fn empty_title_is_rejected() {
        let fx = setup().await;

        let data = CreateTask::from_title("   ", fx.creator.id);
        let err = fx.service.create_task(&fx.session, data).await.unwrap_err();
        assert!(matches!(err, TaskServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn assigning_someone_else_notifies_them_once() {
        let fx = setup().await;
        let bob = User::create(
            &fx.db.conn,
            &CreateUser {
                email: "bob@example.com".to_string(),
                name: "Bob".to_string(),
                photo_url: None,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        let mut data = CreateTask::from_title("For Bob", fx.creator.id);
        data.assignee_user_id = Some(bob.id);
        let task = fx.service.create_task(&fx.session, data).await.unwrap();

        let assignments = fx.notifier.assignments.lock().unwrap().clone();
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].assignee_user_id, bob.id);
        assert_eq!(assignments[0].task_id, task.id);

        // An unrelated update must not re-notify.
        let patch = TaskPatch {
            description: Some("details".to_string()),
            ..Default::default()
        };
        fx.service
            .update_task(&fx.session, task.id, patch)
            .await
            .unwrap();
        assert_eq!(fx.notifier.assignments.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn self_assignment_stays_quiet() {
        let fx = setup().await;

        let mut data = CreateTask::from_title("Mine alone", fx.creator.id);
        data.assignee_user_id = Some(fx.creator.id);
        fx.service.create_task(&fx.session, data).await.unwrap();

        assert!(fx.notifier.assignments.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn timer_round_trip_accumulates_time() {
        let fx = setup().await;

        let task = fx
            .service
            .create_task(
                &fx.session,
                CreateTask::from_title("Timed", fx.creator.id),
            )
            .await
            .unwrap();

        assert!(fx.service.start_tracking_time(task.id).await.unwrap());
        // Second start is a no-op while running.
        assert!(!fx.service.start_tracking_time(task.id).await.unwrap());

        let session_time = fx.service.stop_tracking_time(task.id).await.unwrap();
        assert!(session_time.is_some());

        let reloaded = Task::find_by_id(&fx.db.conn, task.id).await.unwrap().unwrap();
        assert!(reloaded.time_tracking_started_at.is_none());

        fx.service.reset_tracking_time(task.id).await.unwrap();
        let reset = Task::find_by_id(&fx.db.conn, task.id).await.unwrap().unwrap();
        assert_eq!(reset.time_spent_ms, 0);
    }
}
