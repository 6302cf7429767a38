use async_trait::async_trait;
use uuid::Uuid;

/// Notification categories, kept separate so clients can mute one
/// without the other.
const REMINDER_CATEGORY: &str = "taskdeck.reminder";
const ASSIGNMENT_CATEGORY: &str = "taskdeck.assignment";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderNotification {
    pub task_id: Uuid,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentNotification {
    pub task_id: Uuid,
    pub title: String,
    pub assignee_user_id: Uuid,
}

/// Delivery seam for OS notifications. Failures never propagate; a
/// notification that cannot be shown is logged and dropped.
#[async_trait]
pub trait Notify: Send + Sync {
    async fn reminder(&self, notification: ReminderNotification);
    async fn assignment(&self, notification: AssignmentNotification);
}

/// Desktop delivery via the platform notification daemon.
pub struct DesktopNotifier;

impl DesktopNotifier {
    async fn show(category: &'static str, summary: String, body: String, task_id: Uuid) {
        let result = tokio::task::spawn_blocking(move || {
            notify_rust::Notification::new()
                .appname("taskdeck")
                .summary(&summary)
                .body(&body)
                .show()
        })
        .await;

        match result {
            Ok(Ok(_)) => {
                tracing::debug!(task_id = %task_id, category, "notification shown");
            }
            Ok(Err(err)) => {
                tracing::warn!(task_id = %task_id, category, error = %err, "failed to show notification");
            }
            Err(err) => {
                tracing::warn!(task_id = %task_id, category, error = %err, "notification task panicked");
            }
        }
    }
}

#[async_trait]
impl Notify for DesktopNotifier {
    async fn reminder(&self, notification: ReminderNotification) {
        Self::show(
            REMINDER_CATEGORY,
            notification.title,
            notification.body,
            notification.task_id,
        )
        .await;
    }

    async fn assignment(&self, notification: AssignmentNotification) {
        Self::show(
            ASSIGNMENT_CATEGORY,
            format!("New task assigned: {}", notification.title),
            "Open the task to see the details.".to_string(),
            notification.task_id,
        )
        .await;
    }
}
