use std::time::Duration;

use db::{
    DBService,
    entities::event_outbox,
    events::{
        CommentEventPayload, EVENT_COMMENT_CREATED, EVENT_COMMENT_DELETED, EVENT_COMMENT_UPDATED,
        EVENT_INVITE_CREATED, EVENT_INVITE_RESOLVED, EVENT_PROJECT_CREATED, EVENT_PROJECT_DELETED,
        EVENT_PROJECT_UPDATED, EVENT_TASK_CREATED, EVENT_TASK_DELETED, EVENT_TASK_UPDATED,
        EVENT_USER_CREATED, EVENT_USER_DELETED, EVENT_USER_UPDATED, InviteEventPayload,
        ProjectEventPayload, TaskEventPayload, UserEventPayload,
    },
    models::event_outbox::EventOutbox,
};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

const OUTBOX_POLL_INTERVAL: Duration = Duration::from_millis(250);
const OUTBOX_BATCH_LIMIT: u64 = 100;
const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum EventError {
    #[error(transparent)]
    Database(#[from] db::DbErr),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// A published change, fanned out in-process to whoever subscribed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbEvent {
    TaskCreated { task_id: Uuid, project_id: Option<Uuid> },
    TaskUpdated { task_id: Uuid, project_id: Option<Uuid> },
    TaskDeleted { task_id: Uuid, project_id: Option<Uuid> },
    ProjectCreated { project_id: Uuid },
    ProjectUpdated { project_id: Uuid },
    ProjectDeleted { project_id: Uuid },
    UserCreated { user_id: Uuid },
    UserUpdated { user_id: Uuid },
    UserDeleted { user_id: Uuid },
    CommentCreated { comment_id: Uuid, task_id: Uuid },
    CommentUpdated { comment_id: Uuid, task_id: Uuid },
    CommentDeleted { comment_id: Uuid, task_id: Uuid },
    InviteCreated { invite_id: Uuid, project_id: Uuid },
    InviteResolved { invite_id: Uuid, project_id: Uuid },
}

impl DbEvent {
    /// Whether the task list could look different after this event.
    /// User deletion clears assignees; project deletion clears links.
    pub fn affects_tasks(&self) -> bool {
        matches!(
            self,
            DbEvent::TaskCreated { .. }
                | DbEvent::TaskUpdated { .. }
                | DbEvent::TaskDeleted { .. }
                | DbEvent::ProjectDeleted { .. }
                | DbEvent::UserDeleted { .. }
        )
    }

    /// None for event types this build does not know; those are skipped,
    /// not treated as failures.
    fn parse(entry: &event_outbox::Model) -> Result<Option<Self>, EventError> {
        let event = match entry.event_type.as_str() {
            EVENT_TASK_CREATED | EVENT_TASK_UPDATED | EVENT_TASK_DELETED => {
                let payload: TaskEventPayload = serde_json::from_value(entry.payload.clone())?;
                match entry.event_type.as_str() {
                    EVENT_TASK_CREATED => DbEvent::TaskCreated {
                        task_id: payload.task_id,
                        project_id: payload.project_id,
                    },
                    EVENT_TASK_UPDATED => DbEvent::TaskUpdated {
                        task_id: payload.task_id,
                        project_id: payload.project_id,
                    },
                    _ => DbEvent::TaskDeleted {
                        task_id: payload.task_id,
                        project_id: payload.project_id,
                    },
                }
            }
            EVENT_PROJECT_CREATED | EVENT_PROJECT_UPDATED | EVENT_PROJECT_DELETED => {
                let payload: ProjectEventPayload = serde_json::from_value(entry.payload.clone())?;
                match entry.event_type.as_str() {
                    EVENT_PROJECT_CREATED => DbEvent::ProjectCreated {
                        project_id: payload.project_id,
                    },
                    EVENT_PROJECT_UPDATED => DbEvent::ProjectUpdated {
                        project_id: payload.project_id,
                    },
                    _ => DbEvent::ProjectDeleted {
                        project_id: payload.project_id,
                    },
                }
            }
            EVENT_USER_CREATED | EVENT_USER_UPDATED | EVENT_USER_DELETED => {
                let payload: UserEventPayload = serde_json::from_value(entry.payload.clone())?;
                match entry.event_type.as_str() {
                    EVENT_USER_CREATED => DbEvent::UserCreated {
                        user_id: payload.user_id,
                    },
                    EVENT_USER_UPDATED => DbEvent::UserUpdated {
                        user_id: payload.user_id,
                    },
                    _ => DbEvent::UserDeleted {
                        user_id: payload.user_id,
                    },
                }
            }
            EVENT_COMMENT_CREATED | EVENT_COMMENT_UPDATED | EVENT_COMMENT_DELETED => {
                let payload: CommentEventPayload = serde_json::from_value(entry.payload.clone())?;
                match entry.event_type.as_str() {
                    EVENT_COMMENT_CREATED => DbEvent::CommentCreated {
                        comment_id: payload.comment_id,
                        task_id: payload.task_id,
                    },
                    EVENT_COMMENT_UPDATED => DbEvent::CommentUpdated {
                        comment_id: payload.comment_id,
                        task_id: payload.task_id,
                    },
                    _ => DbEvent::CommentDeleted {
                        comment_id: payload.comment_id,
                        task_id: payload.task_id,
                    },
                }
            }
            EVENT_INVITE_CREATED => {
                let payload: InviteEventPayload = serde_json::from_value(entry.payload.clone())?;
                DbEvent::InviteCreated {
                    invite_id: payload.invite_id,
                    project_id: payload.project_id,
                }
            }
            EVENT_INVITE_RESOLVED => {
                let payload: InviteEventPayload = serde_json::from_value(entry.payload.clone())?;
                DbEvent::InviteResolved {
                    invite_id: payload.invite_id,
                    project_id: payload.project_id,
                }
            }
            other => {
                tracing::debug!(event_type = other, "unknown event type");
                return Ok(None);
            }
        };
        Ok(Some(event))
    }
}

/// Polls the outbox and publishes committed changes to in-process
/// subscribers. The broadcast channel drops history for lagged receivers;
/// consumers treat a lag as "something changed" and re-query.
#[derive(Clone)]
pub struct EventService {
    db: DBService,
    sender: broadcast::Sender<DbEvent>,
}

impl EventService {
    pub fn new(db: DBService) -> Self {
        Self::with_poll_interval(db, OUTBOX_POLL_INTERVAL)
    }

    pub fn with_poll_interval(db: DBService, poll_interval: Duration) -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        let service = Self { db, sender };
        service.spawn_outbox_worker(poll_interval);
        service
    }

    fn spawn_outbox_worker(&self, poll_interval: Duration) {
        let service = self.clone();
        tokio::spawn(async move {
            loop {
                if let Err(err) = service.flush_pending().await {
                    tracing::error!(error = %err, "event outbox flush failed");
                }
                tokio::time::sleep(poll_interval).await;
            }
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DbEvent> {
        self.sender.subscribe()
    }

    async fn flush_pending(&self) -> Result<(), EventError> {
        let entries = EventOutbox::fetch_unpublished(&self.db.conn, OUTBOX_BATCH_LIMIT).await?;
        if entries.is_empty() {
            return Ok(());
        }

        for entry in entries {
            match DbEvent::parse(&entry) {
                Ok(Some(event)) => {
                    // A send error only means nobody is listening right now.
                    let _ = self.sender.send(event);
                    EventOutbox::mark_published(&self.db.conn, entry.id).await?;
                }
                Ok(None) => {
                    EventOutbox::mark_published(&self.db.conn, entry.id).await?;
                }
                Err(err) => {
                    let err_msg = err.to_string();
                    tracing::warn!(
                        event_id = entry.uuid.to_string(),
                        error = %err_msg,
                        "event dispatch failed"
                    );
                    EventOutbox::mark_failed(&self.db.conn, entry.id, &err_msg).await?;
                }
            }
        }

        Ok(())
    }
}
