use db::{
    DBService, DbErr,
    models::task::{SortMode, Task},
};
use tokio::sync::{broadcast, watch};

use crate::services::{events::EventService, session::UserSession};

const SNAPSHOT_CAPACITY: usize = 64;

/// One emission of the feed: the full task list in the active ordering.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskSnapshot {
    pub sort_mode: SortMode,
    pub tasks: Vec<Task>,
}

/// Switchable ordered view over the task table. A single worker re-runs
/// the active ordering's query whenever the store reports a relevant
/// change or the selector moves, and broadcasts the fresh snapshot.
/// Switching never replays a cached list for the new mode; the snapshot
/// subscribers see next is always freshly produced by the new ordering.
#[derive(Clone)]
pub struct TaskFeed {
    sort_tx: watch::Sender<SortMode>,
    snapshot_tx: broadcast::Sender<TaskSnapshot>,
}

impl TaskFeed {
    pub fn new(db: DBService, events: &EventService, session: Option<UserSession>) -> Self {
        let (sort_tx, sort_rx) = watch::channel(SortMode::default());
        let (snapshot_tx, _) = broadcast::channel(SNAPSHOT_CAPACITY);

        let worker_snapshot_tx = snapshot_tx.clone();
        let events_rx = events.subscribe();
        tokio::spawn(async move {
            run_feed(db, session, events_rx, sort_rx, worker_snapshot_tx).await;
        });

        Self {
            sort_tx,
            snapshot_tx,
        }
    }

    /// Moves the selector; a no-op (no detach, no re-emit) when the mode
    /// is unchanged. Returns whether anything moved.
    pub fn set_sort_mode(&self, mode: SortMode) -> bool {
        self.sort_tx.send_if_modified(|current| {
            if *current == mode {
                false
            } else {
                *current = mode;
                true
            }
        })
    }

    pub fn sort_mode(&self) -> SortMode {
        *self.sort_tx.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskSnapshot> {
        self.snapshot_tx.subscribe()
    }
}

async fn run_feed(
    db: DBService,
    session: Option<UserSession>,
    mut events_rx: broadcast::Receiver<crate::services::events::DbEvent>,
    mut sort_rx: watch::Receiver<SortMode>,
    snapshot_tx: broadcast::Sender<TaskSnapshot>,
) {
    // Attaching the initial ordering produces its first value.
    emit(&db, &session, &sort_rx, &snapshot_tx).await;

    loop {
        tokio::select! {
            changed = sort_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                emit(&db, &session, &sort_rx, &snapshot_tx).await;
            }
            event = events_rx.recv() => {
                match event {
                    Ok(event) if event.affects_tasks() => {
                        emit(&db, &session, &sort_rx, &snapshot_tx).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "task feed lagged behind events; re-querying");
                        emit(&db, &session, &sort_rx, &snapshot_tx).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

async fn emit(
    db: &DBService,
    session: &Option<UserSession>,
    sort_rx: &watch::Receiver<SortMode>,
    snapshot_tx: &broadcast::Sender<TaskSnapshot>,
) {
    let sort_mode = *sort_rx.borrow();
    match query(db, session, sort_mode).await {
        Ok(tasks) => {
            let _ = snapshot_tx.send(TaskSnapshot { sort_mode, tasks });
        }
        Err(err) => {
            tracing::error!(error = %err, ?sort_mode, "task feed query failed");
        }
    }
}

async fn query(
    db: &DBService,
    session: &Option<UserSession>,
    sort_mode: SortMode,
) -> Result<Vec<Task>, DbErr> {
    match sort_mode {
        SortMode::DueDate => Task::find_all_sorted_by_due_date(&db.conn).await,
        SortMode::Priority => Task::find_all_sorted_by_priority(&db.conn).await,
        SortMode::AssignedToMe => match session {
            Some(session) => Task::find_active_by_assignee(&db.conn, session.user_id).await,
            None => Ok(Vec::new()),
        },
    }
}
