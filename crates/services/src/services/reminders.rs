use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Duration, Utc};
use db::models::task::Task;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::services::notifier::{Notify, ReminderNotification};

const DEFAULT_REMINDER_BODY: &str = "Don't forget about your task!";

struct Job {
    generation: u64,
    handle: JoinHandle<()>,
}

/// One-shot reminder jobs, one per task, addressed by task id for
/// cancellation. Jobs live in-process: a restart forgets them and a fire
/// time that passed while the process was down is simply missed.
#[derive(Clone)]
pub struct ReminderScheduler {
    notifier: Arc<dyn Notify>,
    jobs: Arc<Mutex<HashMap<Uuid, Job>>>,
    next_generation: Arc<Mutex<u64>>,
}

impl ReminderScheduler {
    pub fn new(notifier: Arc<dyn Notify>) -> Self {
        Self {
            notifier,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(Mutex::new(0)),
        }
    }

    /// The instant a reminder for `due` with `offset_ms` should fire.
    pub fn fire_time(due: DateTime<Utc>, offset_ms: i64) -> DateTime<Utc> {
        due - Duration::milliseconds(offset_ms)
    }

    /// The fire time for `task` as of `now`, or None when no reminder is
    /// warranted: missing due date, missing offset, or a fire time that is
    /// not in the future.
    pub fn plan(task: &Task, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let due = task.due_date?;
        let offset_ms = task.reminder_offset_ms?;
        let fire_at = Self::fire_time(due, offset_ms);
        (fire_at > now).then_some(fire_at)
    }

    pub fn schedule(&self, task: &Task) {
        self.schedule_at(task, Utc::now());
    }

    /// Replaces any pending job for the task, then schedules a fresh one
    /// iff the reminder is still in the future.
    pub fn schedule_at(&self, task: &Task, now: DateTime<Utc>) {
        self.cancel(task.id);

        let Some(fire_at) = Self::plan(task, now) else {
            if task.due_date.is_some() && task.reminder_offset_ms.is_some() {
                tracing::debug!(task_id = %task.id, "reminder time already passed; not scheduling");
            }
            return;
        };

        let delay = (fire_at - now).to_std().unwrap_or_default();
        let notification = ReminderNotification {
            task_id: task.id,
            title: task.title.clone(),
            body: task
                .description
                .clone()
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_REMINDER_BODY.to_string()),
        };

        let generation = {
            let mut next = self.next_generation.lock().unwrap_or_else(|e| e.into_inner());
            *next += 1;
            *next
        };

        let notifier = self.notifier.clone();
        let jobs = self.jobs.clone();
        let task_id = task.id;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            notifier.reminder(notification).await;
            let mut jobs = jobs.lock().unwrap_or_else(|e| e.into_inner());
            if jobs.get(&task_id).is_some_and(|job| job.generation == generation) {
                jobs.remove(&task_id);
            }
        });

        tracing::debug!(task_id = %task_id, fire_at = %fire_at, "reminder scheduled");
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = jobs.insert(task_id, Job { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// Cancels the pending reminder for the task, if one exists.
    pub fn cancel(&self, task_id: Uuid) -> bool {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        match jobs.remove(&task_id) {
            Some(job) => {
                job.handle.abort();
                tracing::debug!(task_id = %task_id, "reminder cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, task_id: Uuid) -> bool {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&task_id)
    }
}
