pub mod events;
pub mod notifier;
pub mod reminders;
pub mod session;
pub mod task_feed;
pub mod tasks;
