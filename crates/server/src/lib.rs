use std::sync::Arc;

use axum::{Router, routing::get};
use db::DBService;
use services::services::{
    events::EventService,
    notifier::{DesktopNotifier, Notify},
    reminders::ReminderScheduler,
    session::UserSession,
    task_feed::TaskFeed,
    tasks::TaskService,
};

pub mod error;
pub mod middleware;
pub mod routes;

use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    db: DBService,
    tasks: TaskService,
    feed: TaskFeed,
}

impl AppState {
    pub async fn new() -> anyhow::Result<Self> {
        let db = DBService::new().await?;
        Ok(Self::assemble(db, Arc::new(DesktopNotifier)).await)
    }

    /// Wires the service graph over an already-open database.
    pub async fn assemble(db: DBService, notifier: Arc<dyn Notify>) -> Self {
        let scheduler = ReminderScheduler::new(notifier.clone());
        let events = EventService::new(db.clone());
        let session = UserSession::load(&db.conn).await.ok().flatten();
        let feed = TaskFeed::new(db.clone(), &events, session);
        let tasks = TaskService::new(db.clone(), scheduler, notifier);
        Self { db, tasks, feed }
    }

    pub fn db(&self) -> &DBService {
        &self.db
    }

    pub fn tasks(&self) -> &TaskService {
        &self.tasks
    }

    pub fn feed(&self) -> &TaskFeed {
        &self.feed
    }

    /// Resolves the acting user for this request from the persisted
    /// current-user flag.
    pub async fn session(&self) -> Result<UserSession, ApiError> {
        UserSession::load(&self.db.conn)
            .await?
            .ok_or_else(|| ApiError::BadRequest("No current user is set".to_string()))
    }
}

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .merge(routes::tasks::router(&state))
        .merge(routes::projects::router(&state))
        .merge(routes::users::router())
        .merge(routes::comments::router())
        .merge(routes::invites::router());

    Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/api", api_routes)
        .with_state(state)
}
