use db::{DbErr, models::user::User};
use uuid::Uuid;

/// The acting user, resolved once and passed explicitly to whatever needs
/// it. There is no global current-user state outside the `is_current_user`
/// flag in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserSession {
    pub user_id: Uuid,
}

impl UserSession {
    pub fn new(user_id: Uuid) -> Self {
        Self { user_id }
    }

    /// Builds a session from the persisted current-user flag, if any row
    /// carries it.
    pub async fn load<C: db::ConnectionTrait>(db: &C) -> Result<Option<Self>, DbErr> {
        Ok(User::current(db).await?.map(|user| Self::new(user.id)))
    }
}
