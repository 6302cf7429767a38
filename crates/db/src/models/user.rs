use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    entities::{project, task, user},
    events::{
        EVENT_PROJECT_DELETED, EVENT_TASK_UPDATED, EVENT_USER_CREATED, EVENT_USER_DELETED,
        EVENT_USER_UPDATED, ProjectEventPayload, TaskEventPayload, UserEventPayload,
    },
    models::{event_outbox::EventOutbox, ids},
};

#[derive(Debug, Error)]
pub enum UserError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("User not found")]
    NotFound,
    #[error("A user with this email already exists")]
    DuplicateEmail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub photo_url: Option<String>,
    pub is_current_user: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUser {
    pub email: String,
    pub name: String,
    pub photo_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUser {
    pub email: Option<String>,
    pub name: Option<String>,
    pub photo_url: Option<String>,
}

impl User {
    fn from_model(model: user::Model) -> Self {
        Self {
            id: model.uuid,
            email: model.email,
            name: model.name,
            photo_url: model.photo_url,
            is_current_user: model.is_current_user,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }

    pub async fn find_all<C: ConnectionTrait>(db: &C) -> Result<Vec<Self>, DbErr> {
        let records = user::Entity::find()
            .order_by_asc(user::Column::Name)
            .all(db)
            .await?;
        Ok(records.into_iter().map(Self::from_model).collect())
    }

    pub async fn find_by_id<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<Self>, DbErr> {
        let record = user::Entity::find()
            .filter(user::Column::Uuid.eq(id))
            .one(db)
            .await?;
        Ok(record.map(Self::from_model))
    }

    pub async fn find_by_email<C: ConnectionTrait>(
        db: &C,
        email: &str,
    ) -> Result<Option<Self>, DbErr> {
        let record = user::Entity::find()
            .filter(user::Column::Email.eq(email))
            .one(db)
            .await?;
        Ok(record.map(Self::from_model))
    }

    /// The process-local acting user, if one has been marked.
    pub async fn current<C: ConnectionTrait>(db: &C) -> Result<Option<Self>, DbErr> {
        let record = user::Entity::find()
            .filter(user::Column::IsCurrentUser.eq(true))
            .one(db)
            .await?;
        Ok(record.map(Self::from_model))
    }

    /// Marks `id` as the current user, clearing the flag everywhere else.
    pub async fn set_current<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Self, UserError> {
        let record = user::Entity::find()
            .filter(user::Column::Uuid.eq(id))
            .one(db)
            .await?
            .ok_or(UserError::NotFound)?;

        user::Entity::update_many()
            .col_expr(user::Column::IsCurrentUser, Expr::value(false))
            .filter(user::Column::IsCurrentUser.eq(true))
            .filter(user::Column::Id.ne(record.id))
            .exec(db)
            .await?;

        let mut active: user::ActiveModel = record.into();
        active.is_current_user = Set(true);
        active.updated_at = Set(Utc::now());
        let updated = active.update(db).await?;

        let payload = serde_json::to_value(UserEventPayload { user_id: id })
            .map_err(|err| DbErr::Custom(err.to_string()))?;
        EventOutbox::enqueue(db, EVENT_USER_UPDATED, "user", id, payload).await?;
        Ok(Self::from_model(updated))
    }

    pub async fn create<C: ConnectionTrait>(
        db: &C,
        data: &CreateUser,
        user_id: Uuid,
    ) -> Result<Self, UserError> {
        if Self::find_by_email(db, &data.email).await?.is_some() {
            return Err(UserError::DuplicateEmail);
        }

        let now = Utc::now();
        let active = user::ActiveModel {
            uuid: Set(user_id),
            email: Set(data.email.clone()),
            name: Set(data.name.clone()),
            photo_url: Set(data.photo_url.clone()),
            is_current_user: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let model = active.insert(db).await?;
        let payload = serde_json::to_value(UserEventPayload { user_id })
            .map_err(|err| DbErr::Custom(err.to_string()))?;
        EventOutbox::enqueue(db, EVENT_USER_CREATED, "user", user_id, payload).await?;
        Ok(Self::from_model(model))
    }

    pub async fn update<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        payload: &UpdateUser,
    ) -> Result<Self, UserError> {
        let record = user::Entity::find()
            .filter(user::Column::Uuid.eq(id))
            .one(db)
            .await?
            .ok_or(UserError::NotFound)?;

        let mut active: user::ActiveModel = record.into();
        if let Some(email) = payload.email.clone() {
            active.email = Set(email);
        }
        if let Some(name) = payload.name.clone() {
            active.name = Set(name);
        }
        if payload.photo_url.is_some() {
            active.photo_url = Set(payload.photo_url.clone());
        }
        active.updated_at = Set(Utc::now());

        let updated = active.update(db).await?;
        let event = serde_json::to_value(UserEventPayload { user_id: id })
            .map_err(|err| DbErr::Custom(err.to_string()))?;
        EventOutbox::enqueue(db, EVENT_USER_UPDATED, "user", id, event).await?;
        Ok(Self::from_model(updated))
    }

    /// Deletes the user. Owned projects cascade away; assigned tasks keep
    /// existing with a cleared assignee. Events are enqueued for both.
    pub async fn delete<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<u64, DbErr> {
        let record = user::Entity::find()
            .filter(user::Column::Uuid.eq(id))
            .one(db)
            .await?;

        let Some(record) = record else {
            return Ok(0);
        };

        let owned_projects = project::Entity::find()
            .filter(project::Column::OwnerUserId.eq(record.id))
            .all(db)
            .await?;
        let assigned_tasks = task::Entity::find()
            .filter(task::Column::AssigneeUserId.eq(record.id))
            .all(db)
            .await?;

        let result = user::Entity::delete_many()
            .filter(user::Column::Id.eq(record.id))
            .exec(db)
            .await?;

        if result.rows_affected > 0 {
            for project_model in owned_projects {
                let payload = serde_json::to_value(ProjectEventPayload {
                    project_id: project_model.uuid,
                })
                .map_err(|err| DbErr::Custom(err.to_string()))?;
                EventOutbox::enqueue(
                    db,
                    EVENT_PROJECT_DELETED,
                    "project",
                    project_model.uuid,
                    payload,
                )
                .await?;
            }

            for task_model in assigned_tasks {
                let project_id = match task_model.project_id {
                    Some(row_id) => ids::project_uuid_by_id(db, row_id).await?,
                    None => None,
                };
                let payload = serde_json::to_value(TaskEventPayload {
                    task_id: task_model.uuid,
                    project_id,
                })
                .map_err(|err| DbErr::Custom(err.to_string()))?;
                EventOutbox::enqueue(db, EVENT_TASK_UPDATED, "task", task_model.uuid, payload)
                    .await?;
            }

            let payload = serde_json::to_value(UserEventPayload { user_id: id })
                .map_err(|err| DbErr::Custom(err.to_string()))?;
            EventOutbox::enqueue(db, EVENT_USER_DELETED, "user", id, payload).await?;
        }

        Ok(result.rows_affected)
    }
}
