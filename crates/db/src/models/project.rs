use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    entities::{project, task},
    events::{
        EVENT_PROJECT_CREATED, EVENT_PROJECT_DELETED, EVENT_PROJECT_UPDATED, EVENT_TASK_UPDATED,
        ProjectEventPayload, TaskEventPayload,
    },
    models::{event_outbox::EventOutbox, ids},
};

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("Project not found")]
    NotFound,
    #[error("Project owner not found")]
    OwnerNotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub owner_user_id: Uuid,
    pub color_hex: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProject {
    pub name: String,
    pub description: Option<String>,
    pub owner_user_id: Uuid,
    pub color_hex: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProject {
    pub name: Option<String>,
    pub description: Option<String>,
    pub color_hex: Option<String>,
}

impl Project {
    async fn from_model<C: ConnectionTrait>(db: &C, model: project::Model) -> Result<Self, DbErr> {
        let owner_uuid = ids::user_uuid_by_id(db, model.owner_user_id)
            .await?
            .ok_or(DbErr::RecordNotFound("Owner not found".to_string()))?;
        Ok(Self {
            id: model.uuid,
            name: model.name,
            description: model.description,
            owner_user_id: owner_uuid,
            color_hex: model.color_hex,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }

    pub async fn find_all<C: ConnectionTrait>(db: &C) -> Result<Vec<Self>, DbErr> {
        let records = project::Entity::find()
            .order_by_desc(project::Column::CreatedAt)
            .all(db)
            .await?;
        let mut projects = Vec::with_capacity(records.len());
        for record in records {
            projects.push(Self::from_model(db, record).await?);
        }
        Ok(projects)
    }

    pub async fn find_by_id<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<Self>, DbErr> {
        let record = project::Entity::find()
            .filter(project::Column::Uuid.eq(id))
            .one(db)
            .await?;
        match record {
            Some(model) => Ok(Some(Self::from_model(db, model).await?)),
            None => Ok(None),
        }
    }

    pub async fn find_by_owner<C: ConnectionTrait>(
        db: &C,
        owner_user_id: Uuid,
    ) -> Result<Vec<Self>, DbErr> {
        let Some(owner_row_id) = ids::user_id_by_uuid(db, owner_user_id).await? else {
            return Ok(Vec::new());
        };
        let records = project::Entity::find()
            .filter(project::Column::OwnerUserId.eq(owner_row_id))
            .order_by_desc(project::Column::CreatedAt)
            .all(db)
            .await?;
        let mut projects = Vec::with_capacity(records.len());
        for record in records {
            projects.push(Self::from_model(db, record).await?);
        }
        Ok(projects)
    }

    pub async fn create<C: ConnectionTrait>(
        db: &C,
        data: &CreateProject,
        project_id: Uuid,
    ) -> Result<Self, ProjectError> {
        let owner_row_id = ids::user_id_by_uuid(db, data.owner_user_id)
            .await?
            .ok_or(ProjectError::OwnerNotFound)?;

        let now = Utc::now();
        let active = project::ActiveModel {
            uuid: Set(project_id),
            name: Set(data.name.clone()),
            description: Set(data.description.clone()),
            owner_user_id: Set(owner_row_id),
            color_hex: Set(data.color_hex.clone()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let model = active.insert(db).await?;
        let payload = serde_json::to_value(ProjectEventPayload { project_id })
            .map_err(|err| DbErr::Custom(err.to_string()))?;
        EventOutbox::enqueue(db, EVENT_PROJECT_CREATED, "project", project_id, payload).await?;
        Ok(Self::from_model(db, model).await?)
    }

    pub async fn update<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        payload: &UpdateProject,
    ) -> Result<Self, ProjectError> {
        let record = project::Entity::find()
            .filter(project::Column::Uuid.eq(id))
            .one(db)
            .await?
            .ok_or(ProjectError::NotFound)?;

        let mut active: project::ActiveModel = record.into();
        if let Some(name) = payload.name.clone() {
            active.name = Set(name);
        }
        if payload.description.is_some() {
            active.description = Set(payload.description.clone());
        }
        if payload.color_hex.is_some() {
            active.color_hex = Set(payload.color_hex.clone());
        }
        active.updated_at = Set(Utc::now());

        let updated = active.update(db).await?;
        let event = serde_json::to_value(ProjectEventPayload { project_id: id })
            .map_err(|err| DbErr::Custom(err.to_string()))?;
        EventOutbox::enqueue(db, EVENT_PROJECT_UPDATED, "project", id, event).await?;
        Ok(Self::from_model(db, updated).await?)
    }

    /// Deletes the project. Its tasks survive with `project_id` cleared
    /// (SET NULL relation), so a `task.updated` event is enqueued for each.
    pub async fn delete<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<u64, DbErr> {
        let record = project::Entity::find()
            .filter(project::Column::Uuid.eq(id))
            .one(db)
            .await?;

        let Some(record) = record else {
            return Ok(0);
        };

        let tasks = task::Entity::find()
            .filter(task::Column::ProjectId.eq(record.id))
            .all(db)
            .await?;

        let result = project::Entity::delete_many()
            .filter(project::Column::Id.eq(record.id))
            .exec(db)
            .await?;

        if result.rows_affected > 0 {
            for task_model in tasks {
                let payload = serde_json::to_value(TaskEventPayload {
                    task_id: task_model.uuid,
                    project_id: None,
                })
                .map_err(|err| DbErr::Custom(err.to_string()))?;
                EventOutbox::enqueue(db, EVENT_TASK_UPDATED, "task", task_model.uuid, payload)
                    .await?;
            }

            let payload = serde_json::to_value(ProjectEventPayload { project_id: id })
                .map_err(|err| DbErr::Custom(err.to_string()))?;
            EventOutbox::enqueue(db, EVENT_PROJECT_DELETED, "project", id, payload).await?;
        }

        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::Database;
    use sea_orm_migration::MigratorTrait;

    use crate::models::user::{CreateUser, User};

    use super::*;

    async fn setup_db() -> sea_orm::DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db_migration::Migrator::up(&db, None).await.unwrap();
        db
    }

    async fn seed_owner(db: &sea_orm::DatabaseConnection) -> User {
        User::create(
            db,
            &CreateUser {
                email: "owner@example.com".to_string(),
                name: "Owner".to_string(),
                photo_url: None,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn create_and_find_by_owner() {
        let db = setup_db().await;
        let owner = seed_owner(&db).await;

        let project = Project::create(
            &db,
            &CreateProject {
                name: "Home".to_string(),
                description: Some("Chores".to_string()),
                owner_user_id: owner.id,
                color_hex: Some("#4CAF50".to_string()),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        let found = Project::find_by_owner(&db, owner.id).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, project.id);
        assert_eq!(found[0].owner_user_id, owner.id);
    }

    #[tokio::test]
    async fn deleting_owner_cascades_projects() {
        let db = setup_db().await;
        let owner = seed_owner(&db).await;

        let project = Project::create(
            &db,
            &CreateProject {
                name: "Work".to_string(),
                description: None,
                owner_user_id: owner.id,
                color_hex: None,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        User::delete(&db, owner.id).await.unwrap();
        assert!(Project::find_by_id(&db, project.id).await.unwrap().is_none());
    }
}
