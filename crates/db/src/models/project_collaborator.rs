use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use crate::types::CollaboratorRole;

use crate::{entities::project_collaborator, models::ids};

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("Project not found")]
    ProjectNotFound,
    #[error("User not found")]
    UserNotFound,
    #[error("Collaborator not found")]
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectCollaborator {
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub role: CollaboratorRole,
    pub joined_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl ProjectCollaborator {
    async fn from_model<C: ConnectionTrait>(
        db: &C,
        model: project_collaborator::Model,
    ) -> Result<Self, DbErr> {
        let project_uuid = ids::project_uuid_by_id(db, model.project_id)
            .await?
            .ok_or(DbErr::RecordNotFound("Project not found".to_string()))?;
        let user_uuid = ids::user_uuid_by_id(db, model.user_id)
            .await?
            .ok_or(DbErr::RecordNotFound("User not found".to_string()))?;
        Ok(Self {
            project_id: project_uuid,
            user_id: user_uuid,
            role: model.role,
            joined_at: model.joined_at,
            last_accessed_at: model.last_accessed_at,
        })
    }

    async fn row_ids<C: ConnectionTrait>(
        db: &C,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<(i64, i64), CollaboratorError> {
        let project_row_id = ids::project_id_by_uuid(db, project_id)
            .await?
            .ok_or(CollaboratorError::ProjectNotFound)?;
        let user_row_id = ids::user_id_by_uuid(db, user_id)
            .await?
            .ok_or(CollaboratorError::UserNotFound)?;
        Ok((project_row_id, user_row_id))
    }

    /// Members of a project, longest-standing first.
    pub async fn find_by_project<C: ConnectionTrait>(
        db: &C,
        project_id: Uuid,
    ) -> Result<Vec<Self>, DbErr> {
        let Some(project_row_id) = ids::project_id_by_uuid(db, project_id).await? else {
            return Ok(Vec::new());
        };
        let models = project_collaborator::Entity::find()
            .filter(project_collaborator::Column::ProjectId.eq(project_row_id))
            .order_by_asc(project_collaborator::Column::JoinedAt)
            .all(db)
            .await?;
        let mut collaborators = Vec::with_capacity(models.len());
        for model in models {
            collaborators.push(Self::from_model(db, model).await?);
        }
        Ok(collaborators)
    }

    pub async fn find<C: ConnectionTrait>(
        db: &C,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Self>, CollaboratorError> {
        let (project_row_id, user_row_id) = Self::row_ids(db, project_id, user_id).await?;
        let record = project_collaborator::Entity::find_by_id((project_row_id, user_row_id))
            .one(db)
            .await?;
        match record {
            Some(model) => Ok(Some(Self::from_model(db, model).await?)),
            None => Ok(None),
        }
    }

    /// Adds the user to the project, or changes their role if already a
    /// member. Membership survives role changes; joined_at never moves.
    pub async fn upsert<C: ConnectionTrait>(
        db: &C,
        project_id: Uuid,
        user_id: Uuid,
        role: CollaboratorRole,
    ) -> Result<Self, CollaboratorError> {
        let (project_row_id, user_row_id) = Self::row_ids(db, project_id, user_id).await?;

        let existing = project_collaborator::Entity::find_by_id((project_row_id, user_row_id))
            .one(db)
            .await?;

        let model = match existing {
            Some(record) => {
                let mut active: project_collaborator::ActiveModel = record.into();
                active.role = Set(role);
                active.update(db).await?
            }
            None => {
                project_collaborator::ActiveModel {
                    project_id: Set(project_row_id),
                    user_id: Set(user_row_id),
                    role: Set(role),
                    joined_at: Set(Utc::now()),
                    last_accessed_at: Set(None),
                }
                .insert(db)
                .await?
            }
        };

        Ok(Self::from_model(db, model).await?)
    }

    pub async fn remove<C: ConnectionTrait>(
        db: &C,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<u64, CollaboratorError> {
        let (project_row_id, user_row_id) = Self::row_ids(db, project_id, user_id).await?;
        let result = project_collaborator::Entity::delete_many()
            .filter(project_collaborator::Column::ProjectId.eq(project_row_id))
            .filter(project_collaborator::Column::UserId.eq(user_row_id))
            .exec(db)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn touch_last_accessed<C: ConnectionTrait>(
        db: &C,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), CollaboratorError> {
        let (project_row_id, user_row_id) = Self::row_ids(db, project_id, user_id).await?;
        let record = project_collaborator::Entity::find_by_id((project_row_id, user_row_id))
            .one(db)
            .await?
            .ok_or(CollaboratorError::NotFound)?;

        let mut active: project_collaborator::ActiveModel = record.into();
        active.last_accessed_at = Set(Some(Utc::now()));
        active.update(db).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::Database;
    use sea_orm_migration::MigratorTrait;

    use crate::models::{
        project::{CreateProject, Project},
        user::{CreateUser, User},
    };

    use super::*;

    async fn setup_db() -> sea_orm::DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db_migration::Migrator::up(&db, None).await.unwrap();
        db
    }

    async fn seed(db: &sea_orm::DatabaseConnection) -> (User, User, Project) {
        let owner = User::create(
            db,
            &CreateUser {
                email: "owner@example.com".to_string(),
                name: "Owner".to_string(),
                photo_url: None,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        let member = User::create(
            db,
            &CreateUser {
                email: "member@example.com".to_string(),
                name: "Member".to_string(),
                photo_url: None,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        let project = Project::create(
            db,
            &CreateProject {
                name: "Shared".to_string(),
                description: None,
                owner_user_id: owner.id,
                color_hex: None,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        (owner, member, project)
    }

    #[tokio::test]
    async fn upsert_inserts_then_changes_role() {
        let db = setup_db().await;
        let (_, member, project) = seed(&db).await;

        let added = ProjectCollaborator::upsert(
            &db,
            project.id,
            member.id,
            CollaboratorRole::Viewer,
        )
        .await
        .unwrap();
        assert_eq!(added.role, CollaboratorRole::Viewer);

        let promoted = ProjectCollaborator::upsert(
            &db,
            project.id,
            member.id,
            CollaboratorRole::Editor,
        )
        .await
        .unwrap();
        assert_eq!(promoted.role, CollaboratorRole::Editor);
        assert_eq!(promoted.joined_at, added.joined_at);

        assert_eq!(
            ProjectCollaborator::find_by_project(&db, project.id)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn membership_is_removed_with_the_project() {
        let db = setup_db().await;
        let (_, member, project) = seed(&db).await;

        ProjectCollaborator::upsert(&db, project.id, member.id, CollaboratorRole::Editor)
            .await
            .unwrap();
        Project::delete(&db, project.id).await.unwrap();

        assert!(
            ProjectCollaborator::find_by_project(&db, project.id)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
