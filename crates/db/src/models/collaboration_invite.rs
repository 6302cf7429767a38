use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use crate::types::{CollaboratorRole, InviteStatus};

use crate::{
    entities::collaboration_invite,
    events::{EVENT_INVITE_CREATED, EVENT_INVITE_RESOLVED, InviteEventPayload},
    models::{
        event_outbox::EventOutbox,
        ids,
        project_collaborator::ProjectCollaborator,
        user::User,
    },
};

#[derive(Debug, Error)]
pub enum InviteError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("Invite not found")]
    NotFound,
    #[error("Project not found")]
    ProjectNotFound,
    #[error("Inviter not found")]
    InviterNotFound,
    #[error("Invite was already resolved")]
    AlreadyResolved,
    #[error("No user is registered for the invited email")]
    UnknownInvitee,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationInvite {
    pub id: Uuid,
    pub project_id: Uuid,
    pub inviter_user_id: Uuid,
    pub invited_email: String,
    pub role: CollaboratorRole,
    pub status: InviteStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInvite {
    pub project_id: Uuid,
    pub inviter_user_id: Uuid,
    pub invited_email: String,
    pub role: CollaboratorRole,
}

impl CollaborationInvite {
    async fn from_model<C: ConnectionTrait>(
        db: &C,
        model: collaboration_invite::Model,
    ) -> Result<Self, DbErr> {
        let project_uuid = ids::project_uuid_by_id(db, model.project_id)
            .await?
            .ok_or(DbErr::RecordNotFound("Project not found".to_string()))?;
        let inviter_uuid = ids::user_uuid_by_id(db, model.inviter_user_id)
            .await?
            .ok_or(DbErr::RecordNotFound("Inviter not found".to_string()))?;
        Ok(Self {
            id: model.uuid,
            project_id: project_uuid,
            inviter_user_id: inviter_uuid,
            invited_email: model.invited_email,
            role: model.role,
            status: model.status,
            created_at: model.created_at,
            resolved_at: model.resolved_at,
        })
    }

    pub async fn find_by_id<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<Self>, DbErr> {
        let record = collaboration_invite::Entity::find()
            .filter(collaboration_invite::Column::Uuid.eq(id))
            .one(db)
            .await?;
        match record {
            Some(model) => Ok(Some(Self::from_model(db, model).await?)),
            None => Ok(None),
        }
    }

    pub async fn find_pending_by_email<C: ConnectionTrait>(
        db: &C,
        email: &str,
    ) -> Result<Vec<Self>, DbErr> {
        let models = collaboration_invite::Entity::find()
            .filter(collaboration_invite::Column::InvitedEmail.eq(email))
            .filter(collaboration_invite::Column::Status.eq(InviteStatus::Pending))
            .order_by_asc(collaboration_invite::Column::CreatedAt)
            .all(db)
            .await?;
        let mut invites = Vec::with_capacity(models.len());
        for model in models {
            invites.push(Self::from_model(db, model).await?);
        }
        Ok(invites)
    }

    pub async fn create<C: ConnectionTrait>(
        db: &C,
        data: &CreateInvite,
        invite_id: Uuid,
    ) -> Result<Self, InviteError> {
        let project_row_id = ids::project_id_by_uuid(db, data.project_id)
            .await?
            .ok_or(InviteError::ProjectNotFound)?;
        let inviter_row_id = ids::user_id_by_uuid(db, data.inviter_user_id)
            .await?
            .ok_or(InviteError::InviterNotFound)?;

        let active = collaboration_invite::ActiveModel {
            uuid: Set(invite_id),
            project_id: Set(project_row_id),
            inviter_user_id: Set(inviter_row_id),
            invited_email: Set(data.invited_email.clone()),
            role: Set(data.role.clone()),
            status: Set(InviteStatus::Pending),
            created_at: Set(Utc::now()),
            resolved_at: Set(None),
            ..Default::default()
        };

        let model = active.insert(db).await?;
        let payload = serde_json::to_value(InviteEventPayload {
            invite_id,
            project_id: data.project_id,
        })
        .map_err(|err| DbErr::Custom(err.to_string()))?;
        EventOutbox::enqueue(db, EVENT_INVITE_CREATED, "invite", invite_id, payload).await?;
        Ok(Self::from_model(db, model).await?)
    }

    /// Resolves a pending invite. Accepting also makes the invited user a
    /// collaborator with the invite's role; the invited email must belong
    /// to a registered user for that to happen.
    pub async fn respond<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        accept: bool,
        at: DateTime<Utc>,
    ) -> Result<Self, InviteError> {
        let record = collaboration_invite::Entity::find()
            .filter(collaboration_invite::Column::Uuid.eq(id))
            .one(db)
            .await?
            .ok_or(InviteError::NotFound)?;

        if record.status != InviteStatus::Pending {
            return Err(InviteError::AlreadyResolved);
        }

        let project_uuid = ids::project_uuid_by_id(db, record.project_id)
            .await?
            .ok_or(InviteError::ProjectNotFound)?;

        if accept {
            let invitee = User::find_by_email(db, &record.invited_email)
                .await?
                .ok_or(InviteError::UnknownInvitee)?;
            ProjectCollaborator::upsert(db, project_uuid, invitee.id, record.role.clone())
                .await
                .map_err(|err| match err {
                    crate::models::project_collaborator::CollaboratorError::Database(e) => {
                        InviteError::Database(e)
                    }
                    _ => InviteError::UnknownInvitee,
                })?;
        }

        let mut active: collaboration_invite::ActiveModel = record.into();
        active.status = Set(if accept {
            InviteStatus::Accepted
        } else {
            InviteStatus::Rejected
        });
        active.resolved_at = Set(Some(at));
        let updated = active.update(db).await?;

        let payload = serde_json::to_value(InviteEventPayload {
            invite_id: id,
            project_id: project_uuid,
        })
        .map_err(|err| DbErr::Custom(err.to_string()))?;
        EventOutbox::enqueue(db, EVENT_INVITE_RESOLVED, "invite", id, payload).await?;
        Ok(Self::from_model(db, updated).await?)
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
        let inviter = User::create(
            db,
            &CreateUser {
                email: "inviter@example.com".to_string(),
                name: "Inviter".to_string(),
                photo_url: None,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        let invitee = User::create(
            db,
            &CreateUser {
                email: "invitee@example.com".to_string(),
                name: "Invitee".to_string(),
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
                owner_user_id: inviter.id,
                color_hex: None,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        (inviter, invitee, project)
    }

    async fn pending_invite(
        db: &sea_orm::DatabaseConnection,
        inviter: &User,
        project: &Project,
        email: &str,
    ) -> CollaborationInvite {
        CollaborationInvite::create(
            db,
            &CreateInvite {
                project_id: project.id,
                inviter_user_id: inviter.id,
                invited_email: email.to_string(),
                role: CollaboratorRole::Editor,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn accepting_adds_the_collaborator() {
        let db = setup_db().await;
        let (inviter, invitee, project) = seed(&db).await;
        let invite = pending_invite(&db, &inviter, &project, &invitee.email).await;

        let resolved = CollaborationInvite::respond(&db, invite.id, true, Utc::now())
            .await
            .unwrap();
        assert_eq!(resolved.status, InviteStatus::Accepted);
        assert!(resolved.resolved_at.is_some());

        let member = ProjectCollaborator::find(&db, project.id, invitee.id)
            .await
            .unwrap()
            .expect("collaborator row");
        assert_eq!(member.role, CollaboratorRole::Editor);
    }

    #[tokio::test]
    async fn rejecting_leaves_no_collaborator() {
        let db = setup_db().await;
        let (inviter, invitee, project) = seed(&db).await;
        let invite = pending_invite(&db, &inviter, &project, &invitee.email).await;

        let resolved = CollaborationInvite::respond(&db, invite.id, false, Utc::now())
            .await
            .unwrap();
        assert_eq!(resolved.status, InviteStatus::Rejected);
        assert!(
            ProjectCollaborator::find(&db, project.id, invitee.id)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn double_respond_is_a_conflict() {
        let db = setup_db().await;
        let (inviter, invitee, project) = seed(&db).await;
        let invite = pending_invite(&db, &inviter, &project, &invitee.email).await;

        CollaborationInvite::respond(&db, invite.id, true, Utc::now())
            .await
            .unwrap();
        let err = CollaborationInvite::respond(&db, invite.id, false, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, InviteError::AlreadyResolved));
    }

    #[tokio::test]
    async fn pending_listing_excludes_resolved() {
        let db = setup_db().await;
        let (inviter, invitee, project) = seed(&db).await;
        let first = pending_invite(&db, &inviter, &project, &invitee.email).await;
        pending_invite(&db, &inviter, &project, &invitee.email).await;

        CollaborationInvite::respond(&db, first.id, false, Utc::now())
            .await
            .unwrap();

        let pending = CollaborationInvite::find_pending_by_email(&db, &invitee.email)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
    }
}
