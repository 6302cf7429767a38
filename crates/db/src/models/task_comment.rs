use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    entities::task_comment,
    events::{
        CommentEventPayload, EVENT_COMMENT_CREATED, EVENT_COMMENT_DELETED, EVENT_COMMENT_UPDATED,
    },
    models::{event_outbox::EventOutbox, ids},
};

#[derive(Debug, Error)]
pub enum CommentError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("Comment not found")]
    NotFound,
    #[error("Task not found")]
    TaskNotFound,
    #[error("Author not found")]
    AuthorNotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskComment {
    pub id: Uuid,
    pub task_id: Uuid,
    pub author_user_id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateComment {
    pub task_id: Uuid,
    pub author_user_id: Uuid,
    pub text: String,
}

impl TaskComment {
    async fn from_model<C: ConnectionTrait>(
        db: &C,
        model: task_comment::Model,
    ) -> Result<Self, DbErr> {
        let task_uuid = ids::task_uuid_by_id(db, model.task_id)
            .await?
            .ok_or(DbErr::RecordNotFound("Task not found".to_string()))?;
        let author_uuid = ids::user_uuid_by_id(db, model.author_user_id)
            .await?
            .ok_or(DbErr::RecordNotFound("Author not found".to_string()))?;
        Ok(Self {
            id: model.uuid,
            task_id: task_uuid,
            author_user_id: author_uuid,
            text: model.text,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }

    pub async fn find_by_id<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<Option<Self>, DbErr> {
        let record = task_comment::Entity::find()
            .filter(task_comment::Column::Uuid.eq(id))
            .one(db)
            .await?;
        match record {
            Some(model) => Ok(Some(Self::from_model(db, model).await?)),
            None => Ok(None),
        }
    }

    /// Comments in conversation order, oldest first.
    pub async fn find_by_task<C: ConnectionTrait>(
        db: &C,
        task_id: Uuid,
    ) -> Result<Vec<Self>, DbErr> {
        let Some(task_row_id) = ids::task_id_by_uuid(db, task_id).await? else {
            return Ok(Vec::new());
        };
        let models = task_comment::Entity::find()
            .filter(task_comment::Column::TaskId.eq(task_row_id))
            .order_by_asc(task_comment::Column::CreatedAt)
            .order_by_asc(task_comment::Column::Id)
            .all(db)
            .await?;
        let mut comments = Vec::with_capacity(models.len());
        for model in models {
            comments.push(Self::from_model(db, model).await?);
        }
        Ok(comments)
    }

    pub async fn count_for_task<C: ConnectionTrait>(db: &C, task_id: Uuid) -> Result<u64, DbErr> {
        let Some(task_row_id) = ids::task_id_by_uuid(db, task_id).await? else {
            return Ok(0);
        };
        task_comment::Entity::find()
            .filter(task_comment::Column::TaskId.eq(task_row_id))
            .count(db)
            .await
    }

    pub async fn create<C: ConnectionTrait>(
        db: &C,
        data: &CreateComment,
        comment_id: Uuid,
    ) -> Result<Self, CommentError> {
        let task_row_id = ids::task_id_by_uuid(db, data.task_id)
            .await?
            .ok_or(CommentError::TaskNotFound)?;
        let author_row_id = ids::user_id_by_uuid(db, data.author_user_id)
            .await?
            .ok_or(CommentError::AuthorNotFound)?;

        let now = Utc::now();
        let active = task_comment::ActiveModel {
            uuid: Set(comment_id),
            task_id: Set(task_row_id),
            author_user_id: Set(author_row_id),
            text: Set(data.text.clone()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let model = active.insert(db).await?;
        let payload = serde_json::to_value(CommentEventPayload {
            comment_id,
            task_id: data.task_id,
        })
        .map_err(|err| DbErr::Custom(err.to_string()))?;
        EventOutbox::enqueue(db, EVENT_COMMENT_CREATED, "comment", comment_id, payload).await?;
        Ok(Self::from_model(db, model).await?)
    }

    pub async fn update_text<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        text: String,
    ) -> Result<Self, CommentError> {
        let record = task_comment::Entity::find()
            .filter(task_comment::Column::Uuid.eq(id))
            .one(db)
            .await?
            .ok_or(CommentError::NotFound)?;

        let task_row_id = record.task_id;
        let mut active: task_comment::ActiveModel = record.into();
        active.text = Set(text);
        active.updated_at = Set(Utc::now());
        let updated = active.update(db).await?;

        let task_uuid = ids::task_uuid_by_id(db, task_row_id)
            .await?
            .ok_or(DbErr::RecordNotFound("Task not found".to_string()))?;
        let payload = serde_json::to_value(CommentEventPayload {
            comment_id: id,
            task_id: task_uuid,
        })
        .map_err(|err| DbErr::Custom(err.to_string()))?;
        EventOutbox::enqueue(db, EVENT_COMMENT_UPDATED, "comment", id, payload).await?;
        Ok(Self::from_model(db, updated).await?)
    }

    pub async fn delete<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<u64, DbErr> {
        let record = task_comment::Entity::find()
            .filter(task_comment::Column::Uuid.eq(id))
            .one(db)
            .await?;

        let Some(record) = record else {
            return Ok(0);
        };

        let task_uuid = ids::task_uuid_by_id(db, record.task_id).await?;
        let result = task_comment::Entity::delete_many()
            .filter(task_comment::Column::Id.eq(record.id))
            .exec(db)
            .await?;

        if result.rows_affected > 0
            && let Some(task_uuid) = task_uuid
        {
            let payload = serde_json::to_value(CommentEventPayload {
                comment_id: id,
                task_id: task_uuid,
            })
            .map_err(|err| DbErr::Custom(err.to_string()))?;
            EventOutbox::enqueue(db, EVENT_COMMENT_DELETED, "comment", id, payload).await?;
        }

        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::Database;
    use sea_orm_migration::MigratorTrait;

    use crate::models::{
        task::{CreateTask, Task},
        user::{CreateUser, User},
    };

    use super::*;

    async fn setup_db() -> sea_orm::DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db_migration::Migrator::up(&db, None).await.unwrap();
        db
    }

    #[tokio::test]
    async fn comments_are_removed_with_their_task() {
        let db = setup_db().await;
        let author = User::create(
            &db,
            &CreateUser {
                email: "author@example.com".to_string(),
                name: "Author".to_string(),
                photo_url: None,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        let task = Task::create(
            &db,
            &CreateTask::from_title("Commented", author.id),
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        let comment = TaskComment::create(
            &db,
            &CreateComment {
                task_id: task.id,
                author_user_id: author.id,
                text: "First!".to_string(),
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        assert_eq!(TaskComment::count_for_task(&db, task.id).await.unwrap(), 1);

        Task::delete(&db, task.id).await.unwrap();
        assert!(TaskComment::find_by_id(&db, comment.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn comments_list_in_creation_order() {
        let db = setup_db().await;
        let author = User::create(
            &db,
            &CreateUser {
                email: "author@example.com".to_string(),
                name: "Author".to_string(),
                photo_url: None,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        let task = Task::create(
            &db,
            &CreateTask::from_title("Discussion", author.id),
            Uuid::new_v4(),
        )
        .await
        .unwrap();

        for text in ["one", "two", "three"] {
            TaskComment::create(
                &db,
                &CreateComment {
                    task_id: task.id,
                    author_user_id: author.id,
                    text: text.to_string(),
                },
                Uuid::new_v4(),
            )
            .await
            .unwrap();
        }

        let comments = TaskComment::find_by_task(&db, task.id).await.unwrap();
        let texts: Vec<_> = comments.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }
}
