use chrono::Utc;
use sea_orm::sea_query::{Expr, ExprTrait};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde_json::Value;
use uuid::Uuid;

use crate::entities::event_outbox;

/// Change journal written in the same connection as the entity write.
/// The services layer polls unpublished rows and fans them out to
/// in-process subscribers.
pub struct EventOutbox;

impl EventOutbox {
    pub async fn enqueue<C: ConnectionTrait>(
        db: &C,
        event_type: &str,
        entity_type: &str,
        entity_uuid: Uuid,
        payload: Value,
    ) -> Result<(), DbErr> {
        event_outbox::ActiveModel {
            uuid: Set(Uuid::new_v4()),
            event_type: Set(event_type.to_string()),
            entity_type: Set(entity_type.to_string()),
            entity_uuid: Set(entity_uuid),
            payload: Set(payload),
            created_at: Set(Utc::now()),
            published_at: Set(None),
            attempts: Set(0),
            last_error: Set(None),
            ..Default::default()
        }
        .insert(db)
        .await?;
        Ok(())
    }

    pub async fn fetch_unpublished<C: ConnectionTrait>(
        db: &C,
        limit: u64,
    ) -> Result<Vec<event_outbox::Model>, DbErr> {
        event_outbox::Entity::find()
            .filter(event_outbox::Column::PublishedAt.is_null())
            .order_by_asc(event_outbox::Column::CreatedAt)
            .order_by_asc(event_outbox::Column::Id)
            .limit(limit)
            .all(db)
            .await
    }

    pub async fn mark_published<C: ConnectionTrait>(db: &C, id: i64) -> Result<(), DbErr> {
        event_outbox::Entity::update_many()
            .col_expr(
                event_outbox::Column::PublishedAt,
                Expr::value(Some(Utc::now())),
            )
            .filter(event_outbox::Column::Id.eq(id))
            .exec(db)
            .await?;
        Ok(())
    }

    pub async fn mark_failed<C: ConnectionTrait>(
        db: &C,
        id: i64,
        error: &str,
    ) -> Result<(), DbErr> {
        event_outbox::Entity::update_many()
            .col_expr(
                event_outbox::Column::Attempts,
                Expr::col(event_outbox::Column::Attempts).add(1),
            )
            .col_expr(
                event_outbox::Column::LastError,
                Expr::value(Some(error.to_string())),
            )
            .filter(event_outbox::Column::Id.eq(id))
            .exec(db)
            .await?;
        Ok(())
    }

    /// Drops published rows older than `cutoff`; the journal is a buffer,
    /// not an archive.
    pub async fn prune_published_before<C: ConnectionTrait>(
        db: &C,
        cutoff: chrono::DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        let result = event_outbox::Entity::delete_many()
            .filter(event_outbox::Column::PublishedAt.is_not_null())
            .filter(event_outbox::Column::PublishedAt.lt(cutoff))
            .exec(db)
            .await?;
        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::Database;
    use sea_orm_migration::MigratorTrait;

    use super::*;

    async fn setup_db() -> sea_orm::DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db_migration::Migrator::up(&db, None).await.unwrap();
        db
    }

    #[tokio::test]
    async fn enqueue_fetch_publish_cycle() {
        let db = setup_db().await;

        let entity = Uuid::new_v4();
        EventOutbox::enqueue(&db, "task.created", "task", entity, serde_json::json!({}))
            .await
            .unwrap();
        EventOutbox::enqueue(&db, "task.updated", "task", entity, serde_json::json!({}))
            .await
            .unwrap();

        let pending = EventOutbox::fetch_unpublished(&db, 10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].event_type, "task.created");

        EventOutbox::mark_published(&db, pending[0].id).await.unwrap();
        let pending = EventOutbox::fetch_unpublished(&db, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].event_type, "task.updated");

        EventOutbox::mark_failed(&db, pending[0].id, "subscriber gone")
            .await
            .unwrap();
        let still_pending = EventOutbox::fetch_unpublished(&db, 10).await.unwrap();
        assert_eq!(still_pending[0].attempts, 1);
        assert_eq!(
            still_pending[0].last_error.as_deref(),
            Some("subscriber gone")
        );
    }

    #[tokio::test]
    async fn prune_only_removes_published_rows() {
        let db = setup_db().await;

        EventOutbox::enqueue(
            &db,
            "task.created",
            "task",
            Uuid::new_v4(),
            serde_json::json!({}),
        )
        .await
        .unwrap();
        let rows = EventOutbox::fetch_unpublished(&db, 10).await.unwrap();
        EventOutbox::mark_published(&db, rows[0].id).await.unwrap();

        EventOutbox::enqueue(
            &db,
            "task.updated",
            "task",
            Uuid::new_v4(),
            serde_json::json!({}),
        )
        .await
        .unwrap();

        let removed = EventOutbox::prune_published_before(
            &db,
            Utc::now() + chrono::Duration::seconds(1),
        )
        .await
        .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(EventOutbox::fetch_unpublished(&db, 10).await.unwrap().len(), 1);
    }
}
