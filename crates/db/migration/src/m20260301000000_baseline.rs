use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::DatabaseBackend;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create().if_not_exists()
                    .table(Users::Table)
                    .col(pk_id_col(manager, Users::Id))
                    .col(uuid_col(Users::Uuid))
                    .col(ColumnDef::new(Users::Email).string().not_null())
                    .col(ColumnDef::new(Users::Name).string().not_null())
                    .col(ColumnDef::new(Users::PhotoUrl).string())
                    .col(
                        ColumnDef::new(Users::IsCurrentUser)
                            .boolean()
                            .not_null()
                            .default(Expr::val(false)),
                    )
                    .col(timestamp_col(Users::CreatedAt))
                    .col(timestamp_col(Users::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_users_uuid")
                    .table(Users::Table)
                    .col(Users::Uuid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_users_email")
                    .table(Users::Table)
                    .col(Users::Email)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create().if_not_exists()
                    .table(Projects::Table)
                    .col(pk_id_col(manager, Projects::Id))
                    .col(uuid_col(Projects::Uuid))
                    .col(ColumnDef::new(Projects::Name).string().not_null())
                    .col(ColumnDef::new(Projects::Description).text())
                    .col(fk_id_col(manager, Projects::OwnerUserId))
                    .col(ColumnDef::new(Projects::ColorHex).string_len(9))
                    .col(timestamp_col(Projects::CreatedAt))
                    .col(timestamp_col(Projects::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_projects_owner_user_id")
                            .from(Projects::Table, Projects::OwnerUserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_projects_uuid")
                    .table(Projects::Table)
                    .col(Projects::Uuid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_projects_owner_user_id")
                    .table(Projects::Table)
                    .col(Projects::OwnerUserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create().if_not_exists()
                    .table(Tasks::Table)
                    .col(pk_id_col(manager, Tasks::Id))
                    .col(uuid_col(Tasks::Uuid))
                    .col(fk_id_nullable_col(manager, Tasks::ProjectId))
                    .col(ColumnDef::new(Tasks::Title).string().not_null())
                    .col(ColumnDef::new(Tasks::Description).text())
                    .col(fk_id_nullable_col(manager, Tasks::AssigneeUserId))
                    .col(uuid_col(Tasks::CreatorUserId))
                    .col(timestamp_nullable_col(Tasks::DueDate))
                    .col(
                        ColumnDef::new(Tasks::Priority)
                            .integer()
                            .not_null()
                            .default(Expr::val(2)),
                    )
                    .col(
                        ColumnDef::new(Tasks::Status)
                            .string_len(32)
                            .not_null()
                            .default(Expr::val("todo")),
                    )
                    .col(
                        ColumnDef::new(Tasks::IsRecurring)
                            .boolean()
                            .not_null()
                            .default(Expr::val(false)),
                    )
                    .col(ColumnDef::new(Tasks::RecurrenceRule).string())
                    .col(fk_id_nullable_col(manager, Tasks::ParentTaskId))
                    .col(timestamp_col(Tasks::CreatedAt))
                    .col(timestamp_col(Tasks::UpdatedAt))
                    .col(timestamp_nullable_col(Tasks::CompletedAt))
                    .col(ColumnDef::new(Tasks::ReminderOffsetMs).big_integer())
                    .col(timestamp_nullable_col(Tasks::TimeTrackingStartedAt))
                    .col(
                        ColumnDef::new(Tasks::TimeSpentMs)
                            .big_integer()
                            .not_null()
                            .default(Expr::val(0)),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_tasks_project_id")
                            .from(Tasks::Table, Tasks::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_tasks_assignee_user_id")
                            .from(Tasks::Table, Tasks::AssigneeUserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_tasks_parent_task_id")
                            .from(Tasks::Table, Tasks::ParentTaskId)
                            .to(Tasks::Table, Tasks::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_tasks_uuid")
                    .table(Tasks::Table)
                    .col(Tasks::Uuid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_tasks_project_id")
                    .table(Tasks::Table)
                    .col(Tasks::ProjectId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_tasks_assignee_user_id")
                    .table(Tasks::Table)
                    .col(Tasks::AssigneeUserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_tasks_parent_task_id")
                    .table(Tasks::Table)
                    .col(Tasks::ParentTaskId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_tasks_due_date")
                    .table(Tasks::Table)
                    .col(Tasks::DueDate)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create().if_not_exists()
                    .table(TaskComments::Table)
                    .col(pk_id_col(manager, TaskComments::Id))
                    .col(uuid_col(TaskComments::Uuid))
                    .col(fk_id_col(manager, TaskComments::TaskId))
                    .col(fk_id_col(manager, TaskComments::AuthorUserId))
                    .col(ColumnDef::new(TaskComments::Text).text().not_null())
                    .col(timestamp_col(TaskComments::CreatedAt))
                    .col(timestamp_col(TaskComments::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_task_comments_task_id")
                            .from(TaskComments::Table, TaskComments::TaskId)
                            .to(Tasks::Table, Tasks::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_task_comments_author_user_id")
                            .from(TaskComments::Table, TaskComments::AuthorUserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_task_comments_uuid")
                    .table(TaskComments::Table)
                    .col(TaskComments::Uuid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_task_comments_task_id")
                    .table(TaskComments::Table)
                    .col(TaskComments::TaskId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create().if_not_exists()
                    .table(ProjectCollaborators::Table)
                    .col(fk_id_col(manager, ProjectCollaborators::ProjectId))
                    .col(fk_id_col(manager, ProjectCollaborators::UserId))
                    .col(
                        ColumnDef::new(ProjectCollaborators::Role)
                            .string_len(32)
                            .not_null()
                            .default(Expr::val("viewer")),
                    )
                    .col(timestamp_col(ProjectCollaborators::JoinedAt))
                    .col(timestamp_nullable_col(ProjectCollaborators::LastAccessedAt))
                    .primary_key(
                        Index::create()
                            .col(ProjectCollaborators::ProjectId)
                            .col(ProjectCollaborators::UserId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_project_collaborators_project_id")
                            .from(ProjectCollaborators::Table, ProjectCollaborators::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_project_collaborators_user_id")
                            .from(ProjectCollaborators::Table, ProjectCollaborators::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create().if_not_exists()
                    .table(CollaborationInvites::Table)
                    .col(pk_id_col(manager, CollaborationInvites::Id))
                    .col(uuid_col(CollaborationInvites::Uuid))
                    .col(fk_id_col(manager, CollaborationInvites::ProjectId))
                    .col(fk_id_col(manager, CollaborationInvites::InviterUserId))
                    .col(
                        ColumnDef::new(CollaborationInvites::InvitedEmail)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CollaborationInvites::Role)
                            .string_len(32)
                            .not_null()
                            .default(Expr::val("viewer")),
                    )
                    .col(
                        ColumnDef::new(CollaborationInvites::Status)
                            .string_len(32)
                            .not_null()
                            .default(Expr::val("pending")),
                    )
                    .col(timestamp_col(CollaborationInvites::CreatedAt))
                    .col(timestamp_nullable_col(CollaborationInvites::ResolvedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_collaboration_invites_project_id")
                            .from(CollaborationInvites::Table, CollaborationInvites::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_collaboration_invites_inviter_user_id")
                            .from(CollaborationInvites::Table, CollaborationInvites::InviterUserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_collaboration_invites_uuid")
                    .table(CollaborationInvites::Table)
                    .col(CollaborationInvites::Uuid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_collaboration_invites_invited_email")
                    .table(CollaborationInvites::Table)
                    .col(CollaborationInvites::InvitedEmail)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_collaboration_invites_status")
                    .table(CollaborationInvites::Table)
                    .col(CollaborationInvites::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create().if_not_exists()
                    .table(EventOutbox::Table)
                    .col(pk_id_col(manager, EventOutbox::Id))
                    .col(uuid_col(EventOutbox::Uuid))
                    .col(ColumnDef::new(EventOutbox::EventType).string().not_null())
                    .col(ColumnDef::new(EventOutbox::EntityType).string().not_null())
                    .col(uuid_col(EventOutbox::EntityUuid))
                    .col(ColumnDef::new(EventOutbox::Payload).json().not_null())
                    .col(timestamp_col(EventOutbox::CreatedAt))
                    .col(timestamp_nullable_col(EventOutbox::PublishedAt))
                    .col(
                        ColumnDef::new(EventOutbox::Attempts)
                            .integer()
                            .not_null()
                            .default(Expr::val(0)),
                    )
                    .col(ColumnDef::new(EventOutbox::LastError).text())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_event_outbox_uuid")
                    .table(EventOutbox::Table)
                    .col(EventOutbox::Uuid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create().if_not_exists()
                    .name("idx_event_outbox_published_at")
                    .table(EventOutbox::Table)
                    .col(EventOutbox::PublishedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EventOutbox::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CollaborationInvites::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ProjectCollaborators::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TaskComments::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Tasks::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Projects::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await?;
        Ok(())
    }
}

fn pk_id_col<T: Iden>(manager: &SchemaManager, col: T) -> ColumnDef {
    let mut col = ColumnDef::new(col);
    match manager.get_database_backend() {
        DatabaseBackend::Sqlite => {
            col.integer();
        }
        _ => {
            col.big_integer();
        }
    }
    col.not_null().auto_increment().primary_key().to_owned()
}

fn fk_id_col<T: Iden>(manager: &SchemaManager, col: T) -> ColumnDef {
    let mut col = ColumnDef::new(col);
    match manager.get_database_backend() {
        DatabaseBackend::Sqlite => {
            col.integer();
        }
        _ => {
            col.big_integer();
        }
    }
    col.not_null().to_owned()
}

fn fk_id_nullable_col<T: Iden>(manager: &SchemaManager, col: T) -> ColumnDef {
    let mut col = ColumnDef::new(col);
    match manager.get_database_backend() {
        DatabaseBackend::Sqlite => {
            col.integer();
        }
        _ => {
            col.big_integer();
        }
    }
    col.to_owned()
}

fn uuid_col<T: Iden>(col: T) -> ColumnDef {
    ColumnDef::new(col).uuid().not_null().to_owned()
}

fn timestamp_col<T: Iden>(col: T) -> ColumnDef {
    ColumnDef::new(col)
        .timestamp()
        .not_null()
        .default(Expr::current_timestamp())
        .to_owned()
}

fn timestamp_nullable_col<T: Iden>(col: T) -> ColumnDef {
    ColumnDef::new(col).timestamp().to_owned()
}

#[derive(Iden)]
enum Users {
    Table,
    Id,
    Uuid,
    Email,
    Name,
    PhotoUrl,
    IsCurrentUser,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Projects {
    Table,
    Id,
    Uuid,
    Name,
    Description,
    OwnerUserId,
    ColorHex,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Tasks {
    Table,
    Id,
    Uuid,
    ProjectId,
    Title,
    Description,
    AssigneeUserId,
    CreatorUserId,
    DueDate,
    Priority,
    Status,
    IsRecurring,
    RecurrenceRule,
    ParentTaskId,
    CreatedAt,
    UpdatedAt,
    CompletedAt,
    ReminderOffsetMs,
    TimeTrackingStartedAt,
    TimeSpentMs,
}

#[derive(Iden)]
enum TaskComments {
    Table,
    Id,
    Uuid,
    TaskId,
    AuthorUserId,
    Text,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum ProjectCollaborators {
    Table,
    ProjectId,
    UserId,
    Role,
    JoinedAt,
    LastAccessedAt,
}

#[derive(Iden)]
enum CollaborationInvites {
    Table,
    Id,
    Uuid,
    ProjectId,
    InviterUserId,
    InvitedEmail,
    Role,
    Status,
    CreatedAt,
    ResolvedAt,
}

#[derive(Iden)]
enum EventOutbox {
    Table,
    Id,
    Uuid,
    EventType,
    EntityType,
    EntityUuid,
    Payload,
    CreatedAt,
    PublishedAt,
    Attempts,
    LastError,
}
