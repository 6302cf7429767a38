use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use chrono::Utc;
use db::TransactionTrait;
use db::models::collaboration_invite::{
    CollaborationInvite, CollaboratorRole, CreateInvite,
};
use serde::Deserialize;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct CreateInviteRequest {
    pub project_id: Uuid,
    pub invited_email: String,
    pub role: CollaboratorRole,
}

#[derive(Debug, Deserialize)]
pub struct PendingInvitesQuery {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct RespondToInviteRequest {
    pub accept: bool,
}

pub async fn create_invite(
    State(state): State<AppState>,
    Json(payload): Json<CreateInviteRequest>,
) -> Result<ResponseJson<ApiResponse<CollaborationInvite>>, ApiError> {
    if payload.invited_email.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Invited email must not be empty".to_string(),
        ));
    }
    let session = state.session().await?;
    let invite = CollaborationInvite::create(
        &state.db().conn,
        &CreateInvite {
            project_id: payload.project_id,
            inviter_user_id: session.user_id,
            invited_email: payload.invited_email.clone(),
            role: payload.role,
        },
        Uuid::new_v4(),
    )
    .await?;

    // There is no mail transport; the "email" is this log line.
    tracing::info!(
        invite_id = %invite.id,
        project_id = %invite.project_id,
        invited_email = %invite.invited_email,
        "collaboration invite email queued"
    );

    Ok(ResponseJson(ApiResponse::success(invite)))
}

pub async fn get_invite(
    State(state): State<AppState>,
    Path(invite_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<CollaborationInvite>>, ApiError> {
    let invite = CollaborationInvite::find_by_id(&state.db().conn, invite_id)
        .await?
        .ok_or(db::models::collaboration_invite::InviteError::NotFound)?;
    Ok(ResponseJson(ApiResponse::success(invite)))
}

pub async fn get_pending_invites(
    State(state): State<AppState>,
    Query(query): Query<PendingInvitesQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<CollaborationInvite>>>, ApiError> {
    let invites =
        CollaborationInvite::find_pending_by_email(&state.db().conn, &query.email).await?;
    Ok(ResponseJson(ApiResponse::success(invites)))
}

pub async fn respond_to_invite(
    State(state): State<AppState>,
    Path(invite_id): Path<Uuid>,
    Json(payload): Json<RespondToInviteRequest>,
) -> Result<ResponseJson<ApiResponse<CollaborationInvite>>, ApiError> {
    // Accepting must land the collaborator row and the status flip
    // together or not at all.
    let txn = state.db().conn.begin().await?;
    let invite =
        CollaborationInvite::respond(&txn, invite_id, payload.accept, Utc::now()).await?;
    txn.commit().await?;
    Ok(ResponseJson(ApiResponse::success(invite)))
}

pub fn router() -> Router<AppState> {
    let inner = Router::new()
        .route("/", get(get_pending_invites).post(create_invite))
        .route("/{invite_id}", get(get_invite))
        .route("/{invite_id}/respond", post(respond_to_invite));

    Router::new().nest("/invites", inner)
}
