//! Session listing, enforcement checks, and analytics endpoints

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::handlers::AppState;
use crate::middleware::{require_admin, UserId};
use crate::models::{BanScope, LiveSession, SessionStatus, SessionType};

/// Session as served to clients: live sessions report elapsed time so
/// far, ended ones their recorded duration.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub session_type: SessionType,
    pub status: SessionStatus,
    pub current_viewer_count: i32,
    pub max_viewer_count: i32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: i64,
}

impl SessionView {
    fn from_session(session: LiveSession, now: DateTime<Utc>) -> Self {
        let duration_seconds = session.effective_duration_seconds(now);
        Self {
            id: session.id,
            creator_id: session.creator_id,
            session_type: session.session_type,
            status: session.status,
            current_viewer_count: session.current_viewer_count,
            max_viewer_count: session.max_viewer_count,
            started_at: session.started_at,
            ended_at: session.ended_at,
            duration_seconds,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SessionListQuery {
    pub status: Option<SessionStatus>,
    pub session_type: Option<SessionType>,
    pub limit: Option<i64>,
}

/// GET /api/v1/live/sessions
pub async fn list_sessions(
    query: web::Query<SessionListQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let sessions = state
        .sessions
        .list_sessions(query.status, query.session_type, limit)
        .await?;

    let now = Utc::now();
    let views: Vec<SessionView> = sessions
        .into_iter()
        .map(|s| SessionView::from_session(s, now))
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "total": views.len(),
        "sessions": views,
    })))
}

/// GET /api/v1/live/sessions/{session_id}
pub async fn get_session(
    path: web::Path<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let session_id = path.into_inner();
    let session = state
        .sessions
        .get_session(session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;
    let active_participants = state.sessions.count_active_participants(session_id).await?;

    Ok(HttpResponse::Ok().json(json!({
        "session": SessionView::from_session(session, Utc::now()),
        "active_participants": active_participants,
    })))
}

#[derive(Debug, Serialize)]
struct BanInfo {
    scope: BanScope,
    reason: String,
    expires_at: Option<DateTime<Utc>>,
}

/// GET /api/v1/live/sessions/{session_id}/ban-check
///
/// Resolver errors propagate as 503 so a storage outage fails closed
/// instead of admitting a possibly banned user.
pub async fn ban_check(
    path: web::Path<Uuid>,
    user: UserId,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let session_id = path.into_inner();
    let session = state
        .sessions
        .get_session(session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;

    let decision = state
        .resolver
        .resolve(user.0, session.id, session.creator_id)
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "is_banned": decision.barred,
        "ban_info": decision.ban.map(|b| BanInfo {
            scope: b.scope,
            reason: b.reason,
            expires_at: b.expires_at,
        }),
    })))
}

/// GET /api/v1/live/analytics (admin)
pub async fn get_analytics(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse> {
    require_admin(&req, &state.config)?;
    Ok(HttpResponse::Ok().json(state.analytics.snapshot().await))
}
