//! Report intake and the admin moderation queue

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::handlers::AppState;
use crate::middleware::{require_admin, UserId};
use crate::models::{CreateReportInput, ReportStatus};
use crate::services::ActionRequest;

const MAX_REASON_LENGTH: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct CreateReportRequest {
    pub reported_user_id: Uuid,
    pub session_id: Uuid,
    pub reason: String,
}

/// POST /api/v1/reports
pub async fn create_report(
    user: UserId,
    body: web::Json<CreateReportRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let reason = body.reason.trim();
    if reason.is_empty() {
        return Err(AppError::Validation("reason must not be empty".to_string()));
    }
    if reason.len() > MAX_REASON_LENGTH {
        return Err(AppError::Validation(format!(
            "reason exceeds {MAX_REASON_LENGTH} characters"
        )));
    }
    if body.reported_user_id == user.0 {
        return Err(AppError::Validation(
            "cannot report yourself".to_string(),
        ));
    }

    state
        .sessions
        .get_session(body.session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("session {} not found", body.session_id)))?;

    let report = state
        .reports
        .create_report(CreateReportInput {
            reported_user_id: body.reported_user_id,
            reporter_id: user.0,
            session_id: body.session_id,
            reason: reason.to_string(),
        })
        .await?;

    Ok(HttpResponse::Created().json(report))
}

#[derive(Debug, Deserialize)]
pub struct ReportListQuery {
    pub status: Option<ReportStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /api/v1/reports (admin). Defaults to the pending queue, oldest
/// first.
pub async fn list_reports(
    req: HttpRequest,
    query: web::Query<ReportListQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    require_admin(&req, &state.config)?;

    let status = query.status.or(Some(ReportStatus::Pending));
    let reports = state
        .reports
        .list_reports(
            status,
            query.limit.unwrap_or(50).clamp(1, 200),
            query.offset.unwrap_or(0).max(0),
        )
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "total": reports.len(),
        "reports": reports,
    })))
}

/// GET /api/v1/reports/{report_id} (admin)
pub async fn get_report(
    req: HttpRequest,
    path: web::Path<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    require_admin(&req, &state.config)?;

    let report_id = path.into_inner();
    let report = state
        .reports
        .get_report(report_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("report {report_id} not found")))?;

    Ok(HttpResponse::Ok().json(report))
}

/// POST /api/v1/reports/{report_id}/action (admin)
pub async fn report_action(
    req: HttpRequest,
    path: web::Path<Uuid>,
    actor: UserId,
    body: web::Json<ActionRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    require_admin(&req, &state.config)?;

    let request = body.into_inner();
    let report = state
        .dispatcher
        .dispatch(path.into_inner(), actor.0, &request)
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "action": request.action.as_str(),
        "report": report,
    })))
}

/// POST /api/v1/bans/{ban_id}/revoke (admin)
pub async fn revoke_ban(
    req: HttpRequest,
    path: web::Path<Uuid>,
    actor: UserId,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    require_admin(&req, &state.config)?;

    let ban = state.dispatcher.revoke_ban(path.into_inner(), actor.0).await?;
    Ok(HttpResponse::Ok().json(ban))
}
