//! Webhook ingress and audit-trail endpoints

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::db::WebhookLogFilter;
use crate::error::{AppError, Result};
use crate::handlers::AppState;
use crate::middleware::require_admin;
use crate::models::ProcessingStatus;

/// POST /webhooks/live-events
///
/// Always 200 once the signature and payload check out, even when
/// reconciliation fails; the failure lives in the event log, not in the
/// response, so the media server does not redeliver forever.
pub async fn receive_live_event(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let signature = req
        .headers()
        .get("x-webhook-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Authentication("missing webhook signature".to_string()))?;

    let outcome = state.ingestion.ingest(&body, signature).await?;
    Ok(HttpResponse::Ok().json(json!({
        "received": true,
        "outcome": format!("{outcome:?}").to_lowercase(),
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookLogQuery {
    pub event_type: Option<String>,
    pub status: Option<ProcessingStatus>,
    pub room_name: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /webhooks/logs (admin)
pub async fn list_webhook_logs(
    req: HttpRequest,
    query: web::Query<WebhookLogQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    require_admin(&req, &state.config)?;

    let filter = WebhookLogFilter {
        event_type: query.event_type.clone(),
        status: query.status,
        room_name: query.room_name.clone(),
        limit: query.limit.unwrap_or(50),
        offset: query.offset.unwrap_or(0),
    };

    let events = state.webhook_log.list_events(&filter).await?;
    let total = state.webhook_log.count_events(&filter).await?;

    Ok(HttpResponse::Ok().json(json!({
        "events": events,
        "total": total,
    })))
}
