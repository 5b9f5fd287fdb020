pub mod reports;
pub mod sessions;
pub mod webhooks;

use std::sync::Arc;

use redis::aio::ConnectionManager;
use sqlx::PgPool;

use crate::config::Config;
use crate::db::{ReportsDb, SessionsDb, WebhookLogDb};
use crate::services::{
    BanResolver, ModerationDispatcher, SessionAnalytics, WebhookIngestion,
};

/// Shared handler state, wired once in main and cloned per worker
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pool: Arc<PgPool>,
    pub redis: ConnectionManager,
    pub sessions: SessionsDb,
    pub reports: ReportsDb,
    pub webhook_log: WebhookLogDb,
    pub ingestion: Arc<WebhookIngestion>,
    pub resolver: Arc<BanResolver>,
    pub dispatcher: Arc<ModerationDispatcher>,
    pub analytics: Arc<SessionAnalytics>,
}
