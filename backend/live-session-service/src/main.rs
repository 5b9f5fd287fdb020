use std::sync::Arc;
use std::time::Duration;

use actix_web::middleware::Logger;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use anyhow::Context;
use redis::aio::ConnectionManager;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use db_pool::{create_pool, DbConfig};
use live_session_service::config::Config;
use live_session_service::db::{BansDb, ReportsDb, SessionsDb, WebhookLogDb};
use live_session_service::handlers::{self, AppState};
use live_session_service::metrics::serve_metrics;
use live_session_service::realtime::{Broadcaster, Notifier, RedisBroadcaster, RedisNotifier};
use live_session_service::services::{
    BanResolver, DbSessionTerminator, DisconnectSupervisor, ModerationDispatcher,
    SessionAnalytics, SessionReconciler, WebhookIngestion,
};

async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// Readiness: both backing stores must answer.
async fn ready(state: web::Data<AppState>) -> impl Responder {
    if let Err(e) = sqlx::query("SELECT 1").execute(&*state.pool).await {
        error!(error = %e, "Readiness check failed: database");
        return HttpResponse::ServiceUnavailable()
            .json(serde_json::json!({ "status": "unavailable", "component": "database" }));
    }

    let mut redis = state.redis.clone();
    if let Err(e) = redis::cmd("PING").query_async::<_, String>(&mut redis).await {
        error!(error = %e, "Readiness check failed: redis");
        return HttpResponse::ServiceUnavailable()
            .json(serde_json::json!({ "status": "unavailable", "component": "redis" }));
    }

    HttpResponse::Ok().json(serde_json::json!({ "status": "ready" }))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("invalid configuration")?;

    let db_config = DbConfig::for_service(&config.service_name);
    db_config.log_config();
    let pool = Arc::new(
        create_pool(db_config)
            .await
            .context("failed to create database pool")?,
    );
    sqlx::migrate!("./migrations")
        .run(&*pool)
        .await
        .context("failed to run migrations")?;

    let redis_client =
        redis::Client::open(config.redis_url.clone()).context("invalid REDIS_URL")?;
    let redis = ConnectionManager::new(redis_client)
        .await
        .context("failed to connect to Redis")?;

    let sessions = SessionsDb::new(pool.clone());
    let bans = BansDb::new(pool.clone());
    let reports = ReportsDb::new(pool.clone());
    let webhook_log = WebhookLogDb::new(pool.clone());

    let broadcaster: Arc<dyn Broadcaster> = Arc::new(RedisBroadcaster::new(redis.clone()));
    let notifier: Arc<dyn Notifier> = Arc::new(RedisNotifier::new(redis.clone()));

    let resolver = Arc::new(BanResolver::new(bans.clone()));

    let terminator = Arc::new(DbSessionTerminator::new(sessions.clone(), resolver.clone()));
    let supervisor = Arc::new(DisconnectSupervisor::new(
        terminator,
        broadcaster.clone(),
        config.grace_period_secs,
        Duration::from_millis(config.disconnect_debounce_ms),
    ));
    let reconciler = Arc::new(SessionReconciler::new(
        sessions.clone(),
        supervisor,
        resolver.clone(),
    ));
    let ingestion = Arc::new(WebhookIngestion::new(
        config.webhook_shared_secret.clone(),
        webhook_log.clone(),
        reconciler,
    ));
    let dispatcher = Arc::new(ModerationDispatcher::new(
        pool.clone(),
        bans,
        resolver.clone(),
        notifier,
        broadcaster,
    ));

    let analytics = Arc::new(SessionAnalytics::new(sessions.clone()));
    analytics
        .clone()
        .spawn_refresh_job(Duration::from_secs(config.analytics_refresh_secs));

    let state = AppState {
        config: config.clone(),
        pool,
        redis,
        sessions,
        reports,
        webhook_log,
        ingestion,
        resolver,
        dispatcher,
        analytics,
    };

    let bind_addr = format!("{}:{}", config.host, config.port);
    info!(
        bind_addr = %bind_addr,
        environment = %config.environment,
        "Starting live-session-service"
    );

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(Logger::default())
            .service(
                web::scope("/webhooks")
                    .route(
                        "/live-events",
                        web::post().to(handlers::webhooks::receive_live_event),
                    )
                    .route("/logs", web::get().to(handlers::webhooks::list_webhook_logs)),
            )
            .service(
                web::scope("/api/v1")
                    .route(
                        "/live/sessions",
                        web::get().to(handlers::sessions::list_sessions),
                    )
                    .route(
                        "/live/sessions/{session_id}",
                        web::get().to(handlers::sessions::get_session),
                    )
                    .route(
                        "/live/sessions/{session_id}/ban-check",
                        web::get().to(handlers::sessions::ban_check),
                    )
                    .route(
                        "/live/analytics",
                        web::get().to(handlers::sessions::get_analytics),
                    )
                    .route("/reports", web::post().to(handlers::reports::create_report))
                    .route("/reports", web::get().to(handlers::reports::list_reports))
                    .route(
                        "/reports/{report_id}",
                        web::get().to(handlers::reports::get_report),
                    )
                    .route(
                        "/reports/{report_id}/action",
                        web::post().to(handlers::reports::report_action),
                    )
                    .route(
                        "/bans/{ban_id}/revoke",
                        web::post().to(handlers::reports::revoke_ban),
                    ),
            )
            .route("/health", web::get().to(health))
            .route("/ready", web::get().to(ready))
            .route("/metrics", web::get().to(serve_metrics))
    })
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind {bind_addr}"))?
    .run()
    .await
    .context("HTTP server error")?;

    Ok(())
}
