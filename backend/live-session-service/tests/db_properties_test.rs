//! Storage-level invariants that live in SQL rather than Rust: viewer
//! accounting, dedup-key arbitration and single-transition report
//! resolution. Each test gets its own migrated database.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use live_session_service::db::{
    BansDb, NewWebhookEvent, ReportsDb, SessionsDb, WebhookLogDb, WebhookLogFilter,
};
use live_session_service::error::AppError;
use live_session_service::models::{
    CreateReportInput, ModerationAction, ProcessingStatus, ReportStatus, SessionType,
};
use live_session_service::realtime::{Broadcaster, LiveUpdate, ModerationNotice, Notifier};
use live_session_service::services::{ActionRequest, BanResolver, ModerationDispatcher};

struct NullBroadcaster;

#[async_trait]
impl Broadcaster for NullBroadcaster {
    async fn publish(&self, _update: LiveUpdate) {}
}

struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _user_id: Uuid, _notice: ModerationNotice) {}
}

fn dispatcher(pool: &Arc<PgPool>) -> ModerationDispatcher {
    let bans = BansDb::new(pool.clone());
    let resolver = Arc::new(BanResolver::new(bans.clone()));
    ModerationDispatcher::new(
        pool.clone(),
        bans,
        resolver,
        Arc::new(NullNotifier),
        Arc::new(NullBroadcaster),
    )
}

async fn seed_session(sessions: &SessionsDb) -> Uuid {
    let creator_id = Uuid::new_v4();
    let room_name = format!("video_live:{creator_id}");
    let room_sid = format!("RM_{}", Uuid::new_v4().simple());
    let session = sessions
        .create_session(&room_name, &room_sid, creator_id, SessionType::VideoLive)
        .await
        .expect("create session");
    session.id
}

#[sqlx::test]
async fn viewer_count_tracks_active_participants(pool: PgPool) {
    let pool = Arc::new(pool);
    let sessions = SessionsDb::new(pool.clone());
    let session_id = seed_session(&sessions).await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    // Two joins, one replayed join, one leave, one replayed leave. The
    // count must follow the join/leave transitions exactly and never
    // dip below zero.
    assert!(sessions
        .activate_participant(session_id, alice, "alice")
        .await
        .unwrap());
    sessions.increment_viewers(session_id).await.unwrap();
    assert!(sessions
        .activate_participant(session_id, bob, "bob")
        .await
        .unwrap());
    sessions.increment_viewers(session_id).await.unwrap();

    // Replayed join for an already-active participant reports no
    // transition, so no increment happens.
    assert!(!sessions
        .activate_participant(session_id, alice, "alice")
        .await
        .unwrap());

    assert!(sessions
        .mark_participant_left(session_id, bob)
        .await
        .unwrap());
    sessions.decrement_viewers(session_id).await.unwrap();

    // Replayed leave: already closed, no decrement.
    assert!(!sessions
        .mark_participant_left(session_id, bob)
        .await
        .unwrap());

    let session = sessions.get_session(session_id).await.unwrap().unwrap();
    let active = sessions.count_active_participants(session_id).await.unwrap();
    assert_eq!(session.current_viewer_count as i64, active);
    assert_eq!(active, 1);
    assert_eq!(session.max_viewer_count, 2);

    // A stray decrement clamps at zero instead of going negative.
    sessions.mark_participant_left(session_id, alice).await.unwrap();
    sessions.decrement_viewers(session_id).await.unwrap();
    assert_eq!(sessions.decrement_viewers(session_id).await.unwrap(), 0);
}

#[sqlx::test]
async fn duplicate_delivery_yields_one_processed_and_one_skipped_row(pool: PgPool) {
    let pool = Arc::new(pool);
    let log = WebhookLogDb::new(pool.clone());
    let payload = serde_json::json!({ "event": "room_started" });
    let event = NewWebhookEvent {
        dedup_key: "room_started:RM_1:-:1724650000",
        event_type: "room_started",
        room_name: "video_live:creator",
        room_sid: "RM_1",
        participant_identity: None,
        participant_sid: None,
        raw_payload: &payload,
    };

    let first = log.try_insert_processed(&event).await.unwrap();
    assert!(first.is_some());

    // The redelivery loses the claim and is recorded as skipped.
    let second = log.try_insert_processed(&event).await.unwrap();
    assert!(second.is_none());
    log.insert_skipped(&event, 1).await.unwrap();

    let count_by = |status: ProcessingStatus| {
        let log = log.clone();
        async move {
            log.count_events(&WebhookLogFilter {
                status: Some(status),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap()
        }
    };
    assert_eq!(count_by(ProcessingStatus::Success).await, 1);
    assert_eq!(count_by(ProcessingStatus::Skipped).await, 1);
    assert_eq!(count_by(ProcessingStatus::Error).await, 0);
}

#[sqlx::test]
async fn second_action_on_resolved_report_conflicts_without_mutation(pool: PgPool) {
    let pool = Arc::new(pool);
    let sessions = SessionsDb::new(pool.clone());
    let reports = ReportsDb::new(pool.clone());
    let dispatcher = dispatcher(&pool);

    let session_id = seed_session(&sessions).await;
    let report = reports
        .create_report(CreateReportInput {
            reported_user_id: Uuid::new_v4(),
            reporter_id: Uuid::new_v4(),
            session_id,
            reason: "spam".to_string(),
        })
        .await
        .unwrap();
    let first_admin = Uuid::new_v4();

    let resolved = dispatcher
        .dispatch(
            report.id,
            first_admin,
            &ActionRequest {
                action: ModerationAction::Dismiss,
                ban_duration_hours: None,
                notes: Some("no violation".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(resolved.status, ReportStatus::Dismissed);

    let second = dispatcher
        .dispatch(
            report.id,
            Uuid::new_v4(),
            &ActionRequest {
                action: ModerationAction::Warn,
                ban_duration_hours: None,
                notes: None,
            },
        )
        .await;
    assert!(matches!(second, Err(AppError::Conflict(_))));

    // The losing verdict must not have touched the resolved row.
    let after = reports.get_report(report.id).await.unwrap().unwrap();
    assert_eq!(after.status, ReportStatus::Dismissed);
    assert_eq!(after.action_taken, resolved.action_taken);
    assert_eq!(after.resolved_at, resolved.resolved_at);
    assert_eq!(after.resolved_by, Some(first_admin));
    assert_eq!(after.admin_notes.as_deref(), Some("no violation"));
}
