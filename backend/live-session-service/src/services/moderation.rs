//! Moderation action dispatch
//!
//! An admin verdict on a report resolves the report, applies the
//! enforcement side effect, and writes the audit entry, all inside one
//! transaction. The report row is locked for the duration, so two
//! admins acting on the same report race for the lock and the loser
//! sees a conflict instead of a double enforcement. Notifications and
//! broadcasts go out only after commit.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{BansDb, REPORT_COLUMNS};
use crate::error::{AppError, Result};
use crate::models::{
    BanRecord, BanScope, CreateBanInput, ModerationAction, ModerationReport, ReportStatus,
};
use crate::realtime::{Broadcaster, LiveUpdate, LiveUpdateKind, ModerationNotice, Notifier};
use crate::services::bans::BanResolver;

/// Admin verdict payload
#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub action: ModerationAction,
    /// Timed-ban length; absent or non-positive means permanent
    pub ban_duration_hours: Option<i64>,
    pub notes: Option<String>,
}

const MAX_DISPATCH_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 100;

/// Retry an operation with bounded exponential backoff as long as it
/// keeps failing transiently. The first non-transient outcome (success
/// or hard error) is returned as-is.
async fn retry_transient<T, F, Fut>(operation: &'static str, mut run: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut outcome = run().await;
    for attempt in 2..=MAX_DISPATCH_ATTEMPTS {
        match &outcome {
            Err(e) if e.is_transient() => {
                let delay = RETRY_BASE_DELAY_MS << (attempt - 2);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay,
                    error = %e,
                    "Transient failure; retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                outcome = run().await;
            }
            _ => break,
        }
    }
    outcome
}

/// Report status and audit label each verdict maps onto
fn verdict_effects(action: ModerationAction) -> (ReportStatus, Option<&'static str>) {
    match action {
        ModerationAction::Dismiss => (ReportStatus::Dismissed, None),
        ModerationAction::Warn => (ReportStatus::Resolved, Some("warning_sent")),
        ModerationAction::Kick => (ReportStatus::Resolved, Some("kicked")),
        ModerationAction::BanSession => (ReportStatus::Resolved, Some("session_ban")),
        ModerationAction::BanCreator => (ReportStatus::Resolved, Some("creator_ban")),
        ModerationAction::BanGlobal => (ReportStatus::Resolved, Some("global_ban")),
    }
}

pub struct ModerationDispatcher {
    pool: Arc<PgPool>,
    bans: BansDb,
    resolver: Arc<BanResolver>,
    notifier: Arc<dyn Notifier>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl ModerationDispatcher {
    pub fn new(
        pool: Arc<PgPool>,
        bans: BansDb,
        resolver: Arc<BanResolver>,
        notifier: Arc<dyn Notifier>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            pool,
            bans,
            resolver,
            notifier,
            broadcaster,
        }
    }

    /// Apply an admin verdict, retrying transient storage failures. The
    /// locked read plus the pending check make a retried transaction
    /// idempotent: a retry either replays a rolled-back attempt or sees
    /// the already-committed resolution and reports the conflict.
    pub async fn dispatch(
        &self,
        report_id: Uuid,
        actor_id: Uuid,
        request: &ActionRequest,
    ) -> Result<ModerationReport> {
        retry_transient("moderation_dispatch", || {
            self.dispatch_once(report_id, actor_id, request)
        })
        .await
    }

    async fn dispatch_once(
        &self,
        report_id: Uuid,
        actor_id: Uuid,
        request: &ActionRequest,
    ) -> Result<ModerationReport> {
        let mut tx = self.pool.begin().await?;

        let report = sqlx::query_as::<_, ModerationReport>(&format!(
            "SELECT {REPORT_COLUMNS} FROM moderation_reports WHERE id = $1 FOR UPDATE"
        ))
        .bind(report_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("report {report_id} not found")))?;

        if report.status != ReportStatus::Pending {
            // Dropping the transaction rolls back the lock.
            return Err(AppError::Conflict(format!(
                "report {report_id} was already resolved"
            )));
        }

        let mut kicked = false;
        match request.action {
            ModerationAction::Dismiss | ModerationAction::Warn => {}
            ModerationAction::Kick => {
                kicked = self.kick_in_tx(&mut tx, &report).await?;
            }
            ModerationAction::BanSession
            | ModerationAction::BanCreator
            | ModerationAction::BanGlobal => {
                let input = self
                    .ban_input_for(&mut tx, &report, actor_id, request)
                    .await?;
                // A scope/target mismatch here is a bug in this match,
                // not admin input.
                input.validate().map_err(AppError::Fatal)?;
                insert_ban_in_tx(&mut tx, &input).await?;
            }
        }

        let (new_status, action_taken) = verdict_effects(request.action);
        let updated = sqlx::query_as::<_, ModerationReport>(&format!(
            r#"
            UPDATE moderation_reports
            SET status = $2, action_taken = $3, resolved_by = $4,
                resolved_at = NOW(), admin_notes = $5
            WHERE id = $1
            RETURNING {REPORT_COLUMNS}
            "#
        ))
        .bind(report.id)
        .bind(new_status)
        .bind(action_taken)
        .bind(actor_id)
        .bind(request.notes.as_deref())
        .fetch_one(&mut *tx)
        .await?;

        // Every verdict is audited, including dismissals.
        sqlx::query(
            r#"
            INSERT INTO admin_actions (actor_id, action, target_id, details)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(actor_id)
        .bind(request.action.as_str())
        .bind(report.reported_user_id)
        .bind(json!({
            "report_id": report.id,
            "session_id": report.session_id,
            "notes": request.notes,
        }))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.post_commit(&report, request, kicked).await;

        info!(
            report_id = %report.id,
            actor_id = %actor_id,
            action = request.action.as_str(),
            "Moderation action dispatched"
        );
        Ok(updated)
    }

    /// Revoke a ban and audit the revocation. Cached decisions for the
    /// user are dropped so the next check sees the lifted ban.
    pub async fn revoke_ban(&self, ban_id: Uuid, actor_id: Uuid) -> Result<BanRecord> {
        let Some(ban) = self.bans.revoke_ban(ban_id, actor_id).await? else {
            return match self.bans.get_ban(ban_id).await? {
                Some(_) => Err(AppError::Conflict(format!("ban {ban_id} already revoked"))),
                None => Err(AppError::NotFound(format!("ban {ban_id} not found"))),
            };
        };

        sqlx::query(
            r#"
            INSERT INTO admin_actions (actor_id, action, target_id, details)
            VALUES ($1, 'ban_revoked', $2, $3)
            "#,
        )
        .bind(actor_id)
        .bind(ban.banned_user_id)
        .bind(json!({ "ban_id": ban.id, "scope": ban.scope }))
        .execute(&*self.pool)
        .await?;

        self.resolver.invalidate_user(ban.banned_user_id);
        info!(ban_id = %ban.id, actor_id = %actor_id, "Ban revoked");
        Ok(ban)
    }

    async fn kick_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        report: &ModerationReport,
    ) -> Result<bool> {
        let removed = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE session_participants
            SET status = 'kicked', left_at = NOW()
            WHERE session_id = $1 AND user_id = $2 AND status = 'active'
            RETURNING id
            "#,
        )
        .bind(report.session_id)
        .bind(report.reported_user_id)
        .fetch_optional(&mut **tx)
        .await?;

        if removed.is_none() {
            // Kicking someone who already left still resolves the report.
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE live_sessions
            SET current_viewer_count = GREATEST(0, current_viewer_count - 1)
            WHERE id = $1
            "#,
        )
        .bind(report.session_id)
        .execute(&mut **tx)
        .await?;
        Ok(true)
    }

    async fn ban_input_for(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        report: &ModerationReport,
        actor_id: Uuid,
        request: &ActionRequest,
    ) -> Result<CreateBanInput> {
        let (scope, session_id, creator_id, duration_hours) = match request.action {
            ModerationAction::BanSession => (
                BanScope::Session,
                Some(report.session_id),
                None,
                request.ban_duration_hours,
            ),
            ModerationAction::BanCreator => {
                let creator_id = sqlx::query_scalar::<_, Uuid>(
                    "SELECT creator_id FROM live_sessions WHERE id = $1",
                )
                .bind(report.session_id)
                .fetch_optional(&mut **tx)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!("session {} not found", report.session_id))
                })?;
                (
                    BanScope::Creator,
                    None,
                    Some(creator_id),
                    request.ban_duration_hours,
                )
            }
            // Global bans are always permanent.
            ModerationAction::BanGlobal => (BanScope::Global, None, None, None),
            _ => {
                return Err(AppError::Fatal(format!(
                    "{:?} is not a ban action",
                    request.action
                )))
            }
        };

        Ok(CreateBanInput {
            scope,
            banned_user_id: report.reported_user_id,
            banned_by: actor_id,
            session_id,
            creator_id,
            reason: report.reason.clone(),
            duration_hours,
        })
    }

    async fn post_commit(&self, report: &ModerationReport, request: &ActionRequest, kicked: bool) {
        match request.action {
            ModerationAction::Dismiss => {}
            ModerationAction::Warn => {
                self.notifier
                    .notify(
                        report.reported_user_id,
                        ModerationNotice {
                            kind: "warning",
                            session_id: report.session_id,
                            reason: report.reason.clone(),
                        },
                    )
                    .await;
            }
            ModerationAction::Kick => {
                if kicked {
                    self.broadcaster
                        .publish(LiveUpdate {
                            session_id: report.session_id,
                            kind: LiveUpdateKind::Kicked {
                                user_id: report.reported_user_id,
                            },
                        })
                        .await;
                }
            }
            ModerationAction::BanSession
            | ModerationAction::BanCreator
            | ModerationAction::BanGlobal => {
                self.resolver.invalidate_user(report.reported_user_id);
            }
        }
    }
}

async fn insert_ban_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    input: &CreateBanInput,
) -> Result<Uuid> {
    let now = chrono::Utc::now();
    let id = sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO session_bans (
            scope, banned_user_id, banned_by, session_id, creator_id,
            reason, is_permanent, expires_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id
        "#,
    )
    .bind(input.scope)
    .bind(input.banned_user_id)
    .bind(input.banned_by)
    .bind(input.session_id)
    .bind(input.creator_id)
    .bind(&input.reason)
    .bind(input.is_permanent())
    .bind(input.expires_at(now))
    .fetch_one(&mut **tx)
    .await?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_to_success() {
        let attempts = AtomicU32::new(0);
        let result = retry_transient("test_op", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(AppError::Transient("pool timed out".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_failures_are_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = retry_transient("test_op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::Conflict("already resolved".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_at_the_attempt_bound() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = retry_transient("test_op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::Transient("still down".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(AppError::Transient(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_DISPATCH_ATTEMPTS);
    }

    #[test]
    fn dismiss_closes_without_enforcement_label() {
        assert_eq!(
            verdict_effects(ModerationAction::Dismiss),
            (ReportStatus::Dismissed, None)
        );
    }

    #[test]
    fn enforcement_verdicts_resolve_with_labels() {
        assert_eq!(
            verdict_effects(ModerationAction::Warn),
            (ReportStatus::Resolved, Some("warning_sent"))
        );
        assert_eq!(
            verdict_effects(ModerationAction::Kick),
            (ReportStatus::Resolved, Some("kicked"))
        );
        assert_eq!(
            verdict_effects(ModerationAction::BanGlobal),
            (ReportStatus::Resolved, Some("global_ban"))
        );
    }
}
