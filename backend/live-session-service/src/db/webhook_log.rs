//! Append-only webhook event log
//!
//! The system's source of truth for "what actually happened",
//! independent of any derived state. Rows are never mutated after the
//! fact except for the single error finalization on the row just
//! written.

use crate::error::Result;
use crate::models::{ProcessingStatus, WebhookEventRow};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

const LOG_COLUMNS: &str = "id, dedup_key, event_type, room_name, room_sid, participant_identity, \
     participant_sid, session_id, raw_payload, processing_status, error_message, \
     processing_time_ms, created_at";

/// Fields captured for every inbound delivery
#[derive(Debug)]
pub struct NewWebhookEvent<'a> {
    pub dedup_key: &'a str,
    pub event_type: &'a str,
    pub room_name: &'a str,
    pub room_sid: &'a str,
    pub participant_identity: Option<&'a str>,
    pub participant_sid: Option<&'a str>,
    pub raw_payload: &'a serde_json::Value,
}

/// Query filters for the audit-trail endpoint
#[derive(Debug, Default)]
pub struct WebhookLogFilter {
    pub event_type: Option<String>,
    pub status: Option<ProcessingStatus>,
    pub room_name: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

/// Database operations for the webhook event log
#[derive(Clone)]
pub struct WebhookLogDb {
    pool: Arc<PgPool>,
}

impl WebhookLogDb {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Claim the dedup key and write the provisional log row. Returns
    /// None when another delivery already holds the key, which makes the
    /// caller record a skipped duplicate instead. The partial unique
    /// index arbitrates concurrent replays.
    pub async fn try_insert_processed(&self, event: &NewWebhookEvent<'_>) -> Result<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO webhook_event_log (
                dedup_key, event_type, room_name, room_sid,
                participant_identity, participant_sid, raw_payload, processing_status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'success')
            ON CONFLICT (dedup_key) WHERE processing_status <> 'skipped' DO NOTHING
            RETURNING id
            "#,
        )
        .bind(event.dedup_key)
        .bind(event.event_type)
        .bind(event.room_name)
        .bind(event.room_sid)
        .bind(event.participant_identity)
        .bind(event.participant_sid)
        .bind(event.raw_payload)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(id)
    }

    /// Record a replayed or unrecognized delivery as skipped.
    pub async fn insert_skipped(
        &self,
        event: &NewWebhookEvent<'_>,
        processing_time_ms: i64,
    ) -> Result<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO webhook_event_log (
                dedup_key, event_type, room_name, room_sid,
                participant_identity, participant_sid, raw_payload,
                processing_status, processing_time_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'skipped', $8)
            RETURNING id
            "#,
        )
        .bind(event.dedup_key)
        .bind(event.event_type)
        .bind(event.room_name)
        .bind(event.room_sid)
        .bind(event.participant_identity)
        .bind(event.participant_sid)
        .bind(event.raw_payload)
        .bind(processing_time_ms)
        .fetch_one(&*self.pool)
        .await?;

        Ok(id)
    }

    /// Finalize the row written by `try_insert_processed`: latency, the
    /// session the event mapped onto, and the error outcome if
    /// reconciliation failed. This is the only permitted update.
    pub async fn finalize(
        &self,
        id: Uuid,
        session_id: Option<Uuid>,
        error_message: Option<&str>,
        processing_time_ms: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_event_log
            SET session_id = $2,
                processing_status = CASE WHEN $3::TEXT IS NULL THEN processing_status ELSE 'error'::processing_status END,
                error_message = $3,
                processing_time_ms = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(session_id)
        .bind(error_message)
        .bind(processing_time_ms)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Downgrade a claimed row to skipped (event type not reconciled).
    /// Skipped rows leave the dedup index, which is fine: re-skipping a
    /// redelivery is idempotent.
    pub async fn mark_skipped(&self, id: Uuid, processing_time_ms: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_event_log
            SET processing_status = 'skipped', processing_time_ms = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(processing_time_ms)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_events(&self, filter: &WebhookLogFilter) -> Result<Vec<WebhookEventRow>> {
        let limit = filter.limit.clamp(1, 200);
        let rows = sqlx::query_as::<_, WebhookEventRow>(&format!(
            r#"
            SELECT {LOG_COLUMNS}
            FROM webhook_event_log
            WHERE ($1::TEXT IS NULL OR event_type = $1)
              AND ($2::processing_status IS NULL OR processing_status = $2)
              AND ($3::TEXT IS NULL OR room_name = $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#
        ))
        .bind(filter.event_type.as_deref())
        .bind(filter.status)
        .bind(filter.room_name.as_deref())
        .bind(limit)
        .bind(filter.offset.max(0))
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn count_events(&self, filter: &WebhookLogFilter) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM webhook_event_log
            WHERE ($1::TEXT IS NULL OR event_type = $1)
              AND ($2::processing_status IS NULL OR processing_status = $2)
              AND ($3::TEXT IS NULL OR room_name = $3)
            "#,
        )
        .bind(filter.event_type.as_deref())
        .bind(filter.status)
        .bind(filter.room_name.as_deref())
        .fetch_one(&*self.pool)
        .await?;

        Ok(count)
    }
}
