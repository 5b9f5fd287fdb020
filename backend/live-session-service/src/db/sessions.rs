//! Database operations for sessions and participants

use crate::error::Result;
use crate::models::{LiveSession, SessionStatus, SessionType};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

const SESSION_COLUMNS: &str = "id, creator_id, session_type, status, room_name, room_sid, \
     started_at, ended_at, current_viewer_count, max_viewer_count, duration_seconds, created_at";

/// Database operations for live sessions and their participants
#[derive(Clone)]
pub struct SessionsDb {
    pool: Arc<PgPool>,
}

impl SessionsDb {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create a session on room_started. Idempotent on room_sid so a
    /// replayed start event lands on the existing row.
    pub async fn create_session(
        &self,
        room_name: &str,
        room_sid: &str,
        creator_id: Uuid,
        session_type: SessionType,
    ) -> Result<LiveSession> {
        let session = sqlx::query_as::<_, LiveSession>(&format!(
            r#"
            INSERT INTO live_sessions (creator_id, session_type, room_name, room_sid)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (room_sid) DO UPDATE SET room_name = EXCLUDED.room_name
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(creator_id)
        .bind(session_type)
        .bind(room_name)
        .bind(room_sid)
        .fetch_one(&*self.pool)
        .await?;

        tracing::info!(
            session_id = %session.id,
            creator_id = %creator_id,
            room_sid = %room_sid,
            session_type = ?session_type,
            "Session created"
        );

        Ok(session)
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<Option<LiveSession>> {
        let session = sqlx::query_as::<_, LiveSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM live_sessions WHERE id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(session)
    }

    pub async fn get_session_by_room_sid(&self, room_sid: &str) -> Result<Option<LiveSession>> {
        let session = sqlx::query_as::<_, LiveSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM live_sessions WHERE room_sid = $1"
        ))
        .bind(room_sid)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(session)
    }

    /// Mark a session ended and persist its duration. Returns None when the
    /// session was already ended (replayed room_finished, or the grace
    /// timeout losing the race against an explicit finish).
    pub async fn end_session(&self, session_id: Uuid) -> Result<Option<LiveSession>> {
        let session = sqlx::query_as::<_, LiveSession>(&format!(
            r#"
            UPDATE live_sessions
            SET status = 'ended',
                ended_at = NOW(),
                duration_seconds = EXTRACT(EPOCH FROM (NOW() - started_at))::BIGINT
            WHERE id = $1 AND status = 'live'
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(session_id)
        .fetch_optional(&*self.pool)
        .await?;

        if let Some(ref ended) = session {
            tracing::info!(
                session_id = %session_id,
                duration_seconds = ?ended.duration_seconds,
                max_viewer_count = ended.max_viewer_count,
                "Session ended"
            );
        }

        Ok(session)
    }

    /// Create or reactivate a participant row. Returns true when the row
    /// transitioned to active (and the viewer count should be bumped),
    /// false when the participant was already active.
    pub async fn activate_participant(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        media_identity: &str,
    ) -> Result<bool> {
        let activated = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO session_participants (session_id, user_id, media_identity)
            VALUES ($1, $2, $3)
            ON CONFLICT (session_id, user_id) DO UPDATE
            SET status = 'active',
                left_at = NULL,
                joined_at = NOW(),
                media_identity = EXCLUDED.media_identity
            WHERE session_participants.status <> 'active'
            RETURNING id
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .bind(media_identity)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(activated.is_some())
    }

    /// Close a participant row on participant_left. Returns true when the
    /// row was active (and the viewer count should be decremented).
    pub async fn mark_participant_left(&self, session_id: Uuid, user_id: Uuid) -> Result<bool> {
        let closed = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE session_participants
            SET status = 'left', left_at = NOW()
            WHERE session_id = $1 AND user_id = $2 AND status = 'active'
            RETURNING id
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(closed.is_some())
    }

    /// Atomic viewer increment; peak count rides along in the same update.
    pub async fn increment_viewers(&self, session_id: Uuid) -> Result<i32> {
        let count = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE live_sessions
            SET current_viewer_count = current_viewer_count + 1,
                max_viewer_count = GREATEST(max_viewer_count, current_viewer_count + 1)
            WHERE id = $1
            RETURNING current_viewer_count
            "#,
        )
        .bind(session_id)
        .fetch_one(&*self.pool)
        .await?;

        Ok(count)
    }

    /// Floor-clamped decrement: under at-least-once delivery a left event
    /// can race ahead of its join accounting, so the count never goes
    /// negative at the datastore level.
    pub async fn decrement_viewers(&self, session_id: Uuid) -> Result<i32> {
        let count = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE live_sessions
            SET current_viewer_count = GREATEST(0, current_viewer_count - 1)
            WHERE id = $1
            RETURNING current_viewer_count
            "#,
        )
        .bind(session_id)
        .fetch_one(&*self.pool)
        .await?;

        Ok(count)
    }

    /// Update media-capability flags on track publish/unpublish
    pub async fn set_track_flag(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        camera: Option<bool>,
        mic: Option<bool>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE session_participants
            SET camera_on = COALESCE($3, camera_on),
                mic_on = COALESCE($4, mic_on)
            WHERE session_id = $1 AND user_id = $2
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .bind(camera)
        .bind(mic)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        session_type: Option<SessionType>,
        limit: i64,
    ) -> Result<Vec<LiveSession>> {
        let sessions = sqlx::query_as::<_, LiveSession>(&format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM live_sessions
            WHERE ($1::session_status IS NULL OR status = $1)
              AND ($2::session_type IS NULL OR session_type = $2)
            ORDER BY started_at DESC
            LIMIT $3
            "#
        ))
        .bind(status)
        .bind(session_type)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        Ok(sessions)
    }

    pub async fn count_active_participants(&self, session_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM session_participants WHERE session_id = $1 AND status = 'active'",
        )
        .bind(session_id)
        .fetch_one(&*self.pool)
        .await?;

        Ok(count)
    }

    // Rollup queries for the analytics aggregator

    pub async fn count_live_sessions(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM live_sessions WHERE status = 'live'")
                .fetch_one(&*self.pool)
                .await?;
        Ok(count)
    }

    pub async fn sum_live_viewers(&self) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(current_viewer_count), 0)::BIGINT FROM live_sessions WHERE status = 'live'",
        )
        .fetch_one(&*self.pool)
        .await?;
        Ok(total)
    }

    pub async fn sessions_per_creator(
        &self,
        window_hours: i64,
        limit: i64,
    ) -> Result<Vec<(Uuid, i64)>> {
        let rows = sqlx::query_as::<_, (Uuid, i64)>(
            r#"
            SELECT creator_id, COUNT(*) AS sessions
            FROM live_sessions
            WHERE started_at > NOW() - make_interval(hours => $1::INT)
            GROUP BY creator_id
            ORDER BY sessions DESC
            LIMIT $2
            "#,
        )
        .bind(window_hours)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn avg_ended_duration_seconds(&self, window_hours: i64) -> Result<f64> {
        let avg: f64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(AVG(duration_seconds), 0)::FLOAT8
            FROM live_sessions
            WHERE status = 'ended'
              AND ended_at > NOW() - make_interval(hours => $1::INT)
            "#,
        )
        .bind(window_hours)
        .fetch_one(&*self.pool)
        .await?;

        Ok(avg)
    }
}
