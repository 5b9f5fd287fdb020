//! Canonical session, participant, ban and report records

pub mod events;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "session_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    VideoLive,
    AudioRoom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "session_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Live,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "participant_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Active,
    Left,
    Kicked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ban_scope", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BanScope {
    Session,
    Creator,
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "processing_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Success,
    Error,
    Skipped,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Success => "success",
            ProcessingStatus::Error => "error",
            ProcessingStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "report_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Resolved,
    Dismissed,
}

/// One live broadcast or audio room, bounded by room_started/room_finished
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LiveSession {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub session_type: SessionType,
    pub status: SessionStatus,
    pub room_name: String,
    pub room_sid: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub current_viewer_count: i32,
    pub max_viewer_count: i32,
    pub duration_seconds: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl LiveSession {
    /// Duration for display: computed live for running sessions,
    /// persisted once the session ends.
    pub fn effective_duration_seconds(&self, now: DateTime<Utc>) -> i64 {
        match self.duration_seconds {
            Some(d) => d,
            None => (now - self.started_at).num_seconds().max(0),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SessionParticipant {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub media_identity: String,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub status: ParticipantStatus,
    pub camera_on: bool,
    pub mic_on: bool,
}

/// Access restriction record. Never physically deleted; revocation flips
/// `is_active`, expiry leaves the row in place but inert.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BanRecord {
    pub id: Uuid,
    pub scope: BanScope,
    pub banned_user_id: Uuid,
    pub banned_by: Uuid,
    pub session_id: Option<Uuid>,
    pub creator_id: Option<Uuid>,
    pub reason: String,
    pub is_permanent: bool,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<Uuid>,
}

impl BanRecord {
    /// Expired bans stay in the table for audit history but never bar anyone.
    pub fn is_inert_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|e| e <= now).unwrap_or(false)
    }
}

/// Input for creating a new ban
#[derive(Debug, Clone)]
pub struct CreateBanInput {
    pub scope: BanScope,
    pub banned_user_id: Uuid,
    pub banned_by: Uuid,
    pub session_id: Option<Uuid>,
    pub creator_id: Option<Uuid>,
    pub reason: String,
    pub duration_hours: Option<i64>,
}

impl CreateBanInput {
    /// Scope and target fields must be mutually consistent. A mismatch is an
    /// invariant violation, not bad user input.
    pub fn validate(&self) -> Result<(), String> {
        match self.scope {
            BanScope::Session if self.session_id.is_none() || self.creator_id.is_some() => Err(
                "session-scoped ban requires session_id and no creator_id".to_string(),
            ),
            BanScope::Creator if self.creator_id.is_none() || self.session_id.is_some() => Err(
                "creator-scoped ban requires creator_id and no session_id".to_string(),
            ),
            BanScope::Global if self.session_id.is_some() || self.creator_id.is_some() => {
                Err("global ban carries neither session_id nor creator_id".to_string())
            }
            _ => Ok(()),
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.duration_hours.filter(|&h| h > 0).is_none()
    }

    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.duration_hours
            .filter(|&h| h > 0)
            .map(|h| now + chrono::Duration::hours(h))
    }
}

/// Immutable record of one inbound media-server webhook delivery
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WebhookEventRow {
    pub id: Uuid,
    pub dedup_key: String,
    pub event_type: String,
    pub room_name: String,
    pub room_sid: String,
    pub participant_identity: Option<String>,
    pub participant_sid: Option<String>,
    pub session_id: Option<Uuid>,
    pub raw_payload: serde_json::Value,
    pub processing_status: ProcessingStatus,
    pub error_message: Option<String>,
    pub processing_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ModerationReport {
    pub id: Uuid,
    pub reported_user_id: Uuid,
    pub reporter_id: Uuid,
    pub session_id: Uuid,
    pub reason: String,
    pub status: ReportStatus,
    pub action_taken: Option<String>,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub admin_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a new report
#[derive(Debug)]
pub struct CreateReportInput {
    pub reported_user_id: Uuid,
    pub reporter_id: Uuid,
    pub session_id: Uuid,
    pub reason: String,
}

/// Admin verdict on a moderation report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    Dismiss,
    Warn,
    Kick,
    BanSession,
    BanCreator,
    BanGlobal,
}

impl ModerationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationAction::Dismiss => "dismiss",
            ModerationAction::Warn => "warn",
            ModerationAction::Kick => "kick",
            ModerationAction::BanSession => "ban_session",
            ModerationAction::BanCreator => "ban_creator",
            ModerationAction::BanGlobal => "ban_global",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input(scope: BanScope) -> CreateBanInput {
        CreateBanInput {
            scope,
            banned_user_id: Uuid::new_v4(),
            banned_by: Uuid::new_v4(),
            session_id: None,
            creator_id: None,
            reason: "spam".to_string(),
            duration_hours: None,
        }
    }

    #[test]
    fn ban_input_scope_consistency() {
        let mut session_ban = base_input(BanScope::Session);
        assert!(session_ban.validate().is_err());
        session_ban.session_id = Some(Uuid::new_v4());
        assert!(session_ban.validate().is_ok());
        session_ban.creator_id = Some(Uuid::new_v4());
        assert!(session_ban.validate().is_err());

        let mut global_ban = base_input(BanScope::Global);
        assert!(global_ban.validate().is_ok());
        global_ban.creator_id = Some(Uuid::new_v4());
        assert!(global_ban.validate().is_err());
    }

    #[test]
    fn ban_duration_drives_permanence() {
        let mut input = base_input(BanScope::Global);
        assert!(input.is_permanent());
        assert!(input.expires_at(Utc::now()).is_none());

        input.duration_hours = Some(24);
        assert!(!input.is_permanent());
        let expiry = input.expires_at(Utc::now()).unwrap();
        assert!(expiry > Utc::now());
    }

    #[test]
    fn expired_ban_is_inert() {
        let now = Utc::now();
        let ban = BanRecord {
            id: Uuid::new_v4(),
            scope: BanScope::Global,
            banned_user_id: Uuid::new_v4(),
            banned_by: Uuid::new_v4(),
            session_id: None,
            creator_id: None,
            reason: "abuse".to_string(),
            is_permanent: false,
            is_active: true,
            expires_at: Some(now - chrono::Duration::minutes(1)),
            created_at: now - chrono::Duration::hours(2),
            revoked_at: None,
            revoked_by: None,
        };
        assert!(ban.is_inert_at(now));
        assert!(!ban.is_inert_at(now - chrono::Duration::hours(1)));
    }

    #[test]
    fn live_session_duration_is_computed_until_persisted() {
        let now = Utc::now();
        let mut session = LiveSession {
            id: Uuid::new_v4(),
            creator_id: Uuid::new_v4(),
            session_type: SessionType::VideoLive,
            status: SessionStatus::Live,
            room_name: "video_live:abc".to_string(),
            room_sid: "RM_1".to_string(),
            started_at: now - chrono::Duration::seconds(90),
            ended_at: None,
            current_viewer_count: 3,
            max_viewer_count: 5,
            duration_seconds: None,
            created_at: now,
        };
        assert_eq!(session.effective_duration_seconds(now), 90);
        session.duration_seconds = Some(60);
        assert_eq!(session.effective_duration_seconds(now), 60);
    }
}
