//! Webhook payload parsing and normalized event variants
//!
//! The media server delivers loosely-typed JSON. Everything is validated
//! into a closed set of variants at the ingestion boundary; an
//! unrecognized `eventType` normalizes to nothing and the delivery is
//! logged as skipped rather than dropped mid-pipeline.
//!
//! Conventions issued by the signaling layer:
//! - room names are `<session_type>:<creator_uuid>` (a display slug may
//!   follow as a third segment)
//! - media identities carry the participant's user UUID, optionally
//!   namespaced with a role prefix such as `admin:<uuid>`

use serde::Deserialize;
use uuid::Uuid;

use super::SessionType;

#[derive(Debug, Clone, Deserialize)]
pub struct RoomInfo {
    pub name: String,
    pub sid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParticipantInfo {
    pub identity: String,
    pub sid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    /// The host track whose loss puts the session on the grace-period clock
    pub fn essential_for(session_type: SessionType) -> TrackKind {
        match session_type {
            SessionType::VideoLive => TrackKind::Video,
            SessionType::AudioRoom => TrackKind::Audio,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackInfo {
    pub sid: Option<String>,
    pub kind: TrackKind,
}

/// Raw webhook body as delivered by the media server
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEnvelope {
    pub event_type: String,
    pub room: RoomInfo,
    #[serde(default)]
    pub participant: Option<ParticipantInfo>,
    #[serde(default)]
    pub track: Option<TrackInfo>,
    /// Unix timestamp (seconds) assigned by the media server
    pub created_at: i64,
}

impl WebhookEnvelope {
    /// Replay-tolerance key. Media servers retry webhooks, so identical
    /// deliveries must collapse onto one processed log row.
    pub fn dedup_key(&self) -> String {
        let participant_sid = self
            .participant
            .as_ref()
            .map(|p| p.sid.as_str())
            .unwrap_or("-");
        format!(
            "{}:{}:{}:{}",
            self.event_type, self.room.sid, participant_sid, self.created_at
        )
    }

    /// Normalize into a typed event, or None for event types this
    /// service does not reconcile.
    pub fn normalize(&self) -> Option<LiveEvent> {
        let room_sid = self.room.sid.clone();
        match self.event_type.as_str() {
            "room_started" => Some(LiveEvent::RoomStarted {
                room_name: self.room.name.clone(),
                room_sid,
            }),
            "room_finished" => Some(LiveEvent::RoomFinished { room_sid }),
            "participant_joined" => self.participant.as_ref().map(|p| LiveEvent::ParticipantJoined {
                room_sid,
                identity: p.identity.clone(),
            }),
            "participant_left" => self.participant.as_ref().map(|p| LiveEvent::ParticipantLeft {
                room_sid,
                identity: p.identity.clone(),
            }),
            "track_published" => match (&self.participant, &self.track) {
                (Some(p), Some(t)) => Some(LiveEvent::TrackPublished {
                    room_sid,
                    identity: p.identity.clone(),
                    kind: t.kind,
                }),
                _ => None,
            },
            "track_unpublished" => match (&self.participant, &self.track) {
                (Some(p), Some(t)) => Some(LiveEvent::TrackUnpublished {
                    room_sid,
                    identity: p.identity.clone(),
                    kind: t.kind,
                }),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Validated event applied to canonical session/participant state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    RoomStarted {
        room_name: String,
        room_sid: String,
    },
    RoomFinished {
        room_sid: String,
    },
    ParticipantJoined {
        room_sid: String,
        identity: String,
    },
    ParticipantLeft {
        room_sid: String,
        identity: String,
    },
    TrackPublished {
        room_sid: String,
        identity: String,
        kind: TrackKind,
    },
    TrackUnpublished {
        room_sid: String,
        identity: String,
        kind: TrackKind,
    },
}

impl LiveEvent {
    pub fn room_sid(&self) -> &str {
        match self {
            LiveEvent::RoomStarted { room_sid, .. }
            | LiveEvent::RoomFinished { room_sid }
            | LiveEvent::ParticipantJoined { room_sid, .. }
            | LiveEvent::ParticipantLeft { room_sid, .. }
            | LiveEvent::TrackPublished { room_sid, .. }
            | LiveEvent::TrackUnpublished { room_sid, .. } => room_sid,
        }
    }
}

/// Parse `<session_type>:<creator_uuid>[:slug]` room names.
pub fn parse_room_name(name: &str) -> Option<(SessionType, Uuid)> {
    let mut parts = name.splitn(3, ':');
    let session_type = match parts.next()? {
        "video_live" => SessionType::VideoLive,
        "audio_room" => SessionType::AudioRoom,
        _ => return None,
    };
    let creator_id = Uuid::parse_str(parts.next()?).ok()?;
    Some((session_type, creator_id))
}

/// Extract the user id from an opaque media identity, tolerating role
/// prefixes (`admin:<uuid>`).
pub fn user_id_from_identity(identity: &str) -> Option<Uuid> {
    let candidate = identity.rsplit(':').next()?;
    Uuid::parse_str(candidate).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(event_type: &str) -> WebhookEnvelope {
        serde_json::from_value(json!({
            "eventType": event_type,
            "room": {"name": "video_live:7f8ad1ce-95a7-4f3a-93a4-1c6bfb6c0f40", "sid": "RM_abc"},
            "participant": {"identity": "6a7e4b39-12f8-4b21-8a00-0cdb8ad7e2b5", "sid": "PA_1"},
            "track": {"sid": "TR_1", "kind": "video"},
            "createdAt": 1700000000
        }))
        .unwrap()
    }

    #[test]
    fn dedup_key_includes_all_identifying_fields() {
        let env = envelope("participant_joined");
        assert_eq!(
            env.dedup_key(),
            "participant_joined:RM_abc:PA_1:1700000000"
        );
    }

    #[test]
    fn dedup_key_without_participant_uses_placeholder() {
        let env: WebhookEnvelope = serde_json::from_value(json!({
            "eventType": "room_started",
            "room": {"name": "audio_room:7f8ad1ce-95a7-4f3a-93a4-1c6bfb6c0f40", "sid": "RM_x"},
            "createdAt": 1700000001
        }))
        .unwrap();
        assert_eq!(env.dedup_key(), "room_started:RM_x:-:1700000001");
    }

    #[test]
    fn unknown_event_type_normalizes_to_none() {
        let env = envelope("egress_ended");
        assert!(env.normalize().is_none());
    }

    #[test]
    fn track_events_require_participant_and_track() {
        let mut env = envelope("track_published");
        assert!(matches!(
            env.normalize(),
            Some(LiveEvent::TrackPublished { kind: TrackKind::Video, .. })
        ));
        env.track = None;
        assert!(env.normalize().is_none());
    }

    #[test]
    fn room_name_parses_type_and_creator() {
        let (session_type, creator) =
            parse_room_name("audio_room:7f8ad1ce-95a7-4f3a-93a4-1c6bfb6c0f40:friday-hang").unwrap();
        assert_eq!(session_type, SessionType::AudioRoom);
        assert_eq!(
            creator,
            Uuid::parse_str("7f8ad1ce-95a7-4f3a-93a4-1c6bfb6c0f40").unwrap()
        );
        assert!(parse_room_name("vod:7f8ad1ce-95a7-4f3a-93a4-1c6bfb6c0f40").is_none());
        assert!(parse_room_name("video_live:not-a-uuid").is_none());
    }

    #[test]
    fn identity_parsing_tolerates_role_prefix() {
        let id = "6a7e4b39-12f8-4b21-8a00-0cdb8ad7e2b5";
        assert_eq!(user_id_from_identity(id).unwrap().to_string(), id);
        assert_eq!(
            user_id_from_identity(&format!("admin:{id}")).unwrap().to_string(),
            id
        );
        assert!(user_id_from_identity("screenshare-bot").is_none());
    }

    #[test]
    fn essential_track_follows_session_type() {
        assert_eq!(
            TrackKind::essential_for(SessionType::VideoLive),
            TrackKind::Video
        );
        assert_eq!(
            TrackKind::essential_for(SessionType::AudioRoom),
            TrackKind::Audio
        );
    }
}
