//! Webhook-to-state reconciliation
//!
//! Applies normalized media-server events to the session and
//! participant tables. Events for the same room are serialized through
//! a per-room async mutex so out-of-order webhook delivery cannot
//! interleave writes; events for different rooms proceed concurrently.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::SessionsDb;
use crate::error::{AppError, Result};
use crate::models::events::{parse_room_name, user_id_from_identity, LiveEvent, TrackKind};
use crate::models::LiveSession;
use crate::services::bans::BanResolver;
use crate::services::disconnect::DisconnectSupervisor;

pub struct SessionReconciler {
    sessions: SessionsDb,
    supervisor: Arc<DisconnectSupervisor>,
    resolver: Arc<BanResolver>,
    room_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionReconciler {
    pub fn new(
        sessions: SessionsDb,
        supervisor: Arc<DisconnectSupervisor>,
        resolver: Arc<BanResolver>,
    ) -> Self {
        Self {
            sessions,
            supervisor,
            resolver,
            room_locks: DashMap::new(),
        }
    }

    /// Apply one event to durable state. Returns the session the event
    /// touched, when one could be resolved.
    pub async fn apply(&self, event: &LiveEvent) -> Result<Option<Uuid>> {
        let room_sid = event.room_sid().to_string();
        let lock = self
            .room_locks
            .entry(room_sid.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _room_serial = lock.lock().await;

        match event {
            LiveEvent::RoomStarted {
                room_name,
                room_sid,
            } => self.room_started(room_name, room_sid).await,
            LiveEvent::RoomFinished { room_sid } => self.room_finished(room_sid).await,
            LiveEvent::ParticipantJoined { room_sid, identity } => {
                self.participant_joined(room_sid, identity).await
            }
            LiveEvent::ParticipantLeft { room_sid, identity } => {
                self.participant_left(room_sid, identity).await
            }
            LiveEvent::TrackPublished {
                room_sid,
                identity,
                kind,
            } => self.track_changed(room_sid, identity, *kind, true).await,
            LiveEvent::TrackUnpublished {
                room_sid,
                identity,
                kind,
            } => self.track_changed(room_sid, identity, *kind, false).await,
        }
    }

    async fn room_started(&self, room_name: &str, room_sid: &str) -> Result<Option<Uuid>> {
        let (session_type, creator_id) = parse_room_name(room_name).ok_or_else(|| {
            AppError::Validation(format!("unparseable room name: {room_name}"))
        })?;

        // Upserting on room_sid makes webhook redelivery a no-op here.
        let session = self
            .sessions
            .create_session(room_name, room_sid, creator_id, session_type)
            .await?;

        info!(
            session_id = %session.id,
            creator_id = %creator_id,
            session_type = ?session_type,
            room_sid = %room_sid,
            "Live session started"
        );
        Ok(Some(session.id))
    }

    async fn room_finished(&self, room_sid: &str) -> Result<Option<Uuid>> {
        let Some(session) = self.sessions.get_session_by_room_sid(room_sid).await? else {
            warn!(room_sid = %room_sid, "room_finished for unknown room");
            return Ok(None);
        };

        match self.sessions.end_session(session.id).await? {
            Some(ended) => {
                info!(
                    session_id = %ended.id,
                    duration_seconds = ended.duration_seconds.unwrap_or(0),
                    max_viewers = ended.max_viewer_count,
                    "Live session ended"
                );
            }
            None => {
                debug!(session_id = %session.id, "Session already ended");
            }
        }

        // The countdown loses its purpose once the room is gone; no
        // session_ended broadcast from this path, room_finished is the
        // authoritative signal.
        self.supervisor.cancel(session.id);
        // Ban decisions are scoped to the session's lifetime.
        self.resolver.invalidate_session(session.id);
        self.room_locks.remove(room_sid);
        Ok(Some(session.id))
    }

    async fn participant_joined(&self, room_sid: &str, identity: &str) -> Result<Option<Uuid>> {
        let session = self.require_session(room_sid).await?;
        let user_id = parse_identity(identity)?;

        // The upsert reports whether the row actually transitioned to
        // active; a duplicate join for an already-active participant
        // must not inflate the viewer count.
        let activated = self
            .sessions
            .activate_participant(session.id, user_id, identity)
            .await?;
        if activated {
            let count = self.sessions.increment_viewers(session.id).await?;
            debug!(
                session_id = %session.id,
                user_id = %user_id,
                viewer_count = count,
                "Participant joined"
            );
        } else {
            debug!(
                session_id = %session.id,
                user_id = %user_id,
                "Duplicate join ignored"
            );
        }
        Ok(Some(session.id))
    }

    async fn participant_left(&self, room_sid: &str, identity: &str) -> Result<Option<Uuid>> {
        let session = self.require_session(room_sid).await?;
        let user_id = parse_identity(identity)?;

        let deactivated = self
            .sessions
            .mark_participant_left(session.id, user_id)
            .await?;
        if deactivated {
            let count = self.sessions.decrement_viewers(session.id).await?;
            debug!(
                session_id = %session.id,
                user_id = %user_id,
                viewer_count = count,
                "Participant left"
            );
        } else {
            debug!(
                session_id = %session.id,
                user_id = %user_id,
                "Leave for non-active participant ignored"
            );
        }
        Ok(Some(session.id))
    }

    async fn track_changed(
        &self,
        room_sid: &str,
        identity: &str,
        kind: TrackKind,
        published: bool,
    ) -> Result<Option<Uuid>> {
        let session = self.require_session(room_sid).await?;
        let user_id = parse_identity(identity)?;

        let (camera, mic) = match kind {
            TrackKind::Video => (Some(published), None),
            TrackKind::Audio => (None, Some(published)),
        };
        self.sessions
            .set_track_flag(session.id, user_id, camera, mic)
            .await?;

        if self.is_essential_host_track(&session, user_id, kind) {
            if published {
                self.supervisor
                    .host_track_published(session.id, user_id)
                    .await;
            } else {
                self.supervisor.host_track_lost(session.id, user_id);
            }
        }
        Ok(Some(session.id))
    }

    /// The track the session cannot continue without: video for video
    /// sessions, audio for audio rooms, and only when the host owns it.
    fn is_essential_host_track(&self, session: &LiveSession, user_id: Uuid, kind: TrackKind) -> bool {
        user_id == session.creator_id && kind == TrackKind::essential_for(session.session_type)
    }

    async fn require_session(&self, room_sid: &str) -> Result<LiveSession> {
        self.sessions
            .get_session_by_room_sid(room_sid)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no session for room {room_sid}")))
    }
}

fn parse_identity(identity: &str) -> Result<Uuid> {
    user_id_from_identity(identity)
        .ok_or_else(|| AppError::Validation(format!("unparseable participant identity: {identity}")))
}
