//! Server→client push channel
//!
//! Typed updates fan out over Redis pub/sub, one channel per session;
//! the edge tier relays them to connected clients. Broadcasts are
//! fire-and-forget and at-most-once: each countdown tick carries the
//! absolute remaining seconds, so a dropped tick heals on the next one.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::Serialize;
use uuid::Uuid;

use crate::metrics::observe_broadcast;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveUpdateKind {
    Countdown { remaining_seconds: i32 },
    Reconnected,
    SessionEnded,
    Kicked { user_id: Uuid },
}

impl LiveUpdateKind {
    pub fn type_label(&self) -> &'static str {
        match self {
            LiveUpdateKind::Countdown { .. } => "countdown",
            LiveUpdateKind::Reconnected => "reconnected",
            LiveUpdateKind::SessionEnded => "session_ended",
            LiveUpdateKind::Kicked { .. } => "kicked",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LiveUpdate {
    pub session_id: Uuid,
    #[serde(flatten)]
    pub kind: LiveUpdateKind,
}

/// Moderation notice pushed to a single user
#[derive(Debug, Clone, Serialize)]
pub struct ModerationNotice {
    pub kind: &'static str,
    pub session_id: Uuid,
    pub reason: String,
}

/// One-to-many push to everyone in a session
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn publish(&self, update: LiveUpdate);
}

/// One-to-one push to a single user
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: Uuid, notice: ModerationNotice);
}

/// Redis pub/sub fan-out, one channel per session
#[derive(Clone)]
pub struct RedisBroadcaster {
    manager: ConnectionManager,
}

impl RedisBroadcaster {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    fn channel(session_id: Uuid) -> String {
        format!("live:session:{session_id}")
    }
}

#[async_trait]
impl Broadcaster for RedisBroadcaster {
    async fn publish(&self, update: LiveUpdate) {
        let payload = match serde_json::to_string(&update) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize live update");
                return;
            }
        };

        observe_broadcast(update.kind.type_label());

        let mut conn = self.manager.clone();
        if let Err(e) = redis::cmd("PUBLISH")
            .arg(Self::channel(update.session_id))
            .arg(&payload)
            .query_async::<_, ()>(&mut conn)
            .await
        {
            // Fire-and-forget: state machines never block on the channel
            tracing::warn!(
                session_id = %update.session_id,
                error = %e,
                "Failed to publish live update"
            );
        }
    }
}

/// Redis pub/sub per-user notification channel
#[derive(Clone)]
pub struct RedisNotifier {
    manager: ConnectionManager,
}

impl RedisNotifier {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Notifier for RedisNotifier {
    async fn notify(&self, user_id: Uuid, notice: ModerationNotice) {
        let payload = match serde_json::to_string(&notice) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize moderation notice");
                return;
            }
        };

        let mut conn = self.manager.clone();
        if let Err(e) = redis::cmd("PUBLISH")
            .arg(format!("notify:user:{user_id}"))
            .arg(&payload)
            .query_async::<_, ()>(&mut conn)
            .await
        {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to publish notice");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_update_wire_format() {
        let session_id = Uuid::new_v4();
        let update = LiveUpdate {
            session_id,
            kind: LiveUpdateKind::Countdown {
                remaining_seconds: 12,
            },
        };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["type"], "countdown");
        assert_eq!(value["remaining_seconds"], 12);
        assert_eq!(value["session_id"], session_id.to_string());
    }

    #[test]
    fn session_ended_update_wire_format() {
        let update = LiveUpdate {
            session_id: Uuid::new_v4(),
            kind: LiveUpdateKind::SessionEnded,
        };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["type"], "session_ended");
        assert!(value.get("remaining_seconds").is_none());
    }
}
