//! Session analytics rollup
//!
//! Aggregates are recomputed on a timer and served from an in-memory
//! snapshot, so the analytics endpoint never fans out queries per
//! request. A failed refresh keeps the last good snapshot.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::SessionsDb;
use crate::error::Result;

/// Rollup window for per-creator counts and average duration
const ROLLUP_WINDOW_HOURS: i64 = 24;
const TOP_CREATORS_LIMIT: i64 = 20;

#[derive(Debug, Clone, Serialize)]
pub struct CreatorSessions {
    pub creator_id: Uuid,
    pub sessions: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsSnapshot {
    pub active_sessions: i64,
    pub active_viewers: i64,
    /// Sessions started in the rollup window, busiest creators first
    pub sessions_per_creator: Vec<CreatorSessions>,
    /// Mean duration of sessions that ended inside the rollup window
    pub average_duration_seconds: f64,
    pub generated_at: DateTime<Utc>,
}

impl AnalyticsSnapshot {
    fn empty() -> Self {
        Self {
            active_sessions: 0,
            active_viewers: 0,
            sessions_per_creator: Vec::new(),
            average_duration_seconds: 0.0,
            generated_at: Utc::now(),
        }
    }
}

pub struct SessionAnalytics {
    sessions: SessionsDb,
    snapshot: RwLock<AnalyticsSnapshot>,
}

impl SessionAnalytics {
    pub fn new(sessions: SessionsDb) -> Self {
        Self {
            sessions,
            snapshot: RwLock::new(AnalyticsSnapshot::empty()),
        }
    }

    pub async fn snapshot(&self) -> AnalyticsSnapshot {
        self.snapshot.read().await.clone()
    }

    pub async fn refresh(&self) -> Result<()> {
        let active_sessions = self.sessions.count_live_sessions().await?;
        let active_viewers = self.sessions.sum_live_viewers().await?;
        let per_creator = self
            .sessions
            .sessions_per_creator(ROLLUP_WINDOW_HOURS, TOP_CREATORS_LIMIT)
            .await?;
        let average_duration_seconds = self
            .sessions
            .avg_ended_duration_seconds(ROLLUP_WINDOW_HOURS)
            .await?;

        let fresh = AnalyticsSnapshot {
            active_sessions,
            active_viewers,
            sessions_per_creator: per_creator
                .into_iter()
                .map(|(creator_id, sessions)| CreatorSessions {
                    creator_id,
                    sessions,
                })
                .collect(),
            average_duration_seconds,
            generated_at: Utc::now(),
        };

        debug!(
            active_sessions = fresh.active_sessions,
            active_viewers = fresh.active_viewers,
            "Analytics snapshot refreshed"
        );
        *self.snapshot.write().await = fresh;
        Ok(())
    }

    /// Periodic refresh loop. Errors are logged and the previous
    /// snapshot keeps serving.
    pub fn spawn_refresh_job(self: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                if let Err(e) = self.refresh().await {
                    warn!(error = %e, "Analytics refresh failed; keeping last snapshot");
                }
            }
        })
    }
}
