//! Disconnect grace-period supervisor
//!
//! When a host's essential media track disappears, the session is kept
//! alive on a countdown instead of being torn down immediately. The
//! supervisor owns the authoritative clock; clients only render the
//! last broadcast value. States: none → counting → {reconnected,
//! terminated}. The zero-crossing and the reconnect race against each
//! other, so both go through a compare-and-set on the shared phase and
//! exactly one side wins.

use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::SessionsDb;
use crate::error::Result;
use crate::realtime::{Broadcaster, LiveUpdate, LiveUpdateKind};
use crate::services::bans::BanResolver;

const PHASE_COUNTING: u8 = 0;
const PHASE_RECONNECTED: u8 = 1;
const PHASE_TERMINATED: u8 = 2;

/// Ends a session the same way a room_finished reconciliation would
#[async_trait]
pub trait SessionTerminator: Send + Sync {
    async fn terminate_session(&self, session_id: Uuid) -> Result<()>;
}

/// Production terminator backed by the sessions table
pub struct DbSessionTerminator {
    sessions: SessionsDb,
    resolver: Arc<BanResolver>,
}

impl DbSessionTerminator {
    pub fn new(sessions: SessionsDb, resolver: Arc<BanResolver>) -> Self {
        Self { sessions, resolver }
    }
}

#[async_trait]
impl SessionTerminator for DbSessionTerminator {
    async fn terminate_session(&self, session_id: Uuid) -> Result<()> {
        // None means the session ended through another path first; the
        // guarded transition upstream makes that benign.
        self.sessions.end_session(session_id).await?;
        self.resolver.invalidate_session(session_id);
        Ok(())
    }
}

struct Countdown {
    session_id: Uuid,
    host_user_id: Uuid,
    phase: AtomicU8,
    remaining: AtomicI32,
}

/// Per-session timer state machine for host disconnects
pub struct DisconnectSupervisor {
    terminator: Arc<dyn SessionTerminator>,
    broadcaster: Arc<dyn Broadcaster>,
    countdowns: DashMap<Uuid, Arc<Countdown>>,
    /// Monotonic per-session publish counter; a bump between track loss
    /// and the end of the debounce window means a replacement track
    /// arrived and no countdown should start.
    publish_generation: DashMap<Uuid, u64>,
    grace_period_secs: i32,
    debounce: Duration,
}

impl DisconnectSupervisor {
    pub fn new(
        terminator: Arc<dyn SessionTerminator>,
        broadcaster: Arc<dyn Broadcaster>,
        grace_period_secs: i32,
        debounce: Duration,
    ) -> Self {
        Self {
            terminator,
            broadcaster,
            countdowns: DashMap::new(),
            publish_generation: DashMap::new(),
            grace_period_secs: grace_period_secs.max(1),
            debounce,
        }
    }

    /// Host essential track lost. Waits out the detection debounce, then
    /// starts the countdown unless a replacement publish arrived.
    pub fn host_track_lost(self: &Arc<Self>, session_id: Uuid, host_user_id: Uuid) {
        let armed_at_generation = self.current_generation(session_id);
        let supervisor = Arc::clone(self);

        tokio::spawn(async move {
            tokio::time::sleep(supervisor.debounce).await;

            if supervisor.current_generation(session_id) != armed_at_generation {
                debug!(
                    session_id = %session_id,
                    "Replacement track arrived within debounce window"
                );
                return;
            }

            supervisor.start_countdown(session_id, host_user_id).await;
        });
    }

    /// Host essential track published. Cancels a pending debounce (via
    /// the generation bump) and resolves a running countdown as
    /// reconnected if this host owns it.
    pub async fn host_track_published(self: &Arc<Self>, session_id: Uuid, host_user_id: Uuid) {
        *self.publish_generation.entry(session_id).or_insert(0) += 1;

        let Some(countdown) = self.countdowns.get(&session_id).map(|c| Arc::clone(&c)) else {
            return;
        };
        if countdown.host_user_id != host_user_id {
            return;
        }

        if countdown
            .phase
            .compare_exchange(
                PHASE_COUNTING,
                PHASE_RECONNECTED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            self.countdowns.remove(&session_id);
            info!(
                session_id = %session_id,
                host_user_id = %host_user_id,
                remaining_seconds = countdown.remaining.load(Ordering::SeqCst),
                "Host reconnected within grace period"
            );
            self.broadcaster
                .publish(LiveUpdate {
                    session_id,
                    kind: LiveUpdateKind::Reconnected,
                })
                .await;
        }
    }

    /// Tear down silently (room_finished arrived while counting, or
    /// while a track-loss debounce is still pending).
    pub fn cancel(self: &Arc<Self>, session_id: Uuid) {
        if let Some((_, countdown)) = self.countdowns.remove(&session_id) {
            let _ = countdown.phase.compare_exchange(
                PHASE_COUNTING,
                PHASE_RECONNECTED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
            debug!(session_id = %session_id, "Countdown cancelled");
        }

        // A debounce armed before this call compares against the old
        // generation, so the bump makes it abort instead of starting a
        // countdown for a session that already finished. The counter is
        // dropped once any in-flight window has certainly elapsed.
        *self.publish_generation.entry(session_id).or_insert(0) += 1;
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(supervisor.debounce + Duration::from_millis(50)).await;
            supervisor.publish_generation.remove(&session_id);
        });
    }

    /// Remaining seconds of a running countdown, if any
    pub fn remaining_seconds(&self, session_id: Uuid) -> Option<i32> {
        self.countdowns
            .get(&session_id)
            .map(|c| c.remaining.load(Ordering::SeqCst))
    }

    fn current_generation(&self, session_id: Uuid) -> u64 {
        self.publish_generation
            .get(&session_id)
            .map(|g| *g)
            .unwrap_or(0)
    }

    async fn start_countdown(self: Arc<Self>, session_id: Uuid, host_user_id: Uuid) {
        let countdown = match self.countdowns.entry(session_id) {
            // At most one live countdown per session
            Entry::Occupied(_) => return,
            Entry::Vacant(vacant) => {
                let countdown = Arc::new(Countdown {
                    session_id,
                    host_user_id,
                    phase: AtomicU8::new(PHASE_COUNTING),
                    remaining: AtomicI32::new(self.grace_period_secs),
                });
                vacant.insert(Arc::clone(&countdown));
                countdown
            }
        };

        info!(
            session_id = %session_id,
            host_user_id = %host_user_id,
            grace_period_secs = self.grace_period_secs,
            "Host track lost; grace-period countdown started"
        );

        self.broadcaster
            .publish(LiveUpdate {
                session_id,
                kind: LiveUpdateKind::Countdown {
                    remaining_seconds: self.grace_period_secs,
                },
            })
            .await;

        let supervisor = Arc::clone(&self);
        tokio::spawn(async move {
            supervisor.run_countdown(countdown).await;
        });
    }

    async fn run_countdown(&self, countdown: Arc<Countdown>) {
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;

            if countdown.phase.load(Ordering::SeqCst) != PHASE_COUNTING {
                return;
            }

            let remaining = countdown.remaining.fetch_sub(1, Ordering::SeqCst) - 1;
            if remaining > 0 {
                // Absolute value every tick: a dropped broadcast heals on
                // the next one.
                self.broadcaster
                    .publish(LiveUpdate {
                        session_id: countdown.session_id,
                        kind: LiveUpdateKind::Countdown {
                            remaining_seconds: remaining,
                        },
                    })
                    .await;
                continue;
            }

            // Zero crossing: guarded so it fires exactly once even under
            // concurrent tick delivery or a racing reconnect.
            if countdown
                .phase
                .compare_exchange(
                    PHASE_COUNTING,
                    PHASE_TERMINATED,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                self.countdowns.remove(&countdown.session_id);
                self.publish_generation.remove(&countdown.session_id);
                warn!(
                    session_id = %countdown.session_id,
                    "Grace period expired; terminating session"
                );

                if let Err(e) = self.terminator.terminate_session(countdown.session_id).await {
                    tracing::error!(
                        session_id = %countdown.session_id,
                        error = %e,
                        "Failed to terminate session after grace period"
                    );
                }

                self.broadcaster
                    .publish(LiveUpdate {
                        session_id: countdown.session_id,
                        kind: LiveUpdateKind::SessionEnded,
                    })
                    .await;
            }
            return;
        }
    }
}
