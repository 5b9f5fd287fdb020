//! Multi-scope ban resolution
//!
//! A user joining a session is checked against every active ban on
//! record for them. Scopes overlap, so resolution picks the broadest
//! applicable ban: global beats creator-level beats session-level.
//! Lookups are cached per (user, session) pair since bans rarely
//! change mid-session; moderation writes invalidate the affected user.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::db::BansDb;
use crate::error::Result;
use crate::models::{BanRecord, BanScope};

/// Outcome of resolving a user against a session
#[derive(Debug, Clone, Serialize)]
pub struct BanDecision {
    pub barred: bool,
    pub ban: Option<BanRecord>,
}

impl BanDecision {
    pub fn admitted() -> Self {
        Self {
            barred: false,
            ban: None,
        }
    }

    pub fn barred_by(ban: BanRecord) -> Self {
        Self {
            barred: true,
            ban: Some(ban),
        }
    }
}

/// Pick the broadest ban that applies to this session, skipping revoked
/// and expired rows.
pub fn select_ban<'a>(
    bans: &'a [BanRecord],
    session_id: Uuid,
    creator_id: Uuid,
    now: DateTime<Utc>,
) -> Option<&'a BanRecord> {
    let candidates: Vec<&BanRecord> = bans
        .iter()
        .filter(|b| b.is_active && !b.is_inert_at(now))
        .collect();

    if let Some(global) = candidates.iter().find(|b| b.scope == BanScope::Global) {
        return Some(global);
    }
    if let Some(creator) = candidates
        .iter()
        .find(|b| b.scope == BanScope::Creator && b.creator_id == Some(creator_id))
    {
        return Some(creator);
    }
    candidates
        .into_iter()
        .find(|b| b.scope == BanScope::Session && b.session_id == Some(session_id))
}

pub struct BanResolver {
    bans: BansDb,
    cache: DashMap<(Uuid, Uuid), BanDecision>,
}

impl BanResolver {
    pub fn new(bans: BansDb) -> Self {
        Self {
            bans,
            cache: DashMap::new(),
        }
    }

    /// Resolve a user's standing for a session. Storage errors propagate
    /// to the caller so the gate can fail closed.
    pub async fn resolve(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        creator_id: Uuid,
    ) -> Result<BanDecision> {
        let now = Utc::now();

        if let Some(cached) = self.cache.get(&(user_id, session_id)) {
            // A timed ban may have lapsed since the decision was cached;
            // re-check so a stale entry never keeps someone barred.
            let lapsed = cached
                .ban
                .as_ref()
                .map(|b| b.is_inert_at(now))
                .unwrap_or(false);
            if !lapsed {
                return Ok(cached.clone());
            }
            drop(cached);
            self.cache.remove(&(user_id, session_id));
        }

        let bans = self.bans.active_bans_for_user(user_id).await?;
        let decision = match select_ban(&bans, session_id, creator_id, now) {
            Some(ban) => {
                debug!(
                    user_id = %user_id,
                    session_id = %session_id,
                    ban_id = %ban.id,
                    scope = ?ban.scope,
                    "User barred from session"
                );
                BanDecision::barred_by(ban.clone())
            }
            None => BanDecision::admitted(),
        };

        self.cache.insert((user_id, session_id), decision.clone());
        Ok(decision)
    }

    /// Drop every cached decision about a user. Called after any ban
    /// write so enforcement sees the new state on the next check.
    pub fn invalidate_user(&self, user_id: Uuid) {
        self.cache.retain(|(cached_user, _), _| *cached_user != user_id);
    }

    /// Drop every cached decision for a session. Called when the session
    /// ends; decisions are scoped to the session's lifetime, so this
    /// keeps the cache from accumulating entries for dead sessions.
    pub fn invalidate_session(&self, session_id: Uuid) {
        self.cache
            .retain(|(_, cached_session), _| *cached_session != session_id);
    }

    #[cfg(test)]
    fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    #[cfg(test)]
    fn prime(&self, user_id: Uuid, session_id: Uuid, decision: BanDecision) {
        self.cache.insert((user_id, session_id), decision);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sqlx::PgPool;
    use std::sync::Arc;

    fn resolver() -> BanResolver {
        // connect_lazy never touches the network; these tests only
        // exercise the cache.
        let pool = PgPool::connect_lazy("postgres://localhost/unused")
            .expect("lazy pool");
        BanResolver::new(BansDb::new(Arc::new(pool)))
    }

    fn ban(scope: BanScope, session_id: Option<Uuid>, creator_id: Option<Uuid>) -> BanRecord {
        BanRecord {
            id: Uuid::new_v4(),
            scope,
            banned_user_id: Uuid::new_v4(),
            banned_by: Uuid::new_v4(),
            session_id,
            creator_id,
            reason: "test".to_string(),
            is_permanent: true,
            expires_at: None,
            is_active: true,
            created_at: Utc::now(),
            revoked_at: None,
            revoked_by: None,
        }
    }

    #[test]
    fn global_ban_outranks_narrower_scopes() {
        let session_id = Uuid::new_v4();
        let creator_id = Uuid::new_v4();
        let bans = vec![
            ban(BanScope::Session, Some(session_id), None),
            ban(BanScope::Global, None, None),
            ban(BanScope::Creator, None, Some(creator_id)),
        ];

        let selected = select_ban(&bans, session_id, creator_id, Utc::now());
        assert_eq!(selected.map(|b| b.scope), Some(BanScope::Global));
    }

    #[test]
    fn creator_ban_outranks_session_ban() {
        let session_id = Uuid::new_v4();
        let creator_id = Uuid::new_v4();
        let bans = vec![
            ban(BanScope::Session, Some(session_id), None),
            ban(BanScope::Creator, None, Some(creator_id)),
        ];

        let selected = select_ban(&bans, session_id, creator_id, Utc::now());
        assert_eq!(selected.map(|b| b.scope), Some(BanScope::Creator));
    }

    #[test]
    fn scoped_bans_for_other_targets_do_not_apply() {
        let session_id = Uuid::new_v4();
        let creator_id = Uuid::new_v4();
        let bans = vec![
            ban(BanScope::Session, Some(Uuid::new_v4()), None),
            ban(BanScope::Creator, None, Some(Uuid::new_v4())),
        ];

        assert!(select_ban(&bans, session_id, creator_id, Utc::now()).is_none());
    }

    #[test]
    fn expired_ban_never_bars() {
        let session_id = Uuid::new_v4();
        let creator_id = Uuid::new_v4();
        let mut expired = ban(BanScope::Global, None, None);
        expired.is_permanent = false;
        expired.expires_at = Some(Utc::now() - Duration::hours(1));

        assert!(select_ban(&[expired], session_id, creator_id, Utc::now()).is_none());
    }

    #[tokio::test]
    async fn ending_a_session_evicts_its_cached_decisions() {
        let resolver = resolver();
        let (user_a, user_b) = (Uuid::new_v4(), Uuid::new_v4());
        let (session_1, session_2) = (Uuid::new_v4(), Uuid::new_v4());

        resolver.prime(user_a, session_1, BanDecision::admitted());
        resolver.prime(user_b, session_1, BanDecision::admitted());
        resolver.prime(user_a, session_2, BanDecision::admitted());

        resolver.invalidate_session(session_1);

        assert_eq!(resolver.cached_entries(), 1);
    }

    #[tokio::test]
    async fn ban_writes_evict_every_decision_about_the_user() {
        let resolver = resolver();
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();

        resolver.prime(user, Uuid::new_v4(), BanDecision::admitted());
        resolver.prime(user, Uuid::new_v4(), BanDecision::admitted());
        resolver.prime(other, Uuid::new_v4(), BanDecision::admitted());

        resolver.invalidate_user(user);

        assert_eq!(resolver.cached_entries(), 1);
    }

    #[test]
    fn revoked_ban_never_bars() {
        let session_id = Uuid::new_v4();
        let creator_id = Uuid::new_v4();
        let mut revoked = ban(BanScope::Global, None, None);
        revoked.is_active = false;
        revoked.revoked_at = Some(Utc::now());

        assert!(select_ban(&[revoked], session_id, creator_id, Utc::now()).is_none());
    }
}
