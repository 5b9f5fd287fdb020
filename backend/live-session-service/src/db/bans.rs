//! Database operations for session bans
//!
//! Writes happen inside the moderation dispatcher's transaction; this
//! struct covers the read side plus revocation.

use crate::error::Result;
use crate::models::BanRecord;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

const BAN_COLUMNS: &str = "id, scope, banned_user_id, banned_by, session_id, creator_id, \
     reason, is_permanent, is_active, expires_at, created_at, revoked_at, revoked_by";

/// Database operations for ban records
#[derive(Clone)]
pub struct BansDb {
    pool: Arc<PgPool>,
}

impl BansDb {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// All active bans for a user across every scope. Expiry filtering is
    /// the resolver's job: expired rows are inert, not removed.
    pub async fn active_bans_for_user(&self, user_id: Uuid) -> Result<Vec<BanRecord>> {
        let bans = sqlx::query_as::<_, BanRecord>(&format!(
            r#"
            SELECT {BAN_COLUMNS}
            FROM session_bans
            WHERE banned_user_id = $1 AND is_active = TRUE
            ORDER BY created_at DESC
            "#
        ))
        .bind(user_id)
        .fetch_all(&*self.pool)
        .await?;

        Ok(bans)
    }

    pub async fn get_ban(&self, ban_id: Uuid) -> Result<Option<BanRecord>> {
        let ban = sqlx::query_as::<_, BanRecord>(&format!(
            "SELECT {BAN_COLUMNS} FROM session_bans WHERE id = $1"
        ))
        .bind(ban_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(ban)
    }

    /// Deactivate a ban without deleting it. Returns None when the ban is
    /// unknown or already revoked.
    pub async fn revoke_ban(&self, ban_id: Uuid, revoked_by: Uuid) -> Result<Option<BanRecord>> {
        let ban = sqlx::query_as::<_, BanRecord>(&format!(
            r#"
            UPDATE session_bans
            SET is_active = FALSE, revoked_at = NOW(), revoked_by = $2
            WHERE id = $1 AND is_active = TRUE
            RETURNING {BAN_COLUMNS}
            "#
        ))
        .bind(ban_id)
        .bind(revoked_by)
        .fetch_optional(&*self.pool)
        .await?;

        if let Some(ref revoked) = ban {
            tracing::info!(
                ban_id = %ban_id,
                banned_user_id = %revoked.banned_user_id,
                revoked_by = %revoked_by,
                "Ban revoked"
            );
        }

        Ok(ban)
    }
}
