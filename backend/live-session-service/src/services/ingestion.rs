//! Webhook ingestion pipeline
//!
//! verify signature → parse → dedup-claim → reconcile (with bounded
//! retry) → finalize log row. Signature and parse failures are the
//! caller's problem (4xx); reconciliation failures after the payload
//! has been accepted are logged and acknowledged so the media server
//! stops redelivering a payload that will never succeed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{error, info, warn};

use crate::db::{NewWebhookEvent, WebhookLogDb};
use crate::error::{AppError, Result};
use crate::metrics::observe_webhook_event;
use crate::models::events::WebhookEnvelope;
use crate::services::reconciler::SessionReconciler;

type HmacSha256 = Hmac<Sha256>;

const MAX_RECONCILE_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 100;

/// What happened to an accepted delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Reconciled into session state
    Processed,
    /// Replay or unhandled event type; no state change
    Skipped,
    /// Reconciliation failed; logged as an error row, still acknowledged
    Failed,
}

pub struct WebhookIngestion {
    shared_secret: String,
    log: WebhookLogDb,
    reconciler: Arc<SessionReconciler>,
}

impl WebhookIngestion {
    pub fn new(shared_secret: String, log: WebhookLogDb, reconciler: Arc<SessionReconciler>) -> Self {
        Self {
            shared_secret,
            log,
            reconciler,
        }
    }

    pub fn verify_signature(&self, body: &[u8], signature_hex: &str) -> bool {
        signature_matches(&self.shared_secret, body, signature_hex)
    }

    pub async fn ingest(&self, body: &[u8], signature_hex: &str) -> Result<IngestOutcome> {
        let started = Instant::now();

        if !self.verify_signature(body, signature_hex) {
            warn!("Webhook rejected: signature mismatch");
            return Err(AppError::Authentication(
                "invalid webhook signature".to_string(),
            ));
        }

        let raw_payload: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| AppError::Validation(format!("malformed webhook payload: {e}")))?;
        let envelope: WebhookEnvelope = serde_json::from_value(raw_payload.clone())
            .map_err(|e| AppError::Validation(format!("malformed webhook payload: {e}")))?;

        let dedup_key = envelope.dedup_key();
        let new_event = NewWebhookEvent {
            dedup_key: &dedup_key,
            event_type: &envelope.event_type,
            room_name: &envelope.room.name,
            room_sid: &envelope.room.sid,
            participant_identity: envelope.participant.as_ref().map(|p| p.identity.as_str()),
            participant_sid: envelope.participant.as_ref().map(|p| p.sid.as_str()),
            raw_payload: &raw_payload,
        };

        // Claim the dedup key. Losing the insert means another delivery
        // of the same event already holds it.
        let Some(log_id) = self.log.try_insert_processed(&new_event).await? else {
            let elapsed = started.elapsed();
            self.log
                .insert_skipped(&new_event, elapsed.as_millis() as i64)
                .await?;
            info!(
                dedup_key = %dedup_key,
                event_type = %envelope.event_type,
                "Duplicate webhook delivery skipped"
            );
            observe_webhook_event(&envelope.event_type, "skipped", elapsed);
            return Ok(IngestOutcome::Skipped);
        };

        let Some(live_event) = envelope.normalize() else {
            let elapsed = started.elapsed();
            self.log.mark_skipped(log_id, elapsed.as_millis() as i64).await?;
            info!(
                event_type = %envelope.event_type,
                "Unhandled webhook event type skipped"
            );
            observe_webhook_event(&envelope.event_type, "skipped", elapsed);
            return Ok(IngestOutcome::Skipped);
        };

        let mut outcome = self.reconciler.apply(&live_event).await;
        for attempt in 2..=MAX_RECONCILE_ATTEMPTS {
            match &outcome {
                Err(e) if e.is_transient() => {
                    let delay = RETRY_BASE_DELAY_MS << (attempt - 2);
                    warn!(
                        event_type = %envelope.event_type,
                        attempt,
                        delay_ms = delay,
                        error = %e,
                        "Transient reconciliation failure; retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    outcome = self.reconciler.apply(&live_event).await;
                }
                _ => break,
            }
        }

        let elapsed = started.elapsed();
        match outcome {
            Ok(session_id) => {
                self.log
                    .finalize(log_id, session_id, None, elapsed.as_millis() as i64)
                    .await?;
                observe_webhook_event(&envelope.event_type, "success", elapsed);
                Ok(IngestOutcome::Processed)
            }
            Err(e) => {
                error!(
                    event_type = %envelope.event_type,
                    room_sid = %envelope.room.sid,
                    error = %e,
                    "Webhook reconciliation failed; logged and acknowledged"
                );
                self.log
                    .finalize(log_id, None, Some(&e.to_string()), elapsed.as_millis() as i64)
                    .await?;
                observe_webhook_event(&envelope.event_type, "error", elapsed);
                Ok(IngestOutcome::Failed)
            }
        }
    }
}

/// HMAC-SHA256 over the raw body, hex-encoded by the sender.
/// Constant-time comparison via the mac itself.
fn signature_matches(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_is_accepted() {
        let body = br#"{"eventType":"room_started"}"#;
        assert!(signature_matches("test-secret", body, &sign("test-secret", body)));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let signature = sign("test-secret", br#"{"eventType":"room_started"}"#);
        assert!(!signature_matches(
            "test-secret",
            br#"{"eventType":"room_finished"}"#,
            &signature
        ));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let body = br#"{"eventType":"room_started"}"#;
        assert!(!signature_matches("test-secret", body, &sign("other-secret", body)));
    }

    #[test]
    fn malformed_hex_is_rejected() {
        assert!(!signature_matches("test-secret", b"{}", "not-hex"));
    }

    #[test]
    fn surrounding_whitespace_in_header_is_tolerated() {
        let body = b"payload";
        let signature = format!("  {}\n", sign("test-secret", body));
        assert!(signature_matches("test-secret", body, &signature));
    }
}
