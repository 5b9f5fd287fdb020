pub mod analytics;
pub mod bans;
pub mod disconnect;
pub mod ingestion;
pub mod moderation;
pub mod reconciler;

pub use analytics::{AnalyticsSnapshot, SessionAnalytics};
pub use bans::{BanDecision, BanResolver};
pub use disconnect::{DbSessionTerminator, DisconnectSupervisor, SessionTerminator};
pub use ingestion::{IngestOutcome, WebhookIngestion};
pub use moderation::{ActionRequest, ModerationDispatcher};
pub use reconciler::SessionReconciler;
