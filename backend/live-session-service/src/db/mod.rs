//! Database access layer
//!
//! One struct per aggregate, each holding a shared pool handle. All SQL
//! for the moderation dispatch transaction lives in the dispatcher
//! itself because its writes must commit or roll back together.

pub mod bans;
pub mod reports;
pub mod sessions;
pub mod webhook_log;

pub use bans::BansDb;
pub use reports::ReportsDb;
pub use sessions::SessionsDb;
pub use webhook_log::{NewWebhookEvent, WebhookLogDb, WebhookLogFilter};

pub(crate) use reports::REPORT_COLUMNS;
