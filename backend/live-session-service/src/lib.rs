//! Live session lifecycle and moderation enforcement service.
//!
//! Ingests media-server webhooks, reconciles them into session and
//! participant state, enforces multi-scope bans, dispatches admin
//! moderation actions, and supervises host-disconnect grace periods.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod realtime;
pub mod services;

pub use error::{AppError, Result};
