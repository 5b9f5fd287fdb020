//! Database operations for moderation reports
//!
//! Report resolution lives in the moderation dispatcher because it must
//! commit atomically with enforcement side effects.

use crate::error::Result;
use crate::models::{CreateReportInput, ModerationReport, ReportStatus};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

pub(crate) const REPORT_COLUMNS: &str = "id, reported_user_id, reporter_id, session_id, reason, \
     status, action_taken, resolved_by, resolved_at, admin_notes, created_at";

/// Database operations for moderation reports
#[derive(Clone)]
pub struct ReportsDb {
    pool: Arc<PgPool>,
}

impl ReportsDb {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn create_report(&self, input: CreateReportInput) -> Result<ModerationReport> {
        let report = sqlx::query_as::<_, ModerationReport>(&format!(
            r#"
            INSERT INTO moderation_reports (reported_user_id, reporter_id, session_id, reason)
            VALUES ($1, $2, $3, $4)
            RETURNING {REPORT_COLUMNS}
            "#
        ))
        .bind(input.reported_user_id)
        .bind(input.reporter_id)
        .bind(input.session_id)
        .bind(&input.reason)
        .fetch_one(&*self.pool)
        .await?;

        tracing::info!(
            report_id = %report.id,
            reporter_id = %input.reporter_id,
            reported_user_id = %input.reported_user_id,
            session_id = %input.session_id,
            "Moderation report created"
        );

        Ok(report)
    }

    pub async fn get_report(&self, report_id: Uuid) -> Result<Option<ModerationReport>> {
        let report = sqlx::query_as::<_, ModerationReport>(&format!(
            "SELECT {REPORT_COLUMNS} FROM moderation_reports WHERE id = $1"
        ))
        .bind(report_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(report)
    }

    /// Admin review queue, oldest first
    pub async fn list_reports(
        &self,
        status: Option<ReportStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ModerationReport>> {
        let reports = sqlx::query_as::<_, ModerationReport>(&format!(
            r#"
            SELECT {REPORT_COLUMNS}
            FROM moderation_reports
            WHERE ($1::report_status IS NULL OR status = $1)
            ORDER BY created_at ASC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&*self.pool)
        .await?;

        Ok(reports)
    }
}
