//! # Number Sequence Repository
//!
//! Reserves document numbers atomically per (tenant, model, series).
//!
//! ## Reservation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  issuance A ──┐                                                         │
//! │               ├──► INSERT … ON CONFLICT DO UPDATE                       │
//! │  issuance B ──┘      SET next_number = next_number + 1                  │
//! │                      RETURNING next_number - 1                          │
//! │                                                                         │
//! │  One statement, one write lock: A gets n, B gets n + 1, never both n.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The counter does not depend on the environment. A number reserved for
//! homologation is never handed out again for production, so an access key
//! can never exist in both.
//!
//! A reserved number is consumed even if the issuance later fails.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use nfe_core::{DocumentModel, MAX_DOCUMENT_NUMBER};

/// Repository for document number sequences.
#[derive(Debug, Clone)]
pub struct SequenceRepository {
    pool: SqlitePool,
}

impl SequenceRepository {
    /// Creates a new SequenceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SequenceRepository { pool }
    }

    /// Reserves the next number. The first reservation of a series is 1.
    pub async fn reserve(
        &self,
        tenant_id: &str,
        model: DocumentModel,
        series: u16,
    ) -> DbResult<u32> {
        let reserved: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO number_sequences (tenant_id, model, series, next_number, updated_at)
            VALUES (?1, ?2, ?3, 2, ?4)
            ON CONFLICT(tenant_id, model, series) DO UPDATE SET
                next_number = next_number + 1,
                updated_at = excluded.updated_at
            RETURNING next_number - 1
            "#,
        )
        .bind(tenant_id)
        .bind(model)
        .bind(i64::from(series))
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        if reserved < 1 || reserved > i64::from(MAX_DOCUMENT_NUMBER) {
            return Err(DbError::corrupt(
                "number_sequences",
                format!("series {} exhausted at {}", series, reserved),
            ));
        }

        debug!(tenant_id = %tenant_id, model = %model, series, number = reserved, "Reserved document number");
        Ok(reserved as u32)
    }

    /// Raises the counter so the next reservation is at least `next_number`.
    ///
    /// Used when a tenant migrates with numbering already in use. Never
    /// lowers the counter.
    pub async fn seed(
        &self,
        tenant_id: &str,
        model: DocumentModel,
        series: u16,
        next_number: u32,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO number_sequences (tenant_id, model, series, next_number, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(tenant_id, model, series) DO UPDATE SET
                next_number = MAX(next_number, excluded.next_number),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(model)
        .bind(i64::from(series))
        .bind(i64::from(next_number))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns the number the next reservation would get.
    pub async fn peek(
        &self,
        tenant_id: &str,
        model: DocumentModel,
        series: u16,
    ) -> DbResult<u32> {
        let next: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT next_number FROM number_sequences
            WHERE tenant_id = ?1 AND model = ?2 AND series = ?3
            "#,
        )
        .bind(tenant_id)
        .bind(model)
        .bind(i64::from(series))
        .fetch_optional(&self.pool)
        .await?;

        Ok(next.unwrap_or(1) as u32)
    }
}
