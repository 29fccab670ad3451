//! # Voided Range Repository
//!
//! Number ranges the authority homologated as unused (inutilizacao).
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  authority answers 102                                                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌──────────────────── SINGLE TRANSACTION ────────────────────┐        │
//! │  │ 1. INSERT INTO voided_ranges (first, last, protocol …)     │        │
//! │  │ 2. raise number_sequences.next_number to last + 1          │        │
//! │  └────────────────────────────────────────────────────────────┘        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The counter is raised in the same transaction so a voided number is never
//! handed out again.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use nfe_core::{DocumentModel, Environment, ProtocolRecord};

/// A stored voided range.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VoidedRangeRecord {
    pub id: String,
    pub tenant_id: String,
    pub environment: Environment,
    pub model: DocumentModel,
    pub series: i64,
    pub first_number: i64,
    pub last_number: i64,
    pub justification: String,
    pub protocol_number: Option<String>,
    pub status_code: i64,
    pub reason: String,
    pub registered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl VoidedRangeRecord {
    pub fn protocol(&self) -> ProtocolRecord {
        ProtocolRecord {
            protocol_number: self.protocol_number.clone(),
            receipt_number: None,
            status_code: self.status_code as u16,
            reason: self.reason.clone(),
            authorized_at: self.registered_at,
        }
    }
}

/// Values for a range the authority homologated.
#[derive(Debug, Clone)]
pub struct NewVoidedRange {
    pub tenant_id: String,
    pub environment: Environment,
    pub model: DocumentModel,
    pub series: u16,
    pub first_number: u32,
    pub last_number: u32,
    pub justification: String,
    pub protocol: ProtocolRecord,
    /// The authority's `retInutNFe`, verbatim.
    pub raw_xml: Option<String>,
}

const RANGE_COLUMNS: &str = "id, tenant_id, environment, model, series, first_number, \
    last_number, justification, protocol_number, status_code, reason, registered_at, created_at";

/// Repository for voided ranges.
#[derive(Debug, Clone)]
pub struct VoidingRepository {
    pool: SqlitePool,
}

impl VoidingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        VoidingRepository { pool }
    }

    /// Stores a homologated range and moves the counter past it.
    pub async fn record(&self, range: &NewVoidedRange) -> DbResult<VoidedRangeRecord> {
        debug!(
            tenant_id = %range.tenant_id,
            model = %range.model,
            series = range.series,
            first = range.first_number,
            last = range.last_number,
            "Recording voided range"
        );
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO voided_ranges (
                id, tenant_id, environment, model, series, first_number, last_number,
                justification, protocol_number, status_code, reason, registered_at,
                raw_xml, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&id)
        .bind(&range.tenant_id)
        .bind(range.environment)
        .bind(range.model)
        .bind(i64::from(range.series))
        .bind(i64::from(range.first_number))
        .bind(i64::from(range.last_number))
        .bind(&range.justification)
        .bind(&range.protocol.protocol_number)
        .bind(i64::from(range.protocol.status_code))
        .bind(&range.protocol.reason)
        .bind(range.protocol.authorized_at)
        .bind(&range.raw_xml)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO number_sequences (tenant_id, model, series, next_number, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(tenant_id, model, series) DO UPDATE SET
                next_number = MAX(next_number, excluded.next_number),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&range.tenant_id)
        .bind(range.model)
        .bind(i64::from(range.series))
        .bind(i64::from(range.last_number) + 1)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(VoidedRangeRecord {
            id,
            tenant_id: range.tenant_id.clone(),
            environment: range.environment,
            model: range.model,
            series: i64::from(range.series),
            first_number: i64::from(range.first_number),
            last_number: i64::from(range.last_number),
            justification: range.justification.clone(),
            protocol_number: range.protocol.protocol_number.clone(),
            status_code: i64::from(range.protocol.status_code),
            reason: range.protocol.reason.clone(),
            registered_at: range.protocol.authorized_at,
            created_at: now,
        })
    }

    /// Highest voided number of a series, `None` when nothing was voided.
    pub async fn highest_number(
        &self,
        tenant_id: &str,
        model: DocumentModel,
        series: u16,
    ) -> DbResult<Option<u32>> {
        let highest: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(last_number) FROM voided_ranges
            WHERE tenant_id = ?1 AND model = ?2 AND series = ?3
            "#,
        )
        .bind(tenant_id)
        .bind(model)
        .bind(i64::from(series))
        .fetch_one(&self.pool)
        .await?;
        Ok(highest.map(|n| n as u32))
    }

    /// A tenant's voided ranges, newest first.
    pub async fn list(&self, tenant_id: &str) -> DbResult<Vec<VoidedRangeRecord>> {
        let sql = format!(
            "SELECT {} FROM voided_ranges WHERE tenant_id = ?1 ORDER BY created_at DESC, rowid DESC",
            RANGE_COLUMNS
        );
        let rows = sqlx::query_as::<_, VoidedRangeRecord>(&sql)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::document::tests::db;
    use crate::DbError;

    fn range(first: u32, last: u32) -> NewVoidedRange {
        NewVoidedRange {
            tenant_id: "t1".to_string(),
            environment: Environment::Homologation,
            model: DocumentModel::Nfce,
            series: 1,
            first_number: first,
            last_number: last,
            justification: "Falha no sistema durante a emissao".to_string(),
            protocol: ProtocolRecord {
                protocol_number: Some("135240000000777".to_string()),
                receipt_number: None,
                status_code: 102,
                reason: "Inutilizacao de numero homologado".to_string(),
                authorized_at: Some(Utc::now()),
            },
            raw_xml: Some("<retInutNFe/>".to_string()),
        }
    }

    #[tokio::test]
    async fn test_record_moves_counter_past_range() {
        let db = db().await;
        let voiding = db.voided_ranges();
        assert_eq!(voiding.highest_number("t1", DocumentModel::Nfce, 1).await.unwrap(), None);

        let stored = voiding.record(&range(5, 9)).await.unwrap();
        assert_eq!(stored.protocol().status_code, 102);
        assert_eq!(voiding.highest_number("t1", DocumentModel::Nfce, 1).await.unwrap(), Some(9));
        assert_eq!(db.sequences().peek("t1", DocumentModel::Nfce, 1).await.unwrap(), 10);
        // other series untouched
        assert_eq!(voiding.highest_number("t1", DocumentModel::Nfce, 2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_counter_never_lowered() {
        let db = db().await;
        db.sequences().seed("t1", DocumentModel::Nfce, 1, 50).await.unwrap();
        db.voided_ranges().record(&range(3, 4)).await.unwrap();
        assert_eq!(db.sequences().peek("t1", DocumentModel::Nfce, 1).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_same_range_twice_is_a_duplicate() {
        let db = db().await;
        let voiding = db.voided_ranges();
        voiding.record(&range(1, 1)).await.unwrap();
        assert!(matches!(
            voiding.record(&range(1, 1)).await,
            Err(DbError::UniqueViolation { .. })
        ));
        assert_eq!(voiding.list("t1").await.unwrap().len(), 1);
    }
}
