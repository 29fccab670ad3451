//! # Document Repository
//!
//! Database operations for fiscal documents and their authorization
//! protocols.
//!
//! ## Document Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Document Rows                                     │
//! │                                                                         │
//! │  1. insert()              → status: assembled  (key + number fixed)    │
//! │  2. mark_signed()         → status: signed     (signed XML stored)     │
//! │  3. mark_submitted()      → status: submitted  (before the POST)       │
//! │  4. set_receipt()         → receipt known, poll/reconcile possible     │
//! │  5a. mark_processing()    → status: processing (still queued)          │
//! │  5b. record_rejection()   → status: rejected   (terminal)              │
//! │  5c. record_authorization()                                            │
//! │        ┌─────────────── SINGLE TRANSACTION ──────────────┐             │
//! │        │ UPDATE documents SET status = 'authorized' …    │             │
//! │        │ INSERT INTO protocol_records …                  │             │
//! │        └─────────────────────────────────────────────────┘             │
//! │                                                                         │
//! │  Rows are never deleted. Cancellation and correction are recorded by   │
//! │  the event repository.                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use nfe_core::{
    AccessKey, DocumentModel, DocumentStatus, Environment, Money, ProtocolRecord,
    RejectionCategory,
};

// =============================================================================
// Rows
// =============================================================================

/// A stored document.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DocumentRecord {
    pub id: String,
    pub tenant_id: String,
    pub access_key: String,
    pub environment: Environment,
    pub model: DocumentModel,
    pub series: i64,
    pub number: i64,
    pub status: DocumentStatus,
    pub emitted_at: DateTime<Utc>,
    pub total_cents: i64,
    pub signed_xml: Option<String>,
    pub receipt_number: Option<String>,
    pub status_code: Option<i64>,
    pub status_reason: Option<String>,
    pub rejection_category: Option<String>,
    pub protocol_number: Option<String>,
    pub authorized_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRecord {
    /// Parses the stored access key.
    pub fn key(&self) -> DbResult<AccessKey> {
        AccessKey::parse(&self.access_key)
            .map_err(|e| DbError::corrupt("documents", e.to_string()))
    }

    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    pub fn category(&self) -> Option<RejectionCategory> {
        self.rejection_category
            .as_deref()
            .and_then(RejectionCategory::parse)
    }

    /// The authorization protocol, once the document was authorized.
    pub fn authorization(&self) -> Option<ProtocolRecord> {
        let protocol_number = self.protocol_number.clone()?;
        Some(ProtocolRecord {
            protocol_number: Some(protocol_number),
            receipt_number: self.receipt_number.clone(),
            status_code: self.status_code.unwrap_or_default() as u16,
            reason: self.status_reason.clone().unwrap_or_default(),
            authorized_at: self.authorized_at,
        })
    }
}

/// A stored protocol record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProtocolRow {
    pub id: String,
    pub document_id: String,
    pub event_id: Option<String>,
    pub protocol_number: Option<String>,
    pub receipt_number: Option<String>,
    pub status_code: i64,
    pub reason: String,
    pub authorized_at: Option<DateTime<Utc>>,
    /// The authority's own `protNFe`/`retEvento` block, verbatim.
    pub raw_xml: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ProtocolRow {
    pub fn record(&self) -> ProtocolRecord {
        ProtocolRecord {
            protocol_number: self.protocol_number.clone(),
            receipt_number: self.receipt_number.clone(),
            status_code: self.status_code as u16,
            reason: self.reason.clone(),
            authorized_at: self.authorized_at,
        }
    }
}

/// Values for a freshly assembled document.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub id: String,
    pub tenant_id: String,
    pub access_key: AccessKey,
    pub environment: Environment,
    pub model: DocumentModel,
    pub series: u16,
    pub number: u32,
    pub emitted_at: DateTime<Utc>,
    pub total: Money,
}

const DOCUMENT_COLUMNS: &str = r#"
    id, tenant_id, access_key, environment, model, series, number, status,
    emitted_at, total_cents, signed_xml, receipt_number, status_code,
    status_reason, rejection_category, protocol_number, authorized_at,
    created_at, updated_at
"#;

// =============================================================================
// Repository
// =============================================================================

/// Repository for document rows.
#[derive(Debug, Clone)]
pub struct DocumentRepository {
    pool: SqlitePool,
}

impl DocumentRepository {
    /// Creates a new DocumentRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DocumentRepository { pool }
    }

    /// Inserts an assembled document.
    pub async fn insert(&self, doc: &NewDocument) -> DbResult<DocumentRecord> {
        debug!(
            tenant_id = %doc.tenant_id,
            access_key = %doc.access_key,
            number = doc.number,
            "Inserting document"
        );
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO documents (
                id, tenant_id, access_key, environment, model, series, number,
                status, emitted_at, total_cents, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.tenant_id)
        .bind(doc.access_key.as_str())
        .bind(doc.environment)
        .bind(doc.model)
        .bind(i64::from(doc.series))
        .bind(i64::from(doc.number))
        .bind(DocumentStatus::Assembled)
        .bind(doc.emitted_at)
        .bind(doc.total.cents())
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_by_id(&doc.id)
            .await?
            .ok_or_else(|| DbError::not_found("Document", &doc.id))
    }

    /// Gets a document by row id.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<DocumentRecord>> {
        let sql = format!("SELECT {} FROM documents WHERE id = ?1", DOCUMENT_COLUMNS);
        let row = sqlx::query_as::<_, DocumentRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Finds a tenant's document by access key.
    pub async fn find_by_key(
        &self,
        tenant_id: &str,
        access_key: &str,
    ) -> DbResult<Option<DocumentRecord>> {
        let sql = format!(
            "SELECT {} FROM documents WHERE tenant_id = ?1 AND access_key = ?2",
            DOCUMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, DocumentRecord>(&sql)
            .bind(tenant_id)
            .bind(access_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Finds a tenant's document or fails with `NotFound`.
    pub async fn require_by_key(
        &self,
        tenant_id: &str,
        access_key: &str,
    ) -> DbResult<DocumentRecord> {
        self.find_by_key(tenant_id, access_key)
            .await?
            .ok_or_else(|| DbError::not_found("Document", access_key))
    }

    /// Highest number stored for a series, `None` for an unused series.
    pub async fn highest_number(
        &self,
        tenant_id: &str,
        model: DocumentModel,
        series: u16,
    ) -> DbResult<Option<u32>> {
        let highest: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(number) FROM documents
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

    /// Documents of a series whose number falls in `first..=last`.
    pub async fn list_in_range(
        &self,
        tenant_id: &str,
        model: DocumentModel,
        series: u16,
        first: u32,
        last: u32,
    ) -> DbResult<Vec<DocumentRecord>> {
        let sql = format!(
            r#"
            SELECT {} FROM documents
            WHERE tenant_id = ?1 AND model = ?2 AND series = ?3 AND number BETWEEN ?4 AND ?5
            ORDER BY number
            "#,
            DOCUMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, DocumentRecord>(&sql)
            .bind(tenant_id)
            .bind(model)
            .bind(i64::from(series))
            .bind(i64::from(first))
            .bind(i64::from(last))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Lists a tenant's documents in one status, oldest first.
    pub async fn list_by_status(
        &self,
        tenant_id: &str,
        status: DocumentStatus,
    ) -> DbResult<Vec<DocumentRecord>> {
        let sql = format!(
            "SELECT {} FROM documents WHERE tenant_id = ?1 AND status = ?2 ORDER BY created_at",
            DOCUMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, DocumentRecord>(&sql)
            .bind(tenant_id)
            .bind(status)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Stores the signed XML. Assembled → Signed.
    pub async fn mark_signed(&self, id: &str, signed_xml: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE documents SET status = ?1, signed_xml = ?2, updated_at = ?3
            WHERE id = ?4 AND status = ?5
            "#,
        )
        .bind(DocumentStatus::Signed)
        .bind(signed_xml)
        .bind(Utc::now())
        .bind(id)
        .bind(DocumentStatus::Assembled)
        .execute(&self.pool)
        .await?;

        expect_one(result.rows_affected(), id, "expected assembled")
    }

    /// Signed → Submitted. Written before the document leaves the process, so
    /// a crash mid-submission is visible to reconciliation.
    pub async fn mark_submitted(&self, id: &str) -> DbResult<()> {
        self.guarded_status(id, DocumentStatus::Signed, DocumentStatus::Submitted)
            .await
    }

    /// Stores the batch receipt returned by the authority.
    pub async fn set_receipt(&self, id: &str, receipt_number: &str) -> DbResult<()> {
        sqlx::query("UPDATE documents SET receipt_number = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(receipt_number)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Submitted/Processing → Processing, remembering the last status seen.
    pub async fn mark_processing(&self, id: &str, status_code: u16, reason: &str) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET status = ?1, status_code = ?2, status_reason = ?3, updated_at = ?4
            WHERE id = ?5 AND status IN (?6, ?7)
            "#,
        )
        .bind(DocumentStatus::Processing)
        .bind(i64::from(status_code))
        .bind(reason)
        .bind(Utc::now())
        .bind(id)
        .bind(DocumentStatus::Submitted)
        .bind(DocumentStatus::Processing)
        .execute(&self.pool)
        .await?;

        expect_one(result.rows_affected(), id, "expected submitted or processing")
    }

    /// Submitted/Processing → Rejected. Terminal.
    pub async fn record_rejection(
        &self,
        id: &str,
        status_code: u16,
        reason: &str,
        category: RejectionCategory,
    ) -> DbResult<()> {
        debug!(document_id = %id, status_code, category = %category, "Recording rejection");

        let result = sqlx::query(
            r#"
            UPDATE documents
            SET status = ?1, status_code = ?2, status_reason = ?3,
                rejection_category = ?4, updated_at = ?5
            WHERE id = ?6 AND status IN (?7, ?8)
            "#,
        )
        .bind(DocumentStatus::Rejected)
        .bind(i64::from(status_code))
        .bind(reason)
        .bind(category.as_str())
        .bind(Utc::now())
        .bind(id)
        .bind(DocumentStatus::Submitted)
        .bind(DocumentStatus::Processing)
        .execute(&self.pool)
        .await?;

        expect_one(result.rows_affected(), id, "expected submitted or processing")
    }

    /// Submitted/Processing → Authorized, storing the protocol record in the
    /// same transaction.
    pub async fn record_authorization(
        &self,
        id: &str,
        protocol: &ProtocolRecord,
        raw_xml: Option<&str>,
    ) -> DbResult<()> {
        debug!(
            document_id = %id,
            protocol_number = ?protocol.protocol_number,
            "Recording authorization"
        );
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE documents
            SET status = ?1, status_code = ?2, status_reason = ?3,
                protocol_number = ?4, authorized_at = ?5,
                receipt_number = COALESCE(?6, receipt_number), updated_at = ?7
            WHERE id = ?8 AND status IN (?9, ?10)
            "#,
        )
        .bind(DocumentStatus::Authorized)
        .bind(i64::from(protocol.status_code))
        .bind(&protocol.reason)
        .bind(&protocol.protocol_number)
        .bind(protocol.authorized_at)
        .bind(&protocol.receipt_number)
        .bind(now)
        .bind(id)
        .bind(DocumentStatus::Submitted)
        .bind(DocumentStatus::Processing)
        .execute(&mut *tx)
        .await?;

        expect_one(result.rows_affected(), id, "expected submitted or processing")?;

        insert_protocol(&mut tx, id, None, protocol, raw_xml).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Protocol records of a document, oldest first.
    pub async fn protocols(&self, document_id: &str) -> DbResult<Vec<ProtocolRow>> {
        let rows = sqlx::query_as::<_, ProtocolRow>(
            r#"
            SELECT id, document_id, event_id, protocol_number, receipt_number,
                   status_code, reason, authorized_at, raw_xml, created_at
            FROM protocol_records
            WHERE document_id = ?1
            ORDER BY created_at, rowid
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// The protocol record of the authorization itself.
    pub async fn authorization_protocol(&self, document_id: &str) -> DbResult<Option<ProtocolRow>> {
        let row = sqlx::query_as::<_, ProtocolRow>(
            r#"
            SELECT id, document_id, event_id, protocol_number, receipt_number,
                   status_code, reason, authorized_at, raw_xml, created_at
            FROM protocol_records
            WHERE document_id = ?1 AND event_id IS NULL
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn guarded_status(
        &self,
        id: &str,
        from: DocumentStatus,
        to: DocumentStatus,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE documents SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        )
        .bind(to)
        .bind(Utc::now())
        .bind(id)
        .bind(from)
        .execute(&self.pool)
        .await?;

        expect_one(result.rows_affected(), id, &format!("cannot move to {}", to))
    }
}

/// Inserts a protocol record inside an open transaction.
pub(crate) async fn insert_protocol(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    document_id: &str,
    event_id: Option<&str>,
    protocol: &ProtocolRecord,
    raw_xml: Option<&str>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO protocol_records (
            id, document_id, event_id, protocol_number, receipt_number,
            status_code, reason, authorized_at, raw_xml, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(document_id)
    .bind(event_id)
    .bind(&protocol.protocol_number)
    .bind(&protocol.receipt_number)
    .bind(i64::from(protocol.status_code))
    .bind(&protocol.reason)
    .bind(protocol.authorized_at)
    .bind(raw_xml)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub(crate) fn expect_one(rows: u64, id: &str, reason: &str) -> DbResult<()> {
    if rows == 1 {
        Ok(())
    } else {
        Err(DbError::Conflict {
            entity: "Document".to_string(),
            id: id.to_string(),
            reason: reason.to_string(),
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::repository::tenant::tests::sample_tenant;
    use crate::{Database, DbConfig};
    use nfe_core::AccessKeyParts;

    pub(crate) fn new_document(tenant_id: &str, number: u32) -> NewDocument {
        let key = AccessKey::build(&AccessKeyParts {
            state_code: 35,
            year: 24,
            month: 5,
            emitter_tax_id: "11222333000181".to_string(),
            model: DocumentModel::Nfce,
            series: 1,
            number,
            emission_type: 1,
            numeric_code: 10203040,
        })
        .unwrap();
        NewDocument {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            access_key: key,
            environment: Environment::Homologation,
            model: DocumentModel::Nfce,
            series: 1,
            number,
            emitted_at: Utc::now(),
            total: Money::from_cents(1500),
        }
    }

    pub(crate) fn authorized_protocol() -> ProtocolRecord {
        ProtocolRecord {
            protocol_number: Some("135240000000001".to_string()),
            receipt_number: Some("351000000000001".to_string()),
            status_code: 100,
            reason: "Autorizado o uso da NF-e".to_string(),
            authorized_at: Some(Utc::now()),
        }
    }

    pub(crate) async fn db() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.tenants().upsert(&sample_tenant("t1")).await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_full_lifecycle_to_authorized() {
        let db = db().await;
        let repo = db.documents();
        let doc = repo.insert(&new_document("t1", 7)).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Assembled);

        repo.mark_signed(&doc.id, "<NFe/>").await.unwrap();
        repo.mark_submitted(&doc.id).await.unwrap();
        repo.set_receipt(&doc.id, "351000000000001").await.unwrap();
        repo.mark_processing(&doc.id, 105, "Lote em processamento").await.unwrap();
        repo.record_authorization(&doc.id, &authorized_protocol(), Some("<protNFe/>"))
            .await
            .unwrap();

        let stored = repo.require_by_key("t1", &doc.access_key).await.unwrap();
        assert_eq!(stored.status, DocumentStatus::Authorized);
        assert_eq!(stored.signed_xml.as_deref(), Some("<NFe/>"));
        let protocol = stored.authorization().unwrap();
        assert_eq!(protocol.protocol_number.as_deref(), Some("135240000000001"));

        let raw = repo.authorization_protocol(&doc.id).await.unwrap().unwrap();
        assert_eq!(raw.raw_xml.as_deref(), Some("<protNFe/>"));
    }

    #[tokio::test]
    async fn test_highest_number_per_series() {
        let db = db().await;
        let repo = db.documents();
        assert_eq!(repo.highest_number("t1", DocumentModel::Nfce, 1).await.unwrap(), None);

        repo.insert(&new_document("t1", 12)).await.unwrap();
        repo.insert(&new_document("t1", 5)).await.unwrap();
        assert_eq!(
            repo.highest_number("t1", DocumentModel::Nfce, 1).await.unwrap(),
            Some(12)
        );
        assert_eq!(repo.highest_number("t1", DocumentModel::Nfe, 1).await.unwrap(), None);
        assert_eq!(repo.highest_number("t1", DocumentModel::Nfce, 2).await.unwrap(), None);

        let in_range = repo
            .list_in_range("t1", DocumentModel::Nfce, 1, 1, 10)
            .await
            .unwrap();
        assert_eq!(in_range.len(), 1);
        assert_eq!(in_range[0].number, 5);
    }

    #[tokio::test]
    async fn test_guarded_transitions() {
        let db = db().await;
        let repo = db.documents();
        let doc = repo.insert(&new_document("t1", 8)).await.unwrap();

        // cannot submit before signing
        assert!(matches!(
            repo.mark_submitted(&doc.id).await,
            Err(DbError::Conflict { .. })
        ));
        // cannot authorize an unsubmitted document
        assert!(repo
            .record_authorization(&doc.id, &authorized_protocol(), None)
            .await
            .is_err());
        assert!(repo.protocols(&doc.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejection_is_recorded() {
        let db = db().await;
        let repo = db.documents();
        let doc = repo.insert(&new_document("t1", 9)).await.unwrap();
        repo.mark_signed(&doc.id, "<NFe/>").await.unwrap();
        repo.mark_submitted(&doc.id).await.unwrap();
        repo.record_rejection(&doc.id, 539, "Duplicidade de NF-e", RejectionCategory::Duplicidade)
            .await
            .unwrap();

        let stored = repo.get_by_id(&doc.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Rejected);
        assert_eq!(stored.category(), Some(RejectionCategory::Duplicidade));
        assert_eq!(stored.status_reason.as_deref(), Some("Duplicidade de NF-e"));
        assert!(stored.authorization().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_number_rejected() {
        let db = db().await;
        let repo = db.documents();
        repo.insert(&new_document("t1", 10)).await.unwrap();
        assert!(matches!(
            repo.insert(&new_document("t1", 10)).await,
            Err(DbError::UniqueViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_tenant_rejected() {
        let db = db().await;
        assert!(matches!(
            db.documents().insert(&new_document("ghost", 1)).await,
            Err(DbError::ForeignKeyViolation { .. })
        ));
    }
}
