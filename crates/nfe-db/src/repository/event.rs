//! # Event Repository
//!
//! Registered cancellations and correction letters.
//!
//! ## Registration Transaction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  authority answers 135/136/155                                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌──────────────────── SINGLE TRANSACTION ────────────────────┐        │
//! │  │ 1. INSERT INTO fiscal_events (kind, sequence, text …)      │        │
//! │  │ 2. INSERT INTO protocol_records (event_id …)               │        │
//! │  │ 3. UPDATE documents SET status = 'cancelled' | 'corrected' │        │
//! │  │    WHERE status IN ('authorized', 'corrected')             │        │
//! │  └────────────────────────────────────────────────────────────┘        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ← the event never exists without its protocol and status       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only registered events are stored. A rejected event leaves no row and
//! never touches the parent document.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::repository::document::{expect_one, insert_protocol};
use nfe_core::{DocumentStatus, EventKind, ProtocolRecord};

/// A stored event.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRecord {
    pub id: String,
    pub document_id: String,
    pub kind: EventKind,
    pub sequence: i64,
    pub text: String,
    pub protocol_number: Option<String>,
    pub status_code: i64,
    pub reason: String,
    pub registered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl EventRecord {
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

/// Values for an event the authority registered.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub document_id: String,
    pub kind: EventKind,
    pub sequence: u32,
    pub text: String,
    pub protocol: ProtocolRecord,
    /// The authority's `retEvento` block, verbatim.
    pub raw_xml: Option<String>,
}

/// Repository for fiscal events.
#[derive(Debug, Clone)]
pub struct EventRepository {
    pool: SqlitePool,
}

impl EventRepository {
    /// Creates a new EventRepository.
    pub fn new(pool: SqlitePool) -> Self {
        EventRepository { pool }
    }

    /// Highest registered sequence of a kind, if any.
    pub async fn last_sequence(&self, document_id: &str, kind: EventKind) -> DbResult<Option<u32>> {
        let last: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(sequence) FROM fiscal_events WHERE document_id = ?1 AND kind = ?2",
        )
        .bind(document_id)
        .bind(kind)
        .fetch_one(&self.pool)
        .await?;
        Ok(last.map(|n| n as u32))
    }

    /// Events of a document, in registration order.
    pub async fn list(&self, document_id: &str) -> DbResult<Vec<EventRecord>> {
        let rows = sqlx::query_as::<_, EventRecord>(
            r#"
            SELECT id, document_id, kind, sequence, text, protocol_number,
                   status_code, reason, registered_at, created_at
            FROM fiscal_events
            WHERE document_id = ?1
            ORDER BY created_at, rowid
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Registers a cancellation and moves the document to Cancelled.
    pub async fn record_cancellation(&self, event: &NewEvent) -> DbResult<EventRecord> {
        self.register(event, DocumentStatus::Cancelled).await
    }

    /// Registers a correction letter and moves the document to Corrected.
    pub async fn record_correction(&self, event: &NewEvent) -> DbResult<EventRecord> {
        self.register(event, DocumentStatus::Corrected).await
    }

    async fn register(&self, event: &NewEvent, new_status: DocumentStatus) -> DbResult<EventRecord> {
        debug!(
            document_id = %event.document_id,
            kind = %event.kind,
            sequence = event.sequence,
            "Registering event"
        );
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO fiscal_events (
                id, document_id, kind, sequence, text, protocol_number,
                status_code, reason, registered_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&id)
        .bind(&event.document_id)
        .bind(event.kind)
        .bind(i64::from(event.sequence))
        .bind(&event.text)
        .bind(&event.protocol.protocol_number)
        .bind(i64::from(event.protocol.status_code))
        .bind(&event.protocol.reason)
        .bind(event.protocol.authorized_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        insert_protocol(
            &mut tx,
            &event.document_id,
            Some(&id),
            &event.protocol,
            event.raw_xml.as_deref(),
        )
        .await?;

        let result = sqlx::query(
            r#"
            UPDATE documents SET status = ?1, updated_at = ?2
            WHERE id = ?3 AND status IN (?4, ?5)
            "#,
        )
        .bind(new_status)
        .bind(now)
        .bind(&event.document_id)
        .bind(DocumentStatus::Authorized)
        .bind(DocumentStatus::Corrected)
        .execute(&mut *tx)
        .await?;
        expect_one(
            result.rows_affected(),
            &event.document_id,
            "document is no longer authorized",
        )?;

        tx.commit().await?;

        Ok(EventRecord {
            id,
            document_id: event.document_id.clone(),
            kind: event.kind,
            sequence: i64::from(event.sequence),
            text: event.text.clone(),
            protocol_number: event.protocol.protocol_number.clone(),
            status_code: i64::from(event.protocol.status_code),
            reason: event.protocol.reason.clone(),
            registered_at: event.protocol.authorized_at,
            created_at: now,
        })
    }

    /// Checks whether a document has a registered cancellation.
    pub async fn has_cancellation(&self, document_id: &str) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM fiscal_events WHERE document_id = ?1 AND kind = ?2",
        )
        .bind(document_id)
        .bind(EventKind::Cancellation)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::document::tests::{authorized_protocol, db, new_document};
    use crate::Database;

    async fn authorized_document(db: &Database, number: u32) -> String {
        let repo = db.documents();
        let doc = repo.insert(&new_document("t1", number)).await.unwrap();
        repo.mark_signed(&doc.id, "<NFe/>").await.unwrap();
        repo.mark_submitted(&doc.id).await.unwrap();
        repo.record_authorization(&doc.id, &authorized_protocol(), None)
            .await
            .unwrap();
        doc.id
    }

    fn event(document_id: &str, kind: EventKind, sequence: u32) -> NewEvent {
        NewEvent {
            document_id: document_id.to_string(),
            kind,
            sequence,
            text: "Texto com mais de quinze caracteres".to_string(),
            protocol: ProtocolRecord {
                protocol_number: Some(format!("13524000000{:04}", sequence)),
                receipt_number: None,
                status_code: 135,
                reason: "Evento registrado e vinculado a NF-e".to_string(),
                authorized_at: Some(Utc::now()),
            },
            raw_xml: Some("<retEvento/>".to_string()),
        }
    }

    #[tokio::test]
    async fn test_corrections_then_cancellation() {
        let db = db().await;
        let id = authorized_document(&db, 20).await;
        let events = db.events();

        assert_eq!(events.last_sequence(&id, EventKind::Correction).await.unwrap(), None);
        events.record_correction(&event(&id, EventKind::Correction, 1)).await.unwrap();
        events.record_correction(&event(&id, EventKind::Correction, 2)).await.unwrap();
        assert_eq!(events.last_sequence(&id, EventKind::Correction).await.unwrap(), Some(2));

        let doc = db.documents().get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Corrected);

        events.record_cancellation(&event(&id, EventKind::Cancellation, 1)).await.unwrap();
        assert!(events.has_cancellation(&id).await.unwrap());

        let doc = db.documents().get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Cancelled);
        assert_eq!(events.list(&id).await.unwrap().len(), 3);
        // one authorization + three events
        assert_eq!(db.documents().protocols(&id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_cancelled_document_takes_no_more_events() {
        let db = db().await;
        let id = authorized_document(&db, 21).await;
        let events = db.events();
        events.record_cancellation(&event(&id, EventKind::Cancellation, 1)).await.unwrap();

        let err = events
            .record_correction(&event(&id, EventKind::Correction, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict { .. }));
        // rolled back
        assert_eq!(events.list(&id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_sequence_rejected() {
        let db = db().await;
        let id = authorized_document(&db, 22).await;
        let events = db.events();
        events.record_correction(&event(&id, EventKind::Correction, 1)).await.unwrap();
        assert!(matches!(
            events.record_correction(&event(&id, EventKind::Correction, 1)).await,
            Err(DbError::UniqueViolation { .. })
        ));
    }
}
