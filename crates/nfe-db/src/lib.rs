//! # nfe-db: Persistence Layer for the NFe Issuer
//!
//! SQLite storage for tenants, documents, protocol records, events and the
//! atomic document-number counters.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Issuer Data Flow                                 │
//! │                                                                         │
//! │  IssuancePipeline / EventProcessor (nfe-sefaz)                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     nfe-db (THIS CRATE)                         │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │    │  (embedded)  │  │   │
//! │  │   │               │    │ TenantRepo     │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ SequenceRepo   │    │ 001_initial  │  │   │
//! │  │   │ WAL + busy    │    │ DocumentRepo   │    │   _schema    │  │   │
//! │  │   │ timeout       │    │ EventRepo      │    │ 002_voided   │  │   │
//! │  │   │               │    │ VoidingRepo    │    │   _ranges    │  │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database file (path from [database] config)                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use nfe_db::{Database, DbConfig};
//! use nfe_core::DocumentModel;
//!
//! let db = Database::new(DbConfig::new("issuer.db")).await?;
//! let number = db.sequences().reserve("tenant-1", DocumentModel::Nfce, 1).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::document::{DocumentRecord, DocumentRepository, NewDocument, ProtocolRow};
pub use repository::event::{EventRecord, EventRepository, NewEvent};
pub use repository::sequence::SequenceRepository;
pub use repository::tenant::TenantRepository;
pub use repository::voiding::{NewVoidedRange, VoidedRangeRecord, VoidingRepository};
