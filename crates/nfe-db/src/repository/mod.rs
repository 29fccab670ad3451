//! # Repository Module
//!
//! Database repository implementations for the issuer.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Layout                                    │
//! │                                                                         │
//! │  IssuancePipeline / EventProcessor                                     │
//! │       │                                                                 │
//! │       │  db.sequences().reserve(tenant, model, series)                 │
//! │       │  db.documents().record_authorization(id, protocol)             │
//! │       ▼                                                                 │
//! │  TenantRepository     upsert, get                                      │
//! │  SequenceRepository   reserve (atomic), seed, peek                     │
//! │  DocumentRepository   insert, status transitions, protocols            │
//! │  EventRepository      registered events, one transaction each          │
//! │  VoidingRepository    voided number ranges, counter raised with them   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Status updates are guarded (`WHERE status = ?`) so a document never
//! skips a state even when two requests race.

pub mod document;
pub mod event;
pub mod sequence;
pub mod tenant;
pub mod voiding;
