//! # nfe-sefaz: Issuance Engine for the NFe Issuer
//!
//! Turns a finished order into an authorized NF-e (model 55) or NFC-e
//! (model 65): assembles and signs the XML, talks to the state authority
//! (SEFAZ), interprets its answers and files the legal artifacts.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Issuance Pipeline                              │
//! │                                                                         │
//! │   IssueRequest                                                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌────────────────┐   ┌────────────────┐   ┌────────────────────────┐  │
//! │  │ DocumentAssem- │   │ DocumentSigner │   │ TransmissionClient     │  │
//! │  │ bler           │──►│                │──►│                        │  │
//! │  │ validate, tax, │   │ XMLDSig RSA-   │   │ SOAP 1.2 over mTLS     │  │
//! │  │ key, XML       │   │ SHA1, C14N     │   │ submit / poll / retry  │  │
//! │  └───────▲────────┘   └───────▲────────┘   └───────────┬────────────┘  │
//! │          │ number             │ identity               │ answer        │
//! │  ┌───────┴────────┐   ┌───────┴────────┐   ┌───────────▼────────────┐  │
//! │  │ nfe-db         │   │ Certificate    │   │ Status table           │  │
//! │  │ sequences      │   │ Store          │   │ (nfe-core)             │  │
//! │  └────────────────┘   └────────────────┘   └───────────┬────────────┘  │
//! │                                                        │ authorized    │
//! │                                            ┌───────────▼────────────┐  │
//! │                                            │ ArtifactStore          │  │
//! │                                            │ nfeProc XML + DANFE    │  │
//! │                                            └────────────────────────┘  │
//! │                                                                         │
//! │  EventProcessor: cancellation (110111) and correction letter (110110)  │
//! │  on authorized documents, through the same signer and client.          │
//! │  NumberVoider: voids unused number ranges (inutilizacao).              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - Issuer configuration (authority, storage, database, server)
//! - [`error`] - Issuance error type and categories
//! - [`certificate`] - Per-tenant PKCS#12 storage and signing identities
//! - [`endpoints`] - Authorizer URLs per state, environment and model
//! - [`xml`] - Canonical XML writer and element readers
//! - [`assembler`] - Order validation and NF-e 4.00 XML
//! - [`signer`] - Enveloped XMLDSig signatures
//! - [`transmission`] - SOAP calls with retry and receipt polling
//! - [`response`] - Authority answer parsing
//! - [`danfe`] - DANFE rendering
//! - [`artifacts`] - Authorized XML and PDF files on disk
//! - [`context`] - Shared collaborators and the authority status check
//! - [`pipeline`] - `issue` and `reconcile`
//! - [`events`] - Cancellation and correction letters
//! - [`voiding`] - Voiding of unused number ranges
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use nfe_sefaz::{IssuancePipeline, IssuerConfig, IssuerContext};
//!
//! let config = IssuerConfig::load(None)?;
//! let db = nfe_db::Database::new(
//!     nfe_db::DbConfig::new(&config.database.path)
//!         .max_connections(config.database.max_connections),
//! )
//! .await?;
//! let ctx = Arc::new(IssuerContext::new(&config, db));
//!
//! let outcome = IssuancePipeline::new(ctx).issue("tenant-1", request).await?;
//! println!("{} {}", outcome.access_key, outcome.status);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod certificate;
pub mod endpoints;
pub mod xml;

pub mod assembler;
pub mod signer;

pub mod response;
pub mod transmission;

pub mod artifacts;
pub mod danfe;

pub mod context;
pub mod events;
pub mod pipeline;
pub mod voiding;

#[cfg(test)]
mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use artifacts::{ArtifactKind, ArtifactStore};
pub use assembler::{DocumentAssembler, IssueRequest};
pub use certificate::{CertificateMetadata, CertificateStore, CertificateStoreError, Passphrase};
pub use config::{AuthoritySettings, EndpointOverride, IssuerConfig};
pub use context::IssuerContext;
pub use danfe::{CorrectionLetterData, DanfeRenderer, LopdfRenderer};
pub use endpoints::{Endpoint, EndpointResolver};
pub use error::{ErrorCategory, IssueError, IssueResult};
pub use events::{EventOutcome, EventProcessor};
pub use pipeline::IssuancePipeline;
pub use response::{StatusAnswer, VoidingAnswer};
pub use transmission::{AuthorityTransport, HttpTransport, TransmissionClient};
pub use voiding::{NumberVoider, VoidingOutcome, VoidingRequest};
