//! # nfe-core: Pure Fiscal Logic for the NFe Issuer
//!
//! This crate is the **heart** of the issuer. It contains every fiscal rule
//! as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        NFe Issuer Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    nfe-api (axum)                               │   │
//! │  │    issue, cancel, correct, certificates, artifacts             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    nfe-sefaz (pipeline)                         │   │
//! │  │    assemble ──► sign ──► submit/poll ──► persist artifacts     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ nfe-core (THIS CRATE) ★                         │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │access_key │  │  status   │  │ lifecycle │  │   │
//! │  │   │ Document  │  │ 44 digits │  │ cStat map │  │  state    │  │   │
//! │  │   │  Event    │  │  mod 11   │  │ categories│  │  machine  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐                 │   │
//! │  │   │   money   │  │    tax    │  │validation │                 │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘                 │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Tenant, FiscalDocument, FiscalEvent, etc.)
//! - [`money`] - Money type with integer centavos (no floating point!)
//! - [`access_key`] - The 44-digit access key and its check digit
//! - [`tax`] - Per-item tax computation and document totals
//! - [`status`] - Authority status code interpretation
//! - [`lifecycle`] - Document status transitions and event sequencing
//! - [`error`] - Domain error types
//! - [`validation`] - Tax id check digits and input rules
//!
//! ## Example Usage
//!
//! ```rust
//! use nfe_core::validation::is_valid_cnpj;
//! use nfe_core::status::{interpret, Outcome};
//!
//! assert!(is_valid_cnpj("11.222.333/0001-81"));
//!
//! let status = interpret(100, "Autorizado o uso da NF-e");
//! assert_eq!(status.outcome, Outcome::Authorized);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod access_key;
pub mod error;
pub mod lifecycle;
pub mod money;
pub mod status;
pub mod tax;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use nfe_core::Money` instead of
// `use nfe_core::money::Money`

pub use access_key::{AccessKey, AccessKeyParts};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use status::{Outcome, RejectionCategory, StatusInterpretation};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// NF-e layout version written into `infNFe/@versao`.
pub const LAYOUT_VERSION: &str = "4.00";

/// Event layout version written into `infEvento/@versao`.
pub const EVENT_LAYOUT_VERSION: &str = "1.00";

/// Namespace of every NF-e document, batch and event.
pub const NFE_NAMESPACE: &str = "http://www.portalfiscal.inf.br/nfe";

/// Minimum length (after trimming) of a cancellation justification.
pub const MIN_JUSTIFICATION_CHARS: usize = 15;

/// Maximum length of a cancellation justification (`xJust`).
pub const MAX_JUSTIFICATION_CHARS: usize = 255;

/// Minimum length of a correction letter text.
pub const MIN_CORRECTION_CHARS: usize = 15;

/// Maximum length of a correction letter text (`xCorrecao`).
pub const MAX_CORRECTION_CHARS: usize = 1000;

/// Correction letters per document are numbered 1..=20.
pub const MAX_CORRECTION_SEQUENCE: u32 = 20;

/// Largest certificate container accepted on upload (5 MiB).
pub const MAX_CERTIFICATE_BYTES: usize = 5 * 1024 * 1024;

/// Largest document number representable in the 9-digit key field.
pub const MAX_DOCUMENT_NUMBER: u32 = 999_999_999;

/// Largest series representable in the 3-digit key field.
pub const MAX_SERIES: u16 = 999;
