//! # Status Interpretation
//!
//! Maps the authority's numeric status codes (`cStat`) onto a closed outcome
//! taxonomy.
//!
//! ## Outcome Flow
//! ```text
//! cStat ──► interpret() ──┬── 100, 150          ──► Authorized
//!                         ├── 103, 104, 105, 128 ──► Processing
//!                         ├── 102, 135, 136, 155 ──► Registered (events, voiding)
//!                         ├── table entry       ──► Rejected { category }
//!                         └── anything else     ──► Rejected { outros }
//!                                                   (authority reason kept verbatim)
//! ```
//!
//! Interpretation never fails: an unknown code is a rejection in the
//! `outros` category, carrying the authority's own text byte-for-byte.

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

// =============================================================================
// Outcome
// =============================================================================

/// Closed set of outcomes a status code can mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The document is authorized for use.
    Authorized,
    /// Queued or still being processed; poll again.
    Processing,
    /// An event (cancellation, correction) was registered.
    Registered,
    /// Terminal rejection. Never retried.
    Rejected,
}

impl Outcome {
    /// Terminal outcomes end polling and must never be retried.
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Processing)
    }
}

// =============================================================================
// Rejection Category
// =============================================================================

/// Category of a status code. String names are stable and stored in the
/// database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum RejectionCategory {
    Duplicidade,
    Documento,
    Data,
    Chave,
    Ambiente,
    Localizacao,
    Certificado,
    Produto,
    Processamento,
    Outros,
}

impl RejectionCategory {
    pub const fn as_str(&self) -> &'static str {
        match self {
            RejectionCategory::Duplicidade => "duplicidade",
            RejectionCategory::Documento => "documento",
            RejectionCategory::Data => "data",
            RejectionCategory::Chave => "chave",
            RejectionCategory::Ambiente => "ambiente",
            RejectionCategory::Localizacao => "localizacao",
            RejectionCategory::Certificado => "certificado",
            RejectionCategory::Produto => "produto",
            RejectionCategory::Processamento => "processamento",
            RejectionCategory::Outros => "outros",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let category = match value {
            "duplicidade" => RejectionCategory::Duplicidade,
            "documento" => RejectionCategory::Documento,
            "data" => RejectionCategory::Data,
            "chave" => RejectionCategory::Chave,
            "ambiente" => RejectionCategory::Ambiente,
            "localizacao" => RejectionCategory::Localizacao,
            "certificado" => RejectionCategory::Certificado,
            "produto" => RejectionCategory::Produto,
            "processamento" => RejectionCategory::Processamento,
            "outros" => RejectionCategory::Outros,
            _ => return None,
        };
        Some(category)
    }
}

impl fmt::Display for RejectionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Code Table
// =============================================================================

struct Entry {
    code: u16,
    outcome: Outcome,
    category: Option<RejectionCategory>,
    title: &'static str,
    description: &'static str,
    remediation: &'static str,
}

const fn rejected(
    code: u16,
    category: RejectionCategory,
    title: &'static str,
    description: &'static str,
    remediation: &'static str,
) -> Entry {
    Entry {
        code,
        outcome: Outcome::Rejected,
        category: Some(category),
        title,
        description,
        remediation,
    }
}

const fn accepted(
    code: u16,
    outcome: Outcome,
    category: Option<RejectionCategory>,
    title: &'static str,
    description: &'static str,
    remediation: &'static str,
) -> Entry {
    Entry {
        code,
        outcome,
        category,
        title,
        description,
        remediation,
    }
}

use RejectionCategory::*;

static TABLE: &[Entry] = &[
    accepted(100, Outcome::Authorized, None,
        "Authorized",
        "The document was authorized for use.",
        "No action needed."),
    accepted(150, Outcome::Authorized, None,
        "Authorized out of time",
        "The document was authorized after the regular submission window.",
        "No action needed."),
    accepted(103, Outcome::Processing, Some(Processamento),
        "Batch received",
        "The batch was received and queued for processing.",
        "Poll the receipt again in a few seconds."),
    accepted(104, Outcome::Processing, Some(Processamento),
        "Batch processed",
        "The batch was processed; the individual result is in the protocol block.",
        "Read the protocol result."),
    accepted(105, Outcome::Processing, Some(Processamento),
        "Batch in processing",
        "The batch is still being processed by the authority.",
        "Poll the receipt again in a few seconds."),
    accepted(128, Outcome::Processing, Some(Processamento),
        "Event batch processed",
        "The event batch was processed; the individual result is in the event block.",
        "Read the event result."),
    accepted(135, Outcome::Registered, None,
        "Event registered",
        "The event was registered and linked to the document.",
        "No action needed."),
    accepted(136, Outcome::Registered, None,
        "Event registered, not linked",
        "The event was registered but could not be linked to the document.",
        "No action needed."),
    accepted(155, Outcome::Registered, None,
        "Cancellation registered out of time",
        "The cancellation was registered after the regular window.",
        "No action needed."),
    accepted(102, Outcome::Registered, None,
        "Number range voided",
        "The authority homologated the voiding of the number range.",
        "No action needed."),
    rejected(206, Duplicidade,
        "Number already voided",
        "This document number was voided at the authority and cannot be issued.",
        "Issue under a different number or check the voided ranges."),
    rejected(539, Duplicidade,
        "Duplicate document",
        "A document with this series and number is already authorized.",
        "Issue under the next sequence number."),
    rejected(241, Duplicidade,
        "Number in range already used",
        "A number inside the requested range was already used by a document.",
        "Void only numbers that never reached the authority."),
    rejected(256, Duplicidade,
        "Number in range already voided",
        "A number inside the requested range is already voided.",
        "Check the voided ranges and request only the missing numbers."),
    rejected(563, Duplicidade,
        "Voiding already requested",
        "A voiding request for this same range was already homologated.",
        "No action needed; the range is voided."),
    rejected(573, Duplicidade,
        "Duplicate event",
        "An event with this type and sequence is already registered.",
        "Use the next event sequence number."),
    rejected(101, Documento,
        "Already cancelled",
        "The document was already cancelled at the authority.",
        "No further events can be issued for this document."),
    rejected(110, Documento,
        "Use denied",
        "The authority denied use of the document.",
        "Check the emitter and recipient registration status."),
    rejected(204, Documento,
        "Invalid CNPJ",
        "The company CNPJ is incorrect or invalid.",
        "Correct the company CNPJ in the tenant settings."),
    rejected(207, Documento,
        "Invalid emitter CNPJ",
        "The emitter CNPJ is incorrect or invalid.",
        "Correct the company CNPJ in the tenant settings."),
    rejected(209, Documento,
        "Invalid state registration",
        "The emitter state registration (IE) is incorrect or invalid.",
        "Correct the state registration in the tenant settings."),
    rejected(215, Documento,
        "Invalid recipient tax id",
        "The recipient CNPJ/CPF is incorrect.",
        "Correct the recipient tax id."),
    rejected(217, Documento,
        "Document not found",
        "The authority has no record of this access key.",
        "Check the access key and the environment."),
    rejected(401, Documento,
        "Invalid CPF",
        "The emitter CPF is incorrect or invalid.",
        "Correct the CPF in the tenant settings."),
    rejected(228, Data,
        "Emission date too old",
        "The emission date is more than 30 days in the past.",
        "Issue with a recent emission date."),
    rejected(703, Data,
        "Emission date in the future",
        "The emission date is ahead of the authority clock.",
        "Issue with the current date and check the server clock."),
    rejected(315, Data,
        "Emission date before start of use",
        "The emission date precedes the start of electronic invoices in the state.",
        "Issue with a valid emission date."),
    rejected(502, Chave,
        "Access key mismatch",
        "The access key does not match the document data.",
        "Reassemble the document to generate a consistent key."),
    rejected(253, Chave,
        "Invalid key check digit",
        "The access key check digit is incorrect.",
        "Reassemble the document to recompute the check digit."),
    rejected(252, Ambiente,
        "Wrong environment",
        "The document environment does not match the service environment.",
        "Issue against the matching environment (production or homologation)."),
    rejected(226, Localizacao,
        "Wrong state",
        "The emitter state does not match the authorizing state.",
        "Check the tenant state code."),
    rejected(247, Localizacao,
        "Divergent state",
        "The emitter state abbreviation differs from the authorizing state.",
        "Check the tenant state code."),
    rejected(270, Localizacao,
        "Unknown municipality",
        "The municipality code does not exist in the IBGE table.",
        "Correct the municipality code."),
    rejected(272, Localizacao,
        "Unknown emitter municipality",
        "The emitter municipality code does not exist.",
        "Correct the emitter municipality code."),
    rejected(273, Localizacao,
        "Municipality outside state",
        "The municipality code does not belong to the emitter state.",
        "Check that the municipality code matches the state."),
    rejected(280, Certificado,
        "Invalid certificate",
        "The signing certificate is expired or invalid.",
        "Upload a valid certificate for the tenant."),
    rejected(897, Produto,
        "Invalid numeric code",
        "The document numeric code has an invalid format.",
        "Reassemble the document to generate a new numeric code."),
    rejected(611, Produto,
        "Invalid GTIN",
        "The GTIN/EAN of one or more items is incorrect.",
        "Correct the GTIN or leave it empty when the product has none."),
];

// =============================================================================
// Interpretation
// =============================================================================

/// The meaning of one status code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StatusInterpretation {
    pub code: u16,
    pub outcome: Outcome,
    /// `None` for authorized and registered outcomes.
    pub category: Option<RejectionCategory>,
    pub title: String,
    pub description: String,
    pub remediation: String,
    /// The authority's own reason (`xMotivo`), verbatim.
    pub reason: String,
}

impl StatusInterpretation {
    pub fn is_rejection(&self) -> bool {
        self.outcome == Outcome::Rejected
    }

    /// Category name as stored in the database.
    pub fn category_name(&self) -> Option<&'static str> {
        self.category.map(|c| c.as_str())
    }
}

/// Interprets a status code. Never fails.
///
/// ## Example
/// ```rust
/// use nfe_core::status::{interpret, Outcome, RejectionCategory};
///
/// let dup = interpret(539, "Rejeicao: Duplicidade de NF-e");
/// assert_eq!(dup.outcome, Outcome::Rejected);
/// assert_eq!(dup.category, Some(RejectionCategory::Duplicidade));
///
/// let odd = interpret(999, "Rejeicao: algo novo");
/// assert_eq!(odd.category, Some(RejectionCategory::Outros));
/// assert_eq!(odd.description, "Rejeicao: algo novo");
/// ```
pub fn interpret(code: u16, reason: &str) -> StatusInterpretation {
    match TABLE.iter().find(|entry| entry.code == code) {
        Some(entry) => StatusInterpretation {
            code,
            outcome: entry.outcome,
            category: entry.category,
            title: entry.title.to_string(),
            description: entry.description.to_string(),
            remediation: entry.remediation.to_string(),
            reason: reason.to_string(),
        },
        None => StatusInterpretation {
            code,
            outcome: Outcome::Rejected,
            category: Some(Outros),
            title: format!("Status {}", code),
            description: reason.to_string(),
            remediation: "See the authority reason for details.".to_string(),
            reason: reason.to_string(),
        },
    }
}

/// Whether the code appears in the table.
pub fn is_known(code: u16) -> bool {
    TABLE.iter().any(|entry| entry.code == code)
}

// =============================================================================
// Unit Tests
// =============================================================================
