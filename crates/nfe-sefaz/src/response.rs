//! # Authority Answers
//!
//! Parses the SOAP answers of the authority services.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  retEnviNFe / retConsReciNFe / retConsSitNFe / retEnvEvento             │
//! │  ├── cStat, xMotivo, nRec, dhRecbto       → AuthorityAnswer (batch)      │
//! │  └── protNFe | retEvento                                                │
//! │      └── infProt | infEvento                                            │
//! │          ├── cStat, xMotivo                → ProtocolAnswer (document)   │
//! │          ├── nProt                                                      │
//! │          └── dhRecbto | dhRegEvento                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The batch code says whether the batch was processed (104, 128); the
//! inner code is the verdict on the document or event itself.
//!
//! Voiding (`retInutNFe/infInut`) and service status (`retConsStatServ`)
//! carry a single verdict and have their own shapes, [`VoidingAnswer`] and
//! [`StatusAnswer`].

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{IssueError, IssueResult};
use crate::xml::{extract_element, text_of};
use nfe_core::ProtocolRecord;

/// Inner block that carries the per-document verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InnerBlock {
    Protocol,
    Event,
}

impl InnerBlock {
    const fn element(&self) -> &'static str {
        match self {
            InnerBlock::Protocol => "protNFe",
            InnerBlock::Event => "retEvento",
        }
    }
}

/// Per-document (or per-event) verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolAnswer {
    pub access_key: Option<String>,
    pub status_code: u16,
    pub reason: String,
    pub protocol_number: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    /// The block exactly as the authority sent it.
    pub raw_xml: String,
}

impl ProtocolAnswer {
    pub fn to_record(&self, receipt_number: Option<String>) -> ProtocolRecord {
        ProtocolRecord {
            protocol_number: self.protocol_number.clone(),
            receipt_number,
            status_code: self.status_code,
            reason: self.reason.clone(),
            authorized_at: self.received_at,
        }
    }
}

/// One parsed answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityAnswer {
    pub status_code: u16,
    pub reason: String,
    pub receipt_number: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub protocol: Option<ProtocolAnswer>,
}

impl AuthorityAnswer {
    /// Parses a SOAP envelope (or a bare answer element).
    pub fn parse(body: &str, inner: InnerBlock) -> IssueResult<Self> {
        let content = extract_element(body, "Body").unwrap_or(body);

        let inner_xml = extract_element(content, inner.element());
        let outer = match inner_xml {
            Some(block) => content.replacen(block, "", 1),
            None => content.to_string(),
        };

        let status_code = match text_of(&outer, "cStat") {
            Some(code) => parse_code(&code)?,
            None => return Err(fault(content)),
        };

        let protocol = match inner_xml {
            Some(block) => Some(parse_inner(block)?),
            None => None,
        };

        Ok(AuthorityAnswer {
            status_code,
            reason: text_of(&outer, "xMotivo").unwrap_or_default(),
            receipt_number: text_of(&outer, "nRec").filter(|r| !r.is_empty()),
            received_at: text_of(&outer, "dhRecbto").and_then(|t| parse_time(&t)),
            protocol,
        })
    }

    /// The code that decides the outcome: the inner one when present.
    pub fn verdict(&self) -> (u16, &str) {
        match &self.protocol {
            Some(p) => (p.status_code, p.reason.as_str()),
            None => (self.status_code, self.reason.as_str()),
        }
    }
}

/// Answer of `NFeInutilizacao4`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoidingAnswer {
    pub status_code: u16,
    pub reason: String,
    pub protocol_number: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    /// `retInutNFe` exactly as the authority sent it.
    pub raw_xml: String,
}

impl VoidingAnswer {
    pub fn parse(body: &str) -> IssueResult<Self> {
        let content = extract_element(body, "Body").unwrap_or(body);
        let info = extract_element(content, "infInut").unwrap_or(content);
        let status_code = match text_of(info, "cStat") {
            Some(code) => parse_code(&code)?,
            None => return Err(fault(content)),
        };
        Ok(VoidingAnswer {
            status_code,
            reason: text_of(info, "xMotivo").unwrap_or_default(),
            protocol_number: text_of(info, "nProt").filter(|p| !p.is_empty()),
            received_at: text_of(info, "dhRecbto").and_then(|t| parse_time(&t)),
            raw_xml: extract_element(content, "retInutNFe")
                .unwrap_or(content)
                .to_string(),
        })
    }

    pub fn to_record(&self) -> ProtocolRecord {
        ProtocolRecord {
            protocol_number: self.protocol_number.clone(),
            receipt_number: None,
            status_code: self.status_code,
            reason: self.reason.clone(),
            authorized_at: self.received_at,
        }
    }
}

/// Answer of `NFeStatusServico4`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusAnswer {
    pub status_code: u16,
    pub reason: String,
    pub received_at: Option<DateTime<Utc>>,
    /// Average processing time in seconds (`tMed`).
    pub average_seconds: Option<u32>,
    /// Expected return of a paralyzed service (`dhRetorno`).
    pub return_expected_at: Option<DateTime<Utc>>,
    pub observation: Option<String>,
}

impl StatusAnswer {
    pub fn parse(body: &str) -> IssueResult<Self> {
        let content = extract_element(body, "Body").unwrap_or(body);
        let status_code = match text_of(content, "cStat") {
            Some(code) => parse_code(&code)?,
            None => return Err(fault(content)),
        };
        Ok(StatusAnswer {
            status_code,
            reason: text_of(content, "xMotivo").unwrap_or_default(),
            received_at: text_of(content, "dhRecbto").and_then(|t| parse_time(&t)),
            average_seconds: text_of(content, "tMed").and_then(|t| t.trim().parse().ok()),
            return_expected_at: text_of(content, "dhRetorno").and_then(|t| parse_time(&t)),
            observation: text_of(content, "xObs").filter(|o| !o.is_empty()),
        })
    }

    /// 107 is the only code meaning the service is in operation.
    pub const fn in_operation(&self) -> bool {
        self.status_code == 107
    }
}

/// A body without `cStat`: a SOAP fault or something else entirely.
fn fault(content: &str) -> IssueError {
    let text = text_of(content, "Text")
        .or_else(|| text_of(content, "faultstring"))
        .unwrap_or_else(|| "answer has no cStat".to_string());
    IssueError::transmission(format!("authority fault: {}", text.trim()), false)
}

fn parse_inner(block: &str) -> IssueResult<ProtocolAnswer> {
    let code = text_of(block, "cStat")
        .ok_or_else(|| IssueError::transmission("protocol block has no cStat", false))?;
    Ok(ProtocolAnswer {
        access_key: text_of(block, "chNFe"),
        status_code: parse_code(&code)?,
        reason: text_of(block, "xMotivo").unwrap_or_default(),
        protocol_number: text_of(block, "nProt").filter(|p| !p.is_empty()),
        received_at: text_of(block, "dhRecbto")
            .or_else(|| text_of(block, "dhRegEvento"))
            .and_then(|t| parse_time(&t)),
        raw_xml: block.to_string(),
    })
}

fn parse_code(text: &str) -> IssueResult<u16> {
    text.trim()
        .parse()
        .map_err(|_| IssueError::transmission(format!("invalid cStat '{}'", text), false))
}

fn parse_time(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
