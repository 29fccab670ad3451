//! # Event Processor
//!
//! Cancellations (110111) and correction letters (110110) of authorized
//! documents.
//!
//! ## Event Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  cancel / correct                                                       │
//! │     │                                                                   │
//! │     ▼  local checks      text length, document state, sequence,         │
//! │     │                    authorization protocol, cancellation window    │
//! │     ▼  build <evento>    infEvento Id = ID{tpEvento}{key}{nSeq:02}      │
//! │     ▼  sign              XMLDSig over infEvento                         │
//! │     ▼  send_event        NFeRecepcaoEvento4                             │
//! │     │                                                                   │
//! │     ├── 135/136/155 ──► one transaction: event row, protocol record,    │
//! │     │                   document status; then procEventoNFe file        │
//! │     │                   (and the letter's PDF for 110110)               │
//! │     └── anything else ─► Rejected, nothing changes                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::artifacts::wrap_event_proc;
use crate::assembler::brasilia;
use crate::context::IssuerContext;
use crate::error::{IssueError, IssueResult};
use crate::response::AuthorityAnswer;
use crate::signer::{sign, SignedRoot};
use crate::xml::XmlWriter;
use nfe_core::lifecycle::{
    check_correction_sequence, ensure_cancellable, ensure_correctable,
    ensure_within_cancellation_window,
};
use nfe_core::status::interpret;
use nfe_core::validation::{validate_correction_text, validate_justification};
use nfe_core::{
    AccessKey, DocumentStatus, Environment, EventKind, Outcome, RejectionCategory,
    EVENT_LAYOUT_VERSION, NFE_NAMESPACE,
};
use nfe_db::{DocumentRecord, NewEvent};

/// Conditions of use every correction letter must carry verbatim.
pub const CORRECTION_CONDITIONS: &str = "A Carta de Correcao e disciplinada pelo paragrafo 1o-A do art. 7o do Convenio S/N, de 15 de dezembro de 1970 e pode ser utilizada para regularizacao de erro ocorrido na emissao de documento fiscal, desde que o erro nao esteja relacionado com: I - as variaveis que determinam o valor do imposto tais como: base de calculo, aliquota, diferenca de preco, quantidade, valor da operacao ou da prestacao; II - a correcao de dados cadastrais que implique mudanca do remetente ou do destinatario; III - a data de emissao ou de saida.";

/// Cancellations always carry sequence 1.
const CANCELLATION_SEQUENCE: u32 = 1;

/// What a registered event left behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventOutcome {
    pub access_key: String,
    pub kind: EventKind,
    pub sequence: u32,
    /// Document status after the event.
    pub status: DocumentStatus,
    pub protocol_number: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
    pub artifact: String,
    /// Correction letter PDF. Absent when rendering failed; reading the
    /// PDF later renders it again.
    pub pdf: Option<String>,
}

/// Content of one event, before signing.
#[derive(Debug, Clone)]
struct EventDraft<'a> {
    kind: EventKind,
    access_key: &'a AccessKey,
    environment: Environment,
    sequence: u32,
    occurred_at: DateTime<Utc>,
    /// Authorization protocol; cancellations only.
    protocol_number: Option<&'a str>,
    text: &'a str,
}

impl EventDraft<'_> {
    fn id(&self) -> String {
        format!(
            "ID{}{}{:02}",
            self.kind.type_code(),
            self.access_key,
            self.sequence
        )
    }

    fn to_xml(&self) -> String {
        let id = self.id();
        let occurred = self
            .occurred_at
            .with_timezone(&brasilia())
            .format("%Y-%m-%dT%H:%M:%S%:z")
            .to_string();

        let mut w = XmlWriter::new();
        w.open(
            "evento",
            &[("xmlns", NFE_NAMESPACE), ("versao", EVENT_LAYOUT_VERSION)],
        )
        .open("infEvento", &[("Id", &id)])
        .leaf("cOrgao", &self.access_key.state_code().to_string())
        .leaf("tpAmb", &self.environment.code().to_string())
        .leaf("CNPJ", self.access_key.emitter_tax_id())
        .leaf("chNFe", self.access_key.as_str())
        .leaf("dhEvento", &occurred)
        .leaf("tpEvento", self.kind.type_code())
        .leaf("nSeqEvento", &self.sequence.to_string())
        .leaf("verEvento", EVENT_LAYOUT_VERSION)
        .open("detEvento", &[("versao", EVENT_LAYOUT_VERSION)])
        .leaf("descEvento", self.kind.description());
        match self.kind {
            EventKind::Cancellation => {
                w.opt_leaf("nProt", self.protocol_number)
                    .leaf("xJust", self.text);
            }
            EventKind::Correction => {
                w.leaf("xCorrecao", self.text)
                    .leaf("xCondUso", CORRECTION_CONDITIONS);
            }
        }
        w.close("detEvento").close("infEvento").close("evento");
        w.finish()
    }
}

// =============================================================================
// Processor
// =============================================================================

pub struct EventProcessor {
    ctx: Arc<IssuerContext>,
}

impl EventProcessor {
    pub fn new(ctx: Arc<IssuerContext>) -> Self {
        EventProcessor { ctx }
    }

    /// Cancels an authorized document.
    pub async fn cancel(
        &self,
        tenant_id: &str,
        access_key: &str,
        justification: &str,
    ) -> IssueResult<EventOutcome> {
        let justification = validate_justification(justification)?;
        let key = AccessKey::parse(access_key)?;
        let document = self
            .ctx
            .db
            .documents()
            .require_by_key(tenant_id, key.as_str())
            .await?;

        ensure_cancellable(document.status, key.as_str())?;
        let protocol_number = document.protocol_number.clone().ok_or_else(|| {
            IssueError::InvalidState(format!("{} has no authorization protocol", key))
        })?;
        let authorized_at = document.authorized_at.ok_or_else(|| {
            IssueError::InvalidState(format!("{} has no authorization time", key))
        })?;
        ensure_within_cancellation_window(
            authorized_at,
            Utc::now(),
            self.ctx.events.cancellation_window_hours,
        )?;

        let draft = EventDraft {
            kind: EventKind::Cancellation,
            access_key: &key,
            environment: document.environment,
            sequence: CANCELLATION_SEQUENCE,
            occurred_at: Utc::now(),
            protocol_number: Some(&protocol_number),
            text: &justification,
        };
        self.register(tenant_id, &document, &draft).await
    }

    /// Registers correction letter number `sequence`.
    pub async fn correct(
        &self,
        tenant_id: &str,
        access_key: &str,
        correction: &str,
        sequence: u32,
    ) -> IssueResult<EventOutcome> {
        let correction = validate_correction_text(correction)?;
        let key = AccessKey::parse(access_key)?;
        let document = self
            .ctx
            .db
            .documents()
            .require_by_key(tenant_id, key.as_str())
            .await?;

        ensure_correctable(document.status)?;
        let last = self
            .ctx
            .db
            .events()
            .last_sequence(&document.id, EventKind::Correction)
            .await?;
        check_correction_sequence(last, sequence)?;

        let draft = EventDraft {
            kind: EventKind::Correction,
            access_key: &key,
            environment: document.environment,
            sequence,
            occurred_at: Utc::now(),
            protocol_number: None,
            text: &correction,
        };
        self.register(tenant_id, &document, &draft).await
    }

    /// Signs, sends and records an event.
    async fn register(
        &self,
        tenant_id: &str,
        document: &DocumentRecord,
        draft: &EventDraft<'_>,
    ) -> IssueResult<EventOutcome> {
        let key = draft.access_key;
        let endpoint = self
            .ctx
            .resolver
            .resolve(key.state_code(), document.environment, document.model)?;
        endpoint.ensure_environment(document.environment)?;

        let lease = self.ctx.signing_lease(tenant_id).await?;
        let identity = lease.identity()?;
        let signed = sign(&draft.to_xml(), SignedRoot::Event, &identity)?;

        info!(
            tenant_id = %tenant_id,
            access_key = %key,
            kind = %draft.kind,
            sequence = draft.sequence,
            "Sending event"
        );
        let answer = self
            .ctx
            .transmission
            .send_event(&endpoint, &signed, lease.certificate())
            .await?;
        drop(lease);

        let protocol = registered_protocol(&answer, key, draft.kind)?;
        let record = protocol.to_record(None);
        let event = NewEvent {
            document_id: document.id.clone(),
            kind: draft.kind,
            sequence: draft.sequence,
            text: draft.text.to_string(),
            protocol: record.clone(),
            raw_xml: Some(protocol.raw_xml.clone()),
        };
        let events = self.ctx.db.events();
        let status = match draft.kind {
            EventKind::Cancellation => {
                events.record_cancellation(&event).await?;
                DocumentStatus::Cancelled
            }
            EventKind::Correction => {
                events.record_correction(&event).await?;
                DocumentStatus::Corrected
            }
        };

        let artifact = self
            .ctx
            .artifacts
            .persist_event(
                tenant_id,
                document.environment,
                key,
                draft.kind,
                draft.sequence,
                &signed,
                &protocol.raw_xml,
            )
            .await?;

        let pdf = match (draft.kind, document.signed_xml.as_deref()) {
            (EventKind::Correction, Some(document_xml)) => {
                let event_xml = wrap_event_proc(&signed, &protocol.raw_xml)?;
                match self
                    .ctx
                    .artifacts
                    .persist_correction_pdf(
                        tenant_id,
                        document.environment,
                        key,
                        draft.sequence,
                        &event_xml,
                        document_xml,
                    )
                    .await
                {
                    Ok(path) => Some(path),
                    Err(e) => {
                        warn!(
                            tenant_id = %tenant_id,
                            access_key = %key,
                            sequence = draft.sequence,
                            error = %e,
                            "Correction letter PDF not rendered"
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        info!(
            tenant_id = %tenant_id,
            access_key = %key,
            kind = %draft.kind,
            status_code = record.status_code,
            protocol = ?record.protocol_number,
            "Event registered"
        );
        Ok(EventOutcome {
            access_key: key.to_string(),
            kind: draft.kind,
            sequence: draft.sequence,
            status,
            protocol_number: record.protocol_number,
            registered_at: record.authorized_at,
            artifact,
            pdf,
        })
    }
}

/// The `retEvento` block of a registered event, or the rejection.
fn registered_protocol(
    answer: &AuthorityAnswer,
    key: &AccessKey,
    kind: EventKind,
) -> IssueResult<crate::response::ProtocolAnswer> {
    let (code, reason) = answer.verdict();
    let interpretation = interpret(code, reason);
    match (interpretation.outcome, &answer.protocol) {
        (Outcome::Registered, Some(protocol)) => Ok(protocol.clone()),
        (Outcome::Registered, None) => Err(IssueError::transmission(
            format!("event answer {} carries no retEvento", code),
            false,
        )),
        (Outcome::Rejected, _) => {
            warn!(
                access_key = %key,
                kind = %kind,
                status_code = code,
                reason = %reason,
                "Event rejected"
            );
            Err(IssueError::Rejected {
                code,
                category: interpretation.category.unwrap_or(RejectionCategory::Outros),
                reason: interpretation.reason,
                remediation: interpretation.remediation,
            })
        }
        (outcome, _) => Err(IssueError::transmission(
            format!("unexpected {:?} answer {} to an event", outcome, code),
            false,
        )),
    }
}
