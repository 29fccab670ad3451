//! # Number Voiding
//!
//! Inutilizacao: tells the authority that a range of numbers of a series
//! will never be used, so the gap left by documents that never reached it
//! is accounted for.
//!
//! ## Voiding Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  void(tenant, request)                                                  │
//! │     │                                                                   │
//! │     ▼  local checks      series, range, justification, documents in     │
//! │     │                    the range never reached the authority          │
//! │     ▼  build <inutNFe>   infInut Id = ID{cUF}{aa}{CNPJ}{mod}{sss}        │
//! │     │                                   {first:09}{last:09}             │
//! │     ▼  sign              XMLDSig over infInut                           │
//! │     ▼  void_range        NFeInutilizacao4                               │
//! │     │                                                                   │
//! │     ├── 102 ──────────► one transaction: range row, counter raised      │
//! │     │                   past the range; then procInutNFe file           │
//! │     └── anything else ─► Rejected, nothing changes                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Documents inside a voided range keep their own status. The range only
//! records that the numbers are spent.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::assembler::brasilia;
use crate::context::IssuerContext;
use crate::error::{IssueError, IssueResult};
use crate::response::VoidingAnswer;
use crate::signer::{sign, SignedRoot};
use crate::xml::XmlWriter;
use nfe_core::status::interpret;
use nfe_core::validation::{
    validate_cnpj, validate_justification, validate_number_range, validate_series,
};
use nfe_core::{
    DocumentModel, DocumentStatus, Environment, Outcome, RejectionCategory, LAYOUT_VERSION,
    NFE_NAMESPACE,
};
use nfe_db::{NewVoidedRange, VoidedRangeRecord};

/// A request to void `first_number..=last_number` of a series.
#[derive(Debug, Clone, Deserialize)]
pub struct VoidingRequest {
    pub model: DocumentModel,
    pub series: u16,
    pub first_number: u32,
    pub last_number: u32,
    pub justification: String,
    /// Defaults to the tenant's environment.
    #[serde(default)]
    pub environment: Option<Environment>,
}

/// A range the authority homologated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoidingOutcome {
    pub id: String,
    pub environment: Environment,
    pub model: DocumentModel,
    pub series: u16,
    pub first_number: u32,
    pub last_number: u32,
    pub status_code: u16,
    pub reason: String,
    pub protocol_number: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
    /// Absent for ranges listed from the database.
    pub artifact: Option<String>,
}

impl VoidingOutcome {
    fn from_record(record: &VoidedRangeRecord, artifact: Option<String>) -> Self {
        VoidingOutcome {
            id: record.id.clone(),
            environment: record.environment,
            model: record.model,
            series: record.series as u16,
            first_number: record.first_number as u32,
            last_number: record.last_number as u32,
            status_code: record.status_code as u16,
            reason: record.reason.clone(),
            protocol_number: record.protocol_number.clone(),
            registered_at: record.registered_at,
            artifact,
        }
    }
}

/// Content of one `inutNFe`, before signing.
#[derive(Debug, Clone)]
struct VoidingDraft<'a> {
    state_code: u8,
    environment: Environment,
    year: u16,
    cnpj: &'a str,
    model: DocumentModel,
    series: u16,
    first_number: u32,
    last_number: u32,
    justification: &'a str,
}

impl VoidingDraft<'_> {
    fn id(&self) -> String {
        format!(
            "ID{:02}{:02}{}{:02}{:03}{:09}{:09}",
            self.state_code,
            self.year % 100,
            self.cnpj,
            self.model.code(),
            self.series,
            self.first_number,
            self.last_number
        )
    }

    fn to_xml(&self) -> String {
        let id = self.id();
        let mut w = XmlWriter::new();
        w.open("inutNFe", &[("xmlns", NFE_NAMESPACE), ("versao", LAYOUT_VERSION)])
            .open("infInut", &[("Id", &id)])
            .leaf("tpAmb", &self.environment.code().to_string())
            .leaf("xServ", "INUTILIZAR")
            .leaf("cUF", &self.state_code.to_string())
            .leaf("ano", &format!("{:02}", self.year % 100))
            .leaf("CNPJ", self.cnpj)
            .leaf("mod", &self.model.code().to_string())
            .leaf("serie", &self.series.to_string())
            .leaf("nNFIni", &self.first_number.to_string())
            .leaf("nNFFin", &self.last_number.to_string())
            .leaf("xJust", self.justification)
            .close("infInut")
            .close("inutNFe");
        w.finish()
    }
}

/// Statuses whose number reached the authority and can no longer be voided.
const fn reached_authority(status: DocumentStatus) -> bool {
    matches!(
        status,
        DocumentStatus::Submitted
            | DocumentStatus::Processing
            | DocumentStatus::Authorized
            | DocumentStatus::Corrected
            | DocumentStatus::Cancelled
    )
}

// =============================================================================
// Voider
// =============================================================================

pub struct NumberVoider {
    ctx: Arc<IssuerContext>,
}

impl NumberVoider {
    pub fn new(ctx: Arc<IssuerContext>) -> Self {
        NumberVoider { ctx }
    }

    /// Voids a range of numbers at the authority.
    pub async fn void(
        &self,
        tenant_id: &str,
        request: &VoidingRequest,
    ) -> IssueResult<VoidingOutcome> {
        validate_series(request.series)?;
        validate_number_range(request.first_number, request.last_number)?;
        let justification = validate_justification(&request.justification)?;

        let tenant = self.ctx.db.tenants().require(tenant_id).await?;
        let cnpj = validate_cnpj("tenant.tax_id", &tenant.tax_id)?;
        let environment = request.environment.unwrap_or(tenant.default_environment);

        let in_range = self
            .ctx
            .db
            .documents()
            .list_in_range(
                tenant_id,
                request.model,
                request.series,
                request.first_number,
                request.last_number,
            )
            .await?;
        if let Some(used) = in_range.iter().find(|d| reached_authority(d.status)) {
            return Err(IssueError::InvalidState(format!(
                "number {} is {}; only numbers that never reached the authority can be voided",
                used.number, used.status
            )));
        }

        let endpoint = self
            .ctx
            .resolver
            .resolve(tenant.state_code, environment, request.model)?;
        endpoint.ensure_environment(environment)?;

        let year = Utc::now().with_timezone(&brasilia()).year();
        let draft = VoidingDraft {
            state_code: tenant.state_code,
            environment,
            year: year as u16,
            cnpj: &cnpj,
            model: request.model,
            series: request.series,
            first_number: request.first_number,
            last_number: request.last_number,
            justification: &justification,
        };

        let lease = self.ctx.signing_lease(tenant_id).await?;
        let identity = lease.identity()?;
        let signed = sign(&draft.to_xml(), SignedRoot::Voiding, &identity)?;

        info!(
            tenant_id = %tenant_id,
            model = %request.model,
            series = request.series,
            first = request.first_number,
            last = request.last_number,
            "Requesting voiding"
        );
        let answer = self
            .ctx
            .transmission
            .void_range(&endpoint, &signed, lease.certificate())
            .await?;
        drop(lease);

        homologated(&answer, request)?;
        let protocol = answer.to_record();
        let stored = self
            .ctx
            .db
            .voided_ranges()
            .record(&NewVoidedRange {
                tenant_id: tenant_id.to_string(),
                environment,
                model: request.model,
                series: request.series,
                first_number: request.first_number,
                last_number: request.last_number,
                justification: justification.clone(),
                protocol: protocol.clone(),
                raw_xml: Some(answer.raw_xml.clone()),
            })
            .await?;

        let artifact = self
            .ctx
            .artifacts
            .persist_voiding(
                tenant_id,
                environment,
                request.model,
                request.series,
                request.first_number,
                request.last_number,
                protocol.authorized_at.unwrap_or(stored.created_at),
                &signed,
                &answer.raw_xml,
            )
            .await?;

        info!(
            tenant_id = %tenant_id,
            series = request.series,
            first = request.first_number,
            last = request.last_number,
            protocol = ?protocol.protocol_number,
            "Range voided"
        );
        Ok(VoidingOutcome::from_record(&stored, Some(artifact)))
    }

    /// A tenant's voided ranges, newest first.
    pub async fn list(&self, tenant_id: &str) -> IssueResult<Vec<VoidingOutcome>> {
        self.ctx.db.tenants().require(tenant_id).await?;
        let ranges = self.ctx.db.voided_ranges().list(tenant_id).await?;
        Ok(ranges
            .iter()
            .map(|r| VoidingOutcome::from_record(r, None))
            .collect())
    }
}

/// Ok for 102, the rejection otherwise.
fn homologated(answer: &VoidingAnswer, request: &VoidingRequest) -> IssueResult<()> {
    let interpretation = interpret(answer.status_code, &answer.reason);
    match interpretation.outcome {
        Outcome::Registered => Ok(()),
        Outcome::Rejected => {
            warn!(
                series = request.series,
                first = request.first_number,
                last = request.last_number,
                status_code = answer.status_code,
                reason = %answer.reason,
                "Voiding rejected"
            );
            Err(IssueError::Rejected {
                code: answer.status_code,
                category: interpretation.category.unwrap_or(RejectionCategory::Outros),
                reason: interpretation.reason,
                remediation: interpretation.remediation,
            })
        }
        outcome => Err(IssueError::transmission(
            format!("unexpected {:?} answer {} to a voiding", outcome, answer.status_code),
            false,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{answer_voided, authorized_document, harness};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(first: u32, last: u32) -> VoidingRequest {
        VoidingRequest {
            model: DocumentModel::Nfe,
            series: 1,
            first_number: first,
            last_number: last,
            justification: "Falha no sistema durante a emissao".to_string(),
            environment: None,
        }
    }

    async fn mount_voiding_answer(server: &MockServer, code: u16) {
        Mock::given(method("POST"))
            .and(path("/NFeInutilizacao4"))
            .respond_with(ResponseTemplate::new(200).set_body_string(answer_voided(code)))
            .mount(server)
            .await;
    }

    #[test]
    fn test_voiding_xml_shape() {
        let draft = VoidingDraft {
            state_code: 35,
            environment: Environment::Homologation,
            year: 2024,
            cnpj: "11222333000181",
            model: DocumentModel::Nfce,
            series: 1,
            first_number: 5,
            last_number: 9,
            justification: "Falha no sistema durante a emissao",
        };
        assert_eq!(draft.id(), "ID352411222333000181650010000000050000000009");
        assert_eq!(draft.id().len(), 43);

        let xml = draft.to_xml();
        assert!(xml.starts_with(
            "<inutNFe xmlns=\"http://www.portalfiscal.inf.br/nfe\" versao=\"4.00\"><infInut Id=\"ID3524"
        ));
        assert!(xml.contains("<tpAmb>2</tpAmb><xServ>INUTILIZAR</xServ><cUF>35</cUF><ano>24</ano>"));
        assert!(xml.contains("<mod>65</mod><serie>1</serie><nNFIni>5</nNFIni><nNFFin>9</nNFFin>"));
    }

    #[tokio::test]
    async fn test_void_range() {
        let server = MockServer::start().await;
        mount_voiding_answer(&server, 102).await;
        let h = harness(&server.uri()).await;
        let voider = NumberVoider::new(h.ctx.clone());

        let outcome = voider.void("tenant-1", &request(5, 9)).await.unwrap();
        assert_eq!(outcome.status_code, 102);
        assert_eq!(outcome.protocol_number.as_deref(), Some("135240000000777"));
        assert_eq!(outcome.environment, Environment::Homologation);
        let artifact = outcome.artifact.as_deref().unwrap();
        assert!(artifact.contains("/55/2024/05/Inutilizados/inut_001_000000005_000000009.xml"));
        assert!(h.artifact_root().join(artifact).exists());

        let body = String::from_utf8(server.received_requests().await.unwrap()[0].body.clone()).unwrap();
        assert!(body.contains("<xServ>INUTILIZAR</xServ>"));
        assert!(body.contains("</infInut><Signature"));

        // the counter skips the range
        let next = h.ctx.db.sequences().peek("tenant-1", DocumentModel::Nfe, 1).await.unwrap();
        assert_eq!(next, 10);
        assert_eq!(
            h.ctx.highest_used_number("tenant-1", DocumentModel::Nfe, 1).await.unwrap(),
            Some(9)
        );
        assert_eq!(voider.list("tenant-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_authorized_number_cannot_be_voided() {
        let server = MockServer::start().await;
        let h = harness(&server.uri()).await;
        authorized_document(&h, Utc::now()).await;

        let err = NumberVoider::new(h.ctx.clone())
            .void("tenant-1", &request(40, 45))
            .await
            .unwrap_err();
        assert!(matches!(err, IssueError::InvalidState(_)));
        assert!(err.to_string().contains("42"));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_checks_before_network() {
        let server = MockServer::start().await;
        let h = harness(&server.uri()).await;
        let voider = NumberVoider::new(h.ctx.clone());

        let reversed = voider.void("tenant-1", &request(9, 5)).await.unwrap_err();
        assert!(matches!(reversed, IssueError::Validation(_)));

        let mut short = request(1, 1);
        short.justification = "curta".into();
        let short = voider.void("tenant-1", &short).await.unwrap_err();
        assert!(matches!(short, IssueError::Validation(_)));

        let unknown = voider.void("tenant-9", &request(1, 1)).await.unwrap_err();
        assert!(matches!(unknown, IssueError::NotFound { .. }));

        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_voiding_records_nothing() {
        let server = MockServer::start().await;
        mount_voiding_answer(&server, 241).await;
        let h = harness(&server.uri()).await;

        let err = NumberVoider::new(h.ctx.clone())
            .void("tenant-1", &request(3, 3))
            .await
            .unwrap_err();
        match err {
            IssueError::Rejected { code, category, .. } => {
                assert_eq!(code, 241);
                assert_eq!(category, RejectionCategory::Duplicidade);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(h.ctx.db.voided_ranges().list("tenant-1").await.unwrap().is_empty());
        assert_eq!(h.ctx.db.sequences().peek("tenant-1", DocumentModel::Nfe, 1).await.unwrap(), 1);
    }
}
