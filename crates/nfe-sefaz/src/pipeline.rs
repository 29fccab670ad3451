//! # Issuance Pipeline
//!
//! Drives one order from validation to persisted artifacts.
//!
//! ## Issue Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  prepare ─► lease certificate ─► resolve endpoint ─► reserve number     │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  assemble ─► insert (Assembled) ─► sign (Signed) ─► submit (Submitted)  │
//! │                                                        │                │
//! │          ┌─────────────────────────────────────────────┤                │
//! │          ▼ 103 + nRec                                   ▼ final answer  │
//! │     Processing ─► poll every interval ─────────────────►│               │
//! │          │ attempts exhausted                           │               │
//! │          ▼                                              ▼               │
//! │     OutcomeUnknown (reconcile later)   100 ─► Authorized + artifacts    │
//! │                                        other ─► Rejected (final)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A reserved number is consumed even when a later step fails; the authority
//! tolerates gaps and reusing a number after submission risks duplicates.
//!
//! ## Reconcile
//! Re-drives a document left in flight: poll the stored receipt, or consult
//! the key when there is none. A key the authority has never seen (217) is
//! resubmitted with the stored signed XML. Authorized documents with missing
//! files get their artifacts regenerated.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::assembler::{random_numeric_code, IssueRequest};
use crate::certificate::StoredCertificate;
use crate::context::IssuerContext;
use crate::endpoints::Endpoint;
use crate::error::{IssueError, IssueResult};
use crate::response::AuthorityAnswer;
use crate::signer::{sign, SignedRoot};
use nfe_core::status::interpret;
use nfe_core::{
    AccessKey, ArtifactRefs, DocumentStatus, Environment, IssueOutcome, Outcome,
    RejectionCategory,
};
use nfe_db::{DocumentRecord, NewDocument};

/// Authority answer for a key it has no record of.
const NOT_FOUND_IN_BASE: u16 = 217;

/// The document being driven, as far as the pipeline needs it.
struct InFlight {
    id: String,
    tenant_id: String,
    key: AccessKey,
    environment: Environment,
    signed_xml: String,
}

pub struct IssuancePipeline {
    ctx: Arc<IssuerContext>,
}

impl IssuancePipeline {
    pub fn new(ctx: Arc<IssuerContext>) -> Self {
        IssuancePipeline { ctx }
    }

    /// Issues a document for `tenant_id`.
    ///
    /// Returns the authorized outcome, [`IssueError::Rejected`] with the
    /// authority's reason, or [`IssueError::OutcomeUnknown`] when the answer
    /// did not arrive in time.
    pub async fn issue(&self, tenant_id: &str, request: IssueRequest) -> IssueResult<IssueOutcome> {
        let ctx = &self.ctx;
        let tenant = ctx.db.tenants().require(tenant_id).await?;
        let prepared = ctx.assembler.prepare(&tenant, request)?;

        let lease = ctx.signing_lease(tenant_id).await?;
        let identity = lease.identity()?;
        let endpoint =
            ctx.resolver
                .resolve(prepared.state_code, prepared.environment, prepared.model)?;
        endpoint.ensure_environment(prepared.environment)?;

        // read before reserving: anything stored by then was numbered below
        // this reservation, unless the counter went backwards
        let highest_used = ctx
            .highest_used_number(tenant_id, prepared.model, prepared.series)
            .await?;
        let number = ctx
            .db
            .sequences()
            .reserve(tenant_id, prepared.model, prepared.series)
            .await?;
        let assembled = ctx.assembler.assemble(
            prepared,
            number,
            highest_used,
            random_numeric_code(number),
            Utc::now(),
            &endpoint,
        )?;
        let document = &assembled.document;

        let documents = ctx.db.documents();
        documents
            .insert(&NewDocument {
                id: document.id.clone(),
                tenant_id: tenant_id.to_string(),
                access_key: document.access_key.clone(),
                environment: document.header.environment,
                model: document.header.model,
                series: document.header.series,
                number,
                emitted_at: document.header.emitted_at,
                total: document.totals.document_total,
            })
            .await?;

        let signed_xml = sign(&assembled.xml, SignedRoot::Document, &identity)?;
        documents.mark_signed(&document.id, &signed_xml).await?;

        let flight = InFlight {
            id: document.id.clone(),
            tenant_id: tenant_id.to_string(),
            key: document.access_key.clone(),
            environment: document.header.environment,
            signed_xml,
        };
        info!(
            tenant_id = %tenant_id,
            access_key = %flight.key,
            number,
            "Document signed"
        );

        documents.mark_submitted(&flight.id).await?;
        self.submit(&flight, &endpoint, lease.certificate()).await
    }

    /// Completes a document left in flight, or regenerates missing files.
    pub async fn reconcile(&self, tenant_id: &str, access_key: &str) -> IssueResult<IssueOutcome> {
        let key = AccessKey::parse(access_key)?;
        let documents = self.ctx.db.documents();
        let record = documents.require_by_key(tenant_id, key.as_str()).await?;

        match record.status {
            DocumentStatus::Authorized | DocumentStatus::Corrected | DocumentStatus::Cancelled => {
                let artifacts = self.ensure_artifacts(&record, &key).await?;
                Ok(IssueOutcome {
                    access_key: key.to_string(),
                    status: record.status,
                    protocol_number: record.protocol_number.clone(),
                    artifacts: Some(artifacts),
                })
            }
            DocumentStatus::Rejected => {
                let code = record.status_code.unwrap_or_default() as u16;
                let reason = record.status_reason.clone().unwrap_or_default();
                Err(IssueError::Rejected {
                    code,
                    category: record.category().unwrap_or(RejectionCategory::Outros),
                    remediation: interpret(code, &reason).remediation,
                    reason,
                })
            }
            DocumentStatus::Signed | DocumentStatus::Submitted | DocumentStatus::Processing => {
                let flight = in_flight(&record, key)?;
                let lease = self.ctx.signing_lease(tenant_id).await?;
                let endpoint = self.ctx.resolver.resolve(
                    flight.key.state_code(),
                    flight.environment,
                    record.model,
                )?;
                let certificate = lease.certificate();

                if record.status == DocumentStatus::Signed {
                    documents.mark_submitted(&flight.id).await?;
                    return self.submit(&flight, &endpoint, certificate).await;
                }

                if let Some(receipt) = record.receipt_number.as_deref() {
                    info!(tenant_id = %tenant_id, access_key = %flight.key, receipt = %receipt, "Reconciling by receipt");
                    let answer = self
                        .ctx
                        .transmission
                        .await_resolution(&endpoint, &flight.key, receipt, certificate)
                        .await?;
                    return self.finish(&flight, answer, Some(receipt.to_string())).await;
                }

                info!(tenant_id = %tenant_id, access_key = %flight.key, "Reconciling by consultation");
                let answer = self
                    .ctx
                    .transmission
                    .consult(&endpoint, &flight.key, certificate)
                    .await?;
                if answer.verdict().0 == NOT_FOUND_IN_BASE {
                    warn!(access_key = %flight.key, "Authority has no record, resubmitting");
                    return self.submit(&flight, &endpoint, certificate).await;
                }
                self.route(&flight, &endpoint, answer, certificate).await
            }
            DocumentStatus::Draft | DocumentStatus::Assembled => Err(IssueError::InvalidState(
                format!("{} was never signed and cannot be reconciled", key),
            )),
        }
    }

    /// Sends the signed document and routes the answer.
    async fn submit(
        &self,
        flight: &InFlight,
        endpoint: &Endpoint,
        certificate: &StoredCertificate,
    ) -> IssueResult<IssueOutcome> {
        let answer = match self
            .ctx
            .transmission
            .submit(endpoint, &flight.signed_xml, certificate)
            .await
        {
            Ok(answer) => answer,
            Err(e) if e.is_retryable() => {
                warn!(
                    tenant_id = %flight.tenant_id,
                    access_key = %flight.key,
                    error = %e,
                    "Submission did not complete, outcome unknown"
                );
                return Err(IssueError::OutcomeUnknown {
                    access_key: flight.key.to_string(),
                    receipt: None,
                });
            }
            Err(e) => return Err(e),
        };
        self.route(flight, endpoint, answer, certificate).await
    }

    /// Waits on a queued batch, or finishes right away.
    async fn route(
        &self,
        flight: &InFlight,
        endpoint: &Endpoint,
        answer: AuthorityAnswer,
        certificate: &StoredCertificate,
    ) -> IssueResult<IssueOutcome> {
        let (code, reason) = answer.verdict();
        if interpret(code, reason).outcome != Outcome::Processing {
            let receipt = answer.receipt_number.clone();
            return self.finish(flight, answer, receipt).await;
        }

        let receipt = answer.receipt_number.clone().ok_or_else(|| {
            IssueError::transmission(format!("batch queued ({}) without a receipt", code), false)
        })?;
        let documents = self.ctx.db.documents();
        documents.set_receipt(&flight.id, &receipt).await?;
        documents.mark_processing(&flight.id, code, reason).await?;
        info!(
            tenant_id = %flight.tenant_id,
            access_key = %flight.key,
            receipt = %receipt,
            "Batch queued, polling"
        );

        let resolved = self
            .ctx
            .transmission
            .await_resolution(endpoint, &flight.key, &receipt, certificate)
            .await?;
        self.finish(flight, resolved, Some(receipt)).await
    }

    /// Records a final answer.
    async fn finish(
        &self,
        flight: &InFlight,
        answer: AuthorityAnswer,
        receipt: Option<String>,
    ) -> IssueResult<IssueOutcome> {
        let (code, reason) = answer.verdict();
        let interpretation = interpret(code, reason);
        let documents = self.ctx.db.documents();

        match interpretation.outcome {
            Outcome::Authorized => {
                let protocol = answer.protocol.as_ref().ok_or_else(|| {
                    IssueError::transmission("authorization without protNFe", false)
                })?;
                let record = protocol.to_record(receipt);
                documents
                    .record_authorization(&flight.id, &record, Some(&protocol.raw_xml))
                    .await?;
                info!(
                    tenant_id = %flight.tenant_id,
                    access_key = %flight.key,
                    protocol = ?record.protocol_number,
                    "Document authorized"
                );

                let artifacts = self
                    .ctx
                    .artifacts
                    .persist_authorized(
                        &flight.tenant_id,
                        flight.environment,
                        &flight.key,
                        &flight.signed_xml,
                        &record,
                        Some(&protocol.raw_xml),
                    )
                    .await?;
                Ok(IssueOutcome {
                    access_key: flight.key.to_string(),
                    status: DocumentStatus::Authorized,
                    protocol_number: record.protocol_number,
                    artifacts: Some(artifacts),
                })
            }
            Outcome::Rejected => {
                let category = interpretation
                    .category
                    .unwrap_or(RejectionCategory::Outros);
                documents
                    .record_rejection(&flight.id, code, reason, category)
                    .await?;
                warn!(
                    tenant_id = %flight.tenant_id,
                    access_key = %flight.key,
                    status_code = code,
                    category = %category,
                    reason = %reason,
                    "Document rejected"
                );
                Err(IssueError::Rejected {
                    code,
                    category,
                    reason: interpretation.reason,
                    remediation: interpretation.remediation,
                })
            }
            Outcome::Processing => Err(IssueError::OutcomeUnknown {
                access_key: flight.key.to_string(),
                receipt,
            }),
            Outcome::Registered => Err(IssueError::transmission(
                format!("event status {} in answer to a document", code),
                false,
            )),
        }
    }

    /// Writes the authorized artifacts again when any is missing.
    async fn ensure_artifacts(
        &self,
        record: &DocumentRecord,
        key: &AccessKey,
    ) -> IssueResult<ArtifactRefs> {
        let artifacts = &self.ctx.artifacts;
        if artifacts
            .has_authorized(&record.tenant_id, record.environment, key)
            .await?
        {
            let xml = crate::artifacts::ArtifactStore::relative_path(
                &record.tenant_id,
                record.environment,
                key,
                crate::artifacts::OutcomeFolder::Authorized,
                None,
                crate::artifacts::ArtifactKind::Xml,
            );
            let pdf = xml.with_extension("pdf");
            return Ok(ArtifactRefs {
                xml: xml.to_string_lossy().replace('\\', "/"),
                pdf: Some(pdf.to_string_lossy().replace('\\', "/")),
            });
        }

        let signed_xml = record.signed_xml.as_deref().ok_or_else(|| {
            IssueError::InvalidState(format!("{} has no signed XML", key))
        })?;
        let protocol = self
            .ctx
            .db
            .documents()
            .authorization_protocol(&record.id)
            .await?
            .ok_or_else(|| IssueError::InvalidState(format!("{} has no authorization protocol", key)))?;

        warn!(tenant_id = %record.tenant_id, access_key = %key, "Regenerating missing artifacts");
        artifacts
            .persist_authorized(
                &record.tenant_id,
                record.environment,
                key,
                signed_xml,
                &protocol.record(),
                protocol.raw_xml.as_deref(),
            )
            .await
    }
}

fn in_flight(record: &DocumentRecord, key: AccessKey) -> IssueResult<InFlight> {
    let signed_xml = record
        .signed_xml
        .clone()
        .ok_or_else(|| IssueError::InvalidState(format!("{} has no signed XML", key)))?;
    Ok(InFlight {
        id: record.id.clone(),
        tenant_id: record.tenant_id.clone(),
        key,
        environment: record.environment,
        signed_xml,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactKind;
    use crate::config::EndpointOverride;
    use crate::error::ErrorCategory;
    use crate::test_support::{
        answer_authorized, answer_consult, answer_queued, answer_rejected, authorized_document,
        harness, harness_with, sample_request,
    };
    use nfe_core::{DocumentModel, ValidationError};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const NPROT: &str = "135240000000777";

    /// Answers any poll with an authorization of whatever key the poll is for.
    struct AuthorizeSubmitted;

    impl wiremock::Respond for AuthorizeSubmitted {
        fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
            let body = String::from_utf8_lossy(&request.body);
            let key = body
                .find("Id=\"NFe")
                .map(|at| body[at + 7..at + 51].to_string())
                .unwrap_or_default();
            ResponseTemplate::new(200).set_body_string(answer_authorized(&key, NPROT))
        }
    }

    #[tokio::test]
    async fn test_issue_end_to_end() {
        let server = MockServer::start().await;
        let submitted = Arc::new(std::sync::Mutex::new(String::new()));

        let on_submit = submitted.clone();
        Mock::given(method("POST"))
            .and(path("/NFeAutorizacao4"))
            .respond_with(move |request: &wiremock::Request| {
                let body = String::from_utf8_lossy(&request.body);
                if let Some(at) = body.find("Id=\"NFe") {
                    *on_submit.lock().unwrap() = body[at + 7..at + 51].to_string();
                }
                ResponseTemplate::new(200).set_body_string(answer_queued("351000000000123"))
            })
            .expect(1)
            .mount(&server)
            .await;
        let on_poll = submitted.clone();
        Mock::given(method("POST"))
            .and(path("/NFeRetAutorizacao4"))
            .respond_with(move |_: &wiremock::Request| {
                let key = on_poll.lock().unwrap().clone();
                ResponseTemplate::new(200).set_body_string(answer_authorized(&key, NPROT))
            })
            .mount(&server)
            .await;
        let h = harness(&server.uri()).await;

        let outcome = IssuancePipeline::new(h.ctx.clone())
            .issue("tenant-1", sample_request(DocumentModel::Nfe))
            .await
            .unwrap();
        assert_eq!(outcome.status, DocumentStatus::Authorized);
        assert_eq!(outcome.protocol_number.as_deref(), Some(NPROT));
        assert_eq!(outcome.access_key, *submitted.lock().unwrap());

        let record = h
            .ctx
            .db
            .documents()
            .require_by_key("tenant-1", &outcome.access_key)
            .await
            .unwrap();
        assert_eq!(record.status, DocumentStatus::Authorized);
        assert_eq!(record.number, 1);
        assert_eq!(record.receipt_number.as_deref(), Some("351000000000123"));

        let key = AccessKey::parse(&outcome.access_key).unwrap();
        let xml = h.ctx.artifacts.read("tenant-1", &key, ArtifactKind::Xml).await.unwrap();
        let xml = String::from_utf8(xml).unwrap();
        assert!(xml.contains(&format!("<nProt>{}</nProt>", NPROT)));
        assert!(xml.contains("<Signature"));
        let pdf = h.ctx.artifacts.read("tenant-1", &key, ArtifactKind::Pdf).await.unwrap();
        assert!(pdf.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn test_nfce_synchronous_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/NFeAutorizacao4"))
            .respond_with(AuthorizeSubmitted)
            .expect(1)
            .mount(&server)
            .await;
        let h = harness(&server.uri()).await;

        let outcome = IssuancePipeline::new(h.ctx.clone())
            .issue("tenant-1", sample_request(DocumentModel::Nfce))
            .await
            .unwrap();
        assert_eq!(outcome.status, DocumentStatus::Authorized);
        assert!(outcome.artifacts.unwrap().xml.contains("/65/"));

        let body = String::from_utf8(server.received_requests().await.unwrap()[0].body.clone()).unwrap();
        assert!(body.contains("<indSinc>1</indSinc>"));
    }

    #[tokio::test]
    async fn test_rejection_is_final_and_recorded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/NFeAutorizacao4"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(answer_rejected(539, "Rejeicao: Duplicidade de NF-e, com diferenca na Chave de Acesso")),
            )
            .expect(1)
            .mount(&server)
            .await;
        let h = harness(&server.uri()).await;

        let err = IssuancePipeline::new(h.ctx.clone())
            .issue("tenant-1", sample_request(DocumentModel::Nfe))
            .await
            .unwrap_err();
        let reason = match err {
            IssueError::Rejected { code, category, reason, .. } => {
                assert_eq!(code, 539);
                assert_eq!(category, RejectionCategory::Duplicidade);
                reason
            }
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(reason, "Rejeicao: Duplicidade de NF-e, com diferenca na Chave de Acesso");

        let rejected = h
            .ctx
            .db
            .documents()
            .list_by_status("tenant-1", DocumentStatus::Rejected)
            .await
            .unwrap();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].status_code, Some(539));
    }

    #[tokio::test]
    async fn test_environment_mismatch_before_network() {
        let server = MockServer::start().await;
        let h = harness_with(
            &server.uri(),
            vec![EndpointOverride {
                state: "SP".into(),
                environment: Environment::Production,
                model: None,
                base_url: "https://homologacao.nfe.fazenda.sp.gov.br/ws".into(),
                qr_code_url: None,
                consult_url: None,
            }],
        )
        .await;

        let mut request = sample_request(DocumentModel::Nfe);
        request.environment = Some(Environment::Production);
        let err = IssuancePipeline::new(h.ctx.clone())
            .issue("tenant-1", request)
            .await
            .unwrap_err();
        assert!(matches!(err, IssueError::Validation(_)));
        assert!(server.received_requests().await.unwrap().is_empty());

        // nothing reserved for a document that never existed
        let next = h.ctx.db.sequences().peek("tenant-1", DocumentModel::Nfe, 1).await.unwrap();
        assert_eq!(next, 1);
    }

    #[tokio::test]
    async fn test_unknown_outcome_then_reconcile() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/NFeAutorizacao4"))
            .respond_with(ResponseTemplate::new(200).set_body_string(answer_queued("351000000000555")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/NFeRetAutorizacao4"))
            .respond_with(ResponseTemplate::new(200).set_body_string(crate::test_support::answer_processing()))
            .up_to_n_times(5)
            .mount(&server)
            .await;
        let h = harness(&server.uri()).await;
        let pipeline = IssuancePipeline::new(h.ctx.clone());

        let err = pipeline
            .issue("tenant-1", sample_request(DocumentModel::Nfe))
            .await
            .unwrap_err();
        let key = match err {
            IssueError::OutcomeUnknown { access_key, receipt } => {
                assert_eq!(receipt.as_deref(), Some("351000000000555"));
                access_key
            }
            other => panic!("unexpected {:?}", other),
        };
        let record = h.ctx.db.documents().require_by_key("tenant-1", &key).await.unwrap();
        assert_eq!(record.status, DocumentStatus::Processing);

        Mock::given(method("POST"))
            .and(path("/NFeRetAutorizacao4"))
            .respond_with(ResponseTemplate::new(200).set_body_string(answer_authorized(&key, NPROT)))
            .mount(&server)
            .await;
        let outcome = pipeline.reconcile("tenant-1", &key).await.unwrap();
        assert_eq!(outcome.status, DocumentStatus::Authorized);
        assert_eq!(outcome.protocol_number.as_deref(), Some(NPROT));
    }

    #[tokio::test]
    async fn test_reconcile_resubmits_unknown_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/NFeAutorizacao4"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(4)
            .mount(&server)
            .await;
        let h = harness(&server.uri()).await;
        let pipeline = IssuancePipeline::new(h.ctx.clone());

        let err = pipeline
            .issue("tenant-1", sample_request(DocumentModel::Nfe))
            .await
            .unwrap_err();
        let key = match err {
            IssueError::OutcomeUnknown { access_key, receipt: None } => access_key,
            other => panic!("unexpected {:?}", other),
        };

        Mock::given(method("POST"))
            .and(path("/NFeConsultaProtocolo4"))
            .respond_with(ResponseTemplate::new(200).set_body_string(answer_consult(217, "Rejeicao: NF-e nao consta na base de dados da SEFAZ")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/NFeAutorizacao4"))
            .respond_with(AuthorizeSubmitted)
            .mount(&server)
            .await;

        let outcome = pipeline.reconcile("tenant-1", &key).await.unwrap();
        assert_eq!(outcome.status, DocumentStatus::Authorized);
        assert_eq!(outcome.access_key, key);
    }

    #[tokio::test]
    async fn test_reconcile_regenerates_missing_artifacts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/NFeAutorizacao4"))
            .respond_with(AuthorizeSubmitted)
            .mount(&server)
            .await;
        let h = harness(&server.uri()).await;
        let pipeline = IssuancePipeline::new(h.ctx.clone());

        let outcome = pipeline
            .issue("tenant-1", sample_request(DocumentModel::Nfce))
            .await
            .unwrap();
        let refs = outcome.artifacts.unwrap();
        std::fs::remove_file(h.artifact_root().join(refs.pdf.as_deref().unwrap())).unwrap();

        let again = pipeline.reconcile("tenant-1", &outcome.access_key).await.unwrap();
        assert_eq!(again.artifacts.unwrap(), refs);
        assert!(h.artifact_root().join(refs.pdf.unwrap()).exists());
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_certificate() {
        let server = MockServer::start().await;
        let h = harness(&server.uri()).await;
        h.ctx.certificates.remove("tenant-1").await.unwrap();

        let err = IssuancePipeline::new(h.ctx.clone())
            .issue("tenant-1", sample_request(DocumentModel::Nfe))
            .await
            .unwrap_err();
        match &err {
            IssueError::Certificate { tenant_id, reason } => {
                assert_eq!(tenant_id, "tenant-1");
                assert!(reason.contains("no certificate on file"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(err.category(), ErrorCategory::Certificate);
        assert!(server.received_requests().await.unwrap().is_empty());
        assert_eq!(
            h.ctx.db.sequences().peek("tenant-1", DocumentModel::Nfe, 1).await.unwrap(),
            1,
            "no number is reserved without a certificate"
        );
    }

    #[tokio::test]
    async fn test_counter_behind_stored_numbers() {
        let server = MockServer::start().await;
        let h = harness(&server.uri()).await;
        // number 42 on file while the counter was never advanced
        authorized_document(&h, Utc::now()).await;

        let err = IssuancePipeline::new(h.ctx.clone())
            .issue("tenant-1", sample_request(DocumentModel::Nfe))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IssueError::Validation(ValidationError::OutOfRange { min: 43, .. })
        ));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
