//! # Issuer Context
//!
//! The shared collaborators of the pipeline and the event processor, built
//! once from [`IssuerConfig`] and handed around behind an `Arc`.

use std::sync::Arc;

use tracing::info;

use crate::artifacts::ArtifactStore;
use crate::assembler::DocumentAssembler;
use crate::certificate::{CertificateLease, CertificateStore, CertificateStoreError};
use crate::config::{EventSettings, IssuerConfig};
use crate::endpoints::EndpointResolver;
use crate::error::{IssueError, IssueResult};
use crate::response::StatusAnswer;
use crate::transmission::{AuthorityTransport, HttpTransport, TransmissionClient};
use nfe_core::{DocumentModel, Environment};
use nfe_db::Database;

pub struct IssuerContext {
    pub db: Database,
    pub certificates: CertificateStore,
    pub resolver: EndpointResolver,
    pub assembler: DocumentAssembler,
    pub transmission: TransmissionClient,
    pub artifacts: ArtifactStore,
    pub events: EventSettings,
}

impl IssuerContext {
    /// Context talking to the authority over HTTPS.
    pub fn new(config: &IssuerConfig, db: Database) -> Self {
        let transport = Arc::new(HttpTransport::new(&config.authority));
        Self::with_transport(config, db, transport)
    }

    /// Context with a caller-supplied transport.
    pub fn with_transport(
        config: &IssuerConfig,
        db: Database,
        transport: Arc<dyn AuthorityTransport>,
    ) -> Self {
        info!(
            artifact_root = %config.storage.artifact_root.display(),
            certificate_root = %config.storage.certificate_root.display(),
            overrides = config.authority.overrides.len(),
            "Issuer context ready"
        );
        IssuerContext {
            db,
            certificates: CertificateStore::new(config.storage.certificate_root.clone()),
            resolver: EndpointResolver::new(config.authority.overrides.clone()),
            assembler: DocumentAssembler::new(),
            transmission: TransmissionClient::new(transport, config.authority.clone()),
            artifacts: ArtifactStore::new(config.storage.artifact_root.clone()),
            events: config.events.clone(),
        }
    }
}

impl IssuerContext {
    /// Read lease on the tenant's certificate for a signing flow.
    ///
    /// A tenant without a certificate cannot sign anything until one is
    /// uploaded, so absence is a certificate failure here rather than the
    /// `NotFound` the certificate endpoints report.
    pub async fn signing_lease(&self, tenant_id: &str) -> IssueResult<CertificateLease> {
        match self.certificates.lease(tenant_id).await {
            Ok(lease) => Ok(lease),
            Err(CertificateStoreError::NotFound { tenant_id }) => Err(IssueError::certificate(
                tenant_id,
                "no certificate on file, upload one before issuing",
            )),
            Err(other) => Err(other.into()),
        }
    }

    /// Highest number of a series that is already spent, by a stored
    /// document or by a voided range.
    pub async fn highest_used_number(
        &self,
        tenant_id: &str,
        model: DocumentModel,
        series: u16,
    ) -> IssueResult<Option<u32>> {
        let documents = self.db.documents().highest_number(tenant_id, model, series).await?;
        let voided = self.db.voided_ranges().highest_number(tenant_id, model, series).await?;
        Ok(documents.max(voided))
    }

    /// Asks the tenant's authorizer whether it is in operation.
    ///
    /// `environment` defaults to the tenant's.
    pub async fn authority_status(
        &self,
        tenant_id: &str,
        model: DocumentModel,
        environment: Option<Environment>,
    ) -> IssueResult<StatusAnswer> {
        let tenant = self.db.tenants().require(tenant_id).await?;
        let environment = environment.unwrap_or(tenant.default_environment);
        let endpoint = self.resolver.resolve(tenant.state_code, environment, model)?;
        endpoint.ensure_environment(environment)?;

        let lease = self.signing_lease(tenant_id).await?;
        let answer = self
            .transmission
            .service_status(&endpoint, lease.certificate())
            .await?;
        info!(
            tenant_id = %tenant_id,
            authorizer = %endpoint.authorizer,
            environment = %environment,
            status_code = answer.status_code,
            "Authority status checked"
        );
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{answer_status, harness};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_authority_status_in_operation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/NFeStatusServico4"))
            .respond_with(ResponseTemplate::new(200).set_body_string(answer_status(107)))
            .expect(1)
            .mount(&server)
            .await;
        let h = harness(&server.uri()).await;

        let answer = h
            .ctx
            .authority_status("tenant-1", DocumentModel::Nfe, None)
            .await
            .unwrap();
        assert!(answer.in_operation());
        assert_eq!(answer.status_code, 107);
    }

    #[tokio::test]
    async fn test_authority_status_paralyzed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/NFeStatusServico4"))
            .respond_with(ResponseTemplate::new(200).set_body_string(answer_status(108)))
            .mount(&server)
            .await;
        let h = harness(&server.uri()).await;

        let answer = h
            .ctx
            .authority_status("tenant-1", DocumentModel::Nfce, Some(Environment::Homologation))
            .await
            .unwrap();
        assert!(!answer.in_operation());
    }

    #[tokio::test]
    async fn test_authority_status_unknown_tenant() {
        let server = MockServer::start().await;
        let h = harness(&server.uri()).await;
        let err = h
            .ctx
            .authority_status("tenant-9", DocumentModel::Nfe, None)
            .await
            .unwrap_err();
        assert!(matches!(err, IssueError::NotFound { .. }));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
