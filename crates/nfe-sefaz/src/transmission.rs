//! # Transmission Client
//!
//! SOAP 1.2 calls to the SEFAZ web services with retry and bounded polling.
//!
//! ## Two-Phase Protocol
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  submit ──► NFeAutorizacao4 ──► 103 + nRec ───────────┐                │
//! │                            └──► 104 + protNFe (sync)  │   terminal     │
//! │                            └──► 2xx..9xx batch reject │   terminal     │
//! │                                                        ▼                │
//! │  await_resolution:  sleep(poll_interval) ──► NFeRetAutorizacao4         │
//! │                     ▲                          │                        │
//! │                     └──── 105 / transport ─────┤                        │
//! │                                                └──► 104 + protNFe       │
//! │                     attempts exhausted ──► OutcomeUnknown { receipt }   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Retry Rules
//! - Connection failures, timeouts and HTTP 5xx are retried with
//!   exponential backoff, up to `max_retries` extra attempts per call
//! - HTTP 4xx and anything carrying a `cStat` are never retried here
//! - Dropping the future stops polling; the authority may still have the
//!   document, so the receipt is always handed back for reconciliation

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::certificate::StoredCertificate;
use crate::config::AuthoritySettings;
use crate::endpoints::{Endpoint, Service};
use crate::error::{IssueError, IssueResult};
use crate::response::{AuthorityAnswer, InnerBlock, StatusAnswer, VoidingAnswer};
use crate::xml::XmlWriter;
use nfe_core::status::{interpret, Outcome};
use nfe_core::{AccessKey, DocumentModel, EVENT_LAYOUT_VERSION, LAYOUT_VERSION, NFE_NAMESPACE};

const SOAP_NAMESPACE: &str = "http://www.w3.org/2003/05/soap-envelope";

// =============================================================================
// Transport Seam
// =============================================================================

/// Posts one SOAP envelope and returns the response body.
///
/// Errors must be [`IssueError::Transmission`] with `retryable` set for
/// failures worth another attempt.
#[async_trait]
pub trait AuthorityTransport: Send + Sync {
    async fn post(
        &self,
        url: &str,
        service: Service,
        envelope: String,
        certificate: &StoredCertificate,
    ) -> IssueResult<String>;
}

/// reqwest transport with the tenant's PKCS#12 identity as TLS client
/// certificate.
pub struct HttpTransport {
    connect_timeout: Duration,
    request_timeout: Duration,
    clients: Mutex<HashMap<(String, DateTime<Utc>), reqwest::Client>>,
}

impl HttpTransport {
    pub fn new(settings: &AuthoritySettings) -> Self {
        HttpTransport {
            connect_timeout: settings.connect_timeout(),
            request_timeout: settings.submit_timeout(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// One client per uploaded certificate; a re-upload gets a new one.
    fn client_for(&self, certificate: &StoredCertificate) -> IssueResult<reqwest::Client> {
        let tenant_id = &certificate.metadata.tenant_id;
        let cache_key = (tenant_id.clone(), certificate.metadata.uploaded_at);

        let mut clients = match self.clients.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(client) = clients.get(&cache_key) {
            return Ok(client.clone());
        }

        let identity =
            reqwest::Identity::from_pkcs12_der(&certificate.blob, certificate.passphrase.expose())
                .map_err(|e| IssueError::certificate(tenant_id.as_str(), e.to_string()))?;
        let client = reqwest::Client::builder()
            .identity(identity)
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| IssueError::certificate(tenant_id.as_str(), e.to_string()))?;

        clients.retain(|(tenant, _), _| tenant != tenant_id);
        clients.insert(cache_key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl AuthorityTransport for HttpTransport {
    async fn post(
        &self,
        url: &str,
        service: Service,
        envelope: String,
        certificate: &StoredCertificate,
    ) -> IssueResult<String> {
        let client = self.client_for(certificate)?;
        let content_type = format!(
            "application/soap+xml; charset=utf-8; action=\"{}\"",
            service.action()
        );

        let response = client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(envelope)
            .send()
            .await
            .map_err(|e| IssueError::transmission(format!("{} unreachable: {}", service, e), true))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| IssueError::transmission(format!("{} body: {}", service, e), true))?;

        if status.is_server_error() {
            return Err(IssueError::transmission(
                format!("{} answered HTTP {}", service, status),
                true,
            ));
        }
        if !status.is_success() {
            return Err(IssueError::transmission(
                format!("{} answered HTTP {}", service, status),
                false,
            ));
        }
        Ok(body)
    }
}

// =============================================================================
// Envelopes
// =============================================================================

fn soap_envelope(service: Service, payload: &str) -> String {
    let mut w = XmlWriter::new();
    w.raw("<?xml version=\"1.0\" encoding=\"utf-8\"?>")
        .open("soap12:Envelope", &[("xmlns:soap12", SOAP_NAMESPACE)])
        .open("soap12:Body", &[])
        .open("nfeDadosMsg", &[("xmlns", &service.namespace())])
        .raw(payload)
        .close("nfeDadosMsg")
        .close("soap12:Body")
        .close("soap12:Envelope");
    w.finish()
}

fn batch_id() -> String {
    let id: u64 = rand::thread_rng().gen_range(1..1_000_000_000_000_000);
    format!("{:015}", id)
}

// =============================================================================
// Client
// =============================================================================

/// Submission, polling, consultation, event delivery, voiding and
/// service status.
pub struct TransmissionClient {
    transport: Arc<dyn AuthorityTransport>,
    settings: AuthoritySettings,
}

impl TransmissionClient {
    pub fn new(transport: Arc<dyn AuthorityTransport>, settings: AuthoritySettings) -> Self {
        TransmissionClient {
            transport,
            settings,
        }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.settings.initial_backoff(),
            max_interval: self.settings.max_backoff(),
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Posts with retry on transport failures, then parses the answer.
    async fn call(
        &self,
        endpoint: &Endpoint,
        service: Service,
        payload: &str,
        inner: InnerBlock,
        certificate: &StoredCertificate,
    ) -> IssueResult<AuthorityAnswer> {
        let body = self.exchange(endpoint, service, payload, certificate).await?;
        let answer = AuthorityAnswer::parse(&body, inner)?;
        debug!(
            service = %service,
            status_code = answer.status_code,
            reason = %answer.reason,
            "Authority answered"
        );
        Ok(answer)
    }

    /// Posts with retry on transport failures and returns the raw body.
    async fn exchange(
        &self,
        endpoint: &Endpoint,
        service: Service,
        payload: &str,
        certificate: &StoredCertificate,
    ) -> IssueResult<String> {
        let url = endpoint.url(service);
        let envelope = soap_envelope(service, payload);
        let mut backoff = self.create_backoff();
        let mut attempt = 0u32;

        loop {
            match self
                .transport
                .post(url, service, envelope.clone(), certificate)
                .await
            {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt < self.settings.max_retries => {
                    attempt += 1;
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or_else(|| self.settings.max_backoff());
                    warn!(
                        service = %service,
                        attempt,
                        max_retries = self.settings.max_retries,
                        ?delay,
                        error = %e,
                        "Authority call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Sends a signed document as the only member of a batch.
    pub async fn submit(
        &self,
        endpoint: &Endpoint,
        signed_xml: &str,
        certificate: &StoredCertificate,
    ) -> IssueResult<AuthorityAnswer> {
        let synchronous = if endpoint.model == DocumentModel::Nfce { "1" } else { "0" };
        let mut w = XmlWriter::new();
        w.open("enviNFe", &[("xmlns", NFE_NAMESPACE), ("versao", LAYOUT_VERSION)])
            .leaf("idLote", &batch_id())
            .leaf("indSinc", synchronous)
            .raw(signed_xml)
            .close("enviNFe");

        info!(
            authorizer = %endpoint.authorizer,
            environment = %endpoint.environment,
            "Submitting document"
        );
        self.call(
            endpoint,
            Service::Authorization,
            &w.finish(),
            InnerBlock::Protocol,
            certificate,
        )
        .await
    }

    /// Asks once for the result of a receipt.
    pub async fn poll(
        &self,
        endpoint: &Endpoint,
        receipt: &str,
        certificate: &StoredCertificate,
    ) -> IssueResult<AuthorityAnswer> {
        let tp_amb = endpoint.environment.code().to_string();
        let mut w = XmlWriter::new();
        w.open("consReciNFe", &[("xmlns", NFE_NAMESPACE), ("versao", LAYOUT_VERSION)])
            .leaf("tpAmb", &tp_amb)
            .leaf("nRec", receipt)
            .close("consReciNFe");
        self.call(
            endpoint,
            Service::ReturnAuthorization,
            &w.finish(),
            InnerBlock::Protocol,
            certificate,
        )
        .await
    }

    /// Polls a receipt at a fixed interval until a final answer arrives.
    ///
    /// Gives up after `max_poll_attempts` with [`IssueError::OutcomeUnknown`].
    pub async fn await_resolution(
        &self,
        endpoint: &Endpoint,
        access_key: &AccessKey,
        receipt: &str,
        certificate: &StoredCertificate,
    ) -> IssueResult<AuthorityAnswer> {
        for attempt in 1..=self.settings.max_poll_attempts {
            tokio::time::sleep(self.settings.poll_interval()).await;

            match self.poll(endpoint, receipt, certificate).await {
                Ok(answer) => {
                    let (code, reason) = answer.verdict();
                    if interpret(code, reason).outcome == Outcome::Processing {
                        debug!(
                            access_key = %access_key,
                            receipt = %receipt,
                            attempt,
                            status_code = code,
                            "Batch still processing"
                        );
                        continue;
                    }
                    return Ok(answer);
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        access_key = %access_key,
                        receipt = %receipt,
                        attempt,
                        error = %e,
                        "Poll failed"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        warn!(
            access_key = %access_key,
            receipt = %receipt,
            attempts = self.settings.max_poll_attempts,
            "Giving up polling, outcome unknown"
        );
        Err(IssueError::OutcomeUnknown {
            access_key: access_key.to_string(),
            receipt: Some(receipt.to_string()),
        })
    }

    /// Authoritative situation of an access key.
    pub async fn consult(
        &self,
        endpoint: &Endpoint,
        access_key: &AccessKey,
        certificate: &StoredCertificate,
    ) -> IssueResult<AuthorityAnswer> {
        let tp_amb = endpoint.environment.code().to_string();
        let mut w = XmlWriter::new();
        w.open("consSitNFe", &[("xmlns", NFE_NAMESPACE), ("versao", LAYOUT_VERSION)])
            .leaf("tpAmb", &tp_amb)
            .leaf("xServ", "CONSULTAR")
            .leaf("chNFe", access_key.as_str())
            .close("consSitNFe");
        self.call(
            endpoint,
            Service::Consult,
            &w.finish(),
            InnerBlock::Protocol,
            certificate,
        )
        .await
    }

    /// Sends one signed `evento` in an `envEvento` batch.
    pub async fn send_event(
        &self,
        endpoint: &Endpoint,
        signed_event: &str,
        certificate: &StoredCertificate,
    ) -> IssueResult<AuthorityAnswer> {
        let mut w = XmlWriter::new();
        w.open(
            "envEvento",
            &[("xmlns", NFE_NAMESPACE), ("versao", EVENT_LAYOUT_VERSION)],
        )
        .leaf("idLote", &batch_id())
        .raw(signed_event)
        .close("envEvento");
        self.call(
            endpoint,
            Service::Event,
            &w.finish(),
            InnerBlock::Event,
            certificate,
        )
        .await
    }

    /// Sends a signed `inutNFe`. Voiding requests are not batched.
    pub async fn void_range(
        &self,
        endpoint: &Endpoint,
        signed_request: &str,
        certificate: &StoredCertificate,
    ) -> IssueResult<VoidingAnswer> {
        info!(
            authorizer = %endpoint.authorizer,
            environment = %endpoint.environment,
            "Requesting number voiding"
        );
        let body = self
            .exchange(endpoint, Service::Voiding, signed_request, certificate)
            .await?;
        let answer = VoidingAnswer::parse(&body)?;
        debug!(
            status_code = answer.status_code,
            reason = %answer.reason,
            "Voiding answered"
        );
        Ok(answer)
    }

    /// Asks whether the authorizer is in operation.
    pub async fn service_status(
        &self,
        endpoint: &Endpoint,
        certificate: &StoredCertificate,
    ) -> IssueResult<StatusAnswer> {
        let mut w = XmlWriter::new();
        w.open(
            "consStatServ",
            &[("xmlns", NFE_NAMESPACE), ("versao", LAYOUT_VERSION)],
        )
        .leaf("tpAmb", &endpoint.environment.code().to_string())
        .leaf("cUF", &endpoint.state_code.to_string())
        .leaf("xServ", "STATUS")
        .close("consStatServ");
        let body = self
            .exchange(endpoint, Service::Status, &w.finish(), certificate)
            .await?;
        let answer = StatusAnswer::parse(&body)?;
        debug!(
            authorizer = %endpoint.authorizer,
            status_code = answer.status_code,
            reason = %answer.reason,
            "Service status answered"
        );
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        answer_authorized, answer_processing, answer_queued, answer_status, answer_voided,
        fast_settings, mock_endpoint, stored_certificate, test_key,
    };
    use wiremock::matchers::{body_string_contains, header_regex, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(settings: AuthoritySettings) -> TransmissionClient {
        TransmissionClient::new(Arc::new(HttpTransport::new(&settings)), settings)
    }

    #[tokio::test]
    async fn test_submit_sends_soap12() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/NFeAutorizacao4"))
            .and(header_regex("content-type", "application/soap\\+xml.*nfeAutorizacaoLote"))
            .respond_with(ResponseTemplate::new(200).set_body_string(answer_queued("351000000000001")))
            .expect(1)
            .mount(&server)
            .await;

        let endpoint = mock_endpoint(&server.uri(), DocumentModel::Nfe);
        let answer = client(fast_settings())
            .submit(&endpoint, "<NFe></NFe>", &stored_certificate())
            .await
            .unwrap();
        assert_eq!(answer.status_code, 103);
        assert_eq!(answer.receipt_number.as_deref(), Some("351000000000001"));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/NFeAutorizacao4"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/NFeAutorizacao4"))
            .respond_with(ResponseTemplate::new(200).set_body_string(answer_queued("351000000000002")))
            .mount(&server)
            .await;

        let endpoint = mock_endpoint(&server.uri(), DocumentModel::Nfe);
        let answer = client(fast_settings())
            .submit(&endpoint, "<NFe></NFe>", &stored_certificate())
            .await
            .unwrap();
        assert_eq!(answer.receipt_number.as_deref(), Some("351000000000002"));
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/NFeAutorizacao4"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let endpoint = mock_endpoint(&server.uri(), DocumentModel::Nfe);
        let err = client(fast_settings())
            .submit(&endpoint, "<NFe></NFe>", &stored_certificate())
            .await
            .unwrap_err();
        assert!(matches!(err, IssueError::Transmission { retryable: false, .. }));
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4)
            .mount(&server)
            .await;

        let endpoint = mock_endpoint(&server.uri(), DocumentModel::Nfe);
        let err = client(fast_settings())
            .submit(&endpoint, "<NFe></NFe>", &stored_certificate())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_await_resolution_polls_until_final() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/NFeRetAutorizacao4"))
            .respond_with(ResponseTemplate::new(200).set_body_string(answer_processing()))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        let key = test_key();
        Mock::given(method("POST"))
            .and(path("/NFeRetAutorizacao4"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(answer_authorized(key.as_str(), "135240000000042")),
            )
            .mount(&server)
            .await;

        let endpoint = mock_endpoint(&server.uri(), DocumentModel::Nfe);
        let answer = client(fast_settings())
            .await_resolution(&endpoint, &key, "351000000000001", &stored_certificate())
            .await
            .unwrap();
        let protocol = answer.protocol.unwrap();
        assert_eq!(protocol.status_code, 100);
        assert_eq!(protocol.protocol_number.as_deref(), Some("135240000000042"));
    }

    #[tokio::test]
    async fn test_await_resolution_gives_up_with_receipt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/NFeRetAutorizacao4"))
            .respond_with(ResponseTemplate::new(200).set_body_string(answer_processing()))
            .mount(&server)
            .await;

        let endpoint = mock_endpoint(&server.uri(), DocumentModel::Nfe);
        let err = client(fast_settings())
            .await_resolution(&endpoint, &test_key(), "351000000000009", &stored_certificate())
            .await
            .unwrap_err();
        match err {
            IssueError::OutcomeUnknown { receipt, .. } => {
                assert_eq!(receipt.as_deref(), Some("351000000000009"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_service_status_sends_state_and_environment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/NFeStatusServico4"))
            .and(header_regex("content-type", "nfeStatusServicoNF"))
            .and(body_string_contains("<tpAmb>2</tpAmb><cUF>35</cUF><xServ>STATUS</xServ>"))
            .respond_with(ResponseTemplate::new(200).set_body_string(answer_status(107)))
            .expect(1)
            .mount(&server)
            .await;

        let endpoint = mock_endpoint(&server.uri(), DocumentModel::Nfe);
        let answer = client(fast_settings())
            .service_status(&endpoint, &stored_certificate())
            .await
            .unwrap();
        assert!(answer.in_operation());
        assert_eq!(answer.average_seconds, Some(1));
    }

    #[tokio::test]
    async fn test_void_range_is_retried_on_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/NFeInutilizacao4"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/NFeInutilizacao4"))
            .respond_with(ResponseTemplate::new(200).set_body_string(answer_voided(102)))
            .mount(&server)
            .await;

        let endpoint = mock_endpoint(&server.uri(), DocumentModel::Nfce);
        let answer = client(fast_settings())
            .void_range(&endpoint, "<inutNFe></inutNFe>", &stored_certificate())
            .await
            .unwrap();
        assert_eq!(answer.status_code, 102);
        assert!(answer.protocol_number.is_some());
    }

    #[test]
    fn test_envelope_shape() {
        let envelope = soap_envelope(Service::Consult, "<consSitNFe></consSitNFe>");
        assert!(envelope.contains(
            "<nfeDadosMsg xmlns=\"http://www.portalfiscal.inf.br/nfe/wsdl/NFeConsultaProtocolo4\"><consSitNFe>"
        ));
        assert_eq!(batch_id().len(), 15);
    }
}
