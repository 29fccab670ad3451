//! Fixtures shared by the unit tests of this crate.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, TimeZone, Utc};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509NameBuilder, X509};
use tempfile::TempDir;
use zeroize::Zeroizing;

use crate::artifacts::wrap_nfe_proc;
use crate::assembler::{DocumentAssembler, IssueRequest};
use crate::certificate::{
    CertificateMetadata, Passphrase, SigningIdentity, StoredCertificate,
};
use crate::config::{AuthoritySettings, EndpointOverride, IssuerConfig};
use crate::context::IssuerContext;
use crate::endpoints::{Endpoint, EndpointResolver};
use crate::signer::{sign, SignedRoot};
use crate::transmission::HttpTransport;
use nfe_core::{
    AccessKey, AccessKeyParts, Address, DocumentModel, Environment, LineItem, Money, Party,
    Payment, PaymentMethod, ProtocolRecord, Quantity, TaxClassification, TaxRate, TaxRegime,
    Tenant,
};
use nfe_db::{Database, DbConfig, NewDocument};

pub const PASSPHRASE: &str = "senha-do-certificado";
pub const SUBJECT: &str = "PADARIA EXEMPLO LTDA:11222333000181";
pub const TEST_PROTOCOL: &str = "135240000000042";

const SOAP_OPEN: &str = "<soap:Envelope xmlns:soap=\"http://www.w3.org/2003/05/soap-envelope\"><soap:Body><nfeResultMsg>";
const SOAP_CLOSE: &str = "</nfeResultMsg></soap:Body></soap:Envelope>";

// =============================================================================
// Certificates
// =============================================================================

fn key_and_certificate() -> &'static (PKey<Private>, X509) {
    static PAIR: OnceLock<(PKey<Private>, X509)> = OnceLock::new();
    PAIR.get_or_init(|| {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, SUBJECT).unwrap();
        name.append_entry_by_nid(Nid::COUNTRYNAME, "BR").unwrap();
        let name = name.build();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(365).unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        (key, builder.build())
    })
}

/// Self-signed PKCS#12 container protected by `passphrase`.
pub fn pkcs12_fixture(passphrase: &str) -> Vec<u8> {
    let (key, certificate) = key_and_certificate();
    let mut builder = Pkcs12::builder();
    builder.name("nfe-fixture");
    builder.pkey(key);
    builder.cert(certificate);
    builder.build2(passphrase).unwrap().to_der().unwrap()
}

pub fn identity() -> SigningIdentity {
    SigningIdentity::from_pkcs12("tenant-1", &pkcs12_fixture(PASSPHRASE), &Passphrase::new(PASSPHRASE))
        .unwrap()
}

pub fn stored_certificate() -> StoredCertificate {
    StoredCertificate {
        blob: Zeroizing::new(pkcs12_fixture(PASSPHRASE)),
        passphrase: Passphrase::new(PASSPHRASE),
        metadata: CertificateMetadata {
            tenant_id: "tenant-1".into(),
            filename: "loja.pfx".into(),
            subject: Some(SUBJECT.into()),
            uploaded_at: Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap(),
            expires_at: None,
        },
    }
}

// =============================================================================
// Settings and Endpoints
// =============================================================================

pub fn fast_settings() -> AuthoritySettings {
    AuthoritySettings {
        submit_timeout_secs: 5,
        connect_timeout_secs: 2,
        poll_interval_ms: 5,
        max_poll_attempts: 5,
        max_retries: 3,
        initial_backoff_ms: 1,
        max_backoff_secs: 1,
        overrides: Vec::new(),
    }
}

fn mock_override(base_url: &str, model: Option<DocumentModel>) -> EndpointOverride {
    EndpointOverride {
        state: "SP".into(),
        environment: Environment::Homologation,
        model,
        base_url: base_url.to_string(),
        qr_code_url: Some(format!("{}/qrcode", base_url.trim_end_matches('/'))),
        consult_url: None,
    }
}

/// SP homologation endpoint served by `base_url`.
pub fn mock_endpoint(base_url: &str, model: DocumentModel) -> Endpoint {
    EndpointResolver::new(vec![mock_override(base_url, Some(model))])
        .resolve(35, Environment::Homologation, model)
        .unwrap()
}

// =============================================================================
// Domain Samples
// =============================================================================

pub fn test_key() -> AccessKey {
    AccessKey::build(&AccessKeyParts {
        state_code: 35,
        year: 24,
        month: 3,
        emitter_tax_id: "11222333000181".into(),
        model: DocumentModel::Nfe,
        series: 1,
        number: 42,
        emission_type: 1,
        numeric_code: 12345678,
    })
    .unwrap()
}

pub fn sample_tenant(id: &str) -> Tenant {
    let now = Utc::now();
    Tenant {
        id: id.to_string(),
        tax_id: "11222333000181".into(),
        legal_name: "Padaria Exemplo LTDA".into(),
        state_code: 35,
        default_environment: Environment::Homologation,
        csc_id: Some("1".into()),
        csc_token: Some("A1B2C3D4E5F6G7H8".into()),
        created_at: now,
        updated_at: now,
    }
}

fn sp_address(street: &str) -> Address {
    Address {
        street: street.into(),
        number: "100".into(),
        complement: None,
        district: "Centro".into(),
        municipality_code: "3550308".into(),
        municipality: "Sao Paulo".into(),
        state: "SP".into(),
        postal_code: "01001-000".into(),
        phone: Some("(11) 3333-4444".into()),
    }
}

fn item(code: &str, description: &str, units: i64, cents: i64) -> LineItem {
    LineItem {
        product_code: code.into(),
        description: description.into(),
        gtin: None,
        ncm: "19052090".into(),
        cfop: "5102".into(),
        unit: "UN".into(),
        quantity: Quantity::from_units(units),
        unit_price: Money::from_cents(cents),
        discount: Money::zero(),
        tax: TaxClassification {
            origin: 0,
            icms_code: "00".into(),
            icms_rate: TaxRate::from_bps(1800),
            pis_cst: "01".into(),
            pis_rate: TaxRate::from_bps(165),
            cofins_cst: "01".into(),
            cofins_rate: TaxRate::from_bps(760),
        },
    }
}

/// A valid order from the sample tenant. NF-e orders name a recipient.
pub fn sample_request(model: DocumentModel) -> IssueRequest {
    let recipient = match model {
        DocumentModel::Nfe => Some(Party {
            tax_id: "11.444.777/0001-61".into(),
            legal_name: "Mercado Cliente LTDA".into(),
            trade_name: None,
            state_registration: None,
            address: Some(sp_address("Avenida Paulista")),
            tax_regime: None,
            email: Some("compras@cliente.com.br".into()),
        }),
        DocumentModel::Nfce => None,
    };
    IssueRequest {
        model,
        series: 1,
        environment: None,
        emitter: Party {
            tax_id: "11.222.333/0001-81".into(),
            legal_name: "Padaria Exemplo LTDA".into(),
            trade_name: Some("Padaria Exemplo".into()),
            state_registration: Some("123.456.789.012".into()),
            address: Some(sp_address("Rua das Flores")),
            tax_regime: Some(TaxRegime::Normal),
            email: None,
        },
        recipient,
        items: vec![
            item("001", "Pão francês", 10, 75),
            item("002", "Bolo de fubá", 1, 1890),
        ],
        payments: vec![Payment {
            method: PaymentMethod::Cash,
            amount: Money::from_cents(5000),
        }],
        freight: Money::zero(),
        other_charges: Money::zero(),
        operation_nature: "VENDA".into(),
        additional_info: None,
    }
}

fn emitted_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 13, 30, 0).unwrap()
}

fn signed_with_items(items: usize) -> (AccessKey, String) {
    let tenant = sample_tenant("tenant-1");
    let mut request = sample_request(DocumentModel::Nfe);
    let template = request.items[0].clone();
    request.items = (0..items)
        .map(|i| {
            let mut line = template.clone();
            line.product_code = format!("{:03}", i + 1);
            line
        })
        .collect();
    request.payments[0].amount = Money::from_cents(items as i64 * 1000);

    let prepared = DocumentAssembler.prepare(&tenant, request).unwrap();
    let endpoint = mock_endpoint("http://127.0.0.1:1", DocumentModel::Nfe);
    let assembled = DocumentAssembler
        .assemble(prepared, 42, None, 12345678, emitted_at(), &endpoint)
        .unwrap();
    let signed = sign(&assembled.xml, SignedRoot::Document, &identity()).unwrap();
    (assembled.document.access_key, signed)
}

/// Signed NF-e number 42 from the sample order, emitted 2024-03-15.
pub fn signed_document() -> (AccessKey, String) {
    signed_with_items(2)
}

/// `nfeProc` of an authorized NF-e with `items` lines.
pub fn authorized_proc_xml(items: usize) -> String {
    let (key, signed) = signed_with_items(items);
    let protocol = ProtocolRecord {
        protocol_number: Some(TEST_PROTOCOL.into()),
        receipt_number: None,
        status_code: 100,
        reason: "Autorizado o uso da NF-e".into(),
        authorized_at: Some(Utc.with_ymd_and_hms(2024, 3, 15, 13, 30, 2).unwrap()),
    };
    wrap_nfe_proc(&signed, &key, Environment::Homologation, &protocol, None).unwrap()
}

/// `procEventoNFe` of correction letter `sequence` registered for `key`.
pub fn correction_proc_xml(key: &AccessKey, sequence: u32, correction: &str) -> String {
    let event = format!(
        "<evento xmlns=\"http://www.portalfiscal.inf.br/nfe\" versao=\"1.00\"><infEvento Id=\"ID110110{key}{seq:02}\"><cOrgao>35</cOrgao><tpAmb>2</tpAmb><CNPJ>11222333000181</CNPJ><chNFe>{key}</chNFe><dhEvento>2024-03-15T11:00:00-03:00</dhEvento><tpEvento>110110</tpEvento><nSeqEvento>{seq}</nSeqEvento><verEvento>1.00</verEvento><detEvento versao=\"1.00\"><descEvento>Carta de Correcao</descEvento><xCorrecao>{correction}</xCorrecao><xCondUso>{conditions}</xCondUso></detEvento></infEvento></evento>",
        key = key,
        seq = sequence,
        correction = correction,
        conditions = crate::events::CORRECTION_CONDITIONS,
    );
    let answer = "<retEvento versao=\"1.00\"><infEvento><tpAmb>2</tpAmb><cOrgao>35</cOrgao><cStat>135</cStat><xMotivo>Evento registrado e vinculado a NF-e</xMotivo><dhRegEvento>2024-03-15T11:00:01-03:00</dhRegEvento><nProt>135240000000099</nProt></infEvento></retEvento>";
    crate::artifacts::wrap_event_proc(&event, answer).unwrap()
}

// =============================================================================
// Authority Answers
// =============================================================================

pub fn answer_queued(receipt: &str) -> String {
    format!(
        "{}<retEnviNFe xmlns=\"http://www.portalfiscal.inf.br/nfe\" versao=\"4.00\"><tpAmb>2</tpAmb><verAplic>SP_NFE_PL009_V4</verAplic><cStat>103</cStat><xMotivo>Lote recebido com sucesso</xMotivo><cUF>35</cUF><dhRecbto>2024-03-15T10:30:01-03:00</dhRecbto><infRec><nRec>{}</nRec><tMed>1</tMed></infRec></retEnviNFe>{}",
        SOAP_OPEN, receipt, SOAP_CLOSE
    )
}

pub fn answer_processing() -> String {
    format!(
        "{}<retConsReciNFe xmlns=\"http://www.portalfiscal.inf.br/nfe\" versao=\"4.00\"><tpAmb>2</tpAmb><cStat>105</cStat><xMotivo>Lote em processamento</xMotivo><cUF>35</cUF></retConsReciNFe>{}",
        SOAP_OPEN, SOAP_CLOSE
    )
}

/// Batch processed (104) with an authorization (100) for `key`.
pub fn answer_authorized(key: &str, protocol_number: &str) -> String {
    format!(
        "{}<retConsReciNFe xmlns=\"http://www.portalfiscal.inf.br/nfe\" versao=\"4.00\"><tpAmb>2</tpAmb><cStat>104</cStat><xMotivo>Lote processado</xMotivo><cUF>35</cUF><protNFe versao=\"4.00\"><infProt><tpAmb>2</tpAmb><verAplic>SP_NFE_PL009_V4</verAplic><chNFe>{}</chNFe><dhRecbto>2024-03-15T10:30:02-03:00</dhRecbto><nProt>{}</nProt><digVal>abc=</digVal><cStat>100</cStat><xMotivo>Autorizado o uso da NF-e</xMotivo></infProt></protNFe></retConsReciNFe>{}",
        SOAP_OPEN, key, protocol_number, SOAP_CLOSE
    )
}

/// Synchronous batch answer rejecting the document.
pub fn answer_rejected(code: u16, reason: &str) -> String {
    format!(
        "{}<retEnviNFe xmlns=\"http://www.portalfiscal.inf.br/nfe\" versao=\"4.00\"><tpAmb>2</tpAmb><cStat>104</cStat><xMotivo>Lote processado</xMotivo><cUF>35</cUF><protNFe versao=\"4.00\"><infProt><tpAmb>2</tpAmb><dhRecbto>2024-03-15T10:30:02-03:00</dhRecbto><cStat>{}</cStat><xMotivo>{}</xMotivo></infProt></protNFe></retEnviNFe>{}",
        SOAP_OPEN, code, reason, SOAP_CLOSE
    )
}

pub fn answer_consult(code: u16, reason: &str) -> String {
    format!(
        "{}<retConsSitNFe xmlns=\"http://www.portalfiscal.inf.br/nfe\" versao=\"4.00\"><tpAmb>2</tpAmb><cStat>{}</cStat><xMotivo>{}</xMotivo><cUF>35</cUF></retConsSitNFe>{}",
        SOAP_OPEN, code, reason, SOAP_CLOSE
    )
}

/// Event batch (128) with one event answer.
pub fn answer_event(code: u16, reason: &str) -> String {
    let protocol = if code == 135 || code == 136 || code == 155 {
        "<nProt>135240000000099</nProt>"
    } else {
        ""
    };
    format!(
        "{}<retEnvEvento xmlns=\"http://www.portalfiscal.inf.br/nfe\" versao=\"1.00\"><idLote>1</idLote><tpAmb>2</tpAmb><cOrgao>35</cOrgao><cStat>128</cStat><xMotivo>Lote de Evento Processado</xMotivo><retEvento versao=\"1.00\"><infEvento><tpAmb>2</tpAmb><cOrgao>35</cOrgao><cStat>{}</cStat><xMotivo>{}</xMotivo><dhRegEvento>2024-03-15T11:00:00-03:00</dhRegEvento>{}</infEvento></retEvento></retEnvEvento>{}",
        SOAP_OPEN, code, reason, protocol, SOAP_CLOSE
    )
}

/// `retInutNFe` with `code`; 102 carries a protocol.
pub fn answer_voided(code: u16) -> String {
    let (reason, protocol) = if code == 102 {
        ("Inutilizacao de numero homologado", "<nProt>135240000000777</nProt>")
    } else {
        ("Rejeicao: Um numero da faixa ja foi utilizado", "")
    };
    format!(
        "{}<retInutNFe xmlns=\"http://www.portalfiscal.inf.br/nfe\" versao=\"4.00\"><infInut><tpAmb>2</tpAmb><verAplic>SP_NFE_PL009_V4</verAplic><cStat>{}</cStat><xMotivo>{}</xMotivo><cUF>35</cUF><dhRecbto>2024-05-10T09:00:00-03:00</dhRecbto>{}</infInut></retInutNFe>{}",
        SOAP_OPEN, code, reason, protocol, SOAP_CLOSE
    )
}

pub fn answer_status(code: u16) -> String {
    let reason = if code == 107 { "Servico em Operacao" } else { "Servico Paralisado Momentaneamente" };
    format!(
        "{}<retConsStatServ xmlns=\"http://www.portalfiscal.inf.br/nfe\" versao=\"4.00\"><tpAmb>2</tpAmb><verAplic>SP_NFE_PL009_V4</verAplic><cStat>{}</cStat><xMotivo>{}</xMotivo><cUF>35</cUF><dhRecbto>2024-05-10T09:00:00-03:00</dhRecbto><tMed>1</tMed></retConsStatServ>{}",
        SOAP_OPEN, code, reason, SOAP_CLOSE
    )
}

// =============================================================================
// Harness
// =============================================================================

/// A full context over an in-memory database and temporary directories,
/// with the sample tenant and its certificate in place.
pub struct Harness {
    pub ctx: Arc<IssuerContext>,
    dir: TempDir,
}

impl Harness {
    pub fn artifact_root(&self) -> PathBuf {
        self.dir.path().join("artifacts")
    }
}

pub async fn harness(base_url: &str) -> Harness {
    harness_with(base_url, Vec::new()).await
}

/// Like [`harness`], with extra endpoint overrides.
pub async fn harness_with(base_url: &str, extra: Vec<EndpointOverride>) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = IssuerConfig::default();
    config.authority = fast_settings();
    config.authority.overrides = vec![mock_override(base_url, None)];
    config.authority.overrides.extend(extra);
    config.storage.artifact_root = dir.path().join("artifacts");
    config.storage.certificate_root = dir.path().join("certificates");

    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    db.tenants().upsert(&sample_tenant("tenant-1")).await.unwrap();

    let transport = Arc::new(HttpTransport::new(&config.authority));
    let ctx = IssuerContext::with_transport(&config, db, transport);
    ctx.certificates
        .store("tenant-1", "loja.pfx", pkcs12_fixture(PASSPHRASE), Passphrase::new(PASSPHRASE))
        .await
        .unwrap();

    Harness {
        ctx: Arc::new(ctx),
        dir,
    }
}

/// Inserts [`signed_document`] as authorized at `authorized_at`.
pub async fn authorized_document(h: &Harness, authorized_at: DateTime<Utc>) -> AccessKey {
    authorized_document_in(h, authorized_at, Environment::Homologation).await
}

/// Like [`authorized_document`], recorded under `environment`.
pub async fn authorized_document_in(
    h: &Harness,
    authorized_at: DateTime<Utc>,
    environment: Environment,
) -> AccessKey {
    let (key, signed) = signed_document();
    let documents = h.ctx.db.documents();
    let id = uuid::Uuid::new_v4().to_string();
    documents
        .insert(&NewDocument {
            id: id.clone(),
            tenant_id: "tenant-1".into(),
            access_key: key.clone(),
            environment,
            model: DocumentModel::Nfe,
            series: 1,
            number: 42,
            emitted_at: emitted_at(),
            total: Money::from_cents(2640),
        })
        .await
        .unwrap();
    documents.mark_signed(&id, &signed).await.unwrap();
    documents.mark_submitted(&id).await.unwrap();
    documents
        .record_authorization(
            &id,
            &ProtocolRecord {
                protocol_number: Some(TEST_PROTOCOL.into()),
                receipt_number: Some("351000000000001".into()),
                status_code: 100,
                reason: "Autorizado o uso da NF-e".into(),
                authorized_at: Some(authorized_at),
            },
            None,
        )
        .await
        .unwrap();
    key
}
