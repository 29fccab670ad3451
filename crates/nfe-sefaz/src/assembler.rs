//! # Document Assembler
//!
//! Turns an order into an NF-e 4.00 document, in two steps so a number is
//! only reserved for orders that already passed validation.
//!
//! ## Assembly Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  IssueRequest                                                           │
//! │       │                                                                 │
//! │       ▼  prepare()   tax ids, addresses, CSC, items, taxes, payments    │
//! │  PreparedDocument                     (no number yet, no I/O)           │
//! │       │                                                                 │
//! │       │  ◄── SequenceRepository::reserve()   (atomic, outside)          │
//! │       ▼                                                                 │
//! │       ▼  assemble()  number ahead of series, environment vs endpoint,   │
//! │  AssembledDocument    access key, canonical XML, NFC-e QR code          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The XML is written canonically (see [`crate::xml`]) so the signer can
//! digest `infNFe` without re-serializing it.

use chrono::{DateTime, Datelike, FixedOffset, Offset, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::debug;
use uuid::Uuid;

use crate::endpoints::Endpoint;
use crate::error::{IssueError, IssueResult};
use crate::xml::XmlWriter;
use nfe_core::access_key::EMISSION_TYPE_NORMAL;
use nfe_core::tax::{
    classify_contribution, classify_icms, compute_items, compute_totals, ContributionTreatment,
    IcmsTreatment,
};
use nfe_core::validation::{
    digits_only, state_code_for, validate_cnpj, validate_digits, validate_next_number,
    validate_required, validate_series, validate_tax_id,
};
use nfe_core::{
    AccessKey, AccessKeyParts, Address, ComputedLineItem, DocumentHeader, DocumentModel,
    DocumentStatus, Environment, FiscalDocument, LineItem, Money, Party, Payment, TaxRegime,
    Tenant, Totals, ValidationError, LAYOUT_VERSION, NFE_NAMESPACE,
};

/// Recipient name the authority demands on homologation documents.
pub const HOMOLOGATION_NAME: &str = "NF-E EMITIDA EM AMBIENTE DE HOMOLOGACAO - SEM VALOR FISCAL";

/// First item description on homologation NFC-e.
pub const HOMOLOGATION_ITEM: &str =
    "NOTA FISCAL EMITIDA EM AMBIENTE DE HOMOLOGACAO - SEM VALOR FISCAL";

const APPLICATION_VERSION: &str = concat!("nfe-issuer ", env!("CARGO_PKG_VERSION"));

/// Emission timestamps are written in Brasília time.
pub(crate) fn brasilia() -> FixedOffset {
    FixedOffset::west_opt(3 * 3600).unwrap_or_else(|| Utc.fix())
}

// =============================================================================
// Request
// =============================================================================

fn default_series() -> u16 {
    1
}

fn default_operation_nature() -> String {
    "VENDA".to_string()
}

/// A finished order handed over by the order-assembly caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRequest {
    pub model: DocumentModel,
    #[serde(default = "default_series")]
    pub series: u16,
    /// Falls back to the tenant's default environment.
    #[serde(default)]
    pub environment: Option<Environment>,
    pub emitter: Party,
    #[serde(default)]
    pub recipient: Option<Party>,
    pub items: Vec<LineItem>,
    pub payments: Vec<Payment>,
    #[serde(default)]
    pub freight: Money,
    #[serde(default)]
    pub other_charges: Money,
    #[serde(default = "default_operation_nature")]
    pub operation_nature: String,
    #[serde(default)]
    pub additional_info: Option<String>,
}

/// Consumer security code used by the NFC-e QR code.
#[derive(Clone)]
struct ConsumerCode {
    id: String,
    token: String,
}

impl std::fmt::Debug for ConsumerCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerCode")
            .field("id", &self.id)
            .field("token", &"***")
            .finish()
    }
}

/// An order that passed validation and tax computation.
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub tenant_id: String,
    pub state_code: u8,
    pub environment: Environment,
    pub model: DocumentModel,
    pub series: u16,
    pub emitter: Party,
    pub recipient: Option<Party>,
    pub items: Vec<ComputedLineItem>,
    pub payments: Vec<Payment>,
    pub totals: Totals,
    pub operation_nature: String,
    pub additional_info: Option<String>,
    csc: Option<ConsumerCode>,
}

/// A document with its key and unsigned canonical XML.
#[derive(Debug, Clone)]
pub struct AssembledDocument {
    pub document: FiscalDocument,
    pub xml: String,
}

// =============================================================================
// Assembler
// =============================================================================

/// Builds documents from orders.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentAssembler;

impl DocumentAssembler {
    pub fn new() -> Self {
        DocumentAssembler
    }

    /// Validates the order and computes taxes and totals.
    pub fn prepare(&self, tenant: &Tenant, request: IssueRequest) -> IssueResult<PreparedDocument> {
        validate_series(request.series)?;
        let environment = request.environment.unwrap_or(tenant.default_environment);

        let emitter = validate_emitter(tenant, request.emitter)?;
        let regime = emitter
            .tax_regime
            .ok_or_else(|| ValidationError::required("emitter.tax_regime"))?;

        let recipient = match request.recipient {
            Some(recipient) => Some(validate_recipient(recipient, request.model)?),
            None if request.model == DocumentModel::Nfe => {
                return Err(ValidationError::required("recipient").into())
            }
            None => None,
        };

        let csc = match request.model {
            DocumentModel::Nfce => {
                let id = tenant.csc_id.clone().filter(|v| !v.trim().is_empty());
                let token = tenant.csc_token.clone().filter(|v| !v.trim().is_empty());
                match (id, token) {
                    (Some(id), Some(token)) => Some(ConsumerCode { id, token }),
                    _ => return Err(ValidationError::required("tenant.csc").into()),
                }
            }
            DocumentModel::Nfe => None,
        };

        let operation_nature = validate_required("operation_nature", &request.operation_nature, 60)?;
        let additional_info = match request.additional_info {
            Some(info) if !info.trim().is_empty() => {
                Some(validate_required("additional_info", &info, 5000)?)
            }
            _ => None,
        };

        let items = compute_items(&request.items, regime, request.freight, request.other_charges)?;
        let totals = compute_totals(&items, &request.payments)?;

        Ok(PreparedDocument {
            tenant_id: tenant.id.clone(),
            state_code: tenant.state_code,
            environment,
            model: request.model,
            series: request.series,
            emitter,
            recipient,
            items,
            payments: request.payments,
            totals,
            operation_nature,
            additional_info,
            csc,
        })
    }

    /// Fixes the number, builds the key and writes the XML.
    ///
    /// `highest_used` is the highest number already issued or voided in the
    /// series; `number` must be above it. `endpoint` is where the document
    /// will be sent; its environment must agree with the document's.
    pub fn assemble(
        &self,
        prepared: PreparedDocument,
        number: u32,
        highest_used: Option<u32>,
        numeric_code: u32,
        emitted_at: DateTime<Utc>,
        endpoint: &Endpoint,
    ) -> IssueResult<AssembledDocument> {
        validate_next_number(number, highest_used)?;
        endpoint.ensure_environment(prepared.environment)?;
        if endpoint.model != prepared.model || endpoint.state_code != prepared.state_code {
            return Err(IssueError::Config(format!(
                "endpoint {} serves model {} in state {}, document is model {} in state {}",
                endpoint.authorizer,
                endpoint.model,
                endpoint.state_code,
                prepared.model,
                prepared.state_code
            )));
        }

        let local = emitted_at.with_timezone(&brasilia());
        let access_key = AccessKey::build(&AccessKeyParts {
            state_code: prepared.state_code,
            year: (local.year() % 100) as u8,
            month: local.month() as u8,
            emitter_tax_id: prepared.emitter.tax_id.clone(),
            model: prepared.model,
            series: prepared.series,
            number,
            emission_type: EMISSION_TYPE_NORMAL,
            numeric_code,
        })?;

        let qr_code = match (&prepared.csc, prepared.model) {
            (Some(csc), DocumentModel::Nfce) => {
                let base = endpoint.qr_code_url.as_deref().ok_or_else(|| {
                    IssueError::Config(format!(
                        "no NFC-e QR code URL for state {}, configure an endpoint override",
                        prepared.state_code
                    ))
                })?;
                let consult = endpoint.consult_url.clone().unwrap_or_else(|| base.to_string());
                Some((
                    qr_code_url(base, &access_key, prepared.environment, &csc.id, &csc.token),
                    consult,
                ))
            }
            _ => None,
        };

        let header = DocumentHeader {
            series: prepared.series,
            number,
            emitted_at,
            environment: prepared.environment,
            model: prepared.model,
            operation_nature: prepared.operation_nature.clone(),
        };

        let xml = write_document(&prepared, &header, &access_key, numeric_code, local, qr_code);

        debug!(
            tenant_id = %prepared.tenant_id,
            access_key = %access_key,
            number,
            total = %prepared.totals.document_total,
            "Document assembled"
        );

        let document = FiscalDocument {
            id: Uuid::new_v4().to_string(),
            tenant_id: prepared.tenant_id,
            access_key,
            header,
            emitter: prepared.emitter,
            recipient: prepared.recipient,
            items: prepared.items,
            payments: prepared.payments,
            totals: prepared.totals,
            additional_info: prepared.additional_info,
            status: DocumentStatus::Assembled,
        };
        Ok(AssembledDocument { document, xml })
    }
}

/// Random 8-digit `cNF` that differs from the document number.
pub fn random_numeric_code(number: u32) -> u32 {
    let mut rng = rand::thread_rng();
    loop {
        let code = rng.gen_range(10_000_000..=99_999_999);
        if code != number {
            return code;
        }
    }
}

/// Version 2 NFC-e QR code URL.
///
/// `{base}?p={key}|2|{tpAmb}|{cscId}|{SHA1(key|2|tpAmb|cscId + token)}`
pub fn qr_code_url(
    base: &str,
    access_key: &AccessKey,
    environment: Environment,
    csc_id: &str,
    csc_token: &str,
) -> String {
    let params = format!("{}|2|{}|{}", access_key, environment.code(), csc_id);
    let hash = hex::encode_upper(Sha1::digest(format!("{}{}", params, csc_token).as_bytes()));
    format!("{}?p={}|{}", base, params, hash)
}

// =============================================================================
// Validation
// =============================================================================

fn validate_address(prefix: &str, address: Option<Address>) -> IssueResult<Address> {
    let address = address.ok_or_else(|| ValidationError::required(format!("{}.address", prefix)))?;
    let field = |name: &str| format!("{}.address.{}", prefix, name);

    let postal_code = digits_only(&address.postal_code);
    validate_digits(&field("postal_code"), &postal_code, 8)?;
    validate_digits(&field("municipality_code"), &address.municipality_code, 7)?;
    if state_code_for(&address.state).is_none() {
        return Err(ValidationError::invalid_format(
            field("state"),
            format!("'{}' is not a state abbreviation", address.state),
        )
        .into());
    }

    Ok(Address {
        street: validate_required(&field("street"), &address.street, 60)?,
        number: validate_required(&field("number"), &address.number, 60)?,
        complement: address.complement.filter(|c| !c.trim().is_empty()),
        district: validate_required(&field("district"), &address.district, 60)?,
        municipality_code: address.municipality_code,
        municipality: validate_required(&field("municipality"), &address.municipality, 60)?,
        state: address.state.to_ascii_uppercase(),
        postal_code,
        phone: address.phone.map(|p| digits_only(&p)).filter(|p| !p.is_empty()),
    })
}

fn validate_emitter(tenant: &Tenant, emitter: Party) -> IssueResult<Party> {
    let tax_id = validate_cnpj("emitter.tax_id", &emitter.tax_id)?;
    if tax_id != digits_only(&tenant.tax_id) {
        return Err(ValidationError::invalid_format(
            "emitter.tax_id",
            "does not match the tenant CNPJ",
        )
        .into());
    }
    let state_registration = emitter
        .state_registration
        .as_deref()
        .map(digits_only)
        .filter(|ie| !ie.is_empty())
        .ok_or_else(|| ValidationError::required("emitter.state_registration"))?;

    let address = validate_address("emitter", emitter.address)?;
    if state_code_for(&address.state) != Some(tenant.state_code) {
        return Err(ValidationError::invalid_format(
            "emitter.address.state",
            "does not match the tenant state",
        )
        .into());
    }

    Ok(Party {
        tax_id,
        legal_name: validate_required("emitter.legal_name", &emitter.legal_name, 60)?,
        trade_name: emitter.trade_name.filter(|n| !n.trim().is_empty()),
        state_registration: Some(state_registration),
        address: Some(address),
        tax_regime: emitter.tax_regime,
        email: emitter.email,
    })
}

fn validate_recipient(recipient: Party, model: DocumentModel) -> IssueResult<Party> {
    let tax_id = validate_tax_id("recipient.tax_id", &recipient.tax_id)?;
    let address = match (model, recipient.address) {
        (DocumentModel::Nfe, address) => Some(validate_address("recipient", address)?),
        (DocumentModel::Nfce, Some(address)) => Some(validate_address("recipient", Some(address))?),
        (DocumentModel::Nfce, None) => None,
    };
    Ok(Party {
        tax_id,
        legal_name: validate_required("recipient.legal_name", &recipient.legal_name, 60)?,
        trade_name: None,
        state_registration: recipient
            .state_registration
            .as_deref()
            .map(digits_only)
            .filter(|ie| !ie.is_empty()),
        address,
        tax_regime: None,
        email: recipient.email.filter(|e| !e.trim().is_empty()),
    })
}

// =============================================================================
// XML
// =============================================================================

fn write_document(
    doc: &PreparedDocument,
    header: &DocumentHeader,
    key: &AccessKey,
    numeric_code: u32,
    local: DateTime<FixedOffset>,
    qr_code: Option<(String, String)>,
) -> String {
    let mut w = XmlWriter::new();
    let id = key.id_attribute();
    w.open("NFe", &[("xmlns", NFE_NAMESPACE)])
        .open("infNFe", &[("Id", &id), ("versao", LAYOUT_VERSION)]);

    write_ide(&mut w, doc, header, key, numeric_code, local);
    write_emitter(&mut w, &doc.emitter);
    if let Some(recipient) = &doc.recipient {
        write_recipient(&mut w, recipient, doc.environment, doc.model);
    }
    for item in &doc.items {
        write_item(&mut w, item, doc);
    }
    write_totals(&mut w, &doc.totals);

    let mod_frete = if doc.totals.freight.is_positive() { "0" } else { "9" };
    w.open("transp", &[]).leaf("modFrete", mod_frete).close("transp");

    w.open("pag", &[]);
    for payment in &doc.payments {
        w.open("detPag", &[])
            .leaf("tPag", payment.method.code())
            .leaf("vPag", &payment.amount.to_decimal_string())
            .close("detPag");
    }
    if doc.totals.change.is_positive() {
        w.leaf("vTroco", &doc.totals.change.to_decimal_string());
    }
    w.close("pag");

    if let Some(info) = &doc.additional_info {
        w.open("infAdic", &[]).leaf("infCpl", info).close("infAdic");
    }
    w.close("infNFe");

    if let Some((qr, consult)) = qr_code {
        w.open("infNFeSupl", &[])
            .leaf("qrCode", &qr)
            .leaf("urlChave", &consult)
            .close("infNFeSupl");
    }
    w.close("NFe");
    w.finish()
}

fn write_ide(
    w: &mut XmlWriter,
    doc: &PreparedDocument,
    header: &DocumentHeader,
    key: &AccessKey,
    numeric_code: u32,
    local: DateTime<FixedOffset>,
) {
    let municipality = doc
        .emitter
        .address
        .as_ref()
        .map(|a| a.municipality_code.as_str())
        .unwrap_or_default();
    let final_consumer = match (doc.model, &doc.recipient) {
        (DocumentModel::Nfce, _) => "1",
        (DocumentModel::Nfe, Some(r)) if r.state_registration.is_some() => "0",
        _ => "1",
    };
    let print_format = match doc.model {
        DocumentModel::Nfe => "1",
        DocumentModel::Nfce => "4",
    };

    w.open("ide", &[])
        .leaf("cUF", &doc.state_code.to_string())
        .leaf("cNF", &format!("{:08}", numeric_code))
        .leaf("natOp", &header.operation_nature)
        .leaf("mod", &header.model.code().to_string())
        .leaf("serie", &header.series.to_string())
        .leaf("nNF", &header.number.to_string())
        .leaf("dhEmi", &local.format("%Y-%m-%dT%H:%M:%S%:z").to_string())
        .leaf("tpNF", "1")
        .leaf("idDest", "1")
        .leaf("cMunFG", municipality)
        .leaf("tpImp", print_format)
        .leaf("tpEmis", &EMISSION_TYPE_NORMAL.to_string())
        .leaf("cDV", &key.check_digit().to_string())
        .leaf("tpAmb", &header.environment.code().to_string())
        .leaf("finNFe", "1")
        .leaf("indFinal", final_consumer)
        .leaf("indPres", "1")
        .leaf("procEmi", "0")
        .leaf("verProc", APPLICATION_VERSION)
        .close("ide");
}

fn write_address(w: &mut XmlWriter, element: &str, address: &Address) {
    w.open(element, &[])
        .leaf("xLgr", &address.street)
        .leaf("nro", &address.number)
        .opt_leaf("xCpl", address.complement.as_deref())
        .leaf("xBairro", &address.district)
        .leaf("cMun", &address.municipality_code)
        .leaf("xMun", &address.municipality)
        .leaf("UF", &address.state)
        .leaf("CEP", &address.postal_code)
        .leaf("cPais", "1058")
        .leaf("xPais", "BRASIL")
        .opt_leaf("fone", address.phone.as_deref())
        .close(element);
}

fn write_emitter(w: &mut XmlWriter, emitter: &Party) {
    w.open("emit", &[])
        .leaf("CNPJ", &emitter.tax_id)
        .leaf("xNome", &emitter.legal_name)
        .opt_leaf("xFant", emitter.trade_name.as_deref());
    if let Some(address) = &emitter.address {
        write_address(w, "enderEmit", address);
    }
    let crt = emitter.tax_regime.unwrap_or(TaxRegime::Normal).crt().to_string();
    w.opt_leaf("IE", emitter.state_registration.as_deref())
        .leaf("CRT", &crt)
        .close("emit");
}

fn write_recipient(
    w: &mut XmlWriter,
    recipient: &Party,
    environment: Environment,
    model: DocumentModel,
) {
    let tax_element = if recipient.tax_id.len() == 14 { "CNPJ" } else { "CPF" };
    let name = match environment {
        Environment::Homologation => HOMOLOGATION_NAME,
        Environment::Production => recipient.legal_name.as_str(),
    };
    let ie_indicator = match (&recipient.state_registration, model) {
        (Some(_), DocumentModel::Nfe) => "1",
        _ => "9",
    };

    w.open("dest", &[])
        .leaf(tax_element, &recipient.tax_id)
        .leaf("xNome", name);
    if let Some(address) = &recipient.address {
        write_address(w, "enderDest", address);
    }
    w.leaf("indIEDest", ie_indicator);
    if ie_indicator == "1" {
        w.opt_leaf("IE", recipient.state_registration.as_deref());
    }
    w.opt_leaf("email", recipient.email.as_deref()).close("dest");
}

fn write_item(w: &mut XmlWriter, computed: &ComputedLineItem, doc: &PreparedDocument) {
    let item = &computed.item;
    let gtin = item.gtin.as_deref().unwrap_or("SEM GTIN");
    let description = if computed.number == 1
        && doc.model == DocumentModel::Nfce
        && doc.environment == Environment::Homologation
    {
        HOMOLOGATION_ITEM
    } else {
        item.description.as_str()
    };
    let quantity = item.quantity.to_decimal_string();
    let unit_price = item.unit_price.to_decimal_string();
    let number = computed.number.to_string();

    w.open("det", &[("nItem", &number)])
        .open("prod", &[])
        .leaf("cProd", &item.product_code)
        .leaf("cEAN", gtin)
        .leaf("xProd", description)
        .leaf("NCM", &item.ncm)
        .leaf("CFOP", &item.cfop)
        .leaf("uCom", &item.unit)
        .leaf("qCom", &quantity)
        .leaf("vUnCom", &unit_price)
        .leaf("vProd", &computed.gross.to_decimal_string())
        .leaf("cEANTrib", gtin)
        .leaf("uTrib", &item.unit)
        .leaf("qTrib", &quantity)
        .leaf("vUnTrib", &unit_price);
    if computed.freight.is_positive() {
        w.leaf("vFrete", &computed.freight.to_decimal_string());
    }
    if item.discount.is_positive() {
        w.leaf("vDesc", &item.discount.to_decimal_string());
    }
    if computed.other_charges.is_positive() {
        w.leaf("vOutro", &computed.other_charges.to_decimal_string());
    }
    w.leaf("indTot", "1").close("prod");

    let regime = doc.emitter.tax_regime.unwrap_or(TaxRegime::Normal);
    let origin = item.tax.origin.to_string();
    let taxes = &computed.taxes;

    w.open("imposto", &[]).open("ICMS", &[]);
    // Codes were classified in prepare(); a failure here cannot happen.
    match classify_icms(&item.tax.icms_code, regime).unwrap_or(IcmsTreatment::Exempt) {
        IcmsTreatment::Taxed => {
            w.open("ICMS00", &[])
                .leaf("orig", &origin)
                .leaf("CST", &item.tax.icms_code)
                .leaf("modBC", "3")
                .leaf("vBC", &taxes.icms_base.to_decimal_string())
                .leaf("pICMS", &item.tax.icms_rate.to_percent_string())
                .leaf("vICMS", &taxes.icms.to_decimal_string())
                .close("ICMS00");
        }
        IcmsTreatment::Exempt => {
            w.open("ICMS40", &[])
                .leaf("orig", &origin)
                .leaf("CST", &item.tax.icms_code)
                .close("ICMS40");
        }
        IcmsTreatment::SimplesNoCredit => {
            w.open("ICMSSN102", &[])
                .leaf("orig", &origin)
                .leaf("CSOSN", &item.tax.icms_code)
                .close("ICMSSN102");
        }
    }
    w.close("ICMS");

    write_contribution(
        w,
        "PIS",
        &item.tax.pis_cst,
        taxes.pis_base,
        &item.tax.pis_rate.to_percent_string(),
        taxes.pis,
    );
    write_contribution(
        w,
        "COFINS",
        &item.tax.cofins_cst,
        taxes.cofins_base,
        &item.tax.cofins_rate.to_percent_string(),
        taxes.cofins,
    );
    w.close("imposto").close("det");
}

fn write_contribution(
    w: &mut XmlWriter,
    tax: &str,
    cst: &str,
    base: Money,
    rate: &str,
    value: Money,
) {
    let treatment = classify_contribution(tax, cst).unwrap_or(ContributionTreatment::NotTaxed);
    let group = match treatment {
        ContributionTreatment::Rate => format!("{}Aliq", tax),
        ContributionTreatment::NotTaxed => format!("{}NT", tax),
        ContributionTreatment::Other => format!("{}Outr", tax),
    };

    w.open(tax, &[]).open(&group, &[]).leaf("CST", cst);
    if treatment != ContributionTreatment::NotTaxed {
        w.leaf("vBC", &base.to_decimal_string())
            .leaf(&format!("p{}", tax), rate)
            .leaf(&format!("v{}", tax), &value.to_decimal_string());
    }
    w.close(&group).close(tax);
}

fn write_totals(w: &mut XmlWriter, totals: &Totals) {
    let zero = Money::zero().to_decimal_string();
    w.open("total", &[])
        .open("ICMSTot", &[])
        .leaf("vBC", &totals.icms_base.to_decimal_string())
        .leaf("vICMS", &totals.icms.to_decimal_string())
        .leaf("vICMSDeson", &zero)
        .leaf("vFCP", &zero)
        .leaf("vBCST", &zero)
        .leaf("vST", &zero)
        .leaf("vFCPST", &zero)
        .leaf("vFCPSTRet", &zero)
        .leaf("vProd", &totals.products.to_decimal_string())
        .leaf("vFrete", &totals.freight.to_decimal_string())
        .leaf("vSeg", &zero)
        .leaf("vDesc", &totals.discounts.to_decimal_string())
        .leaf("vII", &zero)
        .leaf("vIPI", &zero)
        .leaf("vIPIDevol", &zero)
        .leaf("vPIS", &totals.pis.to_decimal_string())
        .leaf("vCOFINS", &totals.cofins.to_decimal_string())
        .leaf("vOutro", &totals.other_charges.to_decimal_string())
        .leaf("vNF", &totals.document_total.to_decimal_string())
        .close("ICMSTot")
        .close("total");
}
