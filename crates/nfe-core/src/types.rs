//! # Domain Types
//!
//! Core domain types used throughout the issuer.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │     Tenant      │   │ FiscalDocument  │   │   FiscalEvent   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id             │   │  access_key     │   │  kind           │       │
//! │  │  tax_id (CNPJ)  │   │  header         │   │  sequence       │       │
//! │  │  state_code     │   │  emitter/recip. │   │  text           │       │
//! │  │  default env    │   │  items, totals  │   │  protocol       │       │
//! │  └─────────────────┘   │  status         │   └─────────────────┘       │
//! │                        └─────────────────┘                              │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  DocumentStatus │   │   Environment   │   │ ProtocolRecord  │       │
//! │  │  Draft → ...    │   │  Production (1) │   │  nProt, cStat   │       │
//! │  │  → Authorized   │   │  Homologation(2)│   │  xMotivo, date  │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Snapshot Pattern
//! Emitter and recipient are copied into the document when it is assembled.
//! Later edits to the tenant or customer never change an issued document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::access_key::AccessKey;
use crate::error::ValidationError;
use crate::money::Money;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (bps).
///
/// ## Why Basis Points?
/// 1 basis point = 0.01%. ICMS 18% is 1800 bps, PIS 1.65% is 165 bps.
/// The XML layout prints rates with four decimals (`18.0000`), which
/// basis points represent exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    /// 100%, the highest rate an item may declare.
    pub const MAX: TaxRate = TaxRate(10_000);

    /// Creates a tax rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Zero tax rate.
    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }

    /// Checks if tax rate is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Formats the rate as a percentage with four decimals (`18.0000`).
    pub fn to_percent_string(&self) -> String {
        format!("{}.{:02}00", self.0 / 100, self.0 % 100)
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::zero()
    }
}

// =============================================================================
// Quantity
// =============================================================================

/// Item quantity in thousandths of the commercial unit.
///
/// Weighed goods (`1.250 KG`) and counted goods (`3 UN`) share one type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Quantity(i64);

impl Quantity {
    /// 11 integer digits, the `qCom` limit of the layout.
    pub const MAX: Quantity = Quantity(99_999_999_999_999);

    /// Whole units.
    #[inline]
    pub const fn from_units(units: i64) -> Self {
        Quantity(units * 1000)
    }

    /// Thousandths of a unit.
    #[inline]
    pub const fn from_thousandths(thousandths: i64) -> Self {
        Quantity(thousandths)
    }

    #[inline]
    pub const fn thousandths(&self) -> i64 {
        self.0
    }

    /// Formats with four decimals (`qCom`/`qTrib`).
    pub fn to_decimal_string(&self) -> String {
        format!("{}.{:03}0", self.0 / 1000, (self.0 % 1000).abs())
    }
}

// =============================================================================
// Environment
// =============================================================================

/// Authority environment (`tpAmb`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Legally valid documents.
    Production,
    /// Test environment; documents have no fiscal value.
    Homologation,
}

impl Environment {
    /// Numeric `tpAmb` flag.
    pub const fn code(&self) -> u8 {
        match self {
            Environment::Production => 1,
            Environment::Homologation => 2,
        }
    }

    /// Parses a `tpAmb` flag.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Environment::Production),
            2 => Some(Environment::Homologation),
            _ => None,
        }
    }

    /// Directory name used by the artifact layout.
    pub const fn folder_name(&self) -> &'static str {
        match self {
            Environment::Production => "producao",
            Environment::Homologation => "homologacao",
        }
    }

    /// Every environment, in artifact lookup order.
    pub const ALL: [Environment; 2] = [Environment::Production, Environment::Homologation];
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Production => write!(f, "production"),
            Environment::Homologation => write!(f, "homologation"),
        }
    }
}

impl FromStr for Environment {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" | "producao" | "1" => Ok(Environment::Production),
            "homologation" | "homologacao" | "2" => Ok(Environment::Homologation),
            other => Err(ValidationError::NotAllowed {
                field: format!("environment '{}'", other),
                allowed: vec!["production".into(), "homologation".into()],
            }),
        }
    }
}

// =============================================================================
// Document Model
// =============================================================================

/// Fiscal document model (`mod`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DocumentModel {
    /// Model 55, ordinary invoice (NF-e).
    Nfe,
    /// Model 65, consumer invoice (NFC-e).
    Nfce,
}

impl DocumentModel {
    /// Two-digit model code.
    pub const fn code(&self) -> u8 {
        match self {
            DocumentModel::Nfe => 55,
            DocumentModel::Nfce => 65,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            55 => Some(DocumentModel::Nfe),
            65 => Some(DocumentModel::Nfce),
            _ => None,
        }
    }

    /// Prefix used in artifact file names and log lines.
    pub const fn label(&self) -> &'static str {
        match self {
            DocumentModel::Nfe => "nfe",
            DocumentModel::Nfce => "nfce",
        }
    }
}

impl fmt::Display for DocumentModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// =============================================================================
// Document Status
// =============================================================================

/// Lifecycle status of a fiscal document.
///
/// See [`crate::lifecycle`] for the allowed transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Assembled,
    Signed,
    Submitted,
    Processing,
    Authorized,
    Rejected,
    Cancelled,
    Corrected,
}

impl DocumentStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Assembled => "assembled",
            DocumentStatus::Signed => "signed",
            DocumentStatus::Submitted => "submitted",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Authorized => "authorized",
            DocumentStatus::Rejected => "rejected",
            DocumentStatus::Cancelled => "cancelled",
            DocumentStatus::Corrected => "corrected",
        }
    }

    /// True while the document carries a valid authorization.
    pub const fn is_authorized(&self) -> bool {
        matches!(self, DocumentStatus::Authorized | DocumentStatus::Corrected)
    }
}

impl Default for DocumentStatus {
    fn default() -> Self {
        DocumentStatus::Draft
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "draft" => DocumentStatus::Draft,
            "assembled" => DocumentStatus::Assembled,
            "signed" => DocumentStatus::Signed,
            "submitted" => DocumentStatus::Submitted,
            "processing" => DocumentStatus::Processing,
            "authorized" => DocumentStatus::Authorized,
            "rejected" => DocumentStatus::Rejected,
            "cancelled" => DocumentStatus::Cancelled,
            "corrected" => DocumentStatus::Corrected,
            other => {
                return Err(ValidationError::invalid_format(
                    "status",
                    format!("unknown status '{}'", other),
                ))
            }
        };
        Ok(status)
    }
}

// =============================================================================
// Event Kind
// =============================================================================

/// Post-authorization event type (`tpEvento`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// 110111, voids the document.
    Cancellation,
    /// 110110, correction letter (CC-e).
    Correction,
}

impl EventKind {
    /// Six-digit event type code.
    pub const fn type_code(&self) -> &'static str {
        match self {
            EventKind::Cancellation => "110111",
            EventKind::Correction => "110110",
        }
    }

    /// Mandatory `descEvento` text.
    pub const fn description(&self) -> &'static str {
        match self {
            EventKind::Cancellation => "Cancelamento",
            EventKind::Correction => "Carta de Correcao",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Cancellation => write!(f, "cancellation"),
            EventKind::Correction => write!(f, "correction"),
        }
    }
}

// =============================================================================
// Tenant
// =============================================================================

/// A business issuing documents through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    /// CNPJ, digits only.
    pub tax_id: String,
    pub legal_name: String,
    /// IBGE state code (`cUF`), e.g. 35 for SP.
    pub state_code: u8,
    pub default_environment: Environment,
    /// Consumer security code (CSC) id, required for NFC-e.
    #[serde(default)]
    pub csc_id: Option<String>,
    /// CSC token used in the NFC-e QR code hash.
    #[serde(default, skip_serializing)]
    pub csc_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Parties
// =============================================================================

/// Tax regime of the emitter (`CRT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TaxRegime {
    SimplesNacional,
    SimplesNacionalExcess,
    Normal,
}

impl TaxRegime {
    pub const fn crt(&self) -> u8 {
        match self {
            TaxRegime::SimplesNacional => 1,
            TaxRegime::SimplesNacionalExcess => 2,
            TaxRegime::Normal => 3,
        }
    }

    /// Simples Nacional emitters describe ICMS with CSOSN codes.
    pub const fn uses_csosn(&self) -> bool {
        matches!(self, TaxRegime::SimplesNacional | TaxRegime::SimplesNacionalExcess)
    }
}

/// Postal address as the layout needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub number: String,
    #[serde(default)]
    pub complement: Option<String>,
    pub district: String,
    /// Seven-digit IBGE municipality code.
    pub municipality_code: String,
    pub municipality: String,
    /// Two-letter state abbreviation (UF).
    pub state: String,
    /// Eight-digit CEP.
    pub postal_code: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Emitter or recipient snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    /// CNPJ (14) or CPF (11) digits. Punctuation is accepted and stripped.
    pub tax_id: String,
    pub legal_name: String,
    #[serde(default)]
    pub trade_name: Option<String>,
    /// Inscrição estadual; `None` for non-contributors.
    #[serde(default)]
    pub state_registration: Option<String>,
    #[serde(default)]
    pub address: Option<Address>,
    /// Required for emitters.
    #[serde(default)]
    pub tax_regime: Option<TaxRegime>,
    #[serde(default)]
    pub email: Option<String>,
}

// =============================================================================
// Line Items
// =============================================================================

/// Tax codes resolved for one line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxClassification {
    /// Goods origin (0 national .. 8).
    pub origin: u8,
    /// ICMS situation: CST (`00`, `40`, ...) or CSOSN (`102`, ...).
    pub icms_code: String,
    #[serde(default)]
    pub icms_rate: TaxRate,
    pub pis_cst: String,
    #[serde(default)]
    pub pis_rate: TaxRate,
    pub cofins_cst: String,
    #[serde(default)]
    pub cofins_rate: TaxRate,
}

/// An order line as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_code: String,
    pub description: String,
    /// GTIN/EAN; `SEM GTIN` is written when absent.
    #[serde(default)]
    pub gtin: Option<String>,
    /// Eight-digit NCM.
    pub ncm: String,
    /// Four-digit CFOP.
    pub cfop: String,
    /// Commercial unit (`UN`, `KG`, ...).
    pub unit: String,
    pub quantity: Quantity,
    pub unit_price: Money,
    #[serde(default)]
    pub discount: Money,
    pub tax: TaxClassification,
}

/// Per-item tax amounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemTaxes {
    pub icms_base: Money,
    pub icms: Money,
    pub pis_base: Money,
    pub pis: Money,
    pub cofins_base: Money,
    pub cofins: Money,
}

/// A line item after tax resolution. Frozen once the document is signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedLineItem {
    /// 1-based `nItem`.
    pub number: u32,
    pub item: LineItem,
    /// unit price × quantity (`vProd`).
    pub gross: Money,
    /// gross − discount.
    pub net: Money,
    /// Share of the document freight (`vFrete`).
    #[serde(default)]
    pub freight: Money,
    /// Share of the document other charges (`vOutro`).
    #[serde(default)]
    pub other_charges: Money,
    pub taxes: ItemTaxes,
}

// =============================================================================
// Payments
// =============================================================================

/// Payment method (`tPag`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Cheque,
    CreditCard,
    DebitCard,
    StoreCredit,
    MealVoucher,
    FoodVoucher,
    Pix,
    Other,
}

impl PaymentMethod {
    pub const fn code(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "01",
            PaymentMethod::Cheque => "02",
            PaymentMethod::CreditCard => "03",
            PaymentMethod::DebitCard => "04",
            PaymentMethod::StoreCredit => "05",
            PaymentMethod::MealVoucher => "10",
            PaymentMethod::FoodVoucher => "11",
            PaymentMethod::Pix => "17",
            PaymentMethod::Other => "99",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub method: PaymentMethod,
    pub amount: Money,
}

// =============================================================================
// Totals
// =============================================================================

/// Document totals (`ICMSTot` plus payment summary).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    /// Sum of item gross values (`vProd`).
    pub products: Money,
    /// Sum of item discounts (`vDesc`).
    pub discounts: Money,
    /// Freight surcharge (`vFrete`).
    pub freight: Money,
    /// Other charges (`vOutro`).
    pub other_charges: Money,
    pub icms_base: Money,
    pub icms: Money,
    pub pis: Money,
    pub cofins: Money,
    /// `vNF`.
    pub document_total: Money,
    pub paid: Money,
    /// `vTroco`.
    pub change: Money,
}

// =============================================================================
// Fiscal Document
// =============================================================================

/// Document header fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentHeader {
    pub series: u16,
    pub number: u32,
    pub emitted_at: DateTime<Utc>,
    pub environment: Environment,
    pub model: DocumentModel,
    /// `natOp`, e.g. "VENDA".
    pub operation_nature: String,
}

/// An assembled fiscal document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiscalDocument {
    pub id: String,
    pub tenant_id: String,
    pub access_key: AccessKey,
    pub header: DocumentHeader,
    pub emitter: Party,
    pub recipient: Option<Party>,
    pub items: Vec<ComputedLineItem>,
    pub payments: Vec<Payment>,
    pub totals: Totals,
    #[serde(default)]
    pub additional_info: Option<String>,
    pub status: DocumentStatus,
}

// =============================================================================
// Protocol Record
// =============================================================================

/// Authority proof attached to an authorization or an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProtocolRecord {
    /// `nProt`, 15 digits once authorized.
    pub protocol_number: Option<String>,
    /// `nRec`, the batch receipt.
    pub receipt_number: Option<String>,
    pub status_code: u16,
    pub reason: String,
    #[ts(as = "Option<String>")]
    pub authorized_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Fiscal Event
// =============================================================================

/// A registered cancellation or correction letter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiscalEvent {
    pub id: String,
    pub document_id: String,
    pub access_key: AccessKey,
    pub kind: EventKind,
    pub sequence: u32,
    /// Justification (cancellation) or correction text.
    pub text: String,
    pub protocol: ProtocolRecord,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Outcome DTOs
// =============================================================================

/// Where the persisted artifacts of a document live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ArtifactRefs {
    pub xml: String,
    pub pdf: Option<String>,
}

/// What the order-assembly caller gets back from an issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct IssueOutcome {
    pub access_key: String,
    pub status: DocumentStatus,
    pub protocol_number: Option<String>,
    pub artifacts: Option<ArtifactRefs>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tax_rate_percent_string() {
        assert_eq!(TaxRate::from_bps(1800).to_percent_string(), "18.0000");
        assert_eq!(TaxRate::from_bps(165).to_percent_string(), "1.6500");
        assert_eq!(TaxRate::from_bps(760).to_percent_string(), "7.6000");
        assert_eq!(TaxRate::zero().to_percent_string(), "0.0000");
    }

    #[test]
    fn test_quantity_decimal_string() {
        assert_eq!(Quantity::from_units(3).to_decimal_string(), "3.0000");
        assert_eq!(Quantity::from_thousandths(1250).to_decimal_string(), "1.2500");
    }

    #[test]
    fn test_environment_codes() {
        assert_eq!(Environment::Production.code(), 1);
        assert_eq!(Environment::from_code(2), Some(Environment::Homologation));
        assert_eq!(Environment::from_code(3), None);
        assert_eq!("homologacao".parse::<Environment>().unwrap(), Environment::Homologation);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_model_codes() {
        assert_eq!(DocumentModel::Nfce.code(), 65);
        assert_eq!(DocumentModel::from_code(55), Some(DocumentModel::Nfe));
        assert_eq!(DocumentModel::from_code(57), None);
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            DocumentStatus::Draft,
            DocumentStatus::Processing,
            DocumentStatus::Corrected,
        ] {
            assert_eq!(status.as_str().parse::<DocumentStatus>().unwrap(), status);
        }
        assert_eq!(DocumentStatus::default(), DocumentStatus::Draft);
    }

    #[test]
    fn test_event_kind_codes() {
        assert_eq!(EventKind::Cancellation.type_code(), "110111");
        assert_eq!(EventKind::Correction.description(), "Carta de Correcao");
    }
}
