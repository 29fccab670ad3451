//! # Tax Computation
//!
//! Per-item tax amounts and document totals, all in integer centavos.
//!
//! ## Calculation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  For each LineItem                                                      │
//! │    gross = unit_price × quantity            (rounded to the centavo)    │
//! │    net   = gross − discount                                            │
//! │    freight/other shares split in proportion to net                     │
//! │    ICMS base   = net + freight + other      (taxed situations only)    │
//! │    PIS/COFINS  = net × rate                 (rate-based CSTs only)     │
//! │                                                                         │
//! │  Totals                                                                 │
//! │    vNF    = Σgross − Σdiscount + freight + other                        │
//! │    paid   = Σpayments  (must cover vNF)                                 │
//! │    vTroco = paid − vNF                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rounding happens once per amount (`Money::calculate_tax`); totals are
//! plain sums of already-rounded values, so they always match the items.
//!
//! Request amounts, products and sums are bounded by `Money::MAX_AMOUNT` and
//! computed with checked arithmetic; anything past the bound is an
//! `OutOfRange` error naming the field.

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::{
    ComputedLineItem, ItemTaxes, LineItem, Payment, Quantity, TaxRate, TaxRegime, Totals,
};
use crate::validation::{validate_digits, validate_required, ValidationResult};

/// Largest number of items a single document may carry.
pub const MAX_ITEMS: usize = 990;

// =============================================================================
// Situation Codes
// =============================================================================

/// How ICMS is rendered and computed for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmsTreatment {
    /// CST 00: fully taxed (`ICMS00`).
    Taxed,
    /// CST 40, 41, 50: exempt, not taxed or suspended (`ICMS40`).
    Exempt,
    /// CSOSN 102, 103, 300, 400: Simples Nacional without credit (`ICMSSN102`).
    SimplesNoCredit,
}

/// How PIS or COFINS is rendered and computed for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContributionTreatment {
    /// CST 01, 02 (`PISAliq`/`COFINSAliq`).
    Rate,
    /// CST 04..09 (`PISNT`/`COFINSNT`).
    NotTaxed,
    /// CST 49, 99 (`PISOutr`/`COFINSOutr`).
    Other,
}

/// Resolves an ICMS code against the emitter regime.
///
/// Normal-regime emitters must use a CST, Simples Nacional emitters a CSOSN.
pub fn classify_icms(code: &str, regime: TaxRegime) -> ValidationResult<IcmsTreatment> {
    let treatment = match (regime.uses_csosn(), code) {
        (false, "00") => IcmsTreatment::Taxed,
        (false, "40" | "41" | "50") => IcmsTreatment::Exempt,
        (true, "102" | "103" | "300" | "400") => IcmsTreatment::SimplesNoCredit,
        _ => {
            let allowed = if regime.uses_csosn() {
                ["102", "103", "300", "400"]
            } else {
                ["00", "40", "41", "50"]
            };
            return Err(ValidationError::NotAllowed {
                field: format!("icms_code '{}'", code),
                allowed: allowed.iter().map(|s| s.to_string()).collect(),
            });
        }
    };
    Ok(treatment)
}

/// Resolves a PIS/COFINS CST.
pub fn classify_contribution(field: &str, cst: &str) -> ValidationResult<ContributionTreatment> {
    match cst {
        "01" | "02" => Ok(ContributionTreatment::Rate),
        "04" | "05" | "06" | "07" | "08" | "09" => Ok(ContributionTreatment::NotTaxed),
        "49" | "99" => Ok(ContributionTreatment::Other),
        other => Err(ValidationError::invalid_format(
            field,
            format!("unsupported CST '{}'", other),
        )),
    }
}

// =============================================================================
// Items
// =============================================================================

fn validate_item(index: usize, item: &LineItem) -> ValidationResult<()> {
    let field = |name: &str| format!("items[{}].{}", index, name);

    validate_required(&field("product_code"), &item.product_code, 60)?;
    validate_required(&field("description"), &item.description, 120)?;
    validate_required(&field("unit"), &item.unit, 6)?;
    validate_digits(&field("ncm"), &item.ncm, 8)?;
    validate_digits(&field("cfop"), &item.cfop, 4)?;

    if item.quantity.thousandths() <= 0 {
        return Err(ValidationError::MustBePositive {
            field: field("quantity"),
        });
    }
    if item.quantity > Quantity::MAX {
        return Err(ValidationError::OutOfRange {
            field: field("quantity"),
            min: 1,
            max: Quantity::MAX.thousandths(),
        });
    }
    check_amount(&field("unit_price"), item.unit_price)?;
    check_amount(&field("discount"), item.discount)?;
    for (name, rate) in [
        ("tax.icms_rate", item.tax.icms_rate),
        ("tax.pis_rate", item.tax.pis_rate),
        ("tax.cofins_rate", item.tax.cofins_rate),
    ] {
        if rate.bps() > TaxRate::MAX.bps() {
            return Err(ValidationError::OutOfRange {
                field: field(name),
                min: 0,
                max: TaxRate::MAX.bps() as i64,
            });
        }
    }
    if item.tax.origin > 8 {
        return Err(ValidationError::OutOfRange {
            field: field("tax.origin"),
            min: 0,
            max: 8,
        });
    }
    if let Some(gtin) = &item.gtin {
        if ![8, 12, 13, 14].contains(&gtin.len()) || !gtin.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValidationError::invalid_format(
                field("gtin"),
                "must be 8, 12, 13 or 14 digits",
            ));
        }
    }
    Ok(())
}

/// Amounts are non-negative and bounded by the layout's 13 integer digits.
fn check_amount(field: &str, amount: Money) -> ValidationResult<Money> {
    if amount.is_within_layout() {
        Ok(amount)
    } else {
        Err(out_of_range(field))
    }
}

fn out_of_range(field: &str) -> ValidationError {
    ValidationError::OutOfRange {
        field: field.to_string(),
        min: 0,
        max: Money::MAX_AMOUNT.cents(),
    }
}

/// Splits `amount` across `weights` proportionally. The last share takes the
/// rounding remainder so shares always sum to `amount`.
fn apportion(amount: Money, weights: &[Money]) -> Vec<Money> {
    let total: i128 = weights.iter().map(|w| w.cents() as i128).sum();
    if amount.is_zero() || weights.is_empty() {
        return vec![Money::zero(); weights.len()];
    }
    let mut shares = Vec::with_capacity(weights.len());
    let mut assigned = Money::zero();
    for (i, weight) in weights.iter().enumerate() {
        let share = if i + 1 == weights.len() {
            amount - assigned
        } else if total == 0 {
            Money::zero()
        } else {
            Money::from_cents((amount.cents() as i128 * weight.cents() as i128 / total) as i64)
        };
        assigned += share;
        shares.push(share);
    }
    shares
}

/// Computes every item of a document.
///
/// `freight` and `other_charges` are document-level surcharges apportioned
/// across the items by net value.
///
/// ## Example
/// ```rust
/// use nfe_core::money::Money;
/// use nfe_core::tax::compute_items;
/// use nfe_core::types::*;
///
/// let item = LineItem {
///     product_code: "001".into(),
///     description: "Agua mineral 500ml".into(),
///     gtin: None,
///     ncm: "22011000".into(),
///     cfop: "5102".into(),
///     unit: "UN".into(),
///     quantity: Quantity::from_units(2),
///     unit_price: Money::from_cents(350),
///     discount: Money::zero(),
///     tax: TaxClassification {
///         origin: 0,
///         icms_code: "00".into(),
///         icms_rate: TaxRate::from_bps(1800),
///         pis_cst: "01".into(),
///         pis_rate: TaxRate::from_bps(165),
///         cofins_cst: "01".into(),
///         cofins_rate: TaxRate::from_bps(760),
///     },
/// };
/// let items = compute_items(&[item], TaxRegime::Normal, Money::zero(), Money::zero()).unwrap();
/// assert_eq!(items[0].gross.cents(), 700);
/// assert_eq!(items[0].taxes.icms.cents(), 126);
/// ```
pub fn compute_items(
    items: &[LineItem],
    regime: TaxRegime,
    freight: Money,
    other_charges: Money,
) -> ValidationResult<Vec<ComputedLineItem>> {
    if items.is_empty() {
        return Err(ValidationError::required("items"));
    }
    if items.len() > MAX_ITEMS {
        return Err(ValidationError::OutOfRange {
            field: "items".to_string(),
            min: 1,
            max: MAX_ITEMS as i64,
        });
    }
    if freight.is_negative() || other_charges.is_negative() {
        return Err(ValidationError::MustBePositive {
            field: "surcharges".to_string(),
        });
    }
    check_amount("freight", freight)?;
    check_amount("other_charges", other_charges)?;

    let mut nets = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        validate_item(index, item)?;
        let gross_field = format!("items[{}].gross", index);
        let gross = item
            .unit_price
            .multiply_quantity(item.quantity)
            .ok_or_else(|| out_of_range(&gross_field))
            .and_then(|gross| check_amount(&gross_field, gross))?;
        if item.discount > gross {
            return Err(ValidationError::invalid_format(
                format!("items[{}].discount", index),
                "discount exceeds the item value",
            ));
        }
        nets.push((gross, gross - item.discount));
    }

    let weights: Vec<Money> = nets.iter().map(|(_, net)| *net).collect();
    let freight_shares = apportion(freight, &weights);
    let other_shares = apportion(other_charges, &weights);

    let mut computed = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let (gross, net) = nets[index];
        let freight = freight_shares[index];
        let other = other_shares[index];
        let taxes = compute_item_taxes(index, item, regime, net, freight + other)?;
        computed.push(ComputedLineItem {
            number: index as u32 + 1,
            item: item.clone(),
            gross,
            net,
            freight,
            other_charges: other,
            taxes,
        });
    }
    Ok(computed)
}

fn compute_item_taxes(
    index: usize,
    item: &LineItem,
    regime: TaxRegime,
    net: Money,
    surcharges: Money,
) -> ValidationResult<ItemTaxes> {
    let mut taxes = ItemTaxes::default();
    let tax = |name: &str, base: Money, rate: TaxRate| {
        base.calculate_tax(rate)
            .ok_or_else(|| out_of_range(&format!("items[{}].{}", index, name)))
    };

    if classify_icms(&item.tax.icms_code, regime)? == IcmsTreatment::Taxed {
        taxes.icms_base = net
            .checked_add(surcharges)
            .ok_or_else(|| out_of_range(&format!("items[{}].icms_base", index)))?;
        taxes.icms = tax("icms", taxes.icms_base, item.tax.icms_rate)?;
    }

    match classify_contribution("pis_cst", &item.tax.pis_cst)? {
        ContributionTreatment::NotTaxed => {}
        _ => {
            taxes.pis_base = net;
            taxes.pis = tax("pis", net, item.tax.pis_rate)?;
        }
    }
    match classify_contribution("cofins_cst", &item.tax.cofins_cst)? {
        ContributionTreatment::NotTaxed => {}
        _ => {
            taxes.cofins_base = net;
            taxes.cofins = tax("cofins", net, item.tax.cofins_rate)?;
        }
    }
    Ok(taxes)
}

// =============================================================================
// Totals
// =============================================================================

fn total_of(name: &str, values: impl IntoIterator<Item = Money>) -> ValidationResult<Money> {
    Money::checked_sum(values)
        .ok_or_else(|| out_of_range(name))
        .and_then(|total| check_amount(name, total))
}

/// Sums computed items and checks the payments cover the document total.
pub fn compute_totals(
    items: &[ComputedLineItem],
    payments: &[Payment],
) -> ValidationResult<Totals> {
    if payments.is_empty() {
        return Err(ValidationError::required("payments"));
    }
    if let Some(index) = payments.iter().position(|p| !p.amount.is_positive()) {
        return Err(ValidationError::MustBePositive {
            field: format!("payments[{}].amount", index),
        });
    }
    for (index, payment) in payments.iter().enumerate() {
        check_amount(&format!("payments[{}].amount", index), payment.amount)?;
    }

    let mut totals = Totals {
        products: total_of("totals.products", items.iter().map(|i| i.gross))?,
        discounts: total_of("totals.discounts", items.iter().map(|i| i.item.discount))?,
        freight: total_of("totals.freight", items.iter().map(|i| i.freight))?,
        other_charges: total_of("totals.other_charges", items.iter().map(|i| i.other_charges))?,
        icms_base: total_of("totals.icms_base", items.iter().map(|i| i.taxes.icms_base))?,
        icms: total_of("totals.icms", items.iter().map(|i| i.taxes.icms))?,
        pis: total_of("totals.pis", items.iter().map(|i| i.taxes.pis))?,
        cofins: total_of("totals.cofins", items.iter().map(|i| i.taxes.cofins))?,
        paid: total_of("payments", payments.iter().map(|p| p.amount))?,
        ..Totals::default()
    };
    totals.document_total = totals
        .products
        .checked_sub(totals.discounts)
        .and_then(|v| v.checked_add(totals.freight))
        .and_then(|v| v.checked_add(totals.other_charges))
        .ok_or_else(|| out_of_range("totals.document_total"))
        .and_then(|total| check_amount("totals.document_total", total))?;

    if totals.paid < totals.document_total {
        return Err(ValidationError::invalid_format(
            "payments",
            format!(
                "paid {} does not cover the document total {}",
                totals.paid, totals.document_total
            ),
        ));
    }
    totals.change = totals.paid - totals.document_total;
    Ok(totals)
}

// =============================================================================
// Unit Tests
// =============================================================================
