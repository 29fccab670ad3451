//! # Access Key
//!
//! The 44-digit key that identifies a fiscal document nationwide.
//!
//! ## Layout
//! ```text
//! ┌────┬──────┬────────────────┬────┬─────┬───────────┬───┬──────────┬───┐
//! │cUF │ AAMM │      CNPJ      │mod │serie│    nNF    │tp │   cNF    │cDV│
//! │ 2  │  4   │       14       │ 2  │  3  │     9     │ 1 │    8     │ 1 │
//! └────┴──────┴────────────────┴────┴─────┴───────────┴───┴──────────┴───┘
//!  0    2      6                20   22    25          34  35         43
//! ```
//!
//! The final digit is a modulo-11 check digit (weights 2..9 from the right)
//! over the first 43. The key is globally unique and never reused, even
//! after a rejection.

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::types::DocumentModel;
use crate::validation::{
    mod11_check_digit, validate_document_number, validate_series, validate_state_code,
    ValidationResult,
};

/// Number of digits in an access key.
pub const ACCESS_KEY_LEN: usize = 44;

/// Normal emission (`tpEmis = 1`).
pub const EMISSION_TYPE_NORMAL: u8 = 1;

/// Fields that make up a key, before the check digit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessKeyParts {
    pub state_code: u8,
    /// Two-digit year (`AA`).
    pub year: u8,
    pub month: u8,
    /// Emitter CNPJ, 14 digits.
    pub emitter_tax_id: String,
    pub model: DocumentModel,
    pub series: u16,
    pub number: u32,
    pub emission_type: u8,
    /// Opaque 8-digit code (`cNF`). Must differ from the number.
    pub numeric_code: u32,
}

/// A validated 44-digit access key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(try_from = "String", into = "String")]
#[ts(export)]
pub struct AccessKey(String);

impl AccessKey {
    /// Builds a key from its parts and appends the check digit.
    ///
    /// ## Example
    /// ```rust
    /// use nfe_core::access_key::{AccessKey, AccessKeyParts};
    /// use nfe_core::types::DocumentModel;
    ///
    /// let key = AccessKey::build(&AccessKeyParts {
    ///     state_code: 35,
    ///     year: 24,
    ///     month: 3,
    ///     emitter_tax_id: "11222333000181".into(),
    ///     model: DocumentModel::Nfce,
    ///     series: 1,
    ///     number: 42,
    ///     emission_type: 1,
    ///     numeric_code: 12345678,
    /// }).unwrap();
    /// assert_eq!(key.as_str().len(), 44);
    /// assert_eq!(key.number(), 42);
    /// ```
    pub fn build(parts: &AccessKeyParts) -> ValidationResult<Self> {
        validate_state_code(parts.state_code)?;
        validate_series(parts.series)?;
        validate_document_number(parts.number)?;

        if !(1..=12).contains(&parts.month) || parts.year > 99 {
            return Err(ValidationError::invalid_format(
                "access_key",
                format!("invalid emission period {:02}/{:02}", parts.month, parts.year),
            ));
        }
        if parts.emitter_tax_id.len() != 14
            || !parts.emitter_tax_id.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(ValidationError::invalid_format(
                "emitter.tax_id",
                "CNPJ must have 14 digits",
            ));
        }
        if parts.numeric_code > 99_999_999 {
            return Err(ValidationError::OutOfRange {
                field: "numeric_code".to_string(),
                min: 0,
                max: 99_999_999,
            });
        }
        if parts.numeric_code == parts.number {
            return Err(ValidationError::invalid_format(
                "numeric_code",
                "must differ from the document number",
            ));
        }

        let body = format!(
            "{:02}{:02}{:02}{}{:02}{:03}{:09}{}{:08}",
            parts.state_code,
            parts.year,
            parts.month,
            parts.emitter_tax_id,
            parts.model.code(),
            parts.series,
            parts.number,
            parts.emission_type,
            parts.numeric_code,
        );
        let dv = check_digit(&body)?;
        Ok(AccessKey(format!("{}{}", body, dv)))
    }

    /// Parses and verifies an existing key.
    pub fn parse(value: &str) -> ValidationResult<Self> {
        validate_key_shape(value)?;
        let expected = check_digit(&value[..43])?;
        let actual = value.as_bytes()[43] - b'0';
        if expected != actual {
            return Err(ValidationError::InvalidCheckDigit {
                field: "access_key".to_string(),
                value: value.to_string(),
            });
        }
        if DocumentModel::from_code(parse_field(value, 20, 22) as u8).is_none() {
            return Err(ValidationError::invalid_format(
                "access_key",
                "model must be 55 or 65",
            ));
        }
        Ok(AccessKey(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `Id` attribute of `infNFe`.
    pub fn id_attribute(&self) -> String {
        format!("NFe{}", self.0)
    }

    pub fn state_code(&self) -> u8 {
        parse_field(&self.0, 0, 2) as u8
    }

    /// Four-digit emission year.
    pub fn year(&self) -> u16 {
        2000 + parse_field(&self.0, 2, 4) as u16
    }

    pub fn month(&self) -> u8 {
        parse_field(&self.0, 4, 6) as u8
    }

    pub fn emitter_tax_id(&self) -> &str {
        &self.0[6..20]
    }

    pub fn model(&self) -> DocumentModel {
        // validated on construction
        DocumentModel::from_code(parse_field(&self.0, 20, 22) as u8).unwrap_or(DocumentModel::Nfe)
    }

    pub fn series(&self) -> u16 {
        parse_field(&self.0, 22, 25) as u16
    }

    pub fn number(&self) -> u32 {
        parse_field(&self.0, 25, 34) as u32
    }

    pub fn emission_type(&self) -> u8 {
        parse_field(&self.0, 34, 35) as u8
    }

    pub fn numeric_code(&self) -> u32 {
        parse_field(&self.0, 35, 43) as u32
    }

    pub fn check_digit(&self) -> u8 {
        self.0.as_bytes()[43] - b'0'
    }

    /// Key grouped in blocks of four, as printed on the DANFE.
    pub fn formatted(&self) -> String {
        self.0
            .as_bytes()
            .chunks(4)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Computes the check digit over the first 43 digits of a key.
pub fn check_digit(first_43: &str) -> ValidationResult<u8> {
    if first_43.len() != 43 || !first_43.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::invalid_format(
            "access_key",
            "check digit needs exactly 43 digits",
        ));
    }
    let digits: Vec<u8> = first_43.bytes().map(|b| b - b'0').collect();
    Ok(mod11_check_digit(&digits, 9))
}

/// Checks only the shape: exactly 44 ASCII digits.
///
/// Used at the HTTP edge to reject keys before storage is touched.
pub fn validate_key_shape(value: &str) -> ValidationResult<()> {
    if value.len() != ACCESS_KEY_LEN || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::invalid_format(
            "access_key",
            "must be exactly 44 digits",
        ));
    }
    Ok(())
}

fn parse_field(key: &str, start: usize, end: usize) -> u64 {
    key[start..end]
        .bytes()
        .fold(0u64, |acc, b| acc * 10 + u64::from(b - b'0'))
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AccessKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AccessKey::parse(&value)
    }
}

impl From<AccessKey> for String {
    fn from(key: AccessKey) -> Self {
        key.0
    }
}

impl AsRef<str> for AccessKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_parts() -> AccessKeyParts {
        AccessKeyParts {
            state_code: 35,
            year: 24,
            month: 3,
            emitter_tax_id: "11222333000181".to_string(),
            model: DocumentModel::Nfe,
            series: 1,
            number: 1234,
            emission_type: EMISSION_TYPE_NORMAL,
            numeric_code: 87654321,
        }
    }

    #[test]
    fn test_build_layout() {
        let key = AccessKey::build(&sample_parts()).unwrap();
        assert_eq!(&key.as_str()[..43], "3524031122233300018155001000001234187654321");
        assert_eq!(key.state_code(), 35);
        assert_eq!(key.year(), 2024);
        assert_eq!(key.month(), 3);
        assert_eq!(key.emitter_tax_id(), "11222333000181");
        assert_eq!(key.model(), DocumentModel::Nfe);
        assert_eq!(key.series(), 1);
        assert_eq!(key.number(), 1234);
        assert_eq!(key.emission_type(), 1);
        assert_eq!(key.numeric_code(), 87654321);
        assert!(key.id_attribute().starts_with("NFe35"));
    }

    #[test]
    fn test_parse_round_trip_and_bad_digit() {
        let key = AccessKey::build(&sample_parts()).unwrap();
        assert_eq!(AccessKey::parse(key.as_str()).unwrap(), key);

        let mut tampered = key.as_str()[..43].to_string();
        tampered.push(char::from(b'0' + (key.check_digit() + 1) % 10));
        assert!(matches!(
            AccessKey::parse(&tampered),
            Err(ValidationError::InvalidCheckDigit { .. })
        ));
    }

    #[test]
    fn test_shape_rejected() {
        assert!(validate_key_shape("123").is_err());
        assert!(validate_key_shape(&"a".repeat(44)).is_err());
        assert!(validate_key_shape(&"1".repeat(44)).is_ok());
        assert!(AccessKey::parse(&"1".repeat(45)).is_err());
    }

    #[test]
    fn test_numeric_code_must_differ_from_number() {
        let mut parts = sample_parts();
        parts.numeric_code = parts.number;
        assert!(AccessKey::build(&parts).is_err());
    }

    #[test]
    fn test_formatted_groups_of_four() {
        let key = AccessKey::build(&sample_parts()).unwrap();
        let formatted = key.formatted();
        assert_eq!(formatted.split(' ').count(), 11);
        assert_eq!(formatted.replace(' ', ""), key.as_str());
    }

    #[test]
    fn test_serde_validates() {
        let key = AccessKey::build(&sample_parts()).unwrap();
        let json = serde_json::to_string(&key).unwrap();
        let back: AccessKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
        assert!(serde_json::from_str::<AccessKey>("\"123\"").is_err());
    }

    proptest! {
        #[test]
        fn prop_built_key_is_44_digits_and_stable(
            number in 1u32..=999_999_999,
            series in 0u16..=999,
            code in 0u32..=99_999_999,
            month in 1u8..=12,
        ) {
            prop_assume!(code != number);
            let parts = AccessKeyParts { number, series, numeric_code: code, month, ..sample_parts() };
            let key = AccessKey::build(&parts).unwrap();
            prop_assert_eq!(key.as_str().len(), 44);
            prop_assert!(key.as_str().bytes().all(|b| b.is_ascii_digit()));
            let recomputed = check_digit(&key.as_str()[..43]).unwrap();
            prop_assert_eq!(recomputed, key.check_digit());
            prop_assert_eq!(check_digit(&key.as_str()[..43]).unwrap(), recomputed);
        }
    }
}
