//! # Validation Module
//!
//! Input validation for fiscal data: tax id check digits, key fields,
//! event texts.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: HTTP (nfe-api)                                               │
//! │  ├── Type validation (deserialization)                                 │
//! │  └── Access key shape (44 digits) before touching storage              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Assembler / EventProcessor                                   │
//! │  └── THIS MODULE: CNPJ/CPF, series, number, texts, NCM/CFOP            │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── UNIQUE(access_key)                                                │
//! │  └── UNIQUE(tenant, model, series, number)                             │
//! │                                                                         │
//! │  Nothing that fails here ever reaches the authority.                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use nfe_core::validation::{is_valid_cnpj, validate_justification};
//!
//! assert!(is_valid_cnpj("11.222.333/0001-81"));
//! assert!(validate_justification("Erro na digitacao do valor").is_ok());
//! ```

use crate::error::ValidationError;
use crate::{
    MAX_CORRECTION_CHARS, MAX_DOCUMENT_NUMBER, MAX_JUSTIFICATION_CHARS, MAX_SERIES,
    MIN_CORRECTION_CHARS, MIN_JUSTIFICATION_CHARS,
};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Modulo 11
// =============================================================================

/// Computes one modulo-11 check digit.
///
/// Weights start at 2 on the rightmost digit and grow leftward. When
/// `max_weight` is reached they wrap back to 2 (CNPJ and access key use 9;
/// CPF never wraps).
///
/// ```text
/// digits:   1  1  2  2  2  3  3  3  0  0  0  1
/// weights:  5  4  3  2  9  8  7  6  5  4  3  2   ◄── from the right
/// rest = Σ(d × w) % 11
/// dv   = rest < 2 ? 0 : 11 - rest
/// ```
pub fn mod11_check_digit(digits: &[u8], max_weight: u32) -> u8 {
    let mut weight = 2u32;
    let mut sum = 0u32;
    for digit in digits.iter().rev() {
        sum += u32::from(*digit) * weight;
        weight = if weight >= max_weight { 2 } else { weight + 1 };
    }
    let rest = sum % 11;
    if rest < 2 {
        0
    } else {
        (11 - rest) as u8
    }
}

/// Strips everything that is not an ASCII digit.
pub fn digits_only(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn to_digit_vec(value: &str) -> Vec<u8> {
    value.bytes().map(|b| b - b'0').collect()
}

fn all_equal(digits: &[u8]) -> bool {
    digits.windows(2).all(|w| w[0] == w[1])
}

// =============================================================================
// Tax Ids
// =============================================================================

/// Checks a CNPJ. Punctuation is ignored.
pub fn is_valid_cnpj(value: &str) -> bool {
    let clean = digits_only(value);
    if clean.len() != 14 {
        return false;
    }
    let digits = to_digit_vec(&clean);
    if all_equal(&digits) {
        return false;
    }
    let first = mod11_check_digit(&digits[..12], 9);
    let second = mod11_check_digit(&digits[..13], 9);
    digits[12] == first && digits[13] == second
}

/// Checks a CPF. Punctuation is ignored.
pub fn is_valid_cpf(value: &str) -> bool {
    let clean = digits_only(value);
    if clean.len() != 11 {
        return false;
    }
    let digits = to_digit_vec(&clean);
    if all_equal(&digits) {
        return false;
    }
    let first = mod11_check_digit(&digits[..9], u32::MAX);
    let second = mod11_check_digit(&digits[..10], u32::MAX);
    digits[9] == first && digits[10] == second
}

/// Validates a CNPJ and returns its 14 digits.
pub fn validate_cnpj(field: &str, value: &str) -> ValidationResult<String> {
    let clean = digits_only(value);
    if clean.is_empty() {
        return Err(ValidationError::required(field));
    }
    if clean.len() != 14 {
        return Err(ValidationError::invalid_format(field, "CNPJ must have 14 digits"));
    }
    if !is_valid_cnpj(&clean) {
        return Err(ValidationError::InvalidCheckDigit {
            field: field.to_string(),
            value: clean,
        });
    }
    Ok(clean)
}

/// Validates a CNPJ or CPF (decided by length) and returns its digits.
///
/// ## Example
/// ```rust
/// use nfe_core::validation::validate_tax_id;
///
/// assert_eq!(validate_tax_id("recipient.tax_id", "529.982.247-25").unwrap(), "52998224725");
/// assert!(validate_tax_id("recipient.tax_id", "111.111.111-11").is_err());
/// ```
pub fn validate_tax_id(field: &str, value: &str) -> ValidationResult<String> {
    let clean = digits_only(value);
    match clean.len() {
        0 => Err(ValidationError::required(field)),
        11 if is_valid_cpf(&clean) => Ok(clean),
        14 if is_valid_cnpj(&clean) => Ok(clean),
        11 | 14 => Err(ValidationError::InvalidCheckDigit {
            field: field.to_string(),
            value: clean,
        }),
        _ => Err(ValidationError::invalid_format(
            field,
            "must be a CPF (11 digits) or CNPJ (14 digits)",
        )),
    }
}

// =============================================================================
// Event Texts
// =============================================================================

fn validate_text(field: &str, text: &str, min: usize, max: usize) -> ValidationResult<String> {
    let text = text.trim();
    let len = text.chars().count();

    if len == 0 {
        return Err(ValidationError::required(field));
    }
    if len < min {
        return Err(ValidationError::TooShort {
            field: field.to_string(),
            min,
        });
    }
    if len > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }
    Ok(text.to_string())
}

/// Validates a cancellation justification and returns it trimmed.
///
/// ## Rules
/// - At least 15 characters after trimming (14 is rejected)
/// - At most 255 characters
pub fn validate_justification(text: &str) -> ValidationResult<String> {
    validate_text(
        "justification",
        text,
        MIN_JUSTIFICATION_CHARS,
        MAX_JUSTIFICATION_CHARS,
    )
}

/// Validates a correction letter text and returns it trimmed.
pub fn validate_correction_text(text: &str) -> ValidationResult<String> {
    validate_text(
        "correction",
        text,
        MIN_CORRECTION_CHARS,
        MAX_CORRECTION_CHARS,
    )
}

// =============================================================================
// Key Fields
// =============================================================================

/// Validates a document series (0..=999).
pub fn validate_series(series: u16) -> ValidationResult<()> {
    if series > MAX_SERIES {
        return Err(ValidationError::OutOfRange {
            field: "series".to_string(),
            min: 0,
            max: MAX_SERIES as i64,
        });
    }
    Ok(())
}

/// Validates a document number (1..=999_999_999).
pub fn validate_document_number(number: u32) -> ValidationResult<()> {
    if number == 0 || number > MAX_DOCUMENT_NUMBER {
        return Err(ValidationError::OutOfRange {
            field: "number".to_string(),
            min: 1,
            max: MAX_DOCUMENT_NUMBER as i64,
        });
    }
    Ok(())
}

/// A number must move the series forward: above every number already
/// issued or voided in it.
pub fn validate_next_number(number: u32, highest_used: Option<u32>) -> ValidationResult<()> {
    validate_document_number(number)?;
    match highest_used {
        Some(highest) if number <= highest => Err(ValidationError::OutOfRange {
            field: "number".to_string(),
            min: i64::from(highest) + 1,
            max: MAX_DOCUMENT_NUMBER as i64,
        }),
        _ => Ok(()),
    }
}

/// Validates a voiding range: both ends are document numbers and the
/// range is not reversed.
pub fn validate_number_range(first: u32, last: u32) -> ValidationResult<()> {
    validate_document_number(first).map_err(|_| ValidationError::OutOfRange {
        field: "first_number".to_string(),
        min: 1,
        max: MAX_DOCUMENT_NUMBER as i64,
    })?;
    if last < first || last > MAX_DOCUMENT_NUMBER {
        return Err(ValidationError::OutOfRange {
            field: "last_number".to_string(),
            min: i64::from(first),
            max: MAX_DOCUMENT_NUMBER as i64,
        });
    }
    Ok(())
}

/// IBGE state codes and their abbreviations.
pub const STATES: &[(u8, &str)] = &[
    (11, "RO"),
    (12, "AC"),
    (13, "AM"),
    (14, "RR"),
    (15, "PA"),
    (16, "AP"),
    (17, "TO"),
    (21, "MA"),
    (22, "PI"),
    (23, "CE"),
    (24, "RN"),
    (25, "PB"),
    (26, "PE"),
    (27, "AL"),
    (28, "SE"),
    (29, "BA"),
    (31, "MG"),
    (32, "ES"),
    (33, "RJ"),
    (35, "SP"),
    (41, "PR"),
    (42, "SC"),
    (43, "RS"),
    (50, "MS"),
    (51, "MT"),
    (52, "GO"),
    (53, "DF"),
];

/// Returns the UF abbreviation for an IBGE state code.
pub fn state_abbreviation(code: u8) -> Option<&'static str> {
    STATES.iter().find(|(c, _)| *c == code).map(|(_, uf)| *uf)
}

/// Returns the IBGE state code for a UF abbreviation.
pub fn state_code_for(abbreviation: &str) -> Option<u8> {
    STATES
        .iter()
        .find(|(_, uf)| uf.eq_ignore_ascii_case(abbreviation))
        .map(|(code, _)| *code)
}

/// Validates an IBGE state code (`cUF`).
pub fn validate_state_code(code: u8) -> ValidationResult<()> {
    if state_abbreviation(code).is_none() {
        return Err(ValidationError::invalid_format(
            "state_code",
            format!("{} is not an IBGE state code", code),
        ));
    }
    Ok(())
}

/// Validates that `value` is exactly `len` ASCII digits.
pub fn validate_digits(field: &str, value: &str, len: usize) -> ValidationResult<()> {
    if value.is_empty() {
        return Err(ValidationError::required(field));
    }
    if value.len() != len || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::invalid_format(
            field,
            format!("must be exactly {} digits", len),
        ));
    }
    Ok(())
}

/// Validates a non-empty text field, returning it trimmed.
pub fn validate_required(field: &str, value: &str, max: usize) -> ValidationResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::required(field));
    }
    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }
    Ok(value.to_string())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_cnpjs() {
        assert!(is_valid_cnpj("11.222.333/0001-81"));
        assert!(is_valid_cnpj("11222333000181"));
        assert!(!is_valid_cnpj("11222333000182"));
        assert!(!is_valid_cnpj("00000000000000"));
        assert!(!is_valid_cnpj("1122233300018"));
    }

    #[test]
    fn test_known_cpfs() {
        assert!(is_valid_cpf("529.982.247-25"));
        assert!(!is_valid_cpf("529.982.247-24"));
        assert!(!is_valid_cpf("11111111111"));
    }

    #[test]
    fn test_validate_cnpj_errors() {
        assert!(matches!(
            validate_cnpj("emitter.tax_id", ""),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            validate_cnpj("emitter.tax_id", "123"),
            Err(ValidationError::InvalidFormat { .. })
        ));
        assert!(matches!(
            validate_cnpj("emitter.tax_id", "11222333000182"),
            Err(ValidationError::InvalidCheckDigit { .. })
        ));
    }

    #[test]
    fn test_justification_boundary() {
        assert!(validate_justification("abcdefghijklmn").is_err()); // 14
        assert!(validate_justification("abcdefghijklmno").is_ok()); // 15
        assert!(validate_justification("   abcdefghijklmn   ").is_err());
        assert!(validate_justification(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_correction_text_trimmed() {
        let text = validate_correction_text("  Endereco do destinatario corrigido  ").unwrap();
        assert_eq!(text, "Endereco do destinatario corrigido");
        assert!(validate_correction_text("curto").is_err());
    }

    #[test]
    fn test_key_fields() {
        assert!(validate_series(0).is_ok());
        assert!(validate_series(999).is_ok());
        assert!(validate_series(1000).is_err());
        assert!(validate_document_number(0).is_err());
        assert!(validate_document_number(1).is_ok());
        assert!(validate_document_number(1_000_000_000).is_err());
    }

    #[test]
    fn test_next_number_must_advance() {
        assert!(validate_next_number(1, None).is_ok());
        assert!(validate_next_number(43, Some(42)).is_ok());
        assert!(validate_next_number(0, None).is_err());
        match validate_next_number(42, Some(42)) {
            Err(ValidationError::OutOfRange { field, min, .. }) => {
                assert_eq!(field, "number");
                assert_eq!(min, 43);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(validate_next_number(7, Some(42)).is_err());
    }

    #[test]
    fn test_number_range() {
        assert!(validate_number_range(5, 5).is_ok());
        assert!(validate_number_range(1, MAX_DOCUMENT_NUMBER).is_ok());
        assert!(validate_number_range(0, 3).is_err());
        match validate_number_range(9, 5) {
            Err(ValidationError::OutOfRange { field, min, .. }) => {
                assert_eq!(field, "last_number");
                assert_eq!(min, 9);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_state_codes() {
        assert_eq!(state_abbreviation(35), Some("SP"));
        assert_eq!(state_abbreviation(43), Some("RS"));
        assert!(validate_state_code(34).is_err());
        assert!(validate_state_code(53).is_ok());
    }

    #[test]
    fn test_validate_digits() {
        assert!(validate_digits("ncm", "22021000", 8).is_ok());
        assert!(validate_digits("ncm", "2202100", 8).is_err());
        assert!(validate_digits("cfop", "51a2", 4).is_err());
    }

    fn append_check_digits(base: &str) -> String {
        let mut digits = to_digit_vec(base);
        let first = mod11_check_digit(&digits, 9);
        digits.push(first);
        let second = mod11_check_digit(&digits, 9);
        format!("{}{}{}", base, first, second)
    }

    proptest! {
        #[test]
        fn prop_cnpj_valid_iff_check_digits_match(base in "[0-9]{12}", tail in "[0-9]{2}") {
            let candidate = format!("{}{}", base, tail);
            let digits = to_digit_vec(&candidate);
            let expected = append_check_digits(&base);
            let matches = candidate == expected && !all_equal(&digits);
            prop_assert_eq!(is_valid_cnpj(&candidate), matches);
        }

        #[test]
        fn prop_cnpj_generated_is_valid(base in "[0-9]{12}") {
            let cnpj = append_check_digits(&base);
            let digits = to_digit_vec(&cnpj);
            prop_assert_eq!(is_valid_cnpj(&cnpj), !all_equal(&digits));
        }

        #[test]
        fn prop_all_equal_digits_rejected(d in 0u8..10) {
            let repeated = d.to_string().repeat(14);
            prop_assert!(!is_valid_cnpj(&repeated));
            prop_assert!(!is_valid_cpf(&d.to_string().repeat(11)));
        }
    }
}
