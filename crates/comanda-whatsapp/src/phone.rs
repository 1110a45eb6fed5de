// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Destination number normalization for Brazilian customers.

use comanda_core::ComandaError;

/// Brazil's country calling code.
const COUNTRY_CODE: &str = "55";

/// Suffix of a personal WhatsApp JID.
const USER_SERVER: &str = "@s.whatsapp.net";

/// Normalize a customer phone number to international digits.
///
/// Non-digits are stripped. A leading trunk `0` is replaced by `55`;
/// numbers already carrying `55` at full international length (12-13
/// digits) pass through; bare 10-11 digit local numbers get `55` prepended.
/// Anything else is returned as digits unchanged.
pub fn normalize_phone(raw: &str) -> Result<String, ComandaError> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(ComandaError::Validation(format!(
            "phone number '{raw}' contains no digits"
        )));
    }

    if let Some(rest) = digits.strip_prefix('0') {
        return Ok(format!("{COUNTRY_CODE}{rest}"));
    }
    if digits.starts_with(COUNTRY_CODE) && (12..=13).contains(&digits.len()) {
        return Ok(digits);
    }
    if (10..=11).contains(&digits.len()) {
        return Ok(format!("{COUNTRY_CODE}{digits}"));
    }
    Ok(digits)
}

/// Build the user JID for an already normalized number.
pub fn to_jid(normalized: &str) -> String {
    format!("{normalized}{USER_SERVER}")
}

/// Extract the phone number from a JID such as `5511987654321:12@s.whatsapp.net`.
pub fn phone_from_jid(jid: &str) -> String {
    let user = jid.split('@').next().unwrap_or(jid);
    user.split(':').next().unwrap_or(user).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_mobile_gets_country_code() {
        assert_eq!(normalize_phone("11987654321").unwrap(), "5511987654321");
    }

    #[test]
    fn local_landline_gets_country_code() {
        assert_eq!(normalize_phone("1132345678").unwrap(), "551132345678");
    }

    #[test]
    fn formatting_is_stripped() {
        assert_eq!(
            normalize_phone("(11) 98765-4321").unwrap(),
            "5511987654321"
        );
        assert_eq!(
            normalize_phone("+55 11 98765-4321").unwrap(),
            "5511987654321"
        );
    }

    #[test]
    fn international_number_passes_through() {
        assert_eq!(normalize_phone("5511987654321").unwrap(), "5511987654321");
        assert_eq!(normalize_phone("551132345678").unwrap(), "551132345678");
    }

    #[test]
    fn leading_zero_is_replaced_with_country_code() {
        assert_eq!(normalize_phone("011987654321").unwrap(), "5511987654321");
        assert_eq!(normalize_phone("05511987654321").unwrap(), "555511987654321");
    }

    #[test]
    fn local_number_with_area_code_55_is_not_mistaken_for_international() {
        // Area code 55 (Rio Grande do Sul), 10 digits.
        assert_eq!(normalize_phone("5532345678").unwrap(), "555532345678");
    }

    #[test]
    fn no_digits_is_a_validation_error() {
        assert!(matches!(
            normalize_phone("n/a"),
            Err(ComandaError::Validation(_))
        ));
    }

    #[test]
    fn jid_round_trip() {
        assert_eq!(to_jid("5511987654321"), "5511987654321@s.whatsapp.net");
        assert_eq!(
            phone_from_jid("5511987654321:12@s.whatsapp.net"),
            "5511987654321"
        );
        assert_eq!(phone_from_jid("5511987654321@s.whatsapp.net"), "5511987654321");
    }
}
