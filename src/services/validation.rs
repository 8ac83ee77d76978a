//! Normalization of customer identifiers sent to the gateway.

use crate::payments::error::{PaymentError, PaymentResult};

fn digits_only(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

/// Normalizes a mobile number to the 11-digit local form `03XXXXXXXXX`.
///
/// Accepts local (`03001234567`), international (`+92 300 1234567`) and
/// bare subscriber (`3001234567`) forms; separators are ignored.
pub fn normalize_phone_number(phone: &str) -> PaymentResult<String> {
    let digits = digits_only(phone);
    if digits.is_empty() {
        return Err(PaymentError::validation(
            "phone_number",
            "phone number contains no digits",
        ));
    }

    match digits.len() {
        11 if digits.starts_with('0') => Ok(digits),
        12 if digits.starts_with("92") => Ok(format!("0{}", &digits[2..])),
        13 if digits.starts_with("92") => Ok(format!("0{}", &digits[2..12])),
        10 => Ok(format!("0{}", digits)),
        n => Err(PaymentError::validation(
            "phone_number",
            format!("invalid phone number format: expected 10-13 digits, got {}", n),
        )),
    }
}

/// Reduces a national ID (full or partial) to its last six digits.
pub fn normalize_cnic_last6(cnic: &str) -> PaymentResult<String> {
    let digits = digits_only(cnic);
    if digits.is_empty() {
        return Err(PaymentError::validation("cnic_last6", "CNIC contains no digits"));
    }
    if digits.len() < 6 {
        return Err(PaymentError::validation(
            "cnic_last6",
            format!("CNIC must have at least 6 digits, got {}", digits.len()),
        ));
    }
    Ok(digits[digits.len() - 6..].to_string())
}

pub fn validate_amount(amount: i64) -> PaymentResult<()> {
    if amount <= 0 {
        return Err(PaymentError::validation(
            "amount",
            "amount must be greater than zero",
        ));
    }
    Ok(())
}
