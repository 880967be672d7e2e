//! Field validators for registration records and credentials.
//!
//! Each validator is a plain function returning `Result<(), ValidationError>`,
//! called explicitly by the request parsing code. Errors carry a stable `code`
//! and a human readable message.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use validator::{ValidateEmail, ValidationError};

/// Maximum length of a formatted CPF (`000.000.000-00`).
pub const CPF_MAX_LENGTH: usize = 14;
/// Number of digits in a CPF.
pub const CPF_DIGITS: usize = 11;

const FIRST_CHECK_WEIGHTS: [u32; 9] = [10, 9, 8, 7, 6, 5, 4, 3, 2];
const SECOND_CHECK_WEIGHTS: [u32; 10] = [11, 10, 9, 8, 7, 6, 5, 4, 3, 2];

static PHONE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9 ().-]+$").expect("valid phone regex"));

fn error(code: &'static str, message: &'static str) -> ValidationError {
    ValidationError::new(code).with_message(Cow::Borrowed(message))
}

/// Remove `.` and `-` and surrounding whitespace, returning the candidate digits.
fn clean_cpf(value: &str) -> String {
    value.replace(['.', '-'], "").trim().to_string()
}

fn check_digit(digits: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    match sum % 11 {
        r if r < 2 => 0,
        r => 11 - r,
    }
}

/// Checksum validation of a CPF. Accepts the bare 11 digits or the
/// `000.000.000-00` formatting.
pub fn is_valid_cpf(value: &str) -> bool {
    let cpf = clean_cpf(value);
    if cpf.len() != CPF_DIGITS || !cpf.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    let digits: Vec<u32> = cpf.bytes().map(|b| u32::from(b - b'0')).collect();
    if digits.iter().all(|d| *d == digits[0]) {
        return false;
    }

    let first = check_digit(&digits[..9], &FIRST_CHECK_WEIGHTS);
    let mut prefix = digits[..9].to_vec();
    prefix.push(first);
    let second = check_digit(&prefix, &SECOND_CHECK_WEIGHTS);

    cpf.ends_with(&format!("{}{}", first, second))
}

/// The 11-digit form of a valid CPF, used for storage and lookups.
pub fn normalize_cpf(value: &str) -> Option<String> {
    is_valid_cpf(value).then(|| clean_cpf(value))
}

pub fn validate_cpf(value: &str) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if !(CPF_DIGITS..=CPF_MAX_LENGTH).contains(&len) {
        return Err(error(
            "cpf_length",
            "CPF must have between 11 and 14 characters",
        ));
    }
    if !is_valid_cpf(value) {
        return Err(error("cpf", "Invalid CPF"));
    }
    Ok(())
}

/// The first character must not be a lowercase letter. Empty values pass;
/// use [`validate_required`] to reject them.
pub fn validate_first_letter_uppercase(value: &str) -> Result<(), ValidationError> {
    match value.chars().next() {
        Some(first) if first.is_lowercase() => Err(error(
            "first_letter_uppercase",
            "The first letter must be uppercase",
        )),
        _ => Ok(()),
    }
}

pub fn validate_required(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(error("required", "This field is required"));
    }
    Ok(())
}

pub fn validate_email(value: &str) -> Result<(), ValidationError> {
    if !value.validate_email() {
        return Err(error("email", "Invalid e-mail address"));
    }
    Ok(())
}

/// Digits with an optional leading `+`, spaces, dots, dashes and parentheses.
/// Between 8 and 15 digits.
pub fn validate_phone(value: &str) -> Result<(), ValidationError> {
    let digits = value.chars().filter(char::is_ascii_digit).count();
    if !PHONE_CHARS.is_match(value) || !(8..=15).contains(&digits) {
        return Err(error("phone", "Invalid phone number"));
    }
    Ok(())
}

/// Minimum password length.
pub const PASSWORD_MIN_LENGTH: usize = 6;

/// Password policy: length, one digit, one lowercase, one uppercase and one
/// non-alphanumeric character.
pub fn validate_password(value: &str) -> Result<(), ValidationError> {
    if value.chars().count() < PASSWORD_MIN_LENGTH {
        return Err(error(
            "password_length",
            "Password must be at least 6 characters",
        ));
    }
    if !value.chars().any(|c| c.is_ascii_digit()) {
        return Err(error("password_digit", "Password must contain a digit"));
    }
    if !value.chars().any(char::is_lowercase) {
        return Err(error(
            "password_lowercase",
            "Password must contain a lowercase letter",
        ));
    }
    if !value.chars().any(char::is_uppercase) {
        return Err(error(
            "password_uppercase",
            "Password must contain an uppercase letter",
        ));
    }
    if value.chars().all(char::is_alphanumeric) {
        return Err(error(
            "password_non_alphanumeric",
            "Password must contain a non-alphanumeric character",
        ));
    }
    Ok(())
}
