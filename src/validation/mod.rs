use bigdecimal::{BigDecimal, ToPrimitive};
use std::fmt;
use std::str::FromStr;
use url::Url;

pub const IDENTIFIER_MAX_LEN: usize = 64;
pub const RETURN_URL_MAX_LEN: usize = 2048;
pub const AMOUNT_INPUT_MAX_LEN: usize = 20;
pub const MINOR_UNIT_DIGITS: i64 = 2;
pub const ALLOWED_CURRENCIES: &[&str] = &["USD"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

/// Collapses whitespace runs to one space. Control characters count as
/// whitespace, so they separate words rather than joining them.
pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

pub fn validate_enum(field: &'static str, value: &str, allowed: &[&str]) -> ValidationResult {
    if !allowed.contains(&value) {
        return Err(ValidationError::new(
            field,
            format!("must be one of: {}", allowed.join(", ")),
        ));
    }

    Ok(())
}

/// Caller-supplied identifiers (transaction, tenant, customer ids).
pub fn validate_identifier(field: &'static str, value: &str) -> ValidationResult {
    validate_required(field, value)?;
    validate_max_len(field, value, IDENTIFIER_MAX_LEN)?;

    if !value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | ':'))
    {
        return Err(ValidationError::new(
            field,
            "may only contain letters, digits, '-', '_', '.' and ':'",
        ));
    }

    Ok(())
}

/// Extracts a required string field from an optional request value.
pub fn required_field(field: &'static str, value: Option<String>) -> Result<String, ValidationError> {
    let value = value.map(|v| sanitize_string(&v)).unwrap_or_default();
    validate_required(field, &value)?;
    Ok(value)
}

/// Parses a decimal amount string ("25.00") into integer minor units (2500).
pub fn parse_amount_minor_units(raw: &str) -> Result<i64, ValidationError> {
    let raw = raw.trim();
    validate_required("amount", raw)?;
    validate_max_len("amount", raw, AMOUNT_INPUT_MAX_LEN)?;

    if raw.starts_with('.')
        || raw.ends_with('.')
        || raw.matches('.').count() > 1
        || !raw.chars().all(|ch| ch.is_ascii_digit() || ch == '.')
    {
        return Err(ValidationError::new(
            "amount",
            "must be a non-negative decimal such as 25.00",
        ));
    }

    let amount = BigDecimal::from_str(raw)
        .map_err(|_| ValidationError::new("amount", "must be a valid decimal"))?;

    let (_, scale) = amount.normalized().as_bigint_and_exponent();
    if scale > MINOR_UNIT_DIGITS {
        return Err(ValidationError::new(
            "amount",
            format!("must have at most {} decimal places", MINOR_UNIT_DIGITS),
        ));
    }

    (amount * BigDecimal::from(10i64.pow(MINOR_UNIT_DIGITS as u32)))
        .with_scale(0)
        .to_i64()
        .ok_or_else(|| ValidationError::new("amount", "is too large"))
}

/// Inverse of `parse_amount_minor_units`, used for redirects and receipts.
pub fn format_minor_units(amount_minor: i64) -> String {
    let sign = if amount_minor < 0 { "-" } else { "" };
    let abs = amount_minor.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

pub fn validate_currency(currency: &str) -> Result<String, ValidationError> {
    let currency = sanitize_string(currency).to_ascii_uppercase();
    validate_required("currency", &currency)?;

    if currency.len() != 3 || !currency.chars().all(|ch| ch.is_ascii_uppercase()) {
        return Err(ValidationError::new("currency", "must be a 3-letter code"));
    }

    validate_enum("currency", &currency, ALLOWED_CURRENCIES)?;
    Ok(currency)
}

/// The caller's own address the browser is sent back to.
pub fn validate_return_url(raw: &str) -> Result<Url, ValidationError> {
    let raw = raw.trim();
    validate_required("return_url", raw)?;
    validate_max_len("return_url", raw, RETURN_URL_MAX_LEN)?;

    let url = Url::parse(raw).map_err(|_| ValidationError::new("return_url", "must be an absolute URL"))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ValidationError::new("return_url", "must be an http(s) URL"));
    }

    Ok(url)
}
