use crate::error::{Error, Result};

pub const KEY_WIDTH: usize = 6;

/// Canonicalizes a raw employee identifier into a left-zero-padded key of
/// `KEY_WIDTH` digits. Spreadsheet exports often store ids as floats, so a
/// trailing `.0` (or `.00`, ...) is dropped before validation.
pub fn normalize(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let digits = strip_float_suffix(trimmed);

    if digits.is_empty() {
        return Err(invalid(raw, "empty after trimming"));
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(raw, "contains non-digit characters"));
    }
    if digits.len() > KEY_WIDTH {
        return Err(invalid(raw, &format!("longer than {} digits", KEY_WIDTH)));
    }

    Ok(format!("{:0>width$}", digits, width = KEY_WIDTH))
}

fn strip_float_suffix(value: &str) -> &str {
    match value.split_once('.') {
        Some((whole, fraction)) if !fraction.is_empty() && fraction.bytes().all(|b| b == b'0') => {
            whole
        }
        _ => value,
    }
}

fn invalid(raw: &str, reason: &str) -> Error {
    Error::InvalidIdentifier {
        raw: raw.to_string(),
        reason: reason.to_string(),
    }
}
