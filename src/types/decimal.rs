//! Fixed-point decimal values for parameter binding.
//!
//! `SqlDecimal` keeps the exact digits and scale it was created with, so the
//! precision and scale sent in a `DECIMAL(...)` literal match what the caller wrote:
//! `12.50` has precision 4 and scale 2.

use std::fmt;
use std::str::FromStr;

use crate::error::ExecError;

/// Largest scale, and largest digit count after applying an exponent, accepted when parsing.
pub const MAX_DIGITS: u32 = 1000;

/// Exact decimal number: `(-1)^negative * digits * 10^-scale`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqlDecimal {
    negative: bool,
    /// Unscaled magnitude, no leading zeros ("0" for zero)
    digits: String,
    scale: u32,
}

impl SqlDecimal {
    /// Create a decimal from an unscaled integer and a scale.
    ///
    /// ```
    /// # use sqlrpc_exec::types::SqlDecimal;
    /// let d = SqlDecimal::new(1250, 2);
    /// assert_eq!(d.to_string(), "12.50");
    /// ```
    pub fn new(unscaled: i128, scale: u32) -> Self {
        Self {
            negative: unscaled < 0,
            digits: unscaled.unsigned_abs().to_string(),
            scale,
        }
    }

    /// Number of significant digits in the unscaled value. Zero has precision 1.
    pub fn precision(&self) -> u32 {
        self.digits.len() as u32
    }

    /// Number of digits to the right of the decimal point.
    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    fn from_parts(negative: bool, digits: &str, scale: u32) -> Self {
        let trimmed = digits.trim_start_matches('0');
        let digits = if trimmed.is_empty() { "0" } else { trimmed };
        Self {
            negative: negative && digits != "0",
            digits: digits.to_string(),
            scale,
        }
    }
}

impl FromStr for SqlDecimal {
    type Err = ExecError;

    /// Parse `[+-]digits[.digits][e[+-]exp]`.
    ///
    /// Exponents that push the scale or the expanded digits past [`MAX_DIGITS`]
    /// are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ExecError::InvalidArgument(format!("Invalid decimal value: {}", s));

        let text = s.trim();
        let (negative, text) = match text.as_bytes().first() {
            Some(b'-') => (true, &text[1..]),
            Some(b'+') => (false, &text[1..]),
            _ => (false, text),
        };

        let (mantissa, exponent) = match text.find(['e', 'E']) {
            Some(pos) => {
                let exponent: i64 = text[pos + 1..].parse().map_err(|_| invalid())?;
                (&text[..pos], exponent)
            }
            None => (text, 0),
        };

        let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let mut digits = format!("{}{}", int_part, frac_part);
        let scale = i64::try_from(frac_part.len())
            .ok()
            .and_then(|len| len.checked_sub(exponent))
            .ok_or_else(invalid)?;
        if scale.unsigned_abs() > u64::from(MAX_DIGITS) {
            return Err(invalid());
        }
        let scale = if scale < 0 {
            let padding = scale.unsigned_abs() as usize;
            if digits.len() + padding > MAX_DIGITS as usize {
                return Err(invalid());
            }
            digits.push_str(&"0".repeat(padding));
            0
        } else {
            scale as u32
        };

        Ok(Self::from_parts(negative, &digits, scale))
    }
}

impl fmt::Display for SqlDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        let scale = self.scale as usize;
        if scale == 0 {
            return f.write_str(&self.digits);
        }
        if self.digits.len() > scale {
            let split = self.digits.len() - scale;
            write!(f, "{}.{}", &self.digits[..split], &self.digits[split..])
        } else {
            let padding = "0".repeat(scale - self.digits.len());
            write!(f, "0.{}{}", padding, self.digits)
        }
    }
}

impl From<i64> for SqlDecimal {
    fn from(value: i64) -> Self {
        Self::new(i128::from(value), 0)
    }
}
