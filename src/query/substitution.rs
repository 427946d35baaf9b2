//! Positional parameter substitution.
//!
//! Bound values are injected into SQL text as typed literals. A `?` is a marker only
//! outside quotes; inside `'...'` or `"..."` it is copied verbatim. A doubled quote of
//! the active kind is an escape and does not close the quoted region. Apart from the
//! replaced markers, the output is byte-identical to the input.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::fmt::{self, Write};

use crate::error::ExecError;
use crate::types::SqlDecimal;

/// Value bound to a positional marker.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    /// NULL value
    Null,
    /// Character data
    Text(String),
    /// Instant, rendered in UTC
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Float(f32),
    /// 64-bit integer, rendered bare
    Long(i64),
    /// Double, rendered bare
    Double(f64),
    Decimal(SqlDecimal),
    Binary(Vec<u8>),
    /// Not expressible as a literal
    Array(Vec<Parameter>),
}

impl Parameter {
    /// Append the SQL literal for this value to `out`.
    pub fn write_literal(&self, out: &mut String) -> Result<(), ExecError> {
        if let Parameter::Array(_) = self {
            return Err(ExecError::Unsupported(
                "array parameters cannot be bound".to_string(),
            ));
        }
        self.render(out)
            .map_err(|_| ExecError::InvalidArgument(format!("cannot render {:?} as a literal", self)))
    }

    fn render(&self, out: &mut String) -> fmt::Result {
        match self {
            Parameter::Null => out.write_str("NULL"),
            Parameter::Text(s) => {
                out.write_char('\'')?;
                out.write_str(&s.replace('\'', "''"))?;
                out.write_char('\'')
            }
            Parameter::Timestamp(ts) => {
                write!(out, "TIMESTAMP('{}')", ts.format("%Y-%m-%d %H:%M:%S%.3f"))
            }
            Parameter::Date(d) => write!(out, "DATE('{}')", d.format("%Y-%m-%d")),
            Parameter::Time(t) => write!(out, "TIME('{}')", t.format("%H:%M:%S%.3f")),
            Parameter::Boolean(b) => write!(out, "BOOLEAN('{}')", b),
            Parameter::Byte(n) => write!(out, "BYTE({})", n),
            Parameter::Short(n) => write!(out, "SMALLINT({})", n),
            Parameter::Int(n) => write!(out, "INT({})", n),
            Parameter::Float(n) => {
                out.write_str("FLOAT(")?;
                write_approximate(out, &format!("{:e}", n))?;
                out.write_char(')')
            }
            Parameter::Long(n) => write!(out, "{}", n),
            Parameter::Double(n) => write_approximate(out, &format!("{:e}", n)),
            Parameter::Decimal(d) => {
                write!(out, "DECIMAL({}, {}, {})", d, d.precision(), d.scale())
            }
            Parameter::Binary(bytes) => write!(out, "BINARY('0x{}')", hex::encode(bytes)),
            Parameter::Array(_) => Err(fmt::Error),
        }
    }

    /// The SQL literal for this value.
    pub fn to_sql_literal(&self) -> Result<String, ExecError> {
        let mut out = String::new();
        self.write_literal(&mut out)?;
        Ok(out)
    }
}

/// Write a float given in shortest `{:e}` form as the server prints approximate
/// numbers: plain notation for magnitudes in `[1e-3, 1e7)`, `d.dddE<exp>` otherwise,
/// and always at least one fractional digit.
fn write_approximate(out: &mut String, scientific: &str) -> fmt::Result {
    let (negative, body) = match scientific.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, scientific),
    };
    if negative {
        out.write_char('-')?;
    }
    let Some((mantissa, exponent)) = body.split_once('e') else {
        // NaN or inf
        return out.write_str(if body == "inf" { "Infinity" } else { body });
    };
    let exponent: i32 = exponent.parse().map_err(|_| fmt::Error)?;
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();

    if !(-3..7).contains(&exponent) {
        let (first, rest) = digits.split_at(1);
        let rest = if rest.is_empty() { "0" } else { rest };
        return write!(out, "{}.{}E{}", first, rest, exponent);
    }
    if exponent < 0 {
        let zeros = exponent.unsigned_abs() as usize - 1;
        return write!(out, "0.{}{}", "0".repeat(zeros), digits);
    }
    let int_len = exponent as usize + 1;
    if digits.len() > int_len {
        write!(out, "{}.{}", &digits[..int_len], &digits[int_len..])
    } else {
        write!(out, "{}{}.0", digits, "0".repeat(int_len - digits.len()))
    }
}

impl<T: Into<Parameter>> From<Option<T>> for Parameter {
    fn from(value: Option<T>) -> Self {
        value.map_or(Parameter::Null, Into::into)
    }
}

macro_rules! parameter_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Parameter {
                fn from(value: $ty) -> Self {
                    Parameter::$variant(value)
                }
            }
        )*
    };
}

parameter_from! {
    String => Text,
    DateTime<Utc> => Timestamp,
    NaiveDate => Date,
    NaiveTime => Time,
    bool => Boolean,
    i8 => Byte,
    i16 => Short,
    i32 => Int,
    f32 => Float,
    i64 => Long,
    f64 => Double,
    SqlDecimal => Decimal,
    Vec<u8> => Binary,
}

impl From<&str> for Parameter {
    fn from(value: &str) -> Self {
        Parameter::Text(value.to_string())
    }
}

impl From<&[u8]> for Parameter {
    fn from(value: &[u8]) -> Self {
        Parameter::Binary(value.to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quote {
    None,
    Single,
    Double,
}

/// Replace every unquoted `?` in `sql` with the next bound literal.
///
/// With no parameters bound the input is returned unchanged. Unused trailing
/// parameters are ignored.
///
/// # Errors
///
/// `InvalidParameterMarker` when markers outnumber parameters, `Unsupported`
/// for values that have no literal form.
pub fn substitute(sql: &str, params: &[Parameter]) -> Result<String, ExecError> {
    if params.is_empty() {
        return Ok(sql.to_string());
    }

    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    let mut quote = Quote::None;
    let mut next = 0;
    let mut run_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let doubled = bytes.get(i + 1) == Some(&bytes[i]);
        match (quote, bytes[i]) {
            (Quote::None, b'?') => {
                let param = params
                    .get(next)
                    .ok_or(ExecError::InvalidParameterMarker { index: next + 1 })?;
                out.push_str(&sql[run_start..i]);
                param.write_literal(&mut out)?;
                next += 1;
                run_start = i + 1;
            }
            (Quote::None, b'\'') | (Quote::None, b'"') if doubled => i += 1,
            (Quote::None, b'\'') => quote = Quote::Single,
            (Quote::None, b'"') => quote = Quote::Double,
            (Quote::Single, b'\'') | (Quote::Double, b'"') => {
                if doubled {
                    i += 1;
                } else {
                    quote = Quote::None;
                }
            }
            _ => {}
        }
        i += 1;
    }

    out.push_str(&sql[run_start..]);
    Ok(out)
}
