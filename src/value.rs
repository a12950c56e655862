//! Runtime values and the casting rules between them.
//!
//! Program literals have a fixed type. Record fields do not: they are
//! indeterminate strings that the consuming operator resolves to STRING or
//! NUMBER through [`Operand::resolve`]. No other implicit conversion exists.

use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use num_bigint::{BigInt, Sign};
use regex::{Regex, RegexBuilder};

use crate::ast::FieldName;
use crate::error::EvalErrorKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueType {
    None,
    String,
    Number,
    Boolean,
    Regex,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueType::None => "NONE",
            ValueType::String => "STRING",
            ValueType::Number => "NUMBER",
            ValueType::Boolean => "BOOLEAN",
            ValueType::Regex => "REGEX",
        })
    }
}

/// A compiled regular expression that remembers its source text.
#[derive(Clone, Debug)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str, case_insensitive: bool) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(source)
            .case_insensitive(case_insensitive)
            .build()?;
        Ok(Self {
            source: source.to_owned(),
            regex,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Searches anywhere in `text`; the pattern anchors itself if it wants to.
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.regex.as_str() == other.regex.as_str()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    None,
    String(String),
    Number(BigDecimal),
    Boolean(bool),
    Regex(Pattern),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::None => ValueType::None,
            Value::String(_) => ValueType::String,
            Value::Number(_) => ValueType::Number,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Regex(_) => ValueType::Regex,
        }
    }

    /// The text stored into a field when this value is assigned.
    pub fn into_field_string(self) -> Result<String, EvalErrorKind> {
        match self {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(format_number(&n)),
            Value::Boolean(b) => Ok(b.to_string()),
            Value::Regex(_) | Value::None => Err(EvalErrorKind::Type(format!(
                "a {} value cannot be stored in a field",
                self.value_type()
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("none"),
            Value::String(s) => f.write_str(s),
            Value::Number(n) => f.write_str(&format_number(n)),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Regex(p) => write!(f, "/{}/", p.source()),
        }
    }
}

/// The result of evaluating an expression before the consuming operator has
/// decided what type it needs.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    /// A field read; its type is still open.
    Field { name: FieldName, text: String },
    Value(Value),
}

impl Operand {
    /// The type fixed by the operand itself, if any. Field reads have none.
    pub fn strong_type(&self) -> Option<ValueType> {
        match self {
            Operand::Field { .. } => None,
            Operand::Value(value) => Some(value.value_type()),
        }
    }

    /// Casts a field read to `expected`, or checks that a typed value already
    /// has that type.
    pub fn resolve(self, expected: ValueType) -> Result<Value, EvalErrorKind> {
        match self {
            Operand::Field { name, text } => match expected {
                ValueType::String => Ok(Value::String(text)),
                ValueType::Number => match parse_number(&text) {
                    Some(n) => Ok(Value::Number(n)),
                    None => Err(EvalErrorKind::Cast {
                        field: Some(name),
                        value: text,
                        target: ValueType::Number,
                    }),
                },
                other => Err(EvalErrorKind::Type(format!(
                    "field `{}` cannot be used as {}",
                    name, other
                ))),
            },
            Operand::Value(value) if value.value_type() == expected => Ok(value),
            Operand::Value(Value::Regex(pattern)) => Err(EvalErrorKind::Type(format!(
                "regex /{}/ may only appear as the pattern of `~`",
                pattern.source()
            ))),
            Operand::Value(value) => Err(mismatch(expected, &value)),
        }
    }

    pub fn into_string(self) -> Result<String, EvalErrorKind> {
        match self.resolve(ValueType::String)? {
            Value::String(s) => Ok(s),
            other => Err(mismatch(ValueType::String, &other)),
        }
    }

    pub fn into_number(self) -> Result<BigDecimal, EvalErrorKind> {
        match self.resolve(ValueType::Number)? {
            Value::Number(n) => Ok(n),
            other => Err(mismatch(ValueType::Number, &other)),
        }
    }

    pub fn into_boolean(self) -> Result<bool, EvalErrorKind> {
        match self.resolve(ValueType::Boolean)? {
            Value::Boolean(b) => Ok(b),
            other => Err(mismatch(ValueType::Boolean, &other)),
        }
    }

    /// Field reads become plain strings; typed values pass through.
    pub fn into_value(self) -> Value {
        match self {
            Operand::Field { text, .. } => Value::String(text),
            Operand::Value(value) => value,
        }
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Value(value)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Field { text, .. } => f.write_str(text),
            Operand::Value(value) => value.fmt(f),
        }
    }
}

fn mismatch(expected: ValueType, found: &Value) -> EvalErrorKind {
    EvalErrorKind::Type(format!(
        "expected {}, found {} {:?}",
        expected,
        found.value_type(),
        found.to_string()
    ))
}

/// Largest power of ten a number read from text may carry, in either
/// direction. Anything beyond it fails to cast.
pub const MAX_SCALE: u64 = 4096;

/// Parses a field's text as an exact decimal. Surrounding whitespace is
/// ignored.
pub fn parse_number(text: &str) -> Option<BigDecimal> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let n = BigDecimal::from_str(text).ok()?;
    let (_, scale) = n.as_bigint_and_exponent();
    (scale.unsigned_abs() <= MAX_SCALE).then_some(n)
}

/// Renders a decimal in plain positional notation, keeping its scale.
pub fn format_number(n: &BigDecimal) -> String {
    let (digits, scale) = n.as_bigint_and_exponent();
    let mut text = digits.magnitude().to_string();
    if scale < 0 {
        if digits.sign() != Sign::NoSign {
            text.extend(std::iter::repeat('0').take(scale.unsigned_abs() as usize));
        }
    } else if scale > 0 {
        let scale = scale as usize;
        if text.len() <= scale {
            text.insert_str(0, &"0".repeat(scale + 1 - text.len()));
        }
        text.insert(text.len() - scale, '.');
    }
    if digits.sign() == Sign::Minus {
        text.insert(0, '-');
    }
    text
}

/// The integral value of `n`, if it has one that fits in an `i64`.
pub fn to_integer(n: &BigDecimal) -> Option<i64> {
    let (digits, scale) = n.normalized().into_bigint_and_exponent();
    if scale > 0 {
        return None;
    }
    // A non-zero value shifted by more than 18 places overflows an i64.
    let shift = u32::try_from(scale.unsigned_abs()).ok().filter(|&s| s <= 18)?;
    i64::try_from(digits * BigInt::from(10).pow(shift)).ok()
}
