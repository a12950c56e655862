//! Builtin functions callable from programs.
//!
//! Every builtin has a fixed entry in [`BUILTINS`] giving its parameter
//! types. The loader checks each call site against this table, so an
//! unknown name or wrong argument count never reaches a record.

use std::fmt;
use std::io::Write as _;
use std::sync::Mutex;

use chrono::NaiveDate;
use itertools::Itertools;

use crate::error::EvalErrorKind;
use crate::program::Config;
use crate::record::Record;
use crate::value::{parse_number, to_integer, Operand, Value, ValueType};

/// Destination of the `log()` builtin. It sits outside the record stream.
pub trait LogSink: Sync {
    fn log(&self, message: &str);
}

/// Writes each message as a line on standard error.
#[derive(Clone, Copy, Debug, Default)]
pub struct StderrSink;

impl LogSink for StderrSink {
    fn log(&self, message: &str) {
        let _ = writeln!(std::io::stderr().lock(), "{}", message);
    }
}

/// Keeps messages in memory.
#[derive(Debug, Default)]
pub struct MemorySink(Mutex<Vec<String>>);

impl MemorySink {
    pub fn messages(&self) -> Vec<String> {
        self.0.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

impl LogSink for MemorySink {
    fn log(&self, message: &str) {
        if let Ok(mut messages) = self.0.lock() {
            messages.push(message.to_owned());
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exactly(n) => count == n,
            Arity::AtLeast(n) => count >= n,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exactly(n) => write!(f, "{}", n),
            Arity::AtLeast(n) => write!(f, "at least {}", n),
        }
    }
}

/// What a parameter accepts. Typed parameters cast field reads the same way
/// an operator would.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Param {
    String,
    Number,
    Any,
}

impl Param {
    pub fn accept(self, operand: Operand) -> Result<Operand, EvalErrorKind> {
        match self {
            Param::String => operand.resolve(ValueType::String).map(Operand::Value),
            Param::Number => operand.resolve(ValueType::Number).map(Operand::Value),
            Param::Any => Ok(operand),
        }
    }
}

/// What a builtin sees of the current evaluation.
pub struct Invocation<'a> {
    pub config: &'a Config,
    pub record: &'a Record,
    pub sink: &'a dyn LogSink,
}

type Implementation = fn(&Invocation<'_>, Vec<Operand>) -> Result<Value, EvalErrorKind>;

pub struct Builtin {
    pub name: &'static str,
    pub params: &'static [Param],
    /// Type of any arguments past `params`; `None` means no more are allowed.
    pub rest: Option<Param>,
    pub call: Implementation,
}

impl Builtin {
    pub fn arity(&self) -> Arity {
        match self.rest {
            Some(_) => Arity::AtLeast(self.params.len()),
            None => Arity::Exactly(self.params.len()),
        }
    }

    pub fn param(&self, index: usize) -> Param {
        self.params
            .get(index)
            .copied()
            .or(self.rest)
            .unwrap_or(Param::Any)
    }
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builtin")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("rest", &self.rest)
            .finish()
    }
}

pub static BUILTINS: &[Builtin] = &[
    Builtin {
        name: "as_number",
        params: &[Param::Any],
        rest: None,
        call: as_number,
    },
    Builtin {
        name: "log",
        params: &[Param::Any],
        rest: Some(Param::Any),
        call: log,
    },
    Builtin {
        name: "read_date",
        params: &[Param::String, Param::String],
        rest: None,
        call: read_date,
    },
    Builtin {
        name: "record_str",
        params: &[],
        rest: None,
        call: record_str,
    },
    Builtin {
        name: "substring",
        params: &[Param::String, Param::Number, Param::Number],
        rest: None,
        call: substring,
    },
    Builtin {
        name: "input_protocol",
        params: &[],
        rest: None,
        call: input_protocol,
    },
    Builtin {
        name: "output_protocol",
        params: &[],
        rest: None,
        call: output_protocol,
    },
];

pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|builtin| builtin.name == name)
}

fn take<const N: usize>(args: Vec<Operand>) -> Result<[Operand; N], EvalErrorKind> {
    let found = args.len();
    <[Operand; N]>::try_from(args).map_err(|_| {
        EvalErrorKind::Type(format!("expected {} argument(s), found {}", N, found))
    })
}

fn into_integer(operand: Operand) -> Result<i64, EvalErrorKind> {
    let n = operand.into_number()?;
    to_integer(&n).ok_or_else(|| EvalErrorKind::Integer(n.to_string()))
}

/// Reads a number, ignoring `,` thousands separators.
fn as_number(_: &Invocation<'_>, args: Vec<Operand>) -> Result<Value, EvalErrorKind> {
    let [arg] = take(args)?;
    let (field, text) = match arg {
        Operand::Field { name, text } => (Some(name), text),
        Operand::Value(Value::String(text)) => (None, text),
        Operand::Value(Value::Number(n)) => return Ok(Value::Number(n)),
        Operand::Value(other) => {
            return Err(EvalErrorKind::Type(format!(
                "as_number() cannot convert a {} value",
                other.value_type()
            )))
        }
    };
    match parse_number(&text.replace(',', "")) {
        Some(n) => Ok(Value::Number(n)),
        None => Err(EvalErrorKind::Cast {
            field,
            value: text,
            target: ValueType::Number,
        }),
    }
}

fn log(invocation: &Invocation<'_>, args: Vec<Operand>) -> Result<Value, EvalErrorKind> {
    if args
        .iter()
        .any(|arg| matches!(arg, Operand::Value(Value::None)))
    {
        return Err(EvalErrorKind::Type("log() cannot print a NONE value".into()));
    }
    invocation.sink.log(&args.iter().join(" "));
    Ok(Value::None)
}

/// Parses a date with a strftime-style format and renders it as ISO 8601.
fn read_date(_: &Invocation<'_>, args: Vec<Operand>) -> Result<Value, EvalErrorKind> {
    let [value, format] = take(args)?;
    let (value, format) = (value.into_string()?, format.into_string()?);
    match NaiveDate::parse_from_str(value.trim(), &format) {
        Ok(date) => Ok(Value::String(date.format("%Y-%m-%d").to_string())),
        Err(err) => Err(EvalErrorKind::Date {
            value,
            format,
            message: err.to_string(),
        }),
    }
}

fn record_str(invocation: &Invocation<'_>, _: Vec<Operand>) -> Result<Value, EvalErrorKind> {
    let body = invocation
        .record
        .iter()
        .map(|(field, value)| format!("{:?}: {:?}", field, value))
        .join(", ");
    Ok(Value::String(format!("{{{}}}", body)))
}

/// Characters `start..end` of a string. Negative indices count back from
/// the end and out-of-range indices are clamped.
fn substring(_: &Invocation<'_>, args: Vec<Operand>) -> Result<Value, EvalErrorKind> {
    let [text, start, end] = take(args)?;
    let chars: Vec<char> = text.into_string()?.chars().collect();
    let len = chars.len() as i64;
    let clamp = |index: i64| {
        if index < 0 {
            (index + len).max(0)
        } else {
            index.min(len)
        }
    };
    let start = clamp(into_integer(start)?);
    let end = clamp(into_integer(end)?);
    if start >= end {
        return Ok(Value::String(String::new()));
    }
    Ok(Value::String(
        chars[start as usize..end as usize].iter().collect(),
    ))
}

fn input_protocol(invocation: &Invocation<'_>, _: Vec<Operand>) -> Result<Value, EvalErrorKind> {
    Ok(Value::String(invocation.config.protocols.input.clone()))
}

fn output_protocol(invocation: &Invocation<'_>, _: Vec<Operand>) -> Result<Value, EvalErrorKind> {
    Ok(Value::String(invocation.config.protocols.output.clone()))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use bigdecimal::BigDecimal;
    use pretty_assertions::assert_eq;

    use super::*;

    fn call(name: &str, args: Vec<Operand>) -> Result<Value, EvalErrorKind> {
        let config = Config::default();
        let record: Record = [("amount", "1,234.50"), ("date", "03/14/2021")]
            .into_iter()
            .collect();
        let sink = MemorySink::default();
        let invocation = Invocation {
            config: &config,
            record: &record,
            sink: &sink,
        };
        let builtin = lookup(name).unwrap();
        assert!(builtin.arity().accepts(args.len()));
        (builtin.call)(&invocation, args)
    }

    fn string(s: &str) -> Operand {
        Operand::Value(Value::String(s.into()))
    }

    fn number(n: &str) -> Operand {
        Operand::Value(Value::Number(BigDecimal::from_str(n).unwrap()))
    }

    fn field(name: &str, text: &str) -> Operand {
        Operand::Field {
            name: name.into(),
            text: text.into(),
        }
    }

    #[test]
    fn test_substring() {
        let cases = [
            ("-3", "-1", "ll"),
            ("0", "5", "hello"),
            ("1", "100", "ello"),
            ("-100", "2", "he"),
            ("3", "1", ""),
        ];
        for (start, end, expected) in cases {
            assert_eq!(
                call("substring", vec![string("hello"), number(start), number(end)]),
                Ok(Value::String(expected.into())),
                "substring(\"hello\", {}, {})",
                start,
                end
            );
        }
    }

    #[test]
    fn test_substring_rejects_fractional_index() {
        assert_eq!(
            call("substring", vec![string("hello"), number("0.5"), number("2")]),
            Err(EvalErrorKind::Integer("0.5".into()))
        );
    }

    #[test]
    fn test_as_number_strips_separators() {
        assert_eq!(
            call("as_number", vec![field("amount", "1,234.50")]),
            Ok(Value::Number(BigDecimal::from_str("1234.50").unwrap()))
        );
        assert!(matches!(
            call("as_number", vec![field("amount", "abc")]),
            Err(EvalErrorKind::Cast { field: Some(_), .. })
        ));
        assert!(matches!(
            call("as_number", vec![Operand::Value(Value::Boolean(true))]),
            Err(EvalErrorKind::Type(_))
        ));
    }

    #[test]
    fn test_read_date() {
        assert_eq!(
            call("read_date", vec![string("03/14/2021"), string("%m/%d/%Y")]),
            Ok(Value::String("2021-03-14".into()))
        );
        assert!(matches!(
            call("read_date", vec![string("yesterday"), string("%m/%d/%Y")]),
            Err(EvalErrorKind::Date { .. })
        ));
    }

    #[test]
    fn test_record_str() {
        assert_eq!(
            call("record_str", vec![]),
            Ok(Value::String(
                r#"{"amount": "1,234.50", "date": "03/14/2021"}"#.into()
            ))
        );
    }

    #[test]
    fn test_protocols() {
        assert_eq!(
            call("output_protocol", vec![]),
            Ok(Value::String("csv".into()))
        );
    }

    #[test]
    fn test_log_writes_to_sink() {
        let config = Config::default();
        let record = Record::default();
        let sink = MemorySink::default();
        let invocation = Invocation {
            config: &config,
            record: &record,
            sink: &sink,
        };
        let result = log(&invocation, vec![string("total:"), number("12.50")]);
        assert_eq!(result, Ok(Value::None));
        assert_eq!(sink.messages(), vec!["total: 12.50".to_owned()]);
    }

    #[test]
    fn test_arity() {
        assert_eq!(lookup("log").unwrap().arity(), Arity::AtLeast(1));
        assert_eq!(lookup("substring").unwrap().arity(), Arity::Exactly(3));
        assert!(lookup("no_such_function").is_none());
    }
}
