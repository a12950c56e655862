//! Error types for loading and running edict programs.
//!
//! - [`LoadError`] - everything that can go wrong before the first record runs
//! - [`EvalError`] - a failure while evaluating one record, with its position
//! - [`RecordError`] - an [`EvalError`] tied to the record that caused it
//! - [`Error`] - either of the above, labelled with the phase it happened in

use std::io;
use std::path::PathBuf;

use itertools::Itertools;
use thiserror::Error;

use crate::ast::{FieldName, Position};
use crate::builtins::Arity;
use crate::record::Record;
use crate::value::ValueType;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("syntax error at {position}: {message}")]
    Syntax { position: Position, message: String },

    #[error("directive error at {position}: {message}")]
    Directive { position: Position, message: String },

    #[error("import cycle: {}", .chain.iter().map(|path| path.display()).join(" -> "))]
    ImportCycle { chain: Vec<PathBuf> },

    #[error("cannot import {path:?} at {position}: {source}")]
    Import {
        path: String,
        position: Position,
        #[source]
        source: io::Error,
    },

    #[error("cannot read program {path:?}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("unknown function `{name}` at {position}")]
    UnknownFunction { name: String, position: Position },

    #[error("function `{name}` takes {expected} argument(s) but {found} were given at {position}")]
    Arity {
        name: String,
        expected: Arity,
        found: usize,
        position: Position,
    },

    #[error("implicit match at {position} needs a `@default_field` directive")]
    MissingDefaultField { position: Position },
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum EvalErrorKind {
    #[error("type error: {0}")]
    Type(String),

    #[error("cannot cast {} {value:?} to {target}", describe_field(.field))]
    Cast {
        field: Option<FieldName>,
        value: String,
        target: ValueType,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("cannot read date {value:?} with format {format:?}: {message}")]
    Date {
        value: String,
        format: String,
        message: String,
    },

    #[error("expected an integer, found {0}")]
    Integer(String),

    #[error("unknown function `{0}`")]
    UnknownFunction(String),
}

fn describe_field(field: &Option<FieldName>) -> String {
    match field {
        Some(name) => format!("field `{}` value", name),
        None => "value".to_owned(),
    }
}

impl EvalErrorKind {
    pub fn at(self, position: &Position) -> EvalError {
        EvalError {
            kind: self,
            position: position.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Error)]
#[error("{kind} at {position}")]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub position: Position,
}

/// An evaluation failure together with the record that was being processed.
///
/// `index` is the position of the record in the input sequence, before any
/// reordering by the `reverse` directive. `record` holds the record as it
/// was when processing started.
#[derive(Clone, Debug, Error)]
#[error(
    "record {index}: {source}\n{}",
    .record.iter().map(|(field, value)| format!("\t{}: {}", field, value)).join("\n")
)]
pub struct RecordError {
    pub index: usize,
    pub record: Record,
    #[source]
    pub source: EvalError,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("error while loading program: {0}")]
    Load(#[from] LoadError),

    #[error("error while processing {0}")]
    Record(#[from] RecordError),
}

pub type LoadResult<T> = Result<T, LoadError>;

pub type EvalResult<T> = Result<T, EvalError>;
