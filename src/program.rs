use itertools::Itertools;

use crate::ast::{Assignment, Expr, FieldName};

/// How a string pattern on the right of `~` is compared with its subject.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StringMatch {
    /// The pattern occurs anywhere in the subject.
    #[default]
    Contains,
    /// The pattern equals the whole subject.
    Exact,
}

/// Names of the record encodings the host is reading and writing. Reported
/// by the `input_protocol()` and `output_protocol()` builtins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Protocols {
    pub input: String,
    pub output: String,
}

impl Default for Protocols {
    fn default() -> Self {
        Self {
            input: "csv".to_owned(),
            output: "csv".to_owned(),
        }
    }
}

/// Settings the host supplies when loading a program.
#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub protocols: Protocols,
    pub string_match: StringMatch,
}

/// Frozen run configuration: the root program's header directives plus the
/// host's [`LoadOptions`].
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub case_insensitive: bool,
    pub default_field: Option<FieldName>,
    pub output_fields: Option<Vec<FieldName>>,
    pub reverse: bool,
    pub string_match: StringMatch,
    pub protocols: Protocols,
}

impl Config {
    pub fn new(options: LoadOptions) -> Self {
        Self {
            string_match: options.string_match,
            protocols: options.protocols,
            ..Self::default()
        }
    }
}

/// A statement of a loaded program. Imports are spliced in and implicit
/// matches are rewritten, so no directive survives into this form.
#[derive(Clone, Debug)]
pub enum Step {
    Assignment(Assignment),
    Rule {
        arms: Vec<Arm>,
        otherwise: Option<Vec<Step>>,
    },
    Expression(Expr),
}

/// One `if`/`elif` branch of a loaded rule.
#[derive(Clone, Debug)]
pub struct Arm {
    pub condition: Expr,
    pub body: Vec<Step>,
}

impl Step {
    /// Fields written by this step, in source order, including those inside
    /// rule bodies.
    fn assigned_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Step::Assignment(assignment) => out.push(&assignment.field),
            Step::Rule { arms, otherwise } => {
                let bodies = arms.iter().map(|arm| &arm.body).chain(otherwise.iter());
                for step in bodies.flatten() {
                    step.assigned_fields(out);
                }
            }
            Step::Expression(_) => {}
        }
    }
}

/// A loaded program: configuration and a flat step list with every import
/// already inlined. Immutable once built.
#[derive(Clone, Debug)]
pub struct Program {
    config: Config,
    steps: Vec<Step>,
}

impl Program {
    pub(crate) fn new(config: Config, steps: Vec<Step>) -> Self {
        Self { config, steps }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn output_fields(&self) -> Option<&[FieldName]> {
        self.config.output_fields.as_deref()
    }

    /// Every field the program may write, in order of first assignment.
    pub fn assigned_fields(&self) -> Vec<&str> {
        let mut fields = vec![];
        for step in &self.steps {
            step.assigned_fields(&mut fields);
        }
        fields.into_iter().unique().collect()
    }

    /// Columns a writer should emit for input with `input_fields`: the
    /// declared output fields, or else the input fields followed by the
    /// fields this program adds.
    pub fn fields(&self, input_fields: &[FieldName]) -> Vec<FieldName> {
        match &self.config.output_fields {
            Some(fields) => fields.clone(),
            None => input_fields
                .iter()
                .map(String::as_str)
                .chain(self.assigned_fields())
                .unique()
                .map(str::to_owned)
                .collect(),
        }
    }
}
