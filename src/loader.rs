//! Building a runnable [`Program`] from source text.
//!
//! Loading happens in three steps:
//! 1. the root file's header directives become the [`Config`];
//! 2. `@@import` directives are resolved and spliced in place, recursively;
//! 3. a preparation pass desugars implicit matches, recompiles regexes for
//!    case-insensitive programs and checks every call against the builtin
//!    table.
//!
//! Anything that can be rejected without a record is rejected here.

use std::collections::HashSet;
use std::mem;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::ast::{Directive, Expr, ExprKind, FieldName, Position, Statement};
use crate::builtins;
use crate::error::{LoadError, LoadResult};
use crate::parser::parse_source;
use crate::program::{Arm, Config, LoadOptions, Program, Step};
use crate::resolve::{FsResolver, Source, SourceResolver};
use crate::value::{Pattern, Value};

pub struct Loader<R = FsResolver> {
    resolver: R,
    options: LoadOptions,
}

impl Loader<FsResolver> {
    pub fn new() -> Self {
        Self::with_resolver(FsResolver)
    }
}

impl Default for Loader<FsResolver> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: SourceResolver> Loader<R> {
    pub fn with_resolver(resolver: R) -> Self {
        Self {
            resolver,
            options: LoadOptions::default(),
        }
    }

    pub fn options(mut self, options: LoadOptions) -> Self {
        self.options = options;
        self
    }

    /// Loads the program at `path` through the resolver.
    pub fn load_path(&self, path: &str) -> LoadResult<Program> {
        let source = self
            .resolver
            .resolve(path, None)
            .map_err(|source| LoadError::Read {
                path: path.to_owned(),
                source,
            })?;
        self.load_source(source)
    }

    /// Loads program text that did not come from the resolver. Imports in it
    /// are resolved relative to `base_dir`.
    pub fn load_str(&self, text: &str, name: &str, base_dir: Option<&Path>) -> LoadResult<Program> {
        let id = match base_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        };
        self.load_source(Source {
            id,
            text: text.to_owned(),
        })
    }

    fn load_source(&self, source: Source) -> LoadResult<Program> {
        let file = parse_source(&source.text, &source.id.display().to_string())?;
        let config = configure(&file.header, self.options.clone())?;

        let mut flattener = Flattener {
            resolver: &self.resolver,
            chain: vec![source.id.clone()],
            active: HashSet::from([source.id.clone()]),
        };
        let mut steps = vec![];
        flattener.flatten(file.statements, source.id.parent(), &mut steps)?;

        Preparer { config: &config }.block(&mut steps)?;

        info!(
            program = %source.id.display(),
            steps = steps.len(),
            "program loaded"
        );
        Ok(Program::new(config, steps))
    }
}

fn directive_error(directive: &Directive, message: impl Into<String>) -> LoadError {
    LoadError::Directive {
        position: directive.position.clone(),
        message: message.into(),
    }
}

fn string_literal(expr: &Expr) -> Option<&str> {
    match &expr.kind {
        ExprKind::Literal(Value::String(s)) => Some(s),
        _ => None,
    }
}

/// Arguments of `directive`, all of which must be string literals.
fn string_args(directive: &Directive) -> LoadResult<Vec<FieldName>> {
    directive
        .args
        .iter()
        .map(|arg| {
            string_literal(arg).map(str::to_owned).ok_or_else(|| {
                directive_error(
                    directive,
                    format!("`@{}` takes string literal arguments", directive.name),
                )
            })
        })
        .collect()
}

fn configure(header: &[Directive], options: LoadOptions) -> LoadResult<Config> {
    let mut config = Config::new(options);
    let mut seen = HashSet::new();

    for directive in header {
        if !seen.insert(directive.name.as_str()) {
            return Err(directive_error(
                directive,
                format!("`@{}` is given more than once", directive.name),
            ));
        }
        let args = string_args(directive)?;
        match (directive.name.as_str(), args.len()) {
            ("case_insensitive", 0) => config.case_insensitive = true,
            ("reverse", 0) => config.reverse = true,
            ("default_field", 1) => config.default_field = args.into_iter().next(),
            ("output_fields", n) if n > 0 => config.output_fields = Some(args),
            ("case_insensitive" | "reverse", _) => {
                return Err(directive_error(
                    directive,
                    format!("`@{}` takes no arguments", directive.name),
                ))
            }
            ("default_field", _) => {
                return Err(directive_error(
                    directive,
                    "`@default_field` takes exactly one field name",
                ))
            }
            ("output_fields", _) => {
                return Err(directive_error(
                    directive,
                    "`@output_fields` takes at least one field name",
                ))
            }
            (name, _) => {
                return Err(directive_error(
                    directive,
                    format!("unknown directive `@{}`", name),
                ))
            }
        }
    }
    Ok(config)
}

/// Splices imports into the statement list.
struct Flattener<'a, R> {
    resolver: &'a R,
    /// Files currently being expanded, outermost first.
    chain: Vec<PathBuf>,
    active: HashSet<PathBuf>,
}

impl<'a, R: SourceResolver> Flattener<'a, R> {
    fn flatten(
        &mut self,
        statements: Vec<Statement>,
        dir: Option<&Path>,
        out: &mut Vec<Step>,
    ) -> LoadResult<()> {
        for statement in statements {
            match statement {
                Statement::Directive(directive) => self.directive(directive, dir, out)?,
                Statement::Assignment(assignment) => out.push(Step::Assignment(assignment)),
                Statement::Expression(expr) => out.push(Step::Expression(expr)),
                Statement::Rule(rule) => {
                    let mut arms = Vec::with_capacity(rule.branches.len());
                    for branch in rule.branches {
                        arms.push(Arm {
                            condition: branch.condition,
                            body: self.flatten_block(branch.body, dir)?,
                        });
                    }
                    let otherwise = match rule.otherwise {
                        Some(body) => Some(self.flatten_block(body, dir)?),
                        None => None,
                    };
                    out.push(Step::Rule { arms, otherwise });
                }
            }
        }
        Ok(())
    }

    fn flatten_block(
        &mut self,
        statements: Vec<Statement>,
        dir: Option<&Path>,
    ) -> LoadResult<Vec<Step>> {
        let mut out = Vec::with_capacity(statements.len());
        self.flatten(statements, dir, &mut out)?;
        Ok(out)
    }

    fn directive(
        &mut self,
        directive: Directive,
        dir: Option<&Path>,
        out: &mut Vec<Step>,
    ) -> LoadResult<()> {
        if !directive.inline {
            return Err(directive_error(
                &directive,
                format!(
                    "header directive `@{}` must come before the first statement",
                    directive.name
                ),
            ));
        }
        if directive.name != "import" {
            return Err(directive_error(
                &directive,
                format!("unknown directive `@@{}`", directive.name),
            ));
        }
        let path = match string_args(&directive)?.as_slice() {
            [path] => path.clone(),
            _ => {
                return Err(directive_error(
                    &directive,
                    "`@@import` takes exactly one path",
                ))
            }
        };
        self.import(&path, &directive.position, dir, out)
    }

    fn import(
        &mut self,
        path: &str,
        position: &Position,
        dir: Option<&Path>,
        out: &mut Vec<Step>,
    ) -> LoadResult<()> {
        let source = self
            .resolver
            .resolve(path, dir)
            .map_err(|source| LoadError::Import {
                path: path.to_owned(),
                position: position.clone(),
                source,
            })?;

        if self.active.contains(&source.id) {
            let mut chain = self.chain.clone();
            chain.push(source.id);
            return Err(LoadError::ImportCycle { chain });
        }
        debug!(import = %source.id.display(), at = %position, "resolving import");

        let file = parse_source(&source.text, &source.id.display().to_string())?;
        if let Some(first) = file.header.first() {
            warn!(
                import = %source.id.display(),
                at = %first.position,
                "ignoring header directives of imported program"
            );
        }

        self.chain.push(source.id.clone());
        self.active.insert(source.id.clone());
        let result = self.flatten(file.statements, source.id.parent(), out);
        self.active.remove(&source.id);
        self.chain.pop();
        result
    }
}

/// Rewrites and checks expressions once the configuration is known.
struct Preparer<'a> {
    config: &'a Config,
}

impl<'a> Preparer<'a> {
    fn step(&self, step: &mut Step) -> LoadResult<()> {
        match step {
            Step::Assignment(assignment) => self.expr(&mut assignment.expr),
            Step::Expression(expr) => self.expr(expr),
            Step::Rule { arms, otherwise } => {
                for arm in arms {
                    self.expr(&mut arm.condition)?;
                    self.block(&mut arm.body)?;
                }
                match otherwise {
                    Some(body) => self.block(body),
                    None => Ok(()),
                }
            }
        }
    }

    fn block(&self, steps: &mut [Step]) -> LoadResult<()> {
        steps.iter_mut().try_for_each(|step| self.step(step))
    }

    fn expr(&self, expr: &mut Expr) -> LoadResult<()> {
        match &mut expr.kind {
            ExprKind::Literal(Value::Regex(pattern)) if self.config.case_insensitive => {
                *pattern = Pattern::new(pattern.source(), true).map_err(|err| {
                    LoadError::Syntax {
                        position: expr.position.clone(),
                        message: err.to_string(),
                    }
                })?;
            }
            ExprKind::Literal(_) | ExprKind::Variable(_) => {}
            ExprKind::Call(name, args) => {
                let builtin =
                    builtins::lookup(name).ok_or_else(|| LoadError::UnknownFunction {
                        name: name.clone(),
                        position: expr.position.clone(),
                    })?;
                if !builtin.arity().accepts(args.len()) {
                    return Err(LoadError::Arity {
                        name: name.clone(),
                        expected: builtin.arity(),
                        found: args.len(),
                        position: expr.position.clone(),
                    });
                }
                for arg in args {
                    self.expr(arg)?;
                }
            }
            ExprKind::Unary(_, inner) => self.expr(inner)?,
            ExprKind::Binary(_, lhs, rhs)
            | ExprKind::Logical(_, lhs, rhs)
            | ExprKind::Comparison(_, lhs, rhs)
            | ExprKind::Match(lhs, rhs) => {
                self.expr(lhs)?;
                self.expr(rhs)?;
            }
            ExprKind::ImplicitMatch(pattern) => {
                let field = self.config.default_field.clone().ok_or_else(|| {
                    LoadError::MissingDefaultField {
                        position: expr.position.clone(),
                    }
                })?;
                self.expr(pattern)?;
                let subject = Expr::new(ExprKind::Variable(field), expr.position.clone());
                let pattern = mem::replace(
                    pattern,
                    Box::new(Expr::new(
                        ExprKind::Literal(Value::None),
                        expr.position.clone(),
                    )),
                );
                expr.kind = ExprKind::Match(Box::new(subject), pattern);
            }
        }
        Ok(())
    }
}
