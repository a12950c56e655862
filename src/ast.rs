use std::fmt;
use std::sync::Arc;

use crate::value::Value;

pub type Identifier = String;
pub type FieldName = Identifier;
pub type FunctionName = Identifier;

/// Where a node starts in its source text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Position {
    pub source: Arc<str>,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.source, self.line, self.column)
    }
}

#[derive(Clone, Debug)]
pub struct SourceFile {
    pub header: Vec<Directive>,
    pub statements: Vec<Statement>,
}

#[derive(Clone, Debug)]
pub struct Directive {
    pub name: Identifier,
    pub args: Vec<Expr>,
    pub inline: bool,
    pub position: Position,
}

#[derive(Clone, Debug)]
pub enum Statement {
    Assignment(Assignment),
    Rule(Rule),
    Expression(Expr),
    /// `@@name(...)`, or a `@name(...)` header directive that appears after
    /// the first statement. Neither survives loading.
    Directive(Directive),
}

#[derive(Clone, Debug)]
pub struct Assignment {
    pub field: FieldName,
    pub expr: Expr,
    pub position: Position,
}

#[derive(Clone, Debug)]
pub struct Rule {
    pub branches: Vec<Branch>,
    pub otherwise: Option<Vec<Statement>>,
}

#[derive(Clone, Debug)]
pub struct Branch {
    pub condition: Expr,
    pub body: Vec<Statement>,
}

#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub position: Position,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Literal(Value),
    Variable(FieldName),
    Call(FunctionName, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Comparison(CompareOp, Box<Expr>, Box<Expr>),
    Match(Box<Expr>, Box<Expr>),
    /// A bare pattern in a boolean position; the loader rewrites it into a
    /// `Match` against the default field.
    ImplicitMatch(Box<Expr>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Concat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Concat => ".",
        })
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        })
    }
}

impl Expr {
    pub fn new(kind: ExprKind, position: Position) -> Self {
        Self { kind, position }
    }

    /// Wraps a bare string or regex literal standing where a boolean is
    /// expected into an implicit match.
    pub fn into_condition(self) -> Self {
        match self.kind {
            ExprKind::Literal(Value::String(_)) | ExprKind::Literal(Value::Regex(_)) => {
                let position = self.position.clone();
                Expr::new(ExprKind::ImplicitMatch(Box::new(self)), position)
            }
            _ => self,
        }
    }
}
