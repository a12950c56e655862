use std::borrow::BorrowMut;
use std::str::{Chars, FromStr};
use std::sync::Arc;

use bigdecimal::BigDecimal;
use pest::error::{ErrorVariant, LineColLocation};
use pest::Parser as _;
use pest_derive::Parser;

use crate::ast::{
    Assignment, BinaryOp, Branch, CompareOp, Directive, Expr, ExprKind, Identifier, LogicalOp,
    Position, Rule as RuleStatement, SourceFile, Statement, UnaryOp,
};
use crate::error::{LoadError, LoadResult};
use crate::value::{Pattern, Value};

#[derive(Parser)]
#[grammar = "edict.pest"]
struct Parser;

type Pair<'a> = pest::iterators::Pair<'a, Rule>;
type Pairs<'a> = pest::iterators::Pairs<'a, Rule>;

/// Name used in positions when a program is parsed from a bare string.
pub const ANONYMOUS_SOURCE: &str = "<program>";

pub fn parse(code: &str) -> LoadResult<SourceFile> {
    parse_source(code, ANONYMOUS_SOURCE)
}

/// Parses `code`, labelling every node position with `source`.
pub fn parse_source(code: &str, source: &str) -> LoadResult<SourceFile> {
    let builder = Builder {
        source: Arc::from(source),
    };
    let program = Parser::parse(Rule::program, code)
        .map_err(|err| builder.syntax_error(err))?
        .next()
        .expect("missing program");
    builder.source_file(program)
}

fn expect_next_rule<'a, P: BorrowMut<Pairs<'a>>>(mut pairs: P, expected: Rule) -> Pair<'a> {
    let pair = pairs.borrow_mut().next().expect("missing pair");
    assert_eq!(pair.as_rule(), expected);
    pair
}

fn describe_rule(r: &Rule) -> String {
    match r {
        Rule::EOI => "end of input",
        Rule::kw_if => "`if`",
        Rule::kw_then => "`then`",
        Rule::kw_elif => "`elif`",
        Rule::kw_else => "`else`",
        Rule::kw_fi => "`fi`",
        Rule::assign_op => "`=`",
        Rule::compare_op => "comparison operator",
        Rule::add_op | Rule::mul_op => "operator",
        Rule::call_args => "argument list",
        Rule::bare_identifier | Rule::brace_identifier | Rule::variable => "field name",
        Rule::string => "string",
        Rule::number => "number",
        Rule::regex => "regex",
        Rule::expr | Rule::and_expr | Rule::not_expr | Rule::comparison => "expression",
        Rule::rule | Rule::if_branch => "rule",
        Rule::assignment => "assignment",
        Rule::header_directive | Rule::inline_directive => "directive",
        other => return format!("{:?}", other),
    }
    .to_owned()
}

struct Builder {
    source: Arc<str>,
}

impl Builder {
    fn position(&self, pair: &Pair) -> Position {
        let (line, column) = pair.as_span().start_pos().line_col();
        Position {
            source: self.source.clone(),
            line,
            column,
        }
    }

    fn syntax_error(&self, err: pest::error::Error<Rule>) -> LoadError {
        let err = err.renamed_rules(describe_rule);
        let (line, column) = match &err.line_col {
            LineColLocation::Pos(pos) => *pos,
            LineColLocation::Span(start, _) => *start,
        };
        let message = match err.variant {
            ErrorVariant::CustomError { message } => message,
            ErrorVariant::ParsingError { positives, .. } => format!(
                "expected {}",
                positives.iter().map(describe_rule).collect::<Vec<_>>().join(" or ")
            ),
        };
        LoadError::Syntax {
            position: Position {
                source: self.source.clone(),
                line,
                column,
            },
            message,
        }
    }

    fn error_at(&self, pair: &Pair, message: impl Into<String>) -> LoadError {
        LoadError::Syntax {
            position: self.position(pair),
            message: message.into(),
        }
    }

    fn source_file(&self, pair: Pair) -> LoadResult<SourceFile> {
        let mut pairs = pair.into_inner();
        let header = expect_next_rule(&mut pairs, Rule::header)
            .into_inner()
            .map(|pair| self.directive(pair))
            .collect::<LoadResult<_>>()?;
        let statements = self.statements(expect_next_rule(&mut pairs, Rule::statements))?;
        Ok(SourceFile { header, statements })
    }

    fn statements(&self, pair: Pair) -> LoadResult<Vec<Statement>> {
        pair.into_inner()
            .map(|pair| self.statement(pair))
            .collect()
    }

    fn statement(&self, pair: Pair) -> LoadResult<Statement> {
        match pair.as_rule() {
            Rule::rule => self.rule(pair).map(Statement::Rule),
            Rule::assignment => self.assignment(pair).map(Statement::Assignment),
            Rule::call => self.call(pair).map(Statement::Expression),
            Rule::inline_directive | Rule::header_directive => {
                self.directive(pair).map(Statement::Directive)
            }
            _ => unreachable!(),
        }
    }

    fn directive(&self, pair: Pair) -> LoadResult<Directive> {
        let position = self.position(&pair);
        let inline = pair.as_rule() == Rule::inline_directive;
        let mut pairs = pair.into_inner();
        let name = expect_next_rule(&mut pairs, Rule::bare_identifier)
            .as_str()
            .to_owned();
        let args = match pairs.next() {
            Some(args) => self.call_args(args)?,
            None => vec![],
        };
        Ok(Directive {
            name,
            args,
            inline,
            position,
        })
    }

    fn rule(&self, pair: Pair) -> LoadResult<RuleStatement> {
        let mut branches = vec![];
        let mut otherwise = None;

        for pair in pair.into_inner() {
            match pair.as_rule() {
                Rule::if_branch | Rule::elif_branch => {
                    let mut pairs = pair.into_inner();
                    pairs.next();
                    let condition = self.expr(pairs.next().expect("missing condition"))?;
                    expect_next_rule(&mut pairs, Rule::kw_then);
                    let body = self.statements(expect_next_rule(&mut pairs, Rule::block))?;
                    branches.push(Branch {
                        condition: condition.into_condition(),
                        body,
                    });
                }
                Rule::else_branch => {
                    let mut pairs = pair.into_inner();
                    expect_next_rule(&mut pairs, Rule::kw_else);
                    otherwise = Some(self.statements(expect_next_rule(&mut pairs, Rule::block))?);
                }
                Rule::kw_fi => {}
                _ => unreachable!(),
            }
        }

        Ok(RuleStatement {
            branches,
            otherwise,
        })
    }

    fn assignment(&self, pair: Pair) -> LoadResult<Assignment> {
        let position = self.position(&pair);
        let mut pairs = pair.into_inner();
        let field = self.identifier(pairs.next().expect("missing field"))?;
        expect_next_rule(&mut pairs, Rule::assign_op);
        let expr = self.expr(expect_next_rule(&mut pairs, Rule::expr))?;
        Ok(Assignment {
            field,
            expr,
            position,
        })
    }

    fn identifier(&self, pair: Pair) -> LoadResult<Identifier> {
        match pair.as_rule() {
            Rule::bare_identifier => Ok(pair.as_str().to_owned()),
            Rule::brace_identifier => {
                let chars = expect_next_rule(pair.clone().into_inner(), Rule::brace_chars);
                unescape(chars.as_str(), false).map_err(|message| self.error_at(&pair, message))
            }
            _ => unreachable!(),
        }
    }

    fn call(&self, pair: Pair) -> LoadResult<Expr> {
        let position = self.position(&pair);
        let mut pairs = pair.into_inner();
        let name = expect_next_rule(&mut pairs, Rule::bare_identifier)
            .as_str()
            .to_owned();
        let args = self.call_args(expect_next_rule(&mut pairs, Rule::call_args))?;
        Ok(Expr::new(ExprKind::Call(name, args), position))
    }

    fn call_args(&self, pair: Pair) -> LoadResult<Vec<Expr>> {
        assert_eq!(pair.as_rule(), Rule::call_args);
        pair.into_inner().map(|pair| self.expr(pair)).collect()
    }

    fn expr(&self, pair: Pair) -> LoadResult<Expr> {
        assert_eq!(pair.as_rule(), Rule::expr);
        self.logical(pair, LogicalOp::Or, Self::and_expr)
    }

    fn and_expr(&self, pair: Pair) -> LoadResult<Expr> {
        self.logical(pair, LogicalOp::And, Self::not_expr)
    }

    /// Left-folds the operands of `pair` with `op`. Operands of a logical
    /// operator are boolean positions, so bare patterns become implicit
    /// matches there.
    fn logical(
        &self,
        pair: Pair,
        op: LogicalOp,
        operand: fn(&Self, Pair) -> LoadResult<Expr>,
    ) -> LoadResult<Expr> {
        let position = self.position(&pair);
        let mut pairs = pair.into_inner().peekable();
        let mut acc = operand(self, pairs.next().expect("missing operand"))?;
        if pairs.peek().is_none() {
            return Ok(acc);
        }
        acc = acc.into_condition();
        for pair in pairs {
            let rhs = operand(self, pair)?.into_condition();
            acc = Expr::new(
                ExprKind::Logical(op, Box::new(acc), Box::new(rhs)),
                position.clone(),
            );
        }
        Ok(acc)
    }

    fn not_expr(&self, pair: Pair) -> LoadResult<Expr> {
        let mut nots = vec![];
        let mut comparison = None;
        for pair in pair.into_inner() {
            match pair.as_rule() {
                Rule::not_op => nots.push(self.position(&pair)),
                Rule::comparison => comparison = Some(self.comparison(pair)?),
                _ => unreachable!(),
            }
        }
        let mut acc = comparison.expect("missing comparison");
        for position in nots.into_iter().rev() {
            acc = Expr::new(
                ExprKind::Unary(UnaryOp::Not, Box::new(acc.into_condition())),
                position,
            );
        }
        Ok(acc)
    }

    fn comparison(&self, pair: Pair) -> LoadResult<Expr> {
        let position = self.position(&pair);
        let mut pairs = pair.into_inner();
        let lhs = self.sum(expect_next_rule(&mut pairs, Rule::sum))?;
        let op = match pairs.next() {
            Some(op) => op,
            None => return Ok(lhs),
        };
        let rhs = Box::new(self.sum(expect_next_rule(&mut pairs, Rule::sum))?);
        let lhs = Box::new(lhs);
        let kind = match op.as_str() {
            "~" => ExprKind::Match(lhs, rhs),
            "==" => ExprKind::Comparison(CompareOp::Eq, lhs, rhs),
            "!=" => ExprKind::Comparison(CompareOp::Ne, lhs, rhs),
            "<" => ExprKind::Comparison(CompareOp::Lt, lhs, rhs),
            "<=" => ExprKind::Comparison(CompareOp::Le, lhs, rhs),
            ">" => ExprKind::Comparison(CompareOp::Gt, lhs, rhs),
            ">=" => ExprKind::Comparison(CompareOp::Ge, lhs, rhs),
            _ => unreachable!(),
        };
        Ok(Expr::new(kind, position))
    }

    fn sum(&self, pair: Pair) -> LoadResult<Expr> {
        self.binary_chain(pair, Self::product)
    }

    fn product(&self, pair: Pair) -> LoadResult<Expr> {
        self.binary_chain(pair, Self::unary)
    }

    fn binary_chain(
        &self,
        pair: Pair,
        operand: fn(&Self, Pair) -> LoadResult<Expr>,
    ) -> LoadResult<Expr> {
        let mut pairs = pair.into_inner();
        let mut acc = operand(self, pairs.next().expect("missing operand"))?;
        while let Some(op) = pairs.next() {
            let position = self.position(&op);
            let op = match op.as_str() {
                "+" => BinaryOp::Add,
                "-" => BinaryOp::Sub,
                "." => BinaryOp::Concat,
                "*" => BinaryOp::Mul,
                "/" => BinaryOp::Div,
                "%" => BinaryOp::Rem,
                _ => unreachable!(),
            };
            let rhs = operand(self, pairs.next().expect("missing operand"))?;
            acc = Expr::new(ExprKind::Binary(op, Box::new(acc), Box::new(rhs)), position);
        }
        Ok(acc)
    }

    fn unary(&self, pair: Pair) -> LoadResult<Expr> {
        let mut ops = vec![];
        let mut primary = None;
        for pair in pair.into_inner() {
            if pair.as_rule() == Rule::unary_op {
                let op = if pair.as_str() == "-" {
                    UnaryOp::Minus
                } else {
                    UnaryOp::Plus
                };
                ops.push((op, self.position(&pair)));
            } else {
                primary = Some(self.primary(pair)?);
            }
        }
        let mut acc = primary.expect("missing primary");
        for (op, position) in ops.into_iter().rev() {
            acc = Expr::new(ExprKind::Unary(op, Box::new(acc)), position);
        }
        Ok(acc)
    }

    fn primary(&self, pair: Pair) -> LoadResult<Expr> {
        let position = self.position(&pair);
        let kind = match pair.as_rule() {
            Rule::expr => return self.expr(pair),
            Rule::call => return self.call(pair),
            Rule::variable => {
                let inner = pair.into_inner().next().expect("missing identifier");
                ExprKind::Variable(self.identifier(inner)?)
            }
            Rule::boolean => ExprKind::Literal(Value::Boolean(pair.as_str() == "true")),
            Rule::number => {
                let number = BigDecimal::from_str(pair.as_str())
                    .map_err(|err| self.error_at(&pair, format!("invalid number: {}", err)))?;
                ExprKind::Literal(Value::Number(number))
            }
            Rule::string => {
                let chars = pair.clone().into_inner().next().expect("missing string body");
                let text = unescape(chars.as_str(), true)
                    .map_err(|message| self.error_at(&pair, message))?;
                ExprKind::Literal(Value::String(text))
            }
            Rule::regex => {
                let chars = expect_next_rule(pair.clone().into_inner(), Rule::regex_chars);
                let pattern = Pattern::new(&unescape_regex(chars.as_str()), false)
                    .map_err(|err| self.error_at(&pair, format!("invalid regex: {}", err)))?;
                ExprKind::Literal(Value::Regex(pattern))
            }
            _ => unreachable!(),
        };
        Ok(Expr::new(kind, position))
    }
}

/// Decodes the escapes shared by quoted strings and brace identifiers.
/// Quoted strings may additionally escape their quote characters.
fn unescape(text: &str, quoted: bool) -> Result<String, String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let escaped = chars
            .next()
            .ok_or_else(|| "dangling backslash".to_owned())?;
        let decoded = match escaped {
            '\\' => '\\',
            '}' => '}',
            'a' => '\x07',
            'b' => '\x08',
            'f' => '\x0c',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'v' => '\x0b',
            '"' | '\'' if quoted => escaped,
            'x' => hex_escape(&mut chars, 2)?,
            'u' => hex_escape(&mut chars, 4)?,
            'U' => hex_escape(&mut chars, 8)?,
            other => return Err(format!("invalid escape sequence `\\{}`", other)),
        };
        out.push(decoded);
    }
    Ok(out)
}

fn hex_escape(chars: &mut Chars, digits: usize) -> Result<char, String> {
    let hex: String = chars.by_ref().take(digits).collect();
    if hex.chars().count() != digits || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!(
            "malformed escape `{}`: expected {} hex digits",
            hex, digits
        ));
    }
    let code = u32::from_str_radix(&hex, 16).map_err(|err| err.to_string())?;
    char::from_u32(code).ok_or_else(|| format!("`{}` is not a valid character", hex))
}

/// Regex literals only unescape `\/`; every other sequence belongs to the
/// regex engine.
fn unescape_regex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('/') => out.push('/'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
