//! Expression evaluation against a single record.
//!
//! Sub-expressions evaluate to an [`Operand`], so a field read keeps its
//! open type until the operator consuming it picks STRING or NUMBER.

use std::borrow::Cow;
use std::cmp::Ordering;

use bigdecimal::BigDecimal;

use crate::ast::{BinaryOp, CompareOp, Expr, ExprKind, LogicalOp, UnaryOp};
use crate::builtins::{self, Invocation, LogSink};
use crate::error::{EvalErrorKind, EvalResult};
use crate::program::{Config, StringMatch};
use crate::record::Record;
use crate::value::{Operand, Value, ValueType};

#[derive(Clone, Copy)]
pub struct Evaluator<'a> {
    config: &'a Config,
    sink: &'a dyn LogSink,
}

impl<'a> Evaluator<'a> {
    pub fn new(config: &'a Config, sink: &'a dyn LogSink) -> Self {
        Self { config, sink }
    }

    pub fn config(&self) -> &'a Config {
        self.config
    }

    pub fn evaluate(&self, expr: &Expr, record: &Record) -> EvalResult<Value> {
        self.operand(expr, record).map(Operand::into_value)
    }

    /// Evaluates an expression that must produce a BOOLEAN.
    pub fn condition(&self, expr: &Expr, record: &Record) -> EvalResult<bool> {
        self.operand(expr, record)?
            .into_boolean()
            .map_err(|kind| kind.at(&expr.position))
    }

    pub fn operand(&self, expr: &Expr, record: &Record) -> EvalResult<Operand> {
        let at = |kind: EvalErrorKind| kind.at(&expr.position);
        match &expr.kind {
            ExprKind::Literal(value) => Ok(Operand::Value(value.clone())),
            ExprKind::Variable(name) => Ok(Operand::Field {
                name: name.clone(),
                text: record.get(name).to_owned(),
            }),
            ExprKind::Call(name, args) => self.call(expr, name, args, record),
            ExprKind::Unary(op, inner) => {
                let inner = self.operand(inner, record)?;
                unary(*op, inner).map(Operand::Value).map_err(at)
            }
            ExprKind::Binary(op, lhs, rhs) => {
                let lhs = self.operand(lhs, record)?;
                let rhs = self.operand(rhs, record)?;
                binary(*op, lhs, rhs).map(Operand::Value).map_err(at)
            }
            ExprKind::Logical(op, lhs, rhs) => {
                let lhs = self.condition(lhs, record)?;
                let result = match (op, lhs) {
                    (LogicalOp::And, false) => false,
                    (LogicalOp::Or, true) => true,
                    _ => self.condition(rhs, record)?,
                };
                Ok(Operand::Value(Value::Boolean(result)))
            }
            ExprKind::Comparison(op, lhs, rhs) => {
                let lhs = self.operand(lhs, record)?;
                let rhs = self.operand(rhs, record)?;
                compare(*op, lhs, rhs)
                    .map(|b| Operand::Value(Value::Boolean(b)))
                    .map_err(at)
            }
            ExprKind::Match(subject, pattern) => {
                let subject = self.operand(subject, record)?;
                let pattern = self.operand(pattern, record)?;
                self.matches(subject, pattern)
                    .map(|b| Operand::Value(Value::Boolean(b)))
                    .map_err(at)
            }
            // The loader rewrites every implicit match into a `Match` on the
            // default field.
            ExprKind::ImplicitMatch(_) => unreachable!("implicit match survived loading"),
        }
    }

    fn call(&self, expr: &Expr, name: &str, args: &[Expr], record: &Record) -> EvalResult<Operand> {
        let builtin = builtins::lookup(name)
            .ok_or_else(|| EvalErrorKind::UnknownFunction(name.to_owned()).at(&expr.position))?;

        let mut values = Vec::with_capacity(args.len());
        for (index, arg) in args.iter().enumerate() {
            let operand = self.operand(arg, record)?;
            let operand = builtin
                .param(index)
                .accept(operand)
                .map_err(|kind| kind.at(&arg.position))?;
            values.push(operand);
        }

        let invocation = Invocation {
            config: self.config,
            record,
            sink: self.sink,
        };
        (builtin.call)(&invocation, values)
            .map(Operand::Value)
            .map_err(|kind| kind.at(&expr.position))
    }

    fn matches(&self, subject: Operand, pattern: Operand) -> Result<bool, EvalErrorKind> {
        let subject = subject.into_string()?;
        let needle = match pattern {
            Operand::Value(Value::Regex(pattern)) => return Ok(pattern.is_match(&subject)),
            other => other.into_string()?,
        };

        let (subject, needle) = if self.config.case_insensitive {
            (
                Cow::Owned(subject.to_lowercase()),
                Cow::Owned(needle.to_lowercase()),
            )
        } else {
            (Cow::Borrowed(subject.as_str()), Cow::Borrowed(needle.as_str()))
        };
        Ok(match self.config.string_match {
            StringMatch::Contains => subject.contains(needle.as_ref()),
            StringMatch::Exact => subject == needle,
        })
    }
}

fn unary(op: UnaryOp, operand: Operand) -> Result<Value, EvalErrorKind> {
    match op {
        UnaryOp::Plus => operand.into_number().map(Value::Number),
        UnaryOp::Minus => operand.into_number().map(|n| Value::Number(-n)),
        UnaryOp::Not => operand.into_boolean().map(|b| Value::Boolean(!b)),
    }
}

fn binary(op: BinaryOp, lhs: Operand, rhs: Operand) -> Result<Value, EvalErrorKind> {
    if op == BinaryOp::Concat {
        let mut lhs = lhs.into_string()?;
        lhs.push_str(&rhs.into_string()?);
        return Ok(Value::String(lhs));
    }

    let (lhs, rhs) = (lhs.into_number()?, rhs.into_number()?);
    let result = match op {
        BinaryOp::Add => lhs + rhs,
        BinaryOp::Sub => lhs - rhs,
        BinaryOp::Mul => lhs * rhs,
        BinaryOp::Div | BinaryOp::Rem if rhs == BigDecimal::from(0) => {
            return Err(EvalErrorKind::DivisionByZero)
        }
        BinaryOp::Div => lhs / rhs,
        _ => lhs % rhs,
    };
    Ok(Value::Number(result))
}

/// Picks the type both sides are compared as: STRING for two field reads,
/// otherwise the type of the strongly typed side.
fn comparison_type(
    op: CompareOp,
    lhs: &Operand,
    rhs: &Operand,
) -> Result<ValueType, EvalErrorKind> {
    match (lhs.strong_type(), rhs.strong_type()) {
        (None, None) => Ok(ValueType::String),
        (Some(t), None) | (None, Some(t)) => Ok(t),
        (Some(l), Some(r)) if l == r => Ok(l),
        (Some(l), Some(r)) => Err(EvalErrorKind::Type(format!(
            "cannot compare {} {} {}",
            l, op, r
        ))),
    }
}

fn compare(op: CompareOp, lhs: Operand, rhs: Operand) -> Result<bool, EvalErrorKind> {
    let target = comparison_type(op, &lhs, &rhs)?;
    let (lhs, rhs) = (lhs.resolve(target)?, rhs.resolve(target)?);
    let ordering = match (&lhs, &rhs) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => a.cmp(b),
        (Value::Boolean(a), Value::Boolean(b)) if matches!(op, CompareOp::Eq | CompareOp::Ne) => {
            a.cmp(b)
        }
        _ => {
            return Err(EvalErrorKind::Type(format!(
                "{} values do not support `{}`",
                target, op
            )))
        }
    };
    Ok(match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ast::Position;
    use crate::builtins::MemorySink;
    use crate::loader::Loader;
    use crate::program::{Program, Step};
    use crate::resolve::MemoryResolver;

    fn load(code: &str) -> Program {
        Loader::with_resolver(MemoryResolver::new())
            .load_str(code, "test.edt", None)
            .unwrap()
    }

    /// Loads `code` as the right-hand side of an assignment.
    fn assigned(code: &str) -> Program {
        load(&format!("__value = {}", code))
    }

    fn expression(program: &Program) -> &Expr {
        match program.steps().last() {
            Some(Step::Assignment(assignment)) => &assignment.expr,
            other => panic!("expected an assignment, got {:?}", other),
        }
    }

    fn record() -> Record {
        [
            ("amount", "-20.00"),
            ("payee", "Moe's Tavern"),
            ("memo", ""),
            ("count", "3"),
        ]
        .into_iter()
        .collect()
    }

    fn eval_with(config: &Config, code: &str) -> EvalResult<Value> {
        let sink = MemorySink::default();
        Evaluator::new(config, &sink).evaluate(expression(&assigned(code)), &record())
    }

    fn eval(code: &str) -> EvalResult<Value> {
        eval_with(&Config::default(), code)
    }

    fn kind(code: &str) -> EvalErrorKind {
        eval(code).unwrap_err().kind
    }

    #[test]
    fn test_exact_decimal_sum() {
        assert_eq!(eval("0.1 + 0.2 == 0.3"), Ok(Value::Boolean(true)));
    }

    #[test]
    fn test_field_cast_follows_literal() {
        assert_eq!(eval("amount < 0"), Ok(Value::Boolean(true)));
        assert_eq!(eval("amount == \"-20.00\""), Ok(Value::Boolean(true)));
        assert_eq!(eval("amount == -20"), Ok(Value::Boolean(true)));
        assert_eq!(eval("amount == \"-20\""), Ok(Value::Boolean(false)));
    }

    #[test]
    fn test_two_fields_compare_as_strings() {
        // "10" < "9" only holds as text.
        let record: Record = [("a", "10"), ("b", "9")].into_iter().collect();
        let config = Config::default();
        let sink = MemorySink::default();
        let program = assigned("a < b");
        let result = Evaluator::new(&config, &sink).evaluate(expression(&program), &record);
        assert_eq!(result, Ok(Value::Boolean(true)));
    }

    #[test]
    fn test_missing_field_reads_empty() {
        assert_eq!(eval("nonexistent == \"\""), Ok(Value::Boolean(true)));
        assert_eq!(eval("memo . \"x\""), Ok(Value::String("x".into())));
    }

    #[test]
    fn test_cast_failure() {
        assert!(matches!(
            kind("payee + 1"),
            EvalErrorKind::Cast { field: Some(f), .. } if f == "payee"
        ));
    }

    #[test]
    fn test_no_coercion_between_strong_types() {
        assert!(matches!(kind("\"abc\" . 1"), EvalErrorKind::Type(_)));
        assert!(matches!(kind("1 == \"1\""), EvalErrorKind::Type(_)));
        assert!(matches!(kind("true < false"), EvalErrorKind::Type(_)));
        assert!(matches!(kind("!amount"), EvalErrorKind::Type(_)));
        assert!(matches!(kind("/x/ . \"y\""), EvalErrorKind::Type(_)));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(
            eval("count * 2 - -1"),
            Ok(Value::Number(BigDecimal::from(7)))
        );
        assert_eq!(eval("7 % 4"), Ok(Value::Number(BigDecimal::from(3))));
        assert_eq!(kind("1 / (count - 3)"), EvalErrorKind::DivisionByZero);
        assert_eq!(eval("\"a\" . payee"), Ok(Value::String("aMoe's Tavern".into())));
    }

    #[test]
    fn test_short_circuit() {
        // The right-hand sides would fail to cast if they were evaluated.
        assert_eq!(eval("false & payee > 1"), Ok(Value::Boolean(false)));
        assert_eq!(eval("true | payee > 1"), Ok(Value::Boolean(true)));
        assert!(matches!(kind("true & payee > 1"), EvalErrorKind::Cast { .. }));
    }

    #[test]
    fn test_string_and_regex_match() {
        assert_eq!(eval("payee ~ \"Tavern\""), Ok(Value::Boolean(true)));
        assert_eq!(eval("payee ~ /^Moe/"), Ok(Value::Boolean(true)));
        assert_eq!(eval("payee ~ /^Tavern/"), Ok(Value::Boolean(false)));
        assert_eq!(eval("payee ~ \"tavern\""), Ok(Value::Boolean(false)));
    }

    #[test]
    fn test_case_insensitive_string_match() {
        let config = Config {
            case_insensitive: true,
            ..Config::default()
        };
        assert_eq!(
            eval_with(&config, "payee ~ \"MOE'S\""),
            Ok(Value::Boolean(true))
        );
        assert_eq!(
            eval_with(&config, "payee == \"moe's tavern\""),
            Ok(Value::Boolean(false))
        );
    }

    #[test]
    fn test_exact_string_match() {
        let config = Config {
            string_match: StringMatch::Exact,
            ..Config::default()
        };
        assert_eq!(eval_with(&config, "payee ~ \"Moe\""), Ok(Value::Boolean(false)));
        assert_eq!(
            eval_with(&config, "payee ~ \"Moe's Tavern\""),
            Ok(Value::Boolean(true))
        );
    }

    #[test]
    fn test_implicit_match_uses_default_field() {
        let program = load("@default_field(\"payee\")\n__value = !\"Tavern\"");
        let sink = MemorySink::default();
        let result =
            Evaluator::new(program.config(), &sink).evaluate(expression(&program), &record());
        assert_eq!(result, Ok(Value::Boolean(false)));
    }

    #[test]
    fn test_builtin_call_casts_arguments() {
        assert_eq!(
            eval("substring(payee, 0, count)"),
            Ok(Value::String("Moe".into()))
        );
        assert_eq!(
            eval("as_number(\"1,000\") + 1"),
            Ok(Value::Number(BigDecimal::from(1001)))
        );
    }

    #[test]
    fn test_unknown_function_in_hand_built_expr() {
        let position = Position {
            source: "built".into(),
            line: 1,
            column: 1,
        };
        let call = Expr::new(ExprKind::Call("nope".into(), vec![]), position);
        let config = Config::default();
        let sink = MemorySink::default();
        let err = Evaluator::new(&config, &sink)
            .evaluate(&call, &record())
            .unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::UnknownFunction("nope".into()));
    }

    #[test]
    fn test_error_position_points_at_operator_site() {
        let err = eval("1 +\n  payee * 2").unwrap_err();
        assert_eq!(err.position.line, 2);
    }
}
