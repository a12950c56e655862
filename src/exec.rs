use crate::ast::Assignment;
use crate::error::{EvalErrorKind, EvalResult};
use crate::eval::Evaluator;
use crate::program::{Arm, Step};
use crate::record::Record;
use crate::value::Operand;

/// Runs loaded steps in order against one record, mutating it in place.
pub struct Executor<'a> {
    evaluator: Evaluator<'a>,
}

impl<'a> Executor<'a> {
    pub fn new(evaluator: Evaluator<'a>) -> Self {
        Self { evaluator }
    }

    pub fn execute(&self, steps: &[Step], record: &mut Record) -> EvalResult<()> {
        for step in steps {
            self.step(step, record)?;
        }
        Ok(())
    }

    fn step(&self, step: &Step, record: &mut Record) -> EvalResult<()> {
        match step {
            Step::Assignment(assignment) => self.assign(assignment, record),
            Step::Rule { arms, otherwise } => self.rule(arms, otherwise.as_deref(), record),
            Step::Expression(expr) => self.evaluator.evaluate(expr, record).map(drop),
        }
    }

    fn assign(&self, assignment: &Assignment, record: &mut Record) -> EvalResult<()> {
        let text = match self.evaluator.operand(&assignment.expr, record)? {
            Operand::Field { text, .. } => text,
            Operand::Value(value) => value.into_field_string().map_err(|kind| {
                let kind = match kind {
                    EvalErrorKind::Type(message) => EvalErrorKind::Type(format!(
                        "cannot assign to `{}`: {}",
                        assignment.field, message
                    )),
                    other => other,
                };
                kind.at(&assignment.position)
            })?,
        };
        record.set(assignment.field.as_str(), text);
        Ok(())
    }

    /// Runs the body of the first branch whose condition holds, or the
    /// `else` block when none does.
    fn rule(
        &self,
        arms: &[Arm],
        otherwise: Option<&[Step]>,
        record: &mut Record,
    ) -> EvalResult<()> {
        for arm in arms {
            if self.evaluator.condition(&arm.condition, record)? {
                return self.execute(&arm.body, record);
            }
        }
        match otherwise {
            Some(body) => self.execute(body, record),
            None => Ok(()),
        }
    }
}
