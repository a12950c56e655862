use rayon::prelude::*;
use tracing::{debug, warn};

use crate::builtins::{LogSink, StderrSink};
use crate::error::{EvalResult, RecordError};
use crate::eval::Evaluator;
use crate::exec::Executor;
use crate::program::Program;
use crate::record::Record;

/// What happens to a record whose evaluation fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Stop the run and return the error.
    #[default]
    Abort,
    /// Leave the record out of the output.
    SkipRecord,
    /// Emit the record as it was before processing.
    KeepOriginal,
}

#[derive(Debug, Default)]
pub struct Output {
    pub records: Vec<Record>,
    /// Failures tolerated under a non-aborting policy, in emission order.
    pub errors: Vec<RecordError>,
}

/// Applies a loaded program to a sequence of records.
pub struct Pipeline<'a> {
    program: &'a Program,
    sink: &'a dyn LogSink,
    policy: ErrorPolicy,
}

impl<'a> Pipeline<'a> {
    pub fn new(program: &'a Program) -> Self {
        Self {
            program,
            sink: &StderrSink,
            policy: ErrorPolicy::default(),
        }
    }

    pub fn sink(mut self, sink: &'a dyn LogSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Runs every statement against one record.
    pub fn transform(&self, record: &mut Record) -> EvalResult<()> {
        let evaluator = Evaluator::new(self.program.config(), self.sink);
        Executor::new(evaluator).execute(self.program.steps(), record)
    }

    /// Processes records one at a time. Under [`ErrorPolicy::Abort`] the run
    /// stops at the first failing record, so no later record is evaluated.
    pub fn run(&self, records: Vec<Record>) -> Result<Output, RecordError> {
        let mut output = Output::default();
        for (index, record) in self.ordered(records) {
            self.accept(&mut output, self.process(index, record))?;
        }
        Ok(self.finish(output))
    }

    /// Like [`Pipeline::run`], but records are processed on the rayon pool.
    /// The output order is the same. An aborting run stops scheduling new
    /// records once one fails; records already in flight still complete, and
    /// when several fail the one reported is not necessarily the earliest.
    pub fn run_parallel(&self, records: Vec<Record>) -> Result<Output, RecordError> {
        let records = self.ordered(records).collect::<Vec<_>>();
        let mut output = Output::default();
        if self.policy == ErrorPolicy::Abort {
            output.records = records
                .into_par_iter()
                .map(|(index, record)| self.process(index, record))
                .collect::<Result<Vec<_>, _>>()?;
        } else {
            let results = records
                .into_par_iter()
                .map(|(index, record)| self.process(index, record))
                .collect::<Vec<_>>();
            for result in results {
                self.accept(&mut output, result)?;
            }
        }
        Ok(self.finish(output))
    }

    /// Input records tagged with their input index, in processing order.
    fn ordered(&self, records: Vec<Record>) -> Box<dyn Iterator<Item = (usize, Record)>> {
        let records = records.into_iter().enumerate();
        if self.program.config().reverse {
            Box::new(records.rev())
        } else {
            Box::new(records)
        }
    }

    fn process(&self, index: usize, mut record: Record) -> Result<Record, RecordError> {
        let original = record.clone();
        match self.transform(&mut record) {
            Ok(()) => Ok(record),
            Err(source) => Err(RecordError {
                index,
                record: original,
                source,
            }),
        }
    }

    /// Adds one processed record to `output` according to the policy.
    fn accept(
        &self,
        output: &mut Output,
        result: Result<Record, RecordError>,
    ) -> Result<(), RecordError> {
        match (result, self.policy) {
            (Ok(record), _) => output.records.push(record),
            (Err(err), ErrorPolicy::Abort) => return Err(err),
            (Err(err), ErrorPolicy::SkipRecord) => {
                warn!(index = err.index, error = %err.source, "skipping record");
                output.errors.push(err);
            }
            (Err(err), ErrorPolicy::KeepOriginal) => {
                warn!(index = err.index, error = %err.source, "keeping original record");
                output.records.push(err.record.clone());
                output.errors.push(err);
            }
        }
        Ok(())
    }

    fn finish(&self, output: Output) -> Output {
        debug!(
            emitted = output.records.len(),
            failed = output.errors.len(),
            "pipeline finished"
        );
        output
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::builtins::MemorySink;
    use crate::loader::Loader;
    use crate::resolve::MemoryResolver;

    fn program(code: &str) -> Program {
        Loader::with_resolver(MemoryResolver::new())
            .load_str(code, "test.edt", None)
            .unwrap()
    }

    fn records(values: &[&str]) -> Vec<Record> {
        values
            .iter()
            .map(|v| [("v", *v)].into_iter().collect())
            .collect()
    }

    #[test]
    fn test_reverse_keeps_input_index() {
        let program = program("@reverse\nout = v * 5");
        let sink = MemorySink::default();
        let pipeline = Pipeline::new(&program)
            .sink(&sink)
            .policy(ErrorPolicy::SkipRecord);
        let output = pipeline.run(records(&["1", "x", "2"])).unwrap();
        let outs: Vec<_> = output.records.iter().map(|r| r.get("out")).collect();
        assert_eq!(outs, vec!["10", "5"]);
        assert_eq!(output.errors.len(), 1);
        assert_eq!(output.errors[0].index, 1);
    }

    #[test]
    fn test_abort_stops_at_first_failure() {
        let program = program("out = v * 2");
        let sink = MemorySink::default();
        let err = Pipeline::new(&program)
            .sink(&sink)
            .run(records(&["1", "x", "y"]))
            .unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.record.get("v"), "x");
        assert!(!err.record.contains("out"));
    }

    #[test]
    fn test_abort_evaluates_nothing_after_failure() {
        let program = program("log(\"saw\", v)\nout = v * 2");
        let sink = MemorySink::default();
        let err = Pipeline::new(&program)
            .sink(&sink)
            .run(records(&["1", "x", "3", "4"]))
            .unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(sink.messages(), vec!["saw 1", "saw x"]);
    }

    #[test]
    fn test_parallel_abort_reports_a_failing_record() {
        let program = program("out = v * 2");
        let sink = MemorySink::default();
        let err = Pipeline::new(&program)
            .sink(&sink)
            .run_parallel(records(&["1", "x", "3", "y"]))
            .unwrap_err();
        assert!(err.index == 1 || err.index == 3, "index {}", err.index);
    }

    #[test]
    fn test_keep_original() {
        let program = program("out = v * 2\nv = \"changed\"");
        let sink = MemorySink::default();
        let output = Pipeline::new(&program)
            .sink(&sink)
            .policy(ErrorPolicy::KeepOriginal)
            .run(records(&["1", "x"]))
            .unwrap();
        assert_eq!(output.records.len(), 2);
        assert_eq!(output.records[0].get("v"), "changed");
        assert_eq!(output.records[1], records(&["x"])[0]);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let program = program(
            "if v % 3 == 0 then tag = \"fizz\" elif v % 5 == 0 then tag = \"buzz\" fi",
        );
        let input: Vec<Record> = (1..=200)
            .map(|n| [("v", n.to_string())].into_iter().collect())
            .collect();
        let sink = MemorySink::default();
        let pipeline = Pipeline::new(&program).sink(&sink);
        let sequential = pipeline.run(input.clone()).unwrap();
        let parallel = pipeline.run_parallel(input).unwrap();
        assert_eq!(sequential.records, parallel.records);
    }

    #[test]
    fn test_log_goes_to_sink() {
        let program = program("log(\"saw\", v)");
        let sink = MemorySink::default();
        Pipeline::new(&program)
            .sink(&sink)
            .run(records(&["a", "b"]))
            .unwrap();
        assert_eq!(sink.messages(), vec!["saw a", "saw b"]);
    }
}
