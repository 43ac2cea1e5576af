//! The task contract and the skip/rerun lifecycle built on top of it.

use std::collections::BTreeMap;
use std::time::{Instant, SystemTime};

use crate::error::{ConfigError, TasukiError};
use crate::param::{LogValue, Parameter};
use crate::record::{Position, TaskRecord};

/// Result from a user-supplied task callback.
pub type TaskResult<T> = anyhow::Result<T, anyhow::Error>;

/// Opaque report returned by an action, persisted on the task's record.
pub type Report = Option<String>;

/// Outcome of a success predicate. A collection counts as success only when
/// every element holds.
pub enum Verdict {
    Pass(bool),
    All(Vec<bool>),
}

impl Verdict {
    pub(crate) fn holds(&self) -> bool {
        match self {
            Verdict::Pass(ok) => *ok,
            Verdict::All(checks) => checks.iter().all(|ok| *ok),
        }
    }
}

impl From<bool> for Verdict {
    fn from(ok: bool) -> Self {
        Verdict::Pass(ok)
    }
}

impl From<Vec<bool>> for Verdict {
    fn from(checks: Vec<bool>) -> Self {
        Verdict::All(checks)
    }
}

/// A unit of work with declared inputs and outputs.
///
/// The engine decides per run whether the task needs to execute at all: it
/// runs when it has no usable record from the previous run, when its last run
/// didn't succeed, or when any declared input or output fingerprint differs
/// from the recorded one. Otherwise it is skipped.
///
/// ```
/// use tasuki::{FileStamp, Parameter, Task, TaskResult, Value, Verdict};
///
/// struct Compress {
///     source: String,
///     target: String,
/// }
///
/// impl Task for Compress {
///     fn kind(&self) -> &'static str {
///         "compress"
///     }
///
///     fn input(&mut self) -> TaskResult<Vec<Box<dyn Parameter>>> {
///         Ok(vec![Box::new(FileStamp::new("source", &self.source)?)])
///     }
///
///     fn output(&mut self) -> TaskResult<Vec<Box<dyn Parameter>>> {
///         Ok(vec![Box::new(FileStamp::new("target", &self.target)?)])
///     }
///
///     fn action(&mut self) -> TaskResult<Option<String>> {
///         // compress source into target
///         Ok(None)
///     }
///
///     fn success(&mut self) -> Verdict {
///         std::path::Path::new(&self.target).is_file().into()
///     }
/// }
/// ```
pub trait Task: Send {
    /// Stable identity tag for this task implementation. Compared against the
    /// stored record's kind; a mismatch at the same tree position discards the
    /// record and forces a rerun.
    fn kind(&self) -> &'static str;

    /// Runs before the inputs are declared, outside the change-detection
    /// window.
    fn before(&mut self) {}

    /// Declared input parameters. Names must be unique within the set.
    fn input(&mut self) -> TaskResult<Vec<Box<dyn Parameter>>> {
        Ok(Vec::new())
    }

    /// Declared output parameters. Names must be unique within the set.
    fn output(&mut self) -> TaskResult<Vec<Box<dyn Parameter>>> {
        Ok(Vec::new())
    }

    /// The work itself. An error here fails the task exactly like a negative
    /// verdict, and is additionally surfaced in the run outcome.
    fn action(&mut self) -> TaskResult<Report>;

    /// Checked after the action completes without error.
    fn success(&mut self) -> Verdict {
        Verdict::Pass(true)
    }

    /// Runs last, whether the task was skipped or rerun.
    fn after(&mut self) {}
}

/// Declared parameters of one task, keyed by name, declaration order kept.
struct ParamSet {
    params: Vec<Box<dyn Parameter>>,
}

impl ParamSet {
    fn new(params: Vec<Box<dyn Parameter>>) -> Result<Self, ConfigError> {
        for (i, param) in params.iter().enumerate() {
            if param.name().is_empty() {
                return Err(ConfigError::EmptyName);
            }
            if params[..i].iter().any(|seen| seen.name() == param.name()) {
                return Err(ConfigError::DuplicateName(param.name().to_string()));
            }
        }

        Ok(Self { params })
    }

    fn refresh(&mut self) {
        for param in &mut self.params {
            param.refresh();
        }
    }

    /// Whether any parameter's fingerprint differs from the recorded one. A
    /// parameter missing from the record counts as changed, so first-time
    /// parameters always trigger a run.
    fn changed_against(&self, recorded: &BTreeMap<String, LogValue>) -> bool {
        self.params.iter().any(|param| {
            recorded
                .get(param.name())
                .is_none_or(|old| param.changed(old))
        })
    }

    fn log_values(&self) -> BTreeMap<String, LogValue> {
        self.params
            .iter()
            .map(|param| (param.name().to_string(), param.log_value()))
            .collect()
    }
}

/// What happened to one leaf during a run.
pub(crate) struct LeafOutcome {
    pub success: bool,
    pub record: TaskRecord,
    /// Error raised by the action, if that is why the task failed.
    pub error: Option<anyhow::Error>,
}

/// Reconcile one task against its stored record, rerunning it if anything
/// changed since the record was written.
pub(crate) fn process(
    task: &mut dyn Task,
    position: Position,
    previous: Option<TaskRecord>,
) -> Result<LeafOutcome, TasukiError> {
    let kind = task.kind();

    task.before();

    let setup = |source: anyhow::Error| TasukiError::TaskSetup {
        kind: kind.to_string(),
        position: position.clone(),
        source,
    };

    let mut inputs = task
        .input()
        .and_then(|declared| ParamSet::new(declared).map_err(Into::into))
        .map_err(setup)?;
    let mut outputs = task
        .output()
        .and_then(|declared| ParamSet::new(declared).map_err(Into::into))
        .map_err(setup)?;

    inputs.refresh();
    outputs.refresh();

    // A record left by a different task kind at this position is stale
    // history, not a fingerprint to trust.
    let previous = previous.filter(|record| {
        if record.kind == kind {
            return true;
        }
        tracing::warn!(
            "{position} stored record is for '{}', live task is '{kind}'; rerunning",
            record.kind,
        );
        false
    });

    let needs_rerun = match &previous {
        Some(record) if record.last_success == Some(true) => {
            let inputs_changed = inputs.changed_against(&record.inputs);
            let outputs_changed = outputs.changed_against(&record.outputs);
            tracing::debug!(
                "{position} {kind}: inputs changed: {inputs_changed}, outputs changed: {outputs_changed}"
            );
            inputs_changed || outputs_changed
        }
        _ => true,
    };

    let outcome = match previous {
        Some(mut record) if !needs_rerun => {
            tracing::info!("{position} {kind}: up to date");
            record.position = position;
            LeafOutcome {
                success: true,
                record,
                error: None,
            }
        }
        previous => rerun(task, &mut inputs, &mut outputs, position, previous),
    };

    task.after();

    Ok(outcome)
}

fn rerun(
    task: &mut dyn Task,
    inputs: &mut ParamSet,
    outputs: &mut ParamSet,
    position: Position,
    previous: Option<TaskRecord>,
) -> LeafOutcome {
    let kind = task.kind();
    tracing::info!("{position} {kind}: running");

    let started = Instant::now();
    let (report, success, error) = match task.action() {
        Ok(report) => (report, task.success().holds(), None),
        Err(err) => (None, false, Some(err)),
    };
    let duration = started.elapsed();

    let mut record =
        previous.unwrap_or_else(|| TaskRecord::fresh(position.clone(), kind));
    record.position = position.clone();

    if success {
        // Refresh after the run so the stored fingerprints describe the state
        // the action produced, not the one it started from.
        inputs.refresh();
        outputs.refresh();
        record.inputs = inputs.log_values();
        record.outputs = outputs.log_values();
        record.last_success = Some(true);
    } else {
        // Keep the last-known-good fingerprints so a transient failure
        // doesn't force unrelated reruns later.
        record.last_success = Some(false);
    }

    record.report = report;
    record.duration = Some(duration);
    record.finished = Some(SystemTime::now());

    match &error {
        Some(err) => tracing::warn!("{position} {kind}: failed: {err:#}"),
        None => tracing::info!("{position} {kind}: success: {success} ({duration:.2?})"),
    }

    LeafOutcome {
        success,
        record,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::Value;
    use crate::record::Slot;

    struct Probe {
        input_value: i64,
        runs: usize,
        verdict: bool,
        fail_action: bool,
    }

    impl Probe {
        fn new(input_value: i64) -> Self {
            Self {
                input_value,
                runs: 0,
                verdict: true,
                fail_action: false,
            }
        }
    }

    impl Task for Probe {
        fn kind(&self) -> &'static str {
            "probe"
        }

        fn input(&mut self) -> TaskResult<Vec<Box<dyn Parameter>>> {
            Ok(vec![Box::new(Value::new("n", self.input_value)?)])
        }

        fn output(&mut self) -> TaskResult<Vec<Box<dyn Parameter>>> {
            Ok(vec![Box::new(Value::with_log_value("out", "v1")?)])
        }

        fn action(&mut self) -> TaskResult<Report> {
            self.runs += 1;
            if self.fail_action {
                anyhow::bail!("action exploded");
            }
            Ok(Some("done".to_string()))
        }

        fn success(&mut self) -> Verdict {
            self.verdict.into()
        }
    }

    fn at(index: usize) -> Position {
        Position::root().child(Slot::Seq(index))
    }

    #[test]
    fn first_run_executes_and_records_fingerprints() {
        let mut task = Probe::new(3);
        let outcome = process(&mut task, at(0), None).unwrap();

        assert!(outcome.success);
        assert_eq!(task.runs, 1);
        assert_eq!(outcome.record.last_success, Some(true));
        assert_eq!(outcome.record.inputs["n"], LogValue::Int(3));
        assert_eq!(outcome.record.report.as_deref(), Some("done"));
        assert!(outcome.record.duration.is_some());
    }

    #[test]
    fn unchanged_task_is_skipped() {
        let mut task = Probe::new(3);
        let first = process(&mut task, at(0), None).unwrap();

        let mut task = Probe::new(3);
        let second = process(&mut task, at(0), Some(first.record)).unwrap();

        assert!(second.success);
        assert_eq!(task.runs, 0);
    }

    #[test]
    fn changed_input_triggers_rerun() {
        let mut task = Probe::new(3);
        let first = process(&mut task, at(0), None).unwrap();

        let mut task = Probe::new(4);
        let second = process(&mut task, at(0), Some(first.record)).unwrap();

        assert_eq!(task.runs, 1);
        assert_eq!(second.record.inputs["n"], LogValue::Int(4));
    }

    #[test]
    fn prior_failure_triggers_rerun_even_without_changes() {
        let mut task = Probe::new(3);
        task.verdict = false;
        let failed = process(&mut task, at(0), None).unwrap();
        assert!(!failed.success);

        let mut task = Probe::new(3);
        let second = process(&mut task, at(0), Some(failed.record)).unwrap();
        assert_eq!(task.runs, 1);
        assert!(second.success);
    }

    #[test]
    fn failed_rerun_keeps_last_known_good_fingerprints() {
        let mut task = Probe::new(3);
        let good = process(&mut task, at(0), None).unwrap();

        let mut task = Probe::new(9);
        task.verdict = false;
        let bad = process(&mut task, at(0), Some(good.record)).unwrap();

        assert!(!bad.success);
        assert_eq!(bad.record.last_success, Some(false));
        // Fingerprints still describe the last successful run.
        assert_eq!(bad.record.inputs["n"], LogValue::Int(3));
        assert!(bad.error.is_none());
    }

    #[test]
    fn action_error_is_surfaced_and_marks_failure() {
        let mut task = Probe::new(3);
        task.fail_action = true;
        let outcome = process(&mut task, at(0), None).unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.record.last_success, Some(false));
        let error = outcome.error.expect("action error should be attached");
        assert!(error.to_string().contains("action exploded"));
    }

    #[test]
    fn record_of_different_kind_is_ignored() {
        let mut task = Probe::new(3);
        let mut record = process(&mut task, at(0), None).unwrap().record;
        record.kind = "something_else".to_string();

        let mut task = Probe::new(3);
        let outcome = process(&mut task, at(0), Some(record)).unwrap();

        assert_eq!(task.runs, 1);
        assert_eq!(outcome.record.kind, "probe");
    }

    #[test]
    fn all_of_verdict_requires_every_check() {
        assert!(Verdict::from(vec![true, true]).holds());
        assert!(!Verdict::from(vec![true, false]).holds());
        assert!(Verdict::from(Vec::new()).holds());
    }

    struct Clashing;

    impl Task for Clashing {
        fn kind(&self) -> &'static str {
            "clashing"
        }

        fn input(&mut self) -> TaskResult<Vec<Box<dyn Parameter>>> {
            Ok(vec![
                Box::new(Value::new("n", 1)?),
                Box::new(Value::new("n", 2)?),
            ])
        }

        fn action(&mut self) -> TaskResult<Report> {
            Ok(None)
        }
    }

    #[test]
    fn duplicate_parameter_names_abort_the_run() {
        let result = process(&mut Clashing, at(0), None);
        assert!(matches!(result, Err(TasukiError::TaskSetup { .. })));
    }
}
