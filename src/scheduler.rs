//! The tree runner. Walks the task tree depth-first, aligns it index-by-index
//! against the record tree persisted by the previous run, executes leaves
//! through the task lifecycle, and fans independent subtrees out to a bounded
//! worker pool.

use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::error::TasukiError;
use crate::record::{Position, RecordNode, RecordTree, Slot};
use crate::task;
use crate::tree::{Group, GroupKind, Node};

/// Scheduler configuration, passed in explicitly rather than read from any
/// process-wide state.
#[derive(Clone, Copy, Debug)]
pub struct SchedulerOpts {
    /// Worker pool size for parallel groups. With `workers <= 1` parallel
    /// groups run inline on the calling thread.
    pub workers: usize,
}

impl Default for SchedulerOpts {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

/// A task that failed because its action returned an error. Verdict-only
/// failures carry no error and show up solely through their record.
#[derive(Debug)]
pub struct Failure {
    pub position: Position,
    pub kind: String,
    pub error: anyhow::Error,
}

/// The result of one scheduler pass: the overall success flag, the updated
/// record tree to persist, and any action errors encountered along the way.
/// Partial failure still yields a usable record tree, so a caller can persist
/// progress and retry only the remainder next time.
#[derive(Debug)]
pub struct RunOutcome {
    pub success: bool,
    pub records: RecordTree,
    pub failures: Vec<Failure>,
}

struct Pass {
    success: bool,
    records: Vec<RecordNode>,
    failures: Vec<Failure>,
}

type ChildResult = Result<(bool, RecordNode, Vec<Failure>), TasukiError>;

pub struct Scheduler {
    pool: Option<rayon::ThreadPool>,
}

impl Scheduler {
    pub fn new(opts: SchedulerOpts) -> Result<Self, TasukiError> {
        let pool = match opts.workers {
            0 | 1 => None,
            workers => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .build()?,
            ),
        };

        Ok(Self { pool })
    }

    /// Run the tree against the previous run's records. Only returns `Err`
    /// for configuration mistakes; ordinary task failures are reported
    /// through the outcome.
    pub fn run(
        &self,
        tree: &mut Group,
        previous: Option<RecordTree>,
    ) -> Result<RunOutcome, TasukiError> {
        let pass = self.run_group(tree, previous.unwrap_or_default(), Position::root())?;

        Ok(RunOutcome {
            success: pass.success,
            records: pass.records,
            failures: pass.failures,
        })
    }

    fn run_group(
        &self,
        group: &mut Group,
        previous: Vec<RecordNode>,
        prefix: Position,
    ) -> Result<Pass, TasukiError> {
        match group.kind() {
            GroupKind::Sequential => self.run_sequence(group.children_mut(), previous, prefix),
            GroupKind::Parallel => self.run_parallel(group.children_mut(), previous, prefix),
        }
    }

    /// Children run in declared order; the first failure stops the walk.
    /// Stored records past the failure are kept untouched so the next run
    /// still has them; on a fully successful pass the list is cut down to
    /// exactly the positions present in the current tree.
    fn run_sequence(
        &self,
        nodes: &mut [Node],
        previous: Vec<RecordNode>,
        prefix: Position,
    ) -> Result<Pass, TasukiError> {
        let count = nodes.len();
        let mut slots: Vec<Option<RecordNode>> = previous.into_iter().map(Some).collect();
        if slots.len() < count {
            slots.resize_with(count, || None);
        }

        let mut failures = Vec::new();
        let mut success = true;

        for (i, node) in nodes.iter_mut().enumerate() {
            let stored = slots[i].take();
            let position = prefix.child(Slot::Seq(i));
            let (ok, record, mut child_failures) = self.run_child(node, stored, position)?;

            slots[i] = Some(record);
            failures.append(&mut child_failures);

            if !ok {
                success = false;
                break;
            }
        }

        if success {
            slots.truncate(count);
        }

        let records = slots.into_iter().flatten().collect();

        Ok(Pass {
            success,
            records,
            failures,
        })
    }

    /// Every child is dispatched; none of them is cancelled by a sibling's
    /// failure. Results are collected by index, so record positions come out
    /// deterministic regardless of completion order.
    fn run_parallel(
        &self,
        nodes: &mut [Node],
        previous: Vec<RecordNode>,
        prefix: Position,
    ) -> Result<Pass, TasukiError> {
        let count = nodes.len();
        let mut slots: Vec<Option<RecordNode>> = previous.into_iter().map(Some).collect();
        if slots.len() < count {
            slots.resize_with(count, || None);
        }
        let tail = slots.split_off(count);

        let jobs: Vec<(usize, &mut Node, Option<RecordNode>)> = nodes
            .iter_mut()
            .zip(slots)
            .enumerate()
            .map(|(i, (node, stored))| (i, node, stored))
            .collect();

        let run = |(i, node, stored): (usize, &mut Node, Option<RecordNode>)| {
            self.run_child(node, stored, prefix.child(Slot::Par(i)))
        };

        let results: Vec<ChildResult> = match &self.pool {
            Some(pool) => pool.install(|| jobs.into_par_iter().map(run).collect()),
            None => jobs.into_iter().map(run).collect(),
        };

        let mut success = true;
        let mut failures = Vec::new();
        let mut records = Vec::with_capacity(count);

        for result in results {
            let (ok, record, mut child_failures) = result?;
            success = success && ok;
            failures.append(&mut child_failures);
            records.push(record);
        }

        if !success {
            records.extend(tail.into_iter().flatten());
        }

        Ok(Pass {
            success,
            records,
            failures,
        })
    }

    fn run_child(
        &self,
        node: &mut Node,
        stored: Option<RecordNode>,
        position: Position,
    ) -> ChildResult {
        match node {
            Node::Leaf(task) => {
                // A stored group where the live tree has a task is a shape
                // change; the leaf starts over.
                let stored = match stored {
                    Some(RecordNode::Leaf(record)) => Some(record),
                    _ => None,
                };

                let outcome = task::process(task.as_mut(), position.clone(), stored)?;
                let failures = match outcome.error {
                    Some(error) => vec![Failure {
                        position,
                        kind: outcome.record.kind.clone(),
                        error,
                    }],
                    None => Vec::new(),
                };

                Ok((outcome.success, RecordNode::Leaf(outcome.record), failures))
            }
            Node::Group(sub) => {
                let stored = match stored {
                    Some(RecordNode::Group(records)) => records,
                    _ => Vec::new(),
                };

                let pass = self.run_group(sub, stored, position)?;
                Ok((pass.success, RecordNode::Group(pass.records), pass.failures))
            }
        }
    }
}
