#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod error;
mod param;
mod record;
mod scheduler;
mod store;
mod task;
mod tree;

pub use crate::error::{ConfigError, StoreError, TasukiError};
pub use crate::param::{FileHash, FileStamp, Hash32, LogValue, Parameter, Value};
pub use crate::record::{Position, RecordNode, RecordTree, Slot, TaskRecord};
pub use crate::scheduler::{Failure, RunOutcome, Scheduler, SchedulerOpts};
pub use crate::store::{JsonStore, RunStore};
pub use crate::task::{Report, Task, TaskResult, Verdict};
pub use crate::tree::{Group, GroupKind, Node};

/// A named pipeline tying the scheduler to a run store: each `run` loads the
/// previous record tree, reconciles the task tree against it, and persists
/// the updated records for the next invocation.
///
/// Callers must not run two workflows with the same name concurrently; the
/// store is not locked.
pub struct Workflow {
    name: String,
    scheduler: Scheduler,
    store: Box<dyn RunStore>,
}

impl Workflow {
    pub fn config(name: impl Into<String>) -> WorkflowConfig {
        WorkflowConfig::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the task tree. A load failure degrades to a first run with a
    /// warning; a save failure after the run is an error, since the stored
    /// state would otherwise silently diverge from what actually happened.
    pub fn run(&self, tree: impl IntoIterator<Item = Node>) -> Result<RunOutcome, TasukiError> {
        tracing::info!("Running workflow '{}'", self.name);

        let previous = match self.store.load(&self.name) {
            Ok(previous) => previous,
            Err(err) => {
                tracing::warn!(
                    "Couldn't load the previous run of '{}', starting fresh: {err}",
                    self.name,
                );
                None
            }
        };

        let mut root = Group::new(tree);
        let outcome = self.scheduler.run(&mut root, previous)?;
        self.store.save(&self.name, &outcome.records)?;

        tracing::info!(
            "Workflow '{}' finished, success: {}",
            self.name,
            outcome.success,
        );

        Ok(outcome)
    }
}

/// A builder struct for creating a [`Workflow`] with specified settings.
pub struct WorkflowConfig {
    name: String,
    opts: SchedulerOpts,
    store: Option<Box<dyn RunStore>>,
}

impl WorkflowConfig {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            opts: SchedulerOpts::default(),
            store: None,
        }
    }

    /// Worker pool size for parallel groups; `1` disables the pool.
    pub fn workers(mut self, workers: usize) -> Self {
        self.opts.workers = workers;
        self
    }

    /// Use a custom run store instead of the default [`JsonStore`] in the
    /// working directory.
    pub fn store(mut self, store: impl RunStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Keep the default JSON store but place it under `dir`.
    pub fn store_dir(self, dir: impl Into<camino::Utf8PathBuf>) -> Self {
        self.store(JsonStore::new(dir))
    }

    pub fn finish(self) -> Result<Workflow, TasukiError> {
        Ok(Workflow {
            name: self.name,
            scheduler: Scheduler::new(self.opts)?,
            store: self.store.unwrap_or_else(|| Box::new(JsonStore::default())),
        })
    }
}

/// Install a `tracing` subscriber printing engine diagnostics to stderr,
/// filtered through `RUST_LOG`.
#[cfg(feature = "logging")]
pub fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}
