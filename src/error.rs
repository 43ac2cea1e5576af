use thiserror::Error;

use crate::record::Position;

#[derive(Debug, Error)]
pub enum TasukiError {
    #[error("Task '{kind}' at {position}: invalid parameter declaration.\n{source}")]
    TaskSetup {
        kind: String,
        position: Position,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to build worker pool.\n{0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Mistakes in a task's parameter declaration. These are programming errors,
/// not runtime failures, so they abort the whole run instead of marking a
/// single task as failed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Parameter name must not be empty")]
    EmptyName,

    #[error("Multiple parameters share the name '{0}'")]
    DuplicateName(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Couldn't access the run store.\n{0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Couldn't read or write the record tree.\n{0}")]
    Format(#[from] serde_json::Error),
}
