//! Persistence boundary for record trees. The engine itself never touches
//! disk; it only asks a store to load the previous tree and save the updated
//! one, keyed by workflow name. Order and nesting must survive the round trip
//! verbatim, since tree positions are derived from them.

use std::fs;
use std::io::{BufReader, BufWriter};

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::StoreError;
use crate::record::RecordTree;

pub trait RunStore: Send + Sync {
    /// Load the record tree saved under `name`, `None` when no run has been
    /// saved yet.
    fn load(&self, name: &str) -> Result<Option<RecordTree>, StoreError>;

    fn save(&self, name: &str, records: &RecordTree) -> Result<(), StoreError>;
}

/// Stores each workflow's record tree as a JSON file under one directory,
/// created on first save.
pub struct JsonStore {
    dir: Utf8PathBuf,
}

impl JsonStore {
    pub const DEFAULT_DIR: &str = ".tasuki";

    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Utf8PathBuf {
        self.dir.join(format!("{name}.json"))
    }
}

impl Default for JsonStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIR)
    }
}

impl RunStore for JsonStore {
    fn load(&self, name: &str) -> Result<Option<RecordTree>, StoreError> {
        let path = self.path_for(name);
        if !path.is_file() {
            return Ok(None);
        }

        let file = BufReader::new(fs::File::open(&path)?);
        let records = serde_json::from_reader(file)?;
        Ok(Some(records))
    }

    fn save(&self, name: &str, records: &RecordTree) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;

        let file = BufWriter::new(fs::File::create(self.path_for(name))?);
        serde_json::to_writer_pretty(file, records)?;
        Ok(())
    }
}
