//! Trackable values. A parameter pairs a name with a comparable fingerprint
//! (the "log value") which is persisted between runs; two log values being
//! equal is the only signal the engine has for "nothing changed here".

use std::fmt::Debug;
use std::fs;
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// The comparison key of a parameter. Compared structurally, persisted in the
/// run store verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LogValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<LogValue>),
    /// Path plus modification time. A missing file carries `modified: None`,
    /// which is a state of its own; appearing and disappearing files both
    /// compare as changed.
    Stamp {
        path: Utf8PathBuf,
        modified: Option<SystemTime>,
    },
    /// Path plus content digest, `None` when the file can't be read.
    Digest {
        path: Utf8PathBuf,
        hash: Option<String>,
    },
}

impl From<&str> for LogValue {
    fn from(value: &str) -> Self {
        LogValue::Text(value.to_string())
    }
}

impl From<String> for LogValue {
    fn from(value: String) -> Self {
        LogValue::Text(value)
    }
}

impl From<i64> for LogValue {
    fn from(value: i64) -> Self {
        LogValue::Int(value)
    }
}

impl From<i32> for LogValue {
    fn from(value: i32) -> Self {
        LogValue::Int(value as i64)
    }
}

impl From<u32> for LogValue {
    fn from(value: u32) -> Self {
        LogValue::Int(value as i64)
    }
}

impl From<f64> for LogValue {
    fn from(value: f64) -> Self {
        LogValue::Float(value)
    }
}

impl From<bool> for LogValue {
    fn from(value: bool) -> Self {
        LogValue::Bool(value)
    }
}

impl<T> From<Vec<T>> for LogValue
where
    T: Into<LogValue>,
{
    fn from(value: Vec<T>) -> Self {
        LogValue::List(value.into_iter().map(Into::into).collect())
    }
}

/// A declared input or output of a task.
///
/// The engine only ever looks at the name and the log value; what the value
/// *is* stays inside the implementation. `refresh` recomputes the log value
/// from live state and must be idempotent; it is called once before a task is
/// evaluated and once more after a successful rerun, so the stored fingerprint
/// always reflects the state the task left behind.
pub trait Parameter: Send {
    fn name(&self) -> &str;

    fn log_value(&self) -> LogValue;

    /// Recompute the log value from live state. No-op for plain values.
    fn refresh(&mut self) {}

    /// Whether the current log value differs from a previously recorded one.
    fn changed(&self, previous: &LogValue) -> bool {
        self.log_value() != *previous
    }
}

fn checked_name(name: impl Into<String>) -> Result<String, ConfigError> {
    let name = name.into();
    if name.is_empty() {
        return Err(ConfigError::EmptyName);
    }
    Ok(name)
}

/// A plain value parameter. The log value defaults to the value itself.
pub struct Value {
    name: String,
    log_value: LogValue,
}

impl Value {
    pub fn new(name: impl Into<String>, value: impl Into<LogValue>) -> Result<Self, ConfigError> {
        Ok(Self {
            name: checked_name(name)?,
            log_value: value.into(),
        })
    }

    /// Use a separate comparison key for a value which isn't itself
    /// comparable, e.g. a manually bumped version for an external resource.
    pub fn with_log_value(
        name: impl Into<String>,
        log_value: impl Into<LogValue>,
    ) -> Result<Self, ConfigError> {
        Self::new(name, log_value)
    }
}

impl Parameter for Value {
    fn name(&self) -> &str {
        &self.name
    }

    fn log_value(&self) -> LogValue {
        self.log_value.clone()
    }
}

/// A file parameter fingerprinted by modification time.
pub struct FileStamp {
    name: String,
    path: Utf8PathBuf,
    modified: Option<SystemTime>,
}

impl FileStamp {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<Utf8PathBuf>,
    ) -> Result<Self, ConfigError> {
        let mut param = Self {
            name: checked_name(name)?,
            path: path.into(),
            modified: None,
        };
        param.refresh();
        Ok(param)
    }

    /// Like [`FileStamp::new`], but creates the file (and its parent
    /// directories) when it doesn't exist yet. Useful for output files.
    pub fn create(
        name: impl Into<String>,
        path: impl Into<Utf8PathBuf>,
    ) -> Result<Self, ConfigError> {
        let path = path.into();

        if !path.is_file() {
            let created = path
                .parent()
                .map_or(Ok(()), fs::create_dir_all)
                .and_then(|()| fs::File::create(&path).map(drop));

            if let Err(err) = created {
                tracing::warn!("Couldn't create file {path}: {err}");
            }
        }

        Self::new(name, path)
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Whether the file on disk differs from the last refreshed state. Handy
    /// inside a success predicate to confirm an output was actually written.
    pub fn touched(&self) -> bool {
        self.modified != mod_time(&self.path)
    }
}

impl Parameter for FileStamp {
    fn name(&self) -> &str {
        &self.name
    }

    fn log_value(&self) -> LogValue {
        LogValue::Stamp {
            path: self.path.clone(),
            modified: self.modified,
        }
    }

    fn refresh(&mut self) {
        self.modified = mod_time(&self.path);
    }
}

fn mod_time(path: &Utf8Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

/// A file parameter fingerprinted by content hash. Unlike [`FileStamp`] this
/// survives `touch`, at the cost of reading the file on every refresh.
pub struct FileHash {
    name: String,
    path: Utf8PathBuf,
    hash: Option<Hash32>,
}

impl FileHash {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<Utf8PathBuf>,
    ) -> Result<Self, ConfigError> {
        let mut param = Self {
            name: checked_name(name)?,
            path: path.into(),
            hash: None,
        };
        param.refresh();
        Ok(param)
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl Parameter for FileHash {
    fn name(&self) -> &str {
        &self.name
    }

    fn log_value(&self) -> LogValue {
        LogValue::Digest {
            path: self.path.clone(),
            hash: self.hash.map(Hash32::to_hex),
        }
    }

    fn refresh(&mut self) {
        self.hash = match Hash32::hash_file(&self.path) {
            Ok(hash) => Some(hash),
            Err(err) => {
                // An unreadable file is the same observable state as a
                // missing one.
                tracing::debug!("Couldn't hash {}: {err}", self.path);
                None
            }
        };
    }
}

/// 32 bytes length generic hash
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub fn hash_file(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        Ok(blake3::Hasher::new()
            .update_mmap_rayon(path)?
            .finalize()
            .into())
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = vec![0u8; 64];

        for (i, &byte) in self.0.iter().enumerate() {
            acc[i * 2] = HEX[(byte >> 4) as usize];
            acc[i * 2 + 1] = HEX[(byte & 0xF) as usize];
        }

        String::from_utf8(acc).unwrap()
    }
}

impl Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}
