//! Persisted outcomes. After every run the engine hands back a tree of
//! [`TaskRecord`]s mirroring the shape of the task tree; the next run aligns
//! itself against it to decide what can be skipped.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::param::LogValue;

/// One step of a tree position. Children of a parallel fan-out are tagged
/// distinctly from sequential children so that positions stay collision-free
/// no matter how the tree is nested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Slot {
    Seq(usize),
    Par(usize),
}

impl Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Seq(i) => write!(f, "{i}"),
            Slot::Par(i) => write!(f, "p{i}"),
        }
    }
}

impl From<Slot> for String {
    fn from(slot: Slot) -> Self {
        slot.to_string()
    }
}

impl TryFrom<String> for Slot {
    type Error = String;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        let (tag, digits) = match text.strip_prefix('p') {
            Some(rest) => (Slot::Par as fn(usize) -> Slot, rest),
            None => (Slot::Seq as fn(usize) -> Slot, text.as_str()),
        };

        digits
            .parse()
            .map(tag)
            .map_err(|_| format!("invalid position slot '{text}'"))
    }
}

/// A path from the root of the task tree down to one task, e.g. `[1][p0][2]`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position(Vec<Slot>);

impl Position {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child(&self, slot: Slot) -> Self {
        let mut slots = self.0.clone();
        slots.push(slot);
        Position(slots)
    }

    pub fn slots(&self) -> &[Slot] {
        &self.0
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for slot in &self.0 {
            write!(f, "[{slot}]")?;
        }
        Ok(())
    }
}

impl FromIterator<Slot> for Position {
    fn from_iter<I: IntoIterator<Item = Slot>>(iter: I) -> Self {
        Position(iter.into_iter().collect())
    }
}

/// The persisted outcome of one task execution at one tree position.
///
/// The log-value maps are only rewritten after a *successful* rerun; a failed
/// rerun flips `last_success` but keeps the last-known-good fingerprints, so a
/// transient failure doesn't erase what the engine knew.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub position: Position,
    /// Stable tag of the task implementation that produced this record. A
    /// record whose kind doesn't match the live task at its position is stale
    /// and treated as absent.
    pub kind: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, LogValue>,
    #[serde(default)]
    pub outputs: BTreeMap<String, LogValue>,
    /// `None` means the task has never run to completion.
    pub last_success: Option<bool>,
    #[serde(default)]
    pub report: Option<String>,
    #[serde(default)]
    pub duration: Option<Duration>,
    #[serde(default)]
    pub finished: Option<SystemTime>,
}

impl TaskRecord {
    /// A blank record for a task that has no usable history.
    pub fn fresh(position: Position, kind: impl Into<String>) -> Self {
        Self {
            position,
            kind: kind.into(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            last_success: None,
            report: None,
            duration: None,
            finished: None,
        }
    }
}

/// A stored tree mirroring the task tree shape 1:1.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordNode {
    Group(Vec<RecordNode>),
    Leaf(TaskRecord),
}

/// The top level of a stored run, an ordered list like the task tree itself.
pub type RecordTree = Vec<RecordNode>;
