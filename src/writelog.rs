//! Write logs - the recorded mutations between two roots

use crate::model::Hash;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Kind of mutation a [`LogEntry`] records
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogEntryType {
    Insert,
    Delete,
}

/// A single key mutation; an absent value records a deletion
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

impl LogEntry {
    pub fn insert(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        LogEntry {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        LogEntry {
            key: key.into(),
            value: None,
        }
    }

    pub fn entry_type(&self) -> LogEntryType {
        match self.value {
            Some(_) => LogEntryType::Insert,
            None => LogEntryType::Delete,
        }
    }

    /// Approximate encoded size in bytes
    pub fn size(&self) -> u64 {
        (self.key.len() + self.value.as_ref().map_or(0, Vec::len)) as u64
    }
}

/// An ordered list of mutations
pub type WriteLog = Vec<LogEntry>;

/// Per-entry annotation produced while applying a write log to a tree
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntryAnnotation {
    /// Hash of the leaf the entry inserted, if it created a new leaf (rather than the
    /// entry already existing)
    pub inserted_node: Option<Hash>,
}

/// Annotations for a write log, either empty or one per entry
pub type Annotations = Vec<LogEntryAnnotation>;

/// Lazy, forward-only write log sequence; cannot be restarted once consumed
pub type WriteLogIter = Box<dyn Iterator<Item = Result<LogEntry>> + Send>;

/// Iterator over one or more stored write log segments, in order
///
/// Entries are cloned out of the shared segments one at a time. If the cancellation token
/// fires, the iterator yields a single [`Error::Cancelled`] and then ends.
pub struct WriteLogIterator {
    cancel: CancellationToken,
    segments: VecDeque<Arc<WriteLog>>,
    pos: usize,
    done: bool,
}

impl WriteLogIterator {
    pub fn new(cancel: CancellationToken, segments: impl IntoIterator<Item = Arc<WriteLog>>) -> Self {
        WriteLogIterator {
            cancel,
            segments: segments.into_iter().collect(),
            pos: 0,
            done: false,
        }
    }

    pub fn boxed(self) -> WriteLogIter {
        Box::new(self)
    }
}

impl Iterator for WriteLogIterator {
    type Item = Result<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.done = true;
            return Some(Err(Error::Cancelled));
        }
        loop {
            let segment = self.segments.front()?;
            if let Some(entry) = segment.get(self.pos) {
                self.pos += 1;
                return Some(Ok(entry.clone()));
            }
            self.segments.pop_front();
            self.pos = 0;
        }
    }
}
