// src/queue/task.rs

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the four queue directories. Which one a record sits in *is*
/// the task's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Inbox,
    Running,
    Done,
    Failed,
}

impl Partition {
    pub const ALL: [Partition; 4] = [
        Partition::Inbox,
        Partition::Running,
        Partition::Done,
        Partition::Failed,
    ];

    pub fn dir_name(self) -> &'static str {
        match self {
            Partition::Inbox => "inbox",
            Partition::Running => "running",
            Partition::Done => "done",
            Partition::Failed => "failed",
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, Partition::Done | Partition::Failed)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for Partition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inbox" => Ok(Partition::Inbox),
            "running" => Ok(Partition::Running),
            "done" => Ok(Partition::Done),
            "failed" => Ok(Partition::Failed),
            other => Err(format!("unknown partition '{other}'")),
        }
    }
}

/// Serialized queue record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedTask {
    /// ULID; sorts by creation time.
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub inbox: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.inbox + self.running + self.done + self.failed
    }

    pub(crate) fn bump(&mut self, partition: Partition) {
        match partition {
            Partition::Inbox => self.inbox += 1,
            Partition::Running => self.running += 1,
            Partition::Done => self.done += 1,
            Partition::Failed => self.failed += 1,
        }
    }
}
