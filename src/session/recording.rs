use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::PushError;

/// Recording granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum RecordLevel {
    /// Disable recording.
    Off,
    /// Record connection and outcome events only.
    KeyEventsOnly,
    /// Also record every command written.
    #[default]
    Full,
}

/// A single recorded delivery event.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DeliveryRecordEntry {
    pub ts_ms: u128,
    pub event: DeliveryEvent,
}

/// Supported recorded event types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryEvent {
    Connecting {
        target: String,
    },
    Connected {
        target: String,
    },
    ConnectFailed {
        target: String,
        reason: String,
    },
    CommandSent {
        target: String,
        index: usize,
        command: String,
    },
    CommandFailed {
        target: String,
        index: usize,
        command: String,
        reason: String,
    },
    Delivered {
        target: String,
        commands: usize,
    },
    Closed {
        target: String,
    },
    CloseFailed {
        target: String,
        reason: String,
    },
}

impl DeliveryEvent {
    pub fn target(&self) -> &str {
        match self {
            DeliveryEvent::Connecting { target }
            | DeliveryEvent::Connected { target }
            | DeliveryEvent::ConnectFailed { target, .. }
            | DeliveryEvent::CommandSent { target, .. }
            | DeliveryEvent::CommandFailed { target, .. }
            | DeliveryEvent::Delivered { target, .. }
            | DeliveryEvent::Closed { target }
            | DeliveryEvent::CloseFailed { target, .. } => target,
        }
    }
}

/// In-memory recorder shared by all delivery tasks of a run.
#[derive(Debug, Clone)]
pub struct DeliveryRecorder {
    level: RecordLevel,
    entries: Arc<Mutex<Vec<DeliveryRecordEntry>>>,
}

impl DeliveryRecorder {
    /// Create a recorder with the given level.
    pub fn new(level: RecordLevel) -> Self {
        Self {
            level,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Current recording level.
    pub fn level(&self) -> RecordLevel {
        self.level
    }

    /// Record a key-level event.
    pub fn record_event(&self, event: DeliveryEvent) -> Result<(), PushError> {
        if self.level == RecordLevel::Off {
            return Ok(());
        }
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| PushError::InternalError(format!("record lock error: {e}")))?;
        guard.push(DeliveryRecordEntry {
            ts_ms: now_ms(),
            event,
        });
        Ok(())
    }

    /// Record a written command when enabled.
    pub fn record_command(
        &self,
        target: &str,
        index: usize,
        command: &str,
    ) -> Result<(), PushError> {
        if self.level != RecordLevel::Full {
            return Ok(());
        }
        self.record_event(DeliveryEvent::CommandSent {
            target: target.to_string(),
            index,
            command: command.to_string(),
        })
    }

    /// Snapshot all records.
    pub fn entries(&self) -> Result<Vec<DeliveryRecordEntry>, PushError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| PushError::InternalError(format!("record lock error: {e}")))?;
        Ok(guard.clone())
    }

    /// Events recorded for one target, in recording order.
    pub fn events_for(&self, target: &str) -> Result<Vec<DeliveryEvent>, PushError> {
        Ok(self
            .entries()?
            .into_iter()
            .map(|entry| entry.event)
            .filter(|event| event.target() == target)
            .collect())
    }

    /// Commands recorded as written to one target, in order.
    pub fn commands_sent(&self, target: &str) -> Result<Vec<String>, PushError> {
        Ok(self
            .events_for(target)?
            .into_iter()
            .filter_map(|event| match event {
                DeliveryEvent::CommandSent { command, .. } => Some(command),
                _ => None,
            })
            .collect())
    }

    /// Export records as JSONL.
    pub fn to_jsonl(&self) -> Result<String, PushError> {
        let entries = self.entries()?;
        let mut lines = Vec::with_capacity(entries.len());
        for entry in entries {
            lines.push(serde_json::to_string(&entry)?);
        }
        Ok(lines.join("\n"))
    }

    /// Restore a recorder from JSONL lines.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, PushError> {
        let parsed = jsonl
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str::<DeliveryRecordEntry>)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            level: RecordLevel::Full,
            entries: Arc::new(Mutex::new(parsed)),
        })
    }
}

impl Default for DeliveryRecorder {
    fn default() -> Self {
        Self::new(RecordLevel::Full)
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
