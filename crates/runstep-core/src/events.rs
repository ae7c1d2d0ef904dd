//! Output events delivered to live-output subscribers.

use crate::types::{Id, RunKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of a run step's live output stream.
///
/// A stream is a sequence of `line` events followed by exactly one
/// `complete` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEvent {
    /// Invocation that produced the output.
    pub invocation_id: Id,
    pub run: RunKey,
    /// Raw output line without its trailing newline; `None` on completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,
    pub complete: bool,
    pub at: DateTime<Utc>,
}

impl OutputEvent {
    pub fn line(invocation_id: Id, run: RunKey, line: impl Into<String>) -> Self {
        Self {
            invocation_id,
            run,
            line: Some(line.into()),
            complete: false,
            at: Utc::now(),
        }
    }

    pub fn complete(invocation_id: Id, run: RunKey) -> Self {
        Self {
            invocation_id,
            run,
            line: None,
            complete: true,
            at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
