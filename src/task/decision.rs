use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Verdict of a single pipeline decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Reject,
}

/// One accept/reject record produced by a pipeline step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionEntry {
    pub decision: Decision,
    pub code: String,
    pub message: String,
    /// Step that recorded the decision
    pub stage_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Immutable view of every decision made during one task execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionSnapshot {
    pub entries: Vec<DecisionEntry>,
}

impl DecisionSnapshot {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn rejections(&self) -> impl Iterator<Item = &DecisionEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.decision == Decision::Reject)
    }
}

/// Accumulates decisions for one task execution
///
/// Steps record through the processing context; the executor takes a
/// snapshot when the execution finishes.
#[derive(Debug, Default)]
pub struct DecisionRecorder {
    stage_id: Option<String>,
    entries: Vec<DecisionEntry>,
}

impl DecisionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the step that subsequent decisions are attributed to
    pub(crate) fn enter_stage(&mut self, stage_id: &str) {
        self.stage_id = Some(stage_id.to_string());
    }

    pub fn accept(&mut self, code: impl Into<String>, message: impl Into<String>) {
        self.record(Decision::Accept, code.into(), message.into());
    }

    pub fn reject(&mut self, code: impl Into<String>, message: impl Into<String>) {
        self.record(Decision::Reject, code.into(), message.into());
    }

    fn record(&mut self, decision: Decision, code: String, message: String) {
        self.entries.push(DecisionEntry {
            decision,
            code,
            message,
            stage_id: self.stage_id.clone(),
            recorded_at: Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries recorded after the first `start`
    pub fn entries_since(&self, start: usize) -> &[DecisionEntry] {
        self.entries.get(start..).unwrap_or_default()
    }

    pub fn snapshot(&self) -> DecisionSnapshot {
        DecisionSnapshot {
            entries: self.entries.clone(),
        }
    }
}
