// Collaborator traits - where rendered frames and status events are delivered
use crate::domain::connection::StatusEvent;
use crate::domain::history::HistorySummary;
use crate::domain::sample::{HistoryRecord, Sample};
use serde::Serialize;
use std::sync::Arc;

/// Live part of a frame. An empty buffer is an explicit state, not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum LiveView {
    NoDataYet,
    Samples { samples: Vec<Sample> },
}

impl LiveView {
    pub fn from_snapshot(samples: Vec<Sample>) -> Self {
        if samples.is_empty() {
            LiveView::NoDataYet
        } else {
            LiveView::Samples { samples }
        }
    }
}

/// Result of the one-shot history load.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum HistoryOutcome {
    Pending,
    Unavailable {
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    Loaded {
        parameter: String,
        hours_back: u32,
        records: Vec<HistoryRecord>,
        summary: Option<HistorySummary>,
    },
}

pub trait RenderSink: Send + Sync {
    /// Called once per tick. `history` is present only on the tick that
    /// first observes a finished history load.
    fn render(&self, live: &LiveView, history: Option<&HistoryOutcome>);
}

pub trait StatusSink: Send + Sync {
    fn report(&self, event: StatusEvent);
}

/// Forwards each status event to every registered sink.
#[derive(Clone)]
pub struct StatusFanout {
    sinks: Vec<Arc<dyn StatusSink>>,
}

impl StatusFanout {
    pub fn new(sinks: Vec<Arc<dyn StatusSink>>) -> Self {
        Self { sinks }
    }
}

impl StatusSink for StatusFanout {
    fn report(&self, event: StatusEvent) {
        for sink in &self.sinks {
            sink.report(event.clone());
        }
    }
}
