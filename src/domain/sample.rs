// Sample domain models - values flowing through the live and history paths
use chrono::NaiveDateTime;
use serde::Serialize;

/// A single live reading decoded from a broker message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: NaiveDateTime, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// Stamp a value with the local wall-clock time of receipt.
    pub fn received_now(value: f64) -> Self {
        Self::new(chrono::Local::now().naive_local(), value)
    }
}

/// A reading parsed from the history endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistoryRecord {
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

impl HistoryRecord {
    pub fn new(timestamp: NaiveDateTime, value: f64) -> Self {
        Self { timestamp, value }
    }
}
