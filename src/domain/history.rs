// History query domain models - time windows, per-sensor query descriptors and summaries
use super::sample::HistoryRecord;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;

/// Timestamp layout used in history query strings.
pub const QUERY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// How far back a history fetch reaches, in whole hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryWindow {
    hours_back: NonZeroU32,
}

impl HistoryWindow {
    pub fn last_hours(hours_back: NonZeroU32) -> Self {
        Self { hours_back }
    }

    pub fn hours_back(&self) -> u32 {
        self.hours_back.get()
    }

    /// Build the `[end - hours_back, end)` query for one parameter.
    pub fn query_ending_at(&self, parameter_name: &str, window_end: NaiveDateTime) -> HistoryQuery {
        let window_begin = window_end - Duration::hours(i64::from(self.hours_back.get()));
        HistoryQuery {
            parameter_name: parameter_name.to_string(),
            window_begin,
            window_end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub parameter_name: String,
    pub window_begin: NaiveDateTime,
    pub window_end: NaiveDateTime,
}

/// Per-sensor capability plugged into the history fetch skeleton.
///
/// Implementors name the parameter the endpoint should return and may
/// override how the query string pairs are produced.
pub trait QueryDescriptor: Send + Sync {
    fn parameter_name(&self) -> &str;

    fn build_query(&self, query: &HistoryQuery) -> Vec<(String, String)> {
        vec![
            ("params".to_string(), query.parameter_name.clone()),
            (
                "begin".to_string(),
                query.window_begin.format(QUERY_TIME_FORMAT).to_string(),
            ),
            (
                "end".to_string(),
                query.window_end.format(QUERY_TIME_FORMAT).to_string(),
            ),
        ]
    }
}

/// Sensor kinds known to the history endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum SensorKind {
    Ldr,
    Temperature,
    Custom(String),
}

impl From<String> for SensorKind {
    fn from(name: String) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "ldr" => SensorKind::Ldr,
            "temp" | "temperature" => SensorKind::Temperature,
            _ => SensorKind::Custom(name.trim().to_string()),
        }
    }
}

impl QueryDescriptor for SensorKind {
    fn parameter_name(&self) -> &str {
        match self {
            SensorKind::Ldr => "ldr",
            SensorKind::Temperature => "temp",
            SensorKind::Custom(name) => name,
        }
    }
}

/// Key figures over a fetched history series.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub std_dev: f64,
    pub span_hours: f64,
}

impl HistorySummary {
    pub fn from_records(records: &[HistoryRecord]) -> Option<Self> {
        let first = records.first()?;
        let last = records.last()?;

        let count = records.len();
        let mut values: Vec<f64> = records.iter().map(|r| r.value).collect();
        values.sort_by(f64::total_cmp);

        let mean = values.iter().sum::<f64>() / count as f64;
        // Population deviation (ddof = 0)
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        let median = if count % 2 == 0 {
            (values[count / 2 - 1] + values[count / 2]) / 2.0
        } else {
            values[count / 2]
        };
        let span_hours = (last.timestamp - first.timestamp).num_seconds() as f64 / 3600.0;

        Some(Self {
            count,
            mean,
            min: values[0],
            max: values[count - 1],
            median,
            std_dev: variance.sqrt(),
            span_hours,
        })
    }
}
