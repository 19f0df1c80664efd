// Repository trait for historical series retrieval
use crate::domain::history::HistoryWindow;
use crate::domain::sample::HistoryRecord;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryFetchError {
    #[error("history endpoint returned status {status}")]
    Status { status: u16 },

    #[error("failed to parse history response: {0}")]
    Parse(String),

    #[error("history request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Fetch the records in `[now - window, now)`, oldest first.
    ///
    /// Fails as a whole; a partially parsed series is never returned.
    async fn fetch(&self, window: HistoryWindow) -> Result<Vec<HistoryRecord>, HistoryFetchError>;

    /// Name of the parameter this repository queries.
    fn parameter_name(&self) -> &str;
}
