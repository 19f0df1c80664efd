// History service - One-shot history load handed to the render flow
use crate::application::history_repository::HistoryRepository;
use crate::application::sinks::HistoryOutcome;
use crate::domain::history::{HistorySummary, HistoryWindow};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct HistoryService {
    repository: Arc<dyn HistoryRepository>,
    window: HistoryWindow,
}

impl HistoryService {
    pub fn new(repository: Arc<dyn HistoryRepository>, window: HistoryWindow) -> Self {
        Self { repository, window }
    }

    /// Fetch once; failures become `Unavailable` so live data keeps flowing.
    pub async fn load(&self) -> HistoryOutcome {
        let parameter = self.repository.parameter_name().to_string();
        match self.repository.fetch(self.window).await {
            Ok(records) => {
                tracing::info!(
                    "Loaded {} history records for {} (last {}h)",
                    records.len(),
                    parameter,
                    self.window.hours_back()
                );
                let summary = HistorySummary::from_records(&records);
                HistoryOutcome::Loaded {
                    parameter,
                    hours_back: self.window.hours_back(),
                    records,
                    summary,
                }
            }
            Err(e) => {
                tracing::warn!("History fetch for {} failed: {}", parameter, e);
                HistoryOutcome::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Run the load on a background task. The receiver reads `Pending`
    /// until the fetch finishes.
    pub fn spawn(self) -> watch::Receiver<HistoryOutcome> {
        let (tx, rx) = watch::channel(HistoryOutcome::Pending);
        tokio::spawn(async move {
            let outcome = self.load().await;
            let _ = tx.send(outcome);
        });
        rx
    }
}
