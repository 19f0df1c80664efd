// Render scheduler - Fixed-period snapshot of live data handed to the render sink
use crate::application::sinks::{HistoryOutcome, LiveView, RenderSink};
use crate::application::telemetry_buffer::TelemetryBuffer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

pub struct RenderScheduler {
    buffer: Arc<TelemetryBuffer>,
    history: watch::Receiver<HistoryOutcome>,
    sink: Arc<dyn RenderSink>,
    period: Duration,
    history_delivered: bool,
}

impl RenderScheduler {
    pub fn new(
        buffer: Arc<TelemetryBuffer>,
        history: watch::Receiver<HistoryOutcome>,
        sink: Arc<dyn RenderSink>,
        period: Duration,
    ) -> Self {
        Self {
            buffer,
            history,
            sink,
            period,
            history_delivered: false,
        }
    }

    /// One render pass. Only in-memory reads; never touches the network.
    pub fn tick(&mut self) {
        let live = LiveView::from_snapshot(self.buffer.snapshot());

        let history = if self.history_delivered {
            None
        } else {
            let current = self.history.borrow().clone();
            match current {
                HistoryOutcome::Pending => None,
                finished => {
                    self.history_delivered = true;
                    Some(finished)
                }
            }
        };

        self.sink.render(&live, history.as_ref());
    }

    /// Tick every `period` until `shutdown` flips to true or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!("Render scheduler started ({:?} period)", self.period);
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Render scheduler stopped");
    }
}
