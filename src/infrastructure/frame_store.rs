// Frame store - Keeps the latest rendered frame for HTTP readers
use crate::application::sinks::{HistoryOutcome, LiveView, RenderSink, StatusSink};
use crate::domain::connection::{ConnectionState, StatusEvent};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderFrame {
    pub rendered_at: NaiveDateTime,
    pub connection: ConnectionState,
    pub decode_errors: u64,
    pub live: LiveView,
    pub history: HistoryOutcome,
}

#[derive(Debug)]
struct FrameState {
    connection: ConnectionState,
    decode_errors: u64,
    history: HistoryOutcome,
}

/// Render and status sink that publishes each frame on a watch channel.
pub struct FrameStore {
    state: Mutex<FrameState>,
    frames: watch::Sender<Option<Arc<RenderFrame>>>,
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameStore {
    pub fn new() -> Self {
        let (frames, _) = watch::channel(None);
        Self {
            state: Mutex::new(FrameState {
                connection: ConnectionState::Disconnected,
                decode_errors: 0,
                history: HistoryOutcome::Pending,
            }),
            frames,
        }
    }

    /// Latest frame, `None` before the first tick.
    pub fn latest(&self) -> Option<Arc<RenderFrame>> {
        self.frames.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<RenderFrame>>> {
        self.frames.subscribe()
    }
}

impl RenderSink for FrameStore {
    fn render(&self, live: &LiveView, history: Option<&HistoryOutcome>) {
        let frame = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(history) = history {
                state.history = history.clone();
            }
            RenderFrame {
                rendered_at: chrono::Local::now().naive_local(),
                connection: state.connection,
                decode_errors: state.decode_errors,
                live: live.clone(),
                history: state.history.clone(),
            }
        };
        self.frames.send_replace(Some(Arc::new(frame)));
    }
}

impl StatusSink for FrameStore {
    fn report(&self, event: StatusEvent) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match event {
            StatusEvent::Connecting => state.connection = ConnectionState::Connecting,
            StatusEvent::Connected => state.connection = ConnectionState::Connected,
            StatusEvent::Failed => state.connection = ConnectionState::Failed,
            StatusEvent::MessageDecodeError { .. } => state.decode_errors += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_frame_before_first_render() {
        let store = FrameStore::new();
        assert!(store.latest().is_none());
    }

    #[test]
    fn test_history_is_retained_across_frames() {
        let store = FrameStore::new();
        let history = HistoryOutcome::Unavailable {
            reason: "status 500".to_string(),
        };

        store.render(&LiveView::NoDataYet, Some(&history));
        store.render(&LiveView::NoDataYet, None);

        assert_eq!(store.latest().unwrap().history, history);
    }

    #[test]
    fn test_status_events_update_frame() {
        let store = FrameStore::new();
        store.report(StatusEvent::Connecting);
        store.report(StatusEvent::Connected);
        store.report(StatusEvent::MessageDecodeError {
            reason: "bad".to_string(),
        });
        store.render(&LiveView::NoDataYet, None);

        let frame = store.latest().unwrap();
        assert_eq!(frame.connection, ConnectionState::Connected);
        assert_eq!(frame.decode_errors, 1);
    }

    #[test]
    fn test_frame_serializes_with_explicit_states() {
        let store = FrameStore::new();
        store.render(&LiveView::NoDataYet, None);

        let json = serde_json::to_value(&*store.latest().unwrap()).unwrap();
        assert_eq!(json["live"]["state"], "noDataYet");
        assert_eq!(json["history"]["state"], "pending");
        assert_eq!(json["connection"], "disconnected");
    }

    #[tokio::test]
    async fn test_subscribers_see_new_frames() {
        let store = FrameStore::new();
        let mut rx = store.subscribe();

        store.render(&LiveView::NoDataYet, None);

        rx.changed().await.unwrap();
        assert!(rx.borrow().is_some());
    }
}
