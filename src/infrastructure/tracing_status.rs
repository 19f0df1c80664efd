// Status sink that writes connection and decode events to the log
use crate::application::sinks::StatusSink;
use crate::domain::connection::StatusEvent;

#[derive(Debug, Clone)]
pub struct TracingStatusSink {
    topic: String,
}

impl TracingStatusSink {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
        }
    }
}

impl StatusSink for TracingStatusSink {
    fn report(&self, event: StatusEvent) {
        match event {
            StatusEvent::Connecting => tracing::info!(topic = %self.topic, "Connecting to broker"),
            StatusEvent::Connected => tracing::info!(topic = %self.topic, "Connected to broker"),
            StatusEvent::Failed => tracing::error!(topic = %self.topic, "Broker connection failed"),
            StatusEvent::MessageDecodeError { reason } => {
                tracing::warn!(topic = %self.topic, "Invalid message: {}", reason)
            }
        }
    }
}
