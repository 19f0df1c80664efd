// Ingest service - Decode broker payloads into samples and buffer them
use crate::application::sinks::StatusSink;
use crate::application::telemetry_buffer::TelemetryBuffer;
use crate::domain::connection::StatusEvent;
use crate::domain::sample::Sample;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,

    #[error("payload {0:?} is not a number")]
    NotNumeric(String),

    #[error("payload {0:?} is not a finite number")]
    NonFinite(String),
}

/// Parse a UTF-8 decimal payload such as `b"21.5"` or `b" 21,5\n"`.
pub fn decode_payload(payload: &[u8]) -> Result<f64, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(|_| DecodeError::NotUtf8)?;
    let trimmed = text.trim();

    // Accept a single decimal comma, as some publishers use it
    let normalized = if trimmed.matches(',').count() == 1 && !trimmed.contains('.') {
        trimmed.replace(',', ".")
    } else {
        trimmed.to_string()
    };

    let value: f64 = normalized
        .parse()
        .map_err(|_| DecodeError::NotNumeric(trimmed.to_string()))?;

    if !value.is_finite() {
        return Err(DecodeError::NonFinite(trimmed.to_string()));
    }
    Ok(value)
}

/// Handles inbound messages for the ingestor.
pub struct IngestService {
    buffer: Arc<TelemetryBuffer>,
    status: Arc<dyn StatusSink>,
}

impl IngestService {
    pub fn new(buffer: Arc<TelemetryBuffer>, status: Arc<dyn StatusSink>) -> Self {
        Self { buffer, status }
    }

    /// Decode and buffer one payload. A malformed payload is dropped and
    /// reported; the buffer is left untouched.
    pub fn handle_payload(&self, topic: &str, payload: &[u8]) -> Result<Sample, DecodeError> {
        match decode_payload(payload) {
            Ok(value) => {
                let sample = Sample::received_now(value);
                self.buffer.push(sample);
                tracing::debug!("[{}] {}", topic, value);
                Ok(sample)
            }
            Err(e) => {
                tracing::warn!("Dropping message on {}: {}", topic, e);
                self.status.report(StatusEvent::MessageDecodeError {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    pub fn report(&self, event: StatusEvent) {
        self.status.report(event);
    }
}
