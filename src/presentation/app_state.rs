// Application state for HTTP handlers
use crate::application::telemetry_buffer::TelemetryBuffer;
use crate::infrastructure::frame_store::FrameStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub frames: Arc<FrameStore>,
    pub buffer: Arc<TelemetryBuffer>,
}
