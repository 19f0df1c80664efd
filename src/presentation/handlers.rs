// HTTP request handlers
use crate::domain::sample::Sample;
use crate::infrastructure::frame_store::RenderFrame;
use crate::presentation::app_state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::Stream;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Latest rendered frame as JSON
pub async fn latest_frame(State(state): State<Arc<AppState>>) -> Response {
    match state.frames.latest() {
        Some(frame) => Json(RenderFrame::clone(&frame)).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "no frame rendered yet").into_response(),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferStatus {
    pub capacity: usize,
    pub len: usize,
    pub latest: Option<Sample>,
}

/// Fill level and most recent sample of the live buffer
pub async fn buffer_status(State(state): State<Arc<AppState>>) -> Json<BufferStatus> {
    Json(BufferStatus {
        capacity: state.buffer.capacity(),
        len: state.buffer.len(),
        latest: state.buffer.latest(),
    })
}

/// Deliberate reset of the live window
pub async fn reset_buffer(State(state): State<Arc<AppState>>) -> StatusCode {
    state.buffer.clear();
    tracing::info!("Live buffer cleared on request");
    StatusCode::NO_CONTENT
}

/// Server-sent events, one frame per render tick
pub async fn stream_frames(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.frames.subscribe();

    let stream = async_stream::stream! {
        loop {
            let frame = rx.borrow_and_update().clone();
            if let Some(frame) = frame {
                match Event::default().json_data(&*frame) {
                    Ok(event) => yield Ok::<Event, Infallible>(event),
                    Err(e) => tracing::warn!("Failed to encode frame: {}", e),
                }
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
