// Presentation layer - HTTP read surface over rendered frames
pub mod app_state;
pub mod handlers;
