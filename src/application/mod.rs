// Application layer - Live buffer, use cases and collaborator traits
pub mod history_repository;
pub mod history_service;
pub mod ingest_service;
pub mod render_scheduler;
pub mod sinks;
pub mod telemetry_buffer;
