// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod frame_store;
pub mod history_api;
pub mod mqtt_ingestor;
pub mod tracing_status;
