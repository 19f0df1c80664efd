// Domain layer - Value types and pure state machines
pub mod connection;
pub mod history;
pub mod sample;
