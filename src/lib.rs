//! Rat Watch — warehouse pest detection and mitigation pipeline.

pub mod bus;
pub mod config;
pub mod error;
pub mod notify;
pub mod oracle;
pub mod pipeline;
pub mod resilience;
pub mod schema;
pub mod source;
pub mod store;
pub mod telemetry;
