//! Dormitory room allocation: priority scoring, constrained bed placement and audit trail.

pub mod allocation;
pub mod config;
pub mod error;
pub mod telemetry;
