//! Helpers shared by the demos

pub mod config;
pub mod tracing;
