//! Structured log pipeline: records are routed through named channels to
//! formatters and sinks, including a reconnecting collector transport.

pub mod commands;
pub mod config;
pub mod logging;
