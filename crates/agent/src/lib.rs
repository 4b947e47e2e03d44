//! Cost optimizer daemon
//!
//! The binary wires the engine from `agent-lib` to HTTP telemetry and
//! control surface adapters. The API and configuration live here so
//! integration tests can drive them.

pub mod api;
pub mod config;
