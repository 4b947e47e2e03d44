//! Subcommand implementations

pub mod actions;
pub mod decisions;
pub mod policy;
pub mod runs;
