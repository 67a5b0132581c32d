//! Subcommand implementations.

pub mod templates;
