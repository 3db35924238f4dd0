//! CLI subcommand implementations.

pub mod config;
pub mod engine;
pub mod export;
pub mod jobs;
pub mod opex;
pub mod worker;
