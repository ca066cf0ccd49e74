//!
//! src/lib.rs
//!
//! Moves a youtube playlist onto spotify: reads the source playlist, matches
//! each track against the spotify catalog and writes the matches into a new
//! private playlist
//!

pub mod auth;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod fetch;
pub mod logging;
pub mod matcher;
pub mod orchestrator;
pub mod persistent;
pub mod service;
pub mod source;
pub mod types;
pub mod writer;

pub use errors::MigrateError;
pub use service::{MigrationPlan, MigrationReport, Migrator};
