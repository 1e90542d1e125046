//! Gatekeep Database Layer
//!
//! PostgreSQL implementation of [`gatekeep_core::ConstraintRegistry`] plus pool and
//! migration setup.

pub mod db;
pub mod setup;

pub use db::PgConstraintRegistry;
pub use setup::{connect, setup_database};
