//! Data models for the admission engine
//!
//! Identifiers, constraint specifications, consumer records, and the computed
//! runnable read-model.

mod consumer;
mod ids;
mod runnable;
mod spec;

pub use consumer::*;
pub use ids::*;
pub use runnable::*;
pub use spec::*;
