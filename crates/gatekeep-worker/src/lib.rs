//! Gatekeep Worker
//!
//! Background draining of blocked consumers for any [`gatekeep_core::ConstraintRegistry`].

pub mod drainer;

pub use drainer::{Promotion, PromotionSender, QueueDrainer};
