//! Registry repositories
//
// Constraint, unit and consumer tables
pub mod constraint;

pub use constraint::PgConstraintRegistry;
