//! Opaque identifiers for constraints, units, and consumers.
//!
//! All three are plain strings chosen by callers (e.g. `"concurrent-deploys-per-infra"`,
//! an infrastructure id, a task execution id). No normalization is applied.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Identifies one constrained resource definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstraintId(String);

impl ConstraintId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ConstraintId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConstraintId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ConstraintId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifies one independently tracked partition of a constraint.
///
/// A single constraint definition is shared by many units; queue state is kept
/// per (`ConstraintId`, `ConstraintUnit`) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstraintUnit(String);

impl ConstraintUnit {
    pub fn new(unit: impl Into<String>) -> Self {
        Self(unit.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ConstraintUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConstraintUnit {
    fn from(unit: &str) -> Self {
        Self::new(unit)
    }
}

impl From<String> for ConstraintUnit {
    fn from(unit: String) -> Self {
        Self(unit)
    }
}

/// Identifies one admission request, typically a task or execution id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsumerId(String);

impl ConsumerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ConsumerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConsumerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ConsumerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
