use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// How blocked consumers of a unit are admitted once capacity frees up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Strategy {
    /// Strict arrival order: a blocked consumer holds back everything behind it.
    Fifo,
    /// First fit by arrival order: consumers that do not fit are skipped.
    Asap,
}

impl Strategy {
    /// Whether the admission scan stops at the first consumer that does not fit.
    pub fn stops_at_first_miss(&self) -> bool {
        matches!(self, Strategy::Fifo)
    }
}

impl Display for Strategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Strategy::Fifo => write!(f, "FIFO"),
            Strategy::Asap => write!(f, "ASAP"),
        }
    }
}

impl FromStr for Strategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FIFO" => Ok(Strategy::Fifo),
            "ASAP" => Ok(Strategy::Asap),
            _ => Err(anyhow::anyhow!("Invalid strategy: {}", s)),
        }
    }
}

/// Strategy plus total permit capacity per unit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Spec {
    pub strategy: Strategy,
    pub limits: u32,
}

impl Spec {
    pub fn new(strategy: Strategy, limits: u32) -> Self {
        Self { strategy, limits }
    }

    /// Whether `permits` is a valid request against this capacity.
    pub fn accepts_permits(&self, permits: u32) -> bool {
        permits > 0 && permits <= self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_display_and_parse() {
        assert_eq!(Strategy::Fifo.to_string(), "FIFO");
        assert_eq!(Strategy::Asap.to_string(), "ASAP");
        assert_eq!("fifo".parse::<Strategy>().unwrap(), Strategy::Fifo);
        assert_eq!("ASAP".parse::<Strategy>().unwrap(), Strategy::Asap);
        assert!("lifo".parse::<Strategy>().is_err());
    }

    #[test]
    fn spec_permit_bounds() {
        let spec = Spec::new(Strategy::Fifo, 10);
        assert!(!spec.accepts_permits(0));
        assert!(spec.accepts_permits(1));
        assert!(spec.accepts_permits(10));
        assert!(!spec.accepts_permits(11));
    }
}
