//! Build triggers
//!
//! The trigger decides whether a delta is required, whether builder state is
//! discarded, and whether an autobuild interruption may cancel the build.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of build requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildTrigger {
    /// Rebuild everything, ignoring deltas
    Full,
    /// Build only what changed since the last build
    Incremental,
    /// Discard built state and outputs
    Clean,
    /// Background build after workspace mutations
    Auto,
}

impl BuildTrigger {
    /// All triggers, in declaration order
    pub const ALL: [Self; 4] = [Self::Full, Self::Incremental, Self::Clean, Self::Auto];

    /// Whether builders run regardless of the delta
    pub fn ignores_delta(self) -> bool {
        matches!(self, Self::Full | Self::Clean)
    }

    /// Whether an autobuild interruption cancels this build
    pub fn is_interruptible(self) -> bool {
        self == Self::Auto
    }

    /// Trigger used by the build loop after the first iteration
    ///
    /// Autobuilds stay interruptible; every other trigger continues
    /// incrementally.
    #[must_use]
    pub fn for_next_iteration(self) -> Self {
        match self {
            Self::Auto => Self::Auto,
            _ => Self::Incremental,
        }
    }
}

impl fmt::Display for BuildTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Incremental => write!(f, "incremental"),
            Self::Clean => write!(f, "clean"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_auto_is_interruptible() {
        for trigger in BuildTrigger::ALL {
            assert_eq!(trigger.is_interruptible(), trigger == BuildTrigger::Auto);
        }
    }

    #[test]
    fn test_next_iteration_is_incremental_except_auto() {
        assert_eq!(
            BuildTrigger::Full.for_next_iteration(),
            BuildTrigger::Incremental
        );
        assert_eq!(
            BuildTrigger::Clean.for_next_iteration(),
            BuildTrigger::Incremental
        );
        assert_eq!(BuildTrigger::Auto.for_next_iteration(), BuildTrigger::Auto);
    }

    #[test]
    fn test_trigger_serializes_lowercase() {
        let json = serde_json::to_string(&BuildTrigger::Incremental).unwrap();
        assert_eq!(json, "\"incremental\"");
    }
}
