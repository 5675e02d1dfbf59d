//! Instance status state variable

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a single supervised OS process.
///
/// `pid` is valid while the status is one of `starting`/`running`/`stopping`;
/// an instance that reaches `stopped` or `failed` is removed from its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
    Updating,
}

impl InstanceStatus {
    /// Statuses after which the instance no longer owns its port
    pub fn is_terminal(self) -> bool {
        matches!(self, InstanceStatus::Stopped | InstanceStatus::Failed)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Starting => "starting",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopping => "stopping",
            InstanceStatus::Failed => "failed",
            InstanceStatus::Updating => "updating",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_wire_format() {
        assert_eq!(InstanceStatus::Running.to_string(), "running");
        assert_eq!(InstanceStatus::Stopping.to_string(), "stopping");
    }

    #[test]
    fn test_serde_round_trip() {
        let json = serde_json::to_string(&InstanceStatus::Failed).unwrap();
        assert_eq!(json, "\"failed\"");
        let back: InstanceStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, InstanceStatus::Failed);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(InstanceStatus::Stopped.is_terminal());
        assert!(InstanceStatus::Failed.is_terminal());
        assert!(!InstanceStatus::Stopping.is_terminal());
        assert!(!InstanceStatus::Running.is_terminal());
    }
}
