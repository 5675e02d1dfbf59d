//! Load balancer routing rules

use serde::{Deserialize, Serialize};

/// Backend selection strategy for a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Primary,
    RoundRobin,
    /// Documented but presently served as round-robin; connection tracking
    /// is not implemented.
    LeastConnections,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Primary
    }
}

/// A single routing rule: method-name patterns, ordered targets, strategy.
/// Routes are matched in declaration order; first match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub methods: Vec<String>,
    pub target_processes: Vec<String>,
    #[serde(default)]
    pub strategy: Strategy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_wire_format() {
        let s: Strategy = serde_yaml::from_str("round_robin").unwrap();
        assert_eq!(s, Strategy::RoundRobin);
        let s: Strategy = serde_yaml::from_str("least_connections").unwrap();
        assert_eq!(s, Strategy::LeastConnections);
    }

    #[test]
    fn test_strategy_defaults_to_primary() {
        let route: RouteConfig = serde_yaml::from_str(
            "methods: [\"^/pkg\\\\.A/.*$\"]\ntarget_processes: [p1]\n",
        )
        .unwrap();
        assert_eq!(route.strategy, Strategy::Primary);
    }
}
