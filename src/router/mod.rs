//! Task routing: single-agent vs. multi-agent execution.
//!
//! Rules are evaluated in a fixed order and the first match wins:
//!
//! | Order | Rule          | Confidence |
//! |-------|---------------|------------|
//! | 1     | `override`    | 1.0        |
//! | 2     | `type_flag`   | 0.9        |
//! | 3     | `complexity`  | 0.8        |
//! | 4     | `value`       | 0.7        |
//! | 5     | `default`     | 0.6        |
//!
//! A task with no type, complexity or value estimate still routes to a
//! single agent, flagged `low_confidence`. Routing never blocks on missing
//! metadata.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::task::Task;

/// Confidence assigned when a task carries no routing metadata at all.
const LOW_CONFIDENCE: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingDecision {
    SingleAgent,
    MultiAgent,
    Blocked,
}

impl fmt::Display for RoutingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingDecision::SingleAgent => write!(f, "single_agent"),
            RoutingDecision::MultiAgent => write!(f, "multi_agent"),
            RoutingDecision::Blocked => write!(f, "blocked"),
        }
    }
}

/// The router's output. Produced once per task and stored on the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingAnalysis {
    pub decision: RoutingDecision,
    pub rationale: String,
    /// Ordered specialist roles; empty unless multi-agent.
    #[serde(default)]
    pub roles: Vec<String>,
    pub cost_estimate: f64,
    pub confidence: f64,
    #[serde(default)]
    pub low_confidence: bool,
    pub matched_rule: String,
}

/// Routing thresholds and the type-to-roles table (`[router]` in `warden.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Value estimates at or above this route to multi-agent.
    #[serde(default = "default_value_threshold")]
    pub value_threshold: f64,
    /// Type flags that require multi-agent handling.
    #[serde(default = "default_multi_agent_flags")]
    pub multi_agent_flags: Vec<String>,
    /// Task type to ordered specialist roles.
    #[serde(default = "default_roles")]
    pub roles: HashMap<String, Vec<String>>,
    /// Roles for task types missing from `roles`.
    #[serde(default = "default_fallback_roles")]
    pub default_roles: Vec<String>,
    /// Estimated cost of one agent cycle, in USD.
    #[serde(default = "default_cost_per_iteration")]
    pub cost_per_iteration: f64,
}

fn default_value_threshold() -> f64 {
    50.0
}

fn default_multi_agent_flags() -> Vec<String> {
    vec!["cross_cutting".to_string(), "multi_agent".to_string()]
}

fn default_roles() -> HashMap<String, Vec<String>> {
    let table: [(&str, &[&str]); 4] = [
        ("fix", &["fixer", "test-writer"]),
        ("feature", &["implementer", "test-writer"]),
        ("refactor", &["refactorer", "reviewer"]),
        ("security", &["fixer", "security-reviewer", "test-writer"]),
    ];
    table
        .iter()
        .map(|(ty, roles)| {
            (
                ty.to_string(),
                roles.iter().map(|r| r.to_string()).collect(),
            )
        })
        .collect()
}

fn default_fallback_roles() -> Vec<String> {
    vec!["implementer".to_string(), "reviewer".to_string()]
}

fn default_cost_per_iteration() -> f64 {
    0.5
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            value_threshold: default_value_threshold(),
            multi_agent_flags: default_multi_agent_flags(),
            roles: default_roles(),
            default_roles: default_fallback_roles(),
            cost_per_iteration: default_cost_per_iteration(),
        }
    }
}

impl RouterConfig {
    /// Ordered roles for a task type.
    pub fn roles_for(&self, task_type: Option<&str>) -> Vec<String> {
        task_type
            .and_then(|t| self.roles.get(t))
            .cloned()
            .unwrap_or_else(|| self.default_roles.clone())
    }
}

pub struct TaskRouter {
    config: RouterConfig,
}

impl TaskRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Route a task. `budget` is the per-loop iteration budget used for the
    /// cost estimate.
    pub fn analyze(&self, task: &Task, budget: u32) -> RoutingAnalysis {
        let (decision, rule, confidence, rationale) = self.decide(task);

        let roles = match decision {
            RoutingDecision::MultiAgent => self.config.roles_for(task.task_type.as_deref()),
            _ => Vec::new(),
        };

        let workers = match decision {
            RoutingDecision::MultiAgent => roles.len(),
            RoutingDecision::SingleAgent => 1,
            RoutingDecision::Blocked => 0,
        };
        let cost_estimate = workers as f64 * budget as f64 * self.config.cost_per_iteration;

        let low_confidence = rule == "default" && task.lacks_routing_metadata();

        let analysis = RoutingAnalysis {
            decision,
            rationale: if low_confidence {
                "no routing metadata; defaulting to a single agent".to_string()
            } else {
                rationale
            },
            roles,
            cost_estimate,
            confidence: if low_confidence { LOW_CONFIDENCE } else { confidence },
            low_confidence,
            matched_rule: rule.to_string(),
        };

        tracing::debug!(
            task = %task.id,
            decision = %analysis.decision,
            rule = %analysis.matched_rule,
            "task routed"
        );

        analysis
    }

    fn decide(&self, task: &Task) -> (RoutingDecision, &'static str, f64, String) {
        if let Some(decision) = task.routing_override {
            return (
                decision,
                "override",
                1.0,
                format!("explicit override to {}", decision),
            );
        }

        if let Some(flag) = task
            .type_flags
            .iter()
            .find(|f| self.config.multi_agent_flags.contains(f))
        {
            return (
                RoutingDecision::MultiAgent,
                "type_flag",
                0.9,
                format!("type flag '{}' requires multi-agent handling", flag),
            );
        }

        if let Some(complexity) = task.complexity
            && complexity.is_top_tier()
        {
            return (
                RoutingDecision::MultiAgent,
                "complexity",
                0.8,
                format!("complexity '{}' is in the top tier", complexity),
            );
        }

        if let Some(value) = task.value_estimate
            && value >= self.config.value_threshold
        {
            return (
                RoutingDecision::MultiAgent,
                "value",
                0.7,
                format!(
                    "value estimate {} meets threshold {}",
                    value, self.config.value_threshold
                ),
            );
        }

        (
            RoutingDecision::SingleAgent,
            "default",
            0.6,
            "no multi-agent rule matched".to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Complexity;

    fn router() -> TaskRouter {
        TaskRouter::new(RouterConfig::default())
    }

    #[test]
    fn test_override_wins_over_everything() {
        let mut task = Task::new("t", "d")
            .with_type("fix")
            .with_value_estimate(500.0)
            .with_complexity(Complexity::Critical);
        task.routing_override = Some(RoutingDecision::SingleAgent);
        let analysis = router().analyze(&task, 5);
        assert_eq!(analysis.decision, RoutingDecision::SingleAgent);
        assert_eq!(analysis.matched_rule, "override");
        assert_eq!(analysis.confidence, 1.0);
        assert!(analysis.roles.is_empty());
    }

    #[test]
    fn test_blocked_override_is_verbatim() {
        let mut task = Task::new("t", "d");
        task.routing_override = Some(RoutingDecision::Blocked);
        let analysis = router().analyze(&task, 5);
        assert_eq!(analysis.decision, RoutingDecision::Blocked);
        assert_eq!(analysis.cost_estimate, 0.0);
    }

    #[test]
    fn test_type_flag_before_complexity() {
        let mut task = Task::new("t", "d").with_complexity(Complexity::High);
        task.type_flags = vec!["cross_cutting".into()];
        let analysis = router().analyze(&task, 5);
        assert_eq!(analysis.decision, RoutingDecision::MultiAgent);
        assert_eq!(analysis.matched_rule, "type_flag");
    }

    #[test]
    fn test_top_two_complexity_tiers_route_multi() {
        for (complexity, expected) in [
            (Complexity::Critical, RoutingDecision::MultiAgent),
            (Complexity::High, RoutingDecision::MultiAgent),
            (Complexity::Medium, RoutingDecision::SingleAgent),
        ] {
            let task = Task::new("t", "d").with_complexity(complexity);
            assert_eq!(router().analyze(&task, 5).decision, expected);
        }
    }

    #[test]
    fn test_value_threshold_is_inclusive() {
        let at = Task::new("t", "d").with_value_estimate(50.0);
        let below = Task::new("t", "d").with_value_estimate(49.9);
        assert_eq!(router().analyze(&at, 5).decision, RoutingDecision::MultiAgent);
        assert_eq!(router().analyze(&at, 5).matched_rule, "value");
        assert_eq!(router().analyze(&below, 5).decision, RoutingDecision::SingleAgent);
    }

    #[test]
    fn test_fix_roles_and_cost() {
        let task = Task::new("t", "d").with_type("fix").with_value_estimate(120.0);
        let analysis = router().analyze(&task, 4);
        assert_eq!(analysis.roles, vec!["fixer", "test-writer"]);
        assert_eq!(analysis.cost_estimate, 2.0 * 4.0 * 0.5);
        assert!(!analysis.low_confidence);
    }

    #[test]
    fn test_unknown_type_gets_default_roles() {
        let task = Task::new("t", "d").with_type("docs").with_complexity(Complexity::High);
        let analysis = router().analyze(&task, 1);
        assert_eq!(analysis.roles, vec!["implementer", "reviewer"]);
    }

    #[test]
    fn test_missing_metadata_is_low_confidence_single() {
        let task = Task::new("t", "d");
        let analysis = router().analyze(&task, 5);
        assert_eq!(analysis.decision, RoutingDecision::SingleAgent);
        assert!(analysis.low_confidence);
        assert_eq!(analysis.confidence, LOW_CONFIDENCE);
        assert_eq!(analysis.cost_estimate, 2.5);
    }

    #[test]
    fn test_typed_single_agent_is_not_low_confidence() {
        let task = Task::new("t", "d").with_type("fix");
        let analysis = router().analyze(&task, 5);
        assert_eq!(analysis.decision, RoutingDecision::SingleAgent);
        assert!(!analysis.low_confidence);
    }

    #[test]
    fn test_decision_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&RoutingDecision::MultiAgent).unwrap(),
            "\"multi_agent\""
        );
    }

    #[test]
    fn test_router_config_from_toml() {
        let config: RouterConfig = toml::from_str(
            r#"
value_threshold = 80.0
[roles]
fix = ["fixer"]
"#,
        )
        .unwrap();
        assert_eq!(config.value_threshold, 80.0);
        assert_eq!(config.roles_for(Some("fix")), vec!["fixer"]);
        assert_eq!(config.roles_for(None), vec!["implementer", "reviewer"]);
        assert_eq!(config.cost_per_iteration, 0.5);
    }
}
