//! Approval policy table for tool calls
//!
//! Each rule maps a tool-name pattern to an action. Evaluation order:
//! 1. Exact name match
//! 2. Longest matching prefix wildcard (`get_*`, `fs_*`, `*`)
//! 3. The table default

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Decision for a tool call before it may execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    /// Execute without asking
    AutoApprove,
    /// Suspend until an approval decision arrives (or times out)
    RequireApproval,
    /// Never execute
    AlwaysDeny,
}

impl PolicyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyAction::AutoApprove => "auto_approve",
            PolicyAction::RequireApproval => "require_approval",
            PolicyAction::AlwaysDeny => "always_deny",
        }
    }
}

/// Tool policy table
///
/// ```rust
/// use a3s_orchestrator::tools::policy::{PolicyAction, ToolPolicy};
///
/// let policy = ToolPolicy::new(PolicyAction::RequireApproval)
///     .with_rule("get_*", PolicyAction::AutoApprove)
///     .with_rule("get_secret", PolicyAction::AlwaysDeny);
///
/// assert_eq!(policy.evaluate("get_weather"), PolicyAction::AutoApprove);
/// assert_eq!(policy.evaluate("get_secret"), PolicyAction::AlwaysDeny);
/// assert_eq!(policy.evaluate("send_email"), PolicyAction::RequireApproval);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPolicy {
    /// Pattern → action. A pattern ending in `*` is a prefix wildcard.
    #[serde(default)]
    pub rules: BTreeMap<String, PolicyAction>,

    /// Action when no rule matches
    #[serde(default = "default_action")]
    pub default: PolicyAction,
}

fn default_action() -> PolicyAction {
    PolicyAction::AutoApprove
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self::new(default_action())
    }
}

impl ToolPolicy {
    pub fn new(default: PolicyAction) -> Self {
        Self {
            rules: BTreeMap::new(),
            default,
        }
    }

    /// Every call requires approval unless a rule says otherwise
    pub fn require_approval() -> Self {
        Self::new(PolicyAction::RequireApproval)
    }

    pub fn with_rule(mut self, pattern: impl Into<String>, action: PolicyAction) -> Self {
        self.rules.insert(pattern.into(), action);
        self
    }

    /// Resolve the action for a tool name
    pub fn evaluate(&self, tool_name: &str) -> PolicyAction {
        self.evaluate_with_rule(tool_name).0
    }

    /// Resolve the action and report which rule decided it (`None` = default)
    pub fn evaluate_with_rule(&self, tool_name: &str) -> (PolicyAction, Option<&str>) {
        if let Some((pattern, action)) = self.rules.get_key_value(tool_name) {
            if !pattern.ends_with('*') {
                return (*action, Some(pattern.as_str()));
            }
        }

        let best = self
            .rules
            .iter()
            .filter_map(|(pattern, action)| {
                let prefix = pattern.strip_suffix('*')?;
                tool_name
                    .starts_with(prefix)
                    .then_some((prefix.len(), pattern, action))
            })
            .max_by_key(|(len, _, _)| *len);

        match best {
            Some((_, pattern, action)) => (*action, Some(pattern.as_str())),
            None => (self.default, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_auto_approves() {
        let policy = ToolPolicy::default();
        assert_eq!(policy.evaluate("anything"), PolicyAction::AutoApprove);
        assert_eq!(policy.evaluate_with_rule("anything").1, None);
    }

    #[test]
    fn test_exact_beats_wildcard() {
        let policy = ToolPolicy::require_approval()
            .with_rule("fs_*", PolicyAction::AlwaysDeny)
            .with_rule("fs_read", PolicyAction::AutoApprove);

        assert_eq!(policy.evaluate("fs_read"), PolicyAction::AutoApprove);
        assert_eq!(policy.evaluate("fs_write"), PolicyAction::AlwaysDeny);
        assert_eq!(policy.evaluate("http_get"), PolicyAction::RequireApproval);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let policy = ToolPolicy::new(PolicyAction::AlwaysDeny)
            .with_rule("*", PolicyAction::RequireApproval)
            .with_rule("db_*", PolicyAction::AlwaysDeny)
            .with_rule("db_query_*", PolicyAction::AutoApprove);

        assert_eq!(policy.evaluate("db_query_users"), PolicyAction::AutoApprove);
        assert_eq!(policy.evaluate("db_drop"), PolicyAction::AlwaysDeny);
        assert_eq!(policy.evaluate("weather"), PolicyAction::RequireApproval);

        let (_, rule) = policy.evaluate_with_rule("db_query_x");
        assert_eq!(rule, Some("db_query_*"));
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        let policy = ToolPolicy::require_approval().with_rule("Search", PolicyAction::AutoApprove);
        assert_eq!(policy.evaluate("search"), PolicyAction::RequireApproval);
        assert_eq!(policy.evaluate("Search"), PolicyAction::AutoApprove);
    }

    #[test]
    fn test_wildcard_does_not_match_exact_lookup_literally() {
        // A tool literally named "get_*" still resolves through the wildcard path
        let policy = ToolPolicy::require_approval().with_rule("get_*", PolicyAction::AutoApprove);
        assert_eq!(policy.evaluate("get_*"), PolicyAction::AutoApprove);
        assert_eq!(policy.evaluate("get"), PolicyAction::RequireApproval);
    }

    #[test]
    fn test_serde_shape() {
        let policy: ToolPolicy = serde_json::from_str(
            r#"{"rules": {"send_*": "require_approval", "rm": "always_deny"}}"#,
        )
        .unwrap();
        assert_eq!(policy.default, PolicyAction::AutoApprove);
        assert_eq!(policy.evaluate("send_mail"), PolicyAction::RequireApproval);
        assert_eq!(policy.evaluate("rm"), PolicyAction::AlwaysDeny);
        assert_eq!(PolicyAction::AlwaysDeny.as_str(), "always_deny");
    }
}
