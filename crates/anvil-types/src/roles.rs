use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// What happens to a method that appears in neither name set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RolePolicy {
    #[default]
    AllowByDefault,
    DenyByDefault,
}

/// A data-driven method filter attached to a session.
///
/// A pair of disjoint method-name sets plus a default policy. The deny set
/// wins over the allow set; methods in neither fall through to the policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRuleset {
    pub role_name: String,
    #[serde(default)]
    pub allowed: BTreeSet<String>,
    #[serde(default)]
    pub denied: BTreeSet<String>,
    #[serde(default)]
    pub default_policy: RolePolicy,
}

impl RoleRuleset {
    /// A ruleset that permits everything. Used when no role is configured.
    pub fn unrestricted() -> Self {
        Self {
            role_name: "unrestricted".to_string(),
            allowed: BTreeSet::new(),
            denied: BTreeSet::new(),
            default_policy: RolePolicy::AllowByDefault,
        }
    }

    /// A ruleset permitting exactly the listed methods.
    pub fn allow_only<I, S>(role_name: &str, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            role_name: role_name.to_string(),
            allowed: methods.into_iter().map(Into::into).collect(),
            denied: BTreeSet::new(),
            default_policy: RolePolicy::DenyByDefault,
        }
    }

    pub fn permits(&self, method: &str) -> bool {
        if self.denied.contains(method) {
            return false;
        }
        if self.allowed.contains(method) {
            return true;
        }
        matches!(self.default_policy, RolePolicy::AllowByDefault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_wins_over_allow() {
        let mut rules = RoleRuleset::unrestricted();
        rules.allowed.insert("entity.create.point".into());
        rules.denied.insert("entity.create.point".into());
        assert!(!rules.permits("entity.create.point"));
    }

    #[test]
    fn allow_only_denies_the_rest() {
        let rules = RoleRuleset::allow_only("validator", ["entity.query", "entity.list"]);
        assert!(rules.permits("entity.query"));
        assert!(!rules.permits("solid.extrude"));
    }
}
