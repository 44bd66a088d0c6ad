//! Ordered pattern matching against MX hostnames.

/// A routing rule: if `pattern` is a substring of any of the destination's
/// MX hostnames, mail routes through `group`.
#[derive(Debug, Clone)]
pub struct Rule {
    pub pattern: String,
    pub group: String,
}

impl From<crate::config::RuleConfig> for Rule {
    fn from(rule: crate::config::RuleConfig) -> Self {
        Self {
            pattern: rule.pattern,
            group: rule.group,
        }
    }
}

/// Return the target group of the first rule whose pattern is a substring
/// of any hostname in `hosts`.
///
/// Rules are evaluated in their configured order and hosts in the order
/// DNS returned them; the first hit wins and matching stops. Matching is
/// case-sensitive on the exact configured and resolved strings.
#[must_use]
pub fn first_match<'a>(hosts: &[String], rules: &'a [Rule]) -> Option<&'a Rule> {
    if hosts.is_empty() {
        return None;
    }

    rules
        .iter()
        .find(|rule| hosts.iter().any(|host| host.contains(&rule.pattern)))
}
