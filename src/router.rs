//! The per-request lookup pipeline.

use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};

use crate::{
    config::Config,
    dns::{MxLookup, MxResolver},
    error::ConfigError,
    matcher::{self, Rule},
    protocol::{Request, Response},
    registry::Registry,
};

/// Owns the resolver, the rule list, and the registry, and drives one
/// request through resolve → match → pool → select.
pub struct Router {
    resolver: MxResolver,
    rules: Vec<Rule>,
    registry: Registry,
}

impl Router {
    /// Assemble the pipeline from a configuration.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the registry is structurally invalid or
    /// a rule targets an unknown group.
    pub fn from_config(config: &Config, lookup: Arc<dyn MxLookup>) -> Result<Self, ConfigError> {
        let registry = Registry::from_config(config)?;

        for rule in &config.rules {
            if !registry.contains(&rule.group) {
                return Err(ConfigError::UnknownRuleGroup {
                    pattern: rule.pattern.clone(),
                    group: rule.group.clone(),
                });
            }
        }

        Ok(Self {
            resolver: MxResolver::new(lookup, Duration::from_secs(config.cache_ttl_secs)),
            rules: config.rules.iter().cloned().map(Rule::from).collect(),
            registry,
        })
    }

    /// Answer one request.
    ///
    /// Never fails: resolution errors degrade to an empty MX list and the
    /// registry decides between a relay and a no-result answer.
    pub async fn lookup(&self, request: &Request) -> Response {
        let Request::Get { key } = request;

        // Postfix probes tables with a lone `*`.
        if key == "*" {
            return Response::NoResult;
        }

        let domain = request.domain();
        let hosts = self.resolver.resolve(&domain).await;

        let matched = matcher::first_match(&hosts, &self.rules);
        if let Some(rule) = matched {
            debug!(
                "Matched {domain} against {:?} via MX: group {}",
                rule.pattern, rule.group
            );
        }

        let Some(pool) = self
            .registry
            .resolve_pool(matched.map(|rule| rule.group.as_str()))
        else {
            debug!("No result for {domain}");
            return Response::NoResult;
        };

        match self.registry.select(&pool) {
            Some(selection) => {
                debug!(
                    "Routing {domain} to {} (group {}, {:?} pool)",
                    selection.server.name, selection.group, pool.kind
                );
                Response::Found(selection.server.address.clone())
            }
            None => {
                warn!("Empty selection pool for {domain}");
                Response::NoResult
            }
        }
    }

    /// The registry, for statistics snapshots.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The caching resolver, for janitor sweeps.
    #[must_use]
    pub fn resolver(&self) -> &MxResolver {
        &self.resolver
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use crate::{config::MissPolicy, dns::DnsError};

    use super::*;

    struct FixedZones {
        zones: HashMap<String, Vec<String>>,
    }

    impl FixedZones {
        fn outlook_and_gmail() -> Arc<Self> {
            let mut zones = HashMap::new();
            zones.insert(
                "outlook.com".to_string(),
                vec!["outlook-com.olc.protection.outlook.com".to_string()],
            );
            zones.insert(
                "gmail.com".to_string(),
                vec![
                    "gmail-smtp-in.l.google.com".to_string(),
                    "alt1.gmail-smtp-in.l.google.com".to_string(),
                ],
            );
            Arc::new(Self { zones })
        }
    }

    #[async_trait]
    impl MxLookup for FixedZones {
        async fn mx_hosts(&self, domain: &str) -> Result<Vec<String>, DnsError> {
            Ok(self.zones.get(domain).cloned().unwrap_or_default())
        }
    }

    fn config() -> Config {
        ron::from_str(
            r#"Config(
                groups: [
                    (name: "microsoft", servers: [
                        (name: "mx1", address: "relay:[o365-relay.example.com]:587"),
                    ]),
                    (name: "fallback", servers: [
                        (name: "mx2", address: "relay:[relay2.example.com]:587"),
                    ]),
                ],
                rules: [(pattern: "protection.outlook.com", group: "microsoft")],
            )"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn matched_rule_routes_to_its_group() {
        let router = Router::from_config(&config(), FixedZones::outlook_and_gmail()).unwrap();

        let request = Request::parse("get user@outlook.com").unwrap();
        assert_eq!(
            router.lookup(&request).await,
            Response::Found("relay:[o365-relay.example.com]:587".into())
        );
    }

    #[tokio::test]
    async fn unmatched_domain_uses_default_group() {
        let mut config = config();
        config.default_group = Some("fallback".into());
        let router = Router::from_config(&config, FixedZones::outlook_and_gmail()).unwrap();

        let request = Request::parse("get user@gmail.com").unwrap();
        assert_eq!(
            router.lookup(&request).await,
            Response::Found("relay:[relay2.example.com]:587".into())
        );
    }

    #[tokio::test]
    async fn no_result_policy_answers_500() {
        let mut config = config();
        config.on_miss = MissPolicy::NoResult;
        let router = Router::from_config(&config, FixedZones::outlook_and_gmail()).unwrap();

        let request = Request::parse("get user@gmail.com").unwrap();
        assert_eq!(router.lookup(&request).await, Response::NoResult);
    }

    #[tokio::test]
    async fn wildcard_probe_answers_no_result() {
        let router = Router::from_config(&config(), FixedZones::outlook_and_gmail()).unwrap();

        let request = Request::parse("get *").unwrap();
        assert_eq!(router.lookup(&request).await, Response::NoResult);
    }

    #[test]
    fn rule_with_unknown_group_is_rejected() {
        let mut config = config();
        config.rules.push(crate::config::RuleConfig {
            pattern: "icloud.com".into(),
            group: "apple".into(),
        });

        assert!(matches!(
            Router::from_config(&config, FixedZones::outlook_and_gmail()),
            Err(ConfigError::UnknownRuleGroup { group, .. }) if group == "apple"
        ));
    }
}
