//! Strongly-typed service configuration.
//!
//! The configuration is loaded once at startup, validated, and treated as
//! immutable input to the routing core. Invalid references (a rule or the
//! default pointing at an unknown group, a group without servers, no
//! servers at all) are fatal before the listener binds, not discovered at
//! first lookup.
//!
//! ```ron
//! Config(
//!     listen: "127.0.0.1:10099",
//!     groups: [
//!         (
//!             name: "good",
//!             servers: [
//!                 (name: "mx1", address: "relay:[relay1.example.com]:587", weight: 40),
//!                 (name: "mx2", address: "relay:[relay2.example.com]:587", weight: 40),
//!                 (name: "mx3", address: "relay:[relay3.example.com]:587", weight: 20),
//!             ],
//!         ),
//!     ],
//!     rules: [
//!         (pattern: "protection.outlook.com", group: "good"),
//!     ],
//! )
//! ```

use std::{net::SocketAddr, path::Path};

use serde::Deserialize;

use crate::error::ConfigError;

/// What to answer when no rule matched and no default group is configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum MissPolicy {
    /// Fall through to the flattened pool of every configured server.
    #[default]
    AllServers,
    /// Answer `500 NO RESULT`, letting Postfix take its default path.
    NoResult,
}

/// One relay target inside a group.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    /// The transport value returned to Postfix, passed through verbatim
    /// (percent-encoded on the wire).
    pub address: String,
    /// Target selection weight, relative to the sum over the pool.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

/// A named, ordered pool of relay servers.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    pub servers: Vec<ServerConfig>,
}

/// An ordered routing rule: first pattern found as a substring of any of
/// the destination's MX hostnames wins.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    pub pattern: String,
    pub group: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address the lookup socket binds to.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// MX cache TTL in seconds. 0 disables caching.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Client inactivity timeout in seconds. 0 disables the timeout.
    #[serde(default = "default_client_timeout_secs")]
    pub client_timeout_secs: u64,

    /// DNS query timeout in seconds.
    #[serde(default = "default_dns_timeout_secs")]
    pub dns_timeout_secs: u64,

    /// Interval between expired-cache sweeps, in seconds.
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,

    /// Group used when no rule matches. Optional.
    #[serde(default)]
    pub default_group: Option<String>,

    /// Behavior when no rule matches and no default group is set.
    #[serde(default)]
    pub on_miss: MissPolicy,

    pub groups: Vec<GroupConfig>,

    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

const fn default_weight() -> u32 {
    100
}

const fn default_listen() -> SocketAddr {
    SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), 10099)
}

const fn default_cache_ttl_secs() -> u64 {
    3600
}

const fn default_client_timeout_secs() -> u64 {
    30
}

const fn default_dns_timeout_secs() -> u64 {
    5
}

const fn default_gc_interval_secs() -> u64 {
    3600
}

impl Config {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = ron::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the structural invariants the routing core relies on.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for duplicate or empty groups, rules or a
    /// default pointing at an unknown group, or zero servers overall.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = std::collections::HashSet::new();
        for group in &self.groups {
            if !names.insert(group.name.as_str()) {
                return Err(ConfigError::DuplicateGroup(group.name.clone()));
            }
            if group.servers.is_empty() {
                return Err(ConfigError::EmptyGroup(group.name.clone()));
            }
        }

        if self.groups.iter().all(|group| group.servers.is_empty()) {
            return Err(ConfigError::NoServers);
        }

        for rule in &self.rules {
            if !names.contains(rule.group.as_str()) {
                return Err(ConfigError::UnknownRuleGroup {
                    pattern: rule.pattern.clone(),
                    group: rule.group.clone(),
                });
            }
        }

        if let Some(default) = &self.default_group
            && !names.contains(default.as_str())
        {
            return Err(ConfigError::UnknownDefaultGroup(default.clone()));
        }

        Ok(())
    }
}
