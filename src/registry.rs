//! Server groups, pool resolution, and selection bookkeeping.
//!
//! The registry owns the immutable group/server tables and the mutable
//! per-server selection counters. Counters live behind a single mutex so
//! the read-compute-increment sequence of a selection is serialized even
//! when an all-pool selection spans groups, and so a statistics snapshot
//! never observes a selection mid-update.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::{
    config::{Config, MissPolicy},
    error::ConfigError,
    selector,
    stats::{GroupStats, ServerStats, Snapshot},
};

/// One relay target. Immutable for the process lifetime.
#[derive(Debug, Clone)]
pub struct Server {
    pub name: String,
    pub address: String,
    pub weight: u32,
}

/// A named, ordered list of servers.
#[derive(Debug, Clone)]
pub struct Group {
    pub name: String,
    pub servers: Vec<Server>,
}

/// Where a selection pool came from, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    /// A rule matched this group.
    Matched,
    /// No rule matched; the configured default group applies.
    Default,
    /// No rule matched and no default is configured; every server is
    /// eligible, each keeping its grand-total weight share.
    All,
}

/// The set of servers eligible for one selection, as `(group, server)`
/// indices into the registry.
#[derive(Debug, Clone)]
pub struct Pool {
    pub kind: PoolKind,
    members: Vec<(usize, usize)>,
}

/// The outcome of one selection.
#[derive(Debug)]
pub struct Selection<'registry> {
    pub group: &'registry str,
    pub server: &'registry Server,
}

pub struct Registry {
    groups: Vec<Group>,
    by_name: HashMap<String, usize>,
    default_group: Option<usize>,
    on_miss: MissPolicy,
    /// Selections per server, indexed `[group][server]`.
    counters: Mutex<Vec<Vec<u64>>>,
}

impl Registry {
    /// Build the registry from a validated configuration.
    ///
    /// # Errors
    ///
    /// Re-checks the structural invariants (duplicate/empty groups, the
    /// default group reference, zero servers overall) so a registry can
    /// only exist in a valid state.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut groups = Vec::with_capacity(config.groups.len());
        let mut by_name = HashMap::with_capacity(config.groups.len());

        for (index, group) in config.groups.iter().enumerate() {
            if by_name.insert(group.name.clone(), index).is_some() {
                return Err(ConfigError::DuplicateGroup(group.name.clone()));
            }
            if group.servers.is_empty() {
                return Err(ConfigError::EmptyGroup(group.name.clone()));
            }

            groups.push(Group {
                name: group.name.clone(),
                servers: group
                    .servers
                    .iter()
                    .map(|server| Server {
                        name: server.name.clone(),
                        address: server.address.clone(),
                        weight: server.weight,
                    })
                    .collect(),
            });
        }

        if groups.is_empty() {
            return Err(ConfigError::NoServers);
        }

        let default_group = match &config.default_group {
            Some(name) => Some(
                by_name
                    .get(name)
                    .copied()
                    .ok_or_else(|| ConfigError::UnknownDefaultGroup(name.clone()))?,
            ),
            None => None,
        };

        let counters = groups
            .iter()
            .map(|group| vec![0_u64; group.servers.len()])
            .collect();

        Ok(Self {
            groups,
            by_name,
            default_group,
            on_miss: config.on_miss,
            counters: Mutex::new(counters),
        })
    }

    /// Whether a group with this name is configured.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Resolve the selection pool for a request.
    ///
    /// Priority: the matched group, else the configured default group,
    /// else every configured server — unless the miss policy asks for a
    /// no-result answer instead, in which case `None` is returned.
    #[must_use]
    pub fn resolve_pool(&self, matched: Option<&str>) -> Option<Pool> {
        if let Some(name) = matched
            && let Some(&group) = self.by_name.get(name)
        {
            return Some(self.group_pool(group, PoolKind::Matched));
        }

        if let Some(group) = self.default_group {
            return Some(self.group_pool(group, PoolKind::Default));
        }

        match self.on_miss {
            MissPolicy::AllServers => Some(Pool {
                kind: PoolKind::All,
                members: self
                    .groups
                    .iter()
                    .enumerate()
                    .flat_map(|(group, entry)| {
                        (0..entry.servers.len()).map(move |server| (group, server))
                    })
                    .collect(),
            }),
            MissPolicy::NoResult => None,
        }
    }

    fn group_pool(&self, group: usize, kind: PoolKind) -> Pool {
        Pool {
            kind,
            members: (0..self.groups[group].servers.len())
                .map(|server| (group, server))
                .collect(),
        }
    }

    /// Pick the next server from `pool` and record the selection.
    ///
    /// The deficit computation and the counter increment happen under one
    /// lock, so concurrent selections never act on the same stale totals.
    /// Returns `None` only for an empty pool, which a validated registry
    /// never produces.
    #[must_use]
    pub fn select(&self, pool: &Pool) -> Option<Selection<'_>> {
        let mut counters = self.counters.lock();

        let candidates: Vec<(u32, u64)> = pool
            .members
            .iter()
            .map(|&(group, server)| {
                (
                    self.groups[group].servers[server].weight,
                    counters[group][server],
                )
            })
            .collect();

        let (group, server) = pool.members[selector::pick(&candidates)?];
        counters[group][server] += 1;

        Some(Selection {
            group: &self.groups[group].name,
            server: &self.groups[group].servers[server],
        })
    }

    /// A consistent copy of the per-group statistics, taken under the
    /// same lock that serializes selections.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let counters = self.counters.lock();

        let groups = self
            .groups
            .iter()
            .zip(counters.iter())
            .map(|(group, sent)| {
                let group_total: u64 = sent.iter().sum();
                let weight_total: u64 = group
                    .servers
                    .iter()
                    .map(|server| u64::from(server.weight))
                    .sum();

                GroupStats {
                    name: group.name.clone(),
                    servers: group
                        .servers
                        .iter()
                        .zip(sent.iter())
                        .map(|(server, &sent)| ServerStats {
                            name: server.name.clone(),
                            sent,
                            current: percent(sent, group_total),
                            target: percent(u64::from(server.weight), weight_total),
                        })
                        .collect(),
                }
            })
            .collect();

        Snapshot { groups }
    }
}

#[allow(clippy::cast_precision_loss)]
fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}
