//! Selection statistics and the shutdown report.

use std::fmt;

/// Live statistics for one server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerStats {
    pub name: String,
    /// Selections recorded for this server.
    pub sent: u64,
    /// Share of the group's selections so far, in percent. 0.0 when the
    /// group has no selections yet.
    pub current: f64,
    /// Configured share of the group's weight, in percent.
    pub target: f64,
}

/// Statistics for one group, servers in configured order.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupStats {
    pub name: String,
    pub servers: Vec<ServerStats>,
}

/// A consistent copy of every group's counters, groups in configured
/// order. Rendered on shutdown as the operator report.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub groups: Vec<GroupStats>,
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, group) in self.groups.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            writeln!(f, "Group {}", group.name)?;
            writeln!(f, "  Name          # Sent |  curr. % / target %")?;
            for server in &group.servers {
                writeln!(
                    f,
                    "    {:<10} {:>7} | {:>8.4} / {:>8.4}",
                    server.name, server.sent, server.current, server.target
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::{config::Config, registry::Registry};

    fn registry() -> Registry {
        let config: Config = ron::from_str(
            r#"Config(
                groups: [
                    (name: "bad", servers: [
                        (name: "mx4", address: "relay:[d.example.com]:587", weight: 10),
                        (name: "mx5", address: "relay:[e.example.com]:587", weight: 1),
                        (name: "mx6", address: "relay:[f.example.com]:587", weight: 10),
                        (name: "mx7", address: "relay:[g.example.com]:587", weight: 10),
                    ]),
                ],
            )"#,
        )
        .unwrap();
        Registry::from_config(&config).unwrap()
    }

    #[test]
    fn single_selection_snapshot() {
        let registry = registry();
        let pool = registry.resolve_pool(Some("bad")).unwrap();
        registry.select(&pool).unwrap();

        let snapshot = registry.snapshot();
        let servers = &snapshot.groups[0].servers;

        assert_eq!(servers[0].sent, 1);
        assert!((servers[0].current - 100.0).abs() < 1e-9);
        assert!((servers[0].target - 100.0 * 10.0 / 31.0).abs() < 1e-9);

        for server in &servers[1..] {
            assert_eq!(server.sent, 0);
            assert!((server.current - 0.0).abs() < f64::EPSILON);
        }
        assert!((servers[1].target - 100.0 / 31.0).abs() < 1e-9);
    }

    #[test]
    fn report_renders_original_table_format() {
        let registry = registry();
        let pool = registry.resolve_pool(Some("bad")).unwrap();
        registry.select(&pool).unwrap();

        let rendered = registry.snapshot().to_string();

        assert_eq!(
            rendered,
            "Group bad\n\
             \x20 Name          # Sent |  curr. % / target %\n\
             \x20   mx4              1 | 100.0000 /  32.2581\n\
             \x20   mx5              0 |   0.0000 /   3.2258\n\
             \x20   mx6              0 |   0.0000 /  32.2581\n\
             \x20   mx7              0 |   0.0000 /  32.2581\n"
        );
    }
}
