//! Typed errors for configuration loading and connection handling.
//!
//! Configuration errors are fatal at startup, before the listener binds.
//! Protocol errors are answered in-band with a `400` response and never
//! close the connection; session errors close the affected connection only.

use thiserror::Error;

/// Errors raised while loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid RON.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// Two groups share the same name.
    #[error("Duplicate group name: {0}")]
    DuplicateGroup(String),

    /// A group was configured without any servers.
    #[error("Group {0} has no servers")]
    EmptyGroup(String),

    /// A rule references a group that does not exist.
    #[error("Rule {pattern:?} targets unknown group {group:?}")]
    UnknownRuleGroup { pattern: String, group: String },

    /// The default group references a group that does not exist.
    #[error("Default group {0:?} is not configured")]
    UnknownDefaultGroup(String),

    /// No servers are configured anywhere.
    #[error("No servers configured")]
    NoServers,
}

/// Errors in a single request line, reported back to the peer as a `400`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The request line was empty.
    #[error("empty request")]
    EmptyRequest,

    /// The verb is not one this table understands.
    #[error("unsupported request: {0}")]
    UnknownVerb(String),

    /// A `get` with nothing to look up.
    #[error("missing lookup key")]
    MissingKey,
}

/// Transport-level failures on one connection.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The underlying socket failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
