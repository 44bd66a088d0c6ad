//! The Postfix tcp_table request/response protocol.
//!
//! One request per line: `get <key>`. Responses are a status code and a
//! percent-encoded payload: `200 <relay>` on success, `500 NO%20RESULT`
//! when there is nothing to answer, `400 <reason>` for lines this table
//! cannot parse. See <https://www.postfix.org/tcp_table.5.html>.

use std::fmt;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::error::ProtocolError;

/// Everything except alphanumerics and `-._~/`, matching how Postfix's
/// own tcp_table client quotes values.
const ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// A parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `get <key>` — look up a routing decision for `key`.
    Get { key: String },
}

impl Request {
    /// Parse one request line (without the trailing newline).
    ///
    /// The verb is matched case-insensitively; the key is everything after
    /// the first run of whitespace.
    ///
    /// # Errors
    ///
    /// Returns a `ProtocolError` for an empty line, an unknown verb, or a
    /// `get` without a key.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ProtocolError::EmptyRequest);
        }

        let (verb, rest) = line
            .split_once(char::is_whitespace)
            .unwrap_or((line, ""));

        if !verb.eq_ignore_ascii_case("get") {
            return Err(ProtocolError::UnknownVerb(verb.to_string()));
        }

        let key = rest.trim();
        if key.is_empty() {
            return Err(ProtocolError::MissingKey);
        }

        Ok(Self::Get {
            key: key.to_string(),
        })
    }

    /// The destination domain of this request: the lower-cased part after
    /// the last `@` if the key is an address, else the whole key.
    #[must_use]
    pub fn domain(&self) -> String {
        let Self::Get { key } = self;
        key.rsplit_once('@')
            .map_or(key.as_str(), |(_, domain)| domain)
            .to_ascii_lowercase()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self::Get { key } = self;
        write!(f, "get {key}")
    }
}

/// A response line, rendered without the trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `200 <relay>` — the routing decision.
    Found(String),
    /// `500 NO RESULT` — no decision; Postfix takes its default path.
    NoResult,
    /// `400 <reason>` — the request line could not be understood.
    BadRequest(String),
}

impl From<ProtocolError> for Response {
    fn from(err: ProtocolError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Found(relay) => {
                write!(f, "200 {}", utf8_percent_encode(relay, ENCODE_SET))
            }
            Self::NoResult => write!(f, "500 {}", utf8_percent_encode("NO RESULT", ENCODE_SET)),
            Self::BadRequest(reason) => {
                write!(f, "400 {}", utf8_percent_encode(reason, ENCODE_SET))
            }
        }
    }
}
