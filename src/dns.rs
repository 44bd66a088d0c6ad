//! MX resolution with TTL caching.
//!
//! Resolution fails open: any DNS failure is logged and answered as an
//! empty MX list so the request proceeds to fallback pool selection, and
//! the failure is never cached (a transient error is retried on the next
//! lookup). A domain that exists but has no MX records is a positive
//! answer and is cached like any other.
//!
//! The concrete resolver sits behind the [`MxLookup`] trait so tests can
//! drive the pipeline with a scripted lookup.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;
use hickory_resolver::{
    TokioResolver,
    config::ResolverOpts,
    name_server::TokioConnectionProvider,
};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur during MX resolution.
#[derive(Debug, Error)]
pub enum DnsError {
    /// DNS query failed due to network or resolver issues, or NXDOMAIN.
    #[error("MX lookup failed: {0}")]
    Lookup(#[from] hickory_resolver::ResolveError),

    /// DNS query timed out.
    #[error("MX lookup timed out for {0}")]
    Timeout(String),
}

/// An MX query: domain in, exchanger hostnames out in preference order.
#[async_trait]
pub trait MxLookup: Send + Sync {
    /// Resolve the MX hostnames for `domain`, lower-cased, without the
    /// trailing root dot, ordered by ascending MX preference.
    ///
    /// An existing domain with no MX records is `Ok` with an empty list.
    ///
    /// # Errors
    ///
    /// Returns `DnsError` on NXDOMAIN, timeout, or any resolver failure.
    async fn mx_hosts(&self, domain: &str) -> Result<Vec<String>, DnsError>;
}

/// [`MxLookup`] backed by the system's configured DNS via hickory.
#[derive(Debug)]
pub struct DnsMx {
    resolver: TokioResolver,
}

impl DnsMx {
    /// Create a resolver using the system DNS configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the system DNS configuration cannot be loaded.
    pub fn new(timeout: Duration) -> Result<Self, DnsError> {
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;

        let resolver = TokioResolver::builder(TokioConnectionProvider::default())?
            .with_options(opts)
            .build();

        Ok(Self { resolver })
    }
}

#[async_trait]
impl MxLookup for DnsMx {
    async fn mx_hosts(&self, domain: &str) -> Result<Vec<String>, DnsError> {
        match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => {
                let mut records: Vec<(u16, String)> = lookup
                    .iter()
                    .map(|mx| {
                        let host = mx.exchange().to_utf8();
                        let host = host.trim_end_matches('.').to_ascii_lowercase();
                        debug!("Found MX record: {host} (preference: {})", mx.preference());
                        (mx.preference(), host)
                    })
                    .collect();

                // Stable sort keeps the DNS answer order within a preference.
                records.sort_by_key(|(preference, _)| *preference);

                Ok(records.into_iter().map(|(_, host)| host).collect())
            }
            Err(err) if err.is_no_records_found() && !err.is_nx_domain() => {
                debug!("No MX records for {domain}");
                Ok(Vec::new())
            }
            Err(err) => Err(DnsError::Lookup(err)),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    hosts: Arc<Vec<String>>,
    expires_at: Instant,
}

/// TTL cache in front of an [`MxLookup`].
///
/// Reads are concurrent; a racing miss-then-populate for the same domain
/// is last-writer-wins, which is acceptable since both writers hold an
/// answer for the same question.
pub struct MxResolver {
    lookup: Arc<dyn MxLookup>,
    cache: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl MxResolver {
    /// A zero `ttl` disables caching entirely.
    pub fn new(lookup: Arc<dyn MxLookup>, ttl: Duration) -> Self {
        Self {
            lookup,
            cache: DashMap::new(),
            ttl,
        }
    }

    /// Resolve `domain`, consulting the cache first.
    ///
    /// Never fails: resolver errors are logged and answered as an empty
    /// host list, and are not cached.
    pub async fn resolve(&self, domain: &str) -> Arc<Vec<String>> {
        if !self.ttl.is_zero() {
            if let Some(entry) = self.cache.get(domain) {
                if entry.expires_at > Instant::now() {
                    debug!("Cache hit for {domain}, {} host(s)", entry.hosts.len());
                    return Arc::clone(&entry.hosts);
                }
                debug!("Cache entry expired for {domain}");
            }
        }

        match self.lookup.mx_hosts(domain).await {
            Ok(hosts) => {
                let hosts = Arc::new(hosts);
                if !self.ttl.is_zero() {
                    self.cache.insert(
                        domain.to_string(),
                        CacheEntry {
                            hosts: Arc::clone(&hosts),
                            expires_at: Instant::now() + self.ttl,
                        },
                    );
                }
                hosts
            }
            Err(err) => {
                warn!("MX lookup failed for {domain}: {err}");
                Arc::new(Vec::new())
            }
        }
    }

    /// Drop expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.cache.len();
        let now = Instant::now();
        self.cache.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.cache.len())
    }

    /// Number of cached domains.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use parking_lot::Mutex;

    use super::*;

    struct Scripted {
        calls: AtomicUsize,
        script: Mutex<VecDeque<Result<Vec<String>, DnsError>>>,
    }

    impl Scripted {
        fn new(script: Vec<Result<Vec<String>, DnsError>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(script.into()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MxLookup for Scripted {
        async fn mx_hosts(&self, _domain: &str) -> Result<Vec<String>, DnsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn second_lookup_within_ttl_hits_cache() {
        let lookup = Arc::new(Scripted::new(vec![Ok(hosts(&["mx.example.com"]))]));
        let resolver = MxResolver::new(lookup.clone(), Duration::from_secs(3600));

        let first = resolver.resolve("example.com").await;
        let second = resolver.resolve("example.com").await;

        assert_eq!(*first, hosts(&["mx.example.com"]));
        assert_eq!(first, second);
        assert_eq!(lookup.calls(), 1);
    }

    #[tokio::test]
    async fn zero_ttl_disables_cache() {
        let lookup = Arc::new(Scripted::new(vec![
            Ok(hosts(&["mx.example.com"])),
            Ok(hosts(&["mx.example.com"])),
        ]));
        let resolver = MxResolver::new(lookup.clone(), Duration::ZERO);

        resolver.resolve("example.com").await;
        resolver.resolve("example.com").await;

        assert_eq!(lookup.calls(), 2);
        assert_eq!(resolver.cached(), 0);
    }

    #[tokio::test]
    async fn failure_fails_open_and_is_not_cached() {
        let lookup = Arc::new(Scripted::new(vec![
            Err(DnsError::Timeout("example.com".into())),
            Ok(hosts(&["mx.example.com"])),
        ]));
        let resolver = MxResolver::new(lookup.clone(), Duration::from_secs(3600));

        let first = resolver.resolve("example.com").await;
        assert!(first.is_empty());
        assert_eq!(resolver.cached(), 0);

        let second = resolver.resolve("example.com").await;
        assert_eq!(*second, hosts(&["mx.example.com"]));
        assert_eq!(lookup.calls(), 2);
    }

    #[tokio::test]
    async fn empty_answer_is_cached() {
        let lookup = Arc::new(Scripted::new(vec![Ok(Vec::new())]));
        let resolver = MxResolver::new(lookup.clone(), Duration::from_secs(3600));

        assert!(resolver.resolve("example.com").await.is_empty());
        assert!(resolver.resolve("example.com").await.is_empty());
        assert_eq!(lookup.calls(), 1);
        assert_eq!(resolver.cached(), 1);
    }

    #[tokio::test]
    async fn purge_drops_only_expired_entries() {
        let lookup = Arc::new(Scripted::new(vec![Ok(hosts(&["mx.example.com"]))]));
        let resolver = MxResolver::new(lookup, Duration::from_secs(3600));

        resolver.resolve("example.com").await;
        assert_eq!(resolver.purge_expired(), 0);
        assert_eq!(resolver.cached(), 1);
    }
}
