//! Endpoint host resolution through a specific DNS server.

use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use async_trait::async_trait;
use hickory_resolver::{
    config::{NameServerConfigGroup, ResolverConfig, ResolverOpts},
    error::ResolveError,
    TokioAsyncResolver,
};
use snafu::{ResultExt as _, Snafu};
use tracing::debug;

const DEFAULT_DNS_PORT: u16 = 53;

/// A lookup error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum LookupError {
    /// The DNS query failed.
    #[snafu(display("DNS query for '{}' via {} failed: {}", host, server, source))]
    Query {
        /// Host being resolved.
        host: String,

        /// DNS server queried.
        server: SocketAddr,

        /// Error source.
        source: ResolveError,
    },

    /// The DNS query succeeded but returned no addresses.
    #[snafu(display("DNS query for '{}' via {} returned no addresses.", host, server))]
    NoAddresses {
        /// Host being resolved.
        host: String,

        /// DNS server queried.
        server: SocketAddr,
    },
}

/// Resolves hostnames to IP addresses.
#[async_trait]
pub trait Resolve: Send + Sync {
    /// Resolves `host` into one or more addresses, in the order they were returned.
    ///
    /// # Errors
    ///
    /// If the lookup fails, or yields no addresses, an error is returned.
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, LookupError>;
}

/// Parses a DNS server address, given either as `ip` or `ip:port`.
///
/// The port defaults to 53.
pub fn parse_dns_server(raw: &str) -> Option<SocketAddr> {
    let raw = raw.trim();
    raw.parse::<SocketAddr>()
        .ok()
        .or_else(|| raw.parse::<IpAddr>().ok().map(|ip| SocketAddr::new(ip, DEFAULT_DNS_PORT)))
}

/// A resolver that queries a single, fixed DNS server.
///
/// The system resolver configuration and hosts file are bypassed entirely. No answers are cached: every call to
/// [`resolve`][Resolve::resolve] issues a fresh query, so the endpoint's current address is always used.
#[derive(Clone, Debug)]
pub struct DnsResolver {
    server: SocketAddr,
    timeout: Duration,
    attempts: usize,
}

impl DnsResolver {
    /// Creates a new `DnsResolver` that queries the given server.
    pub fn new(server: SocketAddr) -> Self {
        Self {
            server,
            timeout: Duration::from_secs(5),
            attempts: 2,
        }
    }

    /// Sets the timeout for each query attempt.
    ///
    /// Defaults to 5 seconds.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the number of attempts made before a query is considered failed.
    ///
    /// Defaults to 2.
    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    fn build_resolver(&self) -> TokioAsyncResolver {
        let name_servers = NameServerConfigGroup::from_ips_clear(&[self.server.ip()], self.server.port(), true);
        let config = ResolverConfig::from_parts(None, Vec::new(), name_servers);

        let mut opts = ResolverOpts::default();
        opts.timeout = self.timeout;
        opts.attempts = self.attempts;
        opts.use_hosts_file = false;

        TokioAsyncResolver::tokio(config, opts)
    }
}

#[async_trait]
impl Resolve for DnsResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, LookupError> {
        let lookup = self.build_resolver().lookup_ip(host).await.context(Query {
            host,
            server: self.server,
        })?;

        let addrs = lookup.iter().collect::<Vec<_>>();
        if addrs.is_empty() {
            return Err(LookupError::NoAddresses {
                host: host.to_string(),
                server: self.server,
            });
        }

        debug!(host, server = %self.server, addrs = ?addrs, "Resolved endpoint host.");
        Ok(addrs)
    }
}
