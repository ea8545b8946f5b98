//! Agent configuration.

use std::{net::SocketAddr, num::NonZeroUsize, time::Duration};

use http::Uri;
use snafu::{ResultExt as _, Snafu};
use url::Url;

use crate::{
    backoff::ExponentialBackoff,
    buffer::DEFAULT_MAX_ENTRIES,
    entry::TagSuffix,
    resolver::parse_dns_server,
};

/// Default endpoint URL.
pub const DEFAULT_URL: &str = "http://localhost:8086";

/// Default target database.
pub const DEFAULT_DATABASE: &str = "test";

/// Default time between reports.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default time between delivery attempts when there is nothing to send.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default minimum backoff delay after a failed delivery.
pub const DEFAULT_BACKOFF_MIN: Duration = Duration::from_millis(100);

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Default timeout for establishing a connection to the endpoint.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Smallest minimum backoff factor, which disables jitter.
pub const MIN_BACKOFF_JITTER: f64 = 1.0;

/// Upper bound (exclusive) on the minimum backoff factor.
///
/// Below it, every backoff delay stays longer than the one before, until the cap.
pub const MAX_BACKOFF_JITTER: f64 = 2.0;

const DEFAULT_WRITE_PATH: &str = "/write";

/// A configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigError {
    /// The endpoint URL could not be parsed.
    #[snafu(display("Invalid URL '{}': {}", url, source))]
    InvalidUrl {
        /// URL as given.
        url: String,

        /// Error source.
        source: url::ParseError,
    },

    /// The endpoint URL has no host.
    #[snafu(display("Invalid URL '{}': missing host.", url))]
    MissingHost {
        /// URL as given.
        url: String,
    },

    /// The endpoint URL uses a scheme other than HTTP or HTTPS.
    #[snafu(display("Invalid URL '{}': unsupported scheme '{}' (expected 'http' or 'https').", url, scheme))]
    UnsupportedScheme {
        /// URL as given.
        url: String,

        /// Scheme found in the URL.
        scheme: String,
    },

    /// The normalized endpoint URL could not be used as a request URI.
    #[snafu(display("Invalid URL '{}': {}", url, source))]
    InvalidRequestUri {
        /// Normalized URL.
        url: String,

        /// Error source.
        source: http::uri::InvalidUri,
    },

    /// The DNS server address could not be parsed.
    #[snafu(display("Invalid DNS server '{}': expected an IP address, optionally with a port.", value))]
    InvalidDnsServer {
        /// Address as given.
        value: String,
    },

    /// The minimum backoff factor is outside `[1.0, 2.0)`.
    #[snafu(display("Setting 'backoff-jitter' must be at least 1.0 and below 2.0, got {}.", value))]
    InvalidBackoffJitter {
        /// Factor as given.
        value: f64,
    },

    /// A duration that must be non-zero was zero.
    #[snafu(display("Setting '{}' must be greater than zero.", setting))]
    ZeroDuration {
        /// Name of the setting.
        setting: &'static str,
    },
}

/// Where, and how, entries are delivered.
#[derive(Clone, Debug)]
pub struct EndpointConfig {
    uri: Uri,
    tags: TagSuffix,
    dns_server: Option<SocketAddr>,
}

impl EndpointConfig {
    /// Creates a new `EndpointConfig` writing to `database` on the server at `url`.
    ///
    /// If the URL has no path, `/write` is used. Any query string is replaced with `db=<database>`.
    ///
    /// # Errors
    ///
    /// If the URL cannot be parsed, has no host, or does not use HTTP or HTTPS, an error is returned.
    pub fn new(url: &str, database: &str) -> Result<Self, ConfigError> {
        let mut parsed = Url::parse(url).context(InvalidUrl { url })?;

        if parsed.host_str().unwrap_or_default().is_empty() {
            return Err(ConfigError::MissingHost { url: url.to_string() });
        }

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::UnsupportedScheme {
                url: url.to_string(),
                scheme: parsed.scheme().to_string(),
            });
        }

        if parsed.path().is_empty() || parsed.path() == "/" {
            parsed.set_path(DEFAULT_WRITE_PATH);
        }
        parsed.set_fragment(None);
        parsed.set_query(None);
        parsed.query_pairs_mut().append_pair("db", database);

        let uri = parsed
            .as_str()
            .parse::<Uri>()
            .context(InvalidRequestUri { url: parsed.as_str() })?;

        Ok(Self {
            uri,
            tags: TagSuffix::default(),
            dns_server: None,
        })
    }

    /// Sets the tags appended to every entry, in the form `tag=value,tag=value`.
    ///
    /// The string is used verbatim.
    pub fn with_tags(mut self, tags: &str) -> Self {
        self.tags = TagSuffix::from_raw(tags);
        self
    }

    /// Sets the DNS server used to resolve the endpoint host before each delivery attempt.
    ///
    /// The address is given as `ip` or `ip:port`, with the port defaulting to 53.
    ///
    /// # Errors
    ///
    /// If the address cannot be parsed, an error is returned.
    pub fn with_dns_server(mut self, dns_server: &str) -> Result<Self, ConfigError> {
        let addr = parse_dns_server(dns_server).ok_or_else(|| ConfigError::InvalidDnsServer {
            value: dns_server.to_string(),
        })?;
        self.dns_server = Some(addr);
        Ok(self)
    }

    /// Returns the request URI entries are posted to.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Returns the tags appended to every entry.
    pub fn tags(&self) -> &TagSuffix {
        &self.tags
    }

    /// Returns the DNS server override, if any.
    pub fn dns_server(&self) -> Option<SocketAddr> {
        self.dns_server
    }
}

/// Agent configuration.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    endpoint: EndpointConfig,
    interval: Duration,
    poll_interval: Duration,
    max_entries: NonZeroUsize,
    backoff_min: Duration,
    backoff_jitter: f64,
    request_timeout: Duration,
    connect_timeout: Duration,
}

impl AgentConfig {
    /// Creates a new `AgentConfig` for the given endpoint, with all other settings at their defaults.
    pub fn new(endpoint: EndpointConfig) -> Self {
        Self {
            endpoint,
            interval: DEFAULT_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_entries: DEFAULT_MAX_ENTRIES,
            backoff_min: DEFAULT_BACKOFF_MIN,
            backoff_jitter: 1.0,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sets the time between reports.
    ///
    /// Defaults to 5 minutes.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets how long the sender waits before checking again when there is nothing to send.
    ///
    /// Defaults to 1 second.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Sets the maximum number of buffered entries.
    ///
    /// Defaults to 10,000.
    pub fn with_max_entries(mut self, max_entries: NonZeroUsize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Sets the minimum backoff delay after a failed delivery.
    ///
    /// Defaults to 100 milliseconds.
    pub fn with_backoff_min(mut self, backoff_min: Duration) -> Self {
        self.backoff_min = backoff_min;
        self
    }

    /// Sets the minimum backoff factor. Values above 1.0 enable jitter; values of 2.0 or more are rejected by
    /// [`validate`][Self::validate].
    ///
    /// Defaults to 1.0.
    pub fn with_backoff_jitter(mut self, backoff_jitter: f64) -> Self {
        self.backoff_jitter = backoff_jitter;
        self
    }

    /// Sets the per-request timeout.
    ///
    /// Defaults to 20 seconds.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Sets the timeout for establishing a connection to the endpoint.
    ///
    /// Defaults to 30 seconds.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Checks that all timing settings are usable.
    ///
    /// # Errors
    ///
    /// If any interval, timeout, or the minimum backoff delay is zero, or the minimum backoff factor is outside
    /// `[1.0, 2.0)`, an error is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (setting, value) in [
            ("interval", self.interval),
            ("poll-interval", self.poll_interval),
            ("backoff-min", self.backoff_min),
            ("request-timeout", self.request_timeout),
            ("connect-timeout", self.connect_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { setting });
            }
        }

        // Also rejects NaN.
        if !(MIN_BACKOFF_JITTER..MAX_BACKOFF_JITTER).contains(&self.backoff_jitter) {
            return Err(ConfigError::InvalidBackoffJitter {
                value: self.backoff_jitter,
            });
        }

        Ok(())
    }

    /// Returns the endpoint configuration.
    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    /// Returns the time between reports.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the sender's poll interval.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Returns the maximum number of buffered entries.
    pub fn max_entries(&self) -> NonZeroUsize {
        self.max_entries
    }

    /// Returns the per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Returns the connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the backoff policy for failed deliveries.
    ///
    /// Backoff delays are capped at twice the reporting interval.
    pub fn backoff_policy(&self) -> ExponentialBackoff {
        ExponentialBackoff::with_jitter(self.backoff_min, self.interval.saturating_mul(2), self.backoff_jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_url_gets_write_path_and_database() {
        let endpoint = EndpointConfig::new(DEFAULT_URL, DEFAULT_DATABASE).unwrap();
        assert_eq!(endpoint.uri(), "http://localhost:8086/write?db=test");
        assert_eq!(endpoint.tags().as_str(), "");
        assert_eq!(endpoint.dns_server(), None);
    }

    #[test]
    fn explicit_path_is_kept_and_query_replaced() {
        let endpoint =
            EndpointConfig::new("https://metrics.example.com/api/v1/write?db=old&u=x#frag", "prod db").unwrap();
        assert_eq!(endpoint.uri(), "https://metrics.example.com/api/v1/write?db=prod+db");
    }

    #[test]
    fn unparseable_url_is_rejected() {
        let err = EndpointConfig::new("not a url", "test").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn url_without_host_is_rejected() {
        let err = EndpointConfig::new("localhost:8086", "test").unwrap_err();
        assert!(matches!(err, ConfigError::MissingHost { .. }));

        let err = EndpointConfig::new("unix:/var/run/influxdb.sock", "test").unwrap_err();
        assert!(matches!(err, ConfigError::MissingHost { .. }));
    }

    #[test]
    fn non_http_scheme_is_rejected() {
        let err = EndpointConfig::new("udp://localhost:8089", "test").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedScheme { .. }));
    }

    #[test]
    fn tags_and_dns_server() {
        let endpoint = EndpointConfig::new(DEFAULT_URL, DEFAULT_DATABASE)
            .unwrap()
            .with_tags("host=a,dc=eu")
            .with_dns_server("10.0.0.2")
            .unwrap();

        assert_eq!(endpoint.tags().as_str(), ",host=a,dc=eu");
        assert_eq!(endpoint.dns_server(), Some("10.0.0.2:53".parse().unwrap()));

        let err = EndpointConfig::new(DEFAULT_URL, DEFAULT_DATABASE)
            .unwrap()
            .with_dns_server("resolver.local")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDnsServer { .. }));
    }

    #[test]
    fn backoff_is_capped_at_twice_the_interval() {
        let endpoint = EndpointConfig::new(DEFAULT_URL, DEFAULT_DATABASE).unwrap();
        let config = AgentConfig::new(endpoint).with_interval(Duration::from_secs(10));

        let mut policy = config.backoff_policy();
        assert_eq!(policy.min_backoff(), DEFAULT_BACKOFF_MIN);
        assert_eq!(policy.max_backoff(), Duration::from_secs(20));
        assert_eq!(policy.get_backoff_duration(30), Duration::from_secs(20));
    }

    #[test]
    fn zero_durations_are_rejected() {
        let endpoint = EndpointConfig::new(DEFAULT_URL, DEFAULT_DATABASE).unwrap();
        let config = AgentConfig::new(endpoint);
        assert!(config.validate().is_ok());

        let err = config.clone().with_interval(Duration::ZERO).validate().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroDuration { setting: "interval" }));

        let err = config.clone().with_poll_interval(Duration::ZERO).validate().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroDuration { setting: "poll-interval" }));

        let err = config.clone().with_backoff_min(Duration::ZERO).validate().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroDuration { setting: "backoff-min" }));

        let err = config.clone().with_request_timeout(Duration::ZERO).validate().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroDuration { setting: "request-timeout" }));

        let err = config.with_connect_timeout(Duration::ZERO).validate().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroDuration { setting: "connect-timeout" }));
    }

    #[test]
    fn backoff_jitter_must_be_below_two() {
        let endpoint = EndpointConfig::new(DEFAULT_URL, DEFAULT_DATABASE).unwrap();
        let config = AgentConfig::new(endpoint);

        for jitter in [1.0, 1.5, 1.99] {
            assert!(config.clone().with_backoff_jitter(jitter).validate().is_ok(), "{}", jitter);
        }

        for jitter in [0.5, 2.0, 4.0, f64::NAN, f64::INFINITY] {
            let err = config.clone().with_backoff_jitter(jitter).validate().unwrap_err();
            assert!(matches!(err, ConfigError::InvalidBackoffJitter { .. }), "{}", jitter);
        }
    }
}
