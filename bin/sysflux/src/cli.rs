use std::{num::NonZeroUsize, time::Duration};

use clap::Parser;
use sysflux_core::{
    buffer::DEFAULT_MAX_ENTRIES,
    config::{DEFAULT_DATABASE, DEFAULT_URL},
    AgentConfig, ConfigError, EndpointConfig,
};

/// Ships host load averages and memory usage to InfluxDB.
#[derive(Clone, Debug, Parser)]
#[command(about, version)]
pub struct Cli {
    /// InfluxDB URL.
    ///
    /// If the URL has no path, `/write` is used. Any query string is replaced.
    #[arg(long, default_value = DEFAULT_URL)]
    pub url: String,

    /// Database to write to.
    #[arg(long, default_value = DEFAULT_DATABASE)]
    pub database: String,

    /// Time between reports.
    ///
    /// Accepts units of `ns`, `us`, `ms`, `s`, `m`, and `h`, which can be combined (e.g. `1m30s`). A bare number is
    /// taken as seconds.
    #[arg(long, default_value = "5m", value_parser = parse_duration)]
    pub interval: Duration,

    /// Tags added to every entry, in the form `tag=value,tag=value`.
    #[arg(long, default_value = "")]
    pub tags: String,

    /// DNS server used to resolve the InfluxDB host before every send, as `ip` or `ip:port`.
    #[arg(long)]
    pub dns_server: Option<String>,

    /// Maximum number of entries buffered while InfluxDB is unreachable.
    ///
    /// The oldest entries are discarded first.
    #[arg(long, default_value_t = DEFAULT_MAX_ENTRIES)]
    pub max_entries: NonZeroUsize,

    /// Time between checks for new entries when there is nothing to send.
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub poll_interval: Duration,

    /// Minimum delay before retrying a failed send.
    ///
    /// The delay doubles after each consecutive failure, up to twice the report interval.
    #[arg(long, default_value = "100ms", value_parser = parse_duration)]
    pub backoff_min: Duration,

    /// Minimum backoff factor. Values above 1.0 randomize each delay between `delay / factor` and `delay`.
    ///
    /// Must be below 2.0, so that each delay stays longer than the one before.
    #[arg(long, default_value_t = 1.0)]
    pub backoff_jitter: f64,

    /// Timeout for each request to InfluxDB.
    #[arg(long, default_value = "20s", value_parser = parse_duration)]
    pub request_timeout: Duration,

    /// Timeout for connecting to InfluxDB.
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    pub connect_timeout: Duration,
}

impl Cli {
    /// Builds the agent configuration.
    pub fn into_config(self) -> Result<AgentConfig, ConfigError> {
        let mut endpoint = EndpointConfig::new(&self.url, &self.database)?.with_tags(&self.tags);
        if let Some(dns_server) = &self.dns_server {
            endpoint = endpoint.with_dns_server(dns_server)?;
        }

        let config = AgentConfig::new(endpoint)
            .with_interval(self.interval)
            .with_poll_interval(self.poll_interval)
            .with_max_entries(self.max_entries)
            .with_backoff_min(self.backoff_min)
            .with_backoff_jitter(self.backoff_jitter)
            .with_request_timeout(self.request_timeout)
            .with_connect_timeout(self.connect_timeout);
        config.validate()?;

        Ok(config)
    }
}

/// Parses a human-readable duration string like "30s", "5m", "1h", or "1m30s".
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let mut total = Duration::ZERO;
    let mut current_num = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            current_num.push(c);
        } else if c.is_alphabetic() {
            if current_num.is_empty() {
                return Err(format!("unexpected unit '{}' without a number", c));
            }

            let num = parse_number(&current_num)?;
            current_num.clear();

            let mut unit = String::from(c);
            while let Some(next) = chars.next_if(|c| c.is_alphabetic()) {
                unit.push(next);
            }

            total += match unit.as_str() {
                "ns" => Duration::from_nanos(num),
                "us" | "µs" => Duration::from_micros(num),
                "ms" => Duration::from_millis(num),
                "s" => Duration::from_secs(num),
                "m" => Duration::from_secs(num.saturating_mul(60)),
                "h" => Duration::from_secs(num.saturating_mul(3600)),
                _ => return Err(format!("unknown duration unit: {}", unit)),
            };
        } else if !c.is_whitespace() {
            return Err(format!("unexpected character: {}", c));
        }
    }

    // Bare trailing number is seconds.
    if !current_num.is_empty() {
        total += Duration::from_secs(parse_number(&current_num)?);
    }

    if total.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }

    Ok(total)
}

fn parse_number(s: &str) -> Result<u64, String> {
    s.parse().map_err(|_| format!("invalid number: {}", s))
}
