//! Host metrics agent that ships load averages and memory usage to InfluxDB.
#![deny(missing_docs)]

pub mod agent;
pub mod backoff;
pub mod buffer;
pub mod client;
pub mod config;
pub mod entry;
pub mod reporter;
pub mod resolver;
pub mod sampler;
pub mod sender;

pub use self::agent::Agent;
pub use self::config::{AgentConfig, ConfigError, EndpointConfig};
