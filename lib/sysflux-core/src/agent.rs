//! Agent runtime.

use std::sync::Arc;

use anyhow::Context as _;
use bytes::Bytes;
use http_body_util::Full;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument as _};

use crate::{
    backoff::BackoffState,
    buffer::EntryBuffer,
    client::HttpClient,
    config::AgentConfig,
    reporter::Reporter,
    resolver::DnsResolver,
    sampler::{HostStats, Sampler, SystemStats},
    sender::Sender,
};

/// The metrics agent.
///
/// Runs a reporter, which samples host metrics into a shared buffer, and a sender, which delivers the buffer's contents
/// to the configured endpoint. The two only share the buffer.
pub struct Agent<P = SystemStats> {
    config: AgentConfig,
    source: P,
}

impl Agent<SystemStats> {
    /// Creates a new `Agent` that samples the local host.
    pub fn new(config: AgentConfig) -> Self {
        Self::with_source(config, SystemStats::new())
    }
}

impl<P> Agent<P>
where
    P: HostStats + 'static,
{
    /// Creates a new `Agent` that samples metrics from the given source.
    pub fn with_source(config: AgentConfig, source: P) -> Self {
        Self { config, source }
    }

    /// Runs the agent until `shutdown` is cancelled.
    ///
    /// Entries still buffered when the agent stops are discarded.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, or the HTTP client cannot be built, an error is returned. If either the
    /// reporter or the sender stops unexpectedly, the other is stopped and an error is returned.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), anyhow::Error> {
        let Self { config, source } = self;
        config.validate()?;

        let endpoint = config.endpoint();
        let mut client_builder = HttpClient::builder()
            .with_connect_timeout(config.connect_timeout())
            .with_request_timeout(config.request_timeout());
        if endpoint.dns_server().is_some() {
            // Every attempt dials the address resolved for it.
            client_builder = client_builder.without_connection_reuse();
        }
        let client = client_builder
            .build::<Full<Bytes>>()
            .context("Failed to build HTTP client.")?;

        let buffer = EntryBuffer::new(config.max_entries());
        let reporter = Reporter::new(
            Sampler::new(source),
            buffer.clone(),
            endpoint.tags().clone(),
            config.interval(),
        );

        let mut sender = Sender::new(
            buffer.clone(),
            client,
            endpoint.uri().clone(),
            BackoffState::new(config.backoff_policy()),
            config.poll_interval(),
        );
        if let Some(server) = endpoint.dns_server() {
            sender = sender.with_resolver(Arc::new(DnsResolver::new(server)));
        }

        info!(
            endpoint = %endpoint.uri(),
            dns_server = ?endpoint.dns_server(),
            interval = ?config.interval(),
            max_entries = config.max_entries().get(),
            "Agent started."
        );

        // Both tasks run until the token is cancelled, so either one finishing first means something went wrong.
        let tasks_token = shutdown.child_token();
        let mut tasks = JoinSet::new();
        tasks.spawn(reporter.run(tasks_token.clone()).instrument(info_span!("reporter")));
        tasks.spawn(sender.run(tasks_token.clone()).instrument(info_span!("sender")));

        let mut result = Ok(());
        while let Some(task_result) = tasks.join_next().await {
            if let Err(e) = task_result {
                error!(error = %e, "Agent task failed.");
                result = Err(anyhow::Error::new(e).context("Agent task failed."));
            } else if !shutdown.is_cancelled() && result.is_ok() {
                result = Err(anyhow::anyhow!("Agent task stopped unexpectedly."));
            }

            tasks_token.cancel();
        }

        let undelivered = buffer.len();
        if undelivered > 0 {
            warn!(undelivered, "Discarding undelivered entries.");
        }

        result
    }
}
