//! Consumer loop: delivers buffered entries to the endpoint.

use std::{net::IpAddr, sync::Arc, time::Duration};

use http::{StatusCode, Uri};
use snafu::{ResultExt as _, Snafu};
use tokio::{select, time::sleep};
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, info, warn};

use crate::{
    backoff::BackoffState,
    buffer::{Batch, EntryBuffer},
    client::{Transport, WriteTarget},
    resolver::{LookupError, Resolve},
};

const MAX_ERROR_BODY_LEN: usize = 256;

/// A delivery error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum SendError {
    /// The endpoint host could not be resolved through the DNS override.
    #[snafu(display("Failed to resolve endpoint host: {}", source))]
    Lookup {
        /// Error source.
        source: LookupError,
    },

    /// The endpoint host resolved to no usable address.
    #[snafu(display("No addresses found for endpoint host '{}'.", host))]
    NoAddress {
        /// Endpoint host.
        host: String,
    },

    /// The request could not be built or sent, or the response could not be read.
    #[snafu(display("HTTP POST failed: {}", source))]
    Http {
        /// Error source.
        source: BoxError,
    },

    /// The endpoint answered with something other than `204 No Content`.
    #[snafu(display("Endpoint responded with unexpected status {}: {}", status, body))]
    UnexpectedStatus {
        /// Response status.
        status: StatusCode,

        /// Response body, truncated.
        body: String,
    },
}

/// Sender state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SenderState {
    /// Nothing in flight.
    Idle,

    /// A delivery attempt is in flight.
    Sending,

    /// Waiting out the backoff delay after a failed attempt.
    BackoffWait,
}

/// Result of a single flush attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlushOutcome {
    /// The buffer was empty; nothing was sent.
    Empty,

    /// Entries were delivered and removed from the buffer.
    Delivered {
        /// Number of entries delivered.
        entries: usize,
    },

    /// Delivery failed; entries remain buffered.
    Failed {
        /// How long to wait before the next attempt.
        wait: Duration,
    },
}

/// Delivers buffered entries to the endpoint, backing off after failures.
///
/// Only one delivery attempt is ever in flight. The buffer lock is held only while taking a snapshot of the pending
/// entries and while acknowledging a successful delivery, never across the network call, so the reporter is not
/// blocked by a slow endpoint.
pub struct Sender<T> {
    buffer: EntryBuffer,
    transport: T,
    endpoint: Uri,
    resolver: Option<Arc<dyn Resolve>>,
    backoff: BackoffState,
    poll_interval: Duration,
    state: SenderState,
}

impl<T> Sender<T>
where
    T: Transport,
{
    /// Creates a new `Sender`.
    pub fn new(
        buffer: EntryBuffer, transport: T, endpoint: Uri, backoff: BackoffState, poll_interval: Duration,
    ) -> Self {
        Self {
            buffer,
            transport,
            endpoint,
            resolver: None,
            backoff,
            poll_interval,
            state: SenderState::Idle,
        }
    }

    /// Resolves the endpoint host with `resolver` before every delivery attempt.
    ///
    /// The first address returned is used in place of the endpoint host. If resolution fails, the attempt fails without
    /// contacting the endpoint.
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Returns the current state.
    pub fn state(&self) -> SenderState {
        self.state
    }

    /// Returns the backoff state.
    pub fn backoff(&mut self) -> &mut BackoffState {
        &mut self.backoff
    }

    /// Attempts to deliver everything currently buffered.
    pub async fn flush(&mut self) -> FlushOutcome {
        let Some(batch) = self.buffer.snapshot() else {
            self.state = SenderState::Idle;
            return FlushOutcome::Empty;
        };

        self.state = SenderState::Sending;

        match self.send_batch(&batch).await {
            Ok(()) => {
                let removed = self.buffer.acknowledge(&batch);
                self.backoff.reset();
                self.state = SenderState::Idle;

                info!(
                    entries = removed,
                    remaining = self.buffer.len(),
                    "Delivered entries."
                );
                FlushOutcome::Delivered { entries: batch.len() }
            }
            Err(e) => {
                let wait = self.backoff.record_failure();
                self.state = SenderState::BackoffWait;

                warn!(
                    error = %e,
                    entries = batch.len(),
                    consecutive_failures = self.backoff.error_count(),
                    wait = ?wait,
                    "Failed to deliver entries. Backing off."
                );
                FlushOutcome::Failed { wait }
            }
        }
    }

    async fn send_batch(&mut self, batch: &Batch) -> Result<(), SendError> {
        let target = resolve_target(self.resolver.as_deref(), &self.endpoint).await?;
        let response = self
            .transport
            .write(&target, batch.payload().clone())
            .await
            .context(Http)?;

        if response.status != StatusCode::NO_CONTENT {
            let body = String::from_utf8_lossy(&response.body);
            let body = match body.char_indices().nth(MAX_ERROR_BODY_LEN) {
                Some((idx, _)) => format!("{}...", &body[..idx]),
                None => body.into_owned(),
            };

            return Err(SendError::UnexpectedStatus {
                status: response.status,
                body,
            });
        }

        Ok(())
    }

    /// Runs the sender until `shutdown` is cancelled.
    ///
    /// After a successful delivery, or when there was nothing to send, the sender waits for the poll interval before
    /// trying again. After a failure, it waits for the backoff delay instead.
    pub async fn run(mut self, shutdown: CancellationToken) {
        debug!(endpoint = %self.endpoint, "Sender started.");

        loop {
            let outcome = select! {
                _ = shutdown.cancelled() => break,
                outcome = self.flush() => outcome,
            };

            let wait = match outcome {
                FlushOutcome::Failed { wait } => wait,
                FlushOutcome::Empty | FlushOutcome::Delivered { .. } => self.poll_interval,
            };

            select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(wait) => {}
            }
        }

        debug!("Sender stopped.");
    }
}

async fn resolve_target(resolver: Option<&dyn Resolve>, endpoint: &Uri) -> Result<WriteTarget, SendError> {
    let (Some(resolver), Some(host)) = (resolver, endpoint.host()) else {
        return Ok(WriteTarget::direct(endpoint.clone()));
    };

    // IPv6 literals come bracketed out of the URI.
    if host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>().is_ok() {
        return Ok(WriteTarget::direct(endpoint.clone()));
    }

    let addrs = resolver.resolve(host).await.context(Lookup)?;
    let Some(addr) = addrs.first().copied() else {
        return NoAddress { host }.fail();
    };

    debug!(host, %addr, "Using resolved endpoint address.");
    Ok(WriteTarget::resolved(endpoint.clone(), addr))
}
