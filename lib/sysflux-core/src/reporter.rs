//! Producer loop: samples host metrics and buffers them.

use std::time::{Duration, SystemTime};

use tokio::{
    select,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    buffer::EntryBuffer,
    entry::{MetricSample, TagSuffix},
    sampler::{HostStats, Sampler},
};

/// Result of a single tick.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TickSummary {
    /// Number of entries appended to the buffer.
    pub appended: usize,

    /// Number of old entries discarded to stay within the buffer's capacity.
    pub dropped: usize,
}

/// Samples host metrics on a fixed interval and appends them to the entry buffer.
///
/// The reporter never performs network I/O.
pub struct Reporter<P> {
    sampler: Sampler<P>,
    buffer: EntryBuffer,
    tags: TagSuffix,
    interval: Duration,
}

impl<P> Reporter<P>
where
    P: HostStats,
{
    /// Creates a new `Reporter`.
    pub fn new(sampler: Sampler<P>, buffer: EntryBuffer, tags: TagSuffix, interval: Duration) -> Self {
        Self {
            sampler,
            buffer,
            tags,
            interval,
        }
    }

    /// Samples once, stamping every entry with `timestamp`, and appends the entries to the buffer.
    pub fn tick(&mut self, timestamp: SystemTime) -> TickSummary {
        let entries = self
            .sampler
            .sample()
            .into_iter()
            .map(|(name, value)| MetricSample { name, value, timestamp }.to_entry(&self.tags))
            .collect::<Vec<_>>();

        let appended = entries.len();
        let dropped = self.buffer.push(entries);
        if dropped > 0 {
            warn!(
                dropped,
                capacity = self.buffer.capacity(),
                "Entry buffer full. Discarded oldest entries."
            );
        }

        debug!(appended, buffered = self.buffer.len(), "Reported host metrics.");

        TickSummary { appended, dropped }
    }

    /// Runs the reporter until `shutdown` is cancelled.
    ///
    /// The first tick happens immediately.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(interval = ?self.interval, "Reporter started.");

        loop {
            select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick(SystemTime::now());
                }
            }
        }

        debug!("Reporter stopped.");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        num::NonZeroUsize,
        time::{Duration, UNIX_EPOCH},
    };

    use super::*;
    use crate::sampler::test_util::FixedStats;

    fn reporter(source: FixedStats, capacity: usize, tags: &str) -> (Reporter<FixedStats>, EntryBuffer) {
        let buffer = EntryBuffer::new(NonZeroUsize::new(capacity).unwrap());
        let reporter = Reporter::new(
            Sampler::new(source),
            buffer.clone(),
            TagSuffix::from_raw(tags),
            Duration::from_secs(300),
        );
        (reporter, buffer)
    }

    #[test]
    fn tick_formats_all_samples() {
        let (mut reporter, buffer) = reporter(FixedStats::new((1.0, 0.5, 0.2), 42.5), 100, "host=a");
        let t = UNIX_EPOCH + Duration::from_nanos(1_700_000_000_000_000_000);

        let summary = reporter.tick(t);
        assert_eq!(summary, TickSummary { appended: 4, dropped: 0 });

        let lines = buffer.entries().iter().map(|e| e.to_string()).collect::<Vec<_>>();
        assert_eq!(
            lines,
            vec![
                "cpu_load_short,host=a value=100.000000 1700000000000000000",
                "cpu_load_medium,host=a value=50.000000 1700000000000000000",
                "cpu_load_long,host=a value=20.000000 1700000000000000000",
                "mem_usage,host=a value=42.500000 1700000000000000000",
            ]
        );
    }

    #[test]
    fn ticks_accumulate_without_sends() {
        let mut source = FixedStats::new((1.0, 1.0, 1.0), 10.0);
        source.load = None;
        let (mut reporter, buffer) = reporter(source, 100, "");

        for n in 1..=10 {
            reporter.tick(SystemTime::now());
            assert_eq!(buffer.len(), n);
        }
    }

    #[test]
    fn ticks_past_capacity_keep_most_recent() {
        let mut source = FixedStats::new((1.0, 1.0, 1.0), 10.0);
        source.load = None;
        let (mut reporter, buffer) = reporter(source, 3, "");

        for n in 0..5u64 {
            let summary = reporter.tick(UNIX_EPOCH + Duration::from_nanos(n));
            assert_eq!(summary.dropped, usize::from(n >= 3));
        }

        let lines = buffer.entries().iter().map(|e| e.to_string()).collect::<Vec<_>>();
        assert_eq!(
            lines,
            vec![
                "mem_usage value=10.000000 2",
                "mem_usage value=10.000000 3",
                "mem_usage value=10.000000 4",
            ]
        );
    }

    #[test]
    fn failed_samples_append_nothing() {
        let (mut reporter, buffer) = reporter(FixedStats { load: None, memory: None }, 10, "");

        assert_eq!(reporter.tick(SystemTime::now()), TickSummary::default());
        assert!(buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_on_interval_until_cancelled() {
        let (reporter, buffer) = reporter(FixedStats::new((1.0, 0.5, 0.2), 42.5), 100, "");
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(reporter.run(shutdown.clone()));

        // Ticks at 0s, 300s and 600s.
        tokio::time::sleep(Duration::from_secs(601)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(buffer.len(), 12);
    }
}
