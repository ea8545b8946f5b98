//! Host metric sampling.

use snafu::Snafu;
use sysinfo::System;
use tracing::debug;

use crate::entry::MetricName;

/// A sampling error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum SampleError {
    /// The operating system did not return all three load averages.
    #[snafu(display("Failed to read load averages (got {} of 3 values).", retrieved))]
    LoadAverageUnavailable {
        /// Number of values retrieved, or -1 if the call failed outright.
        retrieved: i32,
    },

    /// Load averages are not available on this platform.
    #[snafu(display("Load averages are not supported on this platform."))]
    LoadAverageUnsupported,

    /// The operating system did not report any memory.
    #[snafu(display("Failed to read memory statistics: total memory reported as zero."))]
    MemoryUnavailable,
}

/// System load averages.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoadAverage {
    /// One minute load average.
    pub one: f64,

    /// Five minute load average.
    pub five: f64,

    /// Fifteen minute load average.
    pub fifteen: f64,
}

/// Source of raw host statistics.
///
/// Each query is independent: a failure in one must not affect the others.
pub trait HostStats: Send {
    /// Reads the current load averages.
    fn load_average(&mut self) -> Result<LoadAverage, SampleError>;

    /// Reads the used memory, as a percentage of total memory.
    fn memory_used_percent(&mut self) -> Result<f64, SampleError>;
}

/// A [`HostStats`] backed by the operating system.
pub struct SystemStats {
    system: System,
}

impl SystemStats {
    /// Creates a new `SystemStats`.
    pub fn new() -> Self {
        Self { system: System::new() }
    }
}

impl Default for SystemStats {
    fn default() -> Self {
        Self::new()
    }
}

impl HostStats for SystemStats {
    #[cfg(unix)]
    fn load_average(&mut self) -> Result<LoadAverage, SampleError> {
        let mut values = [0.0f64; 3];

        // SAFETY: `getloadavg` writes at most `nelem` doubles into the buffer, which holds exactly three.
        let retrieved = unsafe { libc::getloadavg(values.as_mut_ptr(), 3) };
        if retrieved != 3 {
            return Err(SampleError::LoadAverageUnavailable { retrieved });
        }

        Ok(LoadAverage {
            one: values[0],
            five: values[1],
            fifteen: values[2],
        })
    }

    #[cfg(not(unix))]
    fn load_average(&mut self) -> Result<LoadAverage, SampleError> {
        Err(SampleError::LoadAverageUnsupported)
    }

    fn memory_used_percent(&mut self) -> Result<f64, SampleError> {
        self.system.refresh_memory();

        let total = self.system.total_memory();
        if total == 0 {
            return Err(SampleError::MemoryUnavailable);
        }

        Ok(self.system.used_memory() as f64 / total as f64 * 100.0)
    }
}

/// Turns host statistics into named metric values.
pub struct Sampler<P> {
    source: P,
}

impl<P> Sampler<P>
where
    P: HostStats,
{
    /// Creates a new `Sampler` reading from the given source.
    pub fn new(source: P) -> Self {
        Self { source }
    }

    /// Samples all metrics.
    ///
    /// Metrics whose underlying query fails are left out; nothing is reported in their place. Load averages are scaled
    /// by 100, so that a load of 1.0 is reported as 100.
    pub fn sample(&mut self) -> Vec<(MetricName, f64)> {
        let mut samples = Vec::with_capacity(4);

        match self.source.load_average() {
            Ok(load) => {
                samples.push((MetricName::CpuLoadShort, load.one * 100.0));
                samples.push((MetricName::CpuLoadMedium, load.five * 100.0));
                samples.push((MetricName::CpuLoadLong, load.fifteen * 100.0));
            }
            Err(e) => debug!(error = %e, "Skipping load averages for this tick."),
        }

        match self.source.memory_used_percent() {
            Ok(percent) => samples.push((MetricName::MemUsage, percent)),
            Err(e) => debug!(error = %e, "Skipping memory usage for this tick."),
        }

        samples
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    /// A source returning fixed values, or failing, per query.
    #[derive(Clone)]
    pub struct FixedStats {
        pub load: Option<LoadAverage>,
        pub memory: Option<f64>,
    }

    impl FixedStats {
        pub fn new(load: (f64, f64, f64), memory: f64) -> Self {
            Self {
                load: Some(LoadAverage {
                    one: load.0,
                    five: load.1,
                    fifteen: load.2,
                }),
                memory: Some(memory),
            }
        }
    }

    impl HostStats for FixedStats {
        fn load_average(&mut self) -> Result<LoadAverage, SampleError> {
            self.load.ok_or(SampleError::LoadAverageUnavailable { retrieved: -1 })
        }

        fn memory_used_percent(&mut self) -> Result<f64, SampleError> {
            self.memory.ok_or(SampleError::MemoryUnavailable)
        }
    }
}
