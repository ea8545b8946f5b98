//! Metric samples and their line protocol representation.

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

/// Name of a reported metric.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetricName {
    /// One minute load average.
    CpuLoadShort,

    /// Five minute load average.
    CpuLoadMedium,

    /// Fifteen minute load average.
    CpuLoadLong,

    /// Used memory, as a percentage of total memory.
    MemUsage,
}

impl MetricName {
    /// Returns the measurement name used on the wire.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CpuLoadShort => "cpu_load_short",
            Self::CpuLoadMedium => "cpu_load_medium",
            Self::CpuLoadLong => "cpu_load_long",
            Self::MemUsage => "mem_usage",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static tags appended to every entry.
///
/// Holds the user-provided tag string with its leading comma already in place, so it can be written directly after
/// the measurement name. An empty tag string produces an empty suffix.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TagSuffix(String);

impl TagSuffix {
    /// Creates a tag suffix from a raw `tag=value,tag=value` string.
    ///
    /// The raw string is used verbatim.
    pub fn from_raw(raw: &str) -> Self {
        if raw.is_empty() {
            Self(String::new())
        } else {
            Self(format!(",{}", raw))
        }
    }

    /// Returns the suffix as written on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A single observation taken during a tick.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricSample {
    /// Metric name.
    pub name: MetricName,

    /// Observed value.
    pub value: f64,

    /// When the observation was taken.
    pub timestamp: SystemTime,
}

impl MetricSample {
    /// Formats this sample into an entry, using the given tag suffix.
    pub fn to_entry(&self, tags: &TagSuffix) -> Entry {
        let nanos = self
            .timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        Entry(format!(
            "{}{} value={:.6} {}",
            self.name,
            tags.as_str(),
            self.value,
            nanos
        ))
    }
}

/// A formatted metric line, ready for transmission.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Entry(String);

impl Entry {
    /// Returns the formatted line.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the length of the formatted line, in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the formatted line is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Entry {
    fn from(line: String) -> Self {
        Self(line)
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
