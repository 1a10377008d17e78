//! Round-trip time samples and the end-of-run summary.
//!
//! Samples are kept in arrival order and only reduced once, when the run is
//! over. The standard deviation deliberately treats the seconds and the
//! microseconds of each sample as two independent series: each field is
//! deviated against the same field of the mean and the two results are
//! summed. For sub-second RTTs (the normal case) the seconds series is all
//! zeros and the result equals the sample standard deviation; across a
//! seconds boundary it is an approximation, not a true duration stddev.

use serde::{Deserialize, Serialize};
use std::time::Duration;

const MICROS_PER_SEC: u128 = 1_000_000;

/// Ordered, append-only RTT sample sequence
#[derive(Debug, Default, Clone)]
pub struct RttSamples {
    samples: Vec<Duration>,
}

impl RttSamples {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `now - sent_at`, both read from the wall clock
    ///
    /// A receive time earlier than the send time (wall clock stepped back)
    /// is recorded as zero.
    pub fn record_sample(&mut self, sent_at: Duration, now: Duration) -> Duration {
        let rtt = match now.checked_sub(sent_at) {
            Some(rtt) => rtt,
            None => {
                log::warn!(
                    "clock went backwards ({:?} before send time {:?}), clamping RTT to zero",
                    now,
                    sent_at
                );
                Duration::ZERO
            }
        };
        self.samples.push(rtt);
        rtt
    }

    /// Most recent sample
    #[cfg(test)]
    pub fn last(&self) -> Option<Duration> {
        self.samples.last().copied()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[cfg(test)]
    pub fn as_slice(&self) -> &[Duration] {
        &self.samples
    }

    /// Release every sample in one go
    pub fn clear(&mut self) {
        self.samples.clear();
        self.samples.shrink_to_fit();
    }

    /// Reduce the sequence to its summary (None when empty)
    pub fn finalize(&self) -> Option<RttSummary> {
        finalize(&self.samples)
    }
}

/// min/avg/max/stddev over a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RttSummary {
    #[serde(with = "duration_serde")]
    pub min: Duration,
    #[serde(with = "duration_serde")]
    pub max: Duration,
    #[serde(with = "duration_serde")]
    pub mean: Duration,
    #[serde(with = "duration_serde")]
    pub stddev: Duration,
}

/// Compute the summary of a sample sequence
///
/// Returns None for an empty sequence, so a run without replies never
/// divides by zero.
pub fn finalize(samples: &[Duration]) -> Option<RttSummary> {
    let (&first, rest) = samples.split_first()?;

    let mut min = first;
    let mut max = first;
    for &sample in rest {
        if sample < min {
            min = sample;
        }
        if sample > max {
            max = sample;
        }
    }

    let mean = mean(samples);
    let stddev = per_field_stddev(samples, mean);

    Some(RttSummary {
        min,
        max,
        mean,
        stddev,
    })
}

/// Mean with seconds and microseconds accumulated separately
fn mean(samples: &[Duration]) -> Duration {
    let mut total_secs: u128 = 0;
    let mut total_micros: u128 = 0;
    for sample in samples {
        total_secs += sample.as_secs() as u128;
        total_micros += sample.subsec_micros() as u128;
        if total_micros >= MICROS_PER_SEC {
            total_micros -= MICROS_PER_SEC;
            total_secs += 1;
        }
    }

    let count = samples.len() as u128;
    let total = total_secs * MICROS_PER_SEC + total_micros;
    let micros = u64::try_from(total / count).unwrap_or(u64::MAX);
    Duration::from_micros(micros)
}

/// Sample stddev (n - 1) computed independently on the seconds field and on
/// the microseconds field
fn per_field_stddev(samples: &[Duration], mean: Duration) -> Duration {
    if samples.len() < 2 {
        return Duration::ZERO;
    }

    let mean_secs = mean.as_secs() as f64;
    let mean_micros = mean.subsec_micros() as f64;

    let (secs_dev, micros_dev) = samples.iter().fold((0.0_f64, 0.0_f64), |(s, u), sample| {
        let ds = sample.as_secs() as f64 - mean_secs;
        let du = sample.subsec_micros() as f64 - mean_micros;
        (s + ds * ds, u + du * du)
    });

    let divisor = (samples.len() - 1) as f64;
    let secs = (secs_dev / divisor).sqrt() as u64;
    let micros = (micros_dev / divisor).sqrt() as u64;

    Duration::from_secs(secs) + Duration::from_micros(micros)
}

/// Serde helper for Duration (microseconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_micros() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let micros = u64::deserialize(deserializer)?;
        Ok(Duration::from_micros(micros))
    }
}
