// SPDX-License-Identifier: PolyForm-Shield-1.0

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    count: u64,
    elapsed: Duration,
}

/// Running count and summed duration of successful inference calls.
///
/// Both totals move together under one lock so a snapshot never sees a
/// count without its duration.
#[derive(Debug, Default)]
pub struct InferenceStats {
    totals: Mutex<Totals>,
}

impl InferenceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, elapsed: Duration) {
        let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        totals.count += 1;
        totals.elapsed += elapsed;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let totals = *self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        StatsSnapshot::from_totals(totals.count, totals.elapsed.as_secs_f64())
    }
}

/// Point-in-time view of [`InferenceStats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    /// Seconds.
    pub total_time: f64,
    /// Seconds per request; 0 before the first request.
    pub average_time: f64,
    /// Requests per second of model time; 0 before any time is recorded.
    pub throughput: f64,
}

impl StatsSnapshot {
    fn from_totals(count: u64, total_time: f64) -> Self {
        let average_time = if count > 0 {
            total_time / count as f64
        } else {
            0.0
        };
        let throughput = if total_time > 0.0 {
            count as f64 / total_time
        } else {
            0.0
        };
        Self {
            total_requests: count,
            total_time,
            average_time,
            throughput,
        }
    }
}
