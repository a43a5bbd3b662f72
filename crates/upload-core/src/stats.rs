use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::FailureReason;

/// Width of one latency histogram bucket.
const BUCKET_WIDTH_MS: u64 = 10;
/// Buckets covering 0..30s; slower samples land in the last bucket.
const BUCKET_COUNT: usize = 3001;

/// Result of one upload, produced once per work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Success(Duration),
    Failure(FailureReason),
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Aggregated counters and latency histogram.
///
/// Owned by a single collector task; concurrent units report through
/// [`StatsRecorder`] handles instead of sharing this directly.
#[derive(Debug, Clone)]
pub struct StatsCollector {
    pub success_count: u64,
    pub failure_count: u64,
    /// Non-200 responses
    pub rejected: u64,
    pub timeouts: u64,
    /// Transport and request construction errors
    pub errors: u64,
    pub total_success_duration: Duration,
    min_latency: Option<Duration>,
    max_latency: Option<Duration>,
    latency_buckets: Vec<u64>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            success_count: 0,
            failure_count: 0,
            rejected: 0,
            timeouts: 0,
            errors: 0,
            total_success_duration: Duration::ZERO,
            min_latency: None,
            max_latency: None,
            latency_buckets: vec![0; BUCKET_COUNT],
        }
    }

    /// Spawn the collector task. Units report through the returned recorder;
    /// the handle yields the final stats once every recorder clone is dropped.
    pub fn spawn(buffer: usize) -> (StatsRecorder, JoinHandle<StatsCollector>) {
        let (tx, mut rx) = mpsc::channel::<RequestOutcome>(buffer.max(1));
        let handle = tokio::spawn(async move {
            let mut stats = StatsCollector::new();
            while let Some(outcome) = rx.recv().await {
                stats.record(&outcome);
            }
            stats
        });
        (StatsRecorder { tx }, handle)
    }

    pub fn record(&mut self, outcome: &RequestOutcome) {
        match outcome {
            RequestOutcome::Success(duration) => self.add_success(*duration),
            RequestOutcome::Failure(reason) => self.add_failure(reason),
        }
    }

    pub fn add_success(&mut self, duration: Duration) {
        self.success_count += 1;
        self.total_success_duration += duration;
        self.min_latency = Some(self.min_latency.map_or(duration, |m| m.min(duration)));
        self.max_latency = Some(self.max_latency.map_or(duration, |m| m.max(duration)));
        self.record_latency(duration);
    }

    pub fn add_failure(&mut self, reason: &FailureReason) {
        self.failure_count += 1;
        match reason {
            FailureReason::Status(_) => self.rejected += 1,
            FailureReason::Timeout => self.timeouts += 1,
            FailureReason::Multipart(_)
            | FailureReason::Request(_)
            | FailureReason::Transport(_) => self.errors += 1,
        }
    }

    pub fn completed(&self) -> u64 {
        self.success_count + self.failure_count
    }

    fn record_latency(&mut self, latency: Duration) {
        let bucket_idx = (latency.as_millis() as u64 / BUCKET_WIDTH_MS)
            .min((self.latency_buckets.len() - 1) as u64) as usize;
        self.latency_buckets[bucket_idx] += 1;
    }

    /// Mean latency of successful uploads, `None` when nothing succeeded.
    pub fn mean_success_latency(&self) -> Option<Duration> {
        if self.success_count == 0 {
            return None;
        }
        let nanos = self.total_success_duration.as_nanos() / self.success_count as u128;
        Some(Duration::from_nanos(nanos as u64))
    }

    pub fn min_latency(&self) -> Option<Duration> {
        self.min_latency
    }

    pub fn max_latency(&self) -> Option<Duration> {
        self.max_latency
    }

    /// Percentile of successful latencies from the histogram, in ms (bucket
    /// lower bound). Zero when there are no samples.
    pub fn percentile(&self, p: u64) -> u64 {
        let total: u64 = self.latency_buckets.iter().sum();
        if total == 0 {
            return 0;
        }

        let target = (total * p.min(100)).div_ceil(100).max(1);
        let mut cumulative = 0u64;

        for (bucket_idx, &count) in self.latency_buckets.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                return bucket_idx as u64 * BUCKET_WIDTH_MS;
            }
        }

        (self.latency_buckets.len() as u64 - 1) * BUCKET_WIDTH_MS
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable handle used by concurrent units to report outcomes.
#[derive(Debug, Clone)]
pub struct StatsRecorder {
    tx: mpsc::Sender<RequestOutcome>,
}

impl StatsRecorder {
    pub async fn record(&self, outcome: RequestOutcome) {
        // The collector only stops once every recorder is gone.
        let _ = self.tx.send(outcome).await;
    }

    pub async fn add_success(&self, duration: Duration) {
        self.record(RequestOutcome::Success(duration)).await;
    }

    pub async fn add_failure(&self, reason: FailureReason) {
        self.record(RequestOutcome::Failure(reason)).await;
    }
}

/// Final figures for one dispatch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSummary {
    /// Work items the run was asked to issue
    pub requested: u64,
    /// Work items actually launched (less than `requested` only after shutdown)
    pub launched: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub rejected: u64,
    pub timeouts: u64,
    pub errors: u64,
    pub total_success_latency_ms: f64,
    pub mean_success_latency_ms: Option<f64>,
    pub min_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub latency_p50_ms: u64,
    pub latency_p95_ms: u64,
    pub latency_p99_ms: u64,
    /// Highest number of units holding a permit at the same time
    pub peak_in_flight: u64,
    pub elapsed_ms: f64,
    /// Launched units per second of wall-clock time
    pub requests_per_sec: f64,
}

impl StatsSummary {
    pub fn from_collector(
        stats: &StatsCollector,
        requested: u64,
        launched: u64,
        peak_in_flight: u64,
        elapsed: Duration,
    ) -> Self {
        let as_ms = |d: Duration| d.as_secs_f64() * 1000.0;
        let secs = elapsed.as_secs_f64();
        let requests_per_sec = if secs > 0.0 {
            launched as f64 / secs
        } else {
            0.0
        };

        Self {
            requested,
            launched,
            success_count: stats.success_count,
            failure_count: stats.failure_count,
            rejected: stats.rejected,
            timeouts: stats.timeouts,
            errors: stats.errors,
            total_success_latency_ms: as_ms(stats.total_success_duration),
            mean_success_latency_ms: stats.mean_success_latency().map(as_ms),
            min_latency_ms: stats.min_latency().map(as_ms),
            max_latency_ms: stats.max_latency().map(as_ms),
            latency_p50_ms: stats.percentile(50),
            latency_p95_ms: stats.percentile(95),
            latency_p99_ms: stats.percentile(99),
            peak_in_flight,
            elapsed_ms: as_ms(elapsed),
            requests_per_sec,
        }
    }

    pub fn completed(&self) -> u64 {
        self.success_count + self.failure_count
    }
}
