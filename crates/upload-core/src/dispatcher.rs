use anyhow::Result;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::LoadConfig;
use crate::corpus::{Corpus, WorkItem};
use crate::error::FailureReason;
use crate::stats::{RequestOutcome, StatsCollector, StatsRecorder, StatsSummary};
use crate::uploader::Uploader;

/// Outcome messages buffered between units and the collector task.
const RESULT_CHANNEL_CAPACITY: usize = 10_000;

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub total_requests: u64,
    pub concurrency: u32,
    /// Sleep after each upload while still holding the permit
    pub pacing: Duration,
    pub progress_every: u64,
}

impl From<&LoadConfig> for DispatchSettings {
    fn from(load: &LoadConfig) -> Self {
        Self {
            total_requests: load.total_requests,
            concurrency: load.concurrency,
            pacing: load.pacing(),
            progress_every: load.progress_every,
        }
    }
}

/// Units currently between permit acquisition and release, plus the peak.
#[derive(Debug, Default)]
struct Occupancy {
    current: AtomicU64,
    peak: AtomicU64,
}

/// A held permit that keeps the occupancy gauge in step with the semaphore.
struct GateSlot {
    occupancy: Arc<Occupancy>,
    _permit: OwnedSemaphorePermit,
}

impl GateSlot {
    fn new(permit: OwnedSemaphorePermit, occupancy: Arc<Occupancy>) -> Self {
        let now = occupancy.current.fetch_add(1, Ordering::SeqCst) + 1;
        occupancy.peak.fetch_max(now, Ordering::SeqCst);
        Self {
            occupancy,
            _permit: permit,
        }
    }
}

impl Drop for GateSlot {
    fn drop(&mut self) {
        self.occupancy.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Issues a fixed number of uploads with bounded concurrency.
pub struct Dispatcher {
    uploader: Arc<dyn Uploader>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(uploader: Arc<dyn Uploader>, settings: DispatchSettings) -> Self {
        Self { uploader, settings }
    }

    /// Launch every work item and wait for all of them, pacing included.
    pub async fn run(&self, corpus: &Corpus) -> Result<StatsSummary> {
        self.run_until(corpus, std::future::pending()).await
    }

    /// Like [`Dispatcher::run`], but stops launching new units once `shutdown`
    /// resolves. Units already launched still complete and are counted; units
    /// never launched are left out of `launched`.
    pub async fn run_until<F>(&self, corpus: &Corpus, shutdown: F) -> Result<StatsSummary>
    where
        F: Future<Output = ()>,
    {
        let total = self.settings.total_requests;
        let concurrency = self.settings.concurrency.max(1);
        let start_time = Instant::now();

        let semaphore = Arc::new(Semaphore::new(concurrency as usize));
        let occupancy = Arc::new(Occupancy::default());
        let (recorder, stats_handle) = StatsCollector::spawn(RESULT_CHANNEL_CAPACITY);

        info!(
            total_requests = total,
            concurrency,
            pacing_ms = self.settings.pacing.as_millis() as u64,
            uploader = self.uploader.name(),
            "Starting dispatch"
        );

        tokio::pin!(shutdown);
        let mut units = JoinSet::new();
        let mut launched = 0u64;
        for request_num in 0..total {
            let permit = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    warn!(launched, remaining = total - launched, "Shutdown requested, no longer launching uploads");
                    break;
                }
                permit = semaphore.clone().acquire_owned() => permit?,
            };
            let slot = GateSlot::new(permit, occupancy.clone());

            let item = corpus.item(request_num);
            let uploader = self.uploader.clone();
            let recorder = recorder.clone();
            let pacing = self.settings.pacing;
            let progress_every = self.settings.progress_every;

            units.spawn(async move {
                execute(uploader.as_ref(), &item, &recorder, progress_every).await;
                sleep(pacing).await;
                drop(slot);
            });
            launched += 1;
        }

        // A unit that dies before reporting still owes exactly one outcome.
        debug!("Waiting for in-flight uploads to complete");
        while let Some(joined) = units.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Upload unit aborted before reporting");
                recorder
                    .add_failure(FailureReason::Request(format!("unit aborted: {e}")))
                    .await;
            }
        }

        drop(recorder);
        let stats = stats_handle.await?;
        let elapsed = start_time.elapsed();

        Ok(StatsSummary::from_collector(
            &stats,
            total,
            launched,
            occupancy.peak.load(Ordering::SeqCst),
            elapsed,
        ))
    }
}

/// Upload one item, log it and hand the outcome to the collector.
pub async fn execute(
    uploader: &dyn Uploader,
    item: &WorkItem,
    recorder: &StatsRecorder,
    progress_every: u64,
) -> RequestOutcome {
    let outcome = uploader.upload(item).await;
    match &outcome {
        RequestOutcome::Success(latency) => {
            if item.request_num % progress_every.max(1) == 0 {
                info!(
                    request_num = item.request_num,
                    file = item.name(),
                    latency_ms = latency.as_millis() as u64,
                    "Request completed successfully"
                );
            }
        }
        RequestOutcome::Failure(reason) => {
            warn!(
                request_num = item.request_num,
                file = item.name(),
                error = %reason,
                "Request failed"
            );
        }
    }
    recorder.record(outcome.clone()).await;
    outcome
}
