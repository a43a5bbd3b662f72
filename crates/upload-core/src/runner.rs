use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::corpus::Corpus;
use crate::dispatcher::{DispatchSettings, Dispatcher};
use crate::memory::MemorySampler;
use crate::report::{MemoryReport, RunReport};
use crate::uploader::Uploader;

/// A finished run. `teardown_error` is set when the final memory sample
/// failed; the request statistics in `report` are complete either way.
pub struct RunOutcome {
    pub started_at: DateTime<Utc>,
    pub report: RunReport,
    pub teardown_error: Option<anyhow::Error>,
}

impl RunOutcome {
    /// Timestamp used in the results file name.
    pub fn file_stamp(&self) -> String {
        self.started_at.format("%Y%m%d_%H%M%S").to_string()
    }

    pub fn into_result(self) -> Result<RunReport> {
        match self.teardown_error {
            Some(e) => Err(e),
            None => Ok(self.report),
        }
    }
}

/// Load the corpus, sample memory, dispatch every upload, sample memory again.
///
/// Corpus and initial memory failures abort before any upload is sent.
pub async fn run_load_test<F>(
    config: &Config,
    uploader: Arc<dyn Uploader>,
    sampler: Option<&dyn MemorySampler>,
    shutdown: F,
) -> Result<RunOutcome>
where
    F: Future<Output = ()>,
{
    let started_at = Utc::now();

    let corpus = Corpus::load(&config.corpus.path, &config.corpus.extensions)
        .with_context(|| format!("Failed to load corpus from {:?}", config.corpus.path))?;
    info!(
        "Loaded {} files ({} bytes) from {:?}",
        corpus.len(),
        corpus.total_bytes(),
        config.corpus.path
    );

    let target_id = config.memory.target_id.as_str();
    let initial_memory = match sampler {
        Some(sampler) => {
            let bytes = sampler
                .sample(target_id)
                .await
                .context("Failed to get initial memory usage")?;
            info!(target_id, bytes, "Initial memory usage");
            Some(bytes)
        }
        None => None,
    };

    let dispatcher = Dispatcher::new(uploader.clone(), DispatchSettings::from(&config.load));
    let stats = dispatcher.run_until(&corpus, shutdown).await?;

    let mut teardown_error = None;
    let memory = match (sampler, initial_memory) {
        (Some(sampler), Some(initial_bytes)) => {
            let final_result = sampler
                .sample(target_id)
                .await
                .context("Failed to get final memory usage");
            let (final_bytes, final_error) = match final_result {
                Ok(bytes) => {
                    info!(target_id, bytes, "Final memory usage");
                    (Some(bytes), None)
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    teardown_error = Some(e);
                    (None, Some(message))
                }
            };
            Some(MemoryReport {
                sampler: sampler.name().to_string(),
                target_id: target_id.to_string(),
                initial_bytes,
                final_bytes,
                final_error,
            })
        }
        _ => None,
    };

    let report = RunReport {
        timestamp: started_at.to_rfc3339(),
        url: config.target.url.clone(),
        uploader: uploader.name().to_string(),
        corpus_files: corpus.len(),
        corpus_bytes: corpus.total_bytes(),
        concurrency: config.load.concurrency,
        pacing_ms: config.load.pacing_ms,
        stats,
        memory,
    };

    Ok(RunOutcome {
        started_at,
        report,
        teardown_error,
    })
}
