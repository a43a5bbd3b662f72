use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::stats::StatsSummary;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Target memory before and after the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryReport {
    pub sampler: String,
    pub target_id: String,
    pub initial_bytes: u64,
    pub final_bytes: Option<u64>,
    /// Set when the final sample could not be taken
    pub final_error: Option<String>,
}

impl MemoryReport {
    /// Signed growth in bytes; negative when the target shrank.
    pub fn delta_bytes(&self) -> Option<i64> {
        self.final_bytes.map(|f| f as i64 - self.initial_bytes as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub timestamp: String,
    pub url: String,
    pub uploader: String,
    pub corpus_files: usize,
    pub corpus_bytes: u64,
    pub concurrency: u32,
    pub pacing_ms: u64,
    pub stats: StatsSummary,
    pub memory: Option<MemoryReport>,
}

fn mb(bytes: f64) -> f64 {
    bytes / BYTES_PER_MB
}

fn opt_ms(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |ms| format!("{ms:.2}ms"))
}

impl RunReport {
    /// Human-readable summary block.
    pub fn render(&self) -> String {
        let s = &self.stats;
        let mut out = String::new();
        let _ = writeln!(out, "\n=== Upload Load Test Results ===");
        let _ = writeln!(out, "Target: {} ({})", self.url, self.uploader);
        let _ = writeln!(
            out,
            "Corpus: {} files, {:.2} MB",
            self.corpus_files,
            mb(self.corpus_bytes as f64)
        );
        let _ = writeln!(
            out,
            "Concurrency: {}, pacing: {}ms",
            self.concurrency, self.pacing_ms
        );
        let _ = writeln!(out, "Total requests: {}", s.requested);
        if s.launched != s.requested {
            let _ = writeln!(out, "Launched before shutdown: {}", s.launched);
        }
        let _ = writeln!(out, "Successful requests: {}", s.success_count);
        let _ = writeln!(
            out,
            "Failed requests: {} (rejected={} timeouts={} errors={})",
            s.failure_count, s.rejected, s.timeouts, s.errors
        );
        let _ = writeln!(out, "Total duration: {:.2}s", s.elapsed_ms / 1000.0);
        let _ = writeln!(
            out,
            "Mean request time: {}",
            opt_ms(s.mean_success_latency_ms)
        );
        let _ = writeln!(
            out,
            "Latency min/max: {} / {}",
            opt_ms(s.min_latency_ms),
            opt_ms(s.max_latency_ms)
        );
        let _ = writeln!(
            out,
            "Latency p50/p95/p99: {}ms / {}ms / {}ms",
            s.latency_p50_ms, s.latency_p95_ms, s.latency_p99_ms
        );
        let _ = writeln!(out, "Requests per second: {:.2}", s.requests_per_sec);
        let _ = writeln!(out, "Peak in flight: {}", s.peak_in_flight);

        if let Some(memory) = &self.memory {
            let _ = writeln!(
                out,
                "\n=== Memory Usage ({} {}) ===",
                memory.sampler, memory.target_id
            );
            let _ = writeln!(
                out,
                "Initial memory usage: {:.2} MB",
                mb(memory.initial_bytes as f64)
            );
            match (memory.final_bytes, memory.delta_bytes()) {
                (Some(final_bytes), Some(delta)) => {
                    let _ = writeln!(out, "Final memory usage: {:.2} MB", mb(final_bytes as f64));
                    let _ = writeln!(out, "Memory difference: {:+.2} MB", mb(delta as f64));
                }
                _ => {
                    let reason = memory.final_error.as_deref().unwrap_or("not sampled");
                    let _ = writeln!(out, "Final memory usage: unavailable ({reason})");
                }
            }
        }
        out
    }

    /// Write the report as pretty JSON to `<dir>/upload_<timestamp>.json`.
    pub fn save(&self, dir: impl AsRef<Path>, file_stamp: &str) -> Result<PathBuf> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("upload_{file_stamp}.json"));
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }
}
