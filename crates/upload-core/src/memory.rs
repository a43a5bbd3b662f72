use bollard::container::{MemoryStats, StatsOptions};
use bollard::Docker;
use futures_util::StreamExt;
use std::pin::Pin;
use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};
use tracing::debug;

use crate::config::{MemoryConfig, MemoryMode};
use crate::error::MemoryError;

pub type SampleFuture<'a> =
    Pin<Box<dyn std::future::Future<Output = Result<u64, MemoryError>> + Send + 'a>>;

/// Source of a target's current memory usage in bytes.
pub trait MemorySampler: Send + Sync {
    fn name(&self) -> &'static str;

    fn sample<'a>(&'a self, target_id: &'a str) -> SampleFuture<'a>;
}

/// Build the sampler selected by `config`, or `None` when sampling is off.
pub fn sampler_for(config: &MemoryConfig) -> Result<Option<Box<dyn MemorySampler>>, MemoryError> {
    Ok(match config.mode {
        MemoryMode::Docker => Some(Box::new(DockerStatsSampler::connect()?)),
        MemoryMode::Process => Some(Box::new(ProcessSampler)),
        MemoryMode::None => None,
    })
}

/// Reads container `memory_stats.usage` from the Docker Engine API.
pub struct DockerStatsSampler {
    docker: Docker,
}

impl DockerStatsSampler {
    /// Client for the local daemon; honours `DOCKER_HOST`. The connection
    /// itself is opened lazily on the first sample.
    pub fn connect() -> Result<Self, MemoryError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| MemoryError::Docker(format!("error creating Docker client: {e}")))?;
        Ok(Self::with_client(docker))
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

impl MemorySampler for DockerStatsSampler {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn sample<'a>(&'a self, target_id: &'a str) -> SampleFuture<'a> {
        Box::pin(async move {
            let stream = self.docker.stats(
                target_id,
                Some(StatsOptions {
                    stream: false,
                    one_shot: true,
                }),
            );
            tokio::pin!(stream);

            match stream.next().await {
                Some(Ok(stats)) => {
                    let usage = memory_usage(&stats.memory_stats, target_id)?;
                    debug!(container = target_id, usage, "docker stats");
                    Ok(usage)
                }
                Some(Err(e)) => Err(MemoryError::Docker(format!(
                    "error getting container stats for {target_id}: {e}"
                ))),
                None => Err(MemoryError::NoUsage(target_id.to_string())),
            }
        })
    }
}

/// Raw usage in bytes, page cache included.
pub fn memory_usage(stats: &MemoryStats, target_id: &str) -> Result<u64, MemoryError> {
    stats
        .usage
        .ok_or_else(|| MemoryError::NoUsage(target_id.to_string()))
}

/// Resident memory of a local process, identified by pid.
pub struct ProcessSampler;

impl MemorySampler for ProcessSampler {
    fn name(&self) -> &'static str {
        "process"
    }

    fn sample<'a>(&'a self, target_id: &'a str) -> SampleFuture<'a> {
        Box::pin(async move {
            let raw: u32 = target_id
                .trim()
                .parse()
                .map_err(|_| MemoryError::InvalidPid(target_id.to_string()))?;
            let id = target_id.to_string();

            tokio::task::spawn_blocking(move || {
                let pid = Pid::from_u32(raw);
                let mut sys = System::new();
                if !sys.refresh_process(pid) {
                    return Err(MemoryError::ProcessNotFound(id));
                }
                sys.process(pid)
                    .map(|p| p.memory())
                    .ok_or(MemoryError::ProcessNotFound(id))
            })
            .await
            .map_err(|e| MemoryError::Task(e.to_string()))?
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_usage_is_exact_bytes() {
        let stats: MemoryStats =
            serde_json::from_str(r#"{"usage": 2087783602, "limit": 8160437862}"#).unwrap();
        assert_eq!(memory_usage(&stats, "upload-api").unwrap(), 2_087_783_602);
    }

    #[test]
    fn test_memory_usage_missing() {
        let stats: MemoryStats = serde_json::from_str("{}").unwrap();
        let err = memory_usage(&stats, "upload-api").unwrap_err();
        assert!(matches!(err, MemoryError::NoUsage(_)), "got {err:?}");
    }

    #[test]
    fn test_sampler_for_mode() {
        let mut config = MemoryConfig::default();
        assert_eq!(sampler_for(&config).unwrap().unwrap().name(), "docker");
        config.mode = MemoryMode::Process;
        assert_eq!(sampler_for(&config).unwrap().unwrap().name(), "process");
        config.mode = MemoryMode::None;
        assert!(sampler_for(&config).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_process_sampler_reads_own_memory() {
        let pid = std::process::id().to_string();
        let bytes = ProcessSampler.sample(&pid).await.unwrap();
        assert!(bytes > 0);
    }

    #[tokio::test]
    async fn test_process_sampler_rejects_bad_pid() {
        let err = ProcessSampler.sample("not-a-pid").await.unwrap_err();
        assert!(matches!(err, MemoryError::InvalidPid(_)));
    }

    #[tokio::test]
    async fn test_docker_sampler_unreachable_daemon() {
        let docker = Docker::connect_with_unix(
            "/nonexistent/docker.sock",
            5,
            bollard::API_DEFAULT_VERSION,
        )
        .unwrap();
        let sampler = DockerStatsSampler::with_client(docker);
        assert!(sampler.sample("upload-api").await.is_err());
    }
}
