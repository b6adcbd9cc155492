//! Synchronization job queue
//!
//! Pipeline runs never overlap: callers submit jobs through a [`JobHandle`]
//! and a single [`SyncService`] thread executes them one at a time, in the
//! order they were queued. A job submitted after another one for the same
//! recipe therefore observes everything the earlier job committed.
//!
//! # Example
//!
//! ```ignore
//! use recipe_sync::worker::{JobEvent, SyncService};
//!
//! let (service, handle) = SyncService::new(engine, config.queue.capacity);
//! let worker = service.spawn()?;
//!
//! let id = handle.submit_download(42, 7)?;
//! let outcome = handle.wait_for(id, Duration::from_secs(120))?;
//! println!("{}", outcome);
//!
//! handle.shutdown()?;
//! worker.join().ok();
//! ```

use crate::error::{RecipeSyncError, Result};
use crate::health::UnitReachability;
use crate::sync::{DownloadReport, SyncEngine, UploadReport};
use crate::types::{Discrepancy, RecipeId, StructureId};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Events are dropped rather than blocking the worker once this many are unread
const EVENT_CAPACITY: usize = 256;

const WORKER_THREAD_NAME: &str = "recipe-sync-worker";

/// Identifier handed out per submitted job
pub type JobId = u64;

/// Work item for the sync worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Read the controllers of a structure into a recipe
    Download {
        recipe_id: RecipeId,
        structure_id: StructureId,
    },
    /// Write a recipe's stored values to the controllers
    Upload {
        recipe_id: RecipeId,
        recipe_name: Option<String>,
    },
    /// Compare a recipe with the live controller values
    Check {
        recipe_id: RecipeId,
        structure_id: StructureId,
    },
    /// Probe every known unit's endpoint
    ProbeUnits,
    /// Stop the worker after the jobs queued before it
    Shutdown,
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Job::Download {
                recipe_id,
                structure_id,
            } => write!(f, "download structure {} into recipe {}", structure_id, recipe_id),
            Job::Upload {
                recipe_id,
                recipe_name: Some(name),
            } => write!(f, "upload recipe {} ({})", recipe_id, name),
            Job::Upload { recipe_id, .. } => write!(f, "upload recipe {}", recipe_id),
            Job::Check {
                recipe_id,
                structure_id,
            } => write!(f, "check recipe {} against structure {}", recipe_id, structure_id),
            Job::ProbeUnits => write!(f, "probe units"),
            Job::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Result of one job
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "job", content = "result", rename_all = "snake_case")]
pub enum JobOutcome {
    Downloaded(DownloadReport),
    Uploaded(UploadReport),
    Checked(Vec<Discrepancy>),
    Probed(Vec<UnitReachability>),
    /// The pipeline aborted before producing a report
    Failed(String),
}

impl JobOutcome {
    /// Whether the job ran and every unit succeeded
    pub fn is_success(&self) -> bool {
        match self {
            JobOutcome::Downloaded(report) => report.succeeded(),
            JobOutcome::Uploaded(report) => report.succeeded(),
            JobOutcome::Checked(_) => true,
            JobOutcome::Probed(units) => units.iter().all(UnitReachability::is_reachable),
            JobOutcome::Failed(_) => false,
        }
    }
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOutcome::Downloaded(report) => write!(f, "{}", report),
            JobOutcome::Uploaded(report) => write!(f, "{}", report),
            JobOutcome::Checked(discrepancies) if discrepancies.is_empty() => {
                write!(f, "no discrepancies")
            }
            JobOutcome::Checked(discrepancies) => {
                writeln!(f, "{} discrepancies:", discrepancies.len())?;
                for discrepancy in discrepancies {
                    writeln!(f, "  {}", discrepancy)?;
                }
                Ok(())
            }
            JobOutcome::Probed(units) => {
                for unit in units {
                    writeln!(f, "{}", unit)?;
                }
                Ok(())
            }
            JobOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Notification sent from the worker to the submitter
#[derive(Debug, Clone)]
pub enum JobEvent {
    Started { id: JobId, job: Job },
    Finished { id: JobId, outcome: JobOutcome },
    /// The worker has left its loop; no further events follow
    Stopped,
}

/// Submitter side of the job queue
#[derive(Clone)]
pub struct JobHandle {
    job_sender: Sender<(JobId, Job)>,
    event_receiver: Receiver<JobEvent>,
    next_id: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

impl JobHandle {
    /// Queue a job without blocking
    pub fn submit(&self, job: Job) -> Result<JobId> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        match self.job_sender.try_send((id, job)) {
            Ok(()) => Ok(id),
            Err(TrySendError::Full(_)) => {
                Err(RecipeSyncError::Channel("job queue full".to_string()))
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(RecipeSyncError::Channel("sync worker stopped".to_string()))
            }
        }
    }

    pub fn submit_download(&self, recipe_id: RecipeId, structure_id: StructureId) -> Result<JobId> {
        self.submit(Job::Download {
            recipe_id,
            structure_id,
        })
    }

    pub fn submit_upload(&self, recipe_id: RecipeId, recipe_name: Option<String>) -> Result<JobId> {
        self.submit(Job::Upload {
            recipe_id,
            recipe_name,
        })
    }

    pub fn submit_check(&self, recipe_id: RecipeId, structure_id: StructureId) -> Result<JobId> {
        self.submit(Job::Check {
            recipe_id,
            structure_id,
        })
    }

    pub fn submit_probe(&self) -> Result<JobId> {
        self.submit(Job::ProbeUnits)
    }

    /// Ask the worker to stop once the jobs already queued are done
    ///
    /// Like [`submit`](Self::submit) this never blocks: a full queue is an
    /// error and the caller may retry once jobs have finished. Shutting down
    /// a worker that already stopped succeeds.
    pub fn shutdown(&self) -> Result<()> {
        match self.job_sender.try_send((0, Job::Shutdown)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(RecipeSyncError::Channel(
                "job queue full, shutdown not queued".to_string(),
            )),
            Err(TrySendError::Disconnected(_)) => {
                self.running.store(false, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    /// Whether the worker loop is still accepting jobs
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&self) -> Option<JobEvent> {
        self.event_receiver.try_recv().ok()
    }

    /// Receive all pending events
    pub fn drain(&self) -> Vec<JobEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_receiver.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<JobEvent> {
        self.event_receiver.recv_timeout(timeout).ok()
    }

    /// Block until job `id` finishes
    ///
    /// Events of other jobs received meanwhile are discarded.
    pub fn wait_for(&self, id: JobId, timeout: Duration) -> Result<JobOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.event_receiver.recv_timeout(remaining) {
                Ok(JobEvent::Finished { id: done, outcome }) if done == id => return Ok(outcome),
                Ok(JobEvent::Stopped) => {
                    return Err(RecipeSyncError::Channel(format!(
                        "sync worker stopped before job {} finished",
                        id
                    )))
                }
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(RecipeSyncError::Channel(format!(
                        "job {} not finished within {:?}",
                        id, timeout
                    )))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(RecipeSyncError::Channel("sync worker stopped".to_string()))
                }
            }
        }
    }
}

/// Single consumer of the job queue
pub struct SyncService {
    engine: SyncEngine,
    job_receiver: Receiver<(JobId, Job)>,
    event_sender: Sender<JobEvent>,
    running: Arc<AtomicBool>,
}

impl SyncService {
    /// Create the service and the handle used to feed it
    pub fn new(engine: SyncEngine, capacity: usize) -> (Self, JobHandle) {
        let (job_tx, job_rx) = bounded(capacity.max(1));
        let (event_tx, event_rx) = bounded(EVENT_CAPACITY);
        let running = Arc::new(AtomicBool::new(true));

        let service = Self {
            engine,
            job_receiver: job_rx,
            event_sender: event_tx,
            running: running.clone(),
        };

        let handle = JobHandle {
            job_sender: job_tx,
            event_receiver: event_rx,
            next_id: Arc::new(AtomicU64::new(1)),
            running,
        };

        (service, handle)
    }

    /// Run the service on a dedicated thread
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || self.run())
            .map_err(RecipeSyncError::from)
    }

    /// Worker loop; returns on `Job::Shutdown` or when every handle is gone
    pub fn run(self) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!("Failed to start sync worker runtime: {}", e);
                self.stop();
                return;
            }
        };

        tracing::info!("Sync worker started");
        while self.running.load(Ordering::SeqCst) {
            let (id, job) = match self.job_receiver.recv() {
                Ok((_, Job::Shutdown)) | Err(_) => break,
                Ok(next) => next,
            };

            tracing::info!("Job {}: {}", id, job);
            self.emit(JobEvent::Started {
                id,
                job: job.clone(),
            });
            let started = Instant::now();
            let outcome = runtime.block_on(self.execute(job));
            if outcome.is_success() {
                tracing::info!("Job {} finished in {:?}", id, started.elapsed());
            } else {
                tracing::warn!("Job {} finished with failures in {:?}", id, started.elapsed());
            }
            self.emit(JobEvent::Finished { id, outcome });
        }

        self.stop();
        tracing::info!("Sync worker stopped");
    }

    async fn execute(&self, job: Job) -> JobOutcome {
        let result = match job {
            Job::Download {
                recipe_id,
                structure_id,
            } => self
                .engine
                .download_to_recipe(recipe_id, structure_id)
                .await
                .map(JobOutcome::Downloaded),
            Job::Upload {
                recipe_id,
                recipe_name,
            } => self
                .engine
                .upload_from_recipe(recipe_id, recipe_name.as_deref())
                .await
                .map(JobOutcome::Uploaded),
            Job::Check {
                recipe_id,
                structure_id,
            } => self
                .engine
                .check_consistency(recipe_id, structure_id)
                .await
                .map(JobOutcome::Checked),
            Job::ProbeUnits => self.engine.probe_units().await.map(JobOutcome::Probed),
            Job::Shutdown => return JobOutcome::Failed("shutdown is not a pipeline".to_string()),
        };

        result.unwrap_or_else(|e| {
            tracing::error!("Job aborted: {}", e);
            JobOutcome::Failed(e.to_string())
        })
    }

    fn emit(&self, event: JobEvent) {
        if let Err(TrySendError::Full(event)) = self.event_sender.try_send(event) {
            tracing::warn!("Event queue full, dropping {:?}", event);
        }
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.emit(JobEvent::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::controller::mock::MockConnector;
    use crate::store::MemoryStore;

    fn engine() -> SyncEngine {
        SyncEngine::new(
            Arc::new(MockConnector::new()),
            Arc::new(MemoryStore::new()),
            SyncConfig::default().without_delays(),
        )
    }

    #[test]
    fn test_full_queue_rejects_job() {
        let (_service, handle) = SyncService::new(engine(), 1);

        assert_eq!(handle.submit_probe().unwrap(), 1);
        let err = handle.submit_download(1, 1).unwrap_err();
        assert!(err.to_string().contains("queue full"), "{}", err);
    }

    #[test]
    fn test_shutdown_on_full_queue_does_not_block() {
        let (service, handle) = SyncService::new(engine(), 1);
        handle.submit_probe().unwrap();

        let err = handle.shutdown().unwrap_err();
        assert!(err.to_string().contains("queue full"), "{}", err);
        assert!(handle.is_running());

        // once the queue drains the shutdown goes through
        let worker = service.spawn().unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while handle.shutdown().is_err() {
            assert!(std::time::Instant::now() < deadline, "queue never drained");
            std::thread::sleep(Duration::from_millis(10));
        }
        worker.join().unwrap();
        assert!(!handle.is_running());
    }

    #[test]
    fn test_shutdown_after_worker_gone() {
        let (service, handle) = SyncService::new(engine(), 4);
        drop(service);

        assert!(handle.shutdown().is_ok());
        assert!(!handle.is_running());
    }

    #[test]
    fn test_submit_after_worker_gone() {
        let (service, handle) = SyncService::new(engine(), 4);
        drop(service);

        assert!(matches!(handle.submit_probe(), Err(RecipeSyncError::Channel(_))));
    }

    #[test]
    fn test_job_ids_increase() {
        let (_service, handle) = SyncService::new(engine(), 4);
        let first = handle.submit_check(1, 1).unwrap();
        let second = handle.submit_upload(1, None).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_shutdown_stops_worker() {
        let (service, handle) = SyncService::new(engine(), 4);
        handle.shutdown().unwrap();
        service.run();

        assert!(!handle.is_running());
        assert!(matches!(handle.drain().as_slice(), [JobEvent::Stopped]));
    }

    #[test]
    fn test_job_runs_and_finishes() {
        let (service, handle) = SyncService::new(engine(), 4);
        let id = handle.submit_probe().unwrap();
        handle.shutdown().unwrap();
        service.run();

        let events = handle.drain();
        assert!(matches!(events[0], JobEvent::Started { id: started, .. } if started == id));
        match &events[1] {
            JobEvent::Finished {
                id: finished,
                outcome: JobOutcome::Probed(units),
            } => {
                assert_eq!(*finished, id);
                assert!(units.is_empty());
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(events[2], JobEvent::Stopped));
    }

    #[test]
    fn test_wait_for_reports_stop() {
        let (service, handle) = SyncService::new(engine(), 4);
        handle.shutdown().unwrap();
        service.run();

        let err = handle.wait_for(7, Duration::from_millis(100)).unwrap_err();
        assert!(err.to_string().contains("stopped"), "{}", err);
    }
}
