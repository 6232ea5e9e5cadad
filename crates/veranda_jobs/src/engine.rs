//! Job engine: bounded FIFO queue + one background worker.
//!
//! Design:
//! - Enqueue reserves a queue slot *before* persisting the job record, so a
//!   cancelled or failed enqueue leaves no orphaned `queued` job behind.
//! - The worker handles one job at a time and finishes the in-flight job
//!   before reacting to shutdown.
//! - The store lock is never held across provisioner calls; the worker
//!   talks to both strictly in sequence.

use anyhow::Context;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use veranda_ids::{JobId, UserId};
use veranda_protocol::{Job, JobRequest, JobStatus, SiteProvisioner, SiteStatus};
use veranda_store::StateStore;

use crate::error::{EngineError, Result};

/// Asynchronous job engine. One instance per process; `start` spawns the
/// single worker task, `stop` shuts it down gracefully.
pub struct JobEngine {
    store: Arc<StateStore>,
    provisioner: Arc<dyn SiteProvisioner>,
    queue_tx: mpsc::Sender<JobId>,
    inner: Mutex<EngineInner>,
}

struct EngineInner {
    started: bool,
    stopped: bool,
    queue_rx: Option<mpsc::Receiver<JobId>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl JobEngine {
    pub fn new(
        store: Arc<StateStore>,
        provisioner: Arc<dyn SiteProvisioner>,
        queue_capacity: usize,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity.max(1));
        Self {
            store,
            provisioner,
            queue_tx,
            inner: Mutex::new(EngineInner {
                started: false,
                stopped: false,
                queue_rx: Some(queue_rx),
                shutdown_tx: None,
                worker: None,
            }),
        }
    }

    /// Spawn the background worker. Idempotent; a second call is a no-op.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.started || inner.stopped {
            return;
        }
        let Some(queue_rx) = inner.queue_rx.take() else {
            return;
        };

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let worker = Worker {
            store: self.store.clone(),
            provisioner: self.provisioner.clone(),
            queue_rx,
            shutdown_rx,
        };
        inner.worker = Some(tokio::spawn(worker.run()));
        inner.shutdown_tx = Some(shutdown_tx);
        inner.started = true;
    }

    /// Signal shutdown and wait for the worker, bounded by `wait`. The
    /// in-flight job is allowed to finish; on timeout it keeps running
    /// detached and the caller gets `StopTimeout`. Idempotent.
    pub async fn stop(&self, wait: Duration) -> Result<()> {
        let (shutdown_tx, worker) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.stopped {
                return Ok(());
            }
            inner.stopped = true;
            (inner.shutdown_tx.take(), inner.worker.take())
        };

        if let Some(tx) = shutdown_tx {
            let _ = tx.send(()).await;
        }
        let Some(handle) = worker else {
            return Ok(());
        };

        match timeout(wait, handle).await {
            Ok(join_result) => {
                if let Err(err) = join_result {
                    error!("job worker task failed: {err}");
                }
                Ok(())
            }
            Err(_) => Err(EngineError::StopTimeout(wait)),
        }
    }

    /// Persist and queue a new job. Blocks while the queue is full
    /// (backpressure); racing the returned future against a timeout or
    /// cancelling it leaves no job record behind, because the queue slot is
    /// reserved before anything is persisted.
    pub async fn enqueue(&self, actor: &UserId, request: JobRequest) -> Result<Job> {
        {
            let inner = self.inner.lock().unwrap();
            if !inner.started {
                return Err(EngineError::NotStarted);
            }
            if inner.stopped {
                return Err(EngineError::Stopped);
            }
        }

        let permit = self
            .queue_tx
            .reserve()
            .await
            .map_err(|_| EngineError::QueueClosed)?;

        let payload = request.encode_payload()?;
        let job = Job {
            id: JobId::new(),
            kind: request.kind(),
            status: JobStatus::Queued,
            payload,
            error: String::new(),
            started_at: None,
            finished_at: None,
            created_at: Utc::now(),
            triggered_by: actor.clone(),
        };
        self.store.create_job(job.clone())?;
        permit.send(job.id.clone());

        info!("job enqueued id={} kind={}", job.id, job.kind);
        Ok(job)
    }

    pub fn get(&self, id: &JobId) -> Result<Job> {
        self.store.get_job(id).map_err(Into::into)
    }

    pub fn list(&self, limit: usize) -> Vec<Job> {
        self.store.list_jobs(limit)
    }
}

/// The single background consumer of the job queue.
struct Worker {
    store: Arc<StateStore>,
    provisioner: Arc<dyn SiteProvisioner>,
    queue_rx: mpsc::Receiver<JobId>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl Worker {
    async fn run(mut self) {
        info!("job worker started");
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.recv() => {
                    info!("job worker stopping");
                    break;
                }

                next = self.queue_rx.recv() => {
                    match next {
                        Some(job_id) => self.handle_job(&job_id).await,
                        None => break,
                    }
                }
            }
        }
    }

    /// Run one job to a terminal status. Every failure path ends the job as
    /// `failed` with the error message stored; nothing here takes the
    /// worker down.
    async fn handle_job(&self, job_id: &JobId) {
        let job = match self.store.get_job(job_id) {
            Ok(job) => job,
            Err(err) => {
                error!("job load failed id={job_id} err={err}");
                return;
            }
        };

        let started_at = Utc::now();
        if let Err(err) =
            self.store
                .update_job(job_id, JobStatus::Running, "", Some(started_at), None)
        {
            error!("job start write failed id={job_id} err={err}");
            return;
        }

        let run_result = self.run_job(&job).await;
        let finished_at = Utc::now();
        match run_result {
            Ok(()) => {
                if let Err(err) = self.store.update_job(
                    job_id,
                    JobStatus::Success,
                    "",
                    Some(started_at),
                    Some(finished_at),
                ) {
                    error!("job finish write failed id={job_id} err={err}");
                }
            }
            Err(err) => {
                warn!("job failed id={} kind={} err={err:#}", job.id, job.kind);
                if let Err(write_err) = self.store.update_job(
                    job_id,
                    JobStatus::Failed,
                    &format!("{err:#}"),
                    Some(started_at),
                    Some(finished_at),
                ) {
                    error!("job failure write failed id={job_id} err={write_err}");
                }
            }
        }
    }

    async fn run_job(&self, job: &Job) -> anyhow::Result<()> {
        let request = JobRequest::decode(job.kind, &job.payload)?;
        match request {
            JobRequest::ProvisionSite { site_id } => {
                let site = self.store.get_site(&site_id).context("load site")?;
                if let Err(err) = self.provisioner.provision_site(&site).await {
                    let _ = self.store.update_site_status(&site_id, SiteStatus::Failed);
                    return Err(err);
                }
                self.store
                    .update_site_status(&site_id, SiteStatus::Active)
                    .context("update site status")?;
                Ok(())
            }
            JobRequest::DeprovisionSite { site_id } => {
                let site = self.store.get_site(&site_id).context("load site")?;
                if let Err(err) = self.provisioner.deprovision_site(&site).await {
                    let _ = self.store.update_site_status(&site_id, SiteStatus::Failed);
                    return Err(err);
                }
                self.store
                    .delete_site(&site_id)
                    .context("delete site metadata")?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;
    use veranda_ids::SiteId;
    use veranda_protocol::{JobKind, Site, SiteRuntime};

    struct FakeProvisioner {
        fail: Option<String>,
        delay: Option<Duration>,
        gate: Option<Arc<Semaphore>>,
        provision_calls: AtomicUsize,
        deprovision_calls: AtomicUsize,
    }

    impl FakeProvisioner {
        fn ok() -> Self {
            Self {
                fail: None,
                delay: None,
                gate: None,
                provision_calls: AtomicUsize::new(0),
                deprovision_calls: AtomicUsize::new(0),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                fail: Some(message.to_string()),
                ..Self::ok()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::ok()
            }
        }

        fn gated(gate: Arc<Semaphore>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::ok()
            }
        }

        async fn settle(&self) -> anyhow::Result<()> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            match &self.fail {
                Some(message) => Err(anyhow::anyhow!("{message}")),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl SiteProvisioner for FakeProvisioner {
        async fn provision_site(&self, _site: &Site) -> anyhow::Result<()> {
            self.provision_calls.fetch_add(1, Ordering::SeqCst);
            self.settle().await
        }

        async fn deprovision_site(&self, _site: &Site) -> anyhow::Result<()> {
            self.deprovision_calls.fetch_add(1, Ordering::SeqCst);
            self.settle().await
        }
    }

    fn seed_site(store: &StateStore, id: &str, domain: &str) -> SiteId {
        let now = Utc::now();
        let site_id = SiteId::parse(id).unwrap();
        store
            .create_site(Site {
                id: site_id.clone(),
                domain: domain.to_string(),
                root_path: format!("/srv/{}", id),
                runtime: SiteRuntime::Static,
                status: SiteStatus::Provisioning,
                created_by: UserId::parse("usr-1").unwrap(),
                created_at: now,
                updated_at: now,
            })
            .unwrap();
        site_id
    }

    fn actor() -> UserId {
        UserId::parse("usr-1").unwrap()
    }

    fn new_engine(
        dir: &tempfile::TempDir,
        provisioner: Arc<dyn SiteProvisioner>,
        capacity: usize,
    ) -> (Arc<StateStore>, JobEngine) {
        let store = Arc::new(StateStore::open(dir.path().join("state.json")).unwrap());
        let engine = JobEngine::new(store.clone(), provisioner, capacity);
        (store, engine)
    }

    async fn wait_for_terminal(store: &StateStore, id: &JobId) -> Job {
        for _ in 0..200 {
            let job = store.get_job(id).unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not reach a terminal status");
    }

    async fn wait_for_running(store: &StateStore, id: &JobId) {
        for _ in 0..200 {
            if store.get_job(id).unwrap().status == JobStatus::Running {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never started running");
    }

    #[tokio::test]
    async fn test_provision_job_marks_site_active() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine) = new_engine(&dir, Arc::new(FakeProvisioner::ok()), 16);
        let site_id = seed_site(&store, "site-1", "a.test");
        engine.start();

        let job = engine
            .enqueue(&actor(), JobRequest::ProvisionSite { site_id: site_id.clone() })
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Queued);

        let final_job = wait_for_terminal(&store, &job.id).await;
        assert_eq!(final_job.status, JobStatus::Success);
        assert!(final_job.error.is_empty());
        assert!(final_job.started_at.is_some());
        assert!(final_job.finished_at.is_some());
        assert_eq!(store.get_site(&site_id).unwrap().status, SiteStatus::Active);

        engine.stop(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_deprovision_job_deletes_site_record() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeProvisioner::ok());
        let (store, engine) = new_engine(&dir, fake.clone(), 16);
        let site_id = seed_site(&store, "site-1", "remove.test");
        engine.start();

        let job = engine
            .enqueue(&actor(), JobRequest::DeprovisionSite { site_id: site_id.clone() })
            .await
            .unwrap();
        let final_job = wait_for_terminal(&store, &job.id).await;
        assert_eq!(final_job.status, JobStatus::Success);
        assert_eq!(fake.deprovision_calls.load(Ordering::SeqCst), 1);
        assert!(store.get_site(&site_id).is_err());

        engine.stop(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_provision_failure_marks_site_failed() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine) = new_engine(&dir, Arc::new(FakeProvisioner::failing("nginx reload failed")), 16);
        let site_id = seed_site(&store, "site-1", "a.test");
        engine.start();

        let job = engine
            .enqueue(&actor(), JobRequest::ProvisionSite { site_id: site_id.clone() })
            .await
            .unwrap();
        let final_job = wait_for_terminal(&store, &job.id).await;
        assert_eq!(final_job.status, JobStatus::Failed);
        assert!(final_job.error.contains("nginx reload failed"));
        assert_eq!(store.get_site(&site_id).unwrap().status, SiteStatus::Failed);

        engine.stop(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_deprovision_failure_retains_site_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine) = new_engine(&dir, Arc::new(FakeProvisioner::failing("boom")), 16);
        let site_id = seed_site(&store, "site-1", "keep.test");
        engine.start();

        let job = engine
            .enqueue(&actor(), JobRequest::DeprovisionSite { site_id: site_id.clone() })
            .await
            .unwrap();
        let final_job = wait_for_terminal(&store, &job.id).await;
        assert_eq!(final_job.status, JobStatus::Failed);
        // Site record is retained and marked failed, not deleted.
        assert_eq!(store.get_site(&site_id).unwrap().status, SiteStatus::Failed);

        engine.stop(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_enqueue_rejected_before_start_and_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine) = new_engine(&dir, Arc::new(FakeProvisioner::ok()), 16);
        let site_id = seed_site(&store, "site-1", "a.test");

        let err = engine
            .enqueue(&actor(), JobRequest::ProvisionSite { site_id: site_id.clone() })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotStarted));

        engine.start();
        engine.stop(Duration::from_secs(2)).await.unwrap();

        let err = engine
            .enqueue(&actor(), JobRequest::ProvisionSite { site_id })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Stopped));

        // No records were left behind by the rejected calls.
        assert!(store.list_jobs(0).is_empty());
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine) = new_engine(&dir, Arc::new(FakeProvisioner::ok()), 16);
        let site_id = seed_site(&store, "site-1", "a.test");

        engine.start();
        engine.start();

        let job = engine
            .enqueue(&actor(), JobRequest::ProvisionSite { site_id })
            .await
            .unwrap();
        wait_for_terminal(&store, &job.id).await;

        engine.stop(Duration::from_secs(2)).await.unwrap();
        engine.stop(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_payload_fails_job_and_worker_continues() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine) = new_engine(&dir, Arc::new(FakeProvisioner::ok()), 16);
        let site_id = seed_site(&store, "site-1", "a.test");
        engine.start();

        // A job whose payload is missing its required key: the worker must
        // end it as failed, not crash.
        let bad_id = JobId::parse("job-bad").unwrap();
        store
            .create_job(Job {
                id: bad_id.clone(),
                kind: JobKind::ProvisionSite,
                status: JobStatus::Queued,
                payload: "{}".to_string(),
                error: String::new(),
                started_at: None,
                finished_at: None,
                created_at: Utc::now(),
                triggered_by: actor(),
            })
            .unwrap();
        engine.queue_tx.send(bad_id.clone()).await.unwrap();

        let bad = wait_for_terminal(&store, &bad_id).await;
        assert_eq!(bad.status, JobStatus::Failed);
        assert!(!bad.error.is_empty());

        // The worker keeps processing subsequent jobs.
        let job = engine
            .enqueue(&actor(), JobRequest::ProvisionSite { site_id: site_id.clone() })
            .await
            .unwrap();
        let final_job = wait_for_terminal(&store, &job.id).await;
        assert_eq!(final_job.status, JobStatus::Success);

        engine.stop(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_site_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine) = new_engine(&dir, Arc::new(FakeProvisioner::ok()), 16);
        engine.start();

        let job = engine
            .enqueue(
                &actor(),
                JobRequest::ProvisionSite {
                    site_id: SiteId::parse("missing").unwrap(),
                },
            )
            .await
            .unwrap();
        let final_job = wait_for_terminal(&store, &job.id).await;
        assert_eq!(final_job.status, JobStatus::Failed);
        assert!(final_job.error.contains("load site"));

        engine.stop(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_full_queue_cancelled_enqueue_leaves_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Semaphore::new(0));
        let (store, engine) = new_engine(&dir, Arc::new(FakeProvisioner::gated(gate.clone())), 1);
        let site_id = seed_site(&store, "site-1", "a.test");
        engine.start();

        // First job occupies the worker (blocked on the gate), second fills
        // the single queue slot.
        let running = engine
            .enqueue(&actor(), JobRequest::ProvisionSite { site_id: site_id.clone() })
            .await
            .unwrap();
        wait_for_running(&store, &running.id).await;
        let queued = engine
            .enqueue(&actor(), JobRequest::ProvisionSite { site_id: site_id.clone() })
            .await
            .unwrap();

        // Queue is full: a third enqueue blocks on backpressure, and
        // cancelling it must not create a job record.
        let result = timeout(
            Duration::from_millis(50),
            engine.enqueue(&actor(), JobRequest::ProvisionSite { site_id }),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(store.list_jobs(0).len(), 2);

        // Release both gated jobs and drain.
        gate.add_permits(2);
        wait_for_terminal(&store, &running.id).await;
        wait_for_terminal(&store, &queued.id).await;
        engine.stop(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_job() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine) = new_engine(
            &dir,
            Arc::new(FakeProvisioner::slow(Duration::from_millis(100))),
            16,
        );
        let site_id = seed_site(&store, "site-1", "a.test");
        engine.start();

        let job = engine
            .enqueue(&actor(), JobRequest::ProvisionSite { site_id })
            .await
            .unwrap();
        wait_for_running(&store, &job.id).await;

        engine.stop(Duration::from_secs(2)).await.unwrap();
        // The in-flight job ran to completion before the worker exited.
        assert_eq!(store.get_job(&job.id).unwrap().status, JobStatus::Success);
    }

    #[tokio::test]
    async fn test_stop_times_out_on_stuck_job() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Semaphore::new(0));
        let (store, engine) = new_engine(&dir, Arc::new(FakeProvisioner::gated(gate.clone())), 16);
        let site_id = seed_site(&store, "site-1", "a.test");
        engine.start();

        let job = engine
            .enqueue(&actor(), JobRequest::ProvisionSite { site_id })
            .await
            .unwrap();
        wait_for_running(&store, &job.id).await;

        let err = engine.stop(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, EngineError::StopTimeout(_)));

        // Unblock the abandoned worker so it can finish in the background.
        gate.add_permits(1);
    }

    #[tokio::test]
    async fn test_list_returns_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let (store, engine) = new_engine(&dir, Arc::new(FakeProvisioner::ok()), 16);
        let site_id = seed_site(&store, "site-1", "a.test");
        engine.start();

        let first = engine
            .enqueue(&actor(), JobRequest::ProvisionSite { site_id: site_id.clone() })
            .await
            .unwrap();
        wait_for_terminal(&store, &first.id).await;
        let second = engine
            .enqueue(&actor(), JobRequest::ProvisionSite { site_id })
            .await
            .unwrap();
        wait_for_terminal(&store, &second.id).await;

        let jobs = engine.list(1);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, second.id);

        engine.stop(Duration::from_secs(2)).await.unwrap();
    }
}
