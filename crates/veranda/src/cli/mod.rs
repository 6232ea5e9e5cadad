//! CLI modules for the veranda binary.

pub mod audit;
pub mod job;
pub mod output;
pub mod site;
pub mod status;

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;

use veranda::audit::AuditService;
use veranda::config::PanelConfig;
use veranda::sites::SiteService;
use veranda_ids::JobId;
use veranda_jobs::JobEngine;
use veranda_protocol::Job;
use veranda_provision::NginxProvisioner;
use veranda_store::StateStore;

/// Wired-up panel components for one CLI invocation.
pub struct Panel {
    pub cfg: PanelConfig,
    pub store: Arc<StateStore>,
    pub engine: Arc<JobEngine>,
    pub sites: SiteService,
    pub audit: AuditService,
}

impl Panel {
    /// Open the store and wire the pipeline. The engine is not started
    /// here; read-only commands never spawn the worker.
    pub fn open(cfg: PanelConfig) -> Result<Self> {
        let store = Arc::new(StateStore::open(&cfg.state_path).with_context(|| {
            format!("open state store at {}", cfg.state_path.display())
        })?);
        let provisioner = Arc::new(NginxProvisioner::new(cfg.provision_config()));
        let engine = Arc::new(JobEngine::new(
            store.clone(),
            provisioner,
            cfg.job_queue_capacity,
        ));
        let sites = SiteService::new(store.clone(), engine.clone());
        let audit = AuditService::new(store.clone());
        Ok(Self {
            cfg,
            store,
            engine,
            sites,
            audit,
        })
    }

    /// Poll a job until it reaches a terminal status.
    pub async fn wait_for_job(&self, id: &JobId, wait: Duration) -> Result<Job> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let job = self.engine.get(id)?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("job {id} still {} after {wait:?}", job.status);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Stop the worker (bounded by the configured shutdown timeout) and
    /// persist the snapshot one final time.
    pub async fn shutdown(&self) -> Result<()> {
        self.engine.stop(self.cfg.shutdown_timeout).await?;
        self.store.close()?;
        Ok(())
    }
}
