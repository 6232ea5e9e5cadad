//! Panel status summary.

use anyhow::Result;

use veranda::config::PanelConfig;
use veranda_protocol::{JobStatus, SiteStatus};

use super::Panel;

pub async fn run(cfg: PanelConfig) -> Result<()> {
    let panel = Panel::open(cfg)?;
    let sites = panel.store.list_sites(0);
    let jobs = panel.store.list_jobs(0);

    let site_count = |status: SiteStatus| sites.iter().filter(|s| s.status == status).count();
    let job_count = |status: JobStatus| jobs.iter().filter(|j| j.status == status).count();

    println!("state file: {}", panel.store.path().display());
    println!(
        "apply mode: {}",
        if panel.cfg.provision_apply {
            "apply"
        } else {
            "dry-run"
        }
    );
    println!(
        "sites: {} (active {}, provisioning {}, deleting {}, failed {})",
        sites.len(),
        site_count(SiteStatus::Active),
        site_count(SiteStatus::Provisioning),
        site_count(SiteStatus::Deleting),
        site_count(SiteStatus::Failed),
    );
    println!(
        "jobs: {} (queued {}, running {}, success {}, failed {})",
        jobs.len(),
        job_count(JobStatus::Queued),
        job_count(JobStatus::Running),
        job_count(JobStatus::Success),
        job_count(JobStatus::Failed),
    );
    println!("users: {}", panel.store.count_users());
    Ok(())
}
