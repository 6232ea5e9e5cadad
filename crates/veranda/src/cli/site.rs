//! Site commands.

use anyhow::{bail, Result};
use serde_json::json;
use std::time::Duration;

use veranda::config::PanelConfig;
use veranda::sites::CreateSiteInput;
use veranda_ids::UserId;
use veranda_protocol::{JobStatus, Site};

use super::output::{format_time, print_table};
use super::Panel;

pub struct AddArgs {
    pub domain: String,
    pub root: String,
    pub runtime: String,
    pub actor: String,
    pub wait_secs: u64,
    pub json: bool,
}

pub struct RmArgs {
    pub site: String,
    pub actor: String,
    pub wait_secs: u64,
    pub json: bool,
}

pub async fn run_add(cfg: PanelConfig, args: AddArgs) -> Result<()> {
    let panel = Panel::open(cfg)?;
    panel.engine.start();
    let actor = UserId::parse(&args.actor)?;

    let (site, job) = panel
        .sites
        .create_site(
            &actor,
            CreateSiteInput {
                domain: args.domain,
                root_path: args.root,
                runtime: args.runtime,
            },
        )
        .await?;
    panel.audit.record(
        &actor,
        "site.create",
        "site",
        site.id.as_str(),
        json!({ "domain": site.domain, "runtime": site.runtime.as_str() }),
    );

    let job = panel
        .wait_for_job(&job.id, Duration::from_secs(args.wait_secs))
        .await?;
    let site = panel.sites.get_site(&site.id)?;
    panel.shutdown().await?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "site": site, "job": job }))?
        );
    } else {
        print_site_table(std::slice::from_ref(&site));
    }

    if job.status == JobStatus::Failed {
        bail!("provisioning failed: {}", job.error);
    }
    Ok(())
}

pub async fn run_list(cfg: PanelConfig, limit: usize, json: bool) -> Result<()> {
    let panel = Panel::open(cfg)?;
    let sites = panel.sites.list_sites(limit);

    if json {
        println!("{}", serde_json::to_string_pretty(&sites)?);
    } else {
        print_site_table(&sites);
    }
    Ok(())
}

pub async fn run_show(cfg: PanelConfig, key: &str, json: bool) -> Result<()> {
    let panel = Panel::open(cfg)?;
    let site = panel.sites.resolve_site(key)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&site)?);
    } else {
        print_site_table(std::slice::from_ref(&site));
    }
    Ok(())
}

pub async fn run_rm(cfg: PanelConfig, args: RmArgs) -> Result<()> {
    let panel = Panel::open(cfg)?;
    let site = panel.sites.resolve_site(&args.site)?;
    panel.engine.start();
    let actor = UserId::parse(&args.actor)?;

    let job = panel.sites.delete_site(&actor, &site.id).await?;
    panel.audit.record(
        &actor,
        "site.delete",
        "site",
        site.id.as_str(),
        json!({ "domain": site.domain }),
    );

    let job = panel
        .wait_for_job(&job.id, Duration::from_secs(args.wait_secs))
        .await?;
    panel.shutdown().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&json!({ "job": job }))?);
    }

    if job.status == JobStatus::Failed {
        bail!("deprovisioning failed: {}", job.error);
    }
    if !args.json {
        println!("site {} removed", site.domain);
    }
    Ok(())
}

fn print_site_table(sites: &[Site]) {
    let rows = sites
        .iter()
        .map(|site| {
            vec![
                site.id.to_string(),
                site.domain.clone(),
                site.runtime.to_string(),
                site.status.to_string(),
                site.root_path.clone(),
                format_time(&site.created_at),
            ]
        })
        .collect();
    print_table(&["ID", "DOMAIN", "RUNTIME", "STATUS", "ROOT", "CREATED"], rows);
}
