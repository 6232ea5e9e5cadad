//! Job commands.

use anyhow::Result;

use veranda::config::PanelConfig;
use veranda_ids::JobId;

use super::output::{format_opt_time, format_time, print_table, truncate};
use super::Panel;

pub async fn run_list(cfg: PanelConfig, limit: usize, json: bool) -> Result<()> {
    let panel = Panel::open(cfg)?;
    let jobs = panel.engine.list(limit);

    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }

    let rows = jobs
        .iter()
        .map(|job| {
            vec![
                job.id.to_string(),
                job.kind.to_string(),
                job.status.to_string(),
                format_time(&job.created_at),
                format_opt_time(&job.finished_at),
                truncate(&job.error, 48),
            ]
        })
        .collect();
    print_table(
        &["ID", "TYPE", "STATUS", "CREATED", "FINISHED", "ERROR"],
        rows,
    );
    Ok(())
}

pub async fn run_show(cfg: PanelConfig, key: &str, json: bool) -> Result<()> {
    let panel = Panel::open(cfg)?;
    let job = panel.engine.get(&JobId::parse(key)?)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&job)?);
        return Ok(());
    }

    print_table(
        &["ID", "TYPE", "STATUS", "TRIGGERED BY", "CREATED", "STARTED", "FINISHED"],
        vec![vec![
            job.id.to_string(),
            job.kind.to_string(),
            job.status.to_string(),
            job.triggered_by.to_string(),
            format_time(&job.created_at),
            format_opt_time(&job.started_at),
            format_opt_time(&job.finished_at),
        ]],
    );
    println!("payload: {}", job.payload);
    if !job.error.is_empty() {
        println!("error: {}", job.error);
    }
    Ok(())
}
