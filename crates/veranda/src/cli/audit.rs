//! Audit trail command.

use anyhow::Result;

use veranda::config::PanelConfig;

use super::output::{format_time, print_table, truncate};
use super::Panel;

pub async fn run_list(cfg: PanelConfig, limit: usize, json: bool) -> Result<()> {
    let panel = Panel::open(cfg)?;
    let logs = panel.audit.list(limit);

    if json {
        println!("{}", serde_json::to_string_pretty(&logs)?);
        return Ok(());
    }

    let rows = logs
        .iter()
        .map(|entry| {
            vec![
                entry.id.to_string(),
                entry.actor_user.clone(),
                entry.action.clone(),
                format!("{}/{}", entry.target_type, entry.target_id),
                truncate(&entry.metadata, 48),
                format_time(&entry.created_at),
            ]
        })
        .collect();
    print_table(
        &["ID", "ACTOR", "ACTION", "TARGET", "METADATA", "CREATED"],
        rows,
    );
    Ok(())
}
