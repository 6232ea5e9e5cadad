//! Output formatting helpers for CLI commands.

use chrono::{DateTime, Utc};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};

/// Print a table with cyan headers and dynamic column widths.
pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = headers.iter().map(|h| Cell::new(h).fg(Color::Cyan)).collect();
    table.set_header(header_cells);

    for row in rows {
        table.add_row(row);
    }

    println!("{}", table);
}

/// Absolute timestamp, second precision.
pub fn format_time(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn format_opt_time(time: &Option<DateTime<Utc>>) -> String {
    match time {
        Some(t) => format_time(t),
        None => "-".to_string(),
    }
}

/// Truncate long values (error messages) for table cells.
pub fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let cut: String = value.chars().take(max).collect();
    format!("{}…", cut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("0123456789abc", 10), "0123456789…");
    }
}
