//! Table and size formatting for CLI commands

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};
use sharecrawl_db::{FileStatus, IngestionStatus};

/// Format a file size in human-readable form
///
/// Examples:
/// - 500 -> "500 B"
/// - 1536000 -> "1.5 MB"
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.1} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// "1m 05s" style duration for run summaries.
pub fn format_duration_ms(ms: u64) -> String {
    let secs = ms / 1000;
    if secs >= 3600 {
        format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}.{:03}s", secs, ms % 1000)
    }
}

/// Print a table with headers and rows
pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for row in rows {
        table.add_row(row);
    }

    println!("{}", table);
}

/// Print a table with custom column colors
pub fn print_table_colored(headers: &[&str], rows: Vec<Vec<(String, Option<Color>)>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for row in rows {
        let cells: Vec<Cell> = row
            .into_iter()
            .map(|(text, color)| {
                let cell = Cell::new(text);
                if let Some(c) = color {
                    cell.fg(c)
                } else {
                    cell
                }
            })
            .collect();
        table.add_row(cells);
    }

    println!("{}", table);
}

/// Key/value summary as a two-column table.
pub fn print_summary(title: &str, rows: Vec<(&str, String)>) {
    println!("{}", title);
    print_table(
        &["Metric", "Value"],
        rows.into_iter()
            .map(|(key, value)| vec![key.to_string(), value])
            .collect(),
    );
}

pub fn color_for_status(status: FileStatus) -> Color {
    match status {
        FileStatus::Discovered => Color::Green,
        FileStatus::Pending => Color::Grey,
        FileStatus::PermissionDenied => Color::Yellow,
        FileStatus::AclFailed => Color::Magenta,
        FileStatus::Error => Color::Red,
        FileStatus::Skipped => Color::Blue,
    }
}

pub fn color_for_ingestion(status: IngestionStatus) -> Color {
    match status {
        IngestionStatus::Pending => Color::Grey,
        IngestionStatus::Ingesting => Color::Yellow,
        IngestionStatus::Completed => Color::Green,
        IngestionStatus::Failed => Color::Red,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1048576), "1.0 MB");
        assert_eq!(format_size(1073741824), "1.0 GB");
    }

    #[test]
    fn test_format_duration_ms() {
        assert_eq!(format_duration_ms(1_250), "1.250s");
        assert_eq!(format_duration_ms(65_000), "1m 05s");
        assert_eq!(format_duration_ms(3_723_000), "1h 02m 03s");
    }
}
