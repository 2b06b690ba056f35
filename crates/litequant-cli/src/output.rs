//! Output formatting utilities.

use colored::Colorize;
use litequant_engine::{LineLevel, Report, ReportLine};

/// Format a table.
pub fn format_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return String::new();
    }

    // Calculate column widths
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();

    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();

    // Header
    let header_line: String = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
        .collect::<Vec<_>>()
        .join(" │ ");
    output.push_str(&format!("{}\n", header_line.bright_cyan().bold()));

    // Separator
    let sep: String = widths
        .iter()
        .map(|w| "─".repeat(*w))
        .collect::<Vec<_>>()
        .join("─┼─");
    output.push_str(&format!("{}\n", sep));

    // Rows
    for row in rows {
        let row_line: String = row
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let width = widths.get(i).copied().unwrap_or(0);
                format!("{:width$}", cell, width = width)
            })
            .collect::<Vec<_>>()
            .join(" │ ");
        output.push_str(&format!("{}\n", row_line));
    }

    output
}

/// Format a key-value list.
pub fn format_kv_list(items: &[(&str, String)]) -> String {
    let max_key_len = items.iter().map(|(k, _)| k.len()).max().unwrap_or(0);

    items
        .iter()
        .map(|(k, v)| {
            format!(
                "  {}: {}",
                format!("{:width$}", k, width = max_key_len).bright_cyan(),
                v
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format bytes as human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format duration.
pub fn format_duration(duration: std::time::Duration) -> String {
    let seconds = duration.as_secs_f64();
    if seconds < 0.001 {
        format!("{:.2} µs", seconds * 1_000_000.0)
    } else if seconds < 1.0 {
        format!("{:.2} ms", seconds * 1000.0)
    } else if seconds < 60.0 {
        format!("{:.2} s", seconds)
    } else if seconds < 3600.0 {
        format!("{:.1} min", seconds / 60.0)
    } else {
        format!("{:.1} h", seconds / 3600.0)
    }
}

/// Format number with commas.
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    let chars: Vec<char> = s.chars().collect();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }

    result
}

/// Format percentage.
pub fn format_percentage(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

/// Print a section header.
pub fn print_section(title: &str) {
    println!("\n{}", title.bright_green().bold());
    println!("{}", "─".repeat(title.len()).bright_green());
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "✓".bright_green(), message);
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".bright_yellow(), message);
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".bright_blue(), message);
}

/// Print a separator banner with a title.
pub fn print_banner(title: &str) {
    let rule = "=".repeat(60);
    println!("{rule}");
    println!("{}", title.bright_green().bold());
    println!("{rule}");
}

/// Print one report line with a colored marker.
pub fn print_report_line(line: &ReportLine) {
    match line.level {
        LineLevel::Info => println!("  {}", line.text),
        LineLevel::Success => print_success(&line.text),
        LineLevel::Warning => print_warning(&line.text),
    }
}

/// Print every line of a report.
pub fn print_report(report: &Report) {
    for line in &report.lines {
        print_report_line(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024 + 512 * 1024), "3.50 MB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_micros(250)), "250.00 µs");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50 s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1.5 min");
    }

    #[test]
    fn test_format_number_and_percentage() {
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(4_231_461), "4,231,461");
        assert_eq!(format_percentage(0.9), "90.0%");
    }

    #[test]
    fn test_format_table() {
        colored::control::set_override(false);
        let table = format_table(&["op", "scale"], &[vec!["conv2d".into(), "0.5".into()]]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "op     │ scale");
        assert_eq!(lines[2], "conv2d │ 0.5  ");
        assert!(format_table(&["op"], &[]).is_empty());
    }
}
