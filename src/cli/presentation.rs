//! CLI presentation: text and json formatters per command family.

use crate::checkout::CheckoutReport;
use crate::error::RepoError;
use crate::repo::{BatchResult, OutputStatus, PullSummary, StatusKind};
use crate::transfer::TransferReport;
use owo_colors::OwoColorize;
use std::path::PathBuf;

fn push_failures(s: &mut String, failures: &[(PathBuf, RepoError)]) {
    if failures.is_empty() {
        return;
    }
    s.push_str(&format!("\n\n{} ({}):", "Failed".red().bold(), failures.len()));
    for (path, e) in failures {
        s.push_str(&format!("\n  - {}: {}", path.display(), e));
    }
}

/// `add` / `commit`: units processed, e.g. `format_batch_text("Committed", ..)`
pub fn format_batch_text(verb: &str, result: &BatchResult<PathBuf>) -> String {
    let mut s = if result.processed.is_empty() {
        "No units processed.".to_string()
    } else {
        let mut s = format!("{} {} unit(s):", verb, result.processed.len());
        for unit in &result.processed {
            s.push_str(&format!("\n  {}", unit.display()));
        }
        s
    };
    push_failures(&mut s, &result.failures);
    s
}

fn checkout_lines(report: &CheckoutReport) -> String {
    if report.is_empty() {
        return "Everything is up to date.".to_string();
    }
    let mut lines = Vec::new();
    for path in &report.added {
        lines.push(format!("{}  {}", "A".green(), path.display()));
    }
    for path in &report.modified {
        lines.push(format!("{}  {}", "M".yellow(), path.display()));
    }
    lines.join("\n")
}

pub fn format_checkout_text(result: &BatchResult<CheckoutReport>) -> String {
    let mut merged = CheckoutReport::default();
    for report in &result.processed {
        merged.merge(report.clone());
    }
    let mut s = checkout_lines(&merged);
    push_failures(&mut s, &result.failures);
    s
}

/// `push` / `fetch`
pub fn format_transfer_text(verb: &str, report: &TransferReport) -> String {
    let mut s = match report.transferred {
        0 if report.failed.is_empty() => "Everything is up to date.".to_string(),
        n => format!("{} {} object(s)", n, verb),
    };
    if !report.failed.is_empty() {
        s.push_str(&format!(
            "\n\n{} ({}):",
            "Failed objects".red().bold(),
            report.failed.len()
        ));
        for failure in &report.failed {
            s.push_str(&format!("\n  - {}", failure));
        }
    }
    s
}

pub fn format_pull_text(summary: &PullSummary) -> String {
    let mut s = format!("{} object(s) fetched\n", summary.fetched);
    s.push_str(&checkout_lines(&summary.checkout));
    if !summary.failed.is_empty() {
        s.push_str(&format!(
            "\n\n{} ({}):",
            "Failed objects".red().bold(),
            summary.failed.len()
        ));
        for failure in &summary.failed {
            s.push_str(&format!("\n  - {}", failure));
        }
    }
    push_failures(&mut s, &summary.failures);
    s
}

fn kind_label(kind: StatusKind) -> &'static str {
    match kind {
        StatusKind::Unchanged => "unchanged",
        StatusKind::Modified => "modified",
        StatusKind::Partial => "partial",
        StatusKind::Missing => "missing",
        StatusKind::NotCommitted => "not committed",
    }
}

pub fn format_status_text(statuses: &[OutputStatus]) -> String {
    if statuses.is_empty() {
        return "No tracked outputs.".to_string();
    }
    if statuses.iter().all(|s| s.kind == StatusKind::Unchanged && s.cached) {
        return "Everything is up to date.".to_string();
    }
    let mut lines = Vec::new();
    for status in statuses {
        let label = kind_label(status.kind);
        let label = match status.kind {
            StatusKind::Unchanged => label.green().to_string(),
            StatusKind::Partial => label.cyan().to_string(),
            _ => label.yellow().to_string(),
        };
        let cache_note = if status.cached {
            String::new()
        } else {
            format!(" {}", "(not in cache)".dimmed())
        };
        lines.push(format!(
            "{}: {}{}  [{}]",
            status.path.display(),
            label,
            cache_note,
            status.unit.display()
        ));
    }
    lines.join("\n")
}

pub fn format_status_json(statuses: &[OutputStatus]) -> Result<String, RepoError> {
    let entries: Vec<_> = statuses
        .iter()
        .map(|s| {
            serde_json::json!({
                "unit": s.unit.to_string_lossy(),
                "path": s.path.to_string_lossy(),
                "status": kind_label(s.kind),
                "cached": s.cached,
            })
        })
        .collect();
    serde_json::to_string_pretty(&entries).map_err(|e| RepoError::ConfigError(e.to_string()))
}
