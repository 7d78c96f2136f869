//! CLI output formatting.
//!
//! Each command has a `format_*` function returning display lines, and a
//! `print_*` wrapper that writes them out. Format functions are pure so
//! tests can check exact output.
//!
//! # Build
//!
//! ```text
//! css: 2 written, 1 unchanged, 1 failed
//!     statics/css/main.css → public/css/main.css
//!     statics/css/theme.css → public/css/theme.css (unchanged)
//!     ✗ statics/css/broken.css: line 3: unclosed block
//! js: skipped (compiler set to none)
//! Symlinks
//!     public/img → images (created)
//! Stale
//!     public/css/old.css
//! Built 2 files, 1 failure
//! ```
//!
//! # Audit
//!
//! ```text
//! warning[extra-param] trellis.json: css.extraParam
//!     extraParam found in "css"
//! error[wrong-type] trellis.json: http.port
//!     expected number, found string
//!     help: use a number, e.g. 8080
//! 2 issues (1 error, 1 warning)
//! ```
//!
//! Audit output goes to stderr; build and config output go to stdout.

use crate::app::{BuildReport, LinkOutcome};
use crate::audit::AuditReport;
use crate::config::ResolvedConfig;
use crate::guard::WriteOutcome;
use crate::pipeline::PipelineReport;
use serde_json::Value;
use std::path::Path;

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

/// `path` relative to `base` when possible.
fn display_path(base: &Path, path: &Path) -> String {
    path.strip_prefix(base).unwrap_or(path).display().to_string()
}

// ============================================================================
// Build
// ============================================================================

/// One pipeline's summary line and per-output details.
pub fn format_pipeline_report(report: &PipelineReport, app_dir: &Path) -> Vec<String> {
    if let Some(reason) = &report.skipped {
        return vec![format!("{}: skipped ({reason})", report.name)];
    }

    let mut summary = vec![
        format!("{} written", report.written()),
        format!("{} unchanged", report.unchanged()),
    ];
    if !report.failed.is_empty() {
        summary.push(format!("{} failed", report.failed.len()));
    }
    let mut lines = vec![format!("{}: {}", report.name, summary.join(", "))];

    for record in &report.outputs {
        let mut line = format!(
            "{}{} → {}",
            indent(1),
            display_path(app_dir, &record.source),
            display_path(app_dir, &record.output)
        );
        if record.outcome == WriteOutcome::Unchanged {
            line.push_str(" (unchanged)");
        }
        lines.push(line);
    }
    for failure in &report.failed {
        lines.push(format!(
            "{}✗ {}: {}",
            indent(1),
            display_path(app_dir, &failure.source),
            failure.error
        ));
    }
    for error in &report.errors {
        lines.push(format!("{}! {error}", indent(1)));
    }
    lines
}

pub fn format_build_report(report: &BuildReport, app_dir: &Path) -> Vec<String> {
    let mut lines: Vec<String> = report
        .pipelines
        .iter()
        .flat_map(|p| format_pipeline_report(p, app_dir))
        .collect();

    if !report.symlinks.is_empty() {
        lines.push("Symlinks".to_string());
        for link in &report.symlinks {
            let status = match link.outcome {
                LinkOutcome::Created => "created",
                LinkOutcome::Exists => "exists",
                LinkOutcome::Disabled => "skipped",
            };
            lines.push(format!(
                "{}{} → {} ({status})",
                indent(1),
                display_path(app_dir, &link.dest),
                display_path(app_dir, &link.source)
            ));
        }
    }

    if !report.stale.is_empty() {
        lines.push("Stale".to_string());
        lines.extend(report.stale.iter().map(|s| format!("{}{s}", indent(1))));
    }

    let mut footer = format!("Built {}", plural(report.written(), "file"));
    if report.failed() > 0 {
        footer.push_str(&format!(", {}", plural(report.failed(), "failure")));
    }
    lines.push(footer);
    lines
}

pub fn print_build_report(report: &BuildReport, app_dir: &Path) {
    for line in format_build_report(report, app_dir) {
        println!("{line}");
    }
}

// ============================================================================
// Audit
// ============================================================================

pub fn format_audit_report(report: &AuditReport) -> Vec<String> {
    if report.is_clean() {
        return vec!["No issues found".to_string()];
    }
    let mut lines = Vec::new();
    for issue in report.iter() {
        lines.push(format!(
            "{}[{}] {}: {}",
            issue.kind.severity(),
            issue.kind.code(),
            issue.source,
            issue.path
        ));
        lines.push(format!("{}{}", indent(1), issue.message));
        if let Some(help) = &issue.help {
            lines.push(format!("{}help: {help}", indent(1)));
        }
    }
    lines.push(format!(
        "{} ({}, {})",
        plural(report.len(), "issue"),
        plural(report.error_count(), "error"),
        plural(report.warning_count(), "warning")
    ));
    lines
}

pub fn print_audit_report(report: &AuditReport) {
    for line in format_audit_report(report) {
        eprintln!("{line}");
    }
}

// ============================================================================
// Config
// ============================================================================

/// The resolved tree as `dotted.path = value` lines, sorted.
pub fn format_config(config: &ResolvedConfig) -> Vec<String> {
    let mut lines = vec![
        format!("# {} {} ({})", config.app_name, config.app_version, config.mode()),
    ];
    flatten(config.tree(), "", &mut lines);
    lines
}

fn flatten(value: &Value, prefix: &str, lines: &mut Vec<String>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(child, &path, lines);
            }
        }
        other => lines.push(format!("{prefix} = {other}")),
    }
}

pub fn print_config(config: &ResolvedConfig) {
    for line in format_config(config) {
        println!("{line}");
    }
}
