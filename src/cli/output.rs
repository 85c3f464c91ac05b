//! Output formatting for the eksform CLI
//!
//! Human output is colored and terraform-like; JSON mode prints one document
//! per command on stdout and routes messages to stderr as JSON lines.

use colored::Colorize;
use serde::Serialize;
use std::io::{self, Write};
use std::time::{Duration, Instant};

use eksform::engine::{ApplyReport, UnitReport, UnitStatus};
use eksform::plan::{Action, Plan, PlannedChange};
use eksform::state::{ChangeType, StateDiff};

/// Output formatter for different output modes
pub struct OutputFormatter {
    /// Use colored output
    use_color: bool,
    /// JSON output mode
    json_mode: bool,
    /// Verbosity level
    verbosity: u8,
    /// Start time for duration calculations
    start_time: Instant,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(use_color: bool, json_mode: bool, verbosity: u8) -> Self {
        // Respect NO_COLOR environment variable
        let use_color = use_color && std::env::var("NO_COLOR").is_err();
        colored::control::set_override(use_color);

        Self {
            use_color,
            json_mode,
            verbosity,
            start_time: Instant::now(),
        }
    }

    pub fn is_json(&self) -> bool {
        self.json_mode
    }

    /// Print a banner/header
    pub fn banner(&self, title: &str) {
        if self.json_mode {
            return;
        }

        let line = "=".repeat(title.len() + 4);
        if self.use_color {
            println!("\n{}", line.bright_blue());
            println!("{}", format!("  {}  ", title).bright_blue().bold());
            println!("{}\n", line.bright_blue());
        } else {
            println!("\n{}", line);
            println!("  {}  ", title);
            println!("{}\n", line);
        }
    }

    /// Print a section header
    pub fn section(&self, title: &str) {
        if self.json_mode {
            return;
        }

        if self.use_color {
            println!("\n{}", title.cyan().bold());
            println!("{}", "-".repeat(title.len()).cyan());
        } else {
            println!("\n{}", title);
            println!("{}", "-".repeat(title.len()));
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.json_mode {
            self.json_line("error", message);
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "ERROR:".red().bold(), message);
        } else {
            eprintln!("ERROR: {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.json_mode {
            self.json_line("warning", message);
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "WARNING:".yellow().bold(), message);
        } else {
            eprintln!("WARNING: {}", message);
        }
    }

    /// Print a hint message
    pub fn hint(&self, message: &str) {
        if self.json_mode {
            self.json_line("hint", message);
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "HINT:".cyan().bold(), message);
        } else {
            eprintln!("HINT: {}", message);
        }
    }

    /// Print an info message (respects verbosity)
    pub fn info(&self, message: &str) {
        if self.verbosity < 1 {
            return;
        }

        if self.json_mode {
            self.json_line("info", message);
            return;
        }

        if self.use_color {
            println!("{} {}", "INFO:".blue(), message);
        } else {
            println!("INFO: {}", message);
        }
    }

    /// Print a line that always shows in human mode
    pub fn line(&self, message: &str) {
        if !self.json_mode {
            println!("{}", message);
        }
    }

    fn json_line(&self, kind: &str, message: &str) {
        let line = serde_json::json!({ "type": kind, "message": message });
        eprintln!("{}", line);
    }

    /// Print a serializable document as pretty JSON on stdout
    pub fn json<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    /// Render a plan terraform-style
    pub fn plan(&self, plan: &Plan) {
        if self.json_mode {
            return;
        }

        for warning in &plan.warnings {
            self.warning(warning);
        }

        if !plan.has_changes() {
            let message = "No changes. Infrastructure matches the configuration.";
            if self.use_color {
                println!("\n{}", message.green().bold());
            } else {
                println!("\n{}", message);
            }
            return;
        }

        println!();
        for change in plan.actionable() {
            self.plan_change(change);
        }

        let summary = plan.summary().to_string();
        if self.use_color {
            println!("\n{}", summary.bold());
        } else {
            println!("\n{}", summary);
        }
    }

    fn plan_change(&self, change: &PlannedChange) {
        let symbol = change.action.symbol();
        let header = format!("  {} {} ({})", symbol, change.unit, change.kind);
        let reason = if change.replace_reasons.is_empty() {
            String::new()
        } else {
            format!(" # forces replacement: {}", change.replace_reasons.join(", "))
        };

        if self.use_color {
            let colored = match change.action {
                Action::Create => header.green(),
                Action::Update => header.yellow(),
                Action::Replace => header.magenta(),
                Action::Delete => header.red(),
                Action::NoOp => header.normal(),
            };
            println!("{}{}", colored, reason.bright_black());
        } else {
            println!("{}{}", header, reason);
        }

        for attribute in &change.changes {
            let render = |v: &Option<serde_json::Value>| {
                v.as_ref().map(|v| v.to_string()).unwrap_or_else(|| "null".into())
            };
            let line = match attribute.change_type {
                ChangeType::Added => format!("      + {} = {}", attribute.path, render(&attribute.new_value)),
                ChangeType::Removed => format!("      - {} = {}", attribute.path, render(&attribute.old_value)),
                ChangeType::Modified => format!(
                    "      ~ {}: {} -> {}",
                    attribute.path,
                    render(&attribute.old_value),
                    render(&attribute.new_value)
                ),
            };
            println!("{}", line);

            if self.verbosity > 0 && attribute.change_type == ChangeType::Modified {
                self.structured_diff(attribute.old_value.as_ref(), attribute.new_value.as_ref());
            }
        }

        if let Some(access) = &change.access_changes {
            for principal in &access.entries_to_create {
                println!("      + access entry {}", principal);
            }
            for principal in &access.entries_to_update {
                println!("      ~ access entry {}", principal);
            }
            for principal in &access.entries_to_delete {
                println!("      - access entry {}", principal);
            }
            for assoc in &access.associations_to_add {
                println!("      + policy {} -> {}", assoc.policy_arn, assoc.principal_arn);
            }
            for assoc in &access.associations_to_remove {
                println!("      - policy {} -> {}", assoc.policy_arn, assoc.principal_arn);
            }
        }
    }

    /// Line diff for object and array values, shown with -v
    fn structured_diff(&self, old: Option<&serde_json::Value>, new: Option<&serde_json::Value>) {
        let (Some(old), Some(new)) = (old, new) else {
            return;
        };
        if !(old.is_object() || old.is_array() || new.is_object() || new.is_array()) {
            return;
        }

        let diff = StateDiff::from_json(old, new);
        if !diff.has_changes() {
            return;
        }
        for line in diff.unified_diff.lines() {
            let text = format!("          {}", line);
            if !self.use_color {
                println!("{}", text);
            } else if line.starts_with('+') {
                println!("{}", text.green());
            } else if line.starts_with('-') {
                println!("{}", text.red());
            } else {
                println!("{}", text.bright_black());
            }
        }
    }

    /// Print one unit's result
    pub fn unit_result(&self, report: &UnitReport) {
        if self.json_mode {
            return;
        }

        let status = report.status.to_string();
        let status = if self.use_color {
            match report.status {
                UnitStatus::Created | UnitStatus::Updated | UnitStatus::Replaced => {
                    status.green().to_string()
                }
                UnitStatus::Deleted => status.yellow().to_string(),
                UnitStatus::Failed => status.red().bold().to_string(),
                UnitStatus::Skipped | UnitStatus::Cancelled => status.cyan().to_string(),
            }
        } else {
            status
        };

        print!("{}: [{}]", status, report.unit);
        if report.duration > Duration::ZERO {
            print!(" ({})", format_duration(report.duration));
        }
        if let Some(error) = &report.error {
            print!(" => {}", error.message);
        }
        println!();
    }

    /// Print the closing line of an apply or destroy
    pub fn apply_summary(&self, report: &ApplyReport, verb: &str) {
        if self.json_mode {
            return;
        }

        let (added, changed, destroyed) = report.totals();
        let line = format!(
            "{} {}! Resources: {} added, {} changed, {} destroyed.",
            verb,
            if report.succeeded() { "complete" } else { "incomplete" },
            added,
            changed,
            destroyed
        );
        if self.use_color {
            if report.succeeded() {
                println!("\n{}", line.green().bold());
            } else {
                println!("\n{}", line.red().bold());
            }
        } else {
            println!("\n{}", line);
        }

        let failed = report.count(UnitStatus::Failed);
        let skipped = report.count(UnitStatus::Skipped);
        if failed + skipped > 0 {
            self.line(&format!("{} failed, {} skipped", failed, skipped));
        }
        if report.cancelled {
            self.warning("Run was cancelled; remaining units were not started");
        }
        if self.verbosity >= 1 {
            self.line(&format!(
                "Elapsed: {}",
                format_duration(self.start_time.elapsed())
            ));
        }
    }

    /// Print a list of items
    pub fn list(&self, title: &str, items: &[String]) {
        if self.json_mode {
            return;
        }

        if self.use_color {
            println!("{}:", title.bright_white().bold());
        } else {
            println!("{}:", title);
        }

        for item in items {
            println!("  {}", item);
        }
    }

    /// Print a simple table
    pub fn table(&self, headers: &[&str], rows: &[Vec<String>]) {
        if self.json_mode {
            return;
        }

        let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
        for row in rows {
            for (i, cell) in row.iter().enumerate() {
                if i < widths.len() {
                    widths[i] = widths[i].max(cell.len());
                }
            }
        }

        let header_line: Vec<String> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
            .collect();
        if self.use_color {
            println!("{}", header_line.join("  ").bold());
        } else {
            println!("{}", header_line.join("  "));
        }

        let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        println!("{}", separator.join("  "));

        for row in rows {
            let line: Vec<String> = row
                .iter()
                .enumerate()
                .map(|(i, cell)| {
                    let width = widths.get(i).copied().unwrap_or(0);
                    format!("{:width$}", cell, width = width)
                })
                .collect();
            println!("{}", line.join("  "));
        }
    }

    /// Flush stdout
    pub fn flush(&self) {
        let _ = io::stdout().flush();
    }
}

/// Format a duration in human-readable form
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs >= 3600 {
        let hours = total_secs / 3600;
        let mins = (total_secs % 3600) / 60;
        let secs = total_secs % 60;
        format!("{}h {}m {}s", hours, mins, secs)
    } else if total_secs >= 60 {
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        format!("{}m {}s", mins, secs)
    } else if total_secs > 0 {
        format!("{}.{:03}s", total_secs, millis)
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.500s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m 1s");
    }
}
