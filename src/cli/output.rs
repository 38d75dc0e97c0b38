//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{Plan, ValidationResult};
use crate::driver::{ExecutionReport, Outcome};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Provider")]
    provider: String,
    #[tabled(rename = "Operation")]
    operation: String,
    #[tabled(rename = "Cluster")]
    cluster: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Machine")]
    machine: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the plans of a plans file.
    #[must_use]
    pub fn format_plans(&self, plans: &[Plan]) -> String {
        match self.format {
            OutputFormat::Json => {
                let rows: Vec<PlanJson<'_>> = plans.iter().map(PlanJson::from).collect();
                serde_json::to_string_pretty(&rows).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_plans_text(plans),
        }
    }

    fn format_plans_text(plans: &[Plan]) -> String {
        if plans.is_empty() {
            return String::from("No plans defined.\n");
        }

        let rows: Vec<PlanRow> = plans
            .iter()
            .map(|p| PlanRow {
                id: p.id.clone(),
                provider: p.provider.to_string(),
                operation: p.operation.to_string(),
                cluster: Self::truncate(&p.cluster_name, 40),
                version: p.kubernetes_version.clone(),
                machine: p.machine_type.clone(),
            })
            .collect();

        let mut output = Table::new(rows).to_string();
        output.push('\n');
        output
    }

    /// Formats the report of a finished run.
    #[must_use]
    pub fn format_report(&self, report: &ExecutionReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = format!(
                    "{} {} {} ({})\n",
                    "✓".green(),
                    report.provider,
                    report.cluster_name,
                    Self::format_outcome(report.outcome)
                );
                let _ = writeln!(output, "   Plan: {}", report.plan_id);
                let _ = writeln!(output, "   Operation: {}", report.operation);
                let _ = writeln!(
                    output,
                    "   Started: {}",
                    report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
                let _ = writeln!(output, "   Duration: {:.1}s", Self::seconds(report.duration_ms));
                output
            }
        }
    }

    /// Formats the result of validating a plan.
    #[must_use]
    pub fn format_validation(&self, plan: &Plan, result: &ValidationResult) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "plan": plan.id,
                    "valid": result.is_valid(),
                    "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "warnings": result.warnings,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Plan {} is valid\n", "✓".green(), plan.id)
                } else {
                    format!("{} Plan {} is invalid\n", "✗".red(), plan.id)
                };

                for error in &result.errors {
                    let _ = writeln!(output, "   {} {error}", "✗".red());
                }
                for warning in &result.warnings {
                    let _ = writeln!(output, "   {} {warning}", "⚠".yellow());
                }
                output
            }
        }
    }

    /// Formats an error for display.
    #[must_use]
    pub fn format_error(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": "error", "message": message });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => format!("{} Error: {message}", "✗".red()),
        }
    }

    fn format_outcome(outcome: Outcome) -> String {
        match outcome {
            Outcome::Created => outcome.to_string().green().to_string(),
            Outcome::Deleted => outcome.to_string().red().to_string(),
            Outcome::AlreadyExists | Outcome::AlreadyAbsent => outcome.to_string().dimmed().to_string(),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn seconds(ms: u64) -> f64 {
        ms as f64 / 1000.0
    }

    /// Truncates a string to a maximum length.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len - 3).collect();
            format!("{head}...")
        }
    }
}

// JSON serialization helpers

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct PlanJson<'a> {
    id: &'a str,
    provider: String,
    operation: String,
    cluster_name: &'a str,
    kubernetes_version: &'a str,
    machine_type: &'a str,
    service_account: bool,
}

impl<'a> From<&'a Plan> for PlanJson<'a> {
    fn from(plan: &'a Plan) -> Self {
        Self {
            id: &plan.id,
            provider: plan.provider.to_string(),
            operation: plan.operation.to_string(),
            cluster_name: &plan.cluster_name,
            kubernetes_version: &plan.kubernetes_version,
            machine_type: &plan.machine_type,
            service_account: plan.service_account,
        }
    }
}
