//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying plans, apply
//! reports, and snapshots to the user in text or JSON form.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::planner::{ActionType, ApplyReport, DeploymentPlan, OutcomeStatus};
use crate::state::Snapshot;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Resource row for snapshot display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    id: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Physical ID")]
    physical_id: String,
    #[tabled(rename = "Outputs")]
    outputs: usize,
}

/// Export row for outputs display.
#[derive(Tabled)]
struct ExportRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Value")]
    value: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a deployment plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &DeploymentPlan) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&PlanJson::from(plan)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &DeploymentPlan) -> String {
        if !plan.has_changes() {
            return format!(
                "{} No changes required - infrastructure is up to date.\n",
                "✓".green()
            );
        }

        let mut output = String::new();

        let _ = write!(output, "\nDeployment plan (generation {})\n", plan.generation);
        let _ = write!(output, "   Config hash: {}\n\n", &plan.config_hash[..8]);

        let rows: Vec<PlanActionRow> = plan
            .actionable_actions()
            .iter()
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action_type(a.action_type),
                resource: a.resource_id.clone(),
                kind: a.kind.to_string(),
                reason: Self::truncate(&a.reason, 40),
            })
            .collect();

        if !rows.is_empty() {
            let table = Table::new(rows).to_string();
            output.push_str(&table);
            output.push('\n');
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to destroy\n",
            plan.create_count().to_string().green(),
            plan.update_count().to_string().yellow(),
            plan.delete_count().to_string().red()
        );

        output
    }

    /// Formats an apply report for display.
    #[must_use]
    pub fn format_report(&self, report: &ApplyReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                let headline = if report.success {
                    format!("{} Apply complete (generation {})", "✓".green(), report.generation)
                } else {
                    format!("{} Apply failed (generation {})", "✗".red(), report.generation)
                };

                let mut output = format!("{headline}\n\n");
                let _ = writeln!(output, "   Applied: {}", report.applied);
                let _ = writeln!(output, "   Failed: {}", report.failed);
                let _ = writeln!(output, "   Skipped: {}", report.skipped);

                let failures: Vec<_> = report
                    .outcomes
                    .iter()
                    .filter_map(|o| match &o.status {
                        OutcomeStatus::Failed { error } => Some((o, error)),
                        _ => None,
                    })
                    .collect();

                if !failures.is_empty() {
                    let _ = write!(output, "\n{} Failures:\n", "⚠".yellow());
                    for (outcome, error) in failures {
                        let _ = writeln!(
                            output,
                            "   - {} {}: {error}",
                            outcome.action, outcome.resource_id
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats the recorded snapshot status.
    #[must_use]
    pub fn format_status(&self, snapshot: &Snapshot) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(snapshot).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = write!(
                    output,
                    "\nProject: {}/{} (generation {})\n\n",
                    snapshot.project, snapshot.environment, snapshot.generation
                );

                if snapshot.is_empty() {
                    output.push_str("   No resources provisioned.\n");
                    return output;
                }

                let rows: Vec<ResourceRow> = snapshot
                    .resources
                    .values()
                    .map(|r| ResourceRow {
                        id: r.id.clone(),
                        kind: r.kind.to_string(),
                        physical_id: Self::truncate(&r.physical_resource_id, 40),
                        outputs: r.outputs.len(),
                    })
                    .collect();

                let table = Table::new(rows).to_string();
                output.push_str(&table);
                output.push('\n');

                let _ = write!(
                    output,
                    "\n{} resource(s), last updated {}\n",
                    snapshot.resources.len(),
                    snapshot.last_updated.format("%Y-%m-%d %H:%M:%S UTC")
                );

                output
            }
        }
    }

    /// Formats the exported values of the last successful apply.
    #[must_use]
    pub fn format_outputs(&self, snapshot: &Snapshot) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&snapshot.exports).unwrap_or_default()
            }
            OutputFormat::Text => {
                if snapshot.exports.is_empty() {
                    return String::from("No exports recorded.\n");
                }

                let rows: Vec<ExportRow> = snapshot
                    .exports
                    .iter()
                    .map(|(name, value)| ExportRow {
                        name: name.clone(),
                        value: value.clone(),
                    })
                    .collect();

                format!("{}\n", Table::new(rows))
            }
        }
    }

    /// Formats the snapshot summary (for `state show`).
    #[must_use]
    pub fn format_state(&self, snapshot: &Snapshot) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(snapshot).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = write!(
                    output,
                    "\nState: {}/{}\n\n",
                    snapshot.project, snapshot.environment
                );

                let _ = writeln!(output, "   Version: {}", snapshot.version);
                let _ = writeln!(output, "   Generation: {}", snapshot.generation);
                let _ = writeln!(
                    output,
                    "   Config hash: {}",
                    &snapshot.config_hash[..8.min(snapshot.config_hash.len())]
                );
                let _ = writeln!(output, "   Last updated: {}", snapshot.last_updated);
                let _ = writeln!(output, "   Resources: {}", snapshot.resources.len());
                let _ = writeln!(output, "   Exports: {}", snapshot.exports.len());

                if !snapshot.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", snapshot.history.len());
                    for entry in snapshot.history.iter().rev().take(5) {
                        let status = if entry.success { "✓" } else { "✗" };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} gen {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.generation,
                            entry.resources.join(", ")
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats the resolved creation order.
    #[must_use]
    pub fn format_graph(&self, order: &[String]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(order).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::from("\nResolved creation order:\n");
                for (i, id) in order.iter().enumerate() {
                    let _ = writeln!(output, "  {}. {id}", i + 1);
                }
                output
            }
        }
    }

    /// Formats an action type with color.
    fn format_action_type(action_type: ActionType) -> String {
        match action_type {
            ActionType::Create => "+create".green().to_string(),
            ActionType::Update => "~update".yellow().to_string(),
            ActionType::Delete => "-delete".red().to_string(),
            ActionType::Noop => "noop".dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum length.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.len() <= max_len {
            s.to_string()
        } else {
            format!("{}...", &s[..max_len - 3])
        }
    }
}

// JSON serialization helpers

#[derive(serde::Serialize)]
struct PlanJson {
    generation: u64,
    config_hash: String,
    action_count: usize,
    creates: usize,
    updates: usize,
    deletes: usize,
    actions: Vec<ActionJson>,
}

#[derive(serde::Serialize)]
struct ActionJson {
    action_type: String,
    resource: String,
    kind: String,
    reason: String,
}

impl From<&DeploymentPlan> for PlanJson {
    fn from(plan: &DeploymentPlan) -> Self {
        Self {
            generation: plan.generation,
            config_hash: plan.config_hash.clone(),
            action_count: plan.action_count(),
            creates: plan.create_count(),
            updates: plan.update_count(),
            deletes: plan.delete_count(),
            actions: plan
                .actions
                .iter()
                .map(|a| ActionJson {
                    action_type: a.action_type.to_string(),
                    resource: a.resource_id.clone(),
                    kind: a.kind.to_string(),
                    reason: a.reason.clone(),
                })
                .collect(),
        }
    }
}
