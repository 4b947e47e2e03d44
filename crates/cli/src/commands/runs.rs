//! Run inspection commands

use anyhow::Result;
use colored::Colorize;

use crate::client::{ApiClient, HealthResponse, RunReport, TriggerResponse, RUNS_PATH};
use crate::output::{
    color_status, format_savings, print_info, print_json, print_success, print_warning,
    OutputFormat,
};

/// Show the report of the last finished run
pub async fn show_last_run(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let report: RunReport = client.get("api/v1/runs/last").await?;

    if let OutputFormat::Json = format {
        return print_json(&report);
    }

    println!("{}", format!("Run #{}", report.run).bold());
    println!("  Started:    {}", report.started_at);
    println!("  Finished:   {}", report.finished_at);
    println!("  Policy:     v{}", report.policy_version);
    println!(
        "  Resources:  {} evaluated of {}",
        report.resources_evaluated, report.resources_seen
    );
    println!(
        "  Decisions:  {} auto-approved, {} held, {} rejected",
        report.auto_approved, report.held, report.rejected
    );
    println!(
        "  Actions:    {} applied, {} abandoned",
        report.actions_applied, report.actions_abandoned
    );
    println!(
        "  Verified:   {} confirmed, {} rolled back",
        report.verified, report.rolled_back
    );
    println!("  Savings:    {}", format_savings(report.approved_monthly_savings));

    if report.cancelled {
        print_warning("Run was cancelled before every resource was evaluated");
    }
    if let Some(summary) = &report.summary_error {
        println!("  {} {}", "Degraded:".red().bold(), summary);
    }
    for error in &report.errors {
        println!(
            "  {} {} [{}]: {}",
            "✗".red(),
            error.resource_id,
            error.kind,
            error.message
        );
    }

    Ok(())
}

/// Ask the agent to start a run now
pub async fn trigger_run(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let response: TriggerResponse = client.post(RUNS_PATH, &()).await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table if response.started => print_success("Run started"),
        OutputFormat::Table => print_info("A run is already in progress"),
    }

    Ok(())
}

/// Show agent component health
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health: HealthResponse = client.get("healthz").await?;

    match format {
        OutputFormat::Json => print_json(&health)?,
        OutputFormat::Table => {
            println!("Agent: {}", color_status(&health.status));
            for (name, component) in &health.components {
                let message = component.message.as_deref().unwrap_or("");
                println!("  {:<10} {} {}", name, color_status(&component.status), message);
            }
        }
    }

    Ok(())
}
