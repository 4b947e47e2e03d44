//! Decision policy commands

use anyhow::Result;
use colored::Colorize;

use crate::client::{ApiClient, Policy, PolicyUpdate};
use crate::output::{print_json, print_success, print_warning, OutputFormat};

fn print_policy(policy: &Policy) {
    let toggle = |on: bool| {
        if on {
            "auto".green().to_string()
        } else {
            "manual".yellow().to_string()
        }
    };

    println!("{}", format!("Policy v{}", policy.version).bold());
    println!("  Confidence floor:  {:.2}", policy.confidence_floor);
    println!("  Reject floor:      {:.2}", policy.reject_floor);
    println!("  Low risk:          {}", toggle(policy.auto_apply.low));
    println!("  Medium risk:       {}", toggle(policy.auto_apply.medium));
    println!("  High risk:         {}", toggle(policy.auto_apply.high));
    println!("  Sampling interval: {}s", policy.sampling_interval_secs);
}

/// Show the live policy
pub async fn show_policy(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let policy: Policy = client.get("api/v1/policy").await?;

    match format {
        OutputFormat::Json => print_json(&policy)?,
        OutputFormat::Table => print_policy(&policy),
    }

    Ok(())
}

/// Change the live policy
pub async fn set_policy(client: &ApiClient, update: PolicyUpdate, format: OutputFormat) -> Result<()> {
    if serde_json::to_value(&update)?
        .as_object()
        .map_or(true, |fields| fields.is_empty())
    {
        print_warning("Nothing to change");
        return Ok(());
    }

    let policy: Policy = client.put("api/v1/policy", &update).await?;

    match format {
        OutputFormat::Json => print_json(&policy)?,
        OutputFormat::Table => {
            print_success(&format!("Policy updated to v{}", policy.version));
            print_policy(&policy);
        }
    }

    Ok(())
}
