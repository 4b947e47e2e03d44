//! Action record commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ActionRecord, ApiClient};
use crate::output::{color_status, print_json, print_rows, truncate_id, OutputFormat};

/// Row for the actions table
#[derive(Tabled)]
struct ActionRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Last Error")]
    last_error: String,
}

fn action_kind(record: &ActionRecord) -> String {
    record
        .action
        .get("kind")
        .and_then(|k| k.as_str())
        .unwrap_or("UNKNOWN")
        .to_string()
}

/// List action records, optionally in one state
pub async fn list_actions(
    client: &ApiClient,
    state: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let path = match &state {
        Some(state) => format!("api/v1/actions?state={}", state.to_uppercase()),
        None => "api/v1/actions".to_string(),
    };
    let records: Vec<ActionRecord> = client.get(&path).await?;

    print_rows(
        &records,
        |items| {
            items
                .iter()
                .map(|r| ActionRow {
                    id: truncate_id(&r.id),
                    resource: r.resource_id.clone(),
                    action: action_kind(r),
                    state: color_status(&r.state),
                    attempts: r.attempts,
                    last_error: r.last_error.clone().unwrap_or_else(|| "-".to_string()),
                })
                .collect()
        },
        "No actions found",
        format,
    )
}

/// Show one action record with its history
pub async fn get_action(client: &ApiClient, id: &str, format: OutputFormat) -> Result<()> {
    let record: ActionRecord = client.get(&format!("api/v1/actions/{}", id)).await?;

    match format {
        OutputFormat::Json => print_json(&record)?,
        OutputFormat::Table => {
            println!("{}", format!("Action {}", record.id).bold());
            println!("  Resource:  {}", record.resource_id);
            println!("  Action:    {}", action_kind(&record));
            println!("  State:     {}", color_status(&record.state));
            println!("  Attempts:  {}", record.attempts);
            if let Some(applied) = &record.applied_at {
                println!("  Applied:   {}", applied);
            }
            if let Some(verified) = &record.verified_at {
                println!("  Verified:  {}", verified);
            }
            if let Some(error) = &record.last_error {
                println!("  Error:     {}", error.red());
            }

            println!("\n{}", "History".bold());
            for change in &record.history {
                let from = change.from.as_deref().unwrap_or("-");
                let note = change
                    .note
                    .as_deref()
                    .map(|n| format!(" ({})", n))
                    .unwrap_or_default();
                println!(
                    "  {}  {} -> {}{}",
                    change.at,
                    from,
                    color_status(&change.to),
                    note
                );
            }
        }
    }

    Ok(())
}
