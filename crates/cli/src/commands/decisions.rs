//! Decision review commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ActionRecord, ApiClient, DecisionView, PendingDecision, Review, ReviewRequest};
use crate::output::{
    color_confidence, color_risk, color_status, format_savings, print_info, print_json, print_rows,
    print_success, truncate_id, OutputFormat,
};

/// Row for the pending decisions table
#[derive(Tabled)]
struct PendingRow {
    #[tabled(rename = "Candidate")]
    id: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Savings")]
    savings: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Risk")]
    risk: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Row for the decision audit trail
#[derive(Tabled)]
struct DecisionRow {
    #[tabled(rename = "Decided")]
    decided_at: String,
    #[tabled(rename = "Candidate")]
    id: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Review")]
    review: String,
}

/// List held decisions awaiting review
pub async fn list_pending(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let pending: Vec<PendingDecision> = client.get("api/v1/decisions/pending").await?;

    print_rows(
        &pending,
        |items| {
            items
                .iter()
                .map(|p| PendingRow {
                    id: truncate_id(&p.candidate.id),
                    resource: p.candidate.resource_id.clone(),
                    action: p.candidate.action_kind().to_string(),
                    savings: format_savings(p.candidate.estimated_monthly_savings),
                    confidence: color_confidence(p.candidate.confidence),
                    risk: color_risk(&p.candidate.risk),
                    reason: p.decision.reason.clone(),
                })
                .collect()
        },
        "No decisions awaiting review",
        format,
    )?;

    if matches!(format, OutputFormat::Table) && !pending.is_empty() {
        let total: f64 = pending
            .iter()
            .map(|p| p.candidate.estimated_monthly_savings)
            .sum();
        println!(
            "\nTotal: {} pending, {} potential savings",
            pending.len(),
            format_savings(total)
        );
    }

    Ok(())
}

/// Show the decision audit trail, newest first
pub async fn list_decisions(client: &ApiClient, limit: usize, format: OutputFormat) -> Result<()> {
    let decisions: Vec<DecisionView> = client
        .get(&format!("api/v1/decisions?limit={}", limit))
        .await?;

    print_rows(
        &decisions,
        |items| {
            items
                .iter()
                .map(|d| DecisionRow {
                    decided_at: d.decision.decided_at.clone(),
                    id: truncate_id(&d.candidate.id),
                    resource: d.candidate.resource_id.clone(),
                    action: d.candidate.action_kind().to_string(),
                    outcome: color_status(&d.decision.outcome),
                    review: d
                        .review
                        .as_ref()
                        .map(|r| format!("{} by {}", r.verdict, r.reviewer))
                        .unwrap_or_else(|| "-".to_string()),
                })
                .collect()
        },
        "No decisions recorded",
        format,
    )
}

/// Approve a held decision
pub async fn approve(
    client: &ApiClient,
    id: &str,
    reviewer: String,
    reason: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let request = ReviewRequest { reviewer, reason };
    let record: ActionRecord = client
        .post(&format!("api/v1/decisions/{}/approve", id), &request)
        .await?;

    match format {
        OutputFormat::Json => print_json(&record)?,
        OutputFormat::Table => {
            print_success(&format!("Approved candidate {}", id));
            print_info(&format!(
                "Action {} on {} is {}",
                record.id,
                record.resource_id,
                color_status(&record.state)
            ));
        }
    }

    Ok(())
}

/// Reject a held decision
pub async fn reject(
    client: &ApiClient,
    id: &str,
    reviewer: String,
    reason: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let request = ReviewRequest { reviewer, reason };
    let review: Review = client
        .post(&format!("api/v1/decisions/{}/reject", id), &request)
        .await?;

    match format {
        OutputFormat::Json => print_json(&review)?,
        OutputFormat::Table => print_success(&format!("Rejected candidate {}", id)),
    }

    Ok(())
}
