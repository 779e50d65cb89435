//! Report aggregation
//!
//! Folds a run's ordered findings into one report. The summary comes from
//! a single extra inference call over the concatenated verdicts; when that
//! call fails, or when there is nothing worth summarizing, a locally
//! synthesized summary is used instead. Synthesis itself never fails the
//! run.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::hosts::InferenceClient;
use crate::types::{Finding, Report, ReportStats};

/// System prompt for the summary call
pub const SUMMARY_SYSTEM_PROMPT: &str = "You are a senior code reviewer. Summarize a set \
    of per-file review verdicts into a short overall assessment: main risks first, then \
    notable strengths. Three to five sentences.";

/// Max characters of concatenated verdicts fed to the summary call
const SUMMARY_INPUT_LIMIT: usize = 24_000;

/// Synthesizes reports from completed finding sets
pub struct Aggregator {
    inference: Arc<dyn InferenceClient>,
}

impl Aggregator {
    pub fn new(inference: Arc<dyn InferenceClient>) -> Self {
        Self { inference }
    }

    /// Build the report for a run.
    ///
    /// `findings` must already be in discovery order; `skipped` is the
    /// count of files dropped before analysis.
    pub async fn synthesize(
        &self,
        run_id: Uuid,
        findings: Vec<Finding>,
        skipped: usize,
    ) -> Report {
        let analyzed = findings.iter().filter(|f| f.is_success()).count();
        let failed = findings.len() - analyzed;
        let stats = ReportStats {
            analyzed,
            failed,
            skipped,
        };

        let summary = if analyzed == 0 {
            // Nothing to summarize, including the all-failures case
            local_summary(&stats)
        } else {
            match self.inference_summary(&findings).await {
                Some(text) => text,
                None => local_summary(&stats),
            }
        };

        tracing::info!(
            run_id = %run_id,
            analyzed = analyzed,
            failed = failed,
            skipped = skipped,
            "report synthesized"
        );

        Report {
            run_id,
            summary,
            findings,
            stats,
            generated_at: Utc::now(),
        }
    }

    async fn inference_summary(&self, findings: &[Finding]) -> Option<String> {
        let prompt = summary_prompt(findings);
        match self.inference.complete(SUMMARY_SYSTEM_PROMPT, &prompt).await {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => {
                tracing::warn!("summary call returned empty output, using local summary");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "summary call failed, using local summary");
                None
            }
        }
    }
}

/// Concatenate successful verdicts for the summary call
fn summary_prompt(findings: &[Finding]) -> String {
    let mut body = String::new();
    for finding in findings.iter().filter(|f| f.is_success()) {
        let entry = format!("### {}\n{}\n\n", finding.path, finding.verdict);
        if body.len() + entry.len() > SUMMARY_INPUT_LIMIT {
            break;
        }
        body.push_str(&entry);
    }
    format!(
        "Per-file review verdicts:\n\n{}Write the overall summary.",
        body
    )
}

/// Summary used when no successful findings exist or the summary call fails
fn local_summary(stats: &ReportStats) -> String {
    if stats.analyzed == 0 && stats.failed == 0 {
        if stats.skipped > 0 {
            format!(
                "No analyzable files: all {} discovered files were skipped by filtering.",
                stats.skipped
            )
        } else {
            "No analyzable files in this change.".to_string()
        }
    } else if stats.analyzed == 0 {
        format!(
            "Zero successful analyses: all {} analyzed files failed permanently. \
             See per-file entries for details.",
            stats.failed
        )
    } else {
        format!(
            "{} files reviewed, {} failed analysis, {} skipped by filtering. \
             See per-file entries for details.",
            stats.analyzed, stats.failed, stats.skipped
        )
    }
}
