//! Analysis worker pool
//!
//! Every file unit becomes an independent job. Two semaphores bound the
//! work: a per-run limit keeps one run from saturating the inference host,
//! and a global ceiling is shared by all runs. Jobs never touch run state
//! directly; each computes its finding and hands it to the ledger.
//!
//! A job that exhausts its retries records a failure placeholder finding,
//! so one bad file degrades the report instead of blocking the run.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::config::{InferenceConfig, PipelineConfig};
use crate::error::AnalysisError;
use crate::hosts::InferenceClient;
use crate::pipeline::backoff::BackoffPolicy;
use crate::pipeline::ledger::RunLedger;
use crate::types::{FileUnit, Finding, FindingOutcome};

/// System prompt for per-file review calls
pub const REVIEW_SYSTEM_PROMPT: &str = "You are a senior code reviewer. Point out bugs, \
    security problems, and maintainability issues in the code you are given. Be specific \
    and concise, and mention what is done well.";

/// Build the review prompt for one file unit, truncating long content
pub fn review_prompt(unit: &FileUnit, max_code_length: usize) -> String {
    let code = truncate_at_boundary(&unit.content, max_code_length);
    let language = unit.detected_type.as_deref().unwrap_or("code");
    let mut prompt = format!(
        "Review the following {} file `{}`:\n\n```\n{}\n```\n\nGive a short review \
         covering correctness, security, and style.",
        language, unit.path, code
    );
    if code.len() < unit.content.len() {
        prompt.push_str("\n\n(note: file content was truncated for length)");
    }
    prompt
}

/// Longest prefix of `s` up to `max` bytes, on a char boundary
fn truncate_at_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Runs per-file analysis jobs with bounded concurrency
pub struct AnalysisPool {
    inference: Arc<dyn InferenceClient>,
    per_run_limit: usize,
    global_slots: Arc<Semaphore>,
    call_timeout: Duration,
    max_attempts: u32,
    max_code_length: usize,
    backoff: BackoffPolicy,
}

impl AnalysisPool {
    pub fn new(
        inference: Arc<dyn InferenceClient>,
        inference_config: &InferenceConfig,
        pipeline_config: &PipelineConfig,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            inference,
            per_run_limit: pipeline_config.per_run_concurrency,
            global_slots: Arc::new(Semaphore::new(pipeline_config.max_workers)),
            call_timeout: Duration::from_secs(inference_config.timeout_secs),
            max_attempts: inference_config.max_attempts,
            max_code_length: inference_config.max_code_length,
            backoff,
        }
    }

    /// Analyze every unit of one run, reporting findings to the ledger.
    ///
    /// Returns when all jobs have resolved (success or placeholder).
    /// Dropping the returned future aborts still-running jobs, which is
    /// how a run-budget timeout abandons its in-flight work.
    pub async fn analyze_all(&self, run_id: Uuid, units: Vec<FileUnit>, ledger: Arc<RunLedger>) {
        let run_slots = Arc::new(Semaphore::new(self.per_run_limit));
        let mut jobs = JoinSet::new();

        for unit in units {
            let inference = Arc::clone(&self.inference);
            let run_slots = Arc::clone(&run_slots);
            let global_slots = Arc::clone(&self.global_slots);
            let ledger = Arc::clone(&ledger);
            let call_timeout = self.call_timeout;
            let max_attempts = self.max_attempts;
            let max_code_length = self.max_code_length;
            let backoff = self.backoff;

            jobs.spawn(async move {
                // Semaphores are never closed, acquire cannot fail
                let Ok(_run_permit) = run_slots.acquire().await else {
                    return;
                };
                let Ok(_global_permit) = global_slots.acquire().await else {
                    return;
                };

                let finding = analyze_unit(
                    inference.as_ref(),
                    &unit,
                    call_timeout,
                    max_attempts,
                    max_code_length,
                    backoff,
                )
                .await;
                ledger.record_finding(run_id, finding);
            });
        }

        while jobs.join_next().await.is_some() {}
    }
}

/// Run one unit through inference with bounded retries.
///
/// Always produces a finding: a review on success, a failure placeholder
/// once the retry budget is spent.
async fn analyze_unit(
    inference: &dyn InferenceClient,
    unit: &FileUnit,
    call_timeout: Duration,
    max_attempts: u32,
    max_code_length: usize,
    backoff: BackoffPolicy,
) -> Finding {
    let prompt = review_prompt(unit, max_code_length);
    let prompt_hash = hex::encode(Sha256::digest(prompt.as_bytes()));

    let mut last_error: Option<AnalysisError> = None;

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            tokio::time::sleep(backoff.delay(attempt - 1)).await;
        }

        let result =
            tokio::time::timeout(call_timeout, inference.complete(REVIEW_SYSTEM_PROMPT, &prompt))
                .await;

        let error = match result {
            Ok(Ok(verdict)) if !verdict.trim().is_empty() => {
                return Finding {
                    path: unit.path.clone(),
                    verdict,
                    generated_at: Utc::now(),
                    attempt,
                    outcome: FindingOutcome::Success,
                    prompt_hash: Some(prompt_hash),
                };
            }
            Ok(Ok(_)) => AnalysisError::InvalidResponse("empty completion".to_string()),
            Ok(Err(e)) => e,
            Err(_) => AnalysisError::Timeout(call_timeout),
        };

        tracing::warn!(
            path = %unit.path,
            attempt = attempt,
            max_attempts = max_attempts,
            error = %error,
            "analysis attempt failed"
        );
        last_error = Some(error);
    }

    let cause = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    Finding {
        path: unit.path.clone(),
        verdict: format!("analysis failed after {} attempts: {}", max_attempts, cause),
        generated_at: Utc::now(),
        attempt: max_attempts,
        outcome: FindingOutcome::Failed,
        prompt_hash: Some(prompt_hash),
    }
}
