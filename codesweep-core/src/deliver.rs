//! Delivery dispatch
//!
//! Formats a report for the notification channel and sends it with
//! bounded retries. Transient network failures retry with backoff; a
//! rejection from the channel is terminal. Either way the synthesized
//! report stays attached to the run for later inspection or manual
//! resend.

use std::sync::Arc;

use crate::error::DeliveryError;
use crate::hosts::Notifier;
use crate::pipeline::backoff::BackoffPolicy;
use crate::types::{Report, Trigger, TriggerMode};

/// Channel-side message length cap (WeChat markdown limit is 4096 bytes)
const MESSAGE_LIMIT: usize = 4000;

/// Sends reports to the notification channel
pub struct DeliveryDispatcher {
    notifier: Arc<dyn Notifier>,
    max_retries: u32,
    backoff: BackoffPolicy,
}

impl DeliveryDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, max_retries: u32, backoff: BackoffPolicy) -> Self {
        Self {
            notifier,
            max_retries,
            backoff,
        }
    }

    /// Format and send one report, retrying transient failures
    pub async fn deliver(&self, trigger: &Trigger, report: &Report) -> Result<(), DeliveryError> {
        let message = format_report(trigger, report);

        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff.delay(attempt);
                tracing::debug!(
                    run_id = %report.run_id,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "retrying delivery"
                );
                tokio::time::sleep(delay).await;
            }

            match self.notifier.send_markdown(&message).await {
                Ok(()) => {
                    tracing::info!(run_id = %report.run_id, "report delivered");
                    return Ok(());
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(run_id = %report.run_id, error = %e, "transient delivery error");
                    last_error = Some(e);
                }
                Err(e) => {
                    tracing::error!(run_id = %report.run_id, error = %e, "delivery rejected");
                    return Err(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| DeliveryError::TransientNetwork("max retries exceeded".to_string())))
    }
}

/// Render a report as channel markdown, bounded to the message limit
pub fn format_report(trigger: &Trigger, report: &Report) -> String {
    let status_emoji = if report.stats.failed == 0 { "✅" } else { "⚠️" };
    let mode = match trigger.mode {
        TriggerMode::Push => match &trigger.commit_sha {
            Some(sha) => format!("push ({})", short_sha(sha)),
            None => "push".to_string(),
        },
        TriggerMode::FullSnapshot => "full snapshot".to_string(),
    };

    let mut message = format!(
        "## Code review {}\n\
         **Repository**: {}\n\
         **Trigger**: {}\n\
         **Files**: {} reviewed, {} failed, {} skipped\n\n\
         ### Summary\n{}\n",
        status_emoji,
        trigger.repo_slug(),
        mode,
        report.stats.analyzed,
        report.stats.failed,
        report.stats.skipped,
        report.summary,
    );

    if !report.findings.is_empty() {
        message.push_str("\n### Files\n");
        for finding in &report.findings {
            let marker = if finding.is_success() { "✅" } else { "❌" };
            message.push_str(&format!("- {} `{}`\n", marker, finding.path));
        }
    }

    truncate_message(&message, MESSAGE_LIMIT)
}

fn short_sha(sha: &str) -> &str {
    if sha.len() > 8 {
        &sha[..8]
    } else {
        sha
    }
}

fn truncate_message(message: &str, limit: usize) -> String {
    if message.len() <= limit {
        return message.to_string();
    }
    let mut end = limit.saturating_sub(4);
    while end > 0 && !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n...", &message[..end])
}
