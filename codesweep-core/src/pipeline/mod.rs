//! Pipeline coordinator
//!
//! Drives one run through the five stages:
//!
//! ```text
//! Trigger ──> fetch ──> analyze (N jobs) ──> aggregate ──> deliver ──> done
//!                │            │                  │             │
//!                └────────────┴── failures ──────┴─────────────┴──> failed
//! ```
//!
//! The coordinator owns the ledger and is the only component that advances
//! run state. Stages hand their results back here; nothing mutates a run
//! from a worker task. Each run gets one driver task bounded by a
//! wall-clock budget; when the budget expires the driver is dropped, which
//! aborts in-flight analysis jobs, and the run is force-failed. Their late
//! results, if any, are discarded by the ledger.

pub mod backoff;
pub mod ledger;

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::analyze::AnalysisPool;
use crate::config::{Config, PipelineConfig};
use crate::deliver::DeliveryDispatcher;
use crate::error::{Error, FetchError, PipelineError, Result};
use crate::fetch::{ContentFetcher, FetchOutcome};
use crate::hosts::{GitHubContentHost, InferenceClient, OllamaInferenceClient, WeChatNotifier};
use crate::report::Aggregator;
use crate::types::{RunStatus, Trigger};

use self::backoff::BackoffPolicy;
use self::ledger::{RunEvent, RunLedger};

/// Owns the run ledger and sequences the pipeline stages.
///
/// Cheap to clone; clones share the same ledger and worker pool.
#[derive(Clone)]
pub struct PipelineCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    ledger: Arc<RunLedger>,
    fetcher: ContentFetcher,
    pool: AnalysisPool,
    aggregator: Aggregator,
    /// None when no notification channel is configured
    dispatcher: Option<DeliveryDispatcher>,
    fetch_max_attempts: u32,
    fetch_backoff: BackoffPolicy,
    run_budget: Duration,
}

impl PipelineCoordinator {
    pub fn new(
        pipeline_config: &PipelineConfig,
        fetcher: ContentFetcher,
        pool: AnalysisPool,
        aggregator: Aggregator,
        dispatcher: Option<DeliveryDispatcher>,
        fetch_backoff: BackoffPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                ledger: Arc::new(RunLedger::new()),
                fetcher,
                pool,
                aggregator,
                dispatcher,
                fetch_max_attempts: pipeline_config.fetch_max_attempts,
                fetch_backoff,
                run_budget: Duration::from_secs(pipeline_config.run_budget_secs),
            }),
        }
    }

    /// Wire up the concrete host adapters from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let host = Arc::new(GitHubContentHost::new(&config.github)?);
        let inference: Arc<dyn InferenceClient> =
            Arc::new(OllamaInferenceClient::new(&config.inference)?);
        let backoff = BackoffPolicy::default();

        let fetcher = ContentFetcher::new(host, config.filter.clone());
        let pool = AnalysisPool::new(
            Arc::clone(&inference),
            &config.inference,
            &config.pipeline,
            backoff,
        );
        let aggregator = Aggregator::new(inference);

        let dispatcher = match &config.notify.webhook_url {
            Some(_) => Some(DeliveryDispatcher::new(
                Arc::new(WeChatNotifier::new(&config.notify)?),
                config.notify.max_retries,
                backoff,
            )),
            None => None,
        };

        Ok(Self::new(
            &config.pipeline,
            fetcher,
            pool,
            aggregator,
            dispatcher,
            backoff,
        ))
    }

    /// Admit a trigger and start processing it in the background.
    ///
    /// A duplicate trigger whose coalescing key matches an active run
    /// returns that run's id instead of starting new work. Triggers are
    /// fire-and-forget: callers poll [`status`](Self::status) for the
    /// outcome.
    pub fn submit(&self, trigger: Trigger) -> Uuid {
        let (run_id, created) = self.inner.ledger.admit(&trigger);
        if !created {
            tracing::info!(
                run_id = %run_id,
                key = %trigger.coalesce_key(),
                "trigger coalesced into active run"
            );
            return run_id;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.drive(run_id, trigger).await;
        });
        run_id
    }

    /// Status snapshot for one run, including the report once synthesized
    pub fn status(&self, run_id: Uuid) -> Option<RunStatus> {
        self.inner.ledger.status(run_id)
    }
}

impl Inner {
    /// Run one trigger to a terminal state under the wall-clock budget
    async fn drive(&self, run_id: Uuid, trigger: Trigger) {
        match tokio::time::timeout(self.run_budget, self.execute(run_id, &trigger)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.ledger.fail(run_id, &e.to_string());
            }
            Err(_) => {
                let e = PipelineError::RunTimeout(self.run_budget);
                self.ledger.fail(run_id, &e.to_string());
            }
        }
    }

    async fn execute(&self, run_id: Uuid, trigger: &Trigger) -> Result<()> {
        self.ledger.transition(run_id, RunEvent::FetchStarted)?;
        let outcome = self.fetch_with_retry(trigger).await?;

        let units = outcome.units.clone();
        self.ledger.transition(
            run_id,
            RunEvent::FetchSucceeded {
                units: outcome.units,
                skipped: outcome.skipped,
            },
        )?;

        self.pool
            .analyze_all(run_id, units, Arc::clone(&self.ledger))
            .await;

        let ready = self.ledger.ready_set(run_id)?;
        let report = self
            .aggregator
            .synthesize(run_id, ready.findings, ready.skipped)
            .await;
        let report = self.ledger.attach_report(run_id, report)?;

        match &self.dispatcher {
            Some(dispatcher) => dispatcher
                .deliver(trigger, &report)
                .await
                .map_err(Error::Delivery)?,
            None => {
                tracing::info!(run_id = %run_id, "no notification channel configured, skipping delivery");
            }
        }

        self.ledger.transition(run_id, RunEvent::Delivered)?;
        Ok(())
    }

    /// Expand the trigger, retrying transient host errors
    async fn fetch_with_retry(&self, trigger: &Trigger) -> Result<FetchOutcome> {
        let mut last_error = None;

        for attempt in 1..=self.fetch_max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.fetch_backoff.delay(attempt - 1)).await;
            }

            match self.fetcher.expand(trigger).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        repo = %trigger.repo_slug(),
                        attempt = attempt,
                        max_attempts = self.fetch_max_attempts,
                        error = %e,
                        "transient fetch error"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(Error::Fetch(e)),
            }
        }

        Err(Error::Fetch(last_error.unwrap_or_else(|| {
            FetchError::TransientNetwork("max retries exceeded".to_string())
        })))
    }
}
