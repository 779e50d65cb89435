//! Run ledger: the single serialization point for run state
//!
//! Every state change passes through one transition function executed under
//! the ledger lock, so readiness checks and the analyzing-to-aggregating
//! flip are race free no matter how many workers report in parallel. The
//! lock is never held across an await point; workers compute their results
//! first and then hand them to the ledger.
//!
//! Terminal runs are retained for status queries and never reused. A run's
//! coalescing key is released only when it reaches a terminal state.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::types::{
    FileUnit, Finding, Report, RunState, RunStatus, SkippedUnit, Trigger,
};

/// One live or terminal run. Owned exclusively by the ledger.
#[derive(Debug)]
struct Run {
    run_id: Uuid,
    trigger: Trigger,
    state: RunState,
    created_at: DateTime<Utc>,
    /// File units in discovery order; fixed after the fetch stage
    file_units: Vec<FileUnit>,
    skipped: Vec<SkippedUnit>,
    /// Keyed by path; a retry replaces the prior finding for its path
    findings: HashMap<String, Finding>,
    report: Option<Report>,
    terminal_error: Option<String>,
}

/// An event advancing a run's state machine
#[derive(Debug)]
pub enum RunEvent {
    /// Fetch stage started
    FetchStarted,
    /// Fetch stage produced the file units and skip list
    FetchSucceeded {
        units: Vec<FileUnit>,
        skipped: Vec<SkippedUnit>,
    },
    /// Report synthesized; moves the run into delivery
    ReportReady(Report),
    /// Delivery succeeded; the run is done
    Delivered,
    /// Run-level failure with its cause
    Failed(String),
}

impl RunEvent {
    fn name(&self) -> &'static str {
        match self {
            RunEvent::FetchStarted => "fetch_started",
            RunEvent::FetchSucceeded { .. } => "fetch_succeeded",
            RunEvent::ReportReady(_) => "report_ready",
            RunEvent::Delivered => "delivered",
            RunEvent::Failed(_) => "failed",
        }
    }
}

/// Ordered findings snapshot handed to the aggregator
#[derive(Debug)]
pub struct ReadySet {
    /// One finding per file unit, in discovery order
    pub findings: Vec<Finding>,
    /// Count of files dropped before analysis
    pub skipped: usize,
}

struct LedgerInner {
    runs: HashMap<Uuid, Run>,
    /// Coalescing index: active (non-terminal) run per key
    active: HashMap<String, Uuid>,
}

/// Thread-safe table of all runs
pub struct RunLedger {
    inner: Mutex<LedgerInner>,
}

impl Default for RunLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl RunLedger {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LedgerInner {
                runs: HashMap::new(),
                active: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        // A poisoned lock only means a panic happened mid-update;
        // the last written state is still the best available
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admit a trigger. Returns the run id and whether a new run was
    /// created; `false` means the trigger coalesced into an active run.
    pub fn admit(&self, trigger: &Trigger) -> (Uuid, bool) {
        let key = trigger.coalesce_key();
        let mut inner = self.lock();

        if let Some(existing) = inner.active.get(&key) {
            return (*existing, false);
        }

        let run_id = Uuid::new_v4();
        let run = Run {
            run_id,
            trigger: trigger.clone(),
            state: RunState::Created,
            created_at: Utc::now(),
            file_units: Vec::new(),
            skipped: Vec::new(),
            findings: HashMap::new(),
            report: None,
            terminal_error: None,
        };
        inner.runs.insert(run_id, run);
        inner.active.insert(key, run_id);

        tracing::info!(
            run_id = %run_id,
            repo = %trigger.repo_slug(),
            mode = trigger.mode.as_str(),
            "run created"
        );
        (run_id, true)
    }

    /// Apply one event to a run, returning the new state
    pub fn transition(
        &self,
        run_id: Uuid,
        event: RunEvent,
    ) -> Result<RunState, PipelineError> {
        let mut inner = self.lock();
        let run = inner
            .runs
            .get_mut(&run_id)
            .ok_or(PipelineError::RunNotFound(run_id))?;

        let from = run.state;
        apply(run, event)?;
        let to = run.state;

        tracing::info!(run_id = %run_id, from = from.as_str(), to = to.as_str(), "run state change");

        if to.is_terminal() {
            release_key(&mut inner, run_id);
        }
        Ok(to)
    }

    /// Record one finding for an analyzing run.
    ///
    /// Late results for terminal or non-analyzing runs are discarded.
    /// When the last outstanding unit reports in, the run flips to
    /// `Aggregating` under the same lock, so exactly one completion
    /// observes the readiness transition.
    pub fn record_finding(&self, run_id: Uuid, finding: Finding) {
        let mut inner = self.lock();
        let Some(run) = inner.runs.get_mut(&run_id) else {
            tracing::debug!(run_id = %run_id, "finding for unknown run discarded");
            return;
        };

        if run.state != RunState::Analyzing {
            tracing::debug!(
                run_id = %run_id,
                path = %finding.path,
                state = run.state.as_str(),
                "late finding discarded"
            );
            return;
        }

        tracing::debug!(
            run_id = %run_id,
            path = %finding.path,
            attempt = finding.attempt,
            success = finding.is_success(),
            "finding recorded"
        );
        run.findings.insert(finding.path.clone(), finding);

        if run.findings.len() == run.file_units.len() {
            run.state = RunState::Aggregating;
            tracing::info!(
                run_id = %run_id,
                findings = run.findings.len(),
                "all units resolved, run ready for aggregation"
            );
        }
    }

    /// Take the ordered findings snapshot for aggregation.
    ///
    /// Also handles the zero-unit case, where no finding ever arrives:
    /// an analyzing run with nothing outstanding flips here instead.
    pub fn ready_set(&self, run_id: Uuid) -> Result<ReadySet, PipelineError> {
        let mut inner = self.lock();
        let run = inner
            .runs
            .get_mut(&run_id)
            .ok_or(PipelineError::RunNotFound(run_id))?;

        if run.state == RunState::Analyzing && run.findings.len() == run.file_units.len() {
            run.state = RunState::Aggregating;
        }

        if run.state != RunState::Aggregating {
            return Err(PipelineError::InvalidTransition {
                from: run.state.as_str().to_string(),
                event: "ready_set".to_string(),
            });
        }

        // Report order is discovery order, never completion order
        let findings = run
            .file_units
            .iter()
            .filter_map(|unit| run.findings.get(&unit.path).cloned())
            .collect();

        Ok(ReadySet {
            findings,
            skipped: run.skipped.len(),
        })
    }

    /// Attach the synthesized report and move the run into delivery.
    ///
    /// Idempotent: if a report is already attached, the stored one is
    /// returned unchanged and no re-synthesis happens.
    pub fn attach_report(&self, run_id: Uuid, report: Report) -> Result<Report, PipelineError> {
        let mut inner = self.lock();
        let run = inner
            .runs
            .get_mut(&run_id)
            .ok_or(PipelineError::RunNotFound(run_id))?;

        if let Some(existing) = &run.report {
            return Ok(existing.clone());
        }

        let from = run.state;
        apply(run, RunEvent::ReportReady(report))?;
        tracing::info!(
            run_id = %run_id,
            from = from.as_str(),
            to = run.state.as_str(),
            "report attached"
        );

        Ok(run
            .report
            .clone()
            .unwrap_or_else(|| unreachable_report(run_id)))
    }

    /// Force a run into `Failed`, recording the cause.
    ///
    /// A no-op on runs that already reached a terminal state, so a budget
    /// timeout racing normal completion cannot clobber a finished run.
    pub fn fail(&self, run_id: Uuid, error: &str) {
        let mut inner = self.lock();
        let Some(run) = inner.runs.get_mut(&run_id) else {
            tracing::debug!(run_id = %run_id, "failure for unknown run ignored");
            return;
        };

        if run.state.is_terminal() {
            tracing::debug!(
                run_id = %run_id,
                state = run.state.as_str(),
                "failure for terminal run ignored"
            );
            return;
        }

        let from = run.state;
        run.terminal_error = Some(error.to_string());
        run.state = RunState::Failed;
        tracing::warn!(
            run_id = %run_id,
            from = from.as_str(),
            error = error,
            "run failed"
        );
        release_key(&mut inner, run_id);
    }

    /// Status snapshot for one run
    pub fn status(&self, run_id: Uuid) -> Option<RunStatus> {
        let inner = self.lock();
        let run = inner.runs.get(&run_id)?;
        Some(RunStatus {
            run_id,
            state: run.state,
            created_at: run.created_at,
            analyzed: run.findings.len(),
            total: run.file_units.len(),
            error: run.terminal_error.clone(),
            report: run.report.clone(),
        })
    }
}

/// The single state transition function. Callers hold the ledger lock.
fn apply(run: &mut Run, event: RunEvent) -> Result<(), PipelineError> {
    match (run.state, event) {
        (RunState::Created, RunEvent::FetchStarted) => {
            run.state = RunState::Fetching;
        }
        (RunState::Fetching, RunEvent::FetchSucceeded { units, skipped }) => {
            run.file_units = units;
            run.skipped = skipped;
            run.state = RunState::Analyzing;
        }
        (RunState::Aggregating, RunEvent::ReportReady(report)) => {
            run.report = Some(report);
            run.state = RunState::Delivering;
        }
        (RunState::Delivering, RunEvent::Delivered) => {
            run.state = RunState::Done;
        }
        (state, RunEvent::Failed(error)) if !state.is_terminal() => {
            run.terminal_error = Some(error);
            run.state = RunState::Failed;
        }
        (state, event) => {
            return Err(PipelineError::InvalidTransition {
                from: state.as_str().to_string(),
                event: event.name().to_string(),
            });
        }
    }
    Ok(())
}

/// Drop the coalescing index entry for a run that went terminal
fn release_key(inner: &mut LedgerInner, run_id: Uuid) {
    if let Some(run) = inner.runs.get(&run_id) {
        let key = run.trigger.coalesce_key();
        if inner.active.get(&key) == Some(&run_id) {
            inner.active.remove(&key);
        }
    }
}

/// attach_report stores the report before this can run
fn unreachable_report(run_id: Uuid) -> Report {
    tracing::error!(run_id = %run_id, "report missing immediately after attach");
    Report {
        run_id,
        summary: String::new(),
        findings: Vec::new(),
        stats: Default::default(),
        generated_at: Utc::now(),
    }
}
