//! Integration tests for the review pipeline
//!
//! These tests drive the coordinator end to end against scripted host,
//! inference, and notifier mocks, and assert on the terminal run status
//! observed through the public status query.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use codesweep_core::analyze::AnalysisPool;
use codesweep_core::config::{FilterConfig, InferenceConfig, PipelineConfig};
use codesweep_core::deliver::DeliveryDispatcher;
use codesweep_core::error::{AnalysisError, DeliveryError, FetchError};
use codesweep_core::fetch::ContentFetcher;
use codesweep_core::hosts::{
    ContentHost, HostContent, InferenceClient, Notifier, RemoteFile,
};
use codesweep_core::pipeline::backoff::BackoffPolicy;
use codesweep_core::report::Aggregator;
use codesweep_core::PipelineCoordinator;
use codesweep_core::{FindingOutcome, RunState, RunStatus, Trigger};
use uuid::Uuid;

// ============================================
// Mocks
// ============================================

/// Content host serving a fixed file set, with optional scripted failures
struct MockHost {
    /// Listing order is discovery order
    files: Vec<(String, String)>,
    /// Listing calls that fail transiently before the first success
    transient_failures: AtomicU32,
    /// Every listing call fails terminally
    not_found: bool,
}

impl MockHost {
    fn serving(files: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            files: files
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
            transient_failures: AtomicU32::new(0),
            not_found: false,
        })
    }

    fn listing(&self) -> Result<Vec<RemoteFile>, FetchError> {
        if self.not_found {
            return Err(FetchError::NotFound("commit deadbeef".to_string()));
        }
        if self.transient_failures.load(Ordering::SeqCst) > 0 {
            self.transient_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(FetchError::TransientNetwork("connection reset".to_string()));
        }
        Ok(self
            .files
            .iter()
            .map(|(path, _)| RemoteFile {
                path: path.clone(),
                size: None,
            })
            .collect())
    }
}

#[async_trait]
impl ContentHost for MockHost {
    async fn list_changed_files(
        &self,
        _owner: &str,
        _repo: &str,
        _commit_sha: &str,
    ) -> Result<Vec<RemoteFile>, FetchError> {
        self.listing()
    }

    async fn list_tree(
        &self,
        _owner: &str,
        _repo: &str,
        _reference: &str,
    ) -> Result<Vec<RemoteFile>, FetchError> {
        self.listing()
    }

    async fn get_file_content(
        &self,
        _owner: &str,
        _repo: &str,
        path: &str,
        _reference: &str,
    ) -> Result<HostContent, FetchError> {
        Ok(self
            .files
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, c)| HostContent::Text(c.clone()))
            .unwrap_or(HostContent::Missing))
    }
}

/// Inference client with per-path failure and delay scripting
#[derive(Default)]
struct ScriptedInference {
    /// Path -> number of attempts that fail before one succeeds
    failures: HashMap<String, u32>,
    /// Path -> artificial latency in milliseconds
    delays: HashMap<String, u64>,
    /// Review calls block on this gate until permits are added
    gate: Option<Arc<tokio::sync::Semaphore>>,
    /// Paths of review calls, in arrival order
    review_calls: Mutex<Vec<String>>,
    attempts: Mutex<HashMap<String, u32>>,
}

impl ScriptedInference {
    fn reviewed_paths(&self) -> Vec<String> {
        self.review_calls.lock().unwrap().clone()
    }
}

/// The review prompt quotes the file path in backticks
fn path_from_prompt(prompt: &str) -> String {
    let start = prompt.find('`').map(|i| i + 1).unwrap_or(0);
    let end = prompt[start..]
        .find('`')
        .map(|i| start + i)
        .unwrap_or(prompt.len());
    prompt[start..end].to_string()
}

#[async_trait]
impl InferenceClient for ScriptedInference {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, AnalysisError> {
        if system == codesweep_core::report::SUMMARY_SYSTEM_PROMPT {
            return Ok("overall: summary of findings".to_string());
        }

        let path = path_from_prompt(prompt);
        self.review_calls.lock().unwrap().push(path.clone());

        if let Some(gate) = &self.gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(AnalysisError::ServiceUnavailable("gate closed".to_string())),
            }
        }

        if let Some(delay) = self.delays.get(&path) {
            tokio::time::sleep(Duration::from_millis(*delay)).await;
        }

        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let counter = attempts.entry(path.clone()).or_insert(0);
            *counter += 1;
            *counter
        };
        if attempt <= self.failures.get(&path).copied().unwrap_or(0) {
            return Err(AnalysisError::ServiceUnavailable("inference down".to_string()));
        }

        Ok(format!("review of {}", path))
    }
}

/// Notifier recording messages, with scripted failure modes
struct RecordingNotifier {
    reject: bool,
    transient_failures: AtomicU32,
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    fn accepting() -> Arc<Self> {
        Arc::new(Self {
            reject: false,
            transient_failures: AtomicU32::new(0),
            messages: Mutex::new(Vec::new()),
        })
    }

    fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            reject: true,
            transient_failures: AtomicU32::new(0),
            messages: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_markdown(&self, content: &str) -> Result<(), DeliveryError> {
        if self.reject {
            return Err(DeliveryError::Rejected("invalid webhook".to_string()));
        }
        if self.transient_failures.load(Ordering::SeqCst) > 0 {
            self.transient_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(DeliveryError::TransientNetwork("timeout".to_string()));
        }
        self.messages.lock().unwrap().push(content.to_string());
        Ok(())
    }
}

// ============================================
// Harness
// ============================================

fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        initial: Duration::from_millis(1),
        max: Duration::from_millis(5),
    }
}

fn build_coordinator(
    host: Arc<dyn ContentHost>,
    inference: Arc<dyn InferenceClient>,
    notifier: Option<Arc<dyn Notifier>>,
    filter: FilterConfig,
    pipeline: PipelineConfig,
) -> PipelineCoordinator {
    codesweep_core::logging::init_test();
    let backoff = fast_backoff();
    let inference_config = InferenceConfig {
        timeout_secs: 30,
        ..Default::default()
    };
    let fetcher = ContentFetcher::new(host, filter);
    let pool = AnalysisPool::new(Arc::clone(&inference), &inference_config, &pipeline, backoff);
    let aggregator = Aggregator::new(inference);
    let dispatcher = notifier.map(|n| DeliveryDispatcher::new(n, 3, backoff));
    PipelineCoordinator::new(&pipeline, fetcher, pool, aggregator, dispatcher, backoff)
}

/// Poll until the run reaches a terminal state
async fn wait_for_terminal(coordinator: &PipelineCoordinator, run_id: Uuid) -> RunStatus {
    for _ in 0..1000 {
        if let Some(status) = coordinator.status(run_id) {
            if status.state.is_terminal() {
                return status;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {} did not reach a terminal state", run_id);
}

// ============================================
// End-to-end scenarios
// ============================================

#[tokio::test]
async fn test_push_run_end_to_end() {
    let host = MockHost::serving(&[
        ("src/app.py", "print('hello')"),
        ("assets/logo.png", "not fetched"),
        ("src/util.py", "def f(): pass"),
    ]);
    let inference = Arc::new(ScriptedInference::default());
    let notifier = RecordingNotifier::accepting();
    let filter = FilterConfig {
        allowed_extensions: Some(vec!["py".to_string()]),
        ..Default::default()
    };
    let coordinator = build_coordinator(
        host,
        Arc::clone(&inference) as _,
        Some(Arc::clone(&notifier) as _),
        filter,
        PipelineConfig::default(),
    );

    let run_id = coordinator.submit(Trigger::push("acme", "widgets", "c1"));
    let status = wait_for_terminal(&coordinator, run_id).await;

    assert_eq!(status.state, RunState::Done);
    assert!(status.error.is_none());
    assert_eq!(status.analyzed, 2);
    assert_eq!(status.total, 2);

    let report = status.report.expect("done run carries its report");
    let paths: Vec<&str> = report.findings.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["src/app.py", "src/util.py"]);
    assert!(report.findings.iter().all(|f| f.is_success()));
    assert_eq!(report.stats.analyzed, 2);
    assert_eq!(report.stats.skipped, 1);

    let messages = notifier.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("acme/widgets"));
    assert!(messages[0].contains("2 reviewed"));
}

#[tokio::test]
async fn test_duplicate_trigger_coalesces_into_active_run() {
    let host = MockHost::serving(&[("a.py", "x = 1")]);
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let inference = Arc::new(ScriptedInference {
        gate: Some(Arc::clone(&gate)),
        ..Default::default()
    });
    let coordinator = build_coordinator(
        host,
        inference as _,
        Some(RecordingNotifier::accepting() as _),
        FilterConfig::default(),
        PipelineConfig::default(),
    );

    let first = coordinator.submit(Trigger::push("acme", "widgets", "c1"));
    // Give the driver a moment to reach the analysis stage
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Same key while active: same run, no new work
    let second = coordinator.submit(Trigger::push("acme", "widgets", "c1"));
    assert_eq!(first, second);

    // A different commit is a different key
    let other = coordinator.submit(Trigger::push("acme", "widgets", "c2"));
    assert_ne!(first, other);

    gate.add_permits(100);
    let status = wait_for_terminal(&coordinator, first).await;
    assert_eq!(status.state, RunState::Done);
    wait_for_terminal(&coordinator, other).await;

    // Terminal runs release the key: the same trigger now starts fresh
    let fresh = coordinator.submit(Trigger::push("acme", "widgets", "c1"));
    assert_ne!(fresh, first);
}

#[tokio::test]
async fn test_report_order_is_discovery_order_not_completion_order() {
    let host = MockHost::serving(&[
        ("first.py", "a = 1"),
        ("second.py", "b = 2"),
        ("third.py", "c = 3"),
    ]);
    // Completion order is reversed via per-path latency
    let inference = Arc::new(ScriptedInference {
        delays: HashMap::from([
            ("first.py".to_string(), 60),
            ("second.py".to_string(), 30),
            ("third.py".to_string(), 0),
        ]),
        ..Default::default()
    });
    let coordinator = build_coordinator(
        host,
        inference as _,
        Some(RecordingNotifier::accepting() as _),
        FilterConfig::default(),
        PipelineConfig::default(),
    );

    let run_id = coordinator.submit(Trigger::push("acme", "widgets", "c1"));
    let status = wait_for_terminal(&coordinator, run_id).await;

    let report = status.report.unwrap();
    let paths: Vec<&str> = report.findings.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["first.py", "second.py", "third.py"]);
}

#[tokio::test]
async fn test_oversized_file_never_reaches_analysis() {
    let big_content = "#".repeat(150 * 1024);
    let host = MockHost::serving(&[("big.py", big_content.as_str()), ("ok.py", "x = 1")]);
    let inference = Arc::new(ScriptedInference::default());
    let coordinator = build_coordinator(
        host,
        Arc::clone(&inference) as _,
        Some(RecordingNotifier::accepting() as _),
        FilterConfig::default(), // 100 KiB limit
        PipelineConfig::default(),
    );

    let run_id = coordinator.submit(Trigger::push("acme", "widgets", "c1"));
    let status = wait_for_terminal(&coordinator, run_id).await;

    assert_eq!(status.state, RunState::Done);
    let reviewed = inference.reviewed_paths();
    assert!(!reviewed.contains(&"big.py".to_string()));
    assert_eq!(reviewed, vec!["ok.py".to_string()]);

    let report = status.report.unwrap();
    assert_eq!(report.stats.analyzed, 1);
    assert_eq!(report.stats.skipped, 1);
}

#[tokio::test]
async fn test_flaky_analysis_succeeds_on_third_attempt() {
    let host = MockHost::serving(&[("flaky.py", "x = 1"), ("steady.py", "y = 2")]);
    let inference = Arc::new(ScriptedInference {
        failures: HashMap::from([("flaky.py".to_string(), 2)]),
        ..Default::default()
    });
    let coordinator = build_coordinator(
        host,
        inference as _,
        Some(RecordingNotifier::accepting() as _),
        FilterConfig::default(),
        PipelineConfig::default(),
    );

    let run_id = coordinator.submit(Trigger::push("acme", "widgets", "c1"));
    let status = wait_for_terminal(&coordinator, run_id).await;

    assert_eq!(status.state, RunState::Done);
    let report = status.report.unwrap();
    let flaky = report
        .findings
        .iter()
        .find(|f| f.path == "flaky.py")
        .unwrap();
    assert_eq!(flaky.outcome, FindingOutcome::Success);
    assert_eq!(flaky.attempt, 3);

    let steady = report
        .findings
        .iter()
        .find(|f| f.path == "steady.py")
        .unwrap();
    assert_eq!(steady.attempt, 1);
}

#[tokio::test]
async fn test_all_permanent_failures_still_complete_the_run() {
    let host = MockHost::serving(&[("a.py", "x = 1"), ("b.py", "y = 2")]);
    let inference = Arc::new(ScriptedInference {
        failures: HashMap::from([
            ("a.py".to_string(), u32::MAX),
            ("b.py".to_string(), u32::MAX),
        ]),
        ..Default::default()
    });
    let coordinator = build_coordinator(
        host,
        inference as _,
        Some(RecordingNotifier::accepting() as _),
        FilterConfig::default(),
        PipelineConfig::default(),
    );

    let run_id = coordinator.submit(Trigger::push("acme", "widgets", "c1"));
    let status = wait_for_terminal(&coordinator, run_id).await;

    // Per-file failures degrade the report, they never fail the run
    assert_eq!(status.state, RunState::Done);
    let report = status.report.unwrap();
    assert_eq!(report.findings.len(), 2);
    assert!(report
        .findings
        .iter()
        .all(|f| f.outcome == FindingOutcome::Failed));
    assert!(report
        .findings
        .iter()
        .all(|f| f.verdict.contains("failed after 3 attempts")));
    assert!(report.summary.contains("Zero successful analyses"));
}

#[tokio::test]
async fn test_fetch_not_found_fails_the_run() {
    let host = Arc::new(MockHost {
        files: vec![],
        transient_failures: AtomicU32::new(0),
        not_found: true,
    });
    let notifier = RecordingNotifier::accepting();
    let coordinator = build_coordinator(
        host,
        Arc::new(ScriptedInference::default()) as _,
        Some(Arc::clone(&notifier) as _),
        FilterConfig::default(),
        PipelineConfig::default(),
    );

    let run_id = coordinator.submit(Trigger::push("acme", "widgets", "deadbeef"));
    let status = wait_for_terminal(&coordinator, run_id).await;

    assert_eq!(status.state, RunState::Failed);
    assert!(status.error.unwrap().contains("not found"));
    assert!(status.report.is_none());
    assert!(notifier.messages.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_transient_fetch_errors_are_retried() {
    let host = Arc::new(MockHost {
        files: vec![("a.py".to_string(), "x = 1".to_string())],
        transient_failures: AtomicU32::new(2),
        not_found: false,
    });
    let coordinator = build_coordinator(
        host,
        Arc::new(ScriptedInference::default()) as _,
        Some(RecordingNotifier::accepting() as _),
        FilterConfig::default(),
        PipelineConfig::default(), // three fetch attempts
    );

    let run_id = coordinator.submit(Trigger::push("acme", "widgets", "c1"));
    let status = wait_for_terminal(&coordinator, run_id).await;
    assert_eq!(status.state, RunState::Done);
}

#[tokio::test]
async fn test_rejected_delivery_fails_run_but_keeps_report() {
    let host = MockHost::serving(&[("a.py", "x = 1")]);
    let notifier = RecordingNotifier::rejecting();
    let coordinator = build_coordinator(
        host,
        Arc::new(ScriptedInference::default()) as _,
        Some(notifier as _),
        FilterConfig::default(),
        PipelineConfig::default(),
    );

    let run_id = coordinator.submit(Trigger::push("acme", "widgets", "c1"));
    let status = wait_for_terminal(&coordinator, run_id).await;

    assert_eq!(status.state, RunState::Failed);
    assert!(status.error.unwrap().contains("rejected"));
    // The synthesized report survives the delivery failure
    let report = status.report.expect("report retained for manual resend");
    assert_eq!(report.findings.len(), 1);
}

#[tokio::test]
async fn test_transient_delivery_errors_are_retried() {
    let host = MockHost::serving(&[("a.py", "x = 1")]);
    let notifier = Arc::new(RecordingNotifier {
        reject: false,
        transient_failures: AtomicU32::new(2),
        messages: Mutex::new(Vec::new()),
    });
    let coordinator = build_coordinator(
        host,
        Arc::new(ScriptedInference::default()) as _,
        Some(Arc::clone(&notifier) as _),
        FilterConfig::default(),
        PipelineConfig::default(),
    );

    let run_id = coordinator.submit(Trigger::push("acme", "widgets", "c1"));
    let status = wait_for_terminal(&coordinator, run_id).await;

    assert_eq!(status.state, RunState::Done);
    assert_eq!(notifier.messages.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_run_budget_timeout_forces_failure() {
    let host = MockHost::serving(&[("slow.py", "x = 1")]);
    // Gate never opens: analysis hangs until the budget expires
    let inference = Arc::new(ScriptedInference {
        gate: Some(Arc::new(tokio::sync::Semaphore::new(0))),
        ..Default::default()
    });
    let pipeline = PipelineConfig {
        run_budget_secs: 1,
        ..Default::default()
    };
    let coordinator = build_coordinator(
        host,
        inference as _,
        Some(RecordingNotifier::accepting() as _),
        FilterConfig::default(),
        pipeline,
    );

    let run_id = coordinator.submit(Trigger::push("acme", "widgets", "c1"));
    let status = wait_for_terminal(&coordinator, run_id).await;

    assert_eq!(status.state, RunState::Failed);
    assert!(status.error.unwrap().contains("wall-clock budget"));
}

#[tokio::test]
async fn test_unknown_run_status_is_none() {
    let coordinator = build_coordinator(
        MockHost::serving(&[]),
        Arc::new(ScriptedInference::default()) as _,
        None,
        FilterConfig::default(),
        PipelineConfig::default(),
    );
    assert!(coordinator.status(Uuid::new_v4()).is_none());
}

#[tokio::test]
async fn test_no_notifier_configured_skips_delivery() {
    let host = MockHost::serving(&[("a.py", "x = 1")]);
    let coordinator = build_coordinator(
        host,
        Arc::new(ScriptedInference::default()) as _,
        None,
        FilterConfig::default(),
        PipelineConfig::default(),
    );

    let run_id = coordinator.submit(Trigger::push("acme", "widgets", "c1"));
    let status = wait_for_terminal(&coordinator, run_id).await;
    assert_eq!(status.state, RunState::Done);
    assert!(status.report.is_some());
}
