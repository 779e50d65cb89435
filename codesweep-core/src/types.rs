//! Domain types for the review pipeline
//!
//! A `Trigger` describes what to analyze. The coordinator turns it into a
//! `Run`, which the fetch stage expands into `FileUnit`s. Analysis produces
//! one `Finding` per unit, and aggregation folds the findings into a single
//! `Report` in discovery order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Triggers
// ============================================================================

/// What kind of analysis a trigger requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Review the files changed by one commit
    Push,
    /// Review every file in the tree at a ref (scheduled runs)
    FullSnapshot,
}

impl TriggerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMode::Push => "push",
            TriggerMode::FullSnapshot => "full_snapshot",
        }
    }
}

impl std::str::FromStr for TriggerMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "push" => Ok(TriggerMode::Push),
            "full_snapshot" => Ok(TriggerMode::FullSnapshot),
            other => Err(format!("unknown trigger mode: {}", other)),
        }
    }
}

/// Normalized description of one unit of work. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    /// Repository owner (user or organization)
    pub owner: String,
    /// Repository name
    pub repo: String,
    /// Git ref for full-snapshot mode (branch, tag, or sha)
    pub reference: Option<String>,
    /// Commit sha for push mode
    pub commit_sha: Option<String>,
    /// Analysis mode
    pub mode: TriggerMode,
    /// Caller-supplied idempotency key (commit sha for pushes,
    /// date+repo for scheduled snapshots)
    pub idempotency_key: String,
}

impl Trigger {
    /// Trigger for the changed files of a single commit
    pub fn push(owner: &str, repo: &str, commit_sha: &str) -> Self {
        Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            reference: None,
            commit_sha: Some(commit_sha.to_string()),
            mode: TriggerMode::Push,
            idempotency_key: commit_sha.to_string(),
        }
    }

    /// Trigger for a full-tree snapshot at a ref (defaults to HEAD).
    ///
    /// The idempotency key includes the current UTC date so a scheduled
    /// run coalesces within a day but not across days.
    pub fn full_snapshot(owner: &str, repo: &str, reference: Option<&str>) -> Self {
        let date = Utc::now().format("%Y-%m-%d");
        Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            reference: reference.map(|r| r.to_string()),
            commit_sha: None,
            mode: TriggerMode::FullSnapshot,
            idempotency_key: format!("snapshot:{}", date),
        }
    }

    /// Key under which concurrent duplicate triggers are coalesced
    pub fn coalesce_key(&self) -> String {
        format!("{}/{}:{}", self.owner, self.repo, self.idempotency_key)
    }

    /// `owner/repo` display form
    pub fn repo_slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

// ============================================================================
// File units
// ============================================================================

/// One file's content plus metadata, post-filtering. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUnit {
    /// Path within the repository
    pub path: String,
    /// Decoded UTF-8 content
    pub content: String,
    /// Content size in bytes
    pub size: u64,
    /// Detected language, from the extension map
    pub detected_type: Option<String>,
}

/// Why a discovered file was dropped before analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SkipReason {
    /// Extension not in the configured allow-list
    ExtensionExcluded,
    /// File larger than the configured size limit
    TooLarge { size: u64, limit: u64 },
    /// Content did not decode as UTF-8 text
    Binary,
    /// File listed by the host but its content could not be retrieved
    Unavailable,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::ExtensionExcluded => write!(f, "extension excluded"),
            SkipReason::TooLarge { size, limit } => {
                write!(f, "too large ({} bytes, limit {})", size, limit)
            }
            SkipReason::Binary => write!(f, "binary content"),
            SkipReason::Unavailable => write!(f, "content unavailable"),
        }
    }
}

/// A file dropped by the fetch stage, kept for report accounting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedUnit {
    pub path: String,
    pub reason: SkipReason,
}

// ============================================================================
// Findings and reports
// ============================================================================

/// Whether a finding is a real review or a failure placeholder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingOutcome {
    Success,
    Failed,
}

/// The inference output for one file unit. Immutable once recorded;
/// a retry produces a new finding that replaces the prior one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Path of the reviewed file
    pub path: String,
    /// Review text, or a failure note for permanently failed units
    pub verdict: String,
    /// When this finding was produced
    pub generated_at: DateTime<Utc>,
    /// 1-based attempt number that produced this finding
    pub attempt: u32,
    /// Success or permanent failure
    pub outcome: FindingOutcome,
    /// SHA-256 of the prompt that produced this finding
    pub prompt_hash: Option<String>,
}

impl Finding {
    pub fn is_success(&self) -> bool {
        self.outcome == FindingOutcome::Success
    }
}

/// Counts carried alongside a report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportStats {
    /// Units with a successful review
    pub analyzed: usize,
    /// Units that exhausted their retry budget
    pub failed: usize,
    /// Files dropped by filtering before analysis
    pub skipped: usize,
}

/// The terminal artifact of a run. Immutable once synthesized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub run_id: Uuid,
    /// Synthesized overview of all findings
    pub summary: String,
    /// Per-file findings in discovery order
    pub findings: Vec<Finding>,
    pub stats: ReportStats,
    pub generated_at: DateTime<Utc>,
}

// ============================================================================
// Run state
// ============================================================================

/// Lifecycle of a run. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Created,
    Fetching,
    Analyzing,
    Aggregating,
    Delivering,
    Done,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Created => "created",
            RunState::Fetching => "fetching",
            RunState::Analyzing => "analyzing",
            RunState::Aggregating => "aggregating",
            RunState::Delivering => "delivering",
            RunState::Done => "done",
            RunState::Failed => "failed",
        }
    }

    /// Terminal states accept no further events
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "created" => Ok(RunState::Created),
            "fetching" => Ok(RunState::Fetching),
            "analyzing" => Ok(RunState::Analyzing),
            "aggregating" => Ok(RunState::Aggregating),
            "delivering" => Ok(RunState::Delivering),
            "done" => Ok(RunState::Done),
            "failed" => Ok(RunState::Failed),
            other => Err(format!("unknown run state: {}", other)),
        }
    }
}

/// Snapshot of a run returned by status queries
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub run_id: Uuid,
    pub state: RunState,
    /// When the run was admitted to the ledger
    pub created_at: DateTime<Utc>,
    /// Findings recorded so far (success or permanent failure)
    pub analyzed: usize,
    /// File units selected for analysis
    pub total: usize,
    /// Terminal error detail, if the run failed
    pub error: Option<String>,
    /// Synthesized report, retained even when delivery failed
    pub report: Option<Report>,
}

// ============================================================================
// Language detection
// ============================================================================

/// Maps a file extension to a display language for review prompts
pub fn language_for_extension(path: &str) -> Option<&'static str> {
    let ext = path.rsplit('.').next()?;
    let language = match ext.to_ascii_lowercase().as_str() {
        "py" => "Python",
        "rs" => "Rust",
        "js" => "JavaScript",
        "jsx" => "JavaScript",
        "ts" => "TypeScript",
        "tsx" => "TypeScript",
        "go" => "Go",
        "java" => "Java",
        "kt" => "Kotlin",
        "c" => "C",
        "h" => "C",
        "cc" | "cpp" | "hpp" => "C++",
        "cs" => "C#",
        "rb" => "Ruby",
        "php" => "PHP",
        "swift" => "Swift",
        "sh" | "bash" => "Shell",
        "sql" => "SQL",
        "html" => "HTML",
        "css" => "CSS",
        "yml" | "yaml" => "YAML",
        "toml" => "TOML",
        "json" => "JSON",
        _ => return None,
    };
    Some(language)
}
