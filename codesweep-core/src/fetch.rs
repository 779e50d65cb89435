//! Content fetch stage
//!
//! Expands a trigger into an ordered list of file units by asking the
//! content host for the changed-file list (push) or the full tree
//! (snapshot), then retrieving each file's content. Filtering drops
//! files by extension, size, or undecodable content; drops are recorded
//! as skips, never as errors. Discovery order is preserved end to end
//! because the report is later laid out in the same order.

use std::sync::Arc;

use crate::config::FilterConfig;
use crate::error::FetchError;
use crate::hosts::{ContentHost, HostContent, RemoteFile};
use crate::types::{language_for_extension, FileUnit, SkipReason, SkippedUnit, Trigger, TriggerMode};

/// Result of expanding one trigger
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Files selected for analysis, in discovery order
    pub units: Vec<FileUnit>,
    /// Files dropped by filtering, kept for report accounting
    pub skipped: Vec<SkippedUnit>,
}

/// Expands triggers into file units
pub struct ContentFetcher {
    host: Arc<dyn ContentHost>,
    filter: FilterConfig,
}

impl ContentFetcher {
    pub fn new(host: Arc<dyn ContentHost>, filter: FilterConfig) -> Self {
        Self { host, filter }
    }

    /// Expand a trigger into file units and a skip list.
    ///
    /// Fails only on host-level errors; per-file problems (missing at
    /// ref, binary content, over the size limit) become skips.
    pub async fn expand(&self, trigger: &Trigger) -> Result<FetchOutcome, FetchError> {
        let (files, reference) = self.discover(trigger).await?;

        tracing::info!(
            repo = %trigger.repo_slug(),
            mode = trigger.mode.as_str(),
            discovered = files.len(),
            "expanding trigger"
        );

        let size_limit = self.filter.max_file_size_bytes();
        let mut outcome = FetchOutcome::default();

        for file in files {
            if !self.extension_allowed(&file.path) {
                outcome.skipped.push(SkippedUnit {
                    path: file.path,
                    reason: SkipReason::ExtensionExcluded,
                });
                continue;
            }

            // Tree listings carry blob sizes, so oversized files can be
            // dropped without fetching their content
            if let Some(size) = file.size {
                if size > size_limit {
                    outcome.skipped.push(SkippedUnit {
                        path: file.path,
                        reason: SkipReason::TooLarge {
                            size,
                            limit: size_limit,
                        },
                    });
                    continue;
                }
            }

            let content = self
                .host
                .get_file_content(&trigger.owner, &trigger.repo, &file.path, &reference)
                .await?;

            match content {
                HostContent::Missing => {
                    outcome.skipped.push(SkippedUnit {
                        path: file.path,
                        reason: SkipReason::Unavailable,
                    });
                }
                HostContent::Binary => {
                    outcome.skipped.push(SkippedUnit {
                        path: file.path,
                        reason: SkipReason::Binary,
                    });
                }
                HostContent::Text(text) => {
                    let size = text.len() as u64;
                    // Commit listings carry no sizes; check again here
                    if size > size_limit {
                        outcome.skipped.push(SkippedUnit {
                            path: file.path,
                            reason: SkipReason::TooLarge {
                                size,
                                limit: size_limit,
                            },
                        });
                        continue;
                    }
                    let detected_type =
                        language_for_extension(&file.path).map(|l| l.to_string());
                    outcome.units.push(FileUnit {
                        path: file.path,
                        content: text,
                        size,
                        detected_type,
                    });
                }
            }
        }

        tracing::info!(
            repo = %trigger.repo_slug(),
            units = outcome.units.len(),
            skipped = outcome.skipped.len(),
            "trigger expanded"
        );
        Ok(outcome)
    }

    /// Ask the host for the file listing and pick the ref used for
    /// content retrieval
    async fn discover(
        &self,
        trigger: &Trigger,
    ) -> Result<(Vec<RemoteFile>, String), FetchError> {
        match trigger.mode {
            TriggerMode::Push => {
                let sha = trigger.commit_sha.as_deref().ok_or_else(|| {
                    FetchError::NotFound("push trigger without commit sha".to_string())
                })?;
                let files = self
                    .host
                    .list_changed_files(&trigger.owner, &trigger.repo, sha)
                    .await?;
                Ok((files, sha.to_string()))
            }
            TriggerMode::FullSnapshot => {
                let reference = trigger.reference.as_deref().unwrap_or("HEAD");
                let files = self
                    .host
                    .list_tree(&trigger.owner, &trigger.repo, reference)
                    .await?;
                Ok((files, reference.to_string()))
            }
        }
    }

    fn extension_allowed(&self, path: &str) -> bool {
        let Some(allowed) = &self.filter.allowed_extensions else {
            return true;
        };
        let ext = match path.rsplit_once('.') {
            Some((_, ext)) => ext.to_ascii_lowercase(),
            None => return false,
        };
        allowed.iter().any(|a| a.eq_ignore_ascii_case(&ext))
    }
}
