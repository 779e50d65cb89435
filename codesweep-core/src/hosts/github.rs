//! GitHub content host adapter
//!
//! Wraps the three REST calls the fetch stage needs: the changed-file list
//! of a commit, a recursive tree listing, and single-file content. Rate
//! limiting (403/429) and server errors map to retryable fetch errors;
//! a missing commit or repository is terminal.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;

use crate::config::GithubConfig;
use crate::error::{Error, FetchError, Result};

/// A file discovered on the host, before its content is retrieved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Path within the repository
    pub path: String,
    /// Blob size in bytes, when the listing carries it
    pub size: Option<u64>,
}

/// Result of retrieving one file's content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostContent {
    /// Decoded UTF-8 text
    Text(String),
    /// Content exists but is not valid UTF-8
    Binary,
    /// File no longer present at this ref
    Missing,
}

/// Capability interface over a source-control content host
#[async_trait]
pub trait ContentHost: Send + Sync {
    /// Files touched by one commit, in diff order. Removed files excluded.
    async fn list_changed_files(
        &self,
        owner: &str,
        repo: &str,
        commit_sha: &str,
    ) -> std::result::Result<Vec<RemoteFile>, FetchError>;

    /// All blobs in the tree at a ref, in lexical path order.
    async fn list_tree(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
    ) -> std::result::Result<Vec<RemoteFile>, FetchError>;

    /// Content of one file at a ref.
    async fn get_file_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        reference: &str,
    ) -> std::result::Result<HostContent, FetchError>;
}

/// GitHub REST v3 implementation of [`ContentHost`]
pub struct GitHubContentHost {
    http_client: reqwest::Client,
    api_base: String,
}

impl GitHubContentHost {
    /// Create a new client from configuration
    pub fn new(config: &GithubConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github.v3+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("codesweep"));

        if let Some(token) = &config.token {
            let auth_value = format!("token {}", token);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| Error::Config(format!("invalid github token: {}", e)))?,
            );
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        context: &str,
    ) -> std::result::Result<T, FetchError> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, context));
        }

        response
            .json()
            .await
            .map_err(|e| FetchError::TransientNetwork(format!("malformed response: {}", e)))
    }
}

#[async_trait]
impl ContentHost for GitHubContentHost {
    async fn list_changed_files(
        &self,
        owner: &str,
        repo: &str,
        commit_sha: &str,
    ) -> std::result::Result<Vec<RemoteFile>, FetchError> {
        let url = format!(
            "{}/repos/{}/{}/commits/{}",
            self.api_base, owner, repo, commit_sha
        );
        let commit: CommitResponse = self
            .get_json(&url, &format!("commit {}", commit_sha))
            .await?;

        // Removed files have no content to review
        let files = commit
            .files
            .into_iter()
            .filter(|f| f.status != "removed")
            .map(|f| RemoteFile {
                path: f.filename,
                size: None,
            })
            .collect();

        Ok(files)
    }

    async fn list_tree(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
    ) -> std::result::Result<Vec<RemoteFile>, FetchError> {
        let url = format!(
            "{}/repos/{}/{}/git/trees/{}?recursive=1",
            self.api_base,
            owner,
            repo,
            urlencoding::encode(reference)
        );
        let tree: TreeResponse = self.get_json(&url, &format!("tree {}", reference)).await?;

        if tree.truncated {
            tracing::warn!(
                owner = owner,
                repo = repo,
                reference = reference,
                "tree listing truncated by host, some files will be missed"
            );
        }

        let mut files: Vec<RemoteFile> = tree
            .tree
            .into_iter()
            .filter(|e| e.kind == "blob")
            .map(|e| RemoteFile {
                path: e.path,
                size: e.size,
            })
            .collect();

        // Lexical order so snapshot reports are stable across runs
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    async fn get_file_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        reference: &str,
    ) -> std::result::Result<HostContent, FetchError> {
        let url = format!(
            "{}/repos/{}/{}/contents/{}?ref={}",
            self.api_base,
            owner,
            repo,
            encode_path(path),
            urlencoding::encode(reference)
        );

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            // Listed but gone at this ref, the fetcher records a skip
            return Ok(HostContent::Missing);
        }
        if !status.is_success() {
            return Err(status_error(status, &format!("contents of {}", path)));
        }

        let body: ContentResponse = response
            .json()
            .await
            .map_err(|e| FetchError::TransientNetwork(format!("malformed response: {}", e)))?;

        if body.encoding != "base64" {
            return Ok(HostContent::Text(body.content));
        }

        // GitHub wraps base64 at 60 columns
        let raw: String = body.content.split_whitespace().collect();
        let bytes = match base64::engine::general_purpose::STANDARD.decode(raw) {
            Ok(bytes) => bytes,
            Err(_) => return Ok(HostContent::Binary),
        };

        match String::from_utf8(bytes) {
            Ok(text) => Ok(HostContent::Text(text)),
            Err(_) => Ok(HostContent::Binary),
        }
    }
}

/// Percent-encode each segment of a repository path, keeping the
/// separators. Listings return paths raw, so `#`, `?`, spaces, and `%`
/// must be escaped before they land in a contents URL.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Map an HTTP status to a fetch error
fn status_error(status: reqwest::StatusCode, context: &str) -> FetchError {
    match status {
        reqwest::StatusCode::NOT_FOUND => FetchError::NotFound(context.to_string()),
        reqwest::StatusCode::FORBIDDEN | reqwest::StatusCode::TOO_MANY_REQUESTS => {
            FetchError::RateLimited
        }
        other => FetchError::TransientNetwork(format!("API error ({}) for {}", other, context)),
    }
}

/// Map a reqwest transport error to a fetch error
fn transport_error(error: &reqwest::Error) -> FetchError {
    FetchError::TransientNetwork(format!("HTTP request failed: {}", error))
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    #[serde(default)]
    files: Vec<CommitFile>,
}

#[derive(Debug, Deserialize)]
struct CommitFile {
    filename: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}
