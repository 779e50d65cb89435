//! Adapters for the three external services the pipeline talks to
//!
//! Each adapter is a small capability trait with a concrete HTTP
//! implementation. The coordinator receives trait objects at construction
//! time and never branches on the concrete type, so tests inject mocks.

pub mod github;
pub mod ollama;
pub mod wechat;

pub use github::{ContentHost, GitHubContentHost, HostContent, RemoteFile};
pub use ollama::{InferenceClient, OllamaInferenceClient};
pub use wechat::{Notifier, WeChatNotifier};
