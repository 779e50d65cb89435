//! # codesweep-core
//!
//! Core library for codesweep - an automated code review pipeline.
//!
//! A trigger (a push, or a scheduled full-repository snapshot) is expanded
//! into file units, each unit is reviewed by an inference host, the
//! findings are aggregated into a single report in discovery order, and
//! the report is delivered to a team-chat webhook.
//!
//! This library provides:
//! - The pipeline coordinator and run ledger (state machine, coalescing,
//!   retries, status queries)
//! - The fetch, analysis, aggregation, and delivery stages
//! - Adapters for GitHub, Ollama, and WeChat Work behind capability traits
//! - Configuration management and logging infrastructure
//!
//! ## Example
//!
//! ```rust,no_run
//! use codesweep_core::{Config, PipelineCoordinator, Trigger};
//!
//! # async fn run() -> codesweep_core::Result<()> {
//! let config = Config::load()?;
//! let coordinator = PipelineCoordinator::from_config(&config)?;
//!
//! let run_id = coordinator.submit(Trigger::push("acme", "widgets", "abc123"));
//! let status = coordinator.status(run_id);
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use pipeline::PipelineCoordinator;
pub use types::*;

// Public modules
pub mod analyze;
pub mod config;
pub mod deliver;
pub mod error;
pub mod fetch;
pub mod hosts;
pub mod logging;
pub mod pipeline;
pub mod report;
pub mod types;
