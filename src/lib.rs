//! # Redgreen
//!
//! Compose RED-GREEN-REFACTOR-COMMIT playbooks into one ordered, gated task
//! list for a project.
//!
//! Workflow documents are Markdown files with YAML front matter. Each one
//! declares the technology tags it applies to and the workflows it builds
//! on. Redgreen selects the documents matching a project's stack, orders
//! them so dependencies come first, and then hands out checklist items one
//! at a time, refusing to let a COMMIT item through until the workflow's
//! validation gates pass.
//!
//! ## Features
//!
//! - **Composition**: tag-based selection with transitive `depends_on`
//! - **Deterministic ordering**: alphabetical tie-break, cycles rejected
//! - **One thing at a time**: at most one item in progress per project
//! - **Gates**: shell checks with timeouts and coverage thresholds
//!
//! ## Quick Start
//!
//! ```bash
//! redgreen resolve python sqlite
//! redgreen start python sqlite
//! redgreen next
//! redgreen done
//! redgreen gate
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::map_unwrap_or)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::cast_precision_loss)]

pub mod core;
pub mod workflow;

// Re-export commonly used types
pub use core::{CheckConfig, Config};
pub use workflow::{
    CompositionRequest, EngineError, EngineResult, ExecutionTracker, ResolvedPlan, Resolver,
    StateStore, WorkflowCatalog, WorkflowDocument,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "redgreen";
