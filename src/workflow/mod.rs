//! Workflow composition and validation engine.
//!
//! Turns Markdown playbooks into an ordered, gated task list for a project.
//!
//! ## Pipeline
//!
//! - `WorkflowCatalog` - discovers and validates workflow documents
//! - `Resolver` - selects documents by technology tag and orders them by
//!   `depends_on`, rejecting cycles
//! - `ExecutionTracker` - walks the resulting plan one checklist item at a
//!   time and runs validation gates
//! - `StateStore` - persists the tracker between invocations
//!
//! ## Documents
//!
//! Each document carries YAML front matter (`name`, `version`, `tags`,
//! `depends_on`) followed by `## RED`, `## GREEN`, `## REFACTOR` and
//! `## COMMIT` sections of `- [ ]` checklist items, each optionally
//! followed by a `### Gate` list of checks.

mod catalog;
mod checklist;
mod document;
mod error;
mod gate;
mod parser;
mod phase;
mod resolver;
mod store;
mod tracker;

pub use catalog::WorkflowCatalog;
pub use checklist::{ChecklistItem, ItemId, ItemStatus};
pub use document::{Tag, WorkflowDocument, WorkflowInstance, DEFAULT_VERSION};
pub use error::{EngineError, EngineResult};
pub use gate::{
    Check, CheckOutcome, CheckRunner, GateFailure, GateResult, GateStatus, ShellCheckRunner,
    ValidationGate,
};
pub use parser::{has_front_matter, slugify};
pub use phase::{Phase, PhaseKind};
pub use resolver::{CompositionRequest, ResolvedPlan, Resolver};
pub use store::StateStore;
pub use tracker::{
    CompletedItem, CurrentItem, ExecutionState, ExecutionTracker, GateReport, ItemRef,
    PhaseProgress, StatusSnapshot, WorkflowProgress,
};
