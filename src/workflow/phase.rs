//! Workflow phases.
//!
//! A phase is one step of the RED-GREEN-REFACTOR-COMMIT cycle: an ordered
//! checklist plus an optional validation gate.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::checklist::{ChecklistItem, ItemStatus};
use super::gate::{CheckRunner, GateResult, GateStatus, ValidationGate};

/// The four stages of the cycle, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Red,
    Green,
    Refactor,
    Commit,
}

impl PhaseKind {
    pub const ALL: [Self; 4] = [Self::Red, Self::Green, Self::Refactor, Self::Commit];

    /// Lowercase name used in item ids.
    pub fn slug(self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Green => "green",
            Self::Refactor => "refactor",
            Self::Commit => "commit",
        }
    }

    /// Parse a phase name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.slug().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.slug().to_uppercase())
    }
}

/// One phase of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    kind: PhaseKind,
    items: Vec<ChecklistItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gate: Option<ValidationGate>,
    #[serde(default)]
    gate_status: GateStatus,
}

impl Phase {
    /// Build a phase template.
    pub fn new(kind: PhaseKind, items: Vec<ChecklistItem>, gate: Option<ValidationGate>) -> Self {
        Self { kind, items, gate: gate.filter(|g| !g.is_empty()), gate_status: GateStatus::NotRun }
    }

    /// Deep copy of a template with every item Pending and the gate not run.
    pub fn instantiate(template: &Self) -> Self {
        Self {
            kind: template.kind,
            items: template.items.iter().map(ChecklistItem::fresh).collect(),
            gate: template.gate.clone(),
            gate_status: GateStatus::NotRun,
        }
    }

    pub fn kind(&self) -> PhaseKind {
        self.kind
    }

    pub fn items(&self) -> &[ChecklistItem] {
        &self.items
    }

    pub(crate) fn items_mut(&mut self) -> &mut [ChecklistItem] {
        &mut self.items
    }

    pub fn gate(&self) -> Option<&ValidationGate> {
        self.gate.as_ref()
    }

    pub fn gate_status(&self) -> &GateStatus {
        &self.gate_status
    }

    /// Whether the gate is absent or last passed.
    pub fn gate_is_green(&self) -> bool {
        self.gate.is_none() || self.gate_status.is_pass()
    }

    /// Every item is done and the gate, if any, last passed.
    pub fn is_complete(&self) -> bool {
        self.items.iter().all(ChecklistItem::is_done) && self.gate_is_green()
    }

    /// Number of done items.
    pub fn done_count(&self) -> usize {
        self.items.iter().filter(|i| i.is_done()).count()
    }

    /// Index of the first pending item.
    pub fn first_pending(&self) -> Option<usize> {
        self.items.iter().position(|i| i.status() == ItemStatus::Pending)
    }

    /// Run this phase's gate and remember the outcome.
    ///
    /// A phase without a gate trivially passes. Failures are recorded, not
    /// retried; call again after remediation.
    pub fn run_gate(&mut self, runner: &mut dyn CheckRunner) -> GateResult {
        let Some(gate) = &self.gate else {
            return GateResult { passed: Vec::new(), failure: None, duration: Duration::ZERO };
        };

        let result = gate.run(runner);
        self.gate_status = GateStatus::from(&result);
        tracing::info!(phase = %self.kind, status = %self.gate_status, "Gate finished");
        result
    }
}
