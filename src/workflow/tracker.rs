//! Execution tracker.
//!
//! Owns the project-wide task list for one session and advances it one
//! item at a time. At most one checklist item across the whole plan is in
//! progress at any moment; every transition goes through this type.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::checklist::{ChecklistItem, ItemId, ItemStatus};
use super::document::WorkflowInstance;
use super::error::{EngineError, EngineResult};
use super::gate::{CheckRunner, GateResult, GateStatus};
use super::phase::PhaseKind;
use super::resolver::ResolvedPlan;

/// Position of an item inside a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub workflow: usize,
    pub phase: usize,
    pub item: usize,
}

/// A completed item, kept for the session history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedItem {
    pub id: ItemId,
    pub description: String,
    pub completed_at: DateTime<Utc>,
}

/// Per-project session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub session_id: Uuid,
    pub project: PathBuf,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    plan: ResolvedPlan,
    current: Option<ItemRef>,
    #[serde(default)]
    history: Vec<CompletedItem>,
}

impl ExecutionState {
    /// Fresh state for a plan.
    pub fn new(plan: ResolvedPlan, project: impl Into<PathBuf>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            project: project.into(),
            started_at: Utc::now(),
            finished_at: None,
            plan,
            current: None,
            history: Vec::new(),
        }
    }

    pub fn plan(&self) -> &ResolvedPlan {
        &self.plan
    }

    pub fn current(&self) -> Option<ItemRef> {
        self.current
    }

    pub fn history(&self) -> &[CompletedItem] {
        &self.history
    }

    fn item(&self, at: ItemRef) -> Option<&ChecklistItem> {
        self.plan
            .ordered_workflow_instances
            .get(at.workflow)?
            .phases
            .get(at.phase)?
            .items()
            .get(at.item)
    }

    fn item_mut(&mut self, at: ItemRef) -> Option<&mut ChecklistItem> {
        self.plan
            .ordered_workflow_instances
            .get_mut(at.workflow)?
            .phases
            .get_mut(at.phase)?
            .items_mut()
            .get_mut(at.item)
    }

    /// Every item position in plan order.
    fn positions(&self) -> impl Iterator<Item = (ItemRef, &ChecklistItem)> {
        self.plan.ordered_workflow_instances.iter().enumerate().flat_map(|(w, instance)| {
            instance.phases.iter().enumerate().flat_map(move |(p, phase)| {
                phase
                    .items()
                    .iter()
                    .enumerate()
                    .map(move |(i, item)| (ItemRef { workflow: w, phase: p, item: i }, item))
            })
        })
    }

    /// Check the single-in-progress invariant against `current`.
    fn validate(&self) -> Result<(), String> {
        let in_progress: Vec<ItemRef> = self
            .positions()
            .filter(|(_, item)| item.status() == ItemStatus::InProgress)
            .map(|(at, _)| at)
            .collect();

        match (in_progress.as_slice(), self.current) {
            ([], None) => Ok(()),
            ([only], Some(current)) if *only == current => Ok(()),
            ([], Some(current)) => Err(format!(
                "current item {current:?} is not in progress"
            )),
            ([_], _) => Err("in-progress item does not match the recorded current item".to_string()),
            (many, _) => Err(format!("{} items are in progress at once", many.len())),
        }
    }
}

/// Result of running the gates of one workflow instance.
#[derive(Debug, Clone)]
pub struct GateReport {
    pub workflow: String,
    pub results: Vec<(PhaseKind, GateResult)>,
}

impl GateReport {
    pub fn is_pass(&self) -> bool {
        self.results.iter().all(|(_, r)| r.is_pass())
    }

    /// Turn a failed report into `GateCheckFailed`.
    pub fn into_result(self) -> EngineResult<Self> {
        if let Some((_, failed)) = self.results.iter().find(|(_, r)| !r.is_pass()) {
            failed.clone().into_result()?;
        }
        Ok(self)
    }
}

/// Read-only view of the session for display.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub session_id: Uuid,
    pub project: PathBuf,
    pub started_at: DateTime<Utc>,
    pub current: Option<CurrentItem>,
    pub done: usize,
    pub total: usize,
    pub finished: bool,
    pub workflows: Vec<WorkflowProgress>,
}

/// The item in progress.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentItem {
    pub id: ItemId,
    pub description: String,
    pub workflow: String,
    pub phase: PhaseKind,
}

/// Progress of one workflow instance.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowProgress {
    pub name: String,
    pub version: String,
    pub complete: bool,
    pub phases: Vec<PhaseProgress>,
}

/// Progress of one phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseProgress {
    pub kind: PhaseKind,
    pub done: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateStatus>,
}

/// Drives a single session's state machine.
#[derive(Debug)]
pub struct ExecutionTracker {
    state: ExecutionState,
}

impl ExecutionTracker {
    /// Start tracking a freshly resolved plan.
    pub fn new(plan: ResolvedPlan, project: impl Into<PathBuf>) -> Self {
        let state = ExecutionState::new(plan, project);
        tracing::info!(session = %state.session_id, items = state.plan.item_count(), "Session started");
        Self { state }
    }

    /// Resume from persisted state, re-checking its invariants.
    pub fn from_state(state: ExecutionState) -> EngineResult<Self> {
        state.validate().map_err(|reason| EngineError::CorruptState {
            path: state.project.clone(),
            reason,
        })?;
        Ok(Self { state })
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn into_state(self) -> ExecutionState {
        self.state
    }

    pub fn project(&self) -> &Path {
        &self.state.project
    }

    /// The item in progress, if any.
    pub fn current_item(&self) -> Option<&ChecklistItem> {
        self.state.current.and_then(|at| self.state.item(at))
    }

    /// Every phase of every workflow is complete.
    pub fn is_finished(&self) -> bool {
        self.state.plan.ordered_workflow_instances.iter().all(WorkflowInstance::is_complete)
    }

    /// Begin the next pending item in plan order.
    pub fn start_next(&mut self) -> EngineResult<&ChecklistItem> {
        if let Some(current) = self.current_item() {
            return Err(EngineError::AlreadyInProgress(current.id().clone()));
        }

        let at = self
            .state
            .positions()
            .find(|(_, item)| item.status() == ItemStatus::Pending)
            .map(|(at, _)| at)
            .ok_or(EngineError::NothingPending)?;

        let item = self.item_at(at)?;
        item.begin()?;
        tracing::info!(item = %item.id(), "Started item");
        self.state.current = Some(at);

        self.state.item(at).ok_or_else(|| missing(at))
    }

    /// Finish the item in progress.
    ///
    /// Items of a COMMIT phase can only be completed while every gate of
    /// their workflow last passed.
    pub fn complete_current(&mut self) -> EngineResult<ChecklistItem> {
        let at = self.state.current.ok_or(EngineError::NoActiveItem)?;
        self.ensure_commit_allowed(at)?;

        let item = self.item_at(at)?;
        let id = item.id().clone();
        item.mark_done(Some(&id))?;
        let done = item.clone();

        self.state.current = None;
        self.state.history.push(CompletedItem {
            id: done.id().clone(),
            description: done.description().to_string(),
            completed_at: Utc::now(),
        });
        tracing::info!(item = %done.id(), "Completed item");

        self.refresh_finished();
        Ok(done)
    }

    /// Put the item in progress back to Pending.
    pub fn abandon_current(&mut self) -> EngineResult<ChecklistItem> {
        let at = self.state.current.ok_or(EngineError::NoActiveItem)?;
        let item = self.item_at(at)?;
        item.release()?;
        let released = item.clone();
        self.state.current = None;
        tracing::info!(item = %released.id(), "Abandoned item");
        Ok(released)
    }

    /// Run the gates of one workflow instance in phase order.
    ///
    /// Without a name, the workflow of the current item is used, else the
    /// first workflow that is not complete. Stops at the first failing gate.
    pub fn run_gates(
        &mut self,
        workflow: Option<&str>,
        runner: &mut dyn CheckRunner,
    ) -> EngineResult<GateReport> {
        let index = self.gate_target(workflow)?;
        let instance = &mut self.state.plan.ordered_workflow_instances[index];
        let mut results = Vec::new();

        for phase in &mut instance.phases {
            if phase.gate().is_none() {
                continue;
            }
            let result = phase.run_gate(runner);
            let failed = !result.is_pass();
            results.push((phase.kind(), result));
            if failed {
                break;
            }
        }

        let report = GateReport { workflow: instance.name.clone(), results };
        tracing::info!(workflow = %report.workflow, pass = report.is_pass(), "Gates finished");

        self.refresh_finished();
        Ok(report)
    }

    /// Summary for display.
    pub fn status(&self) -> StatusSnapshot {
        let current = self.state.current.and_then(|at| {
            let instance = self.state.plan.ordered_workflow_instances.get(at.workflow)?;
            let phase = instance.phases.get(at.phase)?;
            let item = phase.items().get(at.item)?;
            Some(CurrentItem {
                id: item.id().clone(),
                description: item.description().to_string(),
                workflow: instance.name.clone(),
                phase: phase.kind(),
            })
        });

        let workflows = self
            .state
            .plan
            .ordered_workflow_instances
            .iter()
            .map(|w| WorkflowProgress {
                name: w.name.clone(),
                version: w.version.clone(),
                complete: w.is_complete(),
                phases: w
                    .phases
                    .iter()
                    .map(|p| PhaseProgress {
                        kind: p.kind(),
                        done: p.done_count(),
                        total: p.items().len(),
                        gate: p.gate().map(|_| p.gate_status().clone()),
                    })
                    .collect(),
            })
            .collect();

        StatusSnapshot {
            session_id: self.state.session_id,
            project: self.state.project.clone(),
            started_at: self.state.started_at,
            current,
            done: self.state.positions().filter(|(_, i)| i.is_done()).count(),
            total: self.state.plan.item_count(),
            finished: self.is_finished(),
            workflows,
        }
    }

    fn item_at(&mut self, at: ItemRef) -> EngineResult<&mut ChecklistItem> {
        self.state.item_mut(at).ok_or_else(|| missing(at))
    }

    fn ensure_commit_allowed(&self, at: ItemRef) -> EngineResult<()> {
        let instance = &self.state.plan.ordered_workflow_instances[at.workflow];
        if instance.phases[at.phase].kind() != PhaseKind::Commit {
            return Ok(());
        }

        match instance.first_red_gate() {
            None => Ok(()),
            Some(phase) => {
                let reason = match phase.gate_status() {
                    GateStatus::Fail { check, reason } => {
                        format!("{} gate failed on '{check}' ({reason})", phase.kind())
                    }
                    _ => format!("{} gate has not passed yet", phase.kind()),
                };
                Err(EngineError::CommitBlocked { workflow: instance.name.clone(), reason })
            }
        }
    }

    fn gate_target(&self, workflow: Option<&str>) -> EngineResult<usize> {
        let instances = &self.state.plan.ordered_workflow_instances;
        if let Some(name) = workflow {
            return instances.iter().position(|w| w.name == name).ok_or_else(|| {
                EngineError::InvalidTransition(format!("workflow '{name}' is not part of this plan"))
            });
        }
        if let Some(at) = self.state.current {
            return Ok(at.workflow);
        }
        instances.iter().position(|w| !w.is_complete()).ok_or(EngineError::NothingPending)
    }

    fn refresh_finished(&mut self) {
        if self.state.finished_at.is_none() && self.is_finished() {
            self.state.finished_at = Some(Utc::now());
            tracing::info!(session = %self.state.session_id, "All workflows complete");
        }
    }
}

fn missing(at: ItemRef) -> EngineError {
    EngineError::InvalidTransition(format!("no item at {at:?}"))
}
