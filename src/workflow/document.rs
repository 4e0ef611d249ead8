//! Workflow documents.
//!
//! A [`WorkflowDocument`] is an immutable template loaded from a Markdown
//! playbook. Projects never mutate templates; they work on a
//! [`WorkflowInstance`] cloned from one.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::checklist::{ChecklistItem, ItemId};
use super::error::{EngineError, EngineResult};
use super::gate::ValidationGate;
use super::parser::{parse_workflow, slugify};
use super::phase::{Phase, PhaseKind};

static WORKFLOW_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9._-]*$").unwrap());

/// Default version for documents that do not declare one.
pub const DEFAULT_VERSION: &str = "0.0.0";

/// A technology tag such as `python` or `postgresql`. Always lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Tag {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named, versioned playbook template.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDocument {
    name: String,
    version: String,
    description: Option<String>,
    applicable_stacks: BTreeSet<Tag>,
    depends_on: BTreeSet<String>,
    phases: Vec<Phase>,
    source: PathBuf,
}

impl WorkflowDocument {
    /// Load a document from disk.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(path, &content)
    }

    /// Parse a document from Markdown. `path` names the source in errors.
    ///
    /// References in `depends_on` are checked by
    /// [`WorkflowCatalog`](super::WorkflowCatalog), which knows the other
    /// documents.
    pub fn parse(path: &Path, content: &str) -> EngineResult<Self> {
        let parsed = parse_workflow(path, content)?;
        let front = parsed.front.unwrap_or_default();

        let name = match front.name {
            Some(name) => name.trim().to_lowercase(),
            None => parsed.title.as_deref().map(slugify).unwrap_or_default(),
        };
        if name.is_empty() {
            return Err(EngineError::malformed(path, "no `name` in front matter and no `# Title`"));
        }
        if !WORKFLOW_NAME.is_match(&name) {
            return Err(EngineError::malformed(path, format!("invalid workflow name '{name}'")));
        }

        let phases = parsed
            .phases
            .into_iter()
            .map(|p| {
                let items = p
                    .items
                    .into_iter()
                    .enumerate()
                    .map(|(i, text)| ChecklistItem::create(ItemId::new(&name, p.kind.slug(), i + 1), text))
                    .collect();
                Phase::new(p.kind, items, Some(ValidationGate::new(p.checks)))
            })
            .collect();

        let depends_on: BTreeSet<String> =
            front.depends_on.iter().map(|d| d.trim().to_lowercase()).filter(|d| !d.is_empty()).collect();

        let doc = Self {
            version: front
                .version
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            description: front.description,
            applicable_stacks: front.tags.iter().map(|t| Tag::new(t)).filter(|t| !t.0.is_empty()).collect(),
            depends_on,
            phases,
            source: path.to_path_buf(),
            name,
        };

        tracing::debug!(
            name = %doc.name,
            version = %doc.version,
            phases = doc.phases.len(),
            "Parsed workflow document"
        );

        Ok(doc)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn applicable_stacks(&self) -> &BTreeSet<Tag> {
        &self.applicable_stacks
    }

    pub fn depends_on(&self) -> &BTreeSet<String> {
        &self.depends_on
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Whether a request for `tags` selects this document, by tag or by name.
    pub fn is_selected_by<'a>(&self, tags: impl IntoIterator<Item = &'a Tag>) -> bool {
        tags.into_iter().any(|t| self.applicable_stacks.contains(t) || t.as_str() == self.name)
    }

    /// Fresh phase instances for a project.
    pub fn instantiate_for_project(&self) -> Vec<Phase> {
        self.phases.iter().map(Phase::instantiate).collect()
    }

    /// A project instance of this template.
    pub fn instantiate(&self) -> WorkflowInstance {
        WorkflowInstance {
            name: self.name.clone(),
            version: self.version.clone(),
            phases: self.instantiate_for_project(),
        }
    }

    /// Markdown skeleton for a new workflow document.
    pub fn template(name: &str, tags: &[String], depends_on: &[String]) -> String {
        let title = name
            .split(['-', '_'])
            .filter(|w| !w.is_empty())
            .map(|w| {
                let mut chars = w.chars();
                chars.next().map_or_else(String::new, |c| c.to_uppercase().chain(chars).collect())
            })
            .collect::<Vec<_>>()
            .join(" ");

        format!(
            r#"---
name: {name}
version: 0.1.0
tags: [{tags}]
depends_on: [{deps}]
---
# {title} Workflow

## RED

- [ ] Write a failing test for the next behaviour
- [ ] Run the test and confirm it fails for the right reason

## GREEN

- [ ] Write the minimum code to make the test pass
- [ ] Run the full test suite

### Gate

- test

## REFACTOR

- [ ] Remove duplication and improve names
- [ ] Keep the suite green after each change

### Gate

- format
- lint
- test

## COMMIT

- [ ] Review the diff
- [ ] Commit with a descriptive message
"#,
            tags = tags.join(", "),
            deps = depends_on.join(", "),
        )
    }
}

/// A project's working copy of a workflow document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub name: String,
    pub version: String,
    pub phases: Vec<Phase>,
}

impl WorkflowInstance {
    /// Every phase complete.
    pub fn is_complete(&self) -> bool {
        self.phases.iter().all(Phase::is_complete)
    }

    /// Total number of checklist items.
    pub fn item_count(&self) -> usize {
        self.phases.iter().map(|p| p.items().len()).sum()
    }

    /// Number of done items.
    pub fn done_count(&self) -> usize {
        self.phases.iter().map(Phase::done_count).sum()
    }

    pub fn phase(&self, kind: PhaseKind) -> Option<&Phase> {
        self.phases.iter().find(|p| p.kind() == kind)
    }

    /// First phase whose gate is not green, if any.
    pub fn first_red_gate(&self) -> Option<&Phase> {
        self.phases.iter().find(|p| !p.gate_is_green())
    }
}
