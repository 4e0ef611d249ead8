//! Composition resolver.
//!
//! Turns a set of requested tags into a dependency-ordered plan:
//!
//! 1. select every document whose tags (or name) match the request
//! 2. pull in the transitive `depends_on` closure of the selection
//! 3. reject dependency cycles
//! 4. topologically sort, always emitting the alphabetically smallest
//!    ready workflow first
//!
//! The tie-break makes the plan a pure function of the catalog and the
//! request. For `{python, sqlite}` with `python-service -> python-development`
//! the order is `python-development, python-service, sqlite-development`.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};

use super::catalog::WorkflowCatalog;
use super::document::{Tag, WorkflowDocument, WorkflowInstance};
use super::error::{EngineError, EngineResult};

/// A request for the workflows covering a stack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositionRequest {
    requested_tags: BTreeSet<Tag>,
}

impl CompositionRequest {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            requested_tags: tags
                .into_iter()
                .map(|t| Tag::new(t.as_ref()))
                .filter(|t| !t.as_str().is_empty())
                .collect(),
        }
    }

    pub fn tags(&self) -> &BTreeSet<Tag> {
        &self.requested_tags
    }
}

/// Dependency-ordered workflow instances for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPlan {
    /// Tags the plan was resolved for
    pub requested_tags: Vec<Tag>,

    /// Requested tags that selected no workflow
    #[serde(default)]
    pub unmatched_tags: Vec<Tag>,

    /// Instances, every dependency before its dependents
    pub ordered_workflow_instances: Vec<WorkflowInstance>,
}

impl ResolvedPlan {
    /// Workflow names in plan order.
    pub fn names(&self) -> Vec<&str> {
        self.ordered_workflow_instances.iter().map(|w| w.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.ordered_workflow_instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered_workflow_instances.is_empty()
    }

    pub fn instance(&self, name: &str) -> Option<&WorkflowInstance> {
        self.ordered_workflow_instances.iter().find(|w| w.name == name)
    }

    /// Total number of checklist items across the plan.
    pub fn item_count(&self) -> usize {
        self.ordered_workflow_instances.iter().map(WorkflowInstance::item_count).sum()
    }
}

/// Resolves composition requests against a catalog.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    catalog: &'a WorkflowCatalog,
}

impl<'a> Resolver<'a> {
    pub fn new(catalog: &'a WorkflowCatalog) -> Self {
        Self { catalog }
    }

    /// Resolve a request into a plan of fresh instances.
    pub fn resolve(&self, request: &CompositionRequest) -> EngineResult<ResolvedPlan> {
        let unmatched: Vec<Tag> = request
            .tags()
            .iter()
            .filter(|tag| !self.catalog.iter().any(|d| d.is_selected_by([*tag])))
            .cloned()
            .collect();
        if !unmatched.is_empty() {
            tracing::warn!(
                tags = %unmatched.iter().map(Tag::as_str).collect::<Vec<_>>().join(", "),
                "Requested tags match no workflow"
            );
        }

        let ordered = self.order(request)?;
        let plan = ResolvedPlan {
            requested_tags: request.tags().iter().cloned().collect(),
            unmatched_tags: unmatched,
            ordered_workflow_instances: ordered.iter().map(|d| d.instantiate()).collect(),
        };

        tracing::info!(workflows = ?plan.names(), "Resolved plan");
        Ok(plan)
    }

    /// The selected documents in dependency order.
    pub fn order(&self, request: &CompositionRequest) -> EngineResult<Vec<&'a WorkflowDocument>> {
        let selected: Vec<&WorkflowDocument> =
            self.catalog.iter().filter(|d| d.is_selected_by(request.tags())).collect();
        let nodes = self.closure(&selected)?;
        self.topological_order(&nodes)
    }

    /// Selected documents plus everything they transitively depend on.
    fn closure(
        &self,
        selected: &[&'a WorkflowDocument],
    ) -> EngineResult<BTreeMap<&'a str, &'a WorkflowDocument>> {
        let mut nodes = BTreeMap::new();
        let mut stack: Vec<&WorkflowDocument> = selected.to_vec();

        while let Some(doc) = stack.pop() {
            if nodes.insert(doc.name(), doc).is_some() {
                continue;
            }
            for dep in doc.depends_on() {
                let dep_doc = self.catalog.get(dep).ok_or_else(|| {
                    EngineError::malformed(doc.source(), format!("depends on unknown workflow '{dep}'"))
                })?;
                if !nodes.contains_key(dep_doc.name()) {
                    tracing::debug!(workflow = doc.name(), dependency = dep_doc.name(), "Pulling in dependency");
                    stack.push(dep_doc);
                }
            }
        }

        Ok(nodes)
    }

    /// Kahn's algorithm with an alphabetical ready set.
    fn topological_order(
        &self,
        nodes: &BTreeMap<&'a str, &'a WorkflowDocument>,
    ) -> EngineResult<Vec<&'a WorkflowDocument>> {
        let mut remaining: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for (&name, doc) in nodes {
            remaining.insert(name, doc.depends_on().len());
            for dep in doc.depends_on() {
                dependents.entry(dep.as_str()).or_default().push(name);
            }
        }

        let mut ready: BTreeSet<&str> =
            remaining.iter().filter(|(_, n)| **n == 0).map(|(name, _)| *name).collect();
        let mut order = Vec::with_capacity(nodes.len());

        while let Some(name) = ready.pop_first() {
            order.push(nodes[name]);
            for &dependent in dependents.get(name).into_iter().flatten() {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if order.len() < nodes.len() {
            let emitted: BTreeSet<&str> = order.iter().map(|d| d.name()).collect();
            let leftover: Vec<&WorkflowDocument> =
                nodes.values().copied().filter(|d| !emitted.contains(d.name())).collect();
            return Err(EngineError::CyclicDependency(cycle_members(&leftover)));
        }

        Ok(order)
    }
}

/// Names of the workflows that sit on a dependency cycle.
///
/// `docs` may also contain workflows that merely depend on a cycle; those
/// are not reported.
fn cycle_members(docs: &[&WorkflowDocument]) -> Vec<String> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for doc in docs {
        graph.add_node(doc.name());
    }
    for doc in docs {
        for dep in doc.depends_on() {
            if graph.contains_node(dep.as_str()) {
                graph.add_edge(doc.name(), dep.as_str(), ());
            }
        }
    }

    let mut members: Vec<String> = tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .flatten()
        .map(str::to_string)
        .collect();
    members.sort();
    members
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn doc(name: &str, tags: &[&str], deps: &[&str]) -> WorkflowDocument {
        let content = format!(
            "---\nname: {name}\ntags: [{}]\ndepends_on: [{}]\n---\n## RED\n- [ ] write test\n## COMMIT\n- [ ] commit\n",
            tags.join(", "),
            deps.join(", ")
        );
        WorkflowDocument::parse(Path::new(&format!("{name}.md")), &content).unwrap()
    }

    fn stack_catalog() -> WorkflowCatalog {
        WorkflowCatalog::from_documents(vec![
            doc("python-development", &["python"], &[]),
            doc("python-service", &["python", "service"], &["python-development"]),
            doc("sqlite-development", &["sqlite"], &[]),
            doc("postgresql-development", &["postgresql"], &["python-development"]),
            doc("observability", &["observability"], &["python-service"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_python_sqlite_order() {
        let catalog = stack_catalog();
        let plan = Resolver::new(&catalog)
            .resolve(&CompositionRequest::new(["python", "sqlite"]))
            .unwrap();
        assert_eq!(plan.names(), vec!["python-development", "python-service", "sqlite-development"]);
        assert!(plan.unmatched_tags.is_empty());
    }

    #[test]
    fn test_dependencies_pulled_in_implicitly() {
        let catalog = stack_catalog();
        let plan = Resolver::new(&catalog)
            .resolve(&CompositionRequest::new(["observability"]))
            .unwrap();
        assert_eq!(plan.names(), vec!["python-development", "python-service", "observability"]);
    }

    #[test]
    fn test_request_by_name() {
        let catalog = stack_catalog();
        let plan = Resolver::new(&catalog)
            .resolve(&CompositionRequest::new(["python-service"]))
            .unwrap();
        assert_eq!(plan.names(), vec!["python-development", "python-service"]);
    }

    #[test]
    fn test_shared_dependency_not_duplicated() {
        let catalog = stack_catalog();
        let plan = Resolver::new(&catalog)
            .resolve(&CompositionRequest::new(["Python", "PostgreSQL", "observability"]))
            .unwrap();
        assert_eq!(
            plan.names(),
            vec![
                "python-development",
                "postgresql-development",
                "python-service",
                "observability"
            ]
        );
    }

    #[test]
    fn test_every_dependency_precedes_dependent() {
        let catalog = stack_catalog();
        let plan = Resolver::new(&catalog)
            .resolve(&CompositionRequest::new(["python", "sqlite", "postgresql", "observability"]))
            .unwrap();
        let names = plan.names();
        for (i, name) in names.iter().enumerate() {
            for dep in catalog.get(name).unwrap().depends_on() {
                let j = names.iter().position(|n| n == dep).unwrap();
                assert!(j < i, "{dep} must precede {name}");
            }
        }
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let catalog = stack_catalog();
        let resolver = Resolver::new(&catalog);
        let request = CompositionRequest::new(["sqlite", "observability", "postgresql"]);
        let first = resolver.resolve(&request).unwrap();
        for _ in 0..10 {
            assert_eq!(resolver.resolve(&request).unwrap(), first);
        }
    }

    #[test]
    fn test_two_node_cycle() {
        let catalog =
            WorkflowCatalog::from_documents(vec![doc("a", &["x"], &["b"]), doc("b", &[], &["a"])])
                .unwrap();
        let err = Resolver::new(&catalog).resolve(&CompositionRequest::new(["x"])).unwrap_err();
        match err {
            EngineError::CyclicDependency(members) => assert_eq!(members, vec!["a", "b"]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_cycle_report_excludes_bystanders() {
        let catalog = WorkflowCatalog::from_documents(vec![
            doc("top", &["x"], &["c1"]),
            doc("c1", &[], &["c2"]),
            doc("c2", &[], &["c3"]),
            doc("c3", &[], &["c1"]),
            doc("fine", &["x"], &[]),
        ])
        .unwrap();
        let err = Resolver::new(&catalog).resolve(&CompositionRequest::new(["x"])).unwrap_err();
        match err {
            EngineError::CyclicDependency(members) => assert_eq!(members, vec!["c1", "c2", "c3"]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let catalog = WorkflowCatalog::from_documents(vec![doc("loop", &["x"], &["loop"])]).unwrap();
        let err = Resolver::new(&catalog).resolve(&CompositionRequest::new(["x"])).unwrap_err();
        assert!(matches!(err, EngineError::CyclicDependency(m) if m == vec!["loop"]));
    }

    #[test]
    fn test_cycle_outside_request_is_ignored() {
        let catalog = WorkflowCatalog::from_documents(vec![
            doc("a", &[], &["b"]),
            doc("b", &[], &["a"]),
            doc("ok", &["x"], &[]),
        ])
        .unwrap();
        let plan = Resolver::new(&catalog).resolve(&CompositionRequest::new(["x"])).unwrap();
        assert_eq!(plan.names(), vec!["ok"]);
    }

    #[test]
    fn test_unmatched_tags_reported() {
        let catalog = stack_catalog();
        let plan = Resolver::new(&catalog)
            .resolve(&CompositionRequest::new(["sqlite", "cobol", " "]))
            .unwrap();
        assert_eq!(plan.names(), vec!["sqlite-development"]);
        assert_eq!(plan.unmatched_tags, vec![Tag::new("cobol")]);
        assert_eq!(plan.requested_tags, vec![Tag::new("cobol"), Tag::new("sqlite")]);
    }

    #[test]
    fn test_instances_are_fresh() {
        let catalog = stack_catalog();
        let plan = Resolver::new(&catalog)
            .resolve(&CompositionRequest::new(["sqlite"]))
            .unwrap();
        assert_eq!(plan.item_count(), 2);
        assert_eq!(plan.instance("sqlite-development").unwrap().done_count(), 0);
    }
}
