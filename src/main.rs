//! Redgreen - gated TDD workflow playbooks for your project.
//!
//! Composes workflow documents by technology tag and walks the resulting
//! plan one checklist item at a time.

#![allow(clippy::single_match_else)]

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use redgreen::core::Config;
use redgreen::workflow::{
    ChecklistItem, CompositionRequest, EngineError, ExecutionTracker, GateReport, ItemStatus,
    ResolvedPlan, Resolver, ShellCheckRunner, StateStore, StatusSnapshot, WorkflowCatalog,
    WorkflowDocument,
};

/// Environment variable holding the log filter.
const LOG_ENV: &str = "REDGREEN_LOG";

/// Gated RED-GREEN-REFACTOR-COMMIT workflows for your project
#[derive(Parser)]
#[command(name = "redgreen")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project directory (defaults to the current directory)
    #[arg(long, global = true, value_name = "DIR")]
    project: Option<PathBuf>,

    /// Workflow directory to search, replacing the configured ones
    #[arg(long = "workflows", global = true, value_name = "DIR")]
    workflows: Vec<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the ordered plan for a set of technology tags
    Resolve {
        /// Technology tags or workflow names
        #[arg(required = true)]
        tags: Vec<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Start a session for the project
    Start {
        /// Technology tags or workflow names
        #[arg(required = true)]
        tags: Vec<String>,

        /// Replace an existing session
        #[arg(short, long)]
        force: bool,
    },

    /// Begin the next pending checklist item
    Next,

    /// Complete the item in progress
    Done,

    /// Put the item in progress back on the list
    Abandon,

    /// Show session progress
    Status {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Run validation gates
    Gate {
        /// Workflow whose gates to run (defaults to the one being worked on)
        #[arg(short, long)]
        workflow: Option<String>,
    },

    /// List available workflows
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Check workflow documents for problems
    Validate {
        /// Files to check (defaults to the whole catalog)
        files: Vec<PathBuf>,
    },

    /// Write a new workflow document from a template
    New {
        /// Workflow name
        name: String,

        /// Directory to write into (defaults to the first workflow directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Technology tags
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Workflows this one builds on
        #[arg(long, value_delimiter = ',')]
        depends_on: Vec<String>,
    },

    /// Discard the project's session
    Reset,

    /// Show configuration
    Config {
        /// Show the configuration directory instead
        #[arg(short, long)]
        path: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

/// Resolved project, configuration and workflow directories.
struct Workspace {
    project: PathBuf,
    config: Config,
    workflow_dirs: Vec<PathBuf>,
}

impl Workspace {
    fn open(project: Option<&Path>, workflows: &[PathBuf]) -> Result<Self> {
        let project = match project {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir().context("Failed to read current directory")?,
        };
        let project = project
            .canonicalize()
            .with_context(|| format!("Project directory {} not found", project.display()))?;

        let config = Config::load(&project)?;
        let workflow_dirs = if workflows.is_empty() {
            config.workflow_dirs(&project)
        } else {
            workflows.to_vec()
        };
        tracing::debug!(project = ?project, dirs = ?workflow_dirs, "Opened workspace");

        Ok(Self { project, config, workflow_dirs })
    }

    fn catalog(&self) -> Result<WorkflowCatalog> {
        Ok(WorkflowCatalog::discover(&self.workflow_dirs, self.config.general.max_depth)?)
    }

    fn store(&self) -> Result<StateStore> {
        Ok(StateStore::new(self.config.state_dir(&self.project)?))
    }

    fn runner(&self) -> ShellCheckRunner {
        ShellCheckRunner::new(&self.project, self.config.checks.clone())
            .timeout(Duration::from_secs(self.config.gate.timeout_secs))
            .shell(self.config.gate.shell.clone())
    }

    fn resolve(&self, tags: &[String]) -> Result<ResolvedPlan> {
        let catalog = self.catalog()?;
        Ok(Resolver::new(&catalog).resolve(&CompositionRequest::new(tags))?)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            let code = e.downcast_ref::<EngineError>().map_or(1, EngineError::exit_code);
            ExitCode::from(code)
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    // Commands that need no project.
    match &cli.command {
        Commands::Completions { shell } => {
            cmd_completions(*shell);
            return Ok(());
        }
        _ => {}
    }

    let ws = Workspace::open(cli.project.as_deref(), &cli.workflows)?;

    match cli.command {
        Commands::Resolve { tags, format } => cmd_resolve(&ws, &tags, format),
        Commands::Start { tags, force } => cmd_start(&ws, &tags, force),
        Commands::Next => cmd_next(&ws),
        Commands::Done => cmd_done(&ws),
        Commands::Abandon => cmd_abandon(&ws),
        Commands::Status { format } => cmd_status(&ws, format),
        Commands::Gate { workflow } => cmd_gate(&ws, workflow.as_deref()),
        Commands::List { format } => cmd_list(&ws, format),
        Commands::Validate { files } if files.is_empty() => cmd_validate_catalog(&ws),
        Commands::Validate { files } => cmd_validate_files(&ws, &files),
        Commands::New { name, dir, tags, depends_on } => {
            cmd_new(&ws, &name, dir.as_deref(), &tags, &depends_on)
        }
        Commands::Reset => cmd_reset(&ws),
        Commands::Config { path } => cmd_config(&ws, path),
        Commands::Completions { .. } => Ok(()),
    }
}

/// Print the plan for a set of tags.
fn cmd_resolve(ws: &Workspace, tags: &[String], format: Format) -> Result<()> {
    let plan = ws.resolve(tags)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        Format::Text => print_plan(&plan),
    }
    Ok(())
}

fn print_plan(plan: &ResolvedPlan) {
    let requested: Vec<&str> = plan.requested_tags.iter().map(|t| t.as_str()).collect();

    if plan.is_empty() {
        println!("No workflows match: {}", requested.join(", "));
        return;
    }

    println!("Plan for: {}", requested.join(", "));
    println!();
    for (i, instance) in plan.ordered_workflow_instances.iter().enumerate() {
        let phases: Vec<String> = instance.phases.iter().map(|p| p.kind().to_string()).collect();
        println!(
            "  {}. {} {} ({} items; {})",
            i + 1,
            instance.name,
            instance.version,
            instance.item_count(),
            phases.join(" > ")
        );
    }

    if !plan.unmatched_tags.is_empty() {
        let unmatched: Vec<&str> = plan.unmatched_tags.iter().map(|t| t.as_str()).collect();
        println!();
        println!("Unmatched tags: {}", unmatched.join(", "));
    }
    println!();
    println!("Total: {} workflows, {} items", plan.len(), plan.item_count());
}

/// Open a session for the project.
fn cmd_start(ws: &Workspace, tags: &[String], force: bool) -> Result<()> {
    let store = ws.store()?;
    if !force && store.path_for(&ws.project).exists() {
        return Err(EngineError::SessionExists(ws.project.clone()).into());
    }

    let plan = ws.resolve(tags)?;
    if plan.is_empty() {
        anyhow::bail!("No workflows match: {}", tags.join(", "));
    }

    print_plan(&plan);
    let tracker = ExecutionTracker::new(plan, &ws.project);
    let path = store.save(&tracker)?;
    tracing::debug!(path = ?path, "Session written");

    println!();
    println!("Session {} started. Run `redgreen next` to begin.", tracker.state().session_id);
    Ok(())
}

/// Begin the next pending item.
fn cmd_next(ws: &Workspace) -> Result<()> {
    let store = ws.store()?;
    let mut tracker = store.require(&ws.project)?;

    let item = tracker.start_next()?.clone();
    store.save(&tracker)?;

    print_item(&item);
    Ok(())
}

/// Complete the item in progress.
fn cmd_done(ws: &Workspace) -> Result<()> {
    let store = ws.store()?;
    let mut tracker = store.require(&ws.project)?;

    let item = tracker.complete_current()?;
    print_item(&item);
    finish_or_save(&store, &tracker)
}

/// Release the item in progress.
fn cmd_abandon(ws: &Workspace) -> Result<()> {
    let store = ws.store()?;
    let mut tracker = store.require(&ws.project)?;

    let item = tracker.abandon_current()?;
    store.save(&tracker)?;

    print_item(&item);
    Ok(())
}

/// Run validation gates and record their outcome.
fn cmd_gate(ws: &Workspace, workflow: Option<&str>) -> Result<()> {
    let store = ws.store()?;
    let mut tracker = store.require(&ws.project)?;
    let mut runner = ws.runner();

    let report = tracker.run_gates(workflow, &mut runner)?;
    print_gate_report(&report);
    finish_or_save(&store, &tracker)?;

    report.into_result()?;
    Ok(())
}

/// Persist the session, or remove it once every workflow is complete.
fn finish_or_save(store: &StateStore, tracker: &ExecutionTracker) -> Result<()> {
    if tracker.is_finished() {
        store.remove(tracker.project())?;
        println!();
        println!("All workflows complete. Session closed.");
    } else {
        store.save(tracker)?;
    }
    Ok(())
}

fn print_item(item: &ChecklistItem) {
    println!("{} {}  {}", item.status().marker(), item.id(), item.description());
}

fn print_gate_report(report: &GateReport) {
    if report.results.is_empty() {
        println!("{}: no gates to run", report.workflow);
        return;
    }

    for (kind, result) in &report.results {
        match &result.failure {
            None => println!(
                "{} {} gate: pass ({}) in {:.2}s",
                report.workflow,
                kind,
                result.passed.join(", "),
                result.duration.as_secs_f64()
            ),
            Some(failure) => println!(
                "{} {} gate: FAIL on '{}': {}",
                report.workflow, kind, failure.check, failure.reason
            ),
        }
    }
}

/// Show session progress.
fn cmd_status(ws: &Workspace, format: Format) -> Result<()> {
    let store = ws.store()?;
    let tracker = store.require(&ws.project)?;
    let status = tracker.status();

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        Format::Text => print_status(&status),
    }
    Ok(())
}

fn print_status(status: &StatusSnapshot) {
    println!("Session {} for {}", status.session_id, status.project.display());
    println!("Started {}", status.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Progress: {}/{} items", status.done, status.total);
    match &status.current {
        Some(current) => println!(
            "Current: {} {}  {}",
            ItemStatus::InProgress.marker(),
            current.id,
            current.description
        ),
        None => println!("Current: none"),
    }

    for workflow in &status.workflows {
        println!();
        let mark = if workflow.complete { " (complete)" } else { "" };
        println!("{} {}{}", workflow.name, workflow.version, mark);
        for phase in &workflow.phases {
            let gate = phase.gate.as_ref().map(|g| format!("  gate: {g}")).unwrap_or_default();
            println!("  {:<9} {}/{}{}", phase.kind.to_string(), phase.done, phase.total, gate);
        }
    }
}

/// List the catalog.
fn cmd_list(ws: &Workspace, format: Format) -> Result<()> {
    let catalog = ws.catalog()?;

    match format {
        Format::Json => {
            let entries: Vec<_> = catalog
                .iter()
                .map(|doc| {
                    serde_json::json!({
                        "name": doc.name(),
                        "version": doc.version(),
                        "description": doc.description(),
                        "tags": doc.applicable_stacks(),
                        "depends_on": doc.depends_on(),
                        "source": doc.source(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Format::Text => {
            for doc in catalog.iter() {
                let tags: Vec<&str> = doc.applicable_stacks().iter().map(|t| t.as_str()).collect();
                print!("{} {}  [{}]", doc.name(), doc.version(), tags.join(", "));
                if !doc.depends_on().is_empty() {
                    let deps: Vec<&str> = doc.depends_on().iter().map(String::as_str).collect();
                    print!("  depends on: {}", deps.join(", "));
                }
                println!();
            }
            println!("\nTotal: {} workflows", catalog.len());
        }
    }
    Ok(())
}

/// Parse individual files and check their dependencies against the catalog.
fn cmd_validate_files(ws: &Workspace, files: &[PathBuf]) -> Result<()> {
    let mut given = Vec::new();
    let mut first_error = None;

    for path in files {
        match WorkflowDocument::load(path) {
            Ok(doc) => given.push(doc),
            Err(e) => {
                eprintln!("error {e}");
                first_error.get_or_insert(e);
            }
        }
    }
    if let Some(e) = first_error {
        for doc in &given {
            println!("ok    {} ({})", doc.name(), doc.source().display());
        }
        return Err(e.into());
    }

    // Dependencies are checked against the project's catalog, with the
    // given files standing in for any catalog entry of the same name.
    let discovered = ws.catalog()?;
    let replaced: HashSet<&str> = given.iter().map(WorkflowDocument::name).collect();
    let siblings: Vec<WorkflowDocument> =
        discovered.iter().filter(|doc| !replaced.contains(doc.name())).cloned().collect();
    let catalog = WorkflowCatalog::from_documents(siblings.into_iter().chain(given.iter().cloned()))?;
    Resolver::new(&catalog).order(&CompositionRequest::new(catalog.names()))?;

    for doc in &given {
        println!("ok    {} ({})", doc.name(), doc.source().display());
    }
    Ok(())
}

/// Load the whole catalog and check that it can be ordered.
fn cmd_validate_catalog(ws: &Workspace) -> Result<()> {
    let catalog = ws.catalog()?;
    let everything = CompositionRequest::new(catalog.names());
    Resolver::new(&catalog).order(&everything)?;

    for doc in catalog.iter() {
        println!("ok    {} ({})", doc.name(), doc.source().display());
    }
    println!("\n{} workflows, no problems found", catalog.len());
    Ok(())
}

/// Write a template document.
fn cmd_new(
    ws: &Workspace,
    name: &str,
    dir: Option<&Path>,
    tags: &[String],
    depends_on: &[String],
) -> Result<()> {
    let dir = match dir {
        Some(dir) => dir.to_path_buf(),
        None => ws
            .workflow_dirs
            .first()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No workflow directory configured; pass --dir"))?,
    };

    let path = dir.join(format!("{name}.md"));
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }

    let content = WorkflowDocument::template(name, tags, depends_on);
    WorkflowDocument::parse(&path, &content)?;

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Created {}", path.display());
    Ok(())
}

/// Remove the session file.
fn cmd_reset(ws: &Workspace) -> Result<()> {
    if ws.store()?.remove(&ws.project)? {
        println!("Session for {} removed", ws.project.display());
    } else {
        println!("No session for {}", ws.project.display());
    }
    Ok(())
}

/// Show configuration.
fn cmd_config(ws: &Workspace, show_path: bool) -> Result<()> {
    if show_path {
        if let Some(path) = Config::config_dir() {
            println!("{}", path.display());
        }
        return Ok(());
    }

    let toml = toml::to_string_pretty(&ws.config)?;
    println!("{toml}");
    Ok(())
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "redgreen", &mut io::stdout());
}
