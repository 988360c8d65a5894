//! Warden CLI - governance host for agent workspace actions.
//!
//! ```text
//! stdin (JSON lines) -> run -> Session::dispatch -> stdout (JSON outcome per line)
//! ```
//!
//! Logs go to a file, never to stdout: stdout carries machine-readable
//! results only.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::{
    collections::BTreeSet,
    fs::{self, OpenOptions},
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use warden_config::{STATE_DIR, user_state_dir};
use warden_core::{Action, ActionRequest, Session, WorkspaceExecutor};
use warden_types::{Contributor, IntentId, ResourcePath, TaskId};

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Intent-governed mutation control for agent workspaces")]
struct Cli {
    /// Workspace root
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List declared intents with their current status
    Intents,
    /// Print ledger entries as JSON lines
    History {
        /// Only entries touching this resource
        #[arg(long, conflicts_with = "intent")]
        resource: Option<String>,
        /// Only entries recorded under this intent
        #[arg(long)]
        intent: Option<String>,
    },
    /// Dispatch action requests read as JSON lines from stdin
    Run {
        /// Task id for requests that do not name one
        #[arg(long, default_value = "cli")]
        task: String,
        /// Model identifier recorded as the AI contributor
        #[arg(long)]
        model: Option<String>,
    },
    /// Mark an intent completed in the intent document
    Complete { id: String },
    /// Append a note to the project knowledge base
    Note {
        #[arg(long, default_value = "general")]
        category: String,
        text: String,
    },
}

/// One stdin line for `warden run`.
#[derive(Debug, Deserialize)]
struct RunLine {
    task: Option<TaskId>,
    action: Action,
    contributor: Option<Contributor>,
    #[serde(default)]
    intent_changed: bool,
}

/// Send tracing output to the first writable log file.
///
/// stdout is reserved for JSON results, so when no log file can be opened
/// events are filtered but not written anywhere.
fn init_tracing(root: &Path) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let mut failures = Vec::new();
    let sink = log_file_candidates(root)
        .into_iter()
        .find_map(|path| match open_append(&path) {
            Ok(file) => Some((path, file)),
            Err(err) => {
                failures.push(format!("{}: {err}", path.display()));
                None
            }
        });

    let Some((path, file)) = sink else {
        tracing_subscriber::registry().with(filter).init();
        return;
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .init();
    tracing::info!(log = %path.display(), "warden started");
    for failure in failures {
        tracing::warn!("Skipped log location {failure}");
    }
}

fn open_append(path: &Path) -> io::Result<fs::File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// `~/.warden/logs/warden.log`, then the same path under the workspace.
fn log_file_candidates(root: &Path) -> Vec<PathBuf> {
    let log = |base: PathBuf| base.join("logs").join("warden.log");
    user_state_dir()
        .into_iter()
        .chain([root.join(STATE_DIR)])
        .map(log)
        .collect()
}

fn print_json(out: &mut impl Write, value: &impl serde::Serialize) -> Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    out.write_all(b"\n")?;
    Ok(())
}

fn list_intents(session: &Session) -> Result<()> {
    let registry = session.registry();
    let intents = registry.list_intents()?;
    let mut out = io::stdout().lock();
    for intent in intents {
        let status = registry.status(&intent.id).unwrap_or(intent.status);
        print_json(
            &mut out,
            &serde_json::json!({
                "id": intent.id,
                "name": intent.display_name(),
                "status": status,
                "owned_scope": intent.owned_scope,
                "constraints": intent.constraints,
                "acceptance_criteria": intent.acceptance_criteria,
            }),
        )?;
    }
    Ok(())
}

fn history(session: &Session, resource: Option<&str>, intent: Option<&str>) -> Result<()> {
    let ledger = session.ledger();
    let entries: Box<dyn Iterator<Item = _>> = match (resource, intent) {
        (Some(raw), _) => {
            let resource = ResourcePath::from_workspace(raw, &session.settings().root)?;
            Box::new(ledger.query_by_resource(&resource)?)
        }
        (None, Some(raw)) => Box::new(ledger.query_by_intent(&IntentId::new(raw)?)?),
        (None, None) => Box::new(ledger.entries()?),
    };

    let mut out = io::stdout().lock();
    for entry in entries {
        print_json(&mut out, &entry)?;
    }
    Ok(())
}

async fn run(session: &Session, default_task: &str, model: Option<String>) -> Result<()> {
    let default_task = TaskId::new(default_task)?;
    let default_contributor = model.map_or_else(Contributor::default, Contributor::ai);
    let executor = WorkspaceExecutor::new(session.settings().root.clone());
    let mut tasks = BTreeSet::new();

    let stdin = io::stdin();
    let mut out = io::stdout().lock();
    for (idx, line) in stdin.lock().lines().enumerate() {
        let line = line.context("failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }

        let parsed: RunLine = match serde_json::from_str(&line) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(line = idx + 1, "Unparseable request: {err}");
                print_json(
                    &mut out,
                    &serde_json::json!({ "outcome": "error", "message": format!("line {}: {err}", idx + 1) }),
                )?;
                continue;
            }
        };

        let request = ActionRequest {
            task: parsed.task.unwrap_or_else(|| default_task.clone()),
            action: parsed.action,
            contributor: parsed
                .contributor
                .unwrap_or_else(|| default_contributor.clone()),
            intent_changed: parsed.intent_changed,
        };
        tasks.insert(request.task.clone());

        match session.dispatch(&request, &executor).await {
            Ok(outcome) => print_json(&mut out, &outcome)?,
            Err(err) => {
                tracing::error!(task = %request.task, action = %request.action.name, "Action failed: {err}");
                print_json(
                    &mut out,
                    &serde_json::json!({ "outcome": "error", "message": err.to_string() }),
                )?;
            }
        }
        out.flush()?;
    }

    for task in &tasks {
        session.end_task(task);
    }
    Ok(())
}

fn complete(session: &Session, raw: &str) -> Result<()> {
    let id = IntentId::new(raw)?;
    let registry = session.registry();
    registry.complete_intent(&id)?;
    registry.persist_status(&id)?;
    match registry.source_path() {
        Some(path) => println!("{id} marked completed in {}", path.display()),
        None => println!("{id} marked completed"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.root);

    let session = Session::open(&cli.root)
        .with_context(|| format!("failed to open workspace {}", cli.root.display()))?;

    match cli.command {
        Commands::Intents => list_intents(&session)?,
        Commands::History { resource, intent } => {
            history(&session, resource.as_deref(), intent.as_deref())?;
        }
        Commands::Run { task, model } => run(&session, &task, model).await?,
        Commands::Complete { id } => complete(&session, &id)?,
        Commands::Note { category, text } => {
            if text.trim().is_empty() {
                bail!("note text is empty");
            }
            session
                .knowledge()
                .append_note(&category, &text)
                .context("failed to append note")?;
        }
    }

    Ok(())
}
