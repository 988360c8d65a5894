//! Governance core for agent-driven workspace mutation.
//!
//! Every attempted action passes through the [`Pipeline`]:
//!
//! ```text
//! ActionRequest -> pre_check ─┬─> Blocked(Rejection)
//!                             └─> Permit -> ActionExecutor -> post_process -> ledger
//! ```
//!
//! - [`IntentRegistry`]: declared intents and the per-task active selection
//! - [`ConcurrencyTracker`]: read baselines for stale-write detection
//! - [`MutationLedger`]: append-only JSON-lines audit trail
//! - [`MutationClassifier`]: heuristic refactor/evolution labelling
//!
//! A [`Session`] wires these together from [`warden_config::Settings`].

pub mod action;
pub mod classifier;
pub mod executor;
pub mod knowledge;
pub mod ledger;
pub mod locks;
pub mod pipeline;
pub mod registry;
pub mod revision;
pub mod session;
pub mod store;
pub mod tracker;

pub use action::{Action, ActionCatalog, ActionError, ActionKind};
pub use classifier::{ClassificationInput, LineDeltaClassifier, MutationClassifier};
pub use executor::{
    ActionExecutor, ExecFut, ExecutionError, ExecutionReport, Expected, Precondition,
    WorkspaceExecutor,
};
pub use knowledge::{KnowledgeSink, NotesFile};
pub use ledger::{LedgerError, LedgerIter, MutationLedger, MutationRecord};
pub use locks::{HeldLocks, ResourceLocks};
pub use pipeline::{
    ActionOutcome, ActionRequest, Permit, PermittedTarget, Pipeline, PipelineError, Verdict,
};
pub use revision::current_revision;
pub use registry::{IntentRegistry, RegistryError, ScopeMatcher};
pub use session::{Session, SessionBuilder};
pub use store::{ResourceStore, WorkspaceStore};
pub use tracker::{ConcurrencyTracker, Freshness, Observation};
