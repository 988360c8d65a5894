//! Interception pipeline: every agent action passes through here.
//!
//! ```text
//! Received -> PreChecking -+-> Blocked
//!                          +-> Executing -> PostProcessing -> Completed
//! ```
//!
//! Pre-checks for a mutating action run in a fixed order: active intent,
//! then scope, then freshness. The first failure wins and nothing is
//! recorded. Locks for every target are held from the freshness check
//! until the ledger entries are written.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use warden_config::{EnforcementMode, Settings, UnresolvedTargetPolicy};
use warden_types::{
    ContentRange, Contributor, Intent, IntentId, LedgerEntry, Rejection, ResourcePath, TaskId,
};
use warden_utils::{changed_line_ranges, fingerprint, fingerprint_lines, line_count};

use crate::action::{Action, ActionCatalog, ActionError, ActionKind};
use crate::classifier::{ClassificationInput, MutationClassifier};
use crate::executor::{ActionExecutor, ExecutionError, Expected, Precondition};
use crate::ledger::{LedgerError, MutationLedger, MutationRecord};
use crate::locks::ResourceLocks;
use crate::registry::{IntentRegistry, RegistryError};
use crate::revision::current_revision;
use crate::store::ResourceStore;
use crate::tracker::{ConcurrencyTracker, Freshness};

/// One attempted action from one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub task: TaskId,
    pub action: Action,
    #[serde(default)]
    pub contributor: Contributor,
    /// Caller-supplied signal that the intent's acceptance criteria changed.
    #[serde(default)]
    pub intent_changed: bool,
}

impl ActionRequest {
    #[must_use]
    pub fn new(task: TaskId, action: Action) -> Self {
        Self {
            task,
            action,
            contributor: Contributor::default(),
            intent_changed: false,
        }
    }

    #[must_use]
    pub fn with_contributor(mut self, contributor: Contributor) -> Self {
        self.contributor = contributor;
        self
    }

    #[must_use]
    pub fn with_intent_changed(mut self, changed: bool) -> Self {
        self.intent_changed = changed;
        self
    }
}

/// Result reported back to the calling agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    IntentSelected { intent: Intent },
    Blocked(Rejection),
    Executed { output: String },
    Mutated {
        output: String,
        entries: Vec<LedgerEntry>,
    },
}

impl ActionOutcome {
    #[must_use]
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Blocked(rejection) => Some(rejection),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }
}

/// A target that passed pre-checks, with the content it had at check time.
#[derive(Debug, Clone)]
pub struct PermittedTarget {
    pub resource: ResourcePath,
    pub before: Option<Vec<u8>>,
    pub expected: Expected,
}

/// Clearance to execute, carrying what post-processing needs.
#[derive(Debug, Clone)]
pub struct Permit {
    pub kind: ActionKind,
    /// `None` for non-mutating actions and for unlinked mutations.
    pub intent: Option<Arc<Intent>>,
    pub targets: Vec<PermittedTarget>,
}

impl Permit {
    fn intent_id(&self) -> Option<&IntentId> {
        self.intent.as_deref().map(|intent| &intent.id)
    }

    #[must_use]
    pub fn preconditions(&self) -> Vec<Precondition> {
        self.targets
            .iter()
            .map(|t| Precondition {
                resource: t.resource.clone(),
                expected: t.expected,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub enum Verdict {
    Blocked(Rejection),
    Permit(Permit),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] RegistryError),
    #[error(transparent)]
    InvalidAction(#[from] ActionError),
    #[error("execution failed: {0}")]
    Execution(#[source] ExecutionError),
    #[error("mutation applied but not recorded: {0}")]
    Persistence(#[from] LedgerError),
    #[error("cannot read {resource}: {source}")]
    Store {
        resource: ResourcePath,
        #[source]
        source: io::Error,
    },
}

pub struct Pipeline {
    root: PathBuf,
    catalog: ActionCatalog,
    registry: Arc<IntentRegistry>,
    tracker: Arc<ConcurrencyTracker>,
    ledger: Arc<MutationLedger>,
    classifier: Arc<dyn MutationClassifier>,
    store: Arc<dyn ResourceStore>,
    locks: ResourceLocks,
    enforcement: EnforcementMode,
    unresolved_targets: UnresolvedTargetPolicy,
    track_reads: bool,
    record_revision: bool,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("root", &self.root)
            .field("enforcement", &self.enforcement)
            .field("unresolved_targets", &self.unresolved_targets)
            .field("track_reads", &self.track_reads)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    #[must_use]
    pub fn new(
        settings: &Settings,
        registry: Arc<IntentRegistry>,
        tracker: Arc<ConcurrencyTracker>,
        ledger: Arc<MutationLedger>,
        classifier: Arc<dyn MutationClassifier>,
        store: Arc<dyn ResourceStore>,
    ) -> Self {
        Self {
            root: settings.root.clone(),
            catalog: ActionCatalog::from_settings(settings),
            registry,
            tracker,
            ledger,
            classifier,
            store,
            locks: ResourceLocks::new(),
            enforcement: settings.enforcement,
            unresolved_targets: settings.unresolved_targets,
            track_reads: settings.track_reads,
            record_revision: settings.record_revision,
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    /// Run one action end to end.
    pub async fn dispatch(
        &self,
        request: &ActionRequest,
        executor: &dyn ActionExecutor,
    ) -> Result<ActionOutcome, PipelineError> {
        let kind = self.catalog.kind(&request.action);
        tracing::debug!(task = %request.task, action = %request.action.name, ?kind, "Received action");

        if kind == ActionKind::SelectIntent {
            return self.select(request);
        }

        let targets = request.action.targets(&self.root)?;
        let held = self.locks.acquire(&targets).await;
        let outcome = self.run_locked(request, executor).await;
        drop(held);
        self.locks.prune();
        outcome
    }

    /// Check, execute and record while the target locks are held.
    async fn run_locked(
        &self,
        request: &ActionRequest,
        executor: &dyn ActionExecutor,
    ) -> Result<ActionOutcome, PipelineError> {
        let permit = match self.pre_check(request)? {
            Verdict::Blocked(rejection) => return Ok(ActionOutcome::Blocked(rejection)),
            Verdict::Permit(permit) => permit,
        };

        let preconditions = permit.preconditions();
        let report = match executor.execute(&request.action, &preconditions).await {
            Ok(report) => report,
            Err(ExecutionError::PreconditionFailed {
                resource,
                expected,
                actual,
            }) => {
                // An unobserved resource still has the fingerprint seen at check time.
                let baseline = self.tracker.baseline(&request.task, &resource).or(
                    match expected {
                        Expected::Matches(fp) => Some(fp),
                        Expected::Absent | Expected::Any => None,
                    },
                );
                let rejection = Rejection::stale_resource(&resource, baseline, actual);
                tracing::info!(task = %request.task, resource = %resource, kind = %rejection.kind, "Blocked at execution");
                return Ok(ActionOutcome::Blocked(rejection));
            }
            Err(err) => return Err(PipelineError::Execution(err)),
        };

        match permit.kind {
            ActionKind::Mutating => {
                let entries = self.post_process(request, &permit)?;
                Ok(ActionOutcome::Mutated {
                    output: report.output,
                    entries,
                })
            }
            _ => {
                self.observe(request, &permit);
                Ok(ActionOutcome::Executed {
                    output: report.output,
                })
            }
        }
    }

    fn select(&self, request: &ActionRequest) -> Result<ActionOutcome, PipelineError> {
        let requested = request.action.requested_intent().unwrap_or_default();
        let selected = match self.registry.select_intent(&request.task, requested) {
            // The document may have gained intents since it was first read.
            Err(RegistryError::IntentNotFound { .. }) => match self.registry.reload() {
                Ok(()) => self.registry.select_intent(&request.task, requested),
                Err(err) => {
                    tracing::warn!("Intent document reload failed: {err}");
                    self.registry.select_intent(&request.task, requested)
                }
            },
            other => other,
        };
        match selected {
            Ok(intent) => Ok(ActionOutcome::IntentSelected {
                intent: Intent::clone(&intent),
            }),
            Err(RegistryError::IntentNotFound {
                requested,
                valid_ids,
            }) => Ok(ActionOutcome::Blocked(Rejection::intent_not_found(
                &requested, &valid_ids,
            ))),
            Err(err) => Err(err.into()),
        }
    }

    /// Decide whether `request` may execute. Never records anything.
    pub fn pre_check(&self, request: &ActionRequest) -> Result<Verdict, PipelineError> {
        let kind = self.catalog.kind(&request.action);
        let targets = request.action.targets(&self.root)?;

        if kind != ActionKind::Mutating {
            return Ok(Verdict::Permit(Permit {
                kind,
                intent: None,
                targets: targets
                    .into_iter()
                    .map(|resource| PermittedTarget {
                        resource,
                        before: None,
                        expected: Expected::Any,
                    })
                    .collect(),
            }));
        }

        let task = &request.task;
        let intent = self.registry.active_intent(task);
        if intent.is_none() && self.enforcement == EnforcementMode::Strict {
            return Ok(self.block(task, Rejection::no_active_intent(targets.first())));
        }

        if targets.is_empty() {
            match self.unresolved_targets {
                UnresolvedTargetPolicy::Block => {
                    let scope = intent.as_ref().map_or(&[][..], |i| &i.owned_scope[..]);
                    let id = intent.as_deref().map(|i| &i.id);
                    return Ok(self.block(task, Rejection::out_of_scope(id, None, scope)));
                }
                UnresolvedTargetPolicy::Allow => {
                    tracing::warn!(
                        task = %task,
                        action = %request.action.name,
                        "Mutating action has no resolvable target; allowed unchecked"
                    );
                }
            }
        }

        if let Some(intent) = &intent
            && let Some(outside) = targets
                .iter()
                .find(|res| !self.registry.is_in_scope(intent, res))
        {
            return Ok(self.block(
                task,
                Rejection::out_of_scope(Some(&intent.id), Some(outside), &intent.owned_scope),
            ));
        }

        let mut permitted = Vec::with_capacity(targets.len());
        for resource in targets {
            let current = match self.store.read(&resource) {
                Ok(current) => current,
                Err(source) => {
                    if let Some(baseline) = self.tracker.baseline(task, &resource) {
                        return Ok(self.block(
                            task,
                            Rejection::stale_resource(&resource, Some(baseline), None),
                        ));
                    }
                    return Err(PipelineError::Store { resource, source });
                }
            };
            if let Freshness::Stale { baseline, current } =
                self.tracker
                    .check_freshness(task, &resource, current.as_deref())
            {
                return Ok(self.block(
                    task,
                    Rejection::stale_resource(&resource, Some(baseline), current),
                ));
            }
            let expected = current
                .as_deref()
                .map_or(Expected::Absent, |bytes| Expected::Matches(fingerprint(bytes)));
            permitted.push(PermittedTarget {
                resource,
                before: current,
                expected,
            });
        }

        if intent.is_none() {
            tracing::warn!(task = %task, action = %request.action.name, "Unlinked mutation permitted");
        }
        Ok(Verdict::Permit(Permit {
            kind,
            intent,
            targets: permitted,
        }))
    }

    fn block(&self, task: &TaskId, rejection: Rejection) -> Verdict {
        tracing::info!(task = %task, kind = %rejection.kind, "{}", rejection.message);
        Verdict::Blocked(rejection)
    }

    /// Record what a non-mutating action just read.
    fn observe(&self, request: &ActionRequest, permit: &Permit) {
        if !self.track_reads {
            return;
        }
        let active = self.registry.active_intent(&request.task);
        let intent = active.as_deref().map(|i| &i.id);
        for target in &permit.targets {
            match self.store.read(&target.resource) {
                Ok(Some(content)) => {
                    self.tracker
                        .record_observation(&request.task, &target.resource, &content, intent);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(resource = %target.resource, "Observation skipped: {err}");
                }
            }
        }
    }

    /// Ledger and re-baseline every target of a successful mutation.
    ///
    /// Stops at the first ledger failure; that target keeps its old baseline.
    pub fn post_process(
        &self,
        request: &ActionRequest,
        permit: &Permit,
    ) -> Result<Vec<LedgerEntry>, PipelineError> {
        let revision = if self.record_revision {
            current_revision(&self.root)
        } else {
            None
        };
        let intent_id = permit.intent_id();

        let mut entries = Vec::with_capacity(permit.targets.len());
        for target in &permit.targets {
            let after = self
                .store
                .read(&target.resource)
                .map_err(|source| PipelineError::Store {
                    resource: target.resource.clone(),
                    source,
                })?;

            let classification = self.classifier.classify(&ClassificationInput {
                resource: &target.resource,
                before: target.before.as_deref(),
                after: after.as_deref(),
                intent_changed: request.intent_changed,
            });

            let entry = self.ledger.append(MutationRecord {
                resource: target.resource.clone(),
                ranges: content_ranges(target.before.as_deref(), after.as_deref()),
                contributor: request.contributor.clone(),
                intent_id: intent_id.cloned(),
                classification,
                revision: revision.clone(),
            })?;

            self.tracker
                .rebaseline(&request.task, &target.resource, after.as_deref(), intent_id);
            entries.push(entry);
        }
        Ok(entries)
    }
}

/// Changed regions of `after`, each with a digest of its own lines.
///
/// A deletion yields one empty range at line 0; a change with no inserted
/// lines (pure removal or no-op) covers the whole new file.
fn content_ranges(before: Option<&[u8]>, after: Option<&[u8]>) -> Vec<ContentRange> {
    let Some(after) = after else {
        return vec![ContentRange {
            start_line: 0,
            end_line: 0,
            content_hash: fingerprint_lines(b"", 1, 0),
        }];
    };

    let mut ranges: Vec<ContentRange> = changed_line_ranges(before.unwrap_or_default(), after)
        .into_iter()
        .map(|(start, end)| ContentRange {
            start_line: start,
            end_line: end,
            content_hash: fingerprint_lines(after, start, end),
        })
        .collect();

    if ranges.is_empty() {
        let end = line_count(after);
        let start = u32::from(end > 0);
        ranges.push(ContentRange {
            start_line: start,
            end_line: end,
            content_hash: fingerprint_lines(after, start.max(1), end),
        });
    }
    ranges
}
