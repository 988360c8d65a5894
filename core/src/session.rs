//! Explicit per-session context.
//!
//! Everything the pipeline shares across tasks hangs off a `Session` rather
//! than process globals, so two sessions over different workspaces (or the
//! same one in tests) never see each other's state.

use std::path::PathBuf;
use std::sync::Arc;

use warden_config::{ConfigError, Settings};
use warden_types::TaskId;

use crate::classifier::{LineDeltaClassifier, MutationClassifier};
use crate::executor::ActionExecutor;
use crate::knowledge::{KnowledgeSink, NotesFile};
use crate::ledger::MutationLedger;
use crate::pipeline::{ActionOutcome, ActionRequest, Pipeline, PipelineError};
use crate::registry::IntentRegistry;
use crate::store::{ResourceStore, WorkspaceStore};
use crate::tracker::ConcurrencyTracker;

pub struct Session {
    settings: Settings,
    registry: Arc<IntentRegistry>,
    tracker: Arc<ConcurrencyTracker>,
    ledger: Arc<MutationLedger>,
    knowledge: Arc<dyn KnowledgeSink>,
    pipeline: Pipeline,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("root", &self.settings.root)
            .field("ledger", &self.ledger.path())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Session over `root` with `.warden/config.toml` applied.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        Ok(SessionBuilder::new(Settings::load(root)?).build())
    }

    #[must_use]
    pub fn builder(settings: Settings) -> SessionBuilder {
        SessionBuilder::new(settings)
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn registry(&self) -> &IntentRegistry {
        &self.registry
    }

    #[must_use]
    pub fn tracker(&self) -> &ConcurrencyTracker {
        &self.tracker
    }

    #[must_use]
    pub fn ledger(&self) -> &MutationLedger {
        &self.ledger
    }

    #[must_use]
    pub fn knowledge(&self) -> &dyn KnowledgeSink {
        self.knowledge.as_ref()
    }

    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub async fn dispatch(
        &self,
        request: &ActionRequest,
        executor: &dyn ActionExecutor,
    ) -> Result<ActionOutcome, PipelineError> {
        self.pipeline.dispatch(request, executor).await
    }

    /// Task teardown: drop its observations and its intent selection.
    pub fn end_task(&self, task: &TaskId) {
        self.tracker.clear_task(task);
        self.registry.release_task(task);
        tracing::debug!(task = %task, "Task ended");
    }
}

/// Assembles a [`Session`], defaulting every collaborator from [`Settings`].
pub struct SessionBuilder {
    settings: Settings,
    registry: Option<IntentRegistry>,
    classifier: Option<Arc<dyn MutationClassifier>>,
    store: Option<Arc<dyn ResourceStore>>,
    knowledge: Option<Arc<dyn KnowledgeSink>>,
}

impl SessionBuilder {
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            registry: None,
            classifier: None,
            store: None,
            knowledge: None,
        }
    }

    /// Use a prepared registry instead of the workspace intent document.
    #[must_use]
    pub fn registry(mut self, registry: IntentRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn classifier(mut self, classifier: Arc<dyn MutationClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn ResourceStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn knowledge(mut self, knowledge: Arc<dyn KnowledgeSink>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    #[must_use]
    pub fn build(self) -> Session {
        let settings = self.settings;
        let registry = Arc::new(self.registry.unwrap_or_else(|| {
            IntentRegistry::for_workspace(settings.root.clone(), settings.intents_override.clone())
        }));
        let tracker = Arc::new(ConcurrencyTracker::new());
        let ledger = Arc::new(MutationLedger::new(settings.ledger_path.clone()));
        let classifier = self.classifier.unwrap_or_else(|| {
            Arc::new(LineDeltaClassifier::new(settings.classifier_threshold))
        });
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(WorkspaceStore::new(settings.root.clone())));
        let knowledge = self
            .knowledge
            .unwrap_or_else(|| Arc::new(NotesFile::new(settings.notes_path.clone())));

        let pipeline = Pipeline::new(
            &settings,
            Arc::clone(&registry),
            Arc::clone(&tracker),
            Arc::clone(&ledger),
            classifier,
            store,
        );
        tracing::debug!(
            root = %settings.root.display(),
            ledger = %settings.ledger_path.display(),
            enforcement = ?settings.enforcement,
            "Session ready"
        );

        Session {
            settings,
            registry,
            tracker,
            ledger,
            knowledge,
            pipeline,
        }
    }
}
