//! SimAdversary Scenario Engine
//!
//! Platform-agnostic core logic for the SimAdversary security-incident
//! tabletop simulator: choice resolution, test actions, scoring, inventory and
//! the random event overlay. This crate carries no UI or transport code.

pub mod commands;
pub mod config;
pub mod constants;
pub mod data;
pub mod engine;
pub mod events;
pub mod inventory;
pub mod loader;
pub mod numbers;
pub mod record;
pub mod rng;
pub mod scoring;
pub mod session;
pub mod state;
pub mod testing;

use std::sync::Arc;

// Re-export commonly used types
pub use commands::{
    CallbackError, EventMessage, GameCommand, GameStateSink, NullUi, RecordingUi, ResourceKind,
    Severity, StateApplier, UiNotice, UiSink,
};
pub use config::{
    ConfigError, DefenceMaturity, GameConfig, ModeId, SkillLevel, StepOverride, Team,
    TriggerScaling,
};
pub use data::{Choice, DataError, NextStep, Requirement, Step, TextBlock};
pub use engine::{
    ActionAvailability, AdjustedAction, Branch, ClockTick, Ending, FailureCause, FiredEvents,
    InvalidAction, Phase, Recovery, Resolution, StepEngine,
};
pub use events::{
    CatalogScope, EventCatalog, EventCheck, EventContext, EventDefinition, EventInstance,
    EventManifest, EventOverlay, EventSetFile, EventSummary, PendingCatalog, RateLimitPatch,
    RateLimitStatus, Trigger,
};
pub use inventory::{Inventory, InventoryPolicy};
pub use loader::BundleLoader;
pub use record::{MemoryPathStore, PathStore, SessionRecord};
pub use rng::RngBundle;
pub use scoring::{ScoreBreakdown, ScoreInputs, ScoringPolicy};
pub use session::{GameSession, SessionSetup};
pub use state::{PathEntry, PlayerState, SuccessFlag};
pub use testing::{TestOutcome, TestResolution, TestResolver};

/// Trait for abstracting scenario data loading.
/// Platform-specific implementations should provide this
pub trait DataLoader {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load one step of a scenario.
    ///
    /// # Errors
    ///
    /// Returns an error if the step is missing, unreachable or malformed.
    fn load_step(&self, mode: &ModeId, step_id: &str) -> Result<Step, Self::Error>;

    /// Load the index of available event sets.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be loaded or parsed.
    fn load_event_manifest(&self) -> Result<EventManifest, Self::Error>;

    /// Load one event set named by the manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the set cannot be loaded or parsed.
    fn load_event_set(&self, path: &str) -> Result<EventSetFile, Self::Error>;
}

/// Main engine for creating sessions and persisting their path logs
pub struct GameEngine<L, S>
where
    L: DataLoader,
    S: PathStore,
{
    data_loader: Arc<L>,
    storage: S,
    config: GameConfig,
}

impl<L, S> GameEngine<L, S>
where
    L: DataLoader + Send + Sync + 'static,
    S: PathStore,
{
    /// Create an engine over the bundled configuration.
    pub fn new(data_loader: L, storage: S) -> Self {
        Self::with_config(data_loader, storage, GameConfig::load_from_static())
    }

    pub fn with_config(data_loader: L, storage: S, config: GameConfig) -> Self {
        Self {
            data_loader: Arc::new(data_loader),
            storage,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &GameConfig {
        &self.config
    }

    #[must_use]
    pub fn data_loader(&self) -> Arc<L> {
        Arc::clone(&self.data_loader)
    }

    /// Event catalog scope for a mode under this engine's configuration.
    #[must_use]
    pub fn catalog_scope(&self, mode: &ModeId) -> CatalogScope {
        CatalogScope::for_mode(&self.config, mode)
    }

    /// Start a session. The event catalog loads on a background thread while
    /// the player reads the first step.
    ///
    /// # Errors
    ///
    /// Returns an error if the start step cannot be loaded.
    pub fn create_session(&self, setup: &SessionSetup) -> Result<GameSession<L>, L::Error> {
        let pending = PendingCatalog::spawn(
            self.data_loader(),
            self.catalog_scope(&setup.mode),
            self.config.events.trigger_scaling.clone(),
        );
        let overlay = EventOverlay::new(pending, &self.config.events);
        GameSession::start(self.data_loader(), self.config.clone(), setup, overlay)
    }

    /// Like [`GameEngine::create_session`], loading the catalog on the tokio
    /// blocking pool. Must be called from within a runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the start step cannot be loaded.
    #[cfg(feature = "async")]
    pub fn create_session_in_runtime(
        &self,
        setup: &SessionSetup,
    ) -> Result<GameSession<L>, L::Error> {
        let pending = PendingCatalog::spawn_blocking(
            self.data_loader(),
            self.catalog_scope(&setup.mode),
            self.config.events.trigger_scaling.clone(),
        );
        let overlay = EventOverlay::new(pending, &self.config.events);
        GameSession::start(self.data_loader(), self.config.clone(), setup, overlay)
    }

    /// Start a session whose catalog is resolved before the first step.
    ///
    /// # Errors
    ///
    /// Returns an error if the start step cannot be loaded.
    pub fn create_session_blocking(
        &self,
        setup: &SessionSetup,
    ) -> Result<GameSession<L>, L::Error> {
        let catalog = EventCatalog::resolve(
            &*self.data_loader,
            &self.catalog_scope(&setup.mode),
            &self.config.events.trigger_scaling,
        );
        let overlay = EventOverlay::with_catalog(catalog, &self.config.events);
        GameSession::start(self.data_loader(), self.config.clone(), setup, overlay)
    }

    /// Persist a finished session.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be saved.
    pub fn save_record(&self, record: &SessionRecord) -> Result<(), S::Error> {
        self.storage.save_path(record)
    }

    /// Record and persist a session in one call.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be saved.
    pub fn finish_session(&self, session: GameSession<L>) -> Result<SessionRecord, anyhow::Error>
    where
        S::Error: Into<anyhow::Error>,
    {
        let record = session.into_record();
        self.storage.save_path(&record).map_err(Into::into)?;
        Ok(record)
    }

    /// Stored records, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the records cannot be read.
    pub fn list_records(&self) -> Result<Vec<SessionRecord>, anyhow::Error>
    where
        S::Error: Into<anyhow::Error>,
    {
        self.storage.list_paths().map_err(Into::into)
    }

    /// Remove every stored record; returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the records cannot be read or removed.
    pub fn clear_records(&self) -> Result<usize, anyhow::Error>
    where
        S::Error: Into<anyhow::Error>,
    {
        let count = self.storage.list_paths().map_err(Into::into)?.len();
        self.storage.clear_paths().map_err(Into::into)?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> GameEngine<BundleLoader, MemoryPathStore> {
        GameEngine::new(BundleLoader::embedded(), MemoryPathStore::new())
    }

    #[test]
    fn engine_creates_session_on_start_step() {
        let engine = engine();
        let setup = SessionSetup::new("operator", "phishing", 0xABCD, engine.config());
        let session = engine.create_session(&setup).unwrap();
        assert_eq!(session.state().progress.current_step.as_deref(), Some("start-here"));
        assert_eq!(session.state().resources.time_budget, 160);
        assert_eq!(session.state().resources.contingencies, 3);
        assert_eq!(session.phase(), Phase::AwaitingChoice);
    }

    #[test]
    fn finished_sessions_roundtrip_through_storage() {
        let engine = engine();
        let setup = SessionSetup::new("operator", "phishing", 7, engine.config());
        let mut session = engine.create_session_blocking(&setup).unwrap();
        session.abandon().unwrap();
        let record = engine.finish_session(session).unwrap();
        assert!(!record.won);

        let listed = engine.list_records().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].player, "operator");
        assert_eq!(engine.clear_records().unwrap(), 1);
        assert!(engine.list_records().unwrap().is_empty());
    }

    #[cfg(feature = "async")]
    #[tokio::test(flavor = "multi_thread")]
    async fn runtime_sessions_load_their_catalog() {
        let engine = engine();
        let setup = SessionSetup::new("operator", "phishing", 3, engine.config());
        let mut session = engine.create_session_in_runtime(&setup).unwrap();
        let loaded =
            tokio::task::block_in_place(|| session.engine_mut().overlay_mut().catalog().len());
        assert!(loaded > 0);
    }

    #[test]
    fn unknown_mode_fails_to_start() {
        let engine = engine();
        let setup = SessionSetup::new("operator", "ransomware", 1, engine.config());
        assert!(engine.create_session_blocking(&setup).is_err());
    }
}
