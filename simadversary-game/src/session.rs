use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::DataLoader;
use crate::config::{DefenceMaturity, GameConfig, ModeId, SkillLevel};
use crate::engine::{
    ActionAvailability, ClockTick, Ending, InvalidAction, Phase, Recovery, Resolution, StepEngine,
};
use crate::events::{EventOverlay, EventSummary, RateLimitPatch, RateLimitStatus};
use crate::record::SessionRecord;
use crate::scoring::{ScoreBreakdown, ScoreInputs, ScoringPolicy};
use crate::state::PlayerState;

/// Player-facing parameters for a new session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSetup {
    pub player: String,
    pub mode: ModeId,
    pub skill: SkillLevel,
    pub defence: DefenceMaturity,
    pub seed: u64,
}

impl SessionSetup {
    /// Setup using the configured default skill and defence.
    #[must_use]
    pub fn new(player: &str, mode: &str, seed: u64, config: &GameConfig) -> Self {
        Self {
            player: player.trim().to_string(),
            mode: ModeId::new(mode),
            skill: config.player.skill,
            defence: config.player.defence,
            seed,
        }
    }

    #[must_use]
    pub const fn with_skill(mut self, skill: SkillLevel) -> Self {
        self.skill = skill;
        self
    }

    #[must_use]
    pub const fn with_defence(mut self, defence: DefenceMaturity) -> Self {
        self.defence = defence;
        self
    }
}

/// High-level session wrapper binding a data loader to a step engine.
#[derive(Debug)]
pub struct GameSession<L: DataLoader> {
    loader: Arc<L>,
    engine: StepEngine,
    seed: u64,
}

impl<L: DataLoader> GameSession<L> {
    /// Wrap an engine that was already started on its first step.
    #[must_use]
    pub const fn from_engine(loader: Arc<L>, engine: StepEngine, seed: u64) -> Self {
        Self {
            loader,
            engine,
            seed,
        }
    }

    /// Start a session: load the configured start step and attach `overlay`.
    ///
    /// # Errors
    ///
    /// Returns the loader's error if the start step cannot be fetched.
    pub fn start(
        loader: Arc<L>,
        config: GameConfig,
        setup: &SessionSetup,
        overlay: EventOverlay,
    ) -> Result<Self, L::Error> {
        let start = loader.load_step(&setup.mode, &config.player.start_step)?;
        let state = PlayerState::new(
            &setup.player,
            setup.mode.clone(),
            setup.skill,
            setup.defence,
            &config,
        );
        log::info!(
            "starting {} session for {} ({} / {}, seed {})",
            setup.mode,
            state.player,
            setup.skill,
            setup.defence,
            setup.seed
        );
        let engine = StepEngine::new(
            config,
            state,
            start,
            crate::rng::RngBundle::from_user_seed(setup.seed),
            overlay,
        );
        Ok(Self::from_engine(loader, engine, setup.seed))
    }

    #[must_use]
    pub const fn engine(&self) -> &StepEngine {
        &self.engine
    }

    pub const fn engine_mut(&mut self) -> &mut StepEngine {
        &mut self.engine
    }

    #[must_use]
    pub const fn state(&self) -> &PlayerState {
        self.engine.state()
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.engine.phase()
    }

    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    #[must_use]
    pub const fn is_over(&self) -> bool {
        self.engine.is_over()
    }

    #[must_use]
    pub fn availability(&self) -> Vec<ActionAvailability> {
        self.engine.availability()
    }

    #[must_use]
    pub fn recovery_options(&self) -> Vec<Recovery> {
        self.engine.recovery_options()
    }

    /// # Errors
    ///
    /// See [`StepEngine::choose`].
    pub fn choose(&mut self, index: usize) -> Result<Resolution, InvalidAction> {
        self.engine.choose(&*self.loader, index)
    }

    /// # Errors
    ///
    /// See [`StepEngine::retry`].
    pub fn retry(&mut self) -> Result<Resolution, InvalidAction> {
        self.engine.retry(&*self.loader)
    }

    /// # Errors
    ///
    /// See [`StepEngine::use_contingency`].
    pub fn use_contingency(&mut self) -> Result<Resolution, InvalidAction> {
        self.engine.use_contingency(&*self.loader)
    }

    /// # Errors
    ///
    /// See [`StepEngine::give_up`].
    pub fn give_up(&mut self) -> Result<Resolution, InvalidAction> {
        self.engine.give_up()
    }

    /// # Errors
    ///
    /// See [`StepEngine::expire`].
    pub fn expire(&mut self) -> Result<Ending, InvalidAction> {
        self.engine.expire()
    }

    /// # Errors
    ///
    /// See [`StepEngine::abandon`].
    pub fn abandon(&mut self) -> Result<Ending, InvalidAction> {
        self.engine.abandon()
    }

    /// # Errors
    ///
    /// See [`StepEngine::advance_clock`].
    pub fn advance_clock(&mut self, elapsed_secs: u64) -> Result<ClockTick, InvalidAction> {
        self.engine.advance_clock(elapsed_secs)
    }

    #[must_use]
    pub fn rate_limit_status(&self) -> RateLimitStatus {
        self.engine.overlay().rate_limit_status()
    }

    pub fn configure_rate_limiting(&mut self, patch: RateLimitPatch) {
        self.engine.overlay_mut().configure_rate_limiting(patch);
    }

    /// Post-game analytics over every event fired so far.
    pub fn event_summary(&mut self) -> EventSummary {
        self.engine.overlay_mut().summary()
    }

    fn score_inputs(&self) -> ScoreInputs {
        let state = self.engine.state();
        ScoreInputs {
            inventory: state.inventory.clone(),
            contingencies: state.resources.contingencies,
            detections: state.progress.detections,
            won: self.engine.ending().is_some_and(Ending::won),
            skill: state.skill,
            defence: state.defence,
            mode: state.mode.clone(),
        }
    }

    #[must_use]
    pub fn score(&self) -> i64 {
        ScoringPolicy::new(self.engine.config()).score(&self.score_inputs())
    }

    #[must_use]
    pub fn score_breakdown(&self) -> ScoreBreakdown {
        ScoringPolicy::new(self.engine.config()).breakdown(&self.score_inputs())
    }

    /// Snapshot the session as a persistable record.
    pub fn to_record(&mut self) -> SessionRecord {
        let score = self.score();
        let won = self.engine.ending().is_some_and(Ending::won);
        let summary = self.event_summary();
        let state = self.engine.state();
        SessionRecord {
            player: state.player.clone(),
            mode: state.mode.clone(),
            skill: state.skill,
            defence: state.defence,
            won,
            score,
            path: state.path.clone(),
            events: self.engine.overlay().history().to_vec(),
            summary: Some(summary),
            timestamp: Utc::now(),
            seed: self.seed,
        }
    }

    /// Consume the session, returning its record.
    #[must_use]
    pub fn into_record(mut self) -> SessionRecord {
        self.to_record()
    }
}
