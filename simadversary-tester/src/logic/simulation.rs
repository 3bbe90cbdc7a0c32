use serde::Serialize;
use simadversary_game::{
    Branch, DataLoader, DefenceMaturity, Ending, GameConfig, GameSession, InvalidAction, ModeId,
    Phase, Recovery, Resolution, SessionSetup, SkillLevel,
};

use crate::logic::policy::{ActionView, GameplayStrategy, PlayerPolicy, PolicyDecision};

/// Configuration for a simulation session.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub seed: u64,
    pub mode: ModeId,
    pub skill: SkillLevel,
    pub defence: DefenceMaturity,
    pub strategy: GameplayStrategy,
    pub max_operations: usize,
    /// Logical seconds advanced after each operation; zero disables timed events.
    pub clock_step_secs: u64,
}

impl SimulationConfig {
    #[must_use]
    pub fn new(mode: ModeId, strategy: GameplayStrategy, seed: u64) -> Self {
        Self {
            seed,
            mode,
            skill: SkillLevel::default(),
            defence: DefenceMaturity::default(),
            strategy,
            max_operations: 400,
            clock_step_secs: 0,
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

    #[must_use]
    pub const fn with_max_operations(mut self, max_operations: usize) -> Self {
        self.max_operations = max_operations;
        self
    }

    #[must_use]
    pub const fn with_clock_step(mut self, secs: u64) -> Self {
        self.clock_step_secs = secs;
        self
    }

    #[must_use]
    pub fn setup(&self, config: &GameConfig) -> SessionSetup {
        SessionSetup::new(
            &format!("{}-bot", self.strategy.key()),
            self.mode.as_str(),
            self.seed,
            config,
        )
        .with_skill(self.skill)
        .with_defence(self.defence)
    }
}

/// Snapshot of one engine operation chosen by a policy.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    pub operation: usize,
    pub step_id: String,
    pub action: String,
    pub branch: Branch,
    pub retry: bool,
    pub events: usize,
    pub policy_name: String,
    pub rationale: Option<String>,
}

/// How a driven session finished.
#[derive(Debug, Clone)]
pub struct SimulationOutcome {
    pub ending: Ending,
    pub operations: usize,
    pub decisions: Vec<DecisionRecord>,
    /// True when the session was expired for hitting the operation bound or
    /// running out of playable actions.
    pub stalled: bool,
    pub deferred_effects_applied: usize,
}

/// Drives a [`GameSession`] with a [`PlayerPolicy`] until it ends.
pub struct SimulationSession<'a, L: DataLoader> {
    session: &'a mut GameSession<L>,
    max_operations: usize,
    clock_step_secs: u64,
    decisions: Vec<DecisionRecord>,
    deferred_effects_applied: usize,
}

impl<'a, L: DataLoader> SimulationSession<'a, L> {
    pub fn new(session: &'a mut GameSession<L>, config: &SimulationConfig) -> Self {
        Self {
            session,
            max_operations: config.max_operations,
            clock_step_secs: config.clock_step_secs,
            decisions: Vec::new(),
            deferred_effects_applied: 0,
        }
    }

    /// Play until the session ends, expiring it if the policy stalls.
    ///
    /// # Errors
    ///
    /// Returns the engine's rejection if the policy requests an invalid move.
    pub fn run(
        mut self,
        policy: &mut dyn PlayerPolicy,
    ) -> Result<SimulationOutcome, InvalidAction> {
        let mut operations = 0;
        let mut stalled = false;
        while operations < self.max_operations {
            if let Phase::Over(_) = self.session.phase() {
                break;
            }
            if !self.advance(policy, operations)? {
                stalled = true;
                break;
            }
            operations += 1;
            if self.clock_step_secs > 0 && !self.session.is_over() {
                let tick = self.session.advance_clock(self.clock_step_secs)?;
                self.deferred_effects_applied += tick.deferred_applied;
            }
        }
        let ending = match self.session.phase() {
            Phase::Over(ending) => ending,
            _ => {
                stalled = true;
                log::debug!(
                    "seed {} stalled after {operations} operations; expiring",
                    self.session.seed()
                );
                self.session.expire()?
            }
        };
        Ok(SimulationOutcome {
            ending,
            operations,
            decisions: self.decisions,
            stalled,
            deferred_effects_applied: self.deferred_effects_applied,
        })
    }

    /// Perform one operation; `false` when the policy has nothing to play.
    fn advance(
        &mut self,
        policy: &mut dyn PlayerPolicy,
        operation: usize,
    ) -> Result<bool, InvalidAction> {
        let (resolution, decision) = match self.session.phase() {
            Phase::AwaitingChoice => {
                let Some(decision) = self.pick_action(policy) else {
                    return Ok(false);
                };
                (self.session.choose(decision.choice_index)?, Some(decision))
            }
            Phase::Detected { .. } | Phase::Failed { .. } => {
                let options = self.session.recovery_options();
                match policy.pick_recovery(self.session.state(), &options) {
                    Recovery::Retry => (self.session.retry()?, None),
                    Recovery::UseContingency => (self.session.use_contingency()?, None),
                    Recovery::GiveUp => (self.session.give_up()?, None),
                    Recovery::ChooseAnother => match self.pick_action(policy) {
                        Some(decision) => {
                            (self.session.choose(decision.choice_index)?, Some(decision))
                        }
                        None => (self.session.give_up()?, None),
                    },
                }
            }
            Phase::Over(_) => return Ok(false),
        };
        self.record(policy, operation, &resolution, decision);
        Ok(true)
    }

    fn pick_action(&self, policy: &mut dyn PlayerPolicy) -> Option<PolicyDecision> {
        let availability = self.session.availability();
        let engine = self.session.engine();
        let view = ActionView::new(engine.config(), engine.state(), engine.step(), &availability);
        policy.pick_action(&view)
    }

    fn record(
        &mut self,
        policy: &dyn PlayerPolicy,
        operation: usize,
        resolution: &Resolution,
        decision: Option<PolicyDecision>,
    ) {
        log::debug!(
            "[{}] {} / {} -> {:?}",
            policy.name(),
            resolution.step_id,
            resolution.label,
            resolution.branch
        );
        self.decisions.push(DecisionRecord {
            operation,
            step_id: resolution.step_id.clone(),
            action: resolution.label.clone(),
            branch: resolution.branch,
            retry: resolution.retry,
            events: resolution.events.len(),
            policy_name: policy.name().to_string(),
            rationale: decision.and_then(|decision| decision.rationale),
        });
    }
}
