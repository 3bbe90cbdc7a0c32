//! Choice resolution state machine.
//!
//! The engine owns a session's [`PlayerState`], the current [`Step`] and the
//! event overlay. Every mutating operation takes `&mut self`; invalid requests
//! are rejected with [`InvalidAction`] before anything is touched.
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

use crate::DataLoader;
use crate::commands::{RecordingUi, StateApplier, UiNotice};
use crate::config::GameConfig;
use crate::data::{Choice, NextStep, Step};
use crate::events::{EventContext, EventInstance, EventOverlay, Trigger};
use crate::inventory::InventoryPolicy;
use crate::numbers::{ceil_f64_to_i32, ceil_f64_to_i64, i64_to_f64};
use crate::rng::{RngBundle, roll_percent};
use crate::state::{PathEntry, PlayerState, SuccessFlag};
use crate::testing::{TestOutcome, TestResolution, TestResolver};

/// Events fired during one operation; one per trigger checked.
pub type FiredEvents = SmallVec<[EventInstance; 3]>;

/// Why a session ended in failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    OutOfTime,
    GaveUp,
    Expired,
    Abandoned,
}

/// Terminal outcome of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Ending {
    Success,
    Failure { cause: FailureCause },
}

impl Ending {
    #[must_use]
    pub const fn won(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Where the engine is in the turn cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    AwaitingChoice,
    /// Detected without a shield; waiting for a contingency or give up.
    Detected { choice: usize },
    /// The action failed; `exhausted` when its attempt limit is used up.
    Failed { choice: usize, exhausted: bool },
    Over(Ending),
}

/// Recovery moves offered after a detection or failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    Retry,
    UseContingency,
    GiveUp,
    ChooseAnother,
}

/// Branch taken by one engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "branch", rename_all = "snake_case")]
pub enum Branch {
    Rewarded,
    Tested { success: bool },
    Detected,
    PersistenceBypass,
    Failed { exhausted: bool },
    ContingencyUsed,
    GaveUp,
}

/// Rejected requests. The engine state is unchanged when one is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidAction {
    #[error("choice {index} is out of range ({available} available)")]
    IndexOutOfRange { index: usize, available: usize },
    #[error("requirements for `{label}` are not met")]
    UnmetRequirements { label: String },
    #[error("unknown test type `{0}`")]
    UnknownTestType(String),
    #[error("`{item}` is required to perform this test")]
    MissingTestItem { item: String },
    #[error("not available while the engine is {phase}")]
    WrongPhase { phase: &'static str },
    #[error("the session is over")]
    SessionOver,
    #[error("no contingencies remaining")]
    NoContingencies,
    #[error("retry is not available")]
    RetryUnavailable,
    #[error("`{label}` has no attempts left")]
    Exhausted { label: String },
}

/// Cost and detection after skill, defence and event modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustedAction {
    pub hours: i64,
    pub detection: i32,
}

/// One action as presented to the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionAvailability {
    pub index: usize,
    pub label: String,
    /// False when the attempt limit is used up.
    pub enabled: bool,
    pub attempts: u32,
    pub limit: Option<u32>,
    pub adjusted: AdjustedAction,
}

/// Report of one engine operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub branch: Branch,
    pub step_id: String,
    pub label: String,
    pub retry: bool,
    pub adjusted: Option<AdjustedAction>,
    pub detection_roll: Option<f64>,
    pub success_roll: Option<f64>,
    pub test: Option<TestOutcome>,
    pub events: FiredEvents,
    pub notices: Vec<UiNotice>,
    pub feedback: Vec<String>,
    pub expired_modifiers: Vec<String>,
    pub ending: Option<Ending>,
}

/// Result of advancing the logical clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockTick {
    pub deferred_applied: usize,
    pub event: Option<EventInstance>,
    pub notices: Vec<UiNotice>,
    pub ending: Option<Ending>,
}

#[derive(Debug, Default)]
struct Trace {
    detection_roll: Option<f64>,
    success_roll: Option<f64>,
    test: Option<TestOutcome>,
    events: FiredEvents,
    notices: Vec<UiNotice>,
    feedback: Vec<String>,
}

/// The central turn state machine.
#[derive(Debug)]
pub struct StepEngine {
    config: GameConfig,
    inventory: InventoryPolicy,
    state: PlayerState,
    step: Step,
    phase: Phase,
    rng: RngBundle,
    overlay: EventOverlay,
    breached: bool,
}

impl StepEngine {
    #[must_use]
    pub fn new(
        config: GameConfig,
        mut state: PlayerState,
        start: Step,
        rng: RngBundle,
        overlay: EventOverlay,
    ) -> Self {
        state.progress.current_step = Some(start.id.clone());
        Self {
            inventory: InventoryPolicy::from_config(&config),
            config,
            state,
            step: start,
            phase: Phase::AwaitingChoice,
            rng,
            overlay,
            breached: false,
        }
    }

    #[must_use]
    pub const fn state(&self) -> &PlayerState {
        &self.state
    }

    #[must_use]
    pub const fn step(&self) -> &Step {
        &self.step
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub const fn config(&self) -> &GameConfig {
        &self.config
    }

    #[must_use]
    pub const fn inventory_policy(&self) -> &InventoryPolicy {
        &self.inventory
    }

    #[must_use]
    pub const fn overlay(&self) -> &EventOverlay {
        &self.overlay
    }

    pub const fn overlay_mut(&mut self) -> &mut EventOverlay {
        &mut self.overlay
    }

    #[must_use]
    pub const fn rng(&self) -> &RngBundle {
        &self.rng
    }

    #[must_use]
    pub const fn ending(&self) -> Option<Ending> {
        match self.phase {
            Phase::Over(ending) => Some(ending),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_over(&self) -> bool {
        matches!(self.phase, Phase::Over(_))
    }

    /// Cost and detection for `choice` as it would resolve right now.
    #[must_use]
    pub fn adjusted(&self, choice: &Choice, retry: bool) -> AdjustedAction {
        let skill = self.config.skill(self.state.skill);
        let hours = ceil_f64_to_i64(i64_to_f64(choice.hour_cost) * skill.hour_multiplier);
        if retry && self.config.step_override(&self.step.id).retry_uses_base_detection {
            // Override steps retry against the unmodified base chance.
            return AdjustedAction {
                hours,
                detection: choice.detection_chance,
            };
        }
        let defence = self.config.defence(self.state.defence);
        let shifted = choice
            .detection_chance
            .saturating_add(defence.detection_modifier)
            .saturating_add(self.state.status.aux.detection_shift());
        let mut detection = ceil_f64_to_i32(f64::from(shifted) * skill.detection_multiplier);
        if retry {
            detection = detection.saturating_add(self.config.detection.retry_detection_increase);
        }
        AdjustedAction { hours, detection }
    }

    /// Eligible actions for the current step. Actions whose requirements do
    /// not hold are omitted; exhausted ones are listed but disabled.
    #[must_use]
    pub fn availability(&self) -> Vec<ActionAvailability> {
        self.step
            .choices
            .iter()
            .enumerate()
            .filter(|(_, choice)| {
                self.inventory
                    .meets_requirements(&self.state.inventory, &choice.required_items)
            })
            .map(|(index, choice)| {
                let attempts = self.state.attempts.get(&self.step.id, &choice.label);
                ActionAvailability {
                    index,
                    label: choice.label.clone(),
                    enabled: !choice.is_exhausted(attempts),
                    attempts,
                    limit: choice.limit,
                    adjusted: self.adjusted(choice, false),
                }
            })
            .collect()
    }

    /// Recovery moves for the current phase.
    #[must_use]
    pub fn recovery_options(&self) -> Vec<Recovery> {
        let can_spend = self.state.resources.contingencies > 0;
        match self.phase {
            Phase::Detected { .. } => {
                let mut options = Vec::new();
                if can_spend {
                    options.push(Recovery::UseContingency);
                }
                options.push(Recovery::GiveUp);
                options
            }
            Phase::Failed {
                exhausted: true, ..
            } => vec![Recovery::ChooseAnother, Recovery::GiveUp],
            Phase::Failed { .. } => {
                let mut options = vec![Recovery::Retry];
                if can_spend {
                    options.push(Recovery::UseContingency);
                }
                options.push(Recovery::GiveUp);
                options
            }
            Phase::AwaitingChoice | Phase::Over(_) => Vec::new(),
        }
    }

    /// Resolve action `index` of the current step.
    ///
    /// Allowed while awaiting a choice and after a failure (choosing another
    /// action abandons the failed one).
    ///
    /// # Errors
    ///
    /// Returns `InvalidAction` when the session is over, a detection is
    /// pending, or the action's preconditions do not hold.
    pub fn choose<L: DataLoader + ?Sized>(
        &mut self,
        loader: &L,
        index: usize,
    ) -> Result<Resolution, InvalidAction> {
        match self.phase {
            Phase::Over(_) => Err(InvalidAction::SessionOver),
            Phase::Detected { .. } => Err(InvalidAction::WrongPhase {
                phase: "awaiting a detection decision",
            }),
            Phase::AwaitingChoice | Phase::Failed { .. } => self.resolve(loader, index, false),
        }
    }

    /// Re-run the failed action with the retry detection increment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAction::RetryUnavailable` unless the last action failed
    /// with attempts remaining.
    pub fn retry<L: DataLoader + ?Sized>(&mut self, loader: &L) -> Result<Resolution, InvalidAction> {
        match self.phase {
            Phase::Over(_) => Err(InvalidAction::SessionOver),
            Phase::Failed {
                choice,
                exhausted: false,
            } => self.resolve(loader, choice, true),
            _ => Err(InvalidAction::RetryUnavailable),
        }
    }

    /// Spend a contingency to bypass a detection or failure: the attempt
    /// counts as a success, rewards apply and the step advances.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAction` when no detection or recoverable failure is
    /// pending or no contingencies remain.
    pub fn use_contingency<L: DataLoader + ?Sized>(
        &mut self,
        loader: &L,
    ) -> Result<Resolution, InvalidAction> {
        let index = match self.phase {
            Phase::Over(_) => return Err(InvalidAction::SessionOver),
            Phase::Detected { choice }
            | Phase::Failed {
                choice,
                exhausted: false,
            } => choice,
            Phase::Failed {
                choice,
                exhausted: true,
            } => {
                return Err(InvalidAction::Exhausted {
                    label: self.choice_label(choice),
                });
            }
            Phase::AwaitingChoice => {
                return Err(InvalidAction::WrongPhase {
                    phase: "awaiting a choice",
                });
            }
        };
        if self.state.resources.contingencies <= 0 {
            return Err(InvalidAction::NoContingencies);
        }
        let choice = self.choice_at(index)?;

        self.breached = false;
        self.state.adjust_contingencies(-1);
        self.state.progress.contingencies_spent =
            self.state.progress.contingencies_spent.saturating_add(1);
        if let Some(entry) = self.state.last_entry_mut() {
            entry.bypassed = true;
            entry.success = SuccessFlag::Succeeded;
        }
        log::debug!("contingency spent on `{}`", choice.label);

        let mut trace = Trace::default();
        trace
            .feedback
            .push("Contingency used. You press on.".to_string());
        self.grant_rewards(&choice, &mut trace);
        self.advance(loader, choice.next.clone(), &mut trace);
        Ok(self.finish(Branch::ContingencyUsed, &choice, false, None, trace))
    }

    /// Decline recovery. After a failure this re-presents the step; after a
    /// detection it ends the session unless the step is detection tolerant.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAction` when no detection or failure is pending.
    pub fn give_up(&mut self) -> Result<Resolution, InvalidAction> {
        let (index, detected) = match self.phase {
            Phase::Over(_) => return Err(InvalidAction::SessionOver),
            Phase::Detected { choice } => (choice, true),
            Phase::Failed { choice, .. } => (choice, false),
            Phase::AwaitingChoice => {
                return Err(InvalidAction::WrongPhase {
                    phase: "awaiting a choice",
                });
            }
        };
        let choice = self.choice_at(index)?;
        self.breached = false;
        let mut trace = Trace::default();
        if detected {
            if let Some(entry) = self.state.last_entry_mut() {
                entry.success = SuccessFlag::Failed;
            }
            if self.config.step_override(&self.step.id).detection_tolerant {
                trace
                    .feedback
                    .push("You go quiet and regroup. Choose another approach.".to_string());
                self.phase = Phase::AwaitingChoice;
            } else {
                trace
                    .feedback
                    .push("You abandon the operation after being detected.".to_string());
                self.end(Ending::Failure {
                    cause: FailureCause::GaveUp,
                });
            }
        } else {
            self.phase = Phase::AwaitingChoice;
        }
        Ok(self.finish(Branch::GaveUp, &choice, false, None, trace))
    }

    /// External session timer ran out.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAction::SessionOver` when the session already ended.
    pub fn expire(&mut self) -> Result<Ending, InvalidAction> {
        self.terminate(FailureCause::Expired)
    }

    /// Player quit.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAction::SessionOver` when the session already ended.
    pub fn abandon(&mut self) -> Result<Ending, InvalidAction> {
        self.terminate(FailureCause::Abandoned)
    }

    /// Advance the overlay's logical clock, apply deferred effects that came
    /// due and roll for a time-triggered event.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAction::SessionOver` when the session already ended.
    pub fn advance_clock(&mut self, elapsed_secs: u64) -> Result<ClockTick, InvalidAction> {
        if self.is_over() {
            return Err(InvalidAction::SessionOver);
        }
        let mut ui = RecordingUi::default();
        let deferred_applied = {
            let mut applier = StateApplier {
                state: &mut self.state,
                inventory: &self.inventory,
            };
            self.overlay
                .advance_clock(elapsed_secs, &mut applier, &mut ui)
        };
        let context = EventContext::capture(&self.state, Some(&self.step), None);
        let check = {
            let mut applier = StateApplier {
                state: &mut self.state,
                inventory: &self.inventory,
            };
            let mut rng = self.rng.events();
            self.overlay
                .check_time_events(&context, &mut *rng, &mut applier, &mut ui)
        };
        let ending = if self.state.out_of_time() {
            self.end(Ending::Failure {
                cause: FailureCause::OutOfTime,
            });
            self.ending()
        } else {
            None
        };
        Ok(ClockTick {
            deferred_applied,
            event: check.into_fired(),
            notices: ui.notices,
            ending,
        })
    }

    fn terminate(&mut self, cause: FailureCause) -> Result<Ending, InvalidAction> {
        if self.is_over() {
            return Err(InvalidAction::SessionOver);
        }
        let ending = Ending::Failure { cause };
        self.end(ending);
        Ok(ending)
    }

    fn choice_label(&self, index: usize) -> String {
        self.step
            .choice(index)
            .map(|choice| choice.label.clone())
            .unwrap_or_default()
    }

    fn choice_at(&self, index: usize) -> Result<Choice, InvalidAction> {
        self.step
            .choice(index)
            .cloned()
            .ok_or(InvalidAction::IndexOutOfRange {
                index,
                available: self.step.choices.len(),
            })
    }

    /// Check every precondition without mutating anything.
    fn validate(&self, index: usize) -> Result<Choice, InvalidAction> {
        let choice = self.choice_at(index)?;
        if !self
            .inventory
            .meets_requirements(&self.state.inventory, &choice.required_items)
        {
            return Err(InvalidAction::UnmetRequirements {
                label: choice.label,
            });
        }
        if let Some(test_type) = choice.resolved_test_type() {
            let item = TestResolver::new(&self.config, &self.inventory)
                .required_item(&test_type)
                .map_err(|_| InvalidAction::UnknownTestType(test_type.clone()))?;
            if !self.state.inventory.contains(item) {
                return Err(InvalidAction::MissingTestItem {
                    item: item.to_string(),
                });
            }
        }
        Ok(choice)
    }

    fn resolve<L: DataLoader + ?Sized>(
        &mut self,
        loader: &L,
        index: usize,
        retry: bool,
    ) -> Result<Resolution, InvalidAction> {
        let choice = self.validate(index)?;
        self.breached = false;

        let attempts = self.state.attempts.increment(&self.step.id, &choice.label);
        let exceeded_limit = choice.is_exhausted(attempts.saturating_sub(1));
        let adjusted = self.adjusted(&choice, retry);
        self.state.path.push(PathEntry {
            step_id: self.step.id.clone(),
            step_title: self.step.title.clone(),
            label: choice.label.clone(),
            choice_index: index,
            technique: choice.technique.clone(),
            detected: false,
            success: SuccessFlag::Unresolved,
            persistence_used: false,
            bypassed: false,
            exceeded_limit,
            trap_triggered: false,
            retry,
            test_type: None,
            test_outcome: None,
            skill: self.state.skill,
            defence: self.state.defence,
        });
        self.state.progress.steps_taken = self.state.progress.steps_taken.saturating_add(1);
        self.overlay.note_step();
        self.state.spend_hours(adjusted.hours);
        self.breached |= self.state.out_of_time();
        log::debug!(
            "resolving `{}` on {} (attempt {attempts}, cost {}h, detection {}%)",
            choice.label,
            self.step.id,
            adjusted.hours,
            adjusted.detection
        );

        let mut trace = Trace::default();
        self.fire(Trigger::Step, &choice, &mut trace);

        let branch = if let Some(test_type) = choice.resolved_test_type() {
            self.resolve_test(loader, index, &choice, &test_type, &mut trace)
        } else {
            self.resolve_roll(loader, index, &choice, attempts, exceeded_limit, adjusted, &mut trace)
        };

        let expired = self.state.status.aux.tick();
        for key in &expired {
            log::debug!("modifier countdown {key} expired");
        }
        let mut resolution = self.finish(branch, &choice, retry, Some(adjusted), trace);
        resolution.expired_modifiers = expired;
        Ok(resolution)
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_roll<L: DataLoader + ?Sized>(
        &mut self,
        loader: &L,
        index: usize,
        choice: &Choice,
        attempts: u32,
        exceeded_limit: bool,
        adjusted: AdjustedAction,
        trace: &mut Trace,
    ) -> Branch {
        let detection_roll = roll_percent(&mut *self.rng.detection());
        trace.detection_roll = Some(detection_roll);
        let detected = detection_roll < f64::from(adjusted.detection);
        if detected {
            self.overlay.note_detection();
            self.fire(Trigger::Detection, choice, trace);
        }

        let success = if exceeded_limit {
            false
        } else if let Some(chance) = choice.success_chance {
            let roll = roll_percent(&mut *self.rng.success());
            trace.success_roll = Some(roll);
            roll < chance
        } else {
            true
        };
        let outcome_trigger = if success {
            Trigger::Success
        } else {
            Trigger::Failure
        };
        self.fire(outcome_trigger, choice, trace);

        if detected {
            self.enter_detected(loader, index, choice, trace)
        } else if !success {
            self.enter_failed(index, choice, attempts, exceeded_limit, trace)
        } else {
            if let Some(entry) = self.state.last_entry_mut() {
                entry.success = SuccessFlag::Succeeded;
            }
            self.grant_rewards(choice, trace);
            self.advance(loader, choice.next.clone(), trace);
            Branch::Rewarded
        }
    }

    fn resolve_test<L: DataLoader + ?Sized>(
        &mut self,
        loader: &L,
        index: usize,
        choice: &Choice,
        test_type: &str,
        trace: &mut Trace,
    ) -> Branch {
        let resolution = {
            let resolver = TestResolver::new(&self.config, &self.inventory);
            let mut rng = self.rng.tests();
            resolver.resolve(test_type, &mut self.state.inventory, &mut *rng)
        };
        let outcome = match resolution {
            Ok(TestResolution::Resolved(outcome)) => outcome,
            Ok(missing @ TestResolution::MissingItem { .. }) => {
                trace.feedback.push(missing.feedback());
                return self.abort_test();
            }
            Err(err) => {
                log::warn!("test `{test_type}` could not be resolved: {err}");
                trace.feedback.push(err.to_string());
                return self.abort_test();
            }
        };

        if let Some(entry) = self.state.last_entry_mut() {
            entry.test_type = Some(test_type.to_string());
            entry.test_outcome = Some(
                outcome
                    .nested_outcome
                    .clone()
                    .unwrap_or_else(|| outcome.outcome.clone()),
            );
            entry.trap_triggered = outcome.trapped;
        }
        if let Some(message) = &outcome.message {
            trace.feedback.push(message.clone());
        }
        trace.feedback.extend(outcome.feedback.iter().cloned());
        let forces_detection = outcome.forces_detection;
        let success = outcome.success;
        trace.test = Some(outcome);

        if forces_detection {
            log::info!("trap outcome on `{}` forced a detection", choice.label);
            self.overlay.note_detection();
            return self.enter_detected(loader, index, choice, trace);
        }
        if let Some(entry) = self.state.last_entry_mut() {
            entry.success = SuccessFlag::from(success);
        }
        self.advance(loader, choice.next.clone(), trace);
        Branch::Tested { success }
    }

    fn abort_test(&mut self) -> Branch {
        if let Some(entry) = self.state.last_entry_mut() {
            entry.success = SuccessFlag::Failed;
        }
        self.phase = Phase::AwaitingChoice;
        Branch::Tested { success: false }
    }

    fn enter_detected<L: DataLoader + ?Sized>(
        &mut self,
        loader: &L,
        index: usize,
        choice: &Choice,
        trace: &mut Trace,
    ) -> Branch {
        if let Some(entry) = self.state.last_entry_mut() {
            entry.detected = true;
            entry.success = SuccessFlag::Unresolved;
        }

        if self.state.status.ignore_next_detection {
            self.state.status.ignore_next_detection = false;
            let penalty = self.config.detection.persistence_penalty;
            self.state.spend_hours(penalty);
            self.breached |= self.state.out_of_time();
            let shield = self
                .config
                .persistence_items
                .iter()
                .find(|item| self.state.inventory.contains(item))
                .cloned();
            if let Some(item) = &shield {
                self.inventory.remove(&mut self.state.inventory, item);
            }
            if let Some(entry) = self.state.last_entry_mut() {
                entry.persistence_used = true;
            }
            log::info!(
                "persistence absorbed detection on `{}` (-{penalty}h)",
                choice.label
            );
            trace.feedback.push(format!(
                "You were detected, but your persistence held. Re-establishing access cost {penalty} hour(s)."
            ));
            self.advance(loader, choice.next.clone(), trace);
            return Branch::PersistenceBypass;
        }

        self.state.progress.detections = self.state.progress.detections.saturating_add(1);
        self.phase = Phase::Detected { choice: index };
        trace
            .feedback
            .push("You have been detected. Spend a contingency or give up.".to_string());
        Branch::Detected
    }

    fn enter_failed(
        &mut self,
        index: usize,
        choice: &Choice,
        attempts: u32,
        exceeded_limit: bool,
        trace: &mut Trace,
    ) -> Branch {
        if let Some(entry) = self.state.last_entry_mut() {
            entry.success = SuccessFlag::Failed;
        }
        let exhausted = exceeded_limit || choice.is_exhausted(attempts);
        self.phase = Phase::Failed {
            choice: index,
            exhausted,
        };
        trace.feedback.push(if exhausted {
            format!("`{}` failed and has no attempts left. Choose another action.", choice.label)
        } else {
            format!("`{}` failed.", choice.label)
        });
        Branch::Failed { exhausted }
    }

    fn grant_rewards(&mut self, choice: &Choice, trace: &mut Trace) {
        for item in choice.reward_items() {
            if self.inventory.add(&mut self.state.inventory, item) {
                trace.feedback.push(format!("Gained: {item}"));
            }
            if self.config.is_persistence_item(item) {
                self.state.status.ignore_next_detection = true;
            }
        }
    }

    fn advance<L: DataLoader + ?Sized>(
        &mut self,
        loader: &L,
        next: Option<NextStep>,
        trace: &mut Trace,
    ) {
        match next {
            Some(NextStep::Goal) => {
                log::info!("{} reached the objective", self.state.player);
                self.end(Ending::Success);
            }
            Some(NextStep::Step(step_id)) => {
                self.phase = Phase::AwaitingChoice;
                match loader.load_step(&self.state.mode, &step_id) {
                    Ok(step) => {
                        self.state.progress.current_step = Some(step.id.clone());
                        self.step = step;
                    }
                    Err(err) => {
                        log::warn!("failed to load step {step_id}: {err}");
                        trace.feedback.push(format!(
                            "Unable to load the next step ({step_id}). Staying on {}.",
                            self.step.title
                        ));
                    }
                }
            }
            None => self.phase = Phase::AwaitingChoice,
        }
    }

    fn fire(&mut self, trigger: Trigger, choice: &Choice, trace: &mut Trace) {
        let context = EventContext::capture(&self.state, Some(&self.step), Some(choice));
        let mut ui = RecordingUi::default();
        let check = {
            let mut applier = StateApplier {
                state: &mut self.state,
                inventory: &self.inventory,
            };
            let mut rng = self.rng.events();
            self.overlay
                .check_for_events(trigger, &context, &mut *rng, &mut applier, &mut ui)
        };
        trace.notices.extend(ui.notices);
        if let Some(instance) = check.into_fired() {
            trace.events.push(instance);
        }
        self.breached |= self.state.out_of_time();
    }

    fn end(&mut self, ending: Ending) {
        self.phase = Phase::Over(ending);
        self.overlay.shutdown();
        log::info!(
            "session for {} ended: {ending:?} ({}h left, {} detections)",
            self.state.player,
            self.state.resources.time_budget,
            self.state.progress.detections
        );
    }

    fn finish(
        &mut self,
        branch: Branch,
        choice: &Choice,
        retry: bool,
        adjusted: Option<AdjustedAction>,
        trace: Trace,
    ) -> Resolution {
        let mut feedback = trace.feedback;
        if self.breached || self.state.out_of_time() {
            feedback.push("You have run out of time.".to_string());
            self.end(Ending::Failure {
                cause: FailureCause::OutOfTime,
            });
        }
        Resolution {
            branch,
            step_id: self
                .state
                .last_entry()
                .map_or_else(|| self.step.id.clone(), |entry| entry.step_id.clone()),
            label: choice.label.clone(),
            retry,
            adjusted,
            detection_roll: trace.detection_roll,
            success_roll: trace.success_roll,
            test: trace.test,
            events: trace.events,
            notices: trace.notices,
            feedback,
            expired_modifiers: Vec::new(),
            ending: self.ending(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DefenceMaturity, ModeId, SkillLevel, TestOutcomeConfig};
    use crate::data::TextBlock;
    use crate::loader::BundleLoader;
    use crate::state::NamedValue;

    fn step(id: &str, choices: Vec<Choice>) -> Step {
        Step {
            id: id.to_string(),
            title: id.to_uppercase(),
            description: TextBlock::default(),
            choices,
        }
    }

    fn choice(label: &str, cost: i64, detection: i32, next: Option<&str>) -> Choice {
        let mut choice = Choice::new(label, cost, detection);
        choice.next = next.map(|id| NextStep::from(id.to_string()));
        choice
    }

    fn engine_with(config: GameConfig, start: Step) -> StepEngine {
        let state = PlayerState::new(
            "tester",
            ModeId::new("phishing"),
            SkillLevel::OrganisedCrime,
            DefenceMaturity::Medium,
            &config,
        );
        StepEngine::new(
            config,
            state,
            start,
            RngBundle::from_user_seed(42),
            EventOverlay::disabled(),
        )
    }

    fn new_engine(start: Step) -> StepEngine {
        engine_with(GameConfig::load_from_static(), start)
    }

    fn loader() -> BundleLoader {
        BundleLoader::new()
            .with_step("phishing", step("next", vec![choice("Finish", 1, 0, Some("goal"))]))
    }

    #[test]
    fn undetected_success_spends_cost_rewards_and_advances() {
        let mut send = choice("Send email", 10, 0, Some("next"));
        send.reward = Some("credentials".to_string());
        let mut engine = new_engine(step("start-here", vec![send]));
        let resolution = engine.choose(&loader(), 0).expect("valid");

        assert_eq!(resolution.branch, Branch::Rewarded);
        assert_eq!(engine.state().resources.time_budget, 150);
        assert_eq!(engine.state().path.len(), 1);
        assert_eq!(engine.state().path[0].success, SuccessFlag::Succeeded);
        assert_eq!(engine.step().id, "next");
        assert_eq!(engine.state().progress.current_step.as_deref(), Some("next"));
        assert!(engine.state().inventory.contains("credentials"));

        let finish = engine.choose(&loader(), 0).expect("valid");
        assert_eq!(finish.ending, Some(Ending::Success));
        assert!(matches!(engine.choose(&loader(), 0), Err(InvalidAction::SessionOver)));
    }

    #[test]
    fn exhausted_action_never_succeeds_and_blocks_retry() {
        let mut probe = choice("Probe VPN", 5, 0, Some("next"));
        probe.limit = Some(1);
        probe.success_chance = Some(0.0);
        let mut engine = new_engine(step("start-here", vec![probe, choice("Wait", 1, 0, None)]));

        let first = engine.choose(&loader(), 0).expect("valid");
        assert_eq!(first.branch, Branch::Failed { exhausted: true });
        assert_eq!(engine.retry(&loader()), Err(InvalidAction::RetryUnavailable));
        assert!(!engine.recovery_options().contains(&Recovery::Retry));
        let listed = engine.availability();
        assert!(!listed[0].enabled);
        assert!(listed[1].enabled);

        let second = engine.choose(&loader(), 0).expect("still resolvable");
        assert_eq!(second.success_roll, None);
        assert!(engine.state().path[1].exceeded_limit);
        assert_eq!(engine.state().path[1].success, SuccessFlag::Failed);

        engine.choose(&loader(), 1).expect("other action selectable");
        assert_eq!(engine.state().attempts.get("start-here", "Probe VPN"), 2);
    }

    #[test]
    fn persistence_shield_absorbs_one_detection() {
        let mut implant = choice("Install implant", 8, 0, None);
        implant.reward = Some("Persistence".to_string());
        let loud = choice("Noisy scan", 4, 1_000, Some("next"));
        let mut engine = new_engine(step("start-here", vec![implant, loud]));

        engine.choose(&loader(), 0).expect("valid");
        assert!(engine.state().status.ignore_next_detection);
        let resolution = engine.choose(&loader(), 1).expect("valid");

        assert_eq!(resolution.branch, Branch::PersistenceBypass);
        assert_eq!(engine.state().resources.time_budget, 160 - 8 - 4 - 5);
        assert_eq!(engine.state().resources.contingencies, 3);
        assert_eq!(engine.state().progress.detections, 0);
        assert!(!engine.state().inventory.contains("Persistence"));
        assert!(!engine.state().status.ignore_next_detection);
        let entry = engine.state().last_entry().expect("entry");
        assert!(entry.persistence_used && entry.detected);
        assert_eq!(entry.success, SuccessFlag::Unresolved);
        assert_eq!(engine.step().id, "next");
    }

    #[test]
    fn detection_offers_contingency_or_give_up() {
        let mut loud = choice("Noisy scan", 4, 1_000, Some("next"));
        loud.reward = Some("Network Map".to_string());
        let mut engine = new_engine(step("start-here", vec![loud.clone()]));

        assert_eq!(engine.choose(&loader(), 0).expect("valid").branch, Branch::Detected);
        assert_eq!(engine.state().progress.detections, 1);
        assert_eq!(
            engine.recovery_options(),
            vec![Recovery::UseContingency, Recovery::GiveUp]
        );
        assert!(matches!(
            engine.choose(&loader(), 0),
            Err(InvalidAction::WrongPhase { .. })
        ));
        let bypass = engine.use_contingency(&loader()).expect("contingency");
        assert_eq!(bypass.branch, Branch::ContingencyUsed);
        assert_eq!(engine.state().resources.contingencies, 2);
        assert!(engine.state().inventory.contains("Network Map"));
        let entry = engine.state().last_entry().expect("entry");
        assert!(entry.bypassed);
        assert_eq!(entry.success, SuccessFlag::Succeeded);
        assert_eq!(engine.step().id, "next");

        let mut engine = new_engine(step("start-here", vec![loud.clone()]));
        engine.choose(&loader(), 0).expect("valid");
        let gave_up = engine.give_up().expect("give up");
        assert_eq!(
            gave_up.ending,
            Some(Ending::Failure {
                cause: FailureCause::GaveUp
            })
        );

        let mut tolerant = new_engine(step("phishing", vec![loud]));
        tolerant.choose(&loader(), 0).expect("valid");
        tolerant.give_up().expect("give up");
        assert_eq!(tolerant.phase(), Phase::AwaitingChoice);
    }

    #[test]
    fn retry_adds_increment_except_on_override_steps() {
        let mut flaky = choice("Brute force", 2, 0, None);
        flaky.success_chance = Some(0.0);
        let mut engine = new_engine(step("start-here", vec![flaky.clone()]));
        let first = engine.choose(&loader(), 0).expect("valid");
        assert_eq!(first.branch, Branch::Failed { exhausted: false });
        assert_eq!(
            engine.recovery_options(),
            vec![Recovery::Retry, Recovery::UseContingency, Recovery::GiveUp]
        );
        let retried = engine.retry(&loader()).expect("retry");
        assert!(retried.retry);
        assert_eq!(retried.adjusted.map(|a| a.detection), Some(10));
        assert_eq!(
            engine.state().last_entry().map(PathEntry::display_label),
            Some("Brute force (Retry)".to_string())
        );
        assert_eq!(engine.state().progress.steps_taken, 2);

        let engine = new_engine(step("phishing", vec![flaky]));
        let brute = engine.step().choices[0].clone();
        assert_eq!(engine.adjusted(&brute, true).detection, 0);
    }

    #[test]
    fn override_step_retry_ignores_skill_and_defence() {
        let mut engine = new_engine(step("phishing", vec![choice("Spear phish", 10, 20, None)]));
        engine.state.skill = SkillLevel::Unsophisticated;
        engine.state.defence = DefenceMaturity::High;
        engine
            .state
            .status
            .aux
            .set("globalDetectionIncrease", NamedValue::Number(10.0));
        let phish = engine.step().choices[0].clone();
        let first = engine.adjusted(&phish, false);
        assert!(first.detection > 20);
        let retried = engine.adjusted(&phish, true);
        assert_eq!(retried.detection, 20);
        assert_eq!(retried.hours, first.hours);

        let mut engine = new_engine(step("start-here", vec![phish.clone()]));
        engine.state.skill = SkillLevel::Unsophisticated;
        engine.state.defence = DefenceMaturity::High;
        let base = engine.adjusted(&phish, false).detection;
        assert_eq!(
            engine.adjusted(&phish, true).detection,
            base + engine.config.detection.retry_detection_increase
        );
    }

    #[test]
    fn modifiers_adjust_cost_and_detection() {
        let mut engine = new_engine(step("start-here", vec![choice("Scan", 10, 20, None)]));
        engine.state.skill = SkillLevel::NationState;
        engine.state.defence = DefenceMaturity::High;
        let scan = engine.step().choices[0].clone();
        // (20 + 20) * 0.5 and 10 * 1.25 rounded up
        assert_eq!(
            engine.adjusted(&scan, false),
            AdjustedAction {
                hours: 13,
                detection: 20
            }
        );
        engine
            .state
            .status
            .aux
            .set("globalDetectionIncrease", NamedValue::Number(10.0));
        assert_eq!(engine.adjusted(&scan, false).detection, 25);
    }

    #[test]
    fn test_actions_check_preconditions_before_mutating() {
        let mut validate = choice("Validate credentials", 2, 0, Some("next"));
        validate.test_type = Some("credentials".to_string());
        let unknown = choice("Analyze pcap", 2, 0, None);
        let mut engine = new_engine(step("start-here", vec![validate, unknown]));

        assert_eq!(
            engine.choose(&loader(), 0),
            Err(InvalidAction::MissingTestItem {
                item: "credentials".to_string()
            })
        );
        assert_eq!(
            engine.choose(&loader(), 1),
            Err(InvalidAction::UnknownTestType("pcap".to_string()))
        );
        assert!(engine.state().path.is_empty());
        assert_eq!(engine.state().resources.time_budget, 160);

        InventoryPolicy::from_config(engine.config())
            .add(&mut engine.state.inventory, "credentials");
        let resolution = engine.choose(&loader(), 0).expect("valid");
        let test = resolution.test.expect("test outcome");
        assert!(!engine.state().inventory.contains("credentials"));
        assert_eq!(engine.state().path[0].test_type.as_deref(), Some("credentials"));
        if !test.forces_detection {
            assert_eq!(resolution.branch, Branch::Tested { success: true });
            assert_eq!(engine.step().id, "next");
        }
    }

    #[test]
    fn canary_outcome_forces_detection_branch() {
        let mut config = GameConfig::load_from_static();
        if let Some(test) = config.test_types.get_mut("credentials") {
            test.outcomes = vec![TestOutcomeConfig {
                key: "canaryCredentials".to_string(),
                chance: 100.0,
                item: Some("Canary credentials".to_string()),
                message: Some("Trap triggered!".to_string()),
                is_trap: true,
                forces_detection: true,
                feedback: vec!["Honeytoken".to_string()],
                nested: Vec::new(),
            }];
        }
        let mut validate = choice("Validate credentials", 2, 0, Some("next"));
        validate.test_type = Some("credentials".to_string());
        let mut engine = engine_with(config, step("start-here", vec![validate]));
        InventoryPolicy::from_config(engine.config())
            .add(&mut engine.state.inventory, "credentials");

        let resolution = engine.choose(&loader(), 0).expect("valid");
        assert_eq!(resolution.branch, Branch::Detected);
        assert!(resolution.feedback.iter().any(|line| line == "Honeytoken"));
        let entry = engine.state().last_entry().expect("entry");
        assert!(entry.trap_triggered && entry.detected);
        assert!(engine.state().inventory.contains("Canary credentials"));
        assert_eq!(engine.state().progress.detections, 1);
    }

    #[test]
    fn negative_time_budget_ends_in_failure_even_at_goal() {
        let mut engine = new_engine(step("start-here", vec![choice("Sprint", 10, 0, Some("goal"))]));
        engine.state.resources.time_budget = 5;
        let resolution = engine.choose(&loader(), 0).expect("valid");
        assert_eq!(
            resolution.ending,
            Some(Ending::Failure {
                cause: FailureCause::OutOfTime
            })
        );
        assert!(engine.is_over());
    }

    #[test]
    fn missing_next_step_stays_on_current_step() {
        let mut engine = new_engine(step("start-here", vec![choice("Pivot", 1, 0, Some("nowhere"))]));
        let resolution = engine.choose(&loader(), 0).expect("valid");
        assert_eq!(engine.step().id, "start-here");
        assert_eq!(engine.phase(), Phase::AwaitingChoice);
        assert!(resolution.feedback.iter().any(|line| line.contains("nowhere")));
    }

    #[test]
    fn unmet_requirements_and_bad_index_are_rejected() {
        let mut gated = choice("Dump hashes", 5, 0, None);
        gated.required_items = vec![crate::data::Requirement::Item("Server Foothold".to_string())];
        let mut engine = new_engine(step("start-here", vec![gated]));
        assert!(engine.availability().is_empty());
        assert!(matches!(
            engine.choose(&loader(), 0),
            Err(InvalidAction::UnmetRequirements { .. })
        ));
        assert_eq!(
            engine.choose(&loader(), 3),
            Err(InvalidAction::IndexOutOfRange {
                index: 3,
                available: 1
            })
        );
        assert_eq!(
            engine.give_up(),
            Err(InvalidAction::WrongPhase {
                phase: "awaiting a choice"
            })
        );
    }

    #[test]
    fn expire_and_abandon_end_the_session_once() {
        let mut engine = new_engine(step("start-here", vec![choice("Wait", 1, 0, None)]));
        assert_eq!(
            engine.expire(),
            Ok(Ending::Failure {
                cause: FailureCause::Expired
            })
        );
        assert_eq!(engine.abandon(), Err(InvalidAction::SessionOver));
        assert_eq!(engine.advance_clock(60), Err(InvalidAction::SessionOver));
    }
}
