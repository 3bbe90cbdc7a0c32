//! Random event overlay: rate-limited, decaying probability rolls at trigger
//! points, with effects emitted as commands.
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use super::analytics::{CatalogOverview, EventSummary};
use super::catalog::{EventCatalog, PendingCatalog};
use super::schedule::ScheduledEffects;
use super::{EffectBundle, EventContext, EventDefinition, EventInstance, Trigger};
use crate::commands::{
    EventMessage, GameCommand, GameStateSink, ResourceKind, Severity, UiNotice, UiSink, deliver,
    dispatch,
};
use crate::config::EventTuning;
use crate::constants::SECONDS_PER_HOUR;
use crate::numbers::{ceil_f64_to_i64, u64_to_f64};
use crate::rng::roll_unit;

/// Outcome of a trigger check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventCheck {
    Fired(Box<EventInstance>),
    /// Cooldown or per-session cap blocked the check; nothing was rolled.
    RateLimited,
    NoCandidate,
}

impl EventCheck {
    #[must_use]
    pub fn fired(&self) -> Option<&EventInstance> {
        match self {
            Self::Fired(instance) => Some(instance),
            Self::RateLimited | Self::NoCandidate => None,
        }
    }

    #[must_use]
    pub fn into_fired(self) -> Option<EventInstance> {
        match self {
            Self::Fired(instance) => Some(*instance),
            Self::RateLimited | Self::NoCandidate => None,
        }
    }
}

/// Snapshot of rate limiting state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub event_count: u32,
    pub max_events_per_game: u32,
    /// `None` until the first event fires.
    pub steps_since_last_event: Option<u32>,
    pub cooldown_remaining: u32,
    pub decay: f64,
    pub can_trigger: bool,
}

/// Partial update for rate limiting parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitPatch {
    #[serde(default)]
    pub cooldown_steps: Option<u32>,
    #[serde(default)]
    pub max_events_per_game: Option<u32>,
    #[serde(default)]
    pub decay_rate: Option<f64>,
    #[serde(default)]
    pub min_global_probability: Option<f64>,
}

/// Per-session event overlay.
#[derive(Debug)]
pub struct EventOverlay {
    catalog: EventCatalog,
    pending: Option<PendingCatalog>,
    load_timeout: Duration,
    cooldown_steps: u32,
    max_events_per_game: u32,
    decay_rate: f64,
    min_global_probability: f64,
    decay: f64,
    fired_once: BTreeSet<String>,
    history: Vec<EventInstance>,
    schedule: ScheduledEffects,
    step_count: u32,
    detection_count: u32,
    last_event_step: Option<u32>,
    event_count: u32,
    clock: u64,
    last_event_time: u64,
}

impl EventOverlay {
    #[must_use]
    pub fn new(catalog: PendingCatalog, tuning: &EventTuning) -> Self {
        Self {
            catalog: EventCatalog::empty(),
            pending: Some(catalog),
            load_timeout: Duration::from_millis(tuning.load_timeout_ms),
            cooldown_steps: tuning.cooldown_steps,
            max_events_per_game: tuning.max_events_per_game,
            decay_rate: tuning.decay_rate,
            min_global_probability: tuning.min_global_probability,
            decay: 1.0,
            fired_once: BTreeSet::new(),
            history: Vec::new(),
            schedule: ScheduledEffects::new(),
            step_count: 0,
            detection_count: 0,
            last_event_step: None,
            event_count: 0,
            clock: 0,
            last_event_time: 0,
        }
    }

    /// Overlay over an already-resolved catalog.
    #[must_use]
    pub fn with_catalog(catalog: EventCatalog, tuning: &EventTuning) -> Self {
        Self::new(PendingCatalog::ready(catalog), tuning)
    }

    /// Overlay that never fires.
    #[must_use]
    pub fn disabled() -> Self {
        Self::with_catalog(EventCatalog::empty(), &EventTuning::default())
    }

    /// Whether the catalog finished loading.
    pub fn is_ready(&mut self) -> bool {
        self.pending.as_mut().is_none_or(|pending| {
            pending.poll();
            pending.is_finished()
        })
    }

    /// Block until the catalog is loaded or the load timeout elapses.
    pub fn catalog(&mut self) -> &EventCatalog {
        if let Some(pending) = self.pending.take() {
            self.catalog = pending.wait(self.load_timeout);
        }
        &self.catalog
    }

    pub const fn note_step(&mut self) {
        self.step_count = self.step_count.saturating_add(1);
    }

    pub const fn note_detection(&mut self) {
        self.detection_count = self.detection_count.saturating_add(1);
    }

    #[must_use]
    pub const fn step_count(&self) -> u32 {
        self.step_count
    }

    #[must_use]
    pub const fn detection_count(&self) -> u32 {
        self.detection_count
    }

    /// Logical seconds since session start.
    #[must_use]
    pub const fn clock(&self) -> u64 {
        self.clock
    }

    fn allows_event_check(&self) -> bool {
        if self.event_count >= self.max_events_per_game {
            return false;
        }
        self.last_event_step
            .is_none_or(|anchor| self.step_count.saturating_sub(anchor) >= self.cooldown_steps)
    }

    /// Probability an eligible definition fires right now.
    #[must_use]
    pub fn probability(&self, definition: &EventDefinition, context: &EventContext) -> f64 {
        let factor = definition
            .modifiers
            .factor(context.skill, context.defence, self.detection_count);
        (definition.base_probability * self.decay * factor).min(definition.probability_cap())
    }

    fn eligible(&self, definition: &EventDefinition, trigger: Trigger, context: &EventContext) -> bool {
        definition.fires_on(trigger)
            && !(definition.one_time && self.fired_once.contains(&definition.id))
            && definition
                .conditions
                .holds(context, self.step_count, self.detection_count)
    }

    /// Roll for at most one event at `trigger`.
    pub fn check_for_events<R: Rng + ?Sized>(
        &mut self,
        trigger: Trigger,
        context: &EventContext,
        rng: &mut R,
        state: &mut dyn GameStateSink,
        ui: &mut dyn UiSink,
    ) -> EventCheck {
        self.catalog();
        if !self.allows_event_check() {
            log::debug!("event check at {trigger} rate limited");
            return EventCheck::RateLimited;
        }
        let chosen = self.roll_candidates(rng, context, |overlay, definition| {
            overlay.eligible(definition, trigger, context)
        });
        match chosen {
            Some(definition) => {
                EventCheck::Fired(Box::new(self.fire(&definition, trigger, context, state, ui)))
            }
            None => EventCheck::NoCandidate,
        }
    }

    /// Roll for at most one time-triggered event against the logical clock.
    pub fn check_time_events<R: Rng + ?Sized>(
        &mut self,
        context: &EventContext,
        rng: &mut R,
        state: &mut dyn GameStateSink,
        ui: &mut dyn UiSink,
    ) -> EventCheck {
        self.catalog();
        if !self.allows_event_check() {
            return EventCheck::RateLimited;
        }
        let since_start = self.clock;
        let since_last = self.clock.saturating_sub(self.last_event_time);
        let chosen = self.roll_candidates(rng, context, |overlay, definition| {
            overlay.eligible(definition, Trigger::Time, context)
                && definition
                    .time_conditions
                    .is_some_and(|gates| gates.holds(since_start, since_last))
        });
        match chosen {
            Some(definition) => EventCheck::Fired(Box::new(self.fire(
                &definition,
                Trigger::Time,
                context,
                state,
                ui,
            ))),
            None => EventCheck::NoCandidate,
        }
    }

    fn roll_candidates<R, F>(
        &self,
        rng: &mut R,
        context: &EventContext,
        filter: F,
    ) -> Option<EventDefinition>
    where
        R: Rng + ?Sized,
        F: Fn(&Self, &EventDefinition) -> bool,
    {
        self.catalog
            .entries()
            .iter()
            .filter(|definition| filter(self, *definition))
            .find(|definition| {
                let probability = self.probability(definition, context);
                let roll = roll_unit(&mut *rng);
                log::debug!("event {} rolled {roll:.3} against {probability:.3}", definition.id);
                roll < probability
            })
            .cloned()
    }

    fn fire(
        &mut self,
        definition: &EventDefinition,
        trigger: Trigger,
        context: &EventContext,
        state: &mut dyn GameStateSink,
        ui: &mut dyn UiSink,
    ) -> EventInstance {
        if definition.one_time {
            self.fired_once.insert(definition.id.clone());
        }
        let instance = EventInstance::bind(
            definition,
            trigger,
            context,
            self.clock,
            self.step_count,
            self.detection_count,
        );
        self.history.push(instance.clone());

        let announcement = definition.message.as_ref().map(|message| Announcement {
            id: definition.id.clone(),
            title: definition.title.clone(),
            message: message.clone(),
            severity: definition.message_type,
        });
        apply_effects(&definition.effects, announcement, state, ui);
        for deferred in &definition.delayed_effects {
            self.schedule
                .schedule(self.clock, &definition.id, deferred.clone());
        }

        self.last_event_step = Some(self.step_count);
        self.last_event_time = self.clock;
        self.event_count = self.event_count.saturating_add(1);
        self.decay = (self.decay * self.decay_rate).max(self.min_global_probability);
        log::info!(
            "event fired: {} at step {} via {trigger} ({}/{}, decay {:.2})",
            definition.title,
            self.step_count,
            self.event_count,
            self.max_events_per_game,
            self.decay
        );
        instance
    }

    /// Advance the logical clock and apply deferred effects that came due, in
    /// due order. Returns how many were applied.
    pub fn advance_clock(
        &mut self,
        elapsed_secs: u64,
        state: &mut dyn GameStateSink,
        ui: &mut dyn UiSink,
    ) -> usize {
        self.clock = self.clock.saturating_add(elapsed_secs);
        let due = self.schedule.drain_due(self.clock);
        for task in &due {
            let announcement = task.effect.message.as_ref().map(|message| Announcement {
                id: task.source.clone(),
                title: task
                    .effect
                    .title
                    .clone()
                    .unwrap_or_else(|| "Delayed effect".to_string()),
                message: message.clone(),
                severity: Severity::Warning,
            });
            apply_effects(&task.effect.effects, announcement, state, ui);
        }
        due.len()
    }

    #[must_use]
    pub fn rate_limit_status(&self) -> RateLimitStatus {
        let steps_since_last_event = self
            .last_event_step
            .map(|anchor| self.step_count.saturating_sub(anchor));
        RateLimitStatus {
            event_count: self.event_count,
            max_events_per_game: self.max_events_per_game,
            steps_since_last_event,
            cooldown_remaining: steps_since_last_event
                .map_or(0, |since| self.cooldown_steps.saturating_sub(since)),
            decay: self.decay,
            can_trigger: self.allows_event_check(),
        }
    }

    pub fn configure_rate_limiting(&mut self, patch: RateLimitPatch) {
        if let Some(cooldown) = patch.cooldown_steps {
            self.cooldown_steps = cooldown;
        }
        if let Some(max) = patch.max_events_per_game {
            self.max_events_per_game = max;
        }
        if let Some(rate) = patch.decay_rate {
            self.decay_rate = rate;
        }
        if let Some(floor) = patch.min_global_probability {
            self.min_global_probability = floor;
        }
    }

    #[must_use]
    pub fn history(&self) -> &[EventInstance] {
        &self.history
    }

    #[must_use]
    pub fn pending_effects(&self) -> usize {
        self.schedule.len()
    }

    /// Cancel scheduled effects at session end.
    pub fn shutdown(&mut self) -> usize {
        let cancelled = self.schedule.cancel_all();
        if cancelled > 0 {
            log::debug!("cancelled {cancelled} scheduled event effects");
        }
        cancelled
    }

    /// Clear per-session tracking for a new session. The catalog stays loaded.
    pub fn reset(&mut self) {
        self.shutdown();
        self.fired_once.clear();
        self.history.clear();
        self.step_count = 0;
        self.detection_count = 0;
        self.last_event_step = None;
        self.event_count = 0;
        self.decay = 1.0;
        self.clock = 0;
        self.last_event_time = 0;
    }

    pub fn summary(&mut self) -> EventSummary {
        let overview = self.catalog().overview();
        EventSummary::from_history(&self.history, overview)
    }

    pub fn catalog_overview(&mut self) -> CatalogOverview {
        self.catalog().overview()
    }
}

struct Announcement {
    id: String,
    title: String,
    message: String,
    severity: Severity,
}

fn apply_effects(
    effects: &EffectBundle,
    announcement: Option<Announcement>,
    state: &mut dyn GameStateSink,
    ui: &mut dyn UiSink,
) {
    if effects.hours != 0 {
        dispatch(
            state,
            GameCommand::AdjustResource {
                kind: ResourceKind::Hours,
                delta: effects.hours,
            },
        );
    }
    if effects.contingencies != 0 {
        dispatch(
            state,
            GameCommand::AdjustResource {
                kind: ResourceKind::Contingencies,
                delta: effects.contingencies,
            },
        );
    }
    for item in &effects.add_items {
        dispatch(state, GameCommand::AddItem { item: item.clone() });
    }
    for item in &effects.remove_items {
        dispatch(state, GameCommand::RemoveItem { item: item.clone() });
    }
    if let Some(secs) = effects.wait_time.filter(|secs| *secs > 0) {
        let penalty = ceil_f64_to_i64(u64_to_f64(secs) / SECONDS_PER_HOUR);
        dispatch(
            state,
            GameCommand::AdjustResource {
                kind: ResourceKind::Hours,
                delta: -penalty,
            },
        );
        let text = effects.wait_message.clone().unwrap_or_else(|| {
            format!("Operations stalled for {secs} seconds. You lose {penalty} hour(s).")
        });
        deliver(
            ui,
            UiNotice::Message {
                text,
                severity: Severity::Warning,
            },
        );
    }
    if let Some(announcement) = announcement {
        deliver(
            ui,
            UiNotice::EventMessage(EventMessage {
                id: announcement.id,
                title: announcement.title,
                message: announcement.message,
                severity: announcement.severity,
                effects: effects.describe(),
            }),
        );
    }
    for (key, value) in &effects.game_state {
        dispatch(
            state,
            GameCommand::SetNamedState {
                key: key.clone(),
                value: value.clone(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{CallbackError, RecordingUi};
    use crate::config::{DefenceMaturity, SkillLevel};
    use crate::events::{DeferredEffect, TimeConditions};
    use rand::SeedableRng;
    use rand::rngs::SmallRng;
    use rand::rngs::mock::StepRng;

    #[derive(Default)]
    struct RecordingState {
        commands: Vec<GameCommand>,
    }

    impl GameStateSink for RecordingState {
        fn apply(&mut self, command: GameCommand) -> Result<(), CallbackError> {
            self.commands.push(command);
            Ok(())
        }
    }

    fn definition(id: &str, triggers: &[Trigger], probability: f64) -> EventDefinition {
        EventDefinition::from_value(serde_json::json!({
            "id": id,
            "title": id.to_uppercase(),
            "category": "infrastructure",
            "triggers": triggers,
            "base_probability": probability,
            "effects": { "hours": -2 },
            "message": "Something happened"
        }))
        .expect("valid definition")
    }

    fn context() -> EventContext {
        EventContext {
            hours: 150,
            contingencies: 3,
            detections: 0,
            inventory: Vec::new(),
            skill: SkillLevel::OrganisedCrime,
            defence: DefenceMaturity::Medium,
            step: None,
            choice: None,
        }
    }

    fn overlay(definitions: Vec<EventDefinition>) -> EventOverlay {
        EventOverlay::with_catalog(EventCatalog::new(definitions), &EventTuning::default())
    }

    fn always() -> StepRng {
        StepRng::new(0, 0)
    }

    #[test]
    fn fires_first_passing_candidate_only() {
        let mut overlay = overlay(vec![
            definition("first", &[Trigger::Step], 1.0),
            definition("second", &[Trigger::Step], 1.0),
        ]);
        let mut state = RecordingState::default();
        let mut ui = RecordingUi::default();
        let check = overlay.check_for_events(Trigger::Step, &context(), &mut always(), &mut state, &mut ui);
        assert_eq!(check.fired().map(|event| event.id.as_str()), Some("first"));
        assert_eq!(overlay.history().len(), 1);
        assert_eq!(
            state.commands,
            vec![GameCommand::AdjustResource {
                kind: ResourceKind::Hours,
                delta: -2
            }]
        );
        assert_eq!(ui.notices.len(), 1);
    }

    #[test]
    fn cooldown_blocks_until_enough_steps_pass() {
        let mut overlay = overlay(vec![definition("e", &[Trigger::Step], 1.0)]);
        let mut state = RecordingState::default();
        let mut ui = RecordingUi::default();
        overlay.note_step();
        assert!(overlay.check_for_events(Trigger::Step, &context(), &mut always(), &mut state, &mut ui).fired().is_some());
        for expected_remaining in [2, 1] {
            overlay.note_step();
            assert_eq!(
                overlay.check_for_events(Trigger::Step, &context(), &mut always(), &mut state, &mut ui),
                EventCheck::RateLimited
            );
            assert_eq!(overlay.rate_limit_status().cooldown_remaining, expected_remaining);
        }
        overlay.note_step();
        assert!(overlay.check_for_events(Trigger::Step, &context(), &mut always(), &mut state, &mut ui).fired().is_some());
    }

    #[test]
    fn per_session_cap_and_decay_floor() {
        let mut overlay = overlay(vec![definition("e", &[Trigger::Step], 1.0)]);
        overlay.configure_rate_limiting(RateLimitPatch {
            cooldown_steps: Some(0),
            ..RateLimitPatch::default()
        });
        let mut state = RecordingState::default();
        let mut ui = RecordingUi::default();
        let mut fired = 0;
        for _ in 0..10 {
            overlay.note_step();
            if overlay
                .check_for_events(Trigger::Step, &context(), &mut always(), &mut state, &mut ui)
                .fired()
                .is_some()
            {
                fired += 1;
            }
        }
        assert_eq!(fired, 4);
        let status = overlay.rate_limit_status();
        assert!(!status.can_trigger);
        assert!(status.decay >= 0.3);
        assert!((status.decay - 0.85_f64.powi(4)).abs() < 1e-9);
    }

    #[test]
    fn one_time_events_fire_once() {
        let mut once = definition("once", &[Trigger::Failure], 1.0);
        once.one_time = true;
        let mut overlay = overlay(vec![once]);
        overlay.configure_rate_limiting(RateLimitPatch {
            cooldown_steps: Some(0),
            ..RateLimitPatch::default()
        });
        let mut state = RecordingState::default();
        let mut ui = RecordingUi::default();
        let ctx = context();
        assert!(overlay.check_for_events(Trigger::Failure, &ctx, &mut always(), &mut state, &mut ui).fired().is_some());
        assert_eq!(
            overlay.check_for_events(Trigger::Failure, &ctx, &mut always(), &mut state, &mut ui),
            EventCheck::NoCandidate
        );
    }

    #[test]
    fn zero_probability_never_fires() {
        let mut overlay = overlay(vec![definition("never", &[Trigger::Step], 0.0)]);
        let mut rng = SmallRng::seed_from_u64(3);
        let mut state = RecordingState::default();
        let mut ui = RecordingUi::default();
        for _ in 0..50 {
            overlay.note_step();
            assert_eq!(
                overlay.check_for_events(Trigger::Step, &context(), &mut rng, &mut state, &mut ui),
                EventCheck::NoCandidate
            );
        }
    }

    #[test]
    fn wait_time_and_named_state_become_commands() {
        let mut stall = definition("stall", &[Trigger::Detection], 1.0);
        stall.effects.wait_time = Some(5_400);
        stall
            .effects
            .game_state
            .insert("globalDetectionIncrease".to_string(), crate::state::NamedValue::Number(10.0));
        let mut overlay = overlay(vec![stall]);
        let mut state = RecordingState::default();
        let mut ui = RecordingUi::default();
        overlay.check_for_events(Trigger::Detection, &context(), &mut always(), &mut state, &mut ui);
        assert!(state.commands.contains(&GameCommand::AdjustResource {
            kind: ResourceKind::Hours,
            delta: -2
        }));
        assert_eq!(
            state.commands.iter().filter(|c| **c == GameCommand::AdjustResource { kind: ResourceKind::Hours, delta: -2 }).count(),
            2
        );
        assert!(matches!(state.commands.last(), Some(GameCommand::SetNamedState { .. })));
        assert!(matches!(ui.notices.first(), Some(UiNotice::Message { .. })));
    }

    #[test]
    fn deferred_effects_apply_on_clock_and_cancel_on_reset() {
        let mut delayed = definition("delayed", &[Trigger::Step], 1.0);
        delayed.delayed_effects = vec![DeferredEffect {
            delay: 300,
            effects: EffectBundle {
                contingencies: -1,
                ..EffectBundle::default()
            },
            message: Some("The blue team caught up.".to_string()),
            title: None,
        }];
        let mut overlay = overlay(vec![delayed]);
        let mut state = RecordingState::default();
        let mut ui = RecordingUi::default();
        overlay.check_for_events(Trigger::Step, &context(), &mut always(), &mut state, &mut ui);
        assert_eq!(overlay.pending_effects(), 1);
        assert_eq!(overlay.advance_clock(299, &mut state, &mut ui), 0);
        assert_eq!(overlay.advance_clock(1, &mut state, &mut ui), 1);
        assert!(state.commands.contains(&GameCommand::AdjustResource {
            kind: ResourceKind::Contingencies,
            delta: -1
        }));

        overlay.reset();
        overlay.check_for_events(Trigger::Step, &context(), &mut always(), &mut state, &mut ui);
        assert_eq!(overlay.pending_effects(), 1);
        overlay.reset();
        assert_eq!(overlay.pending_effects(), 0);
        let before = state.commands.len();
        assert_eq!(overlay.advance_clock(10_000, &mut state, &mut ui), 0);
        assert_eq!(state.commands.len(), before);
        assert!(overlay.history().is_empty());
    }

    #[test]
    fn time_events_respect_clock_gates() {
        let mut timed = definition("timed", &[Trigger::Time], 1.0);
        timed.time_conditions = Some(TimeConditions {
            min_time_since_start: Some(600),
            min_time_since_last_event: None,
        });
        let mut overlay = overlay(vec![timed, definition("untimed", &[Trigger::Time], 1.0)]);
        let mut state = RecordingState::default();
        let mut ui = RecordingUi::default();
        assert_eq!(
            overlay.check_time_events(&context(), &mut always(), &mut state, &mut ui),
            EventCheck::NoCandidate
        );
        overlay.advance_clock(600, &mut state, &mut ui);
        let check = overlay.check_time_events(&context(), &mut always(), &mut state, &mut ui);
        assert_eq!(check.fired().map(|event| event.fired_on), Some(Trigger::Time));
    }

    #[test]
    fn summary_includes_catalog_overview() {
        let mut overlay = overlay(vec![
            definition("a", &[Trigger::Step], 1.0),
            definition("b", &[Trigger::Detection, Trigger::Step], 0.5),
        ]);
        let mut state = RecordingState::default();
        let mut ui = RecordingUi::default();
        overlay.check_for_events(Trigger::Step, &context(), &mut always(), &mut state, &mut ui);
        let summary = overlay.summary();
        assert_eq!(summary.total_events, 1);
        assert_eq!(summary.catalog.total, 2);
        assert_eq!(summary.catalog.by_trigger.get(&Trigger::Step), Some(&2));
        assert!(overlay.is_ready());
    }
}
