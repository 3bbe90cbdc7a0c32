//! Random event definitions and the overlay that fires them.
//!
//! Definitions are authored as JSON event sets and resolved into an
//! [`catalog::EventCatalog`] per scenario. The [`overlay::EventOverlay`] decides
//! whether one fires at a trigger point and applies its effects through typed
//! commands.
pub mod analytics;
pub mod catalog;
pub mod overlay;
pub mod schedule;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::commands::Severity;
use crate::config::{DefenceMaturity, SkillLevel};
use crate::constants::{DEFAULT_MAX_EVENT_PROBABILITY, DEFAULT_SUCCESS_CHANCE, UNKNOWN_TECHNIQUE};
use crate::data::{Choice, Step};
use crate::state::{NamedValue, PlayerState};

pub use analytics::{CatalogOverview, EventSummary, TimingPatterns};
pub use catalog::{
    CatalogError, CatalogScope, EventCatalog, EventManifest, EventSetEntry, EventSetFile,
    PendingCatalog,
};
pub use overlay::{EventCheck, EventOverlay, RateLimitPatch, RateLimitStatus};
pub use schedule::{ScheduledEffect, ScheduledEffects};

/// Points in a resolution where the overlay is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Step,
    Detection,
    Success,
    Failure,
    Time,
}

impl Trigger {
    pub const ALL: [Self; 5] = [
        Self::Step,
        Self::Detection,
        Self::Success,
        Self::Failure,
        Self::Time,
    ];

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Step => "step",
            Self::Detection => "detection",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Time => "time",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Rejections raised while validating authored definitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("event definition is missing an id")]
    MissingId,
    #[error("event `{id}` is missing a title")]
    MissingTitle { id: String },
    #[error("event `{id}` declares no triggers")]
    NoTriggers { id: String },
    #[error("event `{id}` has an invalid probability {value}")]
    InvalidProbability { id: String, value: String },
    #[error("malformed event definition: {0}")]
    Malformed(String),
}

/// Preconditions checked against tracking counters and the player snapshot.
///
/// Zero-valued bounds are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventConditions {
    #[serde(default)]
    pub min_steps: Option<u32>,
    #[serde(default)]
    pub max_steps: Option<u32>,
    #[serde(default)]
    pub min_detections: Option<u32>,
    #[serde(default)]
    pub min_hours: Option<i64>,
    #[serde(default)]
    pub max_hours: Option<i64>,
    #[serde(default)]
    pub required_items: Vec<String>,
    #[serde(default)]
    pub forbidden_items: Vec<String>,
    #[serde(default)]
    pub skill_levels: Option<Vec<SkillLevel>>,
    #[serde(default, alias = "defense_maturity")]
    pub defence_maturity: Option<Vec<DefenceMaturity>>,
    #[serde(default)]
    pub allowed_steps: Option<Vec<String>>,
}

impl EventConditions {
    /// Whether every declared condition holds.
    #[must_use]
    pub fn holds(&self, context: &EventContext, steps: u32, detections: u32) -> bool {
        let nonzero_u32 = |bound: Option<u32>| bound.filter(|value| *value > 0);
        let nonzero_i64 = |bound: Option<i64>| bound.filter(|value| *value != 0);

        if nonzero_u32(self.min_steps).is_some_and(|min| steps < min) {
            return false;
        }
        if nonzero_u32(self.max_steps).is_some_and(|max| steps > max) {
            return false;
        }
        if nonzero_u32(self.min_detections).is_some_and(|min| detections < min) {
            return false;
        }
        if nonzero_i64(self.min_hours).is_some_and(|min| context.hours < min) {
            return false;
        }
        if nonzero_i64(self.max_hours).is_some_and(|max| context.hours > max) {
            return false;
        }
        if !self
            .required_items
            .iter()
            .all(|item| context.inventory.iter().any(|held| held == item))
        {
            return false;
        }
        if self
            .forbidden_items
            .iter()
            .any(|item| context.inventory.iter().any(|held| held == item))
        {
            return false;
        }
        if let Some(levels) = &self.skill_levels
            && !levels.contains(&context.skill)
        {
            return false;
        }
        if let Some(levels) = &self.defence_maturity
            && !levels.contains(&context.defence)
        {
            return false;
        }
        if let Some(steps) = &self.allowed_steps {
            let current = context.step.as_ref().map(|step| step.id.as_str());
            if !current.is_some_and(|id| steps.iter().any(|allowed| allowed == id)) {
                return false;
            }
        }
        true
    }
}

/// Multiplicative probability modifiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventModifiers {
    #[serde(default)]
    pub skill_level: BTreeMap<SkillLevel, f64>,
    #[serde(default, alias = "defense_maturity")]
    pub defence_maturity: BTreeMap<DefenceMaturity, f64>,
    #[serde(default)]
    pub detection_multiplier: Option<f64>,
}

impl EventModifiers {
    /// Combined factor for the context; zero entries are ignored.
    #[must_use]
    pub fn factor(&self, skill: SkillLevel, defence: DefenceMaturity, detections: u32) -> f64 {
        let mut factor = 1.0;
        if let Some(modifier) = self.skill_level.get(&skill).filter(|m| **m != 0.0) {
            factor *= modifier;
        }
        if let Some(modifier) = self.defence_maturity.get(&defence).filter(|m| **m != 0.0) {
            factor *= modifier;
        }
        if let Some(multiplier) = self.detection_multiplier.filter(|m| *m != 0.0) {
            factor *= f64::from(detections).mul_add(multiplier, 1.0);
        }
        factor
    }
}

/// Immediate consequences of a fired event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectBundle {
    #[serde(default)]
    pub hours: i64,
    #[serde(default)]
    pub contingencies: i64,
    #[serde(default)]
    pub add_items: Vec<String>,
    #[serde(default)]
    pub remove_items: Vec<String>,
    #[serde(default)]
    pub game_state: BTreeMap<String, NamedValue>,
    /// Forced delay in seconds, charged as a rounded-up hour penalty.
    #[serde(default)]
    pub wait_time: Option<u64>,
    #[serde(default)]
    pub wait_message: Option<String>,
}

impl EffectBundle {
    /// Human-readable effect lines for announcements.
    #[must_use]
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if self.hours != 0 {
            lines.push(format!("Hours: {:+}", self.hours));
        }
        if self.contingencies != 0 {
            lines.push(format!("Contingencies: {:+}", self.contingencies));
        }
        lines.extend(self.add_items.iter().map(|item| format!("Gained: {item}")));
        lines.extend(self.remove_items.iter().map(|item| format!("Lost: {item}")));
        if let Some(secs) = self.wait_time.filter(|secs| *secs > 0) {
            lines.push(format!("Delay: {secs}s"));
        }
        lines
    }
}

/// Effect bundle applied after a logical delay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeferredEffect {
    /// Delay in logical seconds after the event fires.
    pub delay: u64,
    #[serde(default)]
    pub effects: EffectBundle,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Clock gates for the time trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeConditions {
    #[serde(default)]
    pub min_time_since_start: Option<u64>,
    #[serde(default)]
    pub min_time_since_last_event: Option<u64>,
}

impl TimeConditions {
    #[must_use]
    pub fn holds(&self, since_start: u64, since_last_event: u64) -> bool {
        self.min_time_since_start
            .is_none_or(|min| min == 0 || since_start >= min)
            && self
                .min_time_since_last_event
                .is_none_or(|min| min == 0 || since_last_event >= min)
    }
}

fn default_category() -> String {
    "general".to_string()
}

/// An authored random event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDefinition {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub base_probability: f64,
    #[serde(default)]
    pub max_probability: Option<f64>,
    #[serde(default)]
    pub modifiers: EventModifiers,
    #[serde(default)]
    pub conditions: EventConditions,
    #[serde(default)]
    pub time_conditions: Option<TimeConditions>,
    #[serde(default)]
    pub one_time: bool,
    #[serde(default)]
    pub effects: EffectBundle,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub message_type: Severity,
    #[serde(default)]
    pub delayed_effects: Vec<DeferredEffect>,
}

impl EventDefinition {
    /// Parse and validate one authored definition.
    ///
    /// # Errors
    ///
    /// Returns `EventError` when the value does not describe a usable event.
    pub fn from_value(value: serde_json::Value) -> Result<Self, EventError> {
        let definition: Self =
            serde_json::from_value(value).map_err(|err| EventError::Malformed(err.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    /// Structural checks: id, title and at least one trigger.
    ///
    /// # Errors
    ///
    /// Returns the first structural problem found.
    pub fn validate(&self) -> Result<(), EventError> {
        if self.id.trim().is_empty() {
            return Err(EventError::MissingId);
        }
        if self.title.trim().is_empty() {
            return Err(EventError::MissingTitle {
                id: self.id.clone(),
            });
        }
        if self.triggers.is_empty() {
            return Err(EventError::NoTriggers {
                id: self.id.clone(),
            });
        }
        if !self.base_probability.is_finite() || self.base_probability < 0.0 {
            return Err(EventError::InvalidProbability {
                id: self.id.clone(),
                value: self.base_probability.to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn fires_on(&self, trigger: Trigger) -> bool {
        self.triggers.contains(&trigger)
    }

    /// Trigger used to pick the load-time scaling factor.
    #[must_use]
    pub fn primary_trigger(&self) -> Option<Trigger> {
        if self.fires_on(Trigger::Step) {
            Some(Trigger::Step)
        } else if self.fires_on(Trigger::Detection) {
            Some(Trigger::Detection)
        } else {
            self.triggers.first().copied()
        }
    }

    #[must_use]
    pub fn probability_cap(&self) -> f64 {
        self.max_probability
            .filter(|cap| *cap > 0.0)
            .unwrap_or(DEFAULT_MAX_EVENT_PROBABILITY)
    }
}

/// Step fields captured when an event fires.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub id: String,
    pub title: String,
    pub description: String,
}

/// Choice fields captured when an event fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceSnapshot {
    pub label: String,
    pub technique: String,
    pub hour_cost: i64,
    pub detection_chance: i32,
    pub success_chance: f64,
}

/// Read-only view of the session handed to the overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventContext {
    pub hours: i64,
    pub contingencies: i64,
    pub detections: u32,
    pub inventory: Vec<String>,
    pub skill: SkillLevel,
    pub defence: DefenceMaturity,
    pub step: Option<StepSnapshot>,
    pub choice: Option<ChoiceSnapshot>,
}

impl EventContext {
    #[must_use]
    pub fn capture(state: &PlayerState, step: Option<&Step>, choice: Option<&Choice>) -> Self {
        Self {
            hours: state.resources.time_budget,
            contingencies: state.resources.contingencies,
            detections: state.progress.detections,
            inventory: state.inventory.as_slice().to_vec(),
            skill: state.skill,
            defence: state.defence,
            step: step.map(|step| StepSnapshot {
                id: step.id.clone(),
                title: step.title.clone(),
                description: step.description.joined(),
            }),
            choice: choice.map(|choice| ChoiceSnapshot {
                label: choice.label.clone(),
                technique: choice
                    .technique
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_TECHNIQUE.to_string()),
                hour_cost: choice.hour_cost,
                detection_chance: choice.detection_chance,
                success_chance: choice.success_chance.unwrap_or(DEFAULT_SUCCESS_CHANCE),
            }),
        }
    }
}

/// Step and choice context recorded in history, with display fallbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepContext {
    pub step_title: String,
    pub step_key: String,
    pub description: String,
    pub choice_label: String,
    pub technique: String,
    pub hour_cost: i64,
    pub detection_chance: i32,
    pub success_chance: f64,
}

impl StepContext {
    fn from_context(context: &EventContext) -> Self {
        let step = context.step.clone().unwrap_or_else(|| StepSnapshot {
            id: "unknown".to_string(),
            title: "Unknown Step".to_string(),
            description: String::new(),
        });
        let (choice_label, technique, hour_cost, detection_chance, success_chance) =
            context.choice.as_ref().map_or_else(
                || {
                    (
                        "Unknown Choice".to_string(),
                        UNKNOWN_TECHNIQUE.to_string(),
                        0,
                        0,
                        DEFAULT_SUCCESS_CHANCE,
                    )
                },
                |choice| {
                    (
                        choice.label.clone(),
                        choice.technique.clone(),
                        choice.hour_cost,
                        choice.detection_chance,
                        choice.success_chance,
                    )
                },
            );
        Self {
            step_title: step.title,
            step_key: step.id,
            description: step.description,
            choice_label,
            technique,
            hour_cost,
            detection_chance,
            success_chance,
        }
    }
}

/// Resource snapshot recorded in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameContext {
    pub hours: i64,
    pub contingencies: i64,
    pub detections: u32,
    pub skill: SkillLevel,
    pub defence: DefenceMaturity,
}

/// One fired event, bound to the context it fired in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventInstance {
    pub id: String,
    pub title: String,
    pub category: String,
    pub triggers: Vec<Trigger>,
    pub fired_on: Trigger,
    /// Logical seconds since session start.
    pub timestamp: u64,
    pub game_step: u32,
    pub detection_count: u32,
    pub step_context: StepContext,
    pub game_context: GameContext,
}

impl EventInstance {
    pub(crate) fn bind(
        definition: &EventDefinition,
        fired_on: Trigger,
        context: &EventContext,
        timestamp: u64,
        game_step: u32,
        detection_count: u32,
    ) -> Self {
        Self {
            id: definition.id.clone(),
            title: definition.title.clone(),
            category: definition.category.clone(),
            triggers: definition.triggers.clone(),
            fired_on,
            timestamp,
            game_step,
            detection_count,
            step_context: StepContext::from_context(context),
            game_context: GameContext {
                hours: context.hours,
                contingencies: context.contingencies,
                detections: detection_count,
                skill: context.skill,
                defence: context.defence,
            },
        }
    }
}
