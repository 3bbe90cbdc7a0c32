//! Session-scoped player state: resources, progress, inventory, attempt
//! counters, the decision path log and status flags.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::{DefenceMaturity, GameConfig, ModeId, SkillLevel};
use crate::constants::{
    STATE_BACKUP_FAILURE_ACTIVE, STATE_GLOBAL_DETECTION_DECREASE, STATE_GLOBAL_DETECTION_INCREASE,
    STATE_STEPS_REMAINING_SUFFIX,
};
use crate::inventory::Inventory;
use crate::numbers::ceil_f64_to_i32;

/// Consumable resources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// Remaining hours; negative ends the session.
    pub time_budget: i64,
    pub contingencies: i64,
}

/// Cumulative progress counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current_step: Option<String>,
    pub steps_taken: u32,
    pub time_spent: i64,
    pub detections: u32,
    pub contingencies_spent: u32,
}

/// Outcome of an attempt as recorded in the path log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessFlag {
    Succeeded,
    Failed,
    #[default]
    Unresolved,
}

impl From<bool> for SuccessFlag {
    fn from(value: bool) -> Self {
        if value { Self::Succeeded } else { Self::Failed }
    }
}

impl fmt::Display for SuccessFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Unresolved => "unresolved",
        })
    }
}

/// One resolved attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEntry {
    pub step_id: String,
    pub step_title: String,
    pub label: String,
    pub choice_index: usize,
    #[serde(default)]
    pub technique: Option<String>,
    pub detected: bool,
    pub success: SuccessFlag,
    #[serde(default)]
    pub persistence_used: bool,
    #[serde(default)]
    pub bypassed: bool,
    #[serde(default)]
    pub exceeded_limit: bool,
    #[serde(default)]
    pub trap_triggered: bool,
    #[serde(default)]
    pub retry: bool,
    #[serde(default)]
    pub test_type: Option<String>,
    #[serde(default)]
    pub test_outcome: Option<String>,
    pub skill: SkillLevel,
    pub defence: DefenceMaturity,
}

impl PathEntry {
    /// Label as displayed in path logs, with a retry marker.
    #[must_use]
    pub fn display_label(&self) -> String {
        if self.retry {
            format!("{} (Retry)", self.label)
        } else {
            self.label.clone()
        }
    }
}

/// Attempt counts keyed by step and action label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptCounters {
    counts: BTreeMap<String, u32>,
}

impl AttemptCounters {
    fn key(step_id: &str, label: &str) -> String {
        format!("{step_id}::{label}")
    }

    #[must_use]
    pub fn get(&self, step_id: &str, label: &str) -> u32 {
        self.counts
            .get(&Self::key(step_id, label))
            .copied()
            .unwrap_or(0)
    }

    /// Increment and return the new count.
    pub fn increment(&mut self, step_id: &str, label: &str) -> u32 {
        let count = self.counts.entry(Self::key(step_id, label)).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.counts.iter().map(|(key, count)| (key.as_str(), *count))
    }
}

/// Value written through a named-state command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NamedValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl NamedValue {
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            Self::Text(text) => text.trim().parse().ok(),
        }
    }

    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::Bool(flag) => *flag,
            Self::Number(value) => *value != 0.0,
            Self::Text(text) => !text.is_empty() && text != "false",
        }
    }
}

impl From<serde_json::Value> for NamedValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Bool(flag) => Self::Bool(flag),
            serde_json::Value::Number(number) => Self::Number(number.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(text) => Self::Text(text),
            other => Self::Text(other.to_string()),
        }
    }
}

/// Event-driven temporary modifiers.
///
/// Known keys are typed; anything else lands in `extra`. Keys ending in
/// `StepsRemaining` are countdowns ticked once per resolved action; when one
/// reaches zero the modifier named by its prefix is cleared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuxModifiers {
    pub detection_increase: i32,
    pub detection_decrease: i32,
    pub backup_failure_active: bool,
    pub countdowns: BTreeMap<String, u32>,
    pub extra: BTreeMap<String, NamedValue>,
}

impl AuxModifiers {
    /// Apply a named-state write.
    pub fn set(&mut self, key: &str, value: NamedValue) {
        match key {
            STATE_GLOBAL_DETECTION_INCREASE => {
                self.detection_increase = ceil_f64_to_i32(value.as_f64().unwrap_or(0.0));
            }
            STATE_GLOBAL_DETECTION_DECREASE => {
                self.detection_decrease = ceil_f64_to_i32(value.as_f64().unwrap_or(0.0));
            }
            STATE_BACKUP_FAILURE_ACTIVE => self.backup_failure_active = value.truthy(),
            _ if key.ends_with(STATE_STEPS_REMAINING_SUFFIX) => {
                let steps = value.as_f64().unwrap_or(0.0).max(0.0);
                let steps = u32::try_from(ceil_f64_to_i32(steps)).unwrap_or(0);
                if steps == 0 {
                    self.countdowns.remove(key);
                } else {
                    self.countdowns.insert(key.to_string(), steps);
                }
            }
            _ => {
                self.extra.insert(key.to_string(), value);
            }
        }
    }

    /// Additive shift applied to every adjusted detection chance.
    #[must_use]
    pub const fn detection_shift(&self) -> i32 {
        self.detection_increase.saturating_sub(self.detection_decrease)
    }

    /// Tick every countdown; returns the keys of modifiers that expired.
    pub fn tick(&mut self) -> Vec<String> {
        let mut expired = Vec::new();
        self.countdowns.retain(|key, remaining| {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                expired.push(key.clone());
                false
            } else {
                true
            }
        });
        for key in &expired {
            let target = key.trim_end_matches(STATE_STEPS_REMAINING_SUFFIX);
            self.clear(target);
        }
        expired
    }

    fn clear(&mut self, key: &str) {
        match key {
            STATE_GLOBAL_DETECTION_INCREASE => self.detection_increase = 0,
            STATE_GLOBAL_DETECTION_DECREASE => self.detection_decrease = 0,
            STATE_BACKUP_FAILURE_ACTIVE => self.backup_failure_active = false,
            _ => {
                self.extra.remove(key);
            }
        }
    }
}

/// One-shot shield plus auxiliary modifiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusFlags {
    pub ignore_next_detection: bool,
    #[serde(default)]
    pub aux: AuxModifiers,
}

/// Mutable record of a single session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub player: String,
    pub mode: ModeId,
    pub skill: SkillLevel,
    pub defence: DefenceMaturity,
    pub resources: Resources,
    pub progress: Progress,
    pub inventory: Inventory,
    pub attempts: AttemptCounters,
    pub path: Vec<PathEntry>,
    pub status: StatusFlags,
}

impl PlayerState {
    /// Fresh state seeded from configuration defaults.
    #[must_use]
    pub fn new(
        player: &str,
        mode: ModeId,
        skill: SkillLevel,
        defence: DefenceMaturity,
        config: &GameConfig,
    ) -> Self {
        Self {
            player: player.trim().to_string(),
            mode,
            skill,
            defence,
            resources: Resources {
                time_budget: config.player.hours,
                contingencies: config.player.contingencies,
            },
            progress: Progress::default(),
            inventory: Inventory::new(),
            attempts: AttemptCounters::default(),
            path: Vec::new(),
            status: StatusFlags::default(),
        }
    }

    /// Deduct hours spent on an action or penalty.
    pub const fn spend_hours(&mut self, hours: i64) {
        self.resources.time_budget = self.resources.time_budget.saturating_sub(hours);
        self.progress.time_spent = self.progress.time_spent.saturating_add(hours);
    }

    /// Apply an event time delta (positive grants hours).
    pub const fn adjust_hours(&mut self, delta: i64) {
        self.resources.time_budget = self.resources.time_budget.saturating_add(delta);
        self.progress.time_spent = self.progress.time_spent.saturating_sub(delta);
    }

    /// Apply a contingency delta, never dropping below zero.
    pub fn adjust_contingencies(&mut self, delta: i64) {
        self.resources.contingencies = self.resources.contingencies.saturating_add(delta).max(0);
    }

    #[must_use]
    pub const fn out_of_time(&self) -> bool {
        self.resources.time_budget < 0
    }

    #[must_use]
    pub fn last_entry(&self) -> Option<&PathEntry> {
        self.path.last()
    }

    pub fn last_entry_mut(&mut self) -> Option<&mut PathEntry> {
        self.path.last_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> PlayerState {
        PlayerState::new(
            " operator ",
            ModeId::new("phishing"),
            SkillLevel::OrganisedCrime,
            DefenceMaturity::Medium,
            &GameConfig::load_from_static(),
        )
    }

    #[test]
    fn new_state_uses_config_defaults() {
        let state = state();
        assert_eq!(state.player, "operator");
        assert_eq!(state.resources.time_budget, 160);
        assert_eq!(state.resources.contingencies, 3);
        assert!(state.path.is_empty());
        assert!(!state.status.ignore_next_detection);
    }

    #[test]
    fn resource_helpers_track_spend() {
        let mut state = state();
        state.spend_hours(10);
        state.adjust_hours(-5);
        assert_eq!(state.resources.time_budget, 145);
        assert_eq!(state.progress.time_spent, 15);
        state.adjust_contingencies(-10);
        assert_eq!(state.resources.contingencies, 0);
        state.spend_hours(200);
        assert!(state.out_of_time());
    }

    #[test]
    fn attempt_counters_are_monotonic() {
        let mut counters = AttemptCounters::default();
        assert_eq!(counters.get("s", "a"), 0);
        assert_eq!(counters.increment("s", "a"), 1);
        assert_eq!(counters.increment("s", "a"), 2);
        assert_eq!(counters.increment("s", "b"), 1);
        assert_eq!(counters.get("s", "a"), 2);
        assert_eq!(counters.iter().count(), 2);
    }

    #[test]
    fn aux_modifiers_type_known_keys() {
        let mut aux = AuxModifiers::default();
        aux.set(STATE_GLOBAL_DETECTION_INCREASE, NamedValue::Number(15.0));
        aux.set(STATE_GLOBAL_DETECTION_DECREASE, NamedValue::Number(5.0));
        aux.set(STATE_BACKUP_FAILURE_ACTIVE, NamedValue::Bool(true));
        aux.set("analystMood", NamedValue::Text("tense".to_string()));
        assert_eq!(aux.detection_shift(), 10);
        assert!(aux.backup_failure_active);
        assert_eq!(
            aux.extra.get("analystMood"),
            Some(&NamedValue::Text("tense".to_string()))
        );
    }

    #[test]
    fn countdown_expiry_clears_named_modifier() {
        let mut aux = AuxModifiers::default();
        aux.set(STATE_GLOBAL_DETECTION_INCREASE, NamedValue::Number(20.0));
        aux.set("globalDetectionIncreaseStepsRemaining", NamedValue::Number(2.0));
        assert!(aux.tick().is_empty());
        assert_eq!(aux.detection_shift(), 20);
        let expired = aux.tick();
        assert_eq!(expired, vec!["globalDetectionIncreaseStepsRemaining".to_string()]);
        assert_eq!(aux.detection_shift(), 0);
        assert!(aux.countdowns.is_empty());
    }

    #[test]
    fn named_values_convert_from_json() {
        let value = NamedValue::from(serde_json::json!(3));
        assert_eq!(value.as_f64(), Some(3.0));
        assert!(NamedValue::from(serde_json::json!(true)).truthy());
        assert!(!NamedValue::from(serde_json::json!("false")).truthy());
    }
}
