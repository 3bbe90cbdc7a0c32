//! Scenario configuration: player defaults, modifier tables, scoring, test
//! types, credential classes, per-step overrides and event overlay tuning.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

use crate::constants::{
    DEFAULT_BASE_SCORE, DEFAULT_CATALOG_TIMEOUT_MS, DEFAULT_CONTINGENCIES,
    DEFAULT_CONTINGENCY_BONUS, DEFAULT_DETECTION_PENALTY, DEFAULT_DETECTION_THRESHOLD,
    DEFAULT_DETECTION_TRIGGER_SCALE, DEFAULT_EVENT_COOLDOWN_STEPS, DEFAULT_EVENT_DECAY_RATE,
    DEFAULT_HOURS, DEFAULT_MAX_EVENTS_PER_GAME, DEFAULT_MIN_GLOBAL_PROBABILITY,
    DEFAULT_MIN_SCALED_PROBABILITY, DEFAULT_OTHER_TRIGGER_SCALE, DEFAULT_PERSISTENCE_PENALTY,
    DEFAULT_RETRY_DETECTION_INCREASE, DEFAULT_START_STEP, DEFAULT_STEP_TRIGGER_SCALE,
    DEFAULT_WIN_BONUS,
};
use crate::events::Trigger;

/// Validation failures for [`GameConfig`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be at least {min} (got {value})")]
    MinViolation {
        field: &'static str,
        min: f64,
        value: f64,
    },
    #[error("{field} must be within [{min}, {max}] (got {value})")]
    RangeViolation {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },
    #[error("{table} entry {key} has an invalid multiplier {value}")]
    InvalidMultiplier {
        table: &'static str,
        key: String,
        value: f64,
    },
    #[error("test type {test_type} has an empty outcome table")]
    EmptyOutcomeTable { test_type: String },
    #[error("test type {test_type} outcome {outcome} has a negative chance")]
    NegativeOutcomeChance { test_type: String, outcome: String },
    #[error("no game modes are configured")]
    NoModes,
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Attacker sophistication selected at session start.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SkillLevel {
    #[serde(alias = "1")]
    Unsophisticated,
    #[default]
    #[serde(alias = "2")]
    OrganisedCrime,
    #[serde(alias = "3")]
    NationState,
}

impl SkillLevel {
    pub const ALL: [Self; 3] = [Self::Unsophisticated, Self::OrganisedCrime, Self::NationState];

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Unsophisticated => "unsophisticated",
            Self::OrganisedCrime => "organised_crime",
            Self::NationState => "nation_state",
        }
    }
}

impl fmt::Display for SkillLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for SkillLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "1" | "unsophisticated" | "unskilled" => Ok(Self::Unsophisticated),
            "2" | "organised_crime" | "organized_crime" => Ok(Self::OrganisedCrime),
            "3" | "nation_state" => Ok(Self::NationState),
            _ => Err(ParseLevelError {
                kind: "skill level",
                value: s.to_string(),
            }),
        }
    }
}

/// Defender maturity selected at session start.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DefenceMaturity {
    #[serde(alias = "1")]
    Low,
    #[default]
    #[serde(alias = "2")]
    Medium,
    #[serde(alias = "3")]
    High,
}

impl DefenceMaturity {
    pub const ALL: [Self; 3] = [Self::Low, Self::Medium, Self::High];

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for DefenceMaturity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for DefenceMaturity {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "low" => Ok(Self::Low),
            "2" | "medium" => Ok(Self::Medium),
            "3" | "high" => Ok(Self::High),
            _ => Err(ParseLevelError {
                kind: "defence maturity",
                value: s.to_string(),
            }),
        }
    }
}

/// Which side of the exercise the scenario puts the player on.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    #[default]
    Red,
    Blue,
}

impl Team {
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Blue => "blue",
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Error returned when a level name cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseLevelError {
    pub kind: &'static str,
    pub value: String,
}

/// Scenario identifier (`phishing`, `supply-chain`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModeId(pub String);

impl ModeId {
    #[must_use]
    pub fn new(value: &str) -> Self {
        Self(value.trim().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Starting values for a fresh player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerDefaults {
    #[serde(default = "PlayerDefaults::default_hours")]
    pub hours: i64,
    #[serde(default = "PlayerDefaults::default_contingencies")]
    pub contingencies: i64,
    #[serde(default = "PlayerDefaults::default_detection_threshold")]
    pub detection_threshold: u32,
    #[serde(default)]
    pub skill: SkillLevel,
    #[serde(default)]
    pub defence: DefenceMaturity,
    #[serde(default = "PlayerDefaults::default_start_step")]
    pub start_step: String,
}

impl PlayerDefaults {
    const fn default_hours() -> i64 {
        DEFAULT_HOURS
    }

    const fn default_contingencies() -> i64 {
        DEFAULT_CONTINGENCIES
    }

    const fn default_detection_threshold() -> u32 {
        DEFAULT_DETECTION_THRESHOLD
    }

    fn default_start_step() -> String {
        DEFAULT_START_STEP.to_string()
    }
}

impl Default for PlayerDefaults {
    fn default() -> Self {
        Self {
            hours: Self::default_hours(),
            contingencies: Self::default_contingencies(),
            detection_threshold: Self::default_detection_threshold(),
            skill: SkillLevel::default(),
            defence: DefenceMaturity::default(),
            start_step: Self::default_start_step(),
        }
    }
}

/// Multipliers attached to a skill level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillProfile {
    pub name: String,
    #[serde(default = "SkillProfile::neutral_multiplier")]
    pub hour_multiplier: f64,
    #[serde(default = "SkillProfile::neutral_multiplier")]
    pub detection_multiplier: f64,
    #[serde(default = "SkillProfile::neutral_multiplier")]
    pub score_multiplier: f64,
}

impl SkillProfile {
    const fn neutral_multiplier() -> f64 {
        1.0
    }

    #[must_use]
    pub fn neutral() -> Self {
        Self {
            name: SkillLevel::OrganisedCrime.key().to_string(),
            hour_multiplier: 1.0,
            detection_multiplier: 1.0,
            score_multiplier: 1.0,
        }
    }
}

/// Additive modifiers attached to a defence maturity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DefenceProfile {
    pub name: String,
    #[serde(default)]
    pub detection_modifier: i32,
    #[serde(default)]
    pub score_modifier: i64,
}

/// Per-scenario settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeProfile {
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "ModeProfile::default_score_multiplier")]
    pub score_multiplier: f64,
    #[serde(default)]
    pub team: Team,
    /// Key into the event manifest's scenario file map; defaults to the mode id.
    #[serde(default)]
    pub scenario_file: Option<String>,
}

impl ModeProfile {
    const fn default_score_multiplier() -> f64 {
        1.0
    }
}

/// Score formula inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "ScoringConfig::default_base_score")]
    pub base_score: i64,
    #[serde(default = "ScoringConfig::default_win_bonus")]
    pub win_bonus: i64,
    #[serde(default = "ScoringConfig::default_detection_penalty")]
    pub detection_penalty: i64,
    #[serde(default = "ScoringConfig::default_contingency_bonus")]
    pub contingency_bonus: i64,
    #[serde(default)]
    pub item_bonuses: BTreeMap<String, i64>,
}

impl ScoringConfig {
    const fn default_base_score() -> i64 {
        DEFAULT_BASE_SCORE
    }

    const fn default_win_bonus() -> i64 {
        DEFAULT_WIN_BONUS
    }

    const fn default_detection_penalty() -> i64 {
        DEFAULT_DETECTION_PENALTY
    }

    const fn default_contingency_bonus() -> i64 {
        DEFAULT_CONTINGENCY_BONUS
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_score: Self::default_base_score(),
            win_bonus: Self::default_win_bonus(),
            detection_penalty: Self::default_detection_penalty(),
            contingency_bonus: Self::default_contingency_bonus(),
            item_bonuses: BTreeMap::new(),
        }
    }
}

/// Detection recovery tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "DetectionConfig::default_persistence_penalty")]
    pub persistence_penalty: i64,
    #[serde(default = "DetectionConfig::default_retry_increase")]
    pub retry_detection_increase: i32,
}

impl DetectionConfig {
    const fn default_persistence_penalty() -> i64 {
        DEFAULT_PERSISTENCE_PENALTY
    }

    const fn default_retry_increase() -> i32 {
        DEFAULT_RETRY_DETECTION_INCREASE
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            persistence_penalty: Self::default_persistence_penalty(),
            retry_detection_increase: Self::default_retry_increase(),
        }
    }
}

/// One row of a test type's outcome table. Rows are walked in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcomeConfig {
    pub key: String,
    pub chance: f64,
    #[serde(default)]
    pub item: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub is_trap: bool,
    /// A trap outcome that also routes the attempt into the detected branch.
    #[serde(default)]
    pub forces_detection: bool,
    #[serde(default)]
    pub feedback: Vec<String>,
    /// Second-stage table rolled when this row is selected.
    #[serde(default)]
    pub nested: Vec<TestOutcomeConfig>,
}

/// A test action definition (e.g. credential validation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestTypeConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub required_item: String,
    pub outcomes: Vec<TestOutcomeConfig>,
}

/// Per-step overrides for scenario-specific tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOverride {
    /// Giving up after a detection re-offers the step instead of ending the session.
    #[serde(default)]
    pub detection_tolerant: bool,
    /// Retries reuse the adjusted detection chance without the retry increment.
    #[serde(default)]
    pub retry_uses_base_detection: bool,
}

/// Probability scaling applied to event definitions as they are loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerScaling {
    #[serde(default = "TriggerScaling::default_step")]
    pub step: f64,
    #[serde(default = "TriggerScaling::default_detection")]
    pub detection: f64,
    #[serde(default = "TriggerScaling::default_other")]
    pub other: f64,
    #[serde(default = "TriggerScaling::default_minimum")]
    pub minimum: f64,
}

impl TriggerScaling {
    const fn default_step() -> f64 {
        DEFAULT_STEP_TRIGGER_SCALE
    }

    const fn default_detection() -> f64 {
        DEFAULT_DETECTION_TRIGGER_SCALE
    }

    const fn default_other() -> f64 {
        DEFAULT_OTHER_TRIGGER_SCALE
    }

    const fn default_minimum() -> f64 {
        DEFAULT_MIN_SCALED_PROBABILITY
    }

    /// Identity scaling, used when callers want raw authored probabilities.
    #[must_use]
    pub const fn identity() -> Self {
        Self {
            step: 1.0,
            detection: 1.0,
            other: 1.0,
            minimum: 0.0,
        }
    }

    /// Scale factor for an event keyed by its primary trigger.
    #[must_use]
    pub const fn factor_for(&self, primary: Option<Trigger>) -> f64 {
        match primary {
            Some(Trigger::Step) => self.step,
            Some(Trigger::Detection) => self.detection,
            _ => self.other,
        }
    }
}

impl Default for TriggerScaling {
    fn default() -> Self {
        Self {
            step: Self::default_step(),
            detection: Self::default_detection(),
            other: Self::default_other(),
            minimum: Self::default_minimum(),
        }
    }
}

/// Event overlay rate limiting and loading tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTuning {
    #[serde(default = "EventTuning::default_cooldown_steps")]
    pub cooldown_steps: u32,
    #[serde(default = "EventTuning::default_max_events")]
    pub max_events_per_game: u32,
    #[serde(default = "EventTuning::default_decay_rate")]
    pub decay_rate: f64,
    #[serde(default = "EventTuning::default_min_probability")]
    pub min_global_probability: f64,
    #[serde(default = "EventTuning::default_load_timeout_ms")]
    pub load_timeout_ms: u64,
    #[serde(default)]
    pub trigger_scaling: TriggerScaling,
}

impl EventTuning {
    const fn default_cooldown_steps() -> u32 {
        DEFAULT_EVENT_COOLDOWN_STEPS
    }

    const fn default_max_events() -> u32 {
        DEFAULT_MAX_EVENTS_PER_GAME
    }

    const fn default_decay_rate() -> f64 {
        DEFAULT_EVENT_DECAY_RATE
    }

    const fn default_min_probability() -> f64 {
        DEFAULT_MIN_GLOBAL_PROBABILITY
    }

    const fn default_load_timeout_ms() -> u64 {
        DEFAULT_CATALOG_TIMEOUT_MS
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.decay_rate > 0.0 && self.decay_rate <= 1.0) {
            return Err(ConfigError::RangeViolation {
                field: "events.decay_rate",
                min: 0.0,
                max: 1.0,
                value: self.decay_rate,
            });
        }
        if !(0.0..=1.0).contains(&self.min_global_probability) {
            return Err(ConfigError::RangeViolation {
                field: "events.min_global_probability",
                min: 0.0,
                max: 1.0,
                value: self.min_global_probability,
            });
        }
        let scaling = &self.trigger_scaling;
        for (field, value) in [
            ("events.trigger_scaling.step", scaling.step),
            ("events.trigger_scaling.detection", scaling.detection),
            ("events.trigger_scaling.other", scaling.other),
            ("events.trigger_scaling.minimum", scaling.minimum),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::MinViolation {
                    field,
                    min: 0.0,
                    value,
                });
            }
        }
        Ok(())
    }
}

impl Default for EventTuning {
    fn default() -> Self {
        Self {
            cooldown_steps: Self::default_cooldown_steps(),
            max_events_per_game: Self::default_max_events(),
            decay_rate: Self::default_decay_rate(),
            min_global_probability: Self::default_min_probability(),
            load_timeout_ms: Self::default_load_timeout_ms(),
            trigger_scaling: TriggerScaling::default(),
        }
    }
}

/// Complete scenario configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GameConfig {
    #[serde(default)]
    pub player: PlayerDefaults,
    #[serde(default)]
    pub skill_levels: BTreeMap<SkillLevel, SkillProfile>,
    #[serde(default)]
    pub defence_levels: BTreeMap<DefenceMaturity, DefenceProfile>,
    #[serde(default)]
    pub modes: BTreeMap<ModeId, ModeProfile>,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub test_types: BTreeMap<String, TestTypeConfig>,
    /// Credential-class items mapped to their exclusivity base type.
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
    /// Reward items that arm the one-shot persistence shield.
    #[serde(default)]
    pub persistence_items: Vec<String>,
    #[serde(default)]
    pub step_overrides: BTreeMap<String, StepOverride>,
    #[serde(default)]
    pub events: EventTuning,
}

impl GameConfig {
    /// Parse a configuration document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed JSON and any validation
    /// failure reported by [`GameConfig::validate`].
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the bundled configuration, falling back to built-in defaults.
    #[must_use]
    pub fn load_from_static() -> Self {
        static CONFIG: OnceLock<GameConfig> = OnceLock::new();
        CONFIG
            .get_or_init(|| {
                Self::from_json(include_str!("../../assets/data/game_config.json"))
                    .unwrap_or_else(|err| {
                        log::error!("bundled game config rejected: {err}");
                        Self::default()
                    })
            })
            .clone()
    }

    /// Check bounds on every table.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when any field violates the documented bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.player.hours <= 0 {
            return Err(ConfigError::MinViolation {
                field: "player.hours",
                min: 1.0,
                value: crate::numbers::i64_to_f64(self.player.hours),
            });
        }
        if self.player.contingencies < 0 {
            return Err(ConfigError::MinViolation {
                field: "player.contingencies",
                min: 0.0,
                value: crate::numbers::i64_to_f64(self.player.contingencies),
            });
        }
        if self.modes.is_empty() {
            return Err(ConfigError::NoModes);
        }
        for (level, profile) in &self.skill_levels {
            for value in [
                profile.hour_multiplier,
                profile.detection_multiplier,
                profile.score_multiplier,
            ] {
                if !value.is_finite() || value < 0.0 {
                    return Err(ConfigError::InvalidMultiplier {
                        table: "skill_levels",
                        key: level.key().to_string(),
                        value,
                    });
                }
            }
        }
        for (mode, profile) in &self.modes {
            if !profile.score_multiplier.is_finite() || profile.score_multiplier < 0.0 {
                return Err(ConfigError::InvalidMultiplier {
                    table: "modes",
                    key: mode.to_string(),
                    value: profile.score_multiplier,
                });
            }
        }
        for (name, test) in &self.test_types {
            validate_outcomes(name, &test.outcomes)?;
        }
        self.events.validate()
    }

    /// Skill multipliers, neutral when the level is missing from the table.
    #[must_use]
    pub fn skill(&self, level: SkillLevel) -> SkillProfile {
        self.skill_levels
            .get(&level)
            .cloned()
            .unwrap_or_else(SkillProfile::neutral)
    }

    /// Defence modifiers, neutral when the maturity is missing from the table.
    #[must_use]
    pub fn defence(&self, maturity: DefenceMaturity) -> DefenceProfile {
        self.defence_levels
            .get(&maturity)
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn mode(&self, mode: &ModeId) -> Option<&ModeProfile> {
        self.modes.get(mode)
    }

    /// Score multiplier for a mode, 1.0 when unknown.
    #[must_use]
    pub fn mode_multiplier(&self, mode: &ModeId) -> f64 {
        self.mode(mode).map_or(1.0, |profile| profile.score_multiplier)
    }

    /// Team for a mode, falling back to the red team.
    #[must_use]
    pub fn team_for_mode(&self, mode: &ModeId) -> Team {
        self.mode(mode).map_or_else(Team::default, |profile| profile.team)
    }

    /// Scenario file key used for the mode-specific event set.
    #[must_use]
    pub fn scenario_file_key(&self, mode: &ModeId) -> String {
        self.mode(mode)
            .and_then(|profile| profile.scenario_file.clone())
            .unwrap_or_else(|| mode.to_string())
    }

    #[must_use]
    pub fn step_override(&self, step_id: &str) -> StepOverride {
        self.step_overrides
            .get(step_id)
            .copied()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn test_type(&self, name: &str) -> Option<&TestTypeConfig> {
        self.test_types.get(name)
    }

    #[must_use]
    pub fn is_persistence_item(&self, item: &str) -> bool {
        self.persistence_items.iter().any(|candidate| candidate == item)
    }

    /// Exclusivity base type for a credential-class item.
    #[must_use]
    pub fn credential_base(&self, item: &str) -> Option<&str> {
        self.credentials.get(item).map(String::as_str)
    }
}

fn validate_outcomes(test_type: &str, outcomes: &[TestOutcomeConfig]) -> Result<(), ConfigError> {
    if outcomes.is_empty() {
        return Err(ConfigError::EmptyOutcomeTable {
            test_type: test_type.to_string(),
        });
    }
    for outcome in outcomes {
        if !outcome.chance.is_finite() || outcome.chance < 0.0 {
            return Err(ConfigError::NegativeOutcomeChance {
                test_type: test_type.to_string(),
                outcome: outcome.key.clone(),
            });
        }
        if !outcome.nested.is_empty() {
            validate_outcomes(test_type, &outcome.nested)?;
        }
    }
    Ok(())
}
