//! Centralized tuning constants for SimAdversary scenario logic.
//!
//! Data-driven balance lives in `game_config.json`; the values here are the
//! structural constants the engine relies on regardless of configuration.

// Roll scales -------------------------------------------------------------
pub(crate) const PERCENT_SCALE: f64 = 100.0;
pub(crate) const DEFAULT_SUCCESS_CHANCE: f64 = 100.0;

// Player defaults ---------------------------------------------------------
pub(crate) const DEFAULT_HOURS: i64 = 160;
pub(crate) const DEFAULT_CONTINGENCIES: i64 = 3;
pub(crate) const DEFAULT_DETECTION_THRESHOLD: u32 = 50;
pub(crate) const DEFAULT_START_STEP: &str = "start-here";

// Scoring defaults --------------------------------------------------------
pub(crate) const DEFAULT_BASE_SCORE: i64 = 100;
pub(crate) const DEFAULT_WIN_BONUS: i64 = 100;
pub(crate) const DEFAULT_DETECTION_PENALTY: i64 = 20;
pub(crate) const DEFAULT_CONTINGENCY_BONUS: i64 = 20;

// Detection tuning --------------------------------------------------------
pub(crate) const DEFAULT_PERSISTENCE_PENALTY: i64 = 5;
pub(crate) const DEFAULT_RETRY_DETECTION_INCREASE: i32 = 10;

// Event overlay tuning ----------------------------------------------------
pub(crate) const DEFAULT_EVENT_COOLDOWN_STEPS: u32 = 3;
pub(crate) const DEFAULT_MAX_EVENTS_PER_GAME: u32 = 4;
pub(crate) const DEFAULT_EVENT_DECAY_RATE: f64 = 0.85;
pub(crate) const DEFAULT_MIN_GLOBAL_PROBABILITY: f64 = 0.3;
pub(crate) const DEFAULT_CATALOG_TIMEOUT_MS: u64 = 5_000;
pub(crate) const DEFAULT_STEP_TRIGGER_SCALE: f64 = 0.3;
pub(crate) const DEFAULT_DETECTION_TRIGGER_SCALE: f64 = 0.5;
pub(crate) const DEFAULT_OTHER_TRIGGER_SCALE: f64 = 0.4;
pub(crate) const DEFAULT_MIN_SCALED_PROBABILITY: f64 = 0.01;
pub(crate) const DEFAULT_MAX_EVENT_PROBABILITY: f64 = 1.0;
pub(crate) const SECONDS_PER_HOUR: f64 = 3_600.0;

// Event text fallbacks ----------------------------------------------------
pub(crate) const UNKNOWN_TECHNIQUE: &str = "N/A";
pub(crate) const WILDCARD_APPLICABILITY: &str = "all";

// Named state keys --------------------------------------------------------
pub(crate) const STATE_GLOBAL_DETECTION_INCREASE: &str = "globalDetectionIncrease";
pub(crate) const STATE_GLOBAL_DETECTION_DECREASE: &str = "globalDetectionDecrease";
pub(crate) const STATE_BACKUP_FAILURE_ACTIVE: &str = "backupFailureActive";
pub(crate) const STATE_STEPS_REMAINING_SUFFIX: &str = "StepsRemaining";

// Inventory categorization keywords ---------------------------------------
pub(crate) const CATEGORY_TOOL_KEYWORDS: &[&str] = &["tool", "exploit"];
pub(crate) const CATEGORY_INFO_KEYWORDS: &[&str] = &["information", "list", "report"];
pub(crate) const CATEGORY_ACCESS_KEYWORDS: &[&str] = &["access", "foothold", "session"];
