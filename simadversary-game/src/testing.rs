//! Test actions: weighted, possibly two-stage outcome tables that consume a
//! required item and may grant another.
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{GameConfig, TestOutcomeConfig};
use crate::inventory::{Inventory, InventoryPolicy};
use crate::rng::roll_percent;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TestError {
    #[error("unknown test type: {0}")]
    UnknownTestType(String),
    #[error("test type {0} has no outcomes")]
    EmptyOutcomeTable(String),
}

/// Resolved test outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub test_type: String,
    pub outcome: String,
    #[serde(default)]
    pub nested_outcome: Option<String>,
    #[serde(default)]
    pub item: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    pub success: bool,
    pub trapped: bool,
    pub forces_detection: bool,
    #[serde(default)]
    pub feedback: Vec<String>,
    pub roll: f64,
    #[serde(default)]
    pub nested_roll: Option<f64>,
}

/// Result of attempting a test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TestResolution {
    /// The required item was absent; nothing was rolled or consumed.
    MissingItem { required_item: String },
    Resolved(TestOutcome),
}

impl TestResolution {
    #[must_use]
    pub const fn outcome(&self) -> Option<&TestOutcome> {
        match self {
            Self::Resolved(outcome) => Some(outcome),
            Self::MissingItem { .. } => None,
        }
    }

    #[must_use]
    pub fn feedback(&self) -> String {
        match self {
            Self::MissingItem { required_item } => {
                format!("You need '{required_item}' in your inventory to perform this test.")
            }
            Self::Resolved(outcome) => outcome.message.clone().unwrap_or_default(),
        }
    }
}

/// Resolves test actions against configured outcome tables.
#[derive(Debug, Clone, Copy)]
pub struct TestResolver<'a> {
    config: &'a GameConfig,
    inventory: &'a InventoryPolicy,
}

impl<'a> TestResolver<'a> {
    #[must_use]
    pub const fn new(config: &'a GameConfig, inventory: &'a InventoryPolicy) -> Self {
        Self { config, inventory }
    }

    /// Whether the player can run this test right now.
    ///
    /// # Errors
    ///
    /// Returns `TestError::UnknownTestType` when the test type is not configured.
    pub fn required_item(&self, test_type: &str) -> Result<&'a str, TestError> {
        self.config
            .test_type(test_type)
            .map(|test| test.required_item.as_str())
            .ok_or_else(|| TestError::UnknownTestType(test_type.to_string()))
    }

    /// Run a test: consume the required item, walk the outcome bands, then
    /// roll the nested table when the selected row has one.
    ///
    /// # Errors
    ///
    /// Returns `TestError::UnknownTestType` when the test type is not configured
    /// and `TestError::EmptyOutcomeTable` when it has nothing to roll against.
    pub fn resolve<R: Rng + ?Sized>(
        &self,
        test_type: &str,
        inventory: &mut Inventory,
        rng: &mut R,
    ) -> Result<TestResolution, TestError> {
        let test = self
            .config
            .test_type(test_type)
            .ok_or_else(|| TestError::UnknownTestType(test_type.to_string()))?;

        if !inventory.contains(&test.required_item) {
            log::debug!(
                "test {test_type} skipped: missing {}",
                test.required_item
            );
            return Ok(TestResolution::MissingItem {
                required_item: test.required_item.clone(),
            });
        }

        let roll = roll_percent(rng);
        let Some(selected) = select_band(&test.outcomes, roll) else {
            return Err(TestError::EmptyOutcomeTable(test_type.to_string()));
        };
        self.inventory.remove(inventory, &test.required_item);

        let mut outcome = TestOutcome {
            test_type: test_type.to_string(),
            outcome: selected.key.clone(),
            nested_outcome: None,
            item: selected.item.clone(),
            message: selected.message.clone(),
            success: !selected.is_trap,
            trapped: selected.is_trap,
            forces_detection: selected.is_trap && selected.forces_detection,
            feedback: selected.feedback.clone(),
            roll,
            nested_roll: None,
        };

        if !selected.is_trap && !selected.nested.is_empty() {
            let nested_roll = roll_percent(rng);
            if let Some(nested) = select_band(&selected.nested, nested_roll) {
                outcome.nested_outcome = Some(nested.key.clone());
                outcome.item.clone_from(&nested.item);
                outcome.message.clone_from(&nested.message);
            }
            outcome.nested_roll = Some(nested_roll);
        }

        if let Some(item) = &outcome.item {
            self.inventory.add(inventory, item);
        }
        log::debug!(
            "test {test_type} rolled {roll:.2} -> {} (trap: {})",
            outcome.outcome,
            outcome.trapped
        );
        Ok(TestResolution::Resolved(outcome))
    }
}

/// Walk cumulative bands in order; the last row absorbs residual mass.
fn select_band(outcomes: &[TestOutcomeConfig], roll: f64) -> Option<&TestOutcomeConfig> {
    let mut cumulative = 0.0;
    for outcome in outcomes {
        cumulative += outcome.chance;
        if roll < cumulative {
            return Some(outcome);
        }
    }
    outcomes.last()
}
