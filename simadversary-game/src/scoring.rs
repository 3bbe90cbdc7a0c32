//! End-of-session scoring.
use serde::{Deserialize, Serialize};

use crate::config::{DefenceMaturity, GameConfig, ModeId, SkillLevel};
use crate::inventory::Inventory;
use crate::numbers::{floor_f64_to_i64, i64_to_f64};

/// Inputs to the score formula, detached from the live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreInputs {
    pub inventory: Inventory,
    pub contingencies: i64,
    pub detections: u32,
    pub won: bool,
    pub skill: SkillLevel,
    pub defence: DefenceMaturity,
    pub mode: ModeId,
}

/// One inventory line contributing to the score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemBonus {
    pub item: String,
    pub bonus: i64,
}

/// Step-by-step explanation of a score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub base: i64,
    pub win_bonus: i64,
    pub items: Vec<ItemBonus>,
    pub detection_penalty: i64,
    pub contingency_bonus: i64,
    pub subtotal: i64,
    pub skill_multiplier: f64,
    pub after_skill: i64,
    pub defence_modifier: i64,
    pub after_defence: i64,
    pub mode_multiplier: f64,
    pub total: i64,
}

/// Stateless score function over configured tables.
#[derive(Debug, Clone, Copy)]
pub struct ScoringPolicy<'a> {
    config: &'a GameConfig,
}

impl<'a> ScoringPolicy<'a> {
    #[must_use]
    pub const fn new(config: &'a GameConfig) -> Self {
        Self { config }
    }

    /// Final non-negative score.
    #[must_use]
    pub fn score(&self, inputs: &ScoreInputs) -> i64 {
        self.breakdown(inputs).total
    }

    #[must_use]
    pub fn breakdown(&self, inputs: &ScoreInputs) -> ScoreBreakdown {
        let scoring = &self.config.scoring;
        let base = scoring.base_score;
        let win_bonus = if inputs.won { scoring.win_bonus } else { 0 };
        let items: Vec<ItemBonus> = inputs
            .inventory
            .iter()
            .filter_map(|item| {
                scoring.item_bonuses.get(item).map(|bonus| ItemBonus {
                    item: item.to_string(),
                    bonus: *bonus,
                })
            })
            .collect();
        let item_total: i64 = items.iter().map(|line| line.bonus).sum();
        let detection_penalty = i64::from(inputs.detections) * scoring.detection_penalty;
        let contingency_bonus = inputs.contingencies.max(0) * scoring.contingency_bonus;
        let subtotal = base + win_bonus + item_total - detection_penalty + contingency_bonus;

        let skill_multiplier = self.config.skill(inputs.skill).score_multiplier;
        let after_skill = floor_f64_to_i64(i64_to_f64(subtotal) * skill_multiplier);
        let defence_modifier = self.config.defence(inputs.defence).score_modifier;
        let after_defence = after_skill + defence_modifier;
        let mode_multiplier = self.config.mode_multiplier(&inputs.mode);
        let total = floor_f64_to_i64(i64_to_f64(after_defence) * mode_multiplier).max(0);

        ScoreBreakdown {
            base,
            win_bonus,
            items,
            detection_penalty,
            contingency_bonus,
            subtotal,
            skill_multiplier,
            after_skill,
            defence_modifier,
            after_defence,
            mode_multiplier,
            total,
        }
    }
}
