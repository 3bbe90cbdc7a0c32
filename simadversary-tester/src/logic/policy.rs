use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use simadversary_game::{
    ActionAvailability, Choice, GameConfig, NextStep, PlayerState, Recovery, Step,
};

/// Decision returned by a [`PlayerPolicy`]
#[derive(Debug, Clone)]
pub struct PolicyDecision {
    pub choice_index: usize,
    pub rationale: Option<String>,
}

impl PolicyDecision {
    #[must_use]
    pub fn new(choice_index: usize, rationale: Option<String>) -> Self {
        Self {
            choice_index,
            rationale,
        }
    }
}

/// What a policy sees when it has to pick an action.
pub struct ActionView<'a> {
    pub config: &'a GameConfig,
    pub state: &'a PlayerState,
    pub step: &'a Step,
    /// Actions the player could select right now.
    pub options: Vec<&'a ActionAvailability>,
}

impl<'a> ActionView<'a> {
    /// Keep enabled actions whose test item, if any, is held.
    #[must_use]
    pub fn new(
        config: &'a GameConfig,
        state: &'a PlayerState,
        step: &'a Step,
        availability: &'a [ActionAvailability],
    ) -> Self {
        let options = availability
            .iter()
            .filter(|action| action.enabled)
            .filter(|action| {
                step.choice(action.index)
                    .is_some_and(|choice| test_item_held(config, state, choice))
            })
            .collect();
        Self {
            config,
            state,
            step,
            options,
        }
    }

    fn choice(&self, action: &ActionAvailability) -> Option<&'a Choice> {
        self.step.choice(action.index)
    }

    /// Score bonus of unheld reward items, plus a bonus for reaching the goal.
    fn value(&self, action: &ActionAvailability) -> i64 {
        let Some(choice) = self.choice(action) else {
            return 0;
        };
        let items: i64 = choice
            .reward_items()
            .into_iter()
            .filter(|item| !self.state.inventory.contains(item))
            .filter_map(|item| self.config.scoring.item_bonuses.get(item))
            .sum();
        let goal = if matches!(choice.next, Some(NextStep::Goal)) {
            self.config.scoring.win_bonus
        } else {
            0
        };
        items + goal
    }
}

fn test_item_held(config: &GameConfig, state: &PlayerState, choice: &Choice) -> bool {
    choice.resolved_test_type().is_none_or(|test_type| {
        config
            .test_type(&test_type)
            .is_some_and(|test| state.inventory.contains(&test.required_item))
    })
}

/// Policy interface for automated play strategies.
pub trait PlayerPolicy {
    /// Name used for logging/debug output.
    fn name(&self) -> &'static str;

    /// Select an action; `None` when nothing is playable.
    fn pick_action(&mut self, view: &ActionView<'_>) -> Option<PolicyDecision>;

    /// Select a recovery move from a non-empty list.
    fn pick_recovery(&mut self, state: &PlayerState, options: &[Recovery]) -> Recovery;
}

/// Built-in gameplay strategies for automated runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GameplayStrategy {
    Cautious,
    Bold,
    Balanced,
    Random,
}

impl GameplayStrategy {
    pub const ALL: [Self; 4] = [Self::Cautious, Self::Bold, Self::Balanced, Self::Random];

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Cautious => "cautious",
            Self::Bold => "bold",
            Self::Balanced => "balanced",
            Self::Random => "random",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Cautious => "Cautious",
            Self::Bold => "Bold",
            Self::Balanced => "Balanced",
            Self::Random => "Random",
        }
    }

    #[must_use]
    pub fn create_policy(self, seed: u64) -> Box<dyn PlayerPolicy + Send> {
        match self {
            Self::Cautious => Box::new(CautiousPolicy),
            Self::Bold => Box::new(BoldPolicy),
            Self::Balanced => Box::new(BalancedPolicy),
            Self::Random => Box::new(RandomPolicy::new(seed)),
        }
    }
}

impl fmt::Display for GameplayStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for GameplayStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.key().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown policy `{s}`"))
    }
}

struct CautiousPolicy;
struct BoldPolicy;
struct BalancedPolicy;

struct RandomPolicy {
    rng: ChaCha20Rng,
}

impl RandomPolicy {
    fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }
}

fn prefer(options: &[Recovery], order: &[Recovery]) -> Recovery {
    order
        .iter()
        .copied()
        .find(|candidate| options.contains(candidate))
        .unwrap_or(Recovery::GiveUp)
}

impl PlayerPolicy for CautiousPolicy {
    fn name(&self) -> &'static str {
        "Cautious"
    }

    fn pick_action(&mut self, view: &ActionView<'_>) -> Option<PolicyDecision> {
        let action = view
            .options
            .iter()
            .min_by_key(|action| (action.adjusted.detection, action.adjusted.hours))?;
        Some(PolicyDecision::new(
            action.index,
            Some(format!("detection {}%", action.adjusted.detection)),
        ))
    }

    fn pick_recovery(&mut self, _state: &PlayerState, options: &[Recovery]) -> Recovery {
        prefer(
            options,
            &[Recovery::UseContingency, Recovery::ChooseAnother, Recovery::GiveUp],
        )
    }
}

impl PlayerPolicy for BoldPolicy {
    fn name(&self) -> &'static str {
        "Bold"
    }

    fn pick_action(&mut self, view: &ActionView<'_>) -> Option<PolicyDecision> {
        let (value, action) = view
            .options
            .iter()
            .map(|action| (view.value(action), action))
            .max_by_key(|(value, action)| (*value, Reverse(action.adjusted.hours)))?;
        Some(PolicyDecision::new(
            action.index,
            Some(format!("value {value}")),
        ))
    }

    fn pick_recovery(&mut self, _state: &PlayerState, options: &[Recovery]) -> Recovery {
        prefer(
            options,
            &[Recovery::Retry, Recovery::UseContingency, Recovery::ChooseAnother],
        )
    }
}

impl PlayerPolicy for BalancedPolicy {
    fn name(&self) -> &'static str {
        "Balanced"
    }

    fn pick_action(&mut self, view: &ActionView<'_>) -> Option<PolicyDecision> {
        let (score, action) = view
            .options
            .iter()
            .map(|action| {
                let risk = i64::from(action.adjusted.detection) + action.adjusted.hours * 2;
                (view.value(action) - risk, action)
            })
            .max_by_key(|(score, action)| (*score, Reverse(action.index)))?;
        Some(PolicyDecision::new(
            action.index,
            Some(format!("score {score}")),
        ))
    }

    fn pick_recovery(&mut self, state: &PlayerState, options: &[Recovery]) -> Recovery {
        if state.resources.contingencies > 1 {
            prefer(options, &[Recovery::UseContingency, Recovery::ChooseAnother])
        } else if state.resources.time_budget > 24 {
            prefer(
                options,
                &[Recovery::Retry, Recovery::ChooseAnother, Recovery::UseContingency],
            )
        } else {
            prefer(options, &[Recovery::UseContingency, Recovery::ChooseAnother])
        }
    }
}

impl PlayerPolicy for RandomPolicy {
    fn name(&self) -> &'static str {
        "Random"
    }

    fn pick_action(&mut self, view: &ActionView<'_>) -> Option<PolicyDecision> {
        if view.options.is_empty() {
            return None;
        }
        let pick = self.rng.gen_range(0..view.options.len());
        let action = view.options[pick];
        Some(PolicyDecision::new(
            action.index,
            Some(format!("{pick} of {}", view.options.len())),
        ))
    }

    fn pick_recovery(&mut self, _state: &PlayerState, options: &[Recovery]) -> Recovery {
        options
            .choose(&mut self.rng)
            .copied()
            .unwrap_or(Recovery::GiveUp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simadversary_game::{AdjustedAction, DefenceMaturity, ModeId, SkillLevel, TextBlock};

    fn choice(label: &str, reward: Option<&str>, next: Option<NextStep>) -> Choice {
        let mut choice = Choice::new(label, 4, 10);
        choice.reward = reward.map(str::to_string);
        choice.next = next;
        choice
    }

    fn fixture() -> (GameConfig, PlayerState, Step, Vec<ActionAvailability>) {
        let config = GameConfig::load_from_static();
        let state = PlayerState::new(
            "bot",
            ModeId::new("phishing"),
            SkillLevel::OrganisedCrime,
            DefenceMaturity::Medium,
            &config,
        );
        let mut tested = choice("Validate creds", None, None);
        tested.test_type = Some("credentials".to_string());
        let step = Step {
            id: "start-here".to_string(),
            title: "Start".to_string(),
            description: TextBlock::default(),
            choices: vec![
                choice("Quiet recon", None, None),
                choice("Dump NTDS", Some("NTDS.dit"), None),
                choice("Finish", None, Some(NextStep::Goal)),
                tested,
            ],
        };
        let availability = vec![
            availability(0, 2, 5, true),
            availability(1, 8, 60, true),
            availability(2, 6, 40, false),
            availability(3, 1, 0, true),
        ];
        (config, state, step, availability)
    }

    fn availability(index: usize, hours: i64, detection: i32, enabled: bool) -> ActionAvailability {
        ActionAvailability {
            index,
            label: format!("action {index}"),
            enabled,
            attempts: 0,
            limit: None,
            adjusted: AdjustedAction { hours, detection },
        }
    }

    #[test]
    fn view_skips_disabled_and_untestable_actions() {
        let (config, state, step, availability) = fixture();
        let view = ActionView::new(&config, &state, &step, &availability);
        let indices: Vec<usize> = view.options.iter().map(|a| a.index).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn strategies_pick_by_their_preference() {
        let (config, state, step, availability) = fixture();
        let view = ActionView::new(&config, &state, &step, &availability);
        let cautious = GameplayStrategy::Cautious.create_policy(1).pick_action(&view);
        assert_eq!(cautious.map(|d| d.choice_index), Some(0));
        let bold = GameplayStrategy::Bold.create_policy(1).pick_action(&view);
        assert_eq!(bold.map(|d| d.choice_index), Some(1));
    }

    #[test]
    fn random_policy_is_seeded() {
        let (config, state, step, availability) = fixture();
        let view = ActionView::new(&config, &state, &step, &availability);
        let mut first = GameplayStrategy::Random.create_policy(77);
        let mut second = GameplayStrategy::Random.create_policy(77);
        for _ in 0..16 {
            let a = first.pick_action(&view).map(|d| d.choice_index);
            let b = second.pick_action(&view).map(|d| d.choice_index);
            assert_eq!(a, b);
            assert!(matches!(a, Some(0 | 1)));
        }
    }

    #[test]
    fn recovery_falls_back_to_give_up() {
        let (_, state, _, _) = fixture();
        let mut policy = GameplayStrategy::Bold.create_policy(0);
        assert_eq!(policy.pick_recovery(&state, &[Recovery::GiveUp]), Recovery::GiveUp);
        assert_eq!(
            policy.pick_recovery(&state, &[Recovery::Retry, Recovery::GiveUp]),
            Recovery::Retry
        );
    }

    #[test]
    fn strategy_names_parse() {
        assert_eq!(
            "Balanced".parse::<GameplayStrategy>(),
            Ok(GameplayStrategy::Balanced)
        );
        assert!("reckless".parse::<GameplayStrategy>().is_err());
    }
}
