use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reference to the step a choice leads to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NextStep {
    /// Terminal marker: the objective has been reached.
    Goal,
    Step(String),
}

impl NextStep {
    pub const GOAL_MARKER: &'static str = "goal";
}

impl From<String> for NextStep {
    fn from(value: String) -> Self {
        if value.trim() == Self::GOAL_MARKER {
            Self::Goal
        } else {
            Self::Step(value.trim().to_string())
        }
    }
}

impl From<NextStep> for String {
    fn from(value: NextStep) -> Self {
        match value {
            NextStep::Goal => NextStep::GOAL_MARKER.to_string(),
            NextStep::Step(id) => id,
        }
    }
}

/// One conjunct of a required-items expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Requirement {
    Item(String),
    AnyOf(Vec<String>),
}

impl Requirement {
    /// Whether the inventory satisfies this conjunct.
    #[must_use]
    pub fn satisfied_by(&self, has: impl Fn(&str) -> bool) -> bool {
        match self {
            Self::Item(item) => has(item),
            Self::AnyOf(items) => items.iter().any(|item| has(item)),
        }
    }
}

/// Conjunction of requirements; empty means always available.
pub type RequiredItems = Vec<Requirement>;

/// Step description authored either as one string or a list of paragraphs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextBlock {
    Text(String),
    Paragraphs(Vec<String>),
}

impl TextBlock {
    #[must_use]
    pub fn paragraphs(&self) -> Vec<&str> {
        match self {
            Self::Text(text) => vec![text.as_str()],
            Self::Paragraphs(lines) => lines.iter().map(String::as_str).collect(),
        }
    }

    #[must_use]
    pub fn joined(&self) -> String {
        self.paragraphs().join("\n")
    }
}

impl Default for TextBlock {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

/// A selectable action within a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub label: String,
    #[serde(default)]
    pub hour_cost: i64,
    #[serde(default)]
    pub detection_chance: i32,
    /// Absent means the action always succeeds when undetected.
    #[serde(default)]
    pub success_chance: Option<f64>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub required_items: RequiredItems,
    #[serde(default)]
    pub reward: Option<String>,
    #[serde(default)]
    pub rewards: Vec<String>,
    #[serde(default)]
    pub next: Option<NextStep>,
    #[serde(default)]
    pub test_type: Option<String>,
    #[serde(default, alias = "mitre_id")]
    pub technique: Option<String>,
}

impl Choice {
    /// Minimal action used by tests and builders.
    #[must_use]
    pub fn new(label: &str, hour_cost: i64, detection_chance: i32) -> Self {
        Self {
            label: label.to_string(),
            hour_cost,
            detection_chance,
            success_chance: None,
            limit: None,
            required_items: Vec::new(),
            reward: None,
            rewards: Vec::new(),
            next: None,
            test_type: None,
            technique: None,
        }
    }

    /// Reward items granted on success, `rewards` taking precedence.
    #[must_use]
    pub fn reward_items(&self) -> Vec<&str> {
        if self.rewards.is_empty() {
            self.reward.iter().map(String::as_str).collect()
        } else {
            self.rewards.iter().map(String::as_str).collect()
        }
    }

    /// Test type for test actions, inferred from the label when untagged.
    #[must_use]
    pub fn resolved_test_type(&self) -> Option<String> {
        if let Some(tag) = &self.test_type {
            return Some(tag.clone());
        }
        let label = self.label.to_lowercase();
        if label.contains("analyze pcap") {
            Some("pcap".to_string())
        } else if label.contains("analyze file") {
            Some("forensicFile".to_string())
        } else {
            None
        }
    }

    /// Whether the attempt count has used up the configured limit.
    #[must_use]
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.limit.is_some_and(|limit| limit > 0 && attempts >= limit)
    }
}

/// A node in the scenario graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(alias = "key")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: TextBlock,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

impl Step {
    /// Load a step from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON cannot be parsed into a step.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[must_use]
    pub fn choice(&self, index: usize) -> Option<&Choice> {
        self.choices.get(index)
    }
}

/// Failures fetching scenario data from a loader.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("{kind} `{key}` not found")]
    NotFound { kind: &'static str, key: String },
    #[error("data source unreachable: {0}")]
    Unreachable(String),
    #[error("malformed {kind} `{key}`: {source}")]
    Malformed {
        kind: &'static str,
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DataError {
    #[must_use]
    pub fn step_not_found(step_id: &str) -> Self {
        Self::NotFound {
            kind: "step",
            key: step_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_parses_authored_shapes() {
        let json = r#"{
            "key": "start-here",
            "title": "Initial Access",
            "description": ["Recon is done.", "Pick a vector."],
            "choices": [
                {
                    "label": "Send phishing email",
                    "hour_cost": 10,
                    "detection_chance": 20,
                    "success_chance": 70,
                    "limit": 2,
                    "required_items": ["Email list", ["Payload", "Macro document"]],
                    "reward": "credentials",
                    "next": "foothold",
                    "mitre_id": "T1566"
                },
                {
                    "label": "Walk away",
                    "next": "goal"
                }
            ]
        }"#;
        let step = Step::from_json(json).expect("valid step");
        assert_eq!(step.id, "start-here");
        assert_eq!(step.description.paragraphs().len(), 2);
        let first = step.choice(0).expect("first choice");
        assert_eq!(first.technique.as_deref(), Some("T1566"));
        assert_eq!(first.reward_items(), vec!["credentials"]);
        assert_eq!(first.next, Some(NextStep::Step("foothold".to_string())));
        assert_eq!(
            first.required_items[1],
            Requirement::AnyOf(vec!["Payload".to_string(), "Macro document".to_string()])
        );
        assert_eq!(step.choices[1].next, Some(NextStep::Goal));
        assert_eq!(step.choices[1].hour_cost, 0);
    }

    #[test]
    fn test_type_inferred_from_label() {
        let mut choice = Choice::new("Analyze PCAP from tap", 2, 0);
        assert_eq!(choice.resolved_test_type().as_deref(), Some("pcap"));
        choice.label = "Analyze file on share".to_string();
        assert_eq!(choice.resolved_test_type().as_deref(), Some("forensicFile"));
        choice.test_type = Some("credentials".to_string());
        assert_eq!(choice.resolved_test_type().as_deref(), Some("credentials"));
        choice.label = "Dump LSASS".to_string();
        choice.test_type = None;
        assert!(choice.resolved_test_type().is_none());
    }

    #[test]
    fn exhaustion_follows_limit() {
        let mut choice = Choice::new("Spray", 1, 10);
        assert!(!choice.is_exhausted(50));
        choice.limit = Some(1);
        assert!(!choice.is_exhausted(0));
        assert!(choice.is_exhausted(1));
    }

    #[test]
    fn next_step_serializes_goal_marker() {
        let value = serde_json::to_string(&NextStep::Goal).unwrap();
        assert_eq!(value, "\"goal\"");
        let rewards_first = Choice {
            reward: Some("ignored".to_string()),
            rewards: vec!["A".to_string(), "B".to_string()],
            ..Choice::new("x", 0, 0)
        };
        assert_eq!(rewards_first.reward_items(), vec!["A", "B"]);
    }
}
