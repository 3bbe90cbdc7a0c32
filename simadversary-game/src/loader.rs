//! In-memory scenario bundle used as the default [`DataLoader`].
//!
//! [`BundleLoader::embedded`] serves the scenario steps and event sets compiled
//! into the crate. Builders add or replace entries, which is how tests and
//! embedders supply custom scenarios without touching the filesystem.
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::DataLoader;
use crate::config::ModeId;
use crate::data::{DataError, Step};
use crate::events::{EventManifest, EventSetFile};

const EMBEDDED_STEPS: &[(&str, &str, &str)] = &[
    (
        "phishing",
        "start-here",
        include_str!("../../assets/data/scenarios/phishing/start-here.json"),
    ),
    (
        "phishing",
        "phishing",
        include_str!("../../assets/data/scenarios/phishing/phishing.json"),
    ),
    (
        "phishing",
        "validate-credentials",
        include_str!("../../assets/data/scenarios/phishing/validate-credentials.json"),
    ),
    (
        "phishing",
        "foothold",
        include_str!("../../assets/data/scenarios/phishing/foothold.json"),
    ),
    (
        "phishing",
        "discovery",
        include_str!("../../assets/data/scenarios/phishing/discovery.json"),
    ),
    (
        "phishing",
        "privilege-escalation",
        include_str!("../../assets/data/scenarios/phishing/privilege-escalation.json"),
    ),
    (
        "phishing",
        "lateral-movement",
        include_str!("../../assets/data/scenarios/phishing/lateral-movement.json"),
    ),
    (
        "phishing",
        "objective",
        include_str!("../../assets/data/scenarios/phishing/objective.json"),
    ),
    (
        "supply-chain",
        "start-here",
        include_str!("../../assets/data/scenarios/supply-chain/start-here.json"),
    ),
    (
        "supply-chain",
        "vendor-access",
        include_str!("../../assets/data/scenarios/supply-chain/vendor-access.json"),
    ),
    (
        "supply-chain",
        "objective",
        include_str!("../../assets/data/scenarios/supply-chain/objective.json"),
    ),
    (
        "insider",
        "start-here",
        include_str!("../../assets/data/scenarios/insider/start-here.json"),
    ),
    (
        "insider",
        "objective",
        include_str!("../../assets/data/scenarios/insider/objective.json"),
    ),
];

const EMBEDDED_MANIFEST: &str = include_str!("../../assets/data/events/index.json");

const EMBEDDED_EVENT_SETS: &[(&str, &str)] = &[
    (
        "red-team/detection.json",
        include_str!("../../assets/data/events/red-team/detection.json"),
    ),
    (
        "red-team/opportunities.json",
        include_str!("../../assets/data/events/red-team/opportunities.json"),
    ),
    (
        "blue-team/pressure.json",
        include_str!("../../assets/data/events/blue-team/pressure.json"),
    ),
    (
        "common/technical.json",
        include_str!("../../assets/data/events/common/technical.json"),
    ),
    (
        "scenario-specific/phishing.json",
        include_str!("../../assets/data/events/scenario-specific/phishing.json"),
    ),
    (
        "scenario-specific/supply-chain.json",
        include_str!("../../assets/data/events/scenario-specific/supply-chain.json"),
    ),
    (
        "scenario-specific/insider.json",
        include_str!("../../assets/data/events/scenario-specific/insider.json"),
    ),
];

/// A document either still in its authored form or already parsed.
#[derive(Debug, Clone)]
enum Entry<T> {
    Raw(Cow<'static, str>),
    Parsed(T),
}

impl<T: DeserializeOwned + Clone> Entry<T> {
    fn decode(&self, kind: &'static str, key: &str) -> Result<T, DataError> {
        match self {
            Self::Parsed(value) => Ok(value.clone()),
            Self::Raw(text) => serde_json::from_str(text).map_err(|source| DataError::Malformed {
                kind,
                key: key.to_string(),
                source,
            }),
        }
    }
}

/// Scenario steps and event sets held in memory.
#[derive(Debug, Clone, Default)]
pub struct BundleLoader {
    steps: BTreeMap<(String, String), Entry<Step>>,
    manifest: Option<Entry<EventManifest>>,
    event_sets: BTreeMap<String, Entry<EventSetFile>>,
}

impl BundleLoader {
    /// Empty bundle; every lookup reports `NotFound`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bundle with every scenario and event set compiled into the crate.
    #[must_use]
    pub fn embedded() -> Self {
        let mut loader = Self::new();
        for (mode, step_id, json) in EMBEDDED_STEPS {
            loader.steps.insert(
                ((*mode).to_string(), (*step_id).to_string()),
                Entry::Raw(Cow::Borrowed(json)),
            );
        }
        loader.manifest = Some(Entry::Raw(Cow::Borrowed(EMBEDDED_MANIFEST)));
        for (path, json) in EMBEDDED_EVENT_SETS {
            loader
                .event_sets
                .insert((*path).to_string(), Entry::Raw(Cow::Borrowed(json)));
        }
        loader
    }

    /// Add or replace a step for `mode`.
    #[must_use]
    pub fn with_step(mut self, mode: &str, step: Step) -> Self {
        self.steps
            .insert((mode.to_string(), step.id.clone()), Entry::Parsed(step));
        self
    }

    /// Add or replace a step from its authored JSON; parsing is deferred to
    /// the first load.
    #[must_use]
    pub fn with_step_json(mut self, mode: &str, step_id: &str, json: impl Into<String>) -> Self {
        self.steps.insert(
            (mode.to_string(), step_id.to_string()),
            Entry::Raw(Cow::Owned(json.into())),
        );
        self
    }

    #[must_use]
    pub fn with_manifest(mut self, manifest: EventManifest) -> Self {
        self.manifest = Some(Entry::Parsed(manifest));
        self
    }

    #[must_use]
    pub fn with_event_set(mut self, path: &str, set: EventSetFile) -> Self {
        self.event_sets.insert(path.to_string(), Entry::Parsed(set));
        self
    }

    #[must_use]
    pub fn with_event_set_json(mut self, path: &str, json: impl Into<String>) -> Self {
        self.event_sets
            .insert(path.to_string(), Entry::Raw(Cow::Owned(json.into())));
        self
    }

    /// Modes with at least one step.
    #[must_use]
    pub fn modes(&self) -> Vec<String> {
        let mut modes: Vec<String> = self.steps.keys().map(|(mode, _)| mode.clone()).collect();
        modes.dedup();
        modes
    }

    /// Step ids bundled for `mode`, in key order.
    #[must_use]
    pub fn step_ids(&self, mode: &str) -> Vec<&str> {
        self.steps
            .keys()
            .filter(|(candidate, _)| candidate == mode)
            .map(|(_, step_id)| step_id.as_str())
            .collect()
    }
}

impl DataLoader for BundleLoader {
    type Error = DataError;

    fn load_step(&self, mode: &ModeId, step_id: &str) -> Result<Step, Self::Error> {
        self.steps
            .get(&(mode.to_string(), step_id.to_string()))
            .ok_or_else(|| DataError::step_not_found(step_id))?
            .decode("step", step_id)
    }

    fn load_event_manifest(&self) -> Result<EventManifest, Self::Error> {
        self.manifest
            .as_ref()
            .ok_or_else(|| DataError::NotFound {
                kind: "event manifest",
                key: "index.json".to_string(),
            })?
            .decode("event manifest", "index.json")
    }

    fn load_event_set(&self, path: &str) -> Result<EventSetFile, Self::Error> {
        self.event_sets
            .get(path)
            .ok_or_else(|| DataError::NotFound {
                kind: "event set",
                key: path.to_string(),
            })?
            .decode("event set", path)
    }
}
