//! Event catalog resolution from a declarative manifest.
//!
//! The manifest lists event sets with their team and scenario applicability
//! plus a scenario-file map keyed by mode. Each set file also carries
//! file-level `applicable_scenarios` / `applicable_teams` filters. Loading can
//! run in the background; the overlay waits on it with a bounded timeout.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::{Duration, Instant};
use thiserror::Error;

use super::EventDefinition;
use super::analytics::CatalogOverview;
use crate::DataLoader;
use crate::config::{GameConfig, ModeId, Team, TriggerScaling};
use crate::constants::WILDCARD_APPLICABILITY;

/// One event set listed in the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSetEntry {
    pub path: String,
    /// Teams the set applies to; empty or `"all"` applies to every team.
    #[serde(default)]
    pub teams: Vec<String>,
    #[serde(default)]
    pub scenarios: Vec<String>,
}

/// Index of every event set the data source provides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventManifest {
    #[serde(default)]
    pub sets: Vec<EventSetEntry>,
    /// Scenario file key to set path.
    #[serde(default)]
    pub scenario_files: BTreeMap<String, String>,
}

impl EventManifest {
    /// Set paths to load for a scope, in manifest order, scenario file last.
    #[must_use]
    pub fn paths_for(&self, scope: &CatalogScope) -> Vec<String> {
        let mut paths: Vec<String> = self
            .sets
            .iter()
            .filter(|entry| {
                applicable(&entry.teams, scope.team.key())
                    && applicable(&entry.scenarios, scope.mode.as_str())
            })
            .map(|entry| entry.path.clone())
            .collect();
        if let Some(path) = self.scenario_files.get(&scope.scenario_file)
            && !paths.contains(path)
        {
            paths.push(path.clone());
        }
        paths
    }
}

/// An authored event set file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventSetFile {
    #[serde(default)]
    pub applicable_scenarios: Option<Vec<String>>,
    #[serde(default)]
    pub applicable_teams: Option<Vec<String>>,
    /// Raw definitions; each is validated on its own so one bad entry does
    /// not discard the set.
    #[serde(default)]
    pub events: Vec<serde_json::Value>,
}

impl EventSetFile {
    #[must_use]
    pub fn applies_to(&self, scope: &CatalogScope) -> bool {
        self.applicable_scenarios
            .as_deref()
            .is_none_or(|list| applicable(list, scope.mode.as_str()))
            && self
                .applicable_teams
                .as_deref()
                .is_none_or(|list| applicable(list, scope.team.key()))
    }
}

fn applicable(list: &[String], value: &str) -> bool {
    list.is_empty()
        || list
            .iter()
            .any(|entry| entry == value || entry == WILDCARD_APPLICABILITY)
}

/// Scenario, team and scenario-file key a catalog is resolved for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogScope {
    pub mode: ModeId,
    pub team: Team,
    pub scenario_file: String,
}

impl CatalogScope {
    #[must_use]
    pub fn for_mode(config: &GameConfig, mode: &ModeId) -> Self {
        Self {
            mode: mode.clone(),
            team: config.team_for_mode(mode),
            scenario_file: config.scenario_file_key(mode),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("event manifest unavailable: {0}")]
    Manifest(String),
    #[error("event set `{path}` unavailable: {reason}")]
    Set { path: String, reason: String },
}

/// Ordered, validated definitions for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventCatalog {
    entries: Vec<EventDefinition>,
    sources: Vec<String>,
}

impl EventCatalog {
    #[must_use]
    pub const fn new(entries: Vec<EventDefinition>) -> Self {
        Self {
            entries,
            sources: Vec::new(),
        }
    }

    #[must_use]
    pub const fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Load every applicable set synchronously. Unavailable sets are logged
    /// and skipped.
    #[must_use]
    pub fn resolve<L: DataLoader + ?Sized>(
        loader: &L,
        scope: &CatalogScope,
        scaling: &TriggerScaling,
    ) -> Self {
        let (sender, receiver) = mpsc::channel();
        stream_sets(loader, scope, scaling, &sender);
        drop(sender);
        let mut catalog = Self::empty();
        while let Ok(message) = receiver.recv() {
            if catalog.absorb(message) {
                break;
            }
        }
        catalog
    }

    /// Definitions from one set file that apply to `scope`, scaled by their
    /// primary trigger.
    #[must_use]
    pub fn definitions_from_set(
        file: EventSetFile,
        path: &str,
        scope: &CatalogScope,
        scaling: &TriggerScaling,
    ) -> Vec<EventDefinition> {
        if !file.applies_to(scope) {
            log::debug!("event set {path} does not apply to {}/{}", scope.mode, scope.team);
            return Vec::new();
        }
        file.events
            .into_iter()
            .filter_map(|value| match EventDefinition::from_value(value) {
                Ok(definition) => Some(scale_probability(definition, scaling)),
                Err(err) => {
                    log::warn!("skipping event in {path}: {err}");
                    None
                }
            })
            .collect()
    }

    #[must_use]
    pub fn entries(&self) -> &[EventDefinition] {
        &self.entries
    }

    /// Set paths that contributed definitions, in load order.
    #[must_use]
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&EventDefinition> {
        self.entries.iter().find(|definition| definition.id == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn overview(&self) -> CatalogOverview {
        CatalogOverview::from_definitions(&self.entries)
    }

    /// Fold one loader message in; returns true once loading is finished.
    fn absorb(&mut self, message: CatalogMessage) -> bool {
        match message {
            CatalogMessage::Loaded { path, events } => {
                log::debug!("loaded {} events from {path}", events.len());
                self.entries.extend(events);
                self.sources.push(path);
                false
            }
            CatalogMessage::Failed(err) => {
                log::warn!("{err}");
                false
            }
            CatalogMessage::Finished => true,
        }
    }
}

fn scale_probability(mut definition: EventDefinition, scaling: &TriggerScaling) -> EventDefinition {
    if definition.base_probability > 0.0 {
        let factor = scaling.factor_for(definition.primary_trigger());
        let scaled = (definition.base_probability * factor).max(scaling.minimum);
        log::debug!(
            "scaled {}: {} -> {scaled}",
            definition.id,
            definition.base_probability
        );
        definition.base_probability = scaled;
    }
    definition
}

enum CatalogMessage {
    Loaded {
        path: String,
        events: Vec<EventDefinition>,
    },
    Failed(CatalogError),
    Finished,
}

fn stream_sets<L: DataLoader + ?Sized>(
    loader: &L,
    scope: &CatalogScope,
    scaling: &TriggerScaling,
    sender: &Sender<CatalogMessage>,
) {
    let manifest = match loader.load_event_manifest() {
        Ok(manifest) => manifest,
        Err(err) => {
            let _ = sender.send(CatalogMessage::Failed(CatalogError::Manifest(err.to_string())));
            let _ = sender.send(CatalogMessage::Finished);
            return;
        }
    };
    for path in manifest.paths_for(scope) {
        let message = match loader.load_event_set(&path) {
            Ok(file) => CatalogMessage::Loaded {
                events: EventCatalog::definitions_from_set(file, &path, scope, scaling),
                path,
            },
            Err(err) => CatalogMessage::Failed(CatalogError::Set {
                path,
                reason: err.to_string(),
            }),
        };
        if sender.send(message).is_err() {
            return;
        }
    }
    let _ = sender.send(CatalogMessage::Finished);
}

/// A catalog that may still be loading in the background.
pub struct PendingCatalog {
    receiver: Option<Receiver<CatalogMessage>>,
    catalog: EventCatalog,
    finished: bool,
}

impl PendingCatalog {
    /// Already-resolved catalog.
    #[must_use]
    pub fn ready(catalog: EventCatalog) -> Self {
        Self {
            receiver: None,
            catalog,
            finished: true,
        }
    }

    /// Start loading on a dedicated thread, streaming one result per set.
    #[must_use]
    pub fn spawn<L>(loader: Arc<L>, scope: CatalogScope, scaling: TriggerScaling) -> Self
    where
        L: DataLoader + Send + Sync + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let worker_loader = Arc::clone(&loader);
        let worker_scope = scope.clone();
        let worker_scaling = scaling.clone();
        let spawned = std::thread::Builder::new()
            .name("event-catalog".to_string())
            .spawn(move || {
                stream_sets(&*worker_loader, &worker_scope, &worker_scaling, &sender);
            });
        match spawned {
            Ok(_) => Self {
                receiver: Some(receiver),
                catalog: EventCatalog::empty(),
                finished: false,
            },
            Err(err) => {
                log::warn!("catalog loader thread unavailable ({err}); loading inline");
                Self::ready(EventCatalog::resolve(&*loader, &scope, &scaling))
            }
        }
    }

    /// Start loading on the tokio blocking pool. Must be called from within a
    /// runtime.
    #[cfg(feature = "async")]
    #[must_use]
    pub fn spawn_blocking<L>(loader: Arc<L>, scope: CatalogScope, scaling: TriggerScaling) -> Self
    where
        L: DataLoader + Send + Sync + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        drop(tokio::task::spawn_blocking(move || {
            stream_sets(&*loader, &scope, &scaling, &sender);
        }));
        Self {
            receiver: Some(receiver),
            catalog: EventCatalog::empty(),
            finished: false,
        }
    }

    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Absorb whatever has arrived without blocking.
    pub fn poll(&mut self) {
        let Some(receiver) = &self.receiver else {
            return;
        };
        loop {
            match receiver.try_recv() {
                Ok(message) => {
                    if self.catalog.absorb(message) {
                        self.finish();
                        return;
                    }
                }
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    self.finish();
                    return;
                }
            }
        }
    }

    /// Wait up to `timeout` for loading to finish, then return whatever loaded.
    #[must_use]
    pub fn wait(mut self, timeout: Duration) -> EventCatalog {
        let deadline = Instant::now() + timeout;
        while !self.finished {
            let Some(receiver) = &self.receiver else {
                break;
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            match receiver.recv_timeout(remaining) {
                Ok(message) => {
                    if self.catalog.absorb(message) {
                        self.finish();
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "event loading timed out after {}ms; continuing with {} events",
                        timeout.as_millis(),
                        self.catalog.len()
                    );
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => self.finish(),
            }
        }
        self.catalog
    }

    fn finish(&mut self) {
        self.finished = true;
        self.receiver = None;
    }
}

impl std::fmt::Debug for PendingCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCatalog")
            .field("loaded", &self.catalog.len())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Trigger;
    use crate::loader::BundleLoader;

    fn scope(mode: &str) -> CatalogScope {
        CatalogScope::for_mode(&GameConfig::load_from_static(), &ModeId::new(mode))
    }

    fn set(json: serde_json::Value) -> EventSetFile {
        serde_json::from_value(json).expect("valid set")
    }

    #[test]
    fn manifest_filters_sets_by_team_and_appends_scenario_file() {
        let manifest: EventManifest = serde_json::from_value(serde_json::json!({
            "sets": [
                { "path": "red-team/detection.json", "teams": ["red"] },
                { "path": "blue-team/pressure.json", "teams": ["blue"] },
                { "path": "common/technical.json", "teams": ["all"] }
            ],
            "scenario_files": { "phishing": "scenario-specific/phishing.json" }
        }))
        .expect("valid manifest");
        assert_eq!(
            manifest.paths_for(&scope("phishing")),
            vec![
                "red-team/detection.json",
                "common/technical.json",
                "scenario-specific/phishing.json"
            ]
        );
        assert_eq!(manifest.paths_for(&scope("insider")).len(), 2);
    }

    #[test]
    fn file_level_applicability_pre_filters() {
        let file = set(serde_json::json!({
            "applicable_scenarios": ["supply-chain"],
            "events": [{ "id": "a", "title": "A", "triggers": ["step"], "base_probability": 0.5 }]
        }));
        let scaling = TriggerScaling::identity();
        assert!(EventCatalog::definitions_from_set(file, "x", &scope("phishing"), &scaling).is_empty());

        let wildcard = set(serde_json::json!({
            "applicable_scenarios": ["all"],
            "applicable_teams": ["red"],
            "events": [{ "id": "a", "title": "A", "triggers": ["step"], "base_probability": 0.5 }]
        }));
        assert_eq!(
            EventCatalog::definitions_from_set(wildcard, "x", &scope("phishing"), &scaling).len(),
            1
        );
    }

    #[test]
    fn invalid_entries_are_skipped_and_probabilities_scaled() {
        let file = set(serde_json::json!({
            "events": [
                { "id": "step-event", "title": "S", "triggers": ["step", "detection"], "base_probability": 0.5 },
                { "id": "det-event", "title": "D", "triggers": ["detection"], "base_probability": 0.4 },
                { "id": "fail-event", "title": "F", "triggers": ["failure"], "base_probability": 0.01 },
                { "id": "broken", "triggers": ["step"] },
                { "title": "No id", "triggers": ["step"] }
            ]
        }));
        let definitions =
            EventCatalog::definitions_from_set(file, "x", &scope("phishing"), &TriggerScaling::default());
        let probabilities: Vec<(String, f64)> = definitions
            .iter()
            .map(|d| (d.id.clone(), d.base_probability))
            .collect();
        assert_eq!(probabilities.len(), 3);
        assert!((probabilities[0].1 - 0.15).abs() < 1e-9);
        assert!((probabilities[1].1 - 0.2).abs() < 1e-9);
        assert!((probabilities[2].1 - 0.01).abs() < 1e-9);
        assert_eq!(definitions[2].primary_trigger(), Some(Trigger::Failure));
    }

    #[test]
    fn bundled_catalog_resolves_for_red_team_phishing() {
        let loader = BundleLoader::embedded();
        let catalog = EventCatalog::resolve(&loader, &scope("phishing"), &TriggerScaling::default());
        assert!(!catalog.is_empty());
        assert!(
            catalog
                .sources()
                .iter()
                .all(|source| !source.starts_with("blue-team/"))
        );
        assert!(
            catalog
                .sources()
                .iter()
                .any(|source| source == "scenario-specific/phishing.json")
        );
    }

    #[test]
    fn background_load_matches_inline_resolution() {
        let loader = Arc::new(BundleLoader::embedded());
        let inline = EventCatalog::resolve(&*loader, &scope("phishing"), &TriggerScaling::default());
        let pending = PendingCatalog::spawn(
            Arc::clone(&loader),
            scope("phishing"),
            TriggerScaling::default(),
        );
        let loaded = pending.wait(Duration::from_secs(5));
        assert_eq!(loaded, inline);
    }

    #[test]
    fn missing_manifest_yields_empty_catalog() {
        let loader = BundleLoader::new();
        let catalog = EventCatalog::resolve(&loader, &scope("phishing"), &TriggerScaling::default());
        assert!(catalog.is_empty());
        let pending = PendingCatalog::ready(EventCatalog::empty());
        assert!(pending.is_finished());
    }
}
