//! Completed-session records and the storage seam for path logs.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::{Mutex, PoisonError};

use crate::config::{DefenceMaturity, ModeId, SkillLevel};
use crate::events::{EventInstance, EventSummary};
use crate::state::PathEntry;

/// Everything persisted about a finished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub player: String,
    pub mode: ModeId,
    pub skill: SkillLevel,
    pub defence: DefenceMaturity,
    pub won: bool,
    pub score: i64,
    pub path: Vec<PathEntry>,
    #[serde(default)]
    pub events: Vec<EventInstance>,
    #[serde(default)]
    pub summary: Option<EventSummary>,
    pub timestamp: DateTime<Utc>,
    pub seed: u64,
}

impl SessionRecord {
    /// Number of actions in the path that ended in a detection.
    #[must_use]
    pub fn detections(&self) -> usize {
        self.path.iter().filter(|entry| entry.detected).count()
    }
}

/// Storage for completed session path logs.
pub trait PathStore {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Persist a completed session.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    fn save_path(&self, record: &SessionRecord) -> Result<(), Self::Error>;

    /// Every stored record, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the records cannot be read.
    fn list_paths(&self) -> Result<Vec<SessionRecord>, Self::Error>;

    /// Remove every stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if the records cannot be removed.
    fn clear_paths(&self) -> Result<(), Self::Error>;
}

/// In-process store used by tests and embedders without a backing file.
#[derive(Debug, Default)]
pub struct MemoryPathStore {
    records: Mutex<Vec<SessionRecord>>,
}

impl MemoryPathStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PathStore for MemoryPathStore {
    type Error = Infallible;

    fn save_path(&self, record: &SessionRecord) -> Result<(), Self::Error> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }

    fn list_paths(&self) -> Result<Vec<SessionRecord>, Self::Error> {
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        sort_newest_first(&mut records);
        Ok(records)
    }

    fn clear_paths(&self) -> Result<(), Self::Error> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

/// Order records newest first; ties keep insertion order reversed.
pub fn sort_newest_first(records: &mut [SessionRecord]) {
    records.reverse();
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(player: &str, hour: u32) -> SessionRecord {
        SessionRecord {
            player: player.to_string(),
            mode: ModeId::new("phishing"),
            skill: SkillLevel::OrganisedCrime,
            defence: DefenceMaturity::Medium,
            won: false,
            score: 100,
            path: Vec::new(),
            events: Vec::new(),
            summary: None,
            timestamp: Utc
                .with_ymd_and_hms(2024, 5, 1, hour, 0, 0)
                .single()
                .expect("valid timestamp"),
            seed: 7,
        }
    }

    #[test]
    fn lists_newest_first_and_clears() {
        let store = MemoryPathStore::new();
        store.save_path(&record("early", 8)).unwrap();
        store.save_path(&record("late", 18)).unwrap();
        store.save_path(&record("noon", 12)).unwrap();

        let players: Vec<String> = store
            .list_paths()
            .unwrap()
            .into_iter()
            .map(|record| record.player)
            .collect();
        assert_eq!(players, ["late", "noon", "early"]);

        store.clear_paths().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn record_roundtrips_through_json() {
        let original = record("operator", 9);
        let json = serde_json::to_string(&original).unwrap();
        let parsed: SessionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, original);
        assert_eq!(parsed.detections(), 0);
    }
}
