//! Post-game analytics over the fired-event history.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{EventDefinition, EventInstance, Trigger};
use crate::constants::UNKNOWN_TECHNIQUE;
use crate::numbers::usize_to_f64;

/// One row of the event timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub step: u32,
    pub step_title: String,
    pub step_key: String,
    pub choice_label: String,
    pub technique: String,
    pub event_title: String,
    pub event_category: String,
    pub triggers: Vec<Trigger>,
    pub detections_at_time: u32,
    pub hours_at_time: i64,
    pub contingencies_at_time: i64,
}

/// Events grouped by the technique of the choice they fired on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechniqueStats {
    pub count: usize,
    pub events: Vec<String>,
    pub steps: Vec<String>,
}

/// Events grouped by the step they fired on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStats {
    pub title: String,
    pub count: usize,
    pub events: Vec<String>,
    pub choices: Vec<String>,
}

/// Gaps, in steps, between consecutive events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingPatterns {
    pub average_gap: f64,
    pub min_gap: i64,
    pub max_gap: i64,
    pub gaps: Vec<i64>,
}

/// Counts over the loaded definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogOverview {
    pub total: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_trigger: BTreeMap<Trigger, usize>,
}

impl CatalogOverview {
    #[must_use]
    pub fn from_definitions(definitions: &[EventDefinition]) -> Self {
        let mut overview = Self {
            total: definitions.len(),
            ..Self::default()
        };
        for definition in definitions {
            *overview
                .by_category
                .entry(definition.category.clone())
                .or_default() += 1;
            for trigger in &definition.triggers {
                *overview.by_trigger.entry(*trigger).or_default() += 1;
            }
        }
        overview
    }
}

/// End-of-session event report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    pub total_events: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_trigger: BTreeMap<Trigger, usize>,
    pub timeline: Vec<TimelineEntry>,
    pub techniques: BTreeMap<String, TechniqueStats>,
    pub steps: BTreeMap<String, StepStats>,
    /// Present only when at least two events fired.
    pub timing: Option<TimingPatterns>,
    pub catalog: CatalogOverview,
}

impl EventSummary {
    #[must_use]
    pub fn from_history(history: &[EventInstance], catalog: CatalogOverview) -> Self {
        let mut summary = Self {
            total_events: history.len(),
            catalog,
            ..Self::default()
        };
        for event in history {
            *summary
                .by_category
                .entry(event.category.clone())
                .or_default() += 1;
            for trigger in &event.triggers {
                *summary.by_trigger.entry(*trigger).or_default() += 1;
            }
            summary.timeline.push(TimelineEntry {
                step: event.game_step,
                step_title: event.step_context.step_title.clone(),
                step_key: event.step_context.step_key.clone(),
                choice_label: event.step_context.choice_label.clone(),
                technique: event.step_context.technique.clone(),
                event_title: event.title.clone(),
                event_category: event.category.clone(),
                triggers: event.triggers.clone(),
                detections_at_time: event.detection_count,
                hours_at_time: event.game_context.hours,
                contingencies_at_time: event.game_context.contingencies,
            });
        }
        summary.techniques = technique_analysis(history);
        summary.steps = step_analysis(history);
        summary.timing = timing_patterns(history);
        summary
    }
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    if !values.iter().any(|existing| existing == value) {
        values.push(value.to_string());
    }
}

fn technique_analysis(history: &[EventInstance]) -> BTreeMap<String, TechniqueStats> {
    let mut stats: BTreeMap<String, TechniqueStats> = BTreeMap::new();
    for event in history {
        let technique = &event.step_context.technique;
        if technique.is_empty() || technique == UNKNOWN_TECHNIQUE {
            continue;
        }
        let entry = stats.entry(technique.clone()).or_default();
        entry.count += 1;
        entry.events.push(event.title.clone());
        push_unique(&mut entry.steps, &event.step_context.step_title);
    }
    stats
}

fn step_analysis(history: &[EventInstance]) -> BTreeMap<String, StepStats> {
    let mut stats: BTreeMap<String, StepStats> = BTreeMap::new();
    for event in history {
        let entry = stats
            .entry(event.step_context.step_key.clone())
            .or_insert_with(|| StepStats {
                title: event.step_context.step_title.clone(),
                ..StepStats::default()
            });
        entry.count += 1;
        entry.events.push(event.title.clone());
        push_unique(&mut entry.choices, &event.step_context.choice_label);
    }
    stats
}

fn timing_patterns(history: &[EventInstance]) -> Option<TimingPatterns> {
    if history.len() < 2 {
        return None;
    }
    let gaps: Vec<i64> = history
        .windows(2)
        .map(|pair| i64::from(pair[1].game_step) - i64::from(pair[0].game_step))
        .collect();
    let total: i64 = gaps.iter().sum();
    Some(TimingPatterns {
        average_gap: crate::numbers::i64_to_f64(total) / usize_to_f64(gaps.len()),
        min_gap: gaps.iter().copied().min().unwrap_or_default(),
        max_gap: gaps.iter().copied().max().unwrap_or_default(),
        gaps,
    })
}
