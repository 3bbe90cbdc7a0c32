//! Typed command and notice channels between the event overlay and its host.
//!
//! The overlay never touches player state directly. It emits [`GameCommand`]s
//! into a [`GameStateSink`] and [`UiNotice`]s into a [`UiSink`]; a failing sink
//! is logged at the call site and never aborts resolution.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::inventory::InventoryPolicy;
use crate::state::{NamedValue, PlayerState};

/// Resource a command adjusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Hours,
    Contingencies,
}

/// State mutation requested by the overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "snake_case")]
pub enum GameCommand {
    AdjustResource { kind: ResourceKind, delta: i64 },
    AddItem { item: String },
    RemoveItem { item: String },
    SetNamedState { key: String, value: NamedValue },
}

/// Display severity for notices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    #[default]
    Warning,
    Error,
}

/// Payload for an event announcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub id: String,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    /// Human-readable effect lines ("Hours: -4", "Gained: VPN token").
    pub effects: Vec<String>,
}

/// Fire-and-forget notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UiNotice {
    EventMessage(EventMessage),
    Message { text: String, severity: Severity },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("callback failed: {0}")]
pub struct CallbackError(pub String);

/// Receives state commands.
pub trait GameStateSink {
    /// Apply one command.
    ///
    /// # Errors
    ///
    /// Returns `CallbackError` when the host cannot apply the command.
    fn apply(&mut self, command: GameCommand) -> Result<(), CallbackError>;
}

/// Receives UI notices.
pub trait UiSink {
    /// Deliver one notice.
    ///
    /// # Errors
    ///
    /// Returns `CallbackError` when the notice cannot be delivered.
    fn notify(&mut self, notice: UiNotice) -> Result<(), CallbackError>;
}

/// Sink that drops every notice.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullUi;

impl UiSink for NullUi {
    fn notify(&mut self, _notice: UiNotice) -> Result<(), CallbackError> {
        Ok(())
    }
}

/// Sink that keeps notices for later inspection.
#[derive(Debug, Default, Clone)]
pub struct RecordingUi {
    pub notices: Vec<UiNotice>,
}

impl UiSink for RecordingUi {
    fn notify(&mut self, notice: UiNotice) -> Result<(), CallbackError> {
        self.notices.push(notice);
        Ok(())
    }
}

/// Applies commands to a [`PlayerState`] through the inventory policy.
pub struct StateApplier<'a> {
    pub state: &'a mut PlayerState,
    pub inventory: &'a InventoryPolicy,
}

impl GameStateSink for StateApplier<'_> {
    fn apply(&mut self, command: GameCommand) -> Result<(), CallbackError> {
        match command {
            GameCommand::AdjustResource {
                kind: ResourceKind::Hours,
                delta,
            } => self.state.adjust_hours(delta),
            GameCommand::AdjustResource {
                kind: ResourceKind::Contingencies,
                delta,
            } => self.state.adjust_contingencies(delta),
            GameCommand::AddItem { item } => {
                self.inventory.add(&mut self.state.inventory, &item);
            }
            GameCommand::RemoveItem { item } => {
                self.inventory.remove(&mut self.state.inventory, &item);
            }
            GameCommand::SetNamedState { key, value } => self.state.status.aux.set(&key, value),
        }
        Ok(())
    }
}

/// Deliver a notice, logging instead of propagating failures.
pub fn deliver(ui: &mut dyn UiSink, notice: UiNotice) {
    if let Err(err) = ui.notify(notice) {
        log::warn!("ui notice dropped: {err}");
    }
}

/// Apply a command, logging instead of propagating failures.
pub fn dispatch(sink: &mut dyn GameStateSink, command: GameCommand) {
    let description = format!("{command:?}");
    if let Err(err) = sink.apply(command) {
        log::warn!("state command {description} failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DefenceMaturity, GameConfig, ModeId, SkillLevel};

    struct FailingUi;

    impl UiSink for FailingUi {
        fn notify(&mut self, _notice: UiNotice) -> Result<(), CallbackError> {
            Err(CallbackError("display detached".to_string()))
        }
    }

    #[test]
    fn applier_handles_every_verb() {
        let cfg = GameConfig::load_from_static();
        let policy = InventoryPolicy::from_config(&cfg);
        let mut state = PlayerState::new(
            "p",
            ModeId::new("phishing"),
            SkillLevel::OrganisedCrime,
            DefenceMaturity::Medium,
            &cfg,
        );
        {
            let mut applier = StateApplier {
                state: &mut state,
                inventory: &policy,
            };
            for command in [
                GameCommand::AdjustResource {
                    kind: ResourceKind::Hours,
                    delta: -8,
                },
                GameCommand::AdjustResource {
                    kind: ResourceKind::Contingencies,
                    delta: 1,
                },
                GameCommand::AddItem {
                    item: "VPN token".to_string(),
                },
                GameCommand::AddItem {
                    item: "Network Map".to_string(),
                },
                GameCommand::RemoveItem {
                    item: "VPN token".to_string(),
                },
                GameCommand::SetNamedState {
                    key: "backupFailureActive".to_string(),
                    value: NamedValue::Bool(true),
                },
            ] {
                dispatch(&mut applier, command);
            }
        }
        assert_eq!(state.resources.time_budget, 152);
        assert_eq!(state.resources.contingencies, 4);
        assert_eq!(state.inventory.as_slice(), ["Network Map"]);
        assert!(state.status.aux.backup_failure_active);
    }

    #[test]
    fn failing_ui_is_swallowed() {
        let mut ui = FailingUi;
        deliver(
            &mut ui,
            UiNotice::Message {
                text: "hello".to_string(),
                severity: Severity::Info,
            },
        );
        let mut recorder = RecordingUi::default();
        deliver(
            &mut recorder,
            UiNotice::Message {
                text: "hello".to_string(),
                severity: Severity::Info,
            },
        );
        assert_eq!(recorder.notices.len(), 1);
    }

    #[test]
    fn commands_serialize_with_verb_tag() {
        let json = serde_json::to_value(GameCommand::AddItem {
            item: "Persistence".to_string(),
        })
        .unwrap();
        assert_eq!(json["verb"], "add_item");
    }
}
