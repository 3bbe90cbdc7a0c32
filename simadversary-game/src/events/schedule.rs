//! Deferred event effects on a per-session logical clock.
use serde::{Deserialize, Serialize};

use super::DeferredEffect;

/// A deferred bundle waiting for its due time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEffect {
    pub due_at: u64,
    /// Id of the event that scheduled this effect.
    pub source: String,
    pub effect: DeferredEffect,
    seq: u64,
}

/// Pending deferred effects, drained in due order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEffects {
    pending: Vec<ScheduledEffect>,
    next_seq: u64,
}

impl ScheduledEffects {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: Vec::new(),
            next_seq: 0,
        }
    }

    /// Queue `effect` to run `effect.delay` seconds after `now`.
    pub fn schedule(&mut self, now: u64, source: &str, effect: DeferredEffect) {
        let due_at = now.saturating_add(effect.delay);
        self.pending.push(ScheduledEffect {
            due_at,
            source: source.to_string(),
            effect,
            seq: self.next_seq,
        });
        self.next_seq = self.next_seq.saturating_add(1);
    }

    /// Remove and return every effect due at or before `now`, earliest first.
    /// Ties keep scheduling order.
    pub fn drain_due(&mut self, now: u64) -> Vec<ScheduledEffect> {
        let (mut due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|task| task.due_at <= now);
        self.pending = pending;
        due.sort_by_key(|task| (task.due_at, task.seq));
        due
    }

    /// Drop every pending effect; returns how many were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.pending.len();
        self.pending.clear();
        cancelled
    }

    #[must_use]
    pub fn next_due(&self) -> Option<u64> {
        self.pending.iter().map(|task| task.due_at).min()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
