use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::model::EffectsSettings;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy)]
struct PendingEdit {
    settings: EffectsSettings,
    deadline: Instant,
}

/// Debounced undo/redo stack over settings snapshots.
///
/// Edits are observed through [`HistoryManager::observe`] and committed once
/// no further edit arrives within the debounce window. Snapshots emitted by
/// undo, redo and reset are flagged as history-sourced; the flag is consumed
/// by the next `observe` call so the emission is never re-recorded.
#[derive(Debug, Clone)]
pub struct HistoryManager {
    sequence: Vec<EffectsSettings>,
    cursor: usize,
    window: Duration,
    pending: Option<PendingEdit>,
    history_sourced: bool,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl HistoryManager {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            sequence: vec![EffectsSettings::reset()],
            cursor: 0,
            window,
            pending: None,
            history_sourced: false,
        }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn current(&self) -> &EffectsSettings {
        &self.sequence[self.cursor]
    }

    #[must_use]
    pub fn entries(&self) -> &[EffectsSettings] {
        &self.sequence
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.sequence.len()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Records a settings emission. History-sourced emissions only consume
    /// the flag; anything else (re)arms the debounce deadline.
    pub fn observe(&mut self, settings: EffectsSettings, now: Instant) {
        if self.history_sourced {
            self.history_sourced = false;
            trace!("history-sourced emission skipped");
            return;
        }

        self.pending = Some(PendingEdit {
            settings,
            deadline: now + self.window,
        });
    }

    /// Commits the pending edit once its deadline has passed. Returns whether
    /// a new entry was appended.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.pending {
            Some(pending) if now >= pending.deadline => {
                self.pending = None;
                self.commit(pending.settings)
            }
            _ => false,
        }
    }

    /// Commits the pending edit regardless of its deadline.
    pub fn flush(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => self.commit(pending.settings),
            None => false,
        }
    }

    pub fn undo(&mut self) -> Option<EffectsSettings> {
        if !self.can_undo() {
            return None;
        }
        self.cursor -= 1;
        Some(self.emit_from_history())
    }

    pub fn redo(&mut self) -> Option<EffectsSettings> {
        if !self.can_redo() {
            return None;
        }
        self.cursor += 1;
        Some(self.emit_from_history())
    }

    /// Collapses history to a single defaults entry and returns the defaults,
    /// flagged as history-sourced.
    pub fn reset_all(&mut self) -> EffectsSettings {
        self.sequence.clear();
        self.sequence.push(EffectsSettings::reset());
        self.cursor = 0;
        self.pending = None;
        self.history_sourced = true;
        debug!("history reset");
        self.sequence[0]
    }

    fn emit_from_history(&mut self) -> EffectsSettings {
        self.pending = None;
        self.history_sourced = true;
        debug!(cursor = self.cursor, len = self.sequence.len(), "history moved");
        self.sequence[self.cursor]
    }

    fn commit(&mut self, settings: EffectsSettings) -> bool {
        if self.sequence[self.cursor] == settings {
            trace!("pending edit equals current entry, not recorded");
            return false;
        }

        self.sequence.truncate(self.cursor + 1);
        self.sequence.push(settings);
        self.cursor = self.sequence.len() - 1;
        debug!(cursor = self.cursor, "history entry committed");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Field;

    #[test]
    fn pending_edit_waits_for_deadline() {
        let start = Instant::now();
        let mut history = HistoryManager::default();
        history.observe(EffectsSettings::reset().set(Field::Drive, 40.0), start);

        assert!(!history.poll(start + Duration::from_millis(499)));
        assert_eq!(history.len(), 1);
        assert!(history.poll(start + Duration::from_millis(500)));
        assert_eq!(history.len(), 2);
        assert!(!history.has_pending());
    }

    #[test]
    fn flush_commits_early() {
        let mut history = HistoryManager::default();
        history.observe(
            EffectsSettings::reset().set(Field::Tempo, 120.0),
            Instant::now(),
        );
        assert!(history.flush());
        assert_eq!(history.cursor(), 1);
        assert!(!history.flush());
    }
}
