//! Test and simulation helpers for perfusion_core.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use perfusion_traits::Clock;

use crate::presentation::{Intent, IntentSource, Notice, Presenter, StatusSnapshot};

/// Intent source that replays a timed script against a clock.
///
/// With a test clock, `poll` advances time instead of blocking, so a whole
/// experiment runs instantly.
pub struct ScriptedIntents<C: Clock> {
    clock: C,
    origin: Instant,
    script: VecDeque<(Duration, Intent)>,
}

impl<C: Clock> ScriptedIntents<C> {
    pub fn new(clock: C) -> Self {
        let origin = clock.now();
        Self {
            clock,
            origin,
            script: VecDeque::new(),
        }
    }

    /// Deliver `intent` once `offset` has elapsed since construction.
    /// Entries must be added in time order.
    pub fn at(mut self, offset: Duration, intent: Intent) -> Self {
        self.script.push_back((offset, intent));
        self
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl<C: Clock> IntentSource for ScriptedIntents<C> {
    fn poll(&mut self, timeout: Duration) -> Option<Intent> {
        let Some(&(due, _)) = self.script.front() else {
            self.clock.sleep(timeout);
            return None;
        };
        let elapsed = self.clock.since(self.origin);
        if elapsed < due {
            self.clock.sleep((due - elapsed).min(timeout));
            if self.clock.since(self.origin) < due {
                return None;
            }
        }
        self.script.pop_front().map(|(_, intent)| intent)
    }
}

/// Presenter that keeps everything it is given.
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    pub snapshots: Vec<StatusSnapshot>,
    pub notices: Vec<Notice>,
}

impl Presenter for RecordingPresenter {
    fn render(&mut self, snapshot: &StatusSnapshot) {
        self.snapshots.push(snapshot.clone());
    }

    fn notify(&mut self, notice: Notice) {
        self.notices.push(notice);
    }
}
