//! Intent source fed from another thread.
//!
//! Producers (a stdin reader, a socket, a UI thread) push parsed intents
//! through a bounded channel; the control thread waits on it with the
//! loop's poll timeout.
use crossbeam_channel as xch;
use std::time::Duration;

use crate::presentation::{Intent, IntentSource};

/// Queue depth; operator input never comes close.
const DEPTH: usize = 64;

#[derive(Debug)]
pub struct ChannelIntents {
    rx: xch::Receiver<Intent>,
    closed: bool,
}

impl ChannelIntents {
    pub fn new(rx: xch::Receiver<Intent>) -> Self {
        Self { rx, closed: false }
    }

    /// A connected sender/source pair.
    pub fn pair() -> (xch::Sender<Intent>, Self) {
        let (tx, rx) = xch::bounded(DEPTH);
        (tx, Self::new(rx))
    }
}

impl IntentSource for ChannelIntents {
    fn poll(&mut self, timeout: Duration) -> Option<Intent> {
        if self.closed {
            return None;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(intent) => Some(intent),
            Err(xch::RecvTimeoutError::Timeout) => None,
            Err(xch::RecvTimeoutError::Disconnected) => {
                tracing::debug!("intent producers gone");
                self.closed = true;
                None
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
