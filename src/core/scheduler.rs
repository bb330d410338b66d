//! Timers that post messages back into the session queue.
//!
//! Each timer kind has at most one armed instance: re-arming cancels the
//! previous one. All timers are children of one root token, so teardown
//! cancels them in one step.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::session::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Timer {
    DockVerify,
    Relaunch,
}

pub(crate) struct Scheduler {
    tx: mpsc::UnboundedSender<Message>,
    root: CancellationToken,
    armed: HashMap<Timer, CancellationToken>,
}

impl Scheduler {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            tx,
            root: CancellationToken::new(),
            armed: HashMap::new(),
        }
    }

    /// Posts `msg` after `delay`, replacing any armed timer of the same kind.
    pub(crate) fn schedule(&mut self, timer: Timer, delay: Duration, msg: Message) {
        if self.root.is_cancelled() {
            return;
        }
        let token = self.root.child_token();
        if let Some(old) = self.armed.insert(timer, token.clone()) {
            old.cancel();
        }
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(msg);
                }
            }
        });
    }

    pub(crate) fn cancel(&mut self, timer: Timer) {
        if let Some(token) = self.armed.remove(&timer) {
            token.cancel();
        }
    }

    /// Cancels every timer and refuses new ones. Idempotent.
    pub(crate) fn cancel_all(&mut self) {
        self.root.cancel();
        self.armed.clear();
    }
}
