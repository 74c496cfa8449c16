// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use tokio::sync::watch;

/// Lifecycle of one server.  Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServerState {
    Created,
    Starting,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ServerState::Created => "created",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Draining => "draining",
            ServerState::Stopped => "stopped",
        })
    }
}

/// A monotonic state cell observers can wait on.
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<ServerState>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self {
            tx: watch::Sender::new(ServerState::Created),
        }
    }
}

impl StateCell {
    pub fn get(&self) -> ServerState {
        *self.tx.borrow()
    }

    /// Move to `next` if it is ahead of the current state.
    pub fn advance(&self, next: ServerState) -> bool {
        self.tx.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    /// Move from `from` to `to`, failing when another transition got there
    /// first.
    pub fn transition(&self, from: ServerState, to: ServerState) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == from && to > from {
                *current = to;
                true
            } else {
                false
            }
        })
    }

    /// Wait until the state reaches at least `target`.
    pub async fn reached(&self, target: ServerState) -> ServerState {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(|s| *s >= target).await {
            Ok(state) => *state,
            Err(_) => self.get(),
        }
    }
}
