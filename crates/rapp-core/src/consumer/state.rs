// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use tokio::sync::watch;
use tracing::{debug, warn};

/// Lifecycle phase of the event consumer.
///
/// ```text
///   Starting ──> Running <──> Cooldown
///      │            │            │
///      │            └─> Draining <┘
///      │                   │
///      └──────────────> Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerState {
    Starting,
    Running,
    /// Waiting after an unexpected iteration error.
    Cooldown,
    Draining,
    Stopped,
}

impl ConsumerState {
    #[must_use]
    pub fn can_transition_to(self, next: ConsumerState) -> bool {
        use ConsumerState::{Cooldown, Draining, Running, Starting, Stopped};
        matches!(
            (self, next),
            (Starting, Running | Stopped)
                | (Running, Cooldown | Draining)
                | (Cooldown, Running | Draining)
                | (Draining, Stopped)
        )
    }

    /// Subscribed and consuming, possibly between retries.
    #[must_use]
    pub fn is_ready(self) -> bool {
        matches!(self, ConsumerState::Running | ConsumerState::Cooldown)
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == ConsumerState::Stopped
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ConsumerState::Starting => "starting",
            ConsumerState::Running => "running",
            ConsumerState::Cooldown => "cooldown",
            ConsumerState::Draining => "draining",
            ConsumerState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Publishes state changes, refusing any transition the diagram forbids.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<ConsumerState>,
}

impl StateCell {
    pub(crate) fn new() -> (Self, watch::Receiver<ConsumerState>) {
        let (tx, rx) = watch::channel(ConsumerState::Starting);
        (Self { tx }, rx)
    }

    pub(crate) fn get(&self) -> ConsumerState {
        *self.tx.borrow()
    }

    /// Moves to `next`. Returns false, leaving the state untouched, when the
    /// transition is not allowed.
    pub(crate) fn advance(&self, next: ConsumerState) -> bool {
        let mut from = None;
        let moved = self.tx.send_if_modified(|current| {
            from = Some(*current);
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });
        match (moved, from) {
            (true, Some(from)) => debug!("Consumer state {from} -> {next}"),
            (false, Some(from)) => warn!("Refusing consumer state transition {from} -> {next}"),
            _ => {}
        }
        moved
    }
}
