//! Connection lifecycle as a pure state machine.
//!
//! [`ConnectionMachine`] owns the [`ConnectionState`] and the consecutive
//! failure count. It performs no I/O: every input is a [`ConnectionEvent`]
//! and every side effect comes back as an [`Action`] for the driver in
//! [`crate::transport`] to carry out.

use parley_types::ConnectionState;
use serde::Deserialize;
use std::time::Duration;

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_multiplier() -> u32 {
    2
}

/// Exponential backoff without jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl ReconnectPolicy {
    /// `base_delay_ms * multiplier^attempt`, saturating.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.multiplier).saturating_pow(attempt);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The caller asked to connect.
    ConnectRequested,
    /// The in-flight connection attempt succeeded.
    Opened,
    /// The attempt failed or the live socket closed.
    Closed,
    /// The caller asked to disconnect.
    DisconnectRequested,
    /// The scheduled reconnect delay elapsed.
    RetryElapsed,
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Start a connection attempt.
    Open,
    ScheduleRetry(Duration),
    CancelRetry,
    /// Close the live socket or abandon the in-flight attempt.
    CloseSocket,
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    failures: u32,
    policy: ReconnectPolicy,
}

impl ConnectionMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            failures: 0,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failed connection attempts since the last successful
    /// open or manual reset.
    pub fn attempt(&self) -> u32 {
        self.failures
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn handle(&mut self, event: ConnectionEvent) -> Vec<Action> {
        use ConnectionEvent as E;
        use ConnectionState as S;

        match (self.state, event) {
            (S::Disconnected, E::ConnectRequested) => {
                self.state = S::Connecting;
                vec![Action::Open]
            }
            (S::Failed, E::ConnectRequested) => {
                self.failures = 0;
                self.state = S::Connecting;
                vec![Action::Open]
            }
            (S::Reconnecting, E::ConnectRequested) => {
                self.state = S::Connecting;
                vec![Action::CancelRetry, Action::Open]
            }
            (S::Connecting | S::Connected, E::ConnectRequested) => Vec::new(),

            (S::Connecting, E::Opened) => {
                self.failures = 0;
                self.state = S::Connected;
                Vec::new()
            }

            (S::Connecting | S::Connected, E::Closed) => {
                self.failures += 1;
                if self.failures < self.policy.max_attempts {
                    self.state = S::Reconnecting;
                    vec![Action::ScheduleRetry(
                        self.policy.delay_for(self.failures - 1),
                    )]
                } else {
                    self.state = S::Failed;
                    Vec::new()
                }
            }

            (S::Reconnecting, E::RetryElapsed) => {
                self.state = S::Connecting;
                vec![Action::Open]
            }

            (state, E::DisconnectRequested) => {
                self.failures = 0;
                self.state = S::Disconnected;
                match state {
                    S::Connecting | S::Connected => vec![Action::CloseSocket],
                    S::Reconnecting => vec![Action::CancelRetry],
                    S::Disconnected | S::Failed => Vec::new(),
                }
            }

            // Late completions for attempts that were already abandoned.
            (_, E::Opened | E::Closed | E::RetryElapsed) => Vec::new(),
        }
    }
}
