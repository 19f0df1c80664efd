// Broker connection lifecycle - states, status events and the reconnect policy
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Discrete events reported to the status sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Connecting,
    Connected,
    Failed,
    MessageDecodeError { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Consecutive failures tolerated before giving up; `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

impl RetryPolicy {
    /// Exponential delay for the given 1-based attempt, capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// What the ingestor should do after a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconnect {
    After { attempt: u32, delay: Duration },
    GiveUp { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    policy: RetryPolicy,
    consecutive_failures: u32,
}

impl ConnectionStateMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn begin_connect(&mut self) -> Option<StatusEvent> {
        match self.state {
            ConnectionState::Failed | ConnectionState::Connecting => None,
            _ => {
                self.state = ConnectionState::Connecting;
                Some(StatusEvent::Connecting)
            }
        }
    }

    pub fn on_connected(&mut self) -> Option<StatusEvent> {
        if self.state == ConnectionState::Failed {
            return None;
        }
        self.consecutive_failures = 0;
        self.state = ConnectionState::Connected;
        Some(StatusEvent::Connected)
    }

    pub fn on_transport_error(&mut self) -> (Reconnect, Option<StatusEvent>) {
        if self.state == ConnectionState::Failed {
            return (
                Reconnect::GiveUp {
                    attempts: self.consecutive_failures,
                },
                None,
            );
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let attempt = self.consecutive_failures;

        if self.policy.max_retries.is_some_and(|ceiling| attempt > ceiling) {
            self.state = ConnectionState::Failed;
            return (Reconnect::GiveUp { attempts: attempt }, Some(StatusEvent::Failed));
        }

        let event = (self.state != ConnectionState::Connecting).then_some(StatusEvent::Connecting);
        self.state = ConnectionState::Connecting;
        (
            Reconnect::After {
                attempt,
                delay: self.policy.backoff_for(attempt),
            },
            event,
        )
    }

    pub fn on_disconnected(&mut self) {
        if self.state != ConnectionState::Failed {
            self.state = ConnectionState::Disconnected;
        }
    }
}
