//! Connection state machine of the real-time channel.
//!
//! The machine is pure: it never touches sockets or timers. The connection
//! task feeds it lifecycle events and carries out the command it returns,
//! so every timer lives in exactly one place.

use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
  #[default]
  Disconnected,
  Connecting,
  Connected,
  Reconnecting,
}

impl fmt::Display for ConnectionState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ConnectionState::Disconnected => "disconnected",
      ConnectionState::Connecting => "connecting",
      ConnectionState::Connected => "connected",
      ConnectionState::Reconnecting => "reconnecting",
    };
    f.write_str(name)
  }
}

/// Inputs to [`ConnectionMachine::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  /// Explicit connect or re-enable
  Enable,
  /// Handshake completed
  Opened,
  /// An open connection ended
  Closed,
  /// A connection attempt failed
  Failed,
  /// Backoff delay elapsed
  RetryTimerFired,
  /// Explicit disconnect or disable
  Disable,
}

/// What the connection task must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
  /// Open a connection
  Connect,
  /// Run the session and start the keep-alive ping
  KeepAlive,
  /// Wait, then fire [`Lifecycle::RetryTimerFired`]
  Backoff(Duration),
  /// Tear everything down and stop
  Halt,
  Nothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
  pub max_attempts: u32,
  pub base_delay: Duration,
  pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      base_delay: Duration::from_secs(1),
      max_delay: Duration::from_secs(30),
    }
  }
}

impl ReconnectPolicy {
  /// Delay before reconnect attempt `attempt` (1-based):
  /// `min(base * 2^(attempt-1), max)`.
  pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    self
      .base_delay
      .saturating_mul(1u32 << exponent)
      .min(self.max_delay)
  }
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
  state: ConnectionState,
  attempts: u32,
  policy: ReconnectPolicy,
}

impl ConnectionMachine {
  pub fn new(policy: ReconnectPolicy) -> Self {
    Self {
      state: ConnectionState::Disconnected,
      attempts: 0,
      policy,
    }
  }

  pub fn state(&self) -> ConnectionState {
    self.state
  }

  /// Consecutive failed attempts since the last successful open
  pub fn attempts(&self) -> u32 {
    self.attempts
  }

  pub fn policy(&self) -> &ReconnectPolicy {
    &self.policy
  }

  pub fn dispatch(&mut self, event: Lifecycle) -> Command {
    use ConnectionState::*;

    match (self.state, event) {
      (Disconnected, Lifecycle::Enable) => {
        self.attempts = 0;
        self.state = Connecting;
        Command::Connect
      }
      (_, Lifecycle::Enable) => Command::Nothing,

      (Connecting, Lifecycle::Opened) => {
        self.attempts = 0;
        self.state = Connected;
        Command::KeepAlive
      }

      (Connecting | Connected, Lifecycle::Closed | Lifecycle::Failed) => {
        self.attempts += 1;
        if self.attempts > self.policy.max_attempts {
          self.state = Disconnected;
          Command::Halt
        } else {
          self.state = Reconnecting;
          Command::Backoff(self.policy.delay_for_attempt(self.attempts))
        }
      }

      (Reconnecting, Lifecycle::RetryTimerFired) => {
        self.state = Connecting;
        Command::Connect
      }

      (Disconnected, Lifecycle::Disable) => {
        self.attempts = 0;
        Command::Nothing
      }
      (_, Lifecycle::Disable) => {
        self.attempts = 0;
        self.state = Disconnected;
        Command::Halt
      }

      _ => Command::Nothing,
    }
  }
}
