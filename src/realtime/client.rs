use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::events::{EventEnvelope, EventKind, Milestone};
use super::machine::{Command, ConnectionMachine, ConnectionState, Lifecycle, ReconnectPolicy};
use crate::cache::{KeyFilter, QueryCache};
use crate::config::RealtimeSettings;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Keep-alive frame sent on the ping interval
const PING: &str = "ping";

const MILESTONE_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeOptions {
  pub url: String,
  pub room: String,
  pub ping_interval: Duration,
  pub connect_timeout: Duration,
  pub policy: ReconnectPolicy,
}

impl From<&RealtimeSettings> for RealtimeOptions {
  fn from(settings: &RealtimeSettings) -> Self {
    Self {
      url: settings.url.clone(),
      room: settings.room.clone(),
      ping_interval: settings.ping_interval(),
      connect_timeout: settings.connect_timeout(),
      policy: settings.reconnect_policy(),
    }
  }
}

/// State shared between the client handle and its connection task.
struct Shared {
  cache: QueryCache,
  state: watch::Sender<ConnectionState>,
  /// Session allowed to publish state; bumped on every connect and disconnect
  generation: AtomicU64,
  milestones: broadcast::Sender<Milestone>,
  last_message_at: Mutex<Option<DateTime<Utc>>>,
}

impl Shared {
  fn next_generation(&self) -> u64 {
    self.generation.fetch_add(1, Ordering::SeqCst) + 1
  }

  /// Dispatch `event` and publish the new state, unless a later connect or
  /// disconnect has retired `generation`.
  fn apply(&self, generation: u64, machine: &mut ConnectionMachine, event: Lifecycle) -> Command {
    let command = machine.dispatch(event);
    self.state.send_if_modified(|state| {
      if self.generation.load(Ordering::SeqCst) != generation {
        return false;
      }
      let changed = *state != machine.state();
      *state = machine.state();
      changed
    });
    debug!(?event, ?command, state = %machine.state(), "real-time lifecycle");
    command
  }

  fn handle_frame(&self, frame: &str) -> Option<EventKind> {
    let envelope = match EventEnvelope::parse(frame) {
      Ok(envelope) => envelope,
      Err(e) => {
        warn!(error = %e, "ignoring malformed real-time frame");
        return None;
      }
    };
    *lock(&self.last_message_at, "last_message_at") = Some(Utc::now());

    let kind = envelope.kind();
    match &kind {
      EventKind::Milestone => {
        // No receivers is fine
        let _ = self.milestones.send(Milestone::from(envelope));
      }
      EventKind::Connected | EventKind::Pong => {}
      EventKind::Unknown(name) => {
        info!(event = %name, "ignoring unknown real-time event");
      }
      _ => {
        let mut invalidated = 0;
        for operation in kind.invalidates() {
          invalidated += self.cache.invalidate(&KeyFilter::operation(operation.name()));
        }
        debug!(event = %envelope.event, invalidated, "real-time invalidation");
      }
    }
    Some(kind)
  }
}

struct Session {
  cancel: CancellationToken,
  handle: JoinHandle<()>,
}

/// Client of the real-time push channel for one room.
///
/// Owns at most one connection task at a time. The task drives a
/// [`ConnectionMachine`] and owns every timer it needs, so cancelling the
/// task tears down the socket, the backoff delay and the keep-alive ping
/// together. Dropping the client cancels the task.
pub struct RealtimeClient {
  endpoint: Url,
  ping_interval: Duration,
  connect_timeout: Duration,
  policy: ReconnectPolicy,
  shared: Arc<Shared>,
  session: Mutex<Option<Session>>,
}

impl RealtimeClient {
  pub fn new(options: RealtimeOptions, cache: QueryCache) -> Result<Self> {
    let endpoint = endpoint(&options.url, &options.room)?;
    let (state, _) = watch::channel(ConnectionState::Disconnected);
    let (milestones, _) = broadcast::channel(MILESTONE_CAPACITY);

    Ok(Self {
      endpoint,
      ping_interval: options.ping_interval,
      connect_timeout: options.connect_timeout,
      policy: options.policy,
      shared: Arc::new(Shared {
        cache,
        state,
        generation: AtomicU64::new(0),
        milestones,
        last_message_at: Mutex::new(None),
      }),
      session: Mutex::new(None),
    })
  }

  pub fn endpoint(&self) -> &Url {
    &self.endpoint
  }

  /// Start the connection task. A no-op while one is already connecting,
  /// connected or waiting to reconnect.
  pub fn connect(&self) {
    let mut session = lock(&self.session, "connect");
    if session.as_ref().is_some_and(|s| !s.handle.is_finished()) {
      debug!(url = %self.endpoint, "real-time client already running");
      return;
    }

    let cancel = CancellationToken::new();
    let task = ConnectionTask {
      endpoint: self.endpoint.clone(),
      ping_interval: self.ping_interval,
      connect_timeout: self.connect_timeout,
      policy: self.policy,
      generation: self.shared.next_generation(),
      shared: self.shared.clone(),
      cancel: cancel.clone(),
    };
    let handle = tokio::spawn(task.run());
    *session = Some(Session { cancel, handle });
  }

  /// Tear down the connection and any pending timer.
  pub fn disconnect(&self) {
    if let Some(session) = lock(&self.session, "disconnect").take() {
      session.cancel.cancel();
      info!(url = %self.endpoint, "real-time client disconnected");
    }
    self.shared.next_generation();
    self.shared.state.send_replace(ConnectionState::Disconnected);
  }

  /// Enabling starts fresh from connecting; disabling disconnects.
  pub fn set_enabled(&self, enabled: bool) {
    if enabled {
      self.connect();
    } else {
      self.disconnect();
    }
  }

  /// Whether a connection task is alive
  pub fn is_active(&self) -> bool {
    lock(&self.session, "is_active")
      .as_ref()
      .is_some_and(|s| !s.handle.is_finished())
  }

  pub fn state(&self) -> ConnectionState {
    *self.shared.state.borrow()
  }

  pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
    self.shared.state.subscribe()
  }

  pub fn subscribe_milestones(&self) -> broadcast::Receiver<Milestone> {
    self.shared.milestones.subscribe()
  }

  /// When the last well-formed frame arrived
  pub fn last_message_at(&self) -> Option<DateTime<Utc>> {
    *lock(&self.shared.last_message_at, "last_message_at")
  }

  /// Process one inbound frame as the connection task does. Returns the
  /// event kind, or `None` for a malformed frame.
  pub fn handle_frame(&self, frame: &str) -> Option<EventKind> {
    self.shared.handle_frame(frame)
  }
}

impl Drop for RealtimeClient {
  fn drop(&mut self) {
    if let Some(session) = lock(&self.session, "drop").take() {
      session.cancel.cancel();
    }
  }
}

/// WebSocket URL of `room`, carried as the `room` query parameter.
fn endpoint(url: &str, room: &str) -> Result<Url> {
  let mut endpoint = Url::parse(url).map_err(|e| eyre!("Invalid real-time URL {}: {}", url, e))?;
  if !matches!(endpoint.scheme(), "ws" | "wss") {
    return Err(eyre!("Real-time URL must use ws:// or wss://, got {}", url));
  }
  endpoint.query_pairs_mut().append_pair("room", room);
  Ok(endpoint)
}

fn lock<'a, T>(mutex: &'a Mutex<T>, op: &'static str) -> MutexGuard<'a, T> {
  match mutex.lock() {
    Ok(guard) => guard,
    Err(poisoned) => {
      warn!(op, "recovered from poisoned real-time lock");
      poisoned.into_inner()
    }
  }
}

enum SessionEnd {
  Lost,
  Cancelled,
}

/// One session of the connection loop. Only its own generation may
/// publish state, so a cancelled session cannot overwrite its successor.
struct ConnectionTask {
  endpoint: Url,
  ping_interval: Duration,
  connect_timeout: Duration,
  policy: ReconnectPolicy,
  generation: u64,
  shared: Arc<Shared>,
  cancel: CancellationToken,
}

impl ConnectionTask {
  fn apply(&self, machine: &mut ConnectionMachine, event: Lifecycle) -> Command {
    self.shared.apply(self.generation, machine, event)
  }

  /// Drive the machine until it halts. Cancellation returns without
  /// touching the published state; `disconnect` has already reset it.
  async fn run(self) {
    let endpoint = &self.endpoint;
    let mut machine = ConnectionMachine::new(self.policy);
    let mut socket: Option<WsStream> = None;
    let mut command = self.apply(&mut machine, Lifecycle::Enable);

    loop {
      command = match command {
        Command::Connect => {
          debug!(url = %endpoint, attempt = machine.attempts(), "opening real-time connection");
          let attempt = tokio::time::timeout(
            self.connect_timeout,
            tokio_tungstenite::connect_async(endpoint.as_str()),
          );
          let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            result = attempt => result,
          };
          match result {
            Ok(Ok((stream, _))) => {
              info!(url = %endpoint, "real-time connection open");
              socket = Some(stream);
              self.apply(&mut machine, Lifecycle::Opened)
            }
            Ok(Err(e)) => {
              warn!(url = %endpoint, error = %e, "real-time connection failed");
              self.apply(&mut machine, Lifecycle::Failed)
            }
            Err(_) => {
              warn!(
                url = %endpoint,
                timeout_ms = self.connect_timeout.as_millis() as u64,
                "real-time connection timed out"
              );
              self.apply(&mut machine, Lifecycle::Failed)
            }
          }
        }
        Command::KeepAlive => {
          let Some(ws) = socket.take() else {
            break;
          };
          match run_session(ws, self.ping_interval, &self.shared, &self.cancel).await {
            SessionEnd::Cancelled => return,
            SessionEnd::Lost => self.apply(&mut machine, Lifecycle::Closed),
          }
        }
        Command::Backoff(delay) => {
          info!(
            attempt = machine.attempts(),
            delay_ms = delay.as_millis() as u64,
            "reconnecting to real-time channel"
          );
          tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => self.apply(&mut machine, Lifecycle::RetryTimerFired),
          }
        }
        Command::Halt => {
          warn!(
            attempts = machine.attempts(),
            max_attempts = machine.policy().max_attempts,
            "real-time reconnect attempts exhausted"
          );
          break;
        }
        Command::Nothing => break,
      };
    }

    self.apply(&mut machine, Lifecycle::Disable);
  }
}

async fn run_session(
  mut ws: WsStream,
  ping_interval: Duration,
  shared: &Shared,
  cancel: &CancellationToken,
) -> SessionEnd {
  let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
  ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      biased;
      _ = cancel.cancelled() => {
        let _ = ws.close(None).await;
        return SessionEnd::Cancelled;
      }
      _ = ping.tick() => {
        if let Err(e) = ws.send(Message::Text(PING.into())).await {
          warn!(error = %e, "keep-alive ping failed");
          return SessionEnd::Lost;
        }
      }
      frame = ws.next() => {
        match frame {
          Some(Ok(Message::Text(text))) => {
            shared.handle_frame(&text);
          }
          Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
            Ok(text) => {
              shared.handle_frame(text);
            }
            Err(_) => warn!(len = bytes.len(), "ignoring non-UTF-8 real-time frame"),
          },
          Some(Ok(Message::Close(frame))) => {
            info!(?frame, "real-time connection closed by server");
            return SessionEnd::Lost;
          }
          // Protocol pings are answered by tungstenite
          Some(Ok(_)) => {}
          Some(Err(e)) => {
            warn!(error = %e, "real-time connection error");
            return SessionEnd::Lost;
          }
          None => return SessionEnd::Lost,
        }
      }
    }
  }
}
