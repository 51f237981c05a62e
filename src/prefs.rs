//! Persisted display preferences.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::Config;

/// Preference key of the user's extra monthly expenses
pub const CUSTOM_EXPENSES: &str = "custom_expenses";

/// Quiet period before a debounced value is written
pub const WRITE_DEBOUNCE: Duration = Duration::from_millis(500);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS preferences (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// SQLite-backed key/value store; values are JSON encoded.
pub struct PreferenceStore {
  conn: Mutex<Connection>,
}

impl PreferenceStore {
  /// Open or create the store in the data directory.
  pub fn open_default() -> Result<Self> {
    let path = Config::data_dir()?.join("prefs.db");
    Self::open_at(&path)
  }

  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create preference directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open preference database at {}: {}", path.display(), e))?;
    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory preference database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run preference migrations: {}", e))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let raw: Option<String> = conn
      .query_row(
        "SELECT value FROM preferences WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read preference {}: {}", key, e))?;

    raw
      .map(|value| {
        serde_json::from_str(&value).map_err(|e| eyre!("Invalid value for preference {}: {}", key, e))
      })
      .transpose()
  }

  pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
    let value =
      serde_json::to_string(value).map_err(|e| eyre!("Failed to serialize preference {}: {}", key, e))?;
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO preferences (key, value, updated_at) VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to store preference {}: {}", key, e))?;
    Ok(())
  }

  /// Extra expenses subtracted from profit figures; zero when unset.
  pub fn custom_expenses(&self) -> Result<f64> {
    Ok(self.get(CUSTOM_EXPENSES)?.unwrap_or(0.0))
  }

  pub fn set_custom_expenses(&self, value: f64) -> Result<()> {
    if !value.is_finite() {
      return Err(eyre!("Custom expenses must be a finite number, got {}", value));
    }
    self.set(CUSTOM_EXPENSES, &value)
  }
}

/// Writes the custom-expenses preference after input has been quiet for
/// the debounce period. Only the last value of a burst is written.
pub struct DebouncedWriter {
  tx: watch::Sender<Option<f64>>,
  handle: JoinHandle<()>,
}

impl DebouncedWriter {
  pub fn spawn(store: Arc<PreferenceStore>, delay: Duration) -> Self {
    let (tx, rx) = watch::channel(None);
    let handle = tokio::spawn(run_writer(store, rx, delay));
    Self { tx, handle }
  }

  pub fn set(&self, value: f64) {
    self.tx.send_replace(Some(value));
  }

  /// Write any pending value now and stop the writer.
  pub async fn shutdown(self) {
    let Self { tx, handle } = self;
    drop(tx);
    if let Err(e) = handle.await {
      warn!(error = %e, "preference writer task failed");
    }
  }
}

async fn run_writer(store: Arc<PreferenceStore>, mut rx: watch::Receiver<Option<f64>>, delay: Duration) {
  loop {
    if rx.changed().await.is_err() {
      return;
    }

    // Restart the quiet period on every new value
    let closed = loop {
      tokio::select! {
        _ = tokio::time::sleep(delay) => break false,
        changed = rx.changed() => {
          if changed.is_err() {
            break true;
          }
        }
      }
    };

    let value = *rx.borrow_and_update();
    if let Some(value) = value {
      match store.set_custom_expenses(value) {
        Ok(()) => debug!(value, "custom expenses saved"),
        Err(e) => warn!(error = %e, "failed to save custom expenses"),
      }
    }
    if closed {
      return;
    }
  }
}
