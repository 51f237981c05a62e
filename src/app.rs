use color_eyre::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::api::{CachedDashboardClient, DashboardClient};
use crate::cache::QueryCache;
use crate::config::Config;
use crate::http::Connectivity;
use crate::prefs::{DebouncedWriter, PreferenceStore, WRITE_DEBOUNCE};
use crate::realtime::{RealtimeClient, RealtimeOptions};

/// Profit figures after the user's custom expenses
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjustedProfit {
  pub custom_expenses: f64,
  pub net_profit: f64,
  pub margin: f64,
}

/// Root scope of the data layer.
///
/// Created once at startup; owns the query cache and everything that
/// shares it. Background work (cache GC, the real-time connection and the
/// preference writer) ends in [`shutdown`](Self::shutdown).
pub struct Dashboard {
  config: Config,
  api: CachedDashboardClient,
  realtime: RealtimeClient,
  prefs: Arc<PreferenceStore>,
  expenses_writer: DebouncedWriter,
  gc: JoinHandle<()>,
}

impl Dashboard {
  /// Build the data layer with the preference store in the data directory.
  pub fn new(config: Config) -> Result<Self> {
    let prefs = PreferenceStore::open_default()?;
    Self::with_prefs(config, prefs)
  }

  pub fn with_prefs(config: Config, prefs: PreferenceStore) -> Result<Self> {
    let cache = QueryCache::new(config.cache.to_cache_config());
    let gc = cache.spawn_gc(config.cache.gc_interval());

    let client = DashboardClient::new(&config.api, Connectivity::default())?;
    let api = CachedDashboardClient::new(client, cache.clone());
    let realtime = RealtimeClient::new(RealtimeOptions::from(&config.realtime), cache)?;

    let prefs = Arc::new(prefs);
    let expenses_writer = DebouncedWriter::spawn(prefs.clone(), WRITE_DEBOUNCE);

    Ok(Self {
      config,
      api,
      realtime,
      prefs,
      expenses_writer,
      gc,
    })
  }

  /// Connect the real-time channel if it is enabled in the configuration.
  pub fn start(&self) {
    if self.config.realtime.enabled {
      self.realtime.connect();
    } else {
      info!("real-time updates disabled");
    }
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn api(&self) -> &CachedDashboardClient {
    &self.api
  }

  pub fn cache(&self) -> &QueryCache {
    self.api.cache()
  }

  pub fn realtime(&self) -> &RealtimeClient {
    &self.realtime
  }

  pub fn prefs(&self) -> &PreferenceStore {
    &self.prefs
  }

  pub fn custom_expenses(&self) -> Result<f64> {
    self.prefs.custom_expenses()
  }

  /// Record a new custom-expenses value; persisted after the debounce.
  pub fn set_custom_expenses(&self, value: f64) {
    self.expenses_writer.set(value);
  }

  /// Profit analysis for `params` with custom expenses applied.
  pub async fn adjusted_profit(&self, params: &str) -> Result<AdjustedProfit> {
    let analysis = self.api.profit_analysis(params).await?;
    let custom_expenses = self.custom_expenses()?;
    Ok(AdjustedProfit {
      custom_expenses,
      net_profit: analysis.net_profit_after(custom_expenses),
      margin: analysis.margin_after(custom_expenses),
    })
  }

  /// Stop background work and flush pending preference writes.
  pub async fn shutdown(self) {
    self.realtime.disconnect();
    self.gc.abort();
    self.expenses_writer.shutdown().await;
    self.api.cache().clear();
    info!("dashboard shut down");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::realtime::ConnectionState;
  use httpmock::prelude::*;
  use serde_json::json;

  fn test_config(base_url: String) -> Config {
    let mut config = Config::from_yaml("realtime:\n  enabled: false\n").unwrap();
    config.api.base_url = base_url;
    config
  }

  #[tokio::test]
  async fn test_adjusted_profit_uses_saved_expenses() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.method(GET).path("/api/profit-analysis");
        then.status(200).json_body(json!({
          "revenue": 2000.0,
          "costOfGoods": 800.0,
          "expenses": 400.0,
          "grossProfit": 1200.0,
          "netProfit": 800.0
        }));
      })
      .await;

    let prefs = PreferenceStore::open_in_memory().unwrap();
    prefs.set_custom_expenses(300.0).unwrap();
    let dashboard = Dashboard::with_prefs(test_config(server.base_url()), prefs).unwrap();
    dashboard.start();
    assert_eq!(dashboard.realtime().state(), ConnectionState::Disconnected);
    assert!(!dashboard.realtime().is_active());

    let profit = dashboard.adjusted_profit("period=month").await.unwrap();
    assert_eq!(profit.custom_expenses, 300.0);
    assert_eq!(profit.net_profit, 500.0);
    assert_eq!(profit.margin, 25.0);
    dashboard.shutdown().await;
  }

  #[tokio::test]
  async fn test_shutdown_flushes_custom_expenses() {
    let prefs = PreferenceStore::open_in_memory().unwrap();
    let dashboard = Dashboard::with_prefs(test_config("http://127.0.0.1:9".into()), prefs).unwrap();
    let store = dashboard.prefs.clone();

    dashboard.set_custom_expenses(75.0);
    dashboard.set_custom_expenses(80.0);
    dashboard.shutdown().await;
    assert_eq!(store.custom_expenses().unwrap(), 80.0);
  }
}
