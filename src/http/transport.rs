//! One HTTP exchange with a bounded lifetime.

use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ApiError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Per-call transport options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
  /// Overrides the transport's default timeout
  pub timeout: Option<Duration>,
  /// Cancelling this token aborts the exchange with [`ApiError::Cancelled`]
  pub signal: Option<CancellationToken>,
}

impl RequestOptions {
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn with_signal(mut self, signal: CancellationToken) -> Self {
    self.signal = Some(signal);
    self
  }
}

/// Host-reported online flag, shared by every clone.
///
/// Only consulted when a request fails without a response, to tell
/// "offline" apart from "server unreachable".
#[derive(Debug, Clone)]
pub struct Connectivity {
  online: Arc<AtomicBool>,
}

impl Default for Connectivity {
  fn default() -> Self {
    Self {
      online: Arc::new(AtomicBool::new(true)),
    }
  }
}

impl Connectivity {
  pub fn is_online(&self) -> bool {
    self.online.load(Ordering::Relaxed)
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::Relaxed);
  }
}

/// HTTP transport that races every exchange against a timeout and an
/// optional external cancellation token.
#[derive(Debug, Clone)]
pub struct Transport {
  client: reqwest::Client,
  default_timeout: Duration,
  connectivity: Connectivity,
}

impl Transport {
  pub fn new(client: reqwest::Client, default_timeout: Duration, connectivity: Connectivity) -> Self {
    Self {
      client,
      default_timeout,
      connectivity,
    }
  }

  /// The underlying client, for building requests.
  pub fn client(&self) -> &reqwest::Client {
    &self.client
  }

  pub fn connectivity(&self) -> &Connectivity {
    &self.connectivity
  }

  /// Send the request and return the body of a successful response.
  ///
  /// Whichever of the timer and the external token fires first wins; the
  /// losing branch and the in-flight exchange are dropped with the select.
  pub async fn execute(
    &self,
    request: reqwest::RequestBuilder,
    options: &RequestOptions,
  ) -> Result<String, ApiError> {
    let duration = options.timeout.unwrap_or(self.default_timeout);
    let signal = options.signal.clone().unwrap_or_default();

    let exchange = async {
      let response = request.send().await.map_err(|e| self.classify(e))?;
      let status = response.status();
      if !status.is_success() {
        return Err(ApiError::from_status(
          status.as_u16(),
          status.canonical_reason().unwrap_or(""),
        ));
      }
      response.text().await.map_err(|e| self.classify(e))
    };

    let result = tokio::select! {
      biased;
      _ = signal.cancelled() => Err(ApiError::Cancelled),
      outcome = tokio::time::timeout(duration, exchange) => {
        outcome.unwrap_or(Err(ApiError::Timeout { duration }))
      }
    };

    if let Err(e) = &result {
      debug!(error = %e, kind = ?e.kind(), "request failed");
    }
    result
  }

  /// Send the request and decode a JSON body.
  pub async fn execute_json<T: DeserializeOwned>(
    &self,
    request: reqwest::RequestBuilder,
    options: &RequestOptions,
  ) -> Result<T, ApiError> {
    let body = self.execute(request, options).await?;
    decode_body(&body)
  }

  fn classify(&self, error: reqwest::Error) -> ApiError {
    if error.is_decode() {
      return ApiError::parse(error.to_string());
    }
    if !self.connectivity.is_online() {
      return ApiError::offline();
    }
    ApiError::connection_failed(error.to_string())
  }
}

/// Decode a response body; an empty body is treated as JSON `null`.
pub fn decode_body<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
  let body = if body.trim().is_empty() { "null" } else { body };
  serde_json::from_str(body).map_err(|e| ApiError::parse(e.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::{ErrorKind, NetworkReason};
  use httpmock::prelude::*;
  use serde_json::{json, Value};

  fn transport() -> Transport {
    Transport::new(reqwest::Client::new(), DEFAULT_TIMEOUT, Connectivity::default())
  }

  #[tokio::test]
  async fn test_success_returns_decoded_body() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.method(GET).path("/ok");
        then.status(200).json_body(json!({ "value": 7 }));
      })
      .await;

    let t = transport();
    let body: Value = t
      .execute_json(t.client().get(server.url("/ok")), &RequestOptions::default())
      .await
      .unwrap();
    assert_eq!(body["value"], 7);
  }

  #[tokio::test]
  async fn test_error_status_is_mapped() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.method(GET).path("/missing");
        then.status(404);
      })
      .await;

    let t = transport();
    let err = t
      .execute(t.client().get(server.url("/missing")), &RequestOptions::default())
      .await
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Client);
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.to_string(), "Requested data not found (HTTP 404)");
  }

  #[tokio::test]
  async fn test_unparseable_body_is_parse_error() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.method(GET).path("/garbage");
        then.status(200).body("<html>not json</html>");
      })
      .await;

    let t = transport();
    let err = t
      .execute_json::<Value>(t.client().get(server.url("/garbage")), &RequestOptions::default())
      .await
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
  }

  #[tokio::test]
  async fn test_timeout_carries_duration() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.method(GET).path("/slow");
        then.status(200).body("{}").delay(Duration::from_millis(500));
      })
      .await;

    let t = transport();
    let options = RequestOptions::default().with_timeout(Duration::from_millis(50));
    let err = t
      .execute(t.client().get(server.url("/slow")), &options)
      .await
      .unwrap_err();
    assert_eq!(
      err,
      ApiError::Timeout {
        duration: Duration::from_millis(50)
      }
    );
  }

  #[tokio::test(start_paused = true)]
  async fn test_default_timeout_reports_thirty_seconds() {
    // Accepted by the backlog, never answered
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/summary", listener.local_addr().unwrap());

    let t = transport();
    let err = t
      .execute(t.client().get(&url), &RequestOptions::default())
      .await
      .unwrap_err();
    assert_eq!(
      err,
      ApiError::Timeout {
        duration: Duration::from_millis(30_000)
      }
    );
    assert_eq!(err.kind(), ErrorKind::Timeout);
    drop(listener);
  }

  #[tokio::test]
  async fn test_external_cancel_is_not_a_timeout() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.method(GET).path("/slow");
        then.status(200).body("{}").delay(Duration::from_millis(500));
      })
      .await;

    let t = transport();
    let token = CancellationToken::new();
    let options = RequestOptions::default()
      .with_timeout(Duration::from_millis(30_000))
      .with_signal(token.clone());

    let canceller = tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(20)).await;
      token.cancel();
    });

    let err = t
      .execute(t.client().get(server.url("/slow")), &options)
      .await
      .unwrap_err();
    canceller.await.unwrap();
    assert_eq!(err, ApiError::Cancelled);
  }

  #[tokio::test]
  async fn test_unreachable_host_classification() {
    // Bind and drop a listener to get a port nothing is listening on.
    let port = {
      let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
      listener.local_addr().unwrap().port()
    };
    let url = format!("http://127.0.0.1:{}/", port);

    let t = transport();
    let err = t
      .execute(t.client().get(&url), &RequestOptions::default())
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      ApiError::Network {
        reason: NetworkReason::ConnectionFailed,
        ..
      }
    ));

    t.connectivity().set_online(false);
    let err = t
      .execute(t.client().get(&url), &RequestOptions::default())
      .await
      .unwrap_err();
    assert_eq!(err, ApiError::offline());
  }

  #[test]
  fn test_empty_body_decodes_as_null() {
    assert!(decode_body::<()>("").is_ok());
    let value: Option<u32> = decode_body("  ").unwrap();
    assert_eq!(value, None);
  }
}
