//! Failure taxonomy for the data path.
//!
//! Every failure is classified exactly once, at the transport boundary, into
//! one [`ApiError`] variant. Downstream code (the cache's retry policy, the
//! CLI, observers) matches on the variant or its [`ErrorKind`] and never
//! re-derives the classification.

use std::time::Duration;

/// Coarse discriminant used by the retry policy and by consumers that only
/// care about the failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
  /// 4xx response
  Client,
  /// 5xx response
  Server,
  Network,
  Timeout,
  Parse,
  Cancelled,
  Other,
}

/// Why a request never produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkReason {
  /// The host reported itself offline when the request failed
  Offline,
  ConnectionFailed,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
  #[error("{message} (HTTP {status})")]
  Api {
    kind: ErrorKind,
    status: u16,
    message: String,
  },
  #[error("{}", network_message(*reason, message))]
  Network {
    reason: NetworkReason,
    message: String,
  },
  #[error("request timed out after {}ms", duration.as_millis())]
  Timeout { duration: Duration },
  #[error("failed to decode response: {message}")]
  Parse { message: String },
  #[error("request was cancelled")]
  Cancelled,
  #[error("{message}")]
  Other { message: String },
}

fn network_message(reason: NetworkReason, detail: &str) -> String {
  match reason {
    NetworkReason::Offline => "no network connection".to_string(),
    NetworkReason::ConnectionFailed => format!("could not reach the server: {}", detail),
  }
}

impl ApiError {
  /// Build the error for a non-success HTTP status.
  ///
  /// The message comes from a fixed table so callers can surface it as-is;
  /// unlisted statuses fall back to the raw status text.
  pub fn from_status(status: u16, status_text: &str) -> Self {
    let kind = if status >= 500 {
      ErrorKind::Server
    } else {
      ErrorKind::Client
    };
    let message = match status_message(status) {
      Some(message) => message.to_string(),
      None => format!("Request failed: {} {}", status, status_text).trim_end().to_string(),
    };
    ApiError::Api {
      kind,
      status,
      message,
    }
  }

  pub fn offline() -> Self {
    ApiError::Network {
      reason: NetworkReason::Offline,
      message: String::new(),
    }
  }

  pub fn connection_failed(detail: impl Into<String>) -> Self {
    ApiError::Network {
      reason: NetworkReason::ConnectionFailed,
      message: detail.into(),
    }
  }

  pub fn parse(detail: impl Into<String>) -> Self {
    ApiError::Parse {
      message: detail.into(),
    }
  }

  pub fn other(message: impl Into<String>) -> Self {
    ApiError::Other {
      message: message.into(),
    }
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      ApiError::Api { kind, .. } => *kind,
      ApiError::Network { .. } => ErrorKind::Network,
      ApiError::Timeout { .. } => ErrorKind::Timeout,
      ApiError::Parse { .. } => ErrorKind::Parse,
      ApiError::Cancelled => ErrorKind::Cancelled,
      ApiError::Other { .. } => ErrorKind::Other,
    }
  }

  /// HTTP status, for errors that came from a response.
  pub fn status(&self) -> Option<u16> {
    match self {
      ApiError::Api { status, .. } => Some(*status),
      _ => None,
    }
  }

  /// Only transient failures are worth repeating; a malformed request or an
  /// undecodable body fails the same way every time.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self.kind(),
      ErrorKind::Server | ErrorKind::Network | ErrorKind::Timeout
    )
  }
}

/// Client-visible message for the statuses the backend is known to return.
pub fn status_message(status: u16) -> Option<&'static str> {
  match status {
    400 => Some("Invalid request parameters"),
    401 => Some("Authentication required"),
    403 => Some("Access denied"),
    404 => Some("Requested data not found"),
    429 => Some("Too many requests, please try again later"),
    500 | 502 | 503 => Some("Server is temporarily unavailable"),
    _ => None,
  }
}
