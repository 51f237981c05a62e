//! Cache keys and the filters used to invalidate them.

use std::fmt;

/// Identity of a cached query: the operation name plus its serialized
/// parameter string.
///
/// Parameters are compared verbatim; callers are expected to serialize
/// filter state the same way every time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
  operation: String,
  params: String,
}

impl QueryKey {
  pub fn new(operation: impl Into<String>, params: impl Into<String>) -> Self {
    let params = params.into();
    let params = params.strip_prefix('?').map(String::from).unwrap_or(params);
    Self {
      operation: operation.into(),
      params,
    }
  }

  pub fn operation(&self) -> &str {
    &self.operation
  }

  pub fn params(&self) -> &str {
    &self.params
  }

  /// Look up a single decoded query parameter.
  pub fn param(&self, name: &str) -> Option<String> {
    url::form_urlencoded::parse(self.params.as_bytes())
      .find(|(k, _)| k == name)
      .map(|(_, v)| v.into_owned())
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.params.is_empty() {
      write!(f, "{}", self.operation)
    } else {
      write!(f, "{}?{}", self.operation, self.params)
    }
  }
}

/// Selects the entries an invalidation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFilter {
  /// One exact key
  Exact(QueryKey),
  /// Every key of an operation, whatever its parameters
  Operation(String),
  /// Keys of an operation whose parameter `name` equals `value`
  Param {
    operation: String,
    name: String,
    value: String,
  },
}

impl KeyFilter {
  pub fn operation(operation: impl Into<String>) -> Self {
    KeyFilter::Operation(operation.into())
  }

  pub fn param(
    operation: impl Into<String>,
    name: impl Into<String>,
    value: impl Into<String>,
  ) -> Self {
    KeyFilter::Param {
      operation: operation.into(),
      name: name.into(),
      value: value.into(),
    }
  }

  pub fn matches(&self, key: &QueryKey) -> bool {
    match self {
      KeyFilter::Exact(exact) => exact == key,
      KeyFilter::Operation(operation) => key.operation == *operation,
      KeyFilter::Param {
        operation,
        name,
        value,
      } => key.operation == *operation && key.param(name).as_deref() == Some(value.as_str()),
    }
  }
}

impl From<QueryKey> for KeyFilter {
  fn from(key: QueryKey) -> Self {
    KeyFilter::Exact(key)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_leading_question_mark_is_ignored() {
    assert_eq!(
      QueryKey::new("summary", "?period=week"),
      QueryKey::new("summary", "period=week")
    );
  }

  #[test]
  fn test_param_lookup_decodes() {
    let key = QueryKey::new("goals", "salesType=fbo&period=month&brand=Acme%20Co");
    assert_eq!(key.param("salesType").as_deref(), Some("fbo"));
    assert_eq!(key.param("brand").as_deref(), Some("Acme Co"));
    assert_eq!(key.param("missing"), None);
  }

  #[test]
  fn test_display() {
    assert_eq!(QueryKey::new("summary", "").to_string(), "summary");
    assert_eq!(
      QueryKey::new("summary", "period=week").to_string(),
      "summary?period=week"
    );
  }

  #[test]
  fn test_filters() {
    let goals_fbo = QueryKey::new("goals", "salesType=fbo&period=month");
    let goals_fbs = QueryKey::new("goals", "salesType=fbs&period=month");
    let summary = QueryKey::new("summary", "salesType=fbo");

    let by_op = KeyFilter::operation("goals");
    assert!(by_op.matches(&goals_fbo));
    assert!(by_op.matches(&goals_fbs));
    assert!(!by_op.matches(&summary));

    let by_param = KeyFilter::param("goals", "salesType", "fbo");
    assert!(by_param.matches(&goals_fbo));
    assert!(!by_param.matches(&goals_fbs));
    assert!(!by_param.matches(&summary));

    let exact = KeyFilter::from(goals_fbs.clone());
    assert!(exact.matches(&goals_fbs));
    assert!(!exact.matches(&goals_fbo));
  }
}
