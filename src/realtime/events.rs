use serde::Deserialize;
use serde_json::Value;

use crate::api::Operation;

/// Inbound frame of the real-time channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventEnvelope {
  pub event: String,
  #[serde(default)]
  pub data: Value,
  /// Kept as sent; servers are not consistent about the format.
  #[serde(default)]
  pub timestamp: String,
}

impl EventEnvelope {
  pub fn parse(frame: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(frame)
  }

  pub fn kind(&self) -> EventKind {
    EventKind::from_name(&self.event)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
  OrdersSynced,
  InventoryUpdated,
  GoalProgress,
  Milestone,
  Connected,
  Pong,
  Unknown(String),
}

impl EventKind {
  pub fn from_name(name: &str) -> Self {
    match name {
      "orders_synced" => EventKind::OrdersSynced,
      "inventory_updated" => EventKind::InventoryUpdated,
      "goal_progress" => EventKind::GoalProgress,
      "milestone" => EventKind::Milestone,
      "connected" => EventKind::Connected,
      "pong" => EventKind::Pong,
      other => EventKind::Unknown(other.to_string()),
    }
  }

  /// Operations whose cached entries this event makes out of date.
  pub fn invalidates(&self) -> &'static [Operation] {
    match self {
      EventKind::OrdersSynced => &[
        Operation::Summary,
        Operation::RevenueTrend,
        Operation::SalesBySource,
      ],
      EventKind::InventoryUpdated => &[
        Operation::InventorySummary,
        Operation::InventoryTrend,
        Operation::InventoryAnalysis,
      ],
      EventKind::GoalProgress => &[Operation::Goals, Operation::SmartGoals],
      _ => &[],
    }
  }
}

/// Notification broadcast for a `milestone` event.
#[derive(Debug, Clone, PartialEq)]
pub struct Milestone {
  pub data: Value,
  pub timestamp: String,
}

impl Milestone {
  pub fn message(&self) -> Option<&str> {
    self.data.get("message").and_then(Value::as_str)
  }
}

impl From<EventEnvelope> for Milestone {
  fn from(envelope: EventEnvelope) -> Self {
    Self {
      data: envelope.data,
      timestamp: envelope.timestamp,
    }
  }
}
