//! Response and request bodies of the dashboard API.
//!
//! Field names follow the backend's camelCase JSON. Optional breakdowns
//! default to empty so older backends still decode.

use serde::{Deserialize, Serialize};

// ============================================================================
// Sales
// ============================================================================

/// Headline numbers for the selected period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
  pub total_orders: u64,
  pub total_revenue: f64,
  pub avg_check: f64,
  pub total_returns: u64,
  pub return_rate: f64,
  pub start_date: String,
  pub end_date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenuePoint {
  pub date: String,
  pub revenue: f64,
  pub orders: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSales {
  pub source: String,
  pub orders: u64,
  pub revenue: f64,
  #[serde(default)]
  pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopProduct {
  pub sku: String,
  pub name: String,
  pub quantity: u64,
  pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySales {
  pub category: String,
  pub orders: u64,
  pub revenue: f64,
  #[serde(default)]
  pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandSales {
  pub brand: String,
  pub orders: u64,
  pub revenue: f64,
  #[serde(default)]
  pub avg_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInsights {
  pub total_customers: u64,
  pub new_customers: u64,
  pub returning_customers: u64,
  pub repeat_rate: f64,
  #[serde(default)]
  pub avg_lifetime_value: f64,
}

// ============================================================================
// Finance
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseSummary {
  pub total_expenses: f64,
  #[serde(default)]
  pub advertising: f64,
  #[serde(default)]
  pub logistics: f64,
  #[serde(default)]
  pub commissions: f64,
  #[serde(default)]
  pub other: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfitAnalysis {
  pub revenue: f64,
  pub cost_of_goods: f64,
  pub expenses: f64,
  pub gross_profit: f64,
  pub net_profit: f64,
}

impl ProfitAnalysis {
  /// Net profit after the user's own extra expenses, which the backend
  /// does not know about.
  pub fn net_profit_after(&self, custom_expenses: f64) -> f64 {
    self.net_profit - custom_expenses
  }

  /// Net margin in percent after custom expenses; zero without revenue.
  pub fn margin_after(&self, custom_expenses: f64) -> f64 {
    if self.revenue == 0.0 {
      0.0
    } else {
      self.net_profit_after(custom_expenses) / self.revenue * 100.0
    }
  }
}

// ============================================================================
// Goals and trends
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
  pub sales_type: String,
  pub period: String,
  pub target_revenue: f64,
  #[serde(default)]
  pub target_orders: Option<u64>,
  #[serde(default)]
  pub current_revenue: f64,
  #[serde(default)]
  pub progress: f64,
}

/// Body of the set-goal mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalInput {
  pub sales_type: String,
  pub period: String,
  pub target_revenue: f64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub target_orders: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartGoal {
  pub sales_type: String,
  pub period: String,
  pub suggested_revenue: f64,
  #[serde(default)]
  pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonalityPoint {
  pub month: u32,
  pub index: f64,
  #[serde(default)]
  pub avg_revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrowthMetrics {
  pub revenue_growth: f64,
  pub orders_growth: f64,
  #[serde(default)]
  pub customers_growth: f64,
}

// ============================================================================
// Inventory
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventorySummary {
  pub total_skus: u64,
  pub total_units: u64,
  pub stock_value: f64,
  #[serde(default)]
  pub low_stock: u64,
  #[serde(default)]
  pub out_of_stock: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryTrendPoint {
  pub date: String,
  pub units: u64,
  pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
  pub sku: String,
  pub name: String,
  pub units: u64,
  #[serde(default)]
  pub days_of_supply: Option<f64>,
  #[serde(default)]
  pub turnover: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryAnalysis {
  #[serde(default)]
  pub items: Vec<InventoryItem>,
}

// ============================================================================
// Admin
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUser {
  pub id: String,
  pub email: String,
  #[serde(default)]
  pub name: Option<String>,
  pub role: String,
  #[serde(default = "default_active")]
  pub active: bool,
}

fn default_active() -> bool {
  true
}

/// Body of the create-user mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
  pub email: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRule {
  pub role: String,
  pub permission: String,
  pub allowed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionMatrix {
  #[serde(default)]
  pub roles: Vec<String>,
  #[serde(default)]
  pub permissions: Vec<String>,
  #[serde(default)]
  pub rules: Vec<PermissionRule>,
}

impl PermissionMatrix {
  pub fn is_allowed(&self, role: &str, permission: &str) -> bool {
    self
      .rules
      .iter()
      .any(|r| r.role == role && r.permission == permission && r.allowed)
  }
}
