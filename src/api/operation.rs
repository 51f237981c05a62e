use std::fmt;
use std::str::FromStr;

/// Read operations exposed by the dashboard backend.
///
/// The name doubles as the cache key's operation component, so the
/// real-time layer can invalidate by operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
  Summary,
  RevenueTrend,
  SalesBySource,
  TopProducts,
  CategoryBreakdown,
  CustomerInsights,
  BrandAnalytics,
  ExpenseSummary,
  ProfitAnalysis,
  Goals,
  SmartGoals,
  Seasonality,
  GrowthMetrics,
  InventorySummary,
  InventoryTrend,
  InventoryAnalysis,
  AdminUsers,
  Permissions,
}

impl Operation {
  pub const ALL: [Operation; 18] = [
    Operation::Summary,
    Operation::RevenueTrend,
    Operation::SalesBySource,
    Operation::TopProducts,
    Operation::CategoryBreakdown,
    Operation::CustomerInsights,
    Operation::BrandAnalytics,
    Operation::ExpenseSummary,
    Operation::ProfitAnalysis,
    Operation::Goals,
    Operation::SmartGoals,
    Operation::Seasonality,
    Operation::GrowthMetrics,
    Operation::InventorySummary,
    Operation::InventoryTrend,
    Operation::InventoryAnalysis,
    Operation::AdminUsers,
    Operation::Permissions,
  ];

  pub fn name(self) -> &'static str {
    match self {
      Operation::Summary => "summary",
      Operation::RevenueTrend => "revenue-trend",
      Operation::SalesBySource => "sales-by-source",
      Operation::TopProducts => "top-products",
      Operation::CategoryBreakdown => "category-breakdown",
      Operation::CustomerInsights => "customer-insights",
      Operation::BrandAnalytics => "brand-analytics",
      Operation::ExpenseSummary => "expense-summary",
      Operation::ProfitAnalysis => "profit-analysis",
      Operation::Goals => "goals",
      Operation::SmartGoals => "smart-goals",
      Operation::Seasonality => "seasonality",
      Operation::GrowthMetrics => "growth-metrics",
      Operation::InventorySummary => "inventory-summary",
      Operation::InventoryTrend => "inventory-trend",
      Operation::InventoryAnalysis => "inventory-analysis",
      Operation::AdminUsers => "admin-users",
      Operation::Permissions => "permissions",
    }
  }

  /// Path below the API root.
  pub fn route(self) -> &'static str {
    match self {
      Operation::Summary => "/summary",
      Operation::RevenueTrend => "/revenue-trend",
      Operation::SalesBySource => "/sales-by-source",
      Operation::TopProducts => "/top-products",
      Operation::CategoryBreakdown => "/category-breakdown",
      Operation::CustomerInsights => "/customer-insights",
      Operation::BrandAnalytics => "/brand-analytics",
      Operation::ExpenseSummary => "/expenses/summary",
      Operation::ProfitAnalysis => "/profit-analysis",
      Operation::Goals => "/goals",
      Operation::SmartGoals => "/goals/smart",
      Operation::Seasonality => "/seasonality",
      Operation::GrowthMetrics => "/growth-metrics",
      Operation::InventorySummary => "/stock/summary",
      Operation::InventoryTrend => "/stock/trend",
      Operation::InventoryAnalysis => "/stock/analysis",
      Operation::AdminUsers => "/admin/users",
      Operation::Permissions => "/admin/permissions",
    }
  }
}

impl fmt::Display for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for Operation {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Operation::ALL
      .into_iter()
      .find(|op| op.name() == s)
      .ok_or_else(|| {
        let known: Vec<&str> = Operation::ALL.iter().map(|op| op.name()).collect();
        format!("unknown operation '{}' (expected one of: {})", s, known.join(", "))
      })
  }
}
