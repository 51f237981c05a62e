//! Dashboard client that reads through the query cache.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::cache::{KeyFilter, QueryCache, QueryKey, QueryObserver, QueryResult};
use crate::error::ApiError;

use super::client::DashboardClient;
use super::operation::Operation;
use super::types::{
  AdminUser, BrandSales, CategorySales, CustomerInsights, ExpenseSummary, Goal, GoalInput,
  GrowthMetrics, InventoryAnalysis, InventorySummary, InventoryTrendPoint, NewUser,
  PermissionMatrix, PermissionRule, ProfitAnalysis, RevenuePoint, SeasonalityPoint, SmartGoal,
  SourceSales, Summary, TopProduct,
};

/// Parameter that selects the sales segment of goal queries
const SALES_TYPE: &str = "salesType";

/// Cache key of one read: operation name plus the verbatim parameters.
pub fn query_key(operation: Operation, params: &str) -> QueryKey {
  QueryKey::new(operation.name(), params)
}

/// Typed client with transparent caching.
///
/// Wraps [`DashboardClient`] and provides the same operations. Reads are
/// deduplicated and served from the cache while fresh; mutations are
/// retried under the cache's policy and then invalidate exactly the keys
/// they affect.
#[derive(Clone)]
pub struct CachedDashboardClient {
  inner: DashboardClient,
  cache: QueryCache,
}

impl CachedDashboardClient {
  pub fn new(inner: DashboardClient, cache: QueryCache) -> Self {
    Self { inner, cache }
  }

  pub fn client(&self) -> &DashboardClient {
    &self.inner
  }

  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  /// Read any operation through the cache, keeping the freshness metadata.
  pub async fn read<T>(&self, operation: Operation, params: &str) -> Result<QueryResult<T>, ApiError>
  where
    T: DeserializeOwned + Send + Sync + 'static,
  {
    let inner = self.inner.clone();
    let owned = params.to_string();
    self
      .cache
      .fetch(query_key(operation, params), move || {
        let inner = inner.clone();
        let params = owned.clone();
        async move { inner.get::<T>(operation, &params).await }
      })
      .await
  }

  /// Observe an operation; the observer sees refetches triggered by
  /// invalidation and keeps the entry alive.
  pub fn watch<T>(&self, operation: Operation, params: &str) -> QueryObserver<T>
  where
    T: DeserializeOwned + Send + Sync + 'static,
  {
    let inner = self.inner.clone();
    let owned = params.to_string();
    self.cache.observe(query_key(operation, params), move || {
      let inner = inner.clone();
      let params = owned.clone();
      async move { inner.get::<T>(operation, &params).await }
    })
  }

  async fn data<T>(&self, operation: Operation, params: &str) -> Result<Arc<T>, ApiError>
  where
    T: DeserializeOwned + Send + Sync + 'static,
  {
    Ok(self.read(operation, params).await?.data)
  }

  pub async fn summary(&self, params: &str) -> Result<Arc<Summary>, ApiError> {
    self.data(Operation::Summary, params).await
  }

  pub async fn revenue_trend(&self, params: &str) -> Result<Arc<Vec<RevenuePoint>>, ApiError> {
    self.data(Operation::RevenueTrend, params).await
  }

  pub async fn sales_by_source(&self, params: &str) -> Result<Arc<Vec<SourceSales>>, ApiError> {
    self.data(Operation::SalesBySource, params).await
  }

  pub async fn top_products(&self, params: &str) -> Result<Arc<Vec<TopProduct>>, ApiError> {
    self.data(Operation::TopProducts, params).await
  }

  pub async fn category_breakdown(&self, params: &str) -> Result<Arc<Vec<CategorySales>>, ApiError> {
    self.data(Operation::CategoryBreakdown, params).await
  }

  pub async fn customer_insights(&self, params: &str) -> Result<Arc<CustomerInsights>, ApiError> {
    self.data(Operation::CustomerInsights, params).await
  }

  pub async fn brand_analytics(&self, params: &str) -> Result<Arc<Vec<BrandSales>>, ApiError> {
    self.data(Operation::BrandAnalytics, params).await
  }

  pub async fn expense_summary(&self, params: &str) -> Result<Arc<ExpenseSummary>, ApiError> {
    self.data(Operation::ExpenseSummary, params).await
  }

  pub async fn profit_analysis(&self, params: &str) -> Result<Arc<ProfitAnalysis>, ApiError> {
    self.data(Operation::ProfitAnalysis, params).await
  }

  pub async fn goals(&self, params: &str) -> Result<Arc<Vec<Goal>>, ApiError> {
    self.data(Operation::Goals, params).await
  }

  pub async fn smart_goals(&self, params: &str) -> Result<Arc<Vec<SmartGoal>>, ApiError> {
    self.data(Operation::SmartGoals, params).await
  }

  pub async fn seasonality(&self, params: &str) -> Result<Arc<Vec<SeasonalityPoint>>, ApiError> {
    self.data(Operation::Seasonality, params).await
  }

  pub async fn growth_metrics(&self, params: &str) -> Result<Arc<GrowthMetrics>, ApiError> {
    self.data(Operation::GrowthMetrics, params).await
  }

  pub async fn inventory_summary(&self, params: &str) -> Result<Arc<InventorySummary>, ApiError> {
    self.data(Operation::InventorySummary, params).await
  }

  pub async fn inventory_trend(&self, params: &str) -> Result<Arc<Vec<InventoryTrendPoint>>, ApiError> {
    self.data(Operation::InventoryTrend, params).await
  }

  pub async fn inventory_analysis(&self, params: &str) -> Result<Arc<InventoryAnalysis>, ApiError> {
    self.data(Operation::InventoryAnalysis, params).await
  }

  pub async fn admin_users(&self, params: &str) -> Result<Arc<Vec<AdminUser>>, ApiError> {
    self.data(Operation::AdminUsers, params).await
  }

  pub async fn permissions(&self, params: &str) -> Result<Arc<PermissionMatrix>, ApiError> {
    self.data(Operation::Permissions, params).await
  }

  // ==========================================================================
  // Mutations
  // ==========================================================================

  /// Set a goal; invalidates goals and smart goals of its sales segment.
  pub async fn set_goal(&self, goal: &GoalInput) -> Result<Goal, ApiError> {
    self
      .cache
      .mutate(
        "set-goal",
        || self.inner.set_goal(goal),
        &goal_filters(&goal.sales_type),
      )
      .await
  }

  /// Reset the goal selected by `params`. Without a `salesType` parameter
  /// every goal query is invalidated.
  pub async fn reset_goal(&self, params: &str) -> Result<(), ApiError> {
    let filters = match QueryKey::new(Operation::Goals.name(), params).param(SALES_TYPE) {
      Some(segment) => goal_filters(&segment).to_vec(),
      None => vec![
        KeyFilter::operation(Operation::Goals.name()),
        KeyFilter::operation(Operation::SmartGoals.name()),
      ],
    };
    self
      .cache
      .mutate("reset-goal", || self.inner.reset_goal(params), &filters)
      .await
  }

  pub async fn create_user(&self, user: &NewUser) -> Result<AdminUser, ApiError> {
    self
      .cache
      .mutate("create-user", || self.inner.create_user(user), &[users_filter()])
      .await
  }

  pub async fn update_user_role(&self, user_id: &str, role: &str) -> Result<AdminUser, ApiError> {
    self
      .cache
      .mutate(
        "update-user-role",
        || self.inner.update_user_role(user_id, role),
        &[users_filter()],
      )
      .await
  }

  pub async fn delete_user(&self, user_id: &str) -> Result<(), ApiError> {
    self
      .cache
      .mutate("delete-user", || self.inner.delete_user(user_id), &[users_filter()])
      .await
  }

  pub async fn update_permission(&self, rule: &PermissionRule) -> Result<PermissionRule, ApiError> {
    self
      .cache
      .mutate(
        "update-permission",
        || self.inner.update_permission(rule),
        &[KeyFilter::operation(Operation::Permissions.name())],
      )
      .await
  }
}

fn goal_filters(segment: &str) -> [KeyFilter; 2] {
  [
    KeyFilter::param(Operation::Goals.name(), SALES_TYPE, segment),
    KeyFilter::param(Operation::SmartGoals.name(), SALES_TYPE, segment),
  ]
}

fn users_filter() -> KeyFilter {
  KeyFilter::operation(Operation::AdminUsers.name())
}
