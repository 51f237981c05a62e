use color_eyre::{eyre::eyre, Result};
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::api::operation::Operation;
use crate::api::types::{
  AdminUser, BrandSales, CategorySales, CustomerInsights, ExpenseSummary, Goal, GoalInput,
  GrowthMetrics, InventoryAnalysis, InventorySummary, InventoryTrendPoint, NewUser,
  PermissionMatrix, PermissionRule, ProfitAnalysis, RevenuePoint, SeasonalityPoint, SmartGoal,
  SourceSales, Summary, TopProduct,
};
use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::http::{Connectivity, RequestOptions, Transport};

/// Path of the API root below the configured base URL
const API_ROOT: &str = "api";

/// Typed client for the dashboard API.
///
/// Stateless apart from connection pooling: every call is one exchange on
/// the transport, with no retries. Parameter strings are caller-serialized
/// and sent verbatim as the query.
#[derive(Debug, Clone)]
pub struct DashboardClient {
  transport: Transport,
  api_root: Url,
  token: Option<String>,
  options: RequestOptions,
}

impl DashboardClient {
  pub fn new(config: &ApiConfig, connectivity: Connectivity) -> Result<Self> {
    let base = Url::parse(&config.base_url)
      .map_err(|e| eyre!("Invalid API base URL {}: {}", config.base_url, e))?;
    if base.cannot_be_a_base() {
      return Err(eyre!("Invalid API base URL {}", config.base_url));
    }

    let mut api_root = base;
    api_root
      .path_segments_mut()
      .map_err(|_| eyre!("Invalid API base URL {}", config.base_url))?
      .pop_if_empty()
      .push(API_ROOT);

    let http = reqwest::Client::builder()
      .user_agent(concat!("pulseboard/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      transport: Transport::new(http, config.timeout(), connectivity),
      api_root,
      token: config.token.clone(),
      options: RequestOptions::default(),
    })
  }

  /// A copy of this client whose calls use `options` (timeout,
  /// cancellation token).
  pub fn with_options(&self, options: RequestOptions) -> Self {
    Self {
      options,
      ..self.clone()
    }
  }

  pub fn api_root(&self) -> &Url {
    &self.api_root
  }

  pub fn connectivity(&self) -> &Connectivity {
    self.transport.connectivity()
  }

  fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>, params: &str) -> Result<Url, ApiError> {
    let mut url = self.api_root.clone();
    url
      .path_segments_mut()
      .map_err(|_| ApiError::other(format!("cannot build a request URL from {}", self.api_root)))?
      .extend(segments);
    let params = params.trim_start_matches('?');
    url.set_query((!params.is_empty()).then_some(params));
    Ok(url)
  }

  /// URL of one admin user; the id is percent-encoded as a single segment.
  fn user_url(&self, user_id: &str, suffix: Option<&str>) -> Result<Url, ApiError> {
    let segments = route_segments(Operation::AdminUsers.route())
      .chain(std::iter::once(user_id))
      .chain(suffix);
    self.url(segments, "")
  }

  fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
    let builder = self.transport.client().request(method, url);
    match &self.token {
      Some(token) => builder.bearer_auth(token),
      None => builder,
    }
  }

  /// GET one read operation and decode its payload.
  pub async fn get<T: DeserializeOwned>(&self, operation: Operation, params: &str) -> Result<T, ApiError> {
    let url = self.url(route_segments(operation.route()), params)?;
    let request = self.request(reqwest::Method::GET, url);
    self.transport.execute_json(request, &self.options).await
  }

  async fn send_json<T: DeserializeOwned, B: Serialize>(
    &self,
    method: reqwest::Method,
    url: Url,
    body: &B,
  ) -> Result<T, ApiError> {
    let body = serde_json::to_vec(body)
      .map_err(|e| ApiError::other(format!("failed to encode request body: {}", e)))?;
    let request = self
      .request(method, url)
      .header(CONTENT_TYPE, "application/json")
      .body(body);
    self.transport.execute_json(request, &self.options).await
  }

  async fn delete(&self, url: Url) -> Result<(), ApiError> {
    let request = self.request(reqwest::Method::DELETE, url);
    self.transport.execute(request, &self.options).await?;
    Ok(())
  }

  // ==========================================================================
  // Reads
  // ==========================================================================

  pub async fn summary(&self, params: &str) -> Result<Summary, ApiError> {
    self.get(Operation::Summary, params).await
  }

  pub async fn revenue_trend(&self, params: &str) -> Result<Vec<RevenuePoint>, ApiError> {
    self.get(Operation::RevenueTrend, params).await
  }

  pub async fn sales_by_source(&self, params: &str) -> Result<Vec<SourceSales>, ApiError> {
    self.get(Operation::SalesBySource, params).await
  }

  pub async fn top_products(&self, params: &str) -> Result<Vec<TopProduct>, ApiError> {
    self.get(Operation::TopProducts, params).await
  }

  pub async fn category_breakdown(&self, params: &str) -> Result<Vec<CategorySales>, ApiError> {
    self.get(Operation::CategoryBreakdown, params).await
  }

  pub async fn customer_insights(&self, params: &str) -> Result<CustomerInsights, ApiError> {
    self.get(Operation::CustomerInsights, params).await
  }

  pub async fn brand_analytics(&self, params: &str) -> Result<Vec<BrandSales>, ApiError> {
    self.get(Operation::BrandAnalytics, params).await
  }

  pub async fn expense_summary(&self, params: &str) -> Result<ExpenseSummary, ApiError> {
    self.get(Operation::ExpenseSummary, params).await
  }

  pub async fn profit_analysis(&self, params: &str) -> Result<ProfitAnalysis, ApiError> {
    self.get(Operation::ProfitAnalysis, params).await
  }

  pub async fn goals(&self, params: &str) -> Result<Vec<Goal>, ApiError> {
    self.get(Operation::Goals, params).await
  }

  pub async fn smart_goals(&self, params: &str) -> Result<Vec<SmartGoal>, ApiError> {
    self.get(Operation::SmartGoals, params).await
  }

  pub async fn seasonality(&self, params: &str) -> Result<Vec<SeasonalityPoint>, ApiError> {
    self.get(Operation::Seasonality, params).await
  }

  pub async fn growth_metrics(&self, params: &str) -> Result<GrowthMetrics, ApiError> {
    self.get(Operation::GrowthMetrics, params).await
  }

  pub async fn inventory_summary(&self, params: &str) -> Result<InventorySummary, ApiError> {
    self.get(Operation::InventorySummary, params).await
  }

  pub async fn inventory_trend(&self, params: &str) -> Result<Vec<InventoryTrendPoint>, ApiError> {
    self.get(Operation::InventoryTrend, params).await
  }

  pub async fn inventory_analysis(&self, params: &str) -> Result<InventoryAnalysis, ApiError> {
    self.get(Operation::InventoryAnalysis, params).await
  }

  pub async fn admin_users(&self, params: &str) -> Result<Vec<AdminUser>, ApiError> {
    self.get(Operation::AdminUsers, params).await
  }

  pub async fn permissions(&self, params: &str) -> Result<PermissionMatrix, ApiError> {
    self.get(Operation::Permissions, params).await
  }

  // ==========================================================================
  // Mutations
  // ==========================================================================

  pub async fn set_goal(&self, goal: &GoalInput) -> Result<Goal, ApiError> {
    let url = self.url(route_segments(Operation::Goals.route()), "")?;
    self.send_json(reqwest::Method::POST, url, goal).await
  }

  /// Remove the goal selected by `params` (sales type and period).
  pub async fn reset_goal(&self, params: &str) -> Result<(), ApiError> {
    let url = self.url(route_segments(Operation::Goals.route()), params)?;
    self.delete(url).await
  }

  pub async fn create_user(&self, user: &NewUser) -> Result<AdminUser, ApiError> {
    let url = self.url(route_segments(Operation::AdminUsers.route()), "")?;
    self.send_json(reqwest::Method::POST, url, user).await
  }

  pub async fn update_user_role(&self, user_id: &str, role: &str) -> Result<AdminUser, ApiError> {
    let url = self.user_url(user_id, Some("role"))?;
    let body = serde_json::json!({ "role": role });
    self.send_json(reqwest::Method::POST, url, &body).await
  }

  pub async fn delete_user(&self, user_id: &str) -> Result<(), ApiError> {
    let url = self.user_url(user_id, None)?;
    self.delete(url).await
  }

  pub async fn update_permission(&self, rule: &PermissionRule) -> Result<PermissionRule, ApiError> {
    let url = self.url(route_segments(Operation::Permissions.route()), "")?;
    self.send_json(reqwest::Method::POST, url, rule).await
  }
}

fn route_segments(route: &str) -> impl Iterator<Item = &str> {
  route.split('/').filter(|s| !s.is_empty())
}
