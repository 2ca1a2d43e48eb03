use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use url::Url;

use super::config::SupabaseConfig;
use crate::engine::fetcher::{FetcherRegistry, ResourceFetcher};
use crate::engine::types::{FetchFilter, ResourceType, Row};
use crate::error::AppError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Optional PostgREST modifiers for a table read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// `column.asc` / `column.desc`.
    pub order: Option<String>,
    pub limit: Option<u32>,
}

/// Render one scalar for a PostgREST filter value.
fn filter_literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Quote list members that contain PostgREST reserved characters.
fn list_literal(value: &Value) -> String {
    let raw = filter_literal(value);
    if raw.is_empty() || raw.contains([',', '(', ')', '"', ':', ' ', '\\']) {
        format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        raw
    }
}

// ============================================================================
// SupabaseClient
// ============================================================================

/// Thin PostgREST reader for the dashboard tables.
pub struct SupabaseClient {
    http: reqwest::Client,
    config: SupabaseConfig,
}

impl SupabaseClient {
    pub fn new(config: SupabaseConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> Result<Self, AppError> {
        Self::new(SupabaseConfig::from_env()?)
    }

    pub fn config(&self) -> &SupabaseConfig {
        &self.config
    }

    /// `GET {url}/rest/v1/{table}?select=*&...` for the given filter.
    pub fn table_url(
        &self,
        table: &str,
        filter: &FetchFilter,
        options: &QueryOptions,
    ) -> Result<Url, AppError> {
        let mut url = Url::parse(&format!("{}/rest/v1/{}", self.config.url, table))
            .map_err(|e| AppError::Config(format!("invalid Supabase URL: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("select", "*");
            for (field, values) in filter.fields() {
                let operand = match values {
                    [single] => format!("eq.{}", filter_literal(single)),
                    many => format!(
                        "in.({})",
                        many.iter().map(list_literal).collect::<Vec<_>>().join(",")
                    ),
                };
                query.append_pair(field, &operand);
            }
            if let Some(order) = &options.order {
                query.append_pair("order", order);
            }
            if let Some(limit) = options.limit {
                query.append_pair("limit", &limit.to_string());
            }
        }
        Ok(url)
    }

    fn authed(&self, url: Url) -> reqwest::RequestBuilder {
        self.http
            .get(url)
            .header("apikey", &self.config.anon_key)
            .bearer_auth(self.config.bearer())
    }

    /// Read every row of `table` admitted by `filter`.
    pub async fn select(
        &self,
        table: &str,
        filter: &FetchFilter,
        options: &QueryOptions,
    ) -> Result<Vec<Row>, AppError> {
        let url = self.table_url(table, filter, options)?;
        let body: Value = self
            .authed(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Value::Array(items) = body else {
            return Err(AppError::Fetch(format!("{table}: expected a JSON array of rows")));
        };
        items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                _ => Err(AppError::Fetch(format!("{table}: row is not a JSON object"))),
            })
            .collect()
    }

    /// A fetcher registry serving every resource type from its table.
    pub fn registry(self: &Arc<Self>) -> FetcherRegistry {
        ResourceType::ALL
            .into_iter()
            .fold(FetcherRegistry::new(), |registry, rt| {
                registry.with(rt, Arc::new(TableFetcher::new(self.clone(), rt)))
            })
    }
}

// ============================================================================
// TableFetcher
// ============================================================================

pub struct TableFetcher {
    client: Arc<SupabaseClient>,
    resource_type: ResourceType,
    options: QueryOptions,
}

impl TableFetcher {
    pub fn new(client: Arc<SupabaseClient>, resource_type: ResourceType) -> Self {
        Self {
            client,
            resource_type,
            options: QueryOptions::default(),
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait::async_trait]
impl ResourceFetcher for TableFetcher {
    async fn fetch(&self, filter: &FetchFilter) -> Result<Vec<Row>, AppError> {
        self.client
            .select(self.resource_type.table_name(), filter, &self.options)
            .await
    }
}
