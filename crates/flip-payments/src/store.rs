//! Order Store
//!
//! One `orders` row per checkout attempt, keyed by external reference.
//! Status writes are rank-guarded: an update that would move an order to a
//! lower-ranked status (e.g. a late `pending` after `approved`) is skipped.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::{PaymentError, Result};
use crate::gateway::non_empty_env;
use crate::order::{Order, PaymentStatus};

/// Result of a guarded status write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The stored status outranks the update
    Skipped,
}

/// Order persistence
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Short name for health output
    fn kind(&self) -> &'static str;

    async fn find_by_external_reference(&self, external_reference: &str) -> Result<Option<Order>>;

    /// Record a new pending order; existing rows are left alone
    async fn create_pending(&self, external_reference: &str) -> Result<()>;

    /// Set status and payment id, inserting the row if it does not exist
    async fn upsert_status(
        &self,
        external_reference: &str,
        status: &PaymentStatus,
        payment_id: &str,
    ) -> Result<WriteOutcome>;
}

/// In-memory order store (for development and tests)
#[derive(Default)]
pub struct MemoryOrderStore {
    orders: RwLock<HashMap<String, Order>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite a row without the rank guard
    pub async fn insert(&self, order: Order) {
        self.orders
            .write()
            .await
            .insert(order.external_reference.clone(), order);
    }

    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.read().await.is_empty()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn find_by_external_reference(&self, external_reference: &str) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(external_reference).cloned())
    }

    async fn create_pending(&self, external_reference: &str) -> Result<()> {
        self.orders
            .write()
            .await
            .entry(external_reference.to_string())
            .or_insert_with(|| Order::pending(external_reference));
        Ok(())
    }

    async fn upsert_status(
        &self,
        external_reference: &str,
        status: &PaymentStatus,
        payment_id: &str,
    ) -> Result<WriteOutcome> {
        let mut orders = self.orders.write().await;
        let order = orders
            .entry(external_reference.to_string())
            .or_insert_with(|| Order::pending(external_reference));

        if !order.status.may_transition_to(status) {
            return Ok(WriteOutcome::Skipped);
        }

        order.status = status.clone();
        order.payment_id = Some(payment_id.to_string());
        order.updated_at = Some(Utc::now());
        Ok(WriteOutcome::Applied)
    }
}

/// Hosted database configuration
#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`
    pub url: String,

    /// Service role key (bypasses row level security)
    pub service_key: String,

    pub table: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl SupabaseConfig {
    pub fn new(url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            service_key: service_key.into(),
            table: "orders".into(),
            timeout_secs: 15,
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let url = non_empty_env("SUPABASE_URL")
            .or_else(|| non_empty_env("VITE_SUPABASE_URL"))
            .ok_or_else(|| PaymentError::Config("SUPABASE_URL not set".into()))?;

        let service_key = match non_empty_env("SUPABASE_SERVICE_ROLE_KEY") {
            Some(key) => key,
            None => {
                let key = non_empty_env("VITE_SUPABASE_PUBLISHABLE_DEFAULT_KEY").ok_or_else(|| {
                    PaymentError::Config("SUPABASE_SERVICE_ROLE_KEY not set".into())
                })?;
                tracing::warn!("Using the publishable Supabase key; order updates may be blocked by row level security");
                key
            }
        };

        let mut config = Self::new(url, service_key);
        if let Some(table) = non_empty_env("SUPABASE_ORDERS_TABLE") {
            config.table = table;
        }
        Ok(config)
    }
}

/// PostgREST-backed order store
pub struct SupabaseOrderStore {
    client: Client,
    config: SupabaseConfig,
}

#[derive(Serialize)]
struct StatusPatch<'a> {
    status: &'a PaymentStatus,
    payment_id: &'a str,
    updated_at: chrono::DateTime<Utc>,
}

#[derive(Serialize)]
struct NewRow<'a> {
    external_reference: &'a str,
    status: &'a PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    payment_id: Option<&'a str>,
    updated_at: chrono::DateTime<Utc>,
}

const COLUMNS: &str = "external_reference,status,payment_id,updated_at";

impl SupabaseOrderStore {
    pub fn new(config: SupabaseConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PaymentError::Config(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(SupabaseConfig::from_env()?)
    }

    fn table_url(&self) -> String {
        format!(
            "{}/rest/v1/{}",
            self.config.url.trim_end_matches('/'),
            self.config.table
        )
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.config.service_key)
            .bearer_auth(&self.config.service_key)
    }

    async fn rows(&self, builder: RequestBuilder) -> Result<Vec<Order>> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|e| PaymentError::Store(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Store(format!("HTTP {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| PaymentError::Store(e.to_string()))
    }

    /// Insert unless the key already exists; returns the inserted rows
    async fn insert_if_absent(&self, row: &NewRow<'_>) -> Result<Vec<Order>> {
        let request = self
            .client
            .post(self.table_url())
            .query(&[("on_conflict", "external_reference"), ("select", COLUMNS)])
            .header("Prefer", "resolution=ignore-duplicates,return=representation")
            .json(&[row]);
        self.rows(request).await
    }
}

/// PostgREST filter admitting rows the update may overwrite: anything not
/// strictly outranking `status` (including unknown and NULL statuses).
fn rank_filter(status: &PaymentStatus) -> Option<String> {
    let higher: Vec<&str> = PaymentStatus::KNOWN
        .iter()
        .filter(|s| s.rank() > status.rank())
        .map(PaymentStatus::as_str)
        .collect();

    (!higher.is_empty()).then(|| format!("(status.is.null,status.not.in.({}))", higher.join(",")))
}

#[async_trait]
impl OrderStore for SupabaseOrderStore {
    fn kind(&self) -> &'static str {
        "supabase"
    }

    async fn find_by_external_reference(&self, external_reference: &str) -> Result<Option<Order>> {
        let request = self.client.get(self.table_url()).query(&[
            ("external_reference", format!("eq.{external_reference}").as_str()),
            ("select", COLUMNS),
            ("limit", "1"),
        ]);
        Ok(self.rows(request).await?.into_iter().next())
    }

    async fn create_pending(&self, external_reference: &str) -> Result<()> {
        let row = NewRow {
            external_reference,
            status: &PaymentStatus::Pending,
            payment_id: None,
            updated_at: Utc::now(),
        };
        self.insert_if_absent(&row).await?;
        Ok(())
    }

    async fn upsert_status(
        &self,
        external_reference: &str,
        status: &PaymentStatus,
        payment_id: &str,
    ) -> Result<WriteOutcome> {
        let now = Utc::now();
        let mut query = vec![
            ("external_reference".to_string(), format!("eq.{external_reference}")),
            ("select".to_string(), COLUMNS.to_string()),
        ];
        if let Some(filter) = rank_filter(status) {
            query.push(("or".to_string(), filter));
        }

        let request = self
            .client
            .patch(self.table_url())
            .query(&query)
            .header("Prefer", "return=representation")
            .json(&StatusPatch {
                status,
                payment_id,
                updated_at: now,
            });

        if !self.rows(request).await?.is_empty() {
            return Ok(WriteOutcome::Applied);
        }

        // Either the row is missing or it outranks this update
        let inserted = self
            .insert_if_absent(&NewRow {
                external_reference,
                status,
                payment_id: Some(payment_id),
                updated_at: now,
            })
            .await?;

        Ok(if inserted.is_empty() {
            WriteOutcome::Skipped
        } else {
            WriteOutcome::Applied
        })
    }
}
