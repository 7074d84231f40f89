//! Mercado Pago Gateway Client
//!
//! Read access to payments (by id, by external reference) plus the two write
//! calls the site needs: checkout preferences and direct card payments.
//! Every call is a single attempt; errors go straight back to the caller.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{PaymentError, Result};
use crate::order::{PaymentStatus, id_string};

/// Gateway configuration
#[derive(Clone, Debug)]
pub struct MercadoPagoConfig {
    pub access_token: String,

    /// Shared secret for notification signatures
    pub webhook_secret: Option<String>,

    pub api_base: String,

    /// Currency for checkout items
    pub currency: String,

    /// Where the gateway should deliver notifications, if not set in its dashboard
    pub notification_url: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for MercadoPagoConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            webhook_secret: None,
            api_base: "https://api.mercadopago.com".into(),
            currency: "ARS".into(),
            notification_url: None,
            timeout_secs: 30,
        }
    }
}

impl MercadoPagoConfig {
    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let access_token = std::env::var("MP_ACCESS_TOKEN")
            .or_else(|_| std::env::var("VITE_MP_ACCESS_TOKEN"))
            .map_err(|_| PaymentError::Config("MP_ACCESS_TOKEN not set".into()))?;
        if access_token.trim().is_empty() {
            return Err(PaymentError::Config("MP_ACCESS_TOKEN is empty".into()));
        }

        let defaults = Self::default();
        Ok(Self {
            access_token: access_token.trim().to_string(),
            webhook_secret: non_empty_env("MP_WEBHOOK_SECRET"),
            api_base: non_empty_env("MP_API_BASE").unwrap_or(defaults.api_base),
            currency: non_empty_env("MP_CURRENCY").unwrap_or(defaults.currency),
            notification_url: non_empty_env("MP_NOTIFICATION_URL"),
            timeout_secs: non_empty_env("MP_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.timeout_secs),
        })
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// A payment as the gateway reports it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayPayment {
    #[serde(deserialize_with = "id_string::deserialize")]
    pub id: String,

    #[serde(default)]
    pub status: PaymentStatus,

    #[serde(default)]
    pub status_detail: Option<String>,

    #[serde(default)]
    pub date_approved: Option<String>,

    #[serde(default)]
    pub external_reference: Option<String>,
}

/// Checkout preference body
#[derive(Clone, Debug, Serialize)]
pub struct Preference {
    pub items: Vec<PreferenceItem>,
    pub back_urls: BackUrls,
    pub auto_return: String,
    pub external_reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_url: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PreferenceItem {
    pub id: String,
    pub title: String,
    pub quantity: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub unit_price: Decimal,
    pub currency_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BackUrls {
    pub success: String,
    pub failure: String,
    pub pending: String,
}

/// Gateway answer to a preference creation
#[derive(Clone, Debug, Deserialize)]
pub struct CreatedPreference {
    pub id: String,
    pub init_point: String,
    #[serde(default)]
    pub sandbox_init_point: Option<String>,
}

/// Gateway operations the reconciliation protocol depends on
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Canonical status of one payment
    async fn get_payment(&self, id: &str) -> Result<GatewayPayment>;

    /// Most recent payment tagged with `external_reference`
    async fn search_by_external_reference(&self, external_reference: &str)
    -> Result<GatewayPayment>;

    async fn create_preference(&self, preference: &Preference) -> Result<CreatedPreference>;

    /// Direct payment creation, body passed through verbatim
    async fn create_payment(&self, body: &serde_json::Value) -> Result<serde_json::Value>;
}

/// REST client for the Mercado Pago API
pub struct MercadoPagoClient {
    client: Client,
    config: MercadoPagoConfig,
}

impl MercadoPagoClient {
    pub fn new(config: MercadoPagoConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PaymentError::Config(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(MercadoPagoConfig::from_env()?)
    }

    pub fn config(&self) -> &MercadoPagoConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// `/v1/payments/{id}`, with `id` restricted to one plain path segment
    fn payment_url(&self, id: &str) -> Result<Url> {
        let plain = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !plain {
            return Err(PaymentError::Validation(format!("invalid payment id: {id:?}")));
        }

        let mut url = Url::parse(&self.url("/v1/payments"))
            .map_err(|e| PaymentError::Config(format!("invalid MP_API_BASE: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| PaymentError::Config("MP_API_BASE cannot hold a path".into()))?
            .push(id);
        Ok(url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.config.access_token)
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        what: &str,
    ) -> Result<T> {
        let response = self.authorized(builder).send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiError>(&body)
            .map(|e| e.message)
            .unwrap_or(body);

        if status == StatusCode::NOT_FOUND {
            return Err(PaymentError::NotFound(format!("{what}: {message}")));
        }

        tracing::warn!(status = %status, error = %message, what, "Mercado Pago request failed");
        Err(PaymentError::Upstream {
            status: Some(status.as_u16()),
            message,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct SearchResults {
    #[serde(default)]
    results: Vec<GatewayPayment>,
}

#[async_trait]
impl PaymentGateway for MercadoPagoClient {
    async fn get_payment(&self, id: &str) -> Result<GatewayPayment> {
        let request = self.client.get(self.payment_url(id)?);
        self.send(request, &format!("payment {id}")).await
    }

    async fn search_by_external_reference(
        &self,
        external_reference: &str,
    ) -> Result<GatewayPayment> {
        let request = self.client.get(self.url("/v1/payments/search")).query(&[
            ("external_reference", external_reference),
            ("sort", "date_created"),
            ("criteria", "desc"),
            ("limit", "1"),
        ]);

        let found: SearchResults = self
            .send(request, &format!("payments for {external_reference}"))
            .await?;

        found.results.into_iter().next().ok_or_else(|| {
            PaymentError::NotFound(format!("no payments for {external_reference}"))
        })
    }

    async fn create_preference(&self, preference: &Preference) -> Result<CreatedPreference> {
        let request = self
            .client
            .post(self.url("/checkout/preferences"))
            .json(preference);
        self.send(request, "preference").await
    }

    async fn create_payment(&self, body: &serde_json::Value) -> Result<serde_json::Value> {
        let request = self
            .client
            .post(self.url("/v1/payments"))
            .header("X-Idempotency-Key", uuid::Uuid::new_v4().to_string())
            .json(body);
        self.send(request, "payment").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_payment_parsing() {
        let body = r#"{
            "id": 1319876543,
            "status": "approved",
            "status_detail": "accredited",
            "date_approved": "2026-01-10T12:00:00.000-04:00",
            "external_reference": "5f1c2d9e-0000-4000-8000-000000000000",
            "transaction_amount": 15000
        }"#;
        let payment: GatewayPayment = serde_json::from_str(body).unwrap();
        assert_eq!(payment.id, "1319876543");
        assert_eq!(payment.status, PaymentStatus::Approved);
        assert_eq!(payment.status_detail.as_deref(), Some("accredited"));
    }

    #[test]
    fn test_search_results_parsing() {
        let empty: SearchResults = serde_json::from_str(r#"{"paging":{"total":0},"results":[]}"#).unwrap();
        assert!(empty.results.is_empty());

        let one: SearchResults =
            serde_json::from_str(r#"{"results":[{"id":"7","status":"in_process"}]}"#).unwrap();
        assert_eq!(one.results[0].status, PaymentStatus::InProcess);
    }

    #[test]
    fn test_preference_serialization() {
        let preference = Preference {
            items: vec![PreferenceItem {
                id: "curso-seo".into(),
                title: "SEO".into(),
                quantity: 1,
                unit_price: dec!(15000.50),
                currency_id: "ARS".into(),
            }],
            back_urls: BackUrls {
                success: "https://flip.example/#/mp-callback".into(),
                failure: "https://flip.example/#/checkout".into(),
                pending: "https://flip.example/#/mp-callback".into(),
            },
            auto_return: "approved".into(),
            external_reference: "ref".into(),
            notification_url: None,
        };
        let json = serde_json::to_value(&preference).unwrap();
        assert_eq!(json["items"][0]["unit_price"], 15000.5);
        assert_eq!(json["auto_return"], "approved");
        assert!(json.get("notification_url").is_none());
    }

    #[test]
    fn test_config_defaults() {
        let config = MercadoPagoConfig::default();
        assert_eq!(config.api_base, "https://api.mercadopago.com");
        assert_eq!(config.currency, "ARS");
        let client = MercadoPagoClient::new(config).unwrap();
        assert_eq!(client.url("/v1/payments/1"), "https://api.mercadopago.com/v1/payments/1");
    }

    #[test]
    fn test_payment_url_stays_under_payments() {
        let client = MercadoPagoClient::new(MercadoPagoConfig::default()).unwrap();

        let url = client.payment_url("1234567890").unwrap();
        assert_eq!(url.as_str(), "https://api.mercadopago.com/v1/payments/1234567890");

        for id in [
            "../../checkout/preferences/123",
            "..",
            "1/refunds",
            "1?x=y",
            "1#frag",
            "%2e%2e",
            "",
        ] {
            let err = client.payment_url(id).unwrap_err();
            assert!(matches!(err, PaymentError::Validation(_)), "accepted {id:?}");
        }
    }

    #[tokio::test]
    async fn test_traversal_id_never_sent() {
        let config = MercadoPagoConfig {
            api_base: "http://127.0.0.1:9".into(),
            ..MercadoPagoConfig::default()
        };
        let client = MercadoPagoClient::new(config).unwrap();

        let err = client
            .get_payment("../../checkout/preferences/123")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
