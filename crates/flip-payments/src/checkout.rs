//! Checkout Preference Creation
//!
//! Turns a cart into a hosted-checkout preference and records a pending order
//! under a fresh external reference.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{PaymentError, Result};
use crate::gateway::{BackUrls, PaymentGateway, Preference, PreferenceItem};
use crate::store::OrderStore;

/// One cart line as sent by the storefront
#[derive(Clone, Debug, Deserialize)]
pub struct CheckoutItem {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub title: String,

    #[serde(default = "one", deserialize_with = "lenient_quantity")]
    pub quantity: i64,

    /// Unit price; the storefront sends numbers or numeric strings
    #[serde(deserialize_with = "lenient_decimal", alias = "unit_price")]
    pub price: Decimal,
}

const fn one() -> i64 {
    1
}

fn lenient_decimal<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Decimal, D::Error> {
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Number(n) => n.to_string().parse().map_err(D::Error::custom),
        Value::String(s) => s.trim().parse().map_err(D::Error::custom),
        other => Err(D::Error::custom(format!("invalid price: {other}"))),
    }
}

/// Whole quantities sent as numbers (`2`, `2.0`) or numeric strings (`"2"`)
fn lenient_quantity<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<i64, D::Error> {
    use serde::de::Error;

    let value = match Value::deserialize(deserializer)? {
        Value::Null => return Ok(one()),
        Value::Number(n) => n.to_string().parse::<Decimal>().map_err(D::Error::custom)?,
        Value::String(s) => s.trim().parse::<Decimal>().map_err(D::Error::custom)?,
        other => return Err(D::Error::custom(format!("invalid quantity: {other}"))),
    };

    if !value.fract().is_zero() {
        return Err(D::Error::custom(format!("invalid quantity: {value}")));
    }
    value
        .to_i64()
        .ok_or_else(|| D::Error::custom(format!("invalid quantity: {value}")))
}

/// Cart submitted for checkout
#[derive(Clone, Debug, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub items: Vec<CheckoutItem>,

    /// Origin the gateway should send the buyer back to
    #[serde(default, rename = "baseUrl", alias = "base_url")]
    pub base_url: Option<String>,
}

/// Created checkout session
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CheckoutResponse {
    pub id: String,
    pub init_point: String,
    pub external_reference: String,
}

/// Checkout service settings
#[derive(Clone, Debug)]
pub struct CheckoutSettings {
    pub currency: String,
    pub public_base_url: Option<String>,
    pub notification_url: Option<String>,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            currency: "ARS".into(),
            public_base_url: None,
            notification_url: None,
        }
    }
}

pub struct CheckoutService {
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn OrderStore>,
    settings: CheckoutSettings,
}

impl CheckoutService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn OrderStore>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            gateway,
            store,
            settings,
        }
    }

    /// Create a checkout preference for the cart
    pub async fn create(&self, request: CheckoutRequest) -> Result<CheckoutResponse> {
        let items = self.preference_items(&request.items)?;
        let back_urls = back_urls(&self.base_url(request.base_url.as_deref())?);
        let external_reference = uuid::Uuid::new_v4().to_string();

        let preference = Preference {
            items,
            back_urls,
            auto_return: "approved".into(),
            external_reference: external_reference.clone(),
            notification_url: self.settings.notification_url.clone(),
        };

        let created = self.gateway.create_preference(&preference).await?;

        tracing::info!(
            preference_id = %created.id,
            external_reference = %external_reference,
            items = preference.items.len(),
            "Created checkout preference"
        );

        if let Err(e) = self.store.create_pending(&external_reference).await {
            tracing::error!(
                external_reference = %external_reference,
                error = %e,
                "Failed to record pending order"
            );
        }

        Ok(CheckoutResponse {
            id: created.id,
            init_point: created.init_point,
            external_reference,
        })
    }

    /// Forward a card payment body to the gateway unchanged
    pub async fn process_payment(&self, body: &Value) -> Result<Value> {
        if !body.is_object() {
            return Err(PaymentError::Validation("payment body must be a JSON object".into()));
        }
        let result = self.gateway.create_payment(body).await?;
        tracing::info!(
            payment_id = ?result.get("id"),
            status = ?result.get("status"),
            "Processed direct payment"
        );
        Ok(result)
    }

    fn preference_items(&self, items: &[CheckoutItem]) -> Result<Vec<PreferenceItem>> {
        if items.is_empty() {
            return Err(PaymentError::Validation("cart is empty".into()));
        }

        items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let title = item.title.trim();
                if title.is_empty() {
                    return Err(PaymentError::Validation(format!(
                        "item {index}: title is required"
                    )));
                }
                let quantity = u32::try_from(item.quantity)
                    .ok()
                    .filter(|q| *q >= 1)
                    .ok_or_else(|| {
                        PaymentError::Validation(format!(
                            "item {index}: quantity must be at least 1"
                        ))
                    })?;
                if item.price < Decimal::ZERO {
                    return Err(PaymentError::Validation(format!(
                        "item {index}: price must not be negative"
                    )));
                }

                Ok(PreferenceItem {
                    id: item
                        .id
                        .clone()
                        .filter(|id| !id.trim().is_empty())
                        .unwrap_or_else(|| format!("item-{index}")),
                    title: title.to_string(),
                    quantity,
                    unit_price: item.price,
                    currency_id: self.settings.currency.clone(),
                })
            })
            .collect()
    }

    fn base_url(&self, requested: Option<&str>) -> Result<String> {
        requested
            .or(self.settings.public_base_url.as_deref())
            .map(|url| url.trim().trim_end_matches('/'))
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .ok_or_else(|| PaymentError::Validation("baseUrl is required".into()))
    }
}

fn back_urls(base: &str) -> BackUrls {
    BackUrls {
        success: format!("{base}/#/mp-callback"),
        failure: format!("{base}/#/checkout"),
        pending: format!("{base}/#/mp-callback"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeGateway, RecordingStore};
    use rust_decimal_macros::dec;

    fn service(gateway: Arc<FakeGateway>, store: Arc<RecordingStore>) -> CheckoutService {
        CheckoutService::new(gateway, store, CheckoutSettings::default())
    }

    fn request(json: &str) -> CheckoutRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_request_parsing() {
        let req = request(
            r#"{"items":[{"title":"SEO","quantity":2,"price":"1500.50"},{"title":"Ads","price":99}],"baseUrl":"https://flip.example"}"#,
        );
        assert_eq!(req.items[0].price, dec!(1500.50));
        assert_eq!(req.items[1].quantity, 1);
        assert_eq!(req.items[1].price, dec!(99));
        assert_eq!(req.base_url.as_deref(), Some("https://flip.example"));

        assert!(
            serde_json::from_str::<CheckoutRequest>(r#"{"items":[{"title":"x","price":"abc"}]}"#)
                .is_err()
        );
    }

    #[test]
    fn test_quantity_accepts_numeric_strings() {
        let req = request(
            r#"{"items":[{"title":"a","quantity":"2","price":1},{"title":"b","quantity":" 3 ","price":1},{"title":"c","quantity":4.0,"price":1},{"title":"d","quantity":null,"price":1}]}"#,
        );
        let quantities: Vec<i64> = req.items.iter().map(|i| i.quantity).collect();
        assert_eq!(quantities, vec![2, 3, 4, 1]);

        for bad in [r#""two""#, "1.5", r#""1.5""#, "true", "[]"] {
            let json = format!(r#"{{"items":[{{"title":"x","quantity":{bad},"price":1}}]}}"#);
            assert!(serde_json::from_str::<CheckoutRequest>(&json).is_err(), "accepted {bad}");
        }
    }

    #[tokio::test]
    async fn test_string_quantity_reaches_preference() {
        let gateway = Arc::new(FakeGateway::default());
        service(gateway.clone(), Arc::new(RecordingStore::default()))
            .create(request(
                r#"{"items":[{"title":"SEO","quantity":"2","price":"100"}],"baseUrl":"https://flip.example"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(gateway.preferences.lock().unwrap()[0].items[0].quantity, 2);
    }

    #[tokio::test]
    async fn test_creates_preference_and_pending_order() {
        let gateway = Arc::new(FakeGateway::default());
        let store = Arc::new(RecordingStore::default());

        let response = service(gateway.clone(), store.clone())
            .create(request(
                r#"{"items":[{"id":"curso-seo","title":"SEO","quantity":1,"price":15000}],"baseUrl":"https://flip.example/"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.id, "pref-123");
        assert!(uuid::Uuid::parse_str(&response.external_reference).is_ok());

        let sent = gateway.preferences.lock().unwrap()[0].clone();
        assert_eq!(sent.external_reference, response.external_reference);
        assert_eq!(sent.auto_return, "approved");
        assert_eq!(sent.back_urls.success, "https://flip.example/#/mp-callback");
        assert_eq!(sent.back_urls.pending, "https://flip.example/#/mp-callback");
        assert_eq!(sent.back_urls.failure, "https://flip.example/#/checkout");
        assert_eq!(sent.items[0].id, "curso-seo");
        assert_eq!(sent.items[0].currency_id, "ARS");

        let order = store
            .inner
            .find_by_external_reference(&response.external_reference)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.status, crate::order::PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_each_checkout_gets_fresh_reference() {
        let gateway = Arc::new(FakeGateway::default());
        let svc = service(gateway, Arc::new(RecordingStore::default()));
        let body = r#"{"items":[{"title":"SEO","price":1}],"baseUrl":"https://flip.example"}"#;

        let a = svc.create(request(body)).await.unwrap();
        let b = svc.create(request(body)).await.unwrap();
        assert_ne!(a.external_reference, b.external_reference);
    }

    #[tokio::test]
    async fn test_validation() {
        let gateway = Arc::new(FakeGateway::default());
        let svc = service(gateway.clone(), Arc::new(RecordingStore::default()));

        for body in [
            r#"{"items":[],"baseUrl":"https://flip.example"}"#,
            r#"{"baseUrl":"https://flip.example"}"#,
            r#"{"items":[{"title":" ","price":1}],"baseUrl":"https://flip.example"}"#,
            r#"{"items":[{"title":"SEO","quantity":0,"price":1}],"baseUrl":"https://flip.example"}"#,
            r#"{"items":[{"title":"SEO","price":-1}],"baseUrl":"https://flip.example"}"#,
            r#"{"items":[{"title":"SEO","price":1}]}"#,
        ] {
            let err = svc.create(request(body)).await.unwrap_err();
            assert_eq!(err.status_code(), 400, "{body}");
        }
        assert!(gateway.calls().is_empty());

        let err = svc.create(request(r#"{"items":[]}"#)).await.unwrap_err();
        assert_eq!(err.details().as_deref(), Some("cart is empty"));
    }

    #[tokio::test]
    async fn test_configured_base_url_and_notification_url() {
        let gateway = Arc::new(FakeGateway::default());
        let svc = CheckoutService::new(
            gateway.clone(),
            Arc::new(RecordingStore::default()),
            CheckoutSettings {
                currency: "ARS".into(),
                public_base_url: Some("https://flip-f.example".into()),
                notification_url: Some("https://flip-f.example/api/webhooks/mercadopago".into()),
            },
        );

        svc.create(request(r#"{"items":[{"title":"SEO","price":0}]}"#)).await.unwrap();

        let sent = gateway.preferences.lock().unwrap()[0].clone();
        assert_eq!(sent.back_urls.failure, "https://flip-f.example/#/checkout");
        assert!(sent.notification_url.is_some());
    }

    #[tokio::test]
    async fn test_store_failure_does_not_fail_checkout() {
        let store = Arc::new(RecordingStore {
            fail_writes: true,
            ..RecordingStore::default()
        });
        let response = service(Arc::new(FakeGateway::default()), store.clone())
            .create(request(r#"{"items":[{"title":"SEO","price":1}],"baseUrl":"https://flip.example"}"#))
            .await
            .unwrap();
        assert_eq!(response.id, "pref-123");
        assert_eq!(store.creates.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_gateway_failure_surfaces() {
        let err = service(Arc::new(FakeGateway::failing()), Arc::new(RecordingStore::default()))
            .create(request(r#"{"items":[{"title":"SEO","price":1}],"baseUrl":"https://flip.example"}"#))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn test_process_payment_passthrough() {
        let gateway = Arc::new(FakeGateway::default());
        let svc = service(gateway.clone(), Arc::new(RecordingStore::default()));

        let body = serde_json::json!({
            "transaction_amount": 100,
            "token": "card-token",
            "installments": 1
        });
        let result = svc.process_payment(&body).await.unwrap();
        assert_eq!(result["status"], "approved");
        assert_eq!(result["echo"], body);
        assert_eq!(gateway.calls(), vec!["create_payment".to_string()]);

        assert!(svc.process_payment(&serde_json::json!([1, 2])).await.is_err());
    }
}
