//! Mercado Pago Notification Handling
//!
//! Turns a gateway notification into at most one store write. The notification
//! itself is only a pointer: the payment status always comes from a fresh
//! `get_payment` call, never from the notification body.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{PaymentError, Result};
use crate::gateway::PaymentGateway;
use crate::order::{PaymentStatus, id_string};
use crate::signature::{Verification, WebhookVerifier};
use crate::store::{OrderStore, WriteOutcome};

/// One inbound notification, body and query already merged
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Notification {
    /// `payment`, `merchant_order`, ...
    pub event_type: Option<String>,
    pub resource_id: Option<String>,
    /// Raw `x-signature` header
    pub signature: Option<String>,
    /// Raw `x-request-id` header
    pub request_id: Option<String>,
}

impl Notification {
    /// Build from the raw request pieces. An empty body is allowed (query-only
    /// notifications); a non-empty body that is not JSON is rejected.
    pub fn from_parts(
        body: &[u8],
        query: &HashMap<String, String>,
        signature: Option<String>,
        request_id: Option<String>,
    ) -> Result<Self> {
        let body: Value = if body.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice(body)
                .map_err(|e| PaymentError::Validation(format!("malformed notification body: {e}")))?
        };

        let query_value = |key: &str| {
            query
                .get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let resource_id = body
            .pointer("/data/id")
            .and_then(id_string::from_value)
            .or_else(|| body.get("resource").and_then(resource_tail))
            .or_else(|| query_value("data.id"))
            .or_else(|| query_value("id"));

        let event_type = ["type", "topic"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str).map(str::to_string))
            .or_else(|| query_value("type"))
            .or_else(|| query_value("topic"));

        Ok(Self {
            event_type,
            resource_id,
            signature,
            request_id,
        })
    }

    fn is_payment(&self) -> bool {
        self.event_type.as_deref() == Some("payment")
    }
}

/// Legacy `resource` may be a bare id or a URL ending in one
fn resource_tail(value: &Value) -> Option<String> {
    let raw = id_string::from_value(value)?;
    let tail = raw.trim_end_matches('/').rsplit('/').next()?.trim();
    (!tail.is_empty()).then(|| tail.to_string())
}

/// What happened to one notification
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// Acknowledged without touching the gateway or the store
    Ignored { reason: String },

    Processed {
        payment_id: String,
        status: PaymentStatus,
        external_reference: Option<String>,
        /// `None` when nothing was written (no reference, or the store failed)
        write: Option<WriteOutcome>,
    },
}

/// Verifies, fetches the authoritative payment and records its status
pub struct NotificationHandler {
    verifier: WebhookVerifier,
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn OrderStore>,
}

impl NotificationHandler {
    pub fn new(
        verifier: WebhookVerifier,
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn OrderStore>,
    ) -> Self {
        Self {
            verifier,
            gateway,
            store,
        }
    }

    pub const fn verifier(&self) -> &WebhookVerifier {
        &self.verifier
    }

    pub async fn handle(&self, notification: &Notification) -> Result<NotificationOutcome> {
        let Some(resource_id) = notification.resource_id.as_deref() else {
            tracing::debug!(event_type = ?notification.event_type, "Notification without resource id, ignoring");
            return Ok(NotificationOutcome::Ignored {
                reason: "no resource id".into(),
            });
        };

        match self.verifier.verify(
            notification.signature.as_deref(),
            notification.request_id.as_deref(),
            resource_id,
        ) {
            Verification::Invalid(reason) => {
                tracing::warn!(resource_id, reason = %reason, "Rejected notification signature");
                return Err(PaymentError::Auth(reason));
            }
            Verification::Valid | Verification::Bypassed => {}
        }

        if !notification.is_payment() {
            tracing::debug!(resource_id, event_type = ?notification.event_type, "Ignoring non-payment notification");
            return Ok(NotificationOutcome::Ignored {
                reason: format!(
                    "event type {}",
                    notification.event_type.as_deref().unwrap_or("unknown")
                ),
            });
        }

        let payment = self.gateway.get_payment(resource_id).await?;

        tracing::info!(
            payment_id = %payment.id,
            status = %payment.status,
            external_reference = ?payment.external_reference,
            "Processing payment notification"
        );

        let write = match payment.external_reference.as_deref() {
            Some(reference) if !reference.is_empty() => {
                match self
                    .store
                    .upsert_status(reference, &payment.status, &payment.id)
                    .await
                {
                    Ok(outcome) => {
                        if outcome == WriteOutcome::Skipped {
                            tracing::info!(external_reference = reference, status = %payment.status, "Stale status not applied");
                        }
                        Some(outcome)
                    }
                    Err(e) => {
                        tracing::error!(external_reference = reference, error = %e, "Failed to record payment status");
                        None
                    }
                }
            }
            _ => {
                tracing::warn!(payment_id = %payment.id, "Payment has no external reference, nothing to record");
                None
            }
        };

        Ok(NotificationOutcome::Processed {
            payment_id: payment.id,
            status: payment.status,
            external_reference: payment.external_reference,
            write,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::Order;
    use crate::signature::{manifest, sign};
    use crate::testing::{FakeGateway, RecordingStore, payment};

    const SECRET: &str = "whsec_flip";

    fn no_query() -> HashMap<String, String> {
        HashMap::new()
    }

    fn signed(resource_id: &str, request_id: &str) -> (Option<String>, Option<String>) {
        let ts = "1704067200000";
        let v1 = sign(SECRET, &manifest(resource_id, request_id, ts)).unwrap();
        (Some(format!("ts={ts},v1={v1}")), Some(request_id.to_string()))
    }

    fn payment_notification(
        id: &str,
        signature: Option<String>,
        request_id: Option<String>,
    ) -> Notification {
        let body = format!(
            r#"{{"type":"payment","action":"payment.updated","data":{{"id":"{id}"}}}}"#
        );
        Notification::from_parts(body.as_bytes(), &no_query(), signature, request_id).unwrap()
    }

    fn handler(
        secret: Option<&str>,
        gateway: Arc<FakeGateway>,
        store: Arc<RecordingStore>,
    ) -> NotificationHandler {
        NotificationHandler::new(WebhookVerifier::new(secret.map(Into::into)), gateway, store)
    }

    #[test]
    fn test_envelope_parsing() {
        let n = Notification::from_parts(
            br#"{"type":"payment","data":{"id":123}}"#,
            &no_query(),
            None,
            None,
        )
        .unwrap();
        assert_eq!(n.resource_id.as_deref(), Some("123"));
        assert_eq!(n.event_type.as_deref(), Some("payment"));

        let legacy = Notification::from_parts(
            br#"{"topic":"payment","resource":"https://api.mercadolibre.com/collections/notifications/4455"}"#,
            &no_query(),
            None,
            None,
        )
        .unwrap();
        assert_eq!(legacy.resource_id.as_deref(), Some("4455"));

        let query = HashMap::from([
            ("topic".to_string(), "payment".to_string()),
            ("id".to_string(), "77".to_string()),
        ]);
        let from_query = Notification::from_parts(b"", &query, None, None).unwrap();
        assert_eq!(from_query.resource_id.as_deref(), Some("77"));
        assert_eq!(from_query.event_type.as_deref(), Some("payment"));

        let err = Notification::from_parts(b"{not json", &no_query(), None, None).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_valid_signature_records_one_write() {
        let gateway = Arc::new(
            FakeGateway::default()
                .with_payment(payment("98765", PaymentStatus::Approved, Some("ref-1"))),
        );
        let store = Arc::new(RecordingStore::with_order(Order::pending("ref-1")).await);
        let (sig, req) = signed("98765", "req-1");

        let outcome = handler(Some(SECRET), gateway.clone(), store.clone())
            .handle(&payment_notification("98765", sig, req))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            NotificationOutcome::Processed {
                payment_id: "98765".into(),
                status: PaymentStatus::Approved,
                external_reference: Some("ref-1".into()),
                write: Some(WriteOutcome::Applied),
            }
        );
        assert_eq!(gateway.calls(), vec!["get:98765".to_string()]);
        assert_eq!(
            store.upserts(),
            vec![("ref-1".to_string(), PaymentStatus::Approved, "98765".to_string())]
        );
        let stored = store.inner.find_by_external_reference("ref-1").await.unwrap().unwrap();
        assert_eq!(stored.payment_id.as_deref(), Some("98765"));
    }

    #[tokio::test]
    async fn test_bad_signature_is_unauthorized() {
        let gateway = Arc::new(
            FakeGateway::default()
                .with_payment(payment("98765", PaymentStatus::Approved, Some("ref-1"))),
        );
        let store = Arc::new(RecordingStore::default());
        let (sig, _) = signed("98765", "req-1");

        let err = handler(Some(SECRET), gateway.clone(), store.clone())
            .handle(&payment_notification("98765", sig, Some("req-other".into())))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 401);
        assert!(gateway.calls().is_empty());
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_signature_headers_rejected() {
        let store = Arc::new(RecordingStore::default());
        let err = handler(Some(SECRET), Arc::new(FakeGateway::default()), store)
            .handle(&payment_notification("1", None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Auth(_)));
    }

    #[tokio::test]
    async fn test_bypass_without_secret() {
        let gateway = Arc::new(
            FakeGateway::default()
                .with_payment(payment("5", PaymentStatus::Rejected, Some("ref-5"))),
        );
        let store = Arc::new(RecordingStore::default());

        let outcome = handler(None, gateway, store.clone())
            .handle(&payment_notification("5", None, None))
            .await
            .unwrap();

        assert!(matches!(outcome, NotificationOutcome::Processed { .. }));
        assert_eq!(store.upserts().len(), 1);
    }

    #[tokio::test]
    async fn test_merchant_order_makes_no_calls() {
        let gateway = Arc::new(FakeGateway::default());
        let store = Arc::new(RecordingStore::default());
        let (sig, req) = signed("321", "req-9");
        let notification = Notification::from_parts(
            br#"{"type":"merchant_order","data":{"id":"321"}}"#,
            &no_query(),
            sig,
            req,
        )
        .unwrap();

        let outcome = handler(Some(SECRET), gateway.clone(), store.clone())
            .handle(&notification)
            .await
            .unwrap();

        assert!(matches!(outcome, NotificationOutcome::Ignored { .. }));
        assert!(gateway.calls().is_empty());
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_id_ignored_before_signature() {
        let gateway = Arc::new(FakeGateway::default());
        let notification =
            Notification::from_parts(br#"{"type":"payment"}"#, &no_query(), None, None).unwrap();

        let outcome = handler(Some(SECRET), gateway.clone(), Arc::new(RecordingStore::default()))
            .handle(&notification)
            .await
            .unwrap();

        assert!(matches!(outcome, NotificationOutcome::Ignored { .. }));
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_still_acknowledged() {
        let gateway = Arc::new(
            FakeGateway::default()
                .with_payment(payment("8", PaymentStatus::Approved, Some("ref-8"))),
        );
        let store = Arc::new(RecordingStore {
            fail_writes: true,
            ..RecordingStore::default()
        });

        let outcome = handler(None, gateway, store.clone())
            .handle(&payment_notification("8", None, None))
            .await
            .unwrap();

        let NotificationOutcome::Processed { write, .. } = outcome else {
            panic!("expected processed");
        };
        assert!(write.is_none());
        assert_eq!(store.upserts().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_pending_does_not_regress() {
        let gateway = Arc::new(
            FakeGateway::default()
                .with_payment(payment("9", PaymentStatus::Pending, Some("ref-9"))),
        );
        let store = Arc::new(RecordingStore::default());
        store
            .inner
            .upsert_status("ref-9", &PaymentStatus::Approved, "9")
            .await
            .unwrap();

        let outcome = handler(None, gateway, store.clone())
            .handle(&payment_notification("9", None, None))
            .await
            .unwrap();

        let NotificationOutcome::Processed { write, .. } = outcome else {
            panic!("expected processed");
        };
        assert_eq!(write, Some(WriteOutcome::Skipped));
        let stored = store.inner.find_by_external_reference("ref-9").await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Approved);
    }

    #[tokio::test]
    async fn test_gateway_errors_propagate() {
        let store = Arc::new(RecordingStore::default());

        let missing = handler(None, Arc::new(FakeGateway::default()), store.clone())
            .handle(&payment_notification("404", None, None))
            .await
            .unwrap_err();
        assert_eq!(missing.status_code(), 404);

        let upstream = handler(None, Arc::new(FakeGateway::failing()), store.clone())
            .handle(&payment_notification("500", None, None))
            .await
            .unwrap_err();
        assert_eq!(upstream.status_code(), 500);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_payment_without_reference_not_written() {
        let gateway = Arc::new(
            FakeGateway::default().with_payment(payment("10", PaymentStatus::Approved, None)),
        );
        let store = Arc::new(RecordingStore::default());

        let outcome = handler(None, gateway, store.clone())
            .handle(&payment_notification("10", None, None))
            .await
            .unwrap();

        assert!(matches!(outcome, NotificationOutcome::Processed { write: None, .. }));
        assert_eq!(store.write_count(), 0);
    }
}
