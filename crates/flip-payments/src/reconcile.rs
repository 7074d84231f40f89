//! Payment Status Reconciliation
//!
//! Answers "what is the status of this purchase" from the order store when it
//! already holds an approval, and from the gateway otherwise. Lookups here never
//! write to the store; only verified notifications do.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PaymentError, Result};
use crate::gateway::PaymentGateway;
use crate::order::{PaymentStatus, PaymentStatusResult, StatusSource};
use crate::store::OrderStore;

/// Status query parameters
#[derive(Clone, Debug, Default, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub payment_id: Option<String>,
    #[serde(default)]
    pub external_reference: Option<String>,
}

impl StatusQuery {
    fn normalized(&self) -> (Option<&str>, Option<&str>) {
        fn clean(v: &Option<String>) -> Option<&str> {
            v.as_deref().map(str::trim).filter(|s| !s.is_empty())
        }
        (clean(&self.payment_id), clean(&self.external_reference))
    }
}

/// Status endpoint answer
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StatusOutcome {
    Found(PaymentStatusResult),
    /// Nothing known yet, the normal state right after checkout
    Pending { status: PaymentStatus, message: String },
}

impl StatusOutcome {
    fn pending() -> Self {
        Self::Pending {
            status: PaymentStatus::Pending,
            message: "Payment not found yet; it may still be processing".into(),
        }
    }

    pub const fn status(&self) -> &PaymentStatus {
        match self {
            Self::Found(result) => &result.status,
            Self::Pending { status, .. } => status,
        }
    }
}

/// What the gateway is asked by; a payment id wins over a reference
enum LookupKey<'a> {
    PaymentId(&'a str),
    Reference(&'a str),
}

/// Database-first, gateway-fallback status lookup
pub struct StatusReconciler {
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn OrderStore>,
}

impl StatusReconciler {
    pub fn new(gateway: Arc<dyn PaymentGateway>, store: Arc<dyn OrderStore>) -> Self {
        Self { gateway, store }
    }

    pub async fn resolve(&self, query: &StatusQuery) -> Result<StatusOutcome> {
        let (payment_id, external_reference) = query.normalized();
        let key = match (payment_id, external_reference) {
            (Some(id), _) => LookupKey::PaymentId(id),
            (None, Some(reference)) => LookupKey::Reference(reference),
            (None, None) => {
                return Err(PaymentError::Validation(
                    "payment_id or external_reference is required".into(),
                ));
            }
        };

        if let Some(reference) = external_reference {
            match self.store.find_by_external_reference(reference).await {
                Ok(Some(order)) if order.status.is_success() => {
                    tracing::debug!(external_reference = reference, status = %order.status, "Status served from order store");
                    return Ok(StatusOutcome::Found(PaymentStatusResult {
                        id: order.payment_id,
                        status: order.status,
                        status_detail: Some("accredited".into()),
                        date_approved: None,
                        source: StatusSource::Database,
                    }));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(external_reference = reference, error = %e, "Order store lookup failed, asking the gateway");
                }
            }
        }

        let lookup = match key {
            LookupKey::PaymentId(id) => self.gateway.get_payment(id).await,
            LookupKey::Reference(reference) => {
                self.gateway.search_by_external_reference(reference).await
            }
        };

        match lookup {
            Ok(payment) => {
                tracing::debug!(payment_id = %payment.id, status = %payment.status, "Status served from gateway");
                Ok(StatusOutcome::Found(PaymentStatusResult {
                    id: Some(payment.id),
                    status: payment.status,
                    status_detail: payment.status_detail,
                    date_approved: payment.date_approved,
                    source: StatusSource::Gateway,
                }))
            }
            Err(PaymentError::NotFound(what)) => {
                tracing::debug!(what = %what, "No payment yet, reporting pending");
                Ok(StatusOutcome::pending())
            }
            Err(e) => Err(e),
        }
    }
}
