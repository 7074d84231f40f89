//! Test doubles for the gateway and the order store that record every call.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{PaymentError, Result};
use crate::gateway::{CreatedPreference, GatewayPayment, PaymentGateway, Preference};
use crate::order::{Order, PaymentStatus};
use crate::store::{MemoryOrderStore, OrderStore, WriteOutcome};

pub fn payment(id: &str, status: PaymentStatus, reference: Option<&str>) -> GatewayPayment {
    GatewayPayment {
        id: id.into(),
        status,
        status_detail: Some("accredited".into()),
        date_approved: Some("2026-01-10T12:00:00.000-03:00".into()),
        external_reference: reference.map(Into::into),
    }
}

#[derive(Default)]
pub struct FakeGateway {
    pub by_id: HashMap<String, GatewayPayment>,
    pub by_reference: HashMap<String, GatewayPayment>,
    pub fail_upstream: bool,
    pub calls: Mutex<Vec<String>>,
    pub preferences: Mutex<Vec<Preference>>,
}

impl FakeGateway {
    pub fn with_payment(mut self, payment: GatewayPayment) -> Self {
        if let Some(reference) = &payment.external_reference {
            self.by_reference.insert(reference.clone(), payment.clone());
        }
        self.by_id.insert(payment.id.clone(), payment);
        self
    }

    pub fn failing() -> Self {
        Self {
            fail_upstream: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.fail_upstream {
            return Err(PaymentError::Upstream {
                status: Some(502),
                message: "bad gateway".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn get_payment(&self, id: &str) -> Result<GatewayPayment> {
        self.record(format!("get:{id}"))?;
        self.by_id
            .get(id)
            .cloned()
            .ok_or_else(|| PaymentError::NotFound(id.into()))
    }

    async fn search_by_external_reference(&self, reference: &str) -> Result<GatewayPayment> {
        self.record(format!("search:{reference}"))?;
        self.by_reference
            .get(reference)
            .cloned()
            .ok_or_else(|| PaymentError::NotFound(reference.into()))
    }

    async fn create_preference(&self, preference: &Preference) -> Result<CreatedPreference> {
        self.record(format!("preference:{}", preference.external_reference))?;
        self.preferences.lock().unwrap().push(preference.clone());
        Ok(CreatedPreference {
            id: "pref-123".into(),
            init_point: "https://www.mercadopago.com.ar/checkout/v1/redirect?pref_id=pref-123"
                .into(),
            sandbox_init_point: None,
        })
    }

    async fn create_payment(&self, body: &serde_json::Value) -> Result<serde_json::Value> {
        self.record("create_payment".into())?;
        Ok(serde_json::json!({ "id": 555, "status": "approved", "echo": body }))
    }
}

/// Memory store wrapper that records calls and can fail on demand
#[derive(Default)]
pub struct RecordingStore {
    pub inner: MemoryOrderStore,
    pub fail_reads: bool,
    pub fail_writes: bool,
    pub upserts: Mutex<Vec<(String, PaymentStatus, String)>>,
    pub reads: Mutex<Vec<String>>,
    pub creates: Mutex<Vec<String>>,
}

impl RecordingStore {
    pub async fn with_order(order: Order) -> Self {
        let store = Self::default();
        store.inner.insert(order).await;
        store
    }

    pub fn upserts(&self) -> Vec<(String, PaymentStatus, String)> {
        self.upserts.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> usize {
        self.upserts.lock().unwrap().len() + self.creates.lock().unwrap().len()
    }
}

#[async_trait]
impl OrderStore for RecordingStore {
    fn kind(&self) -> &'static str {
        "recording"
    }

    async fn find_by_external_reference(&self, reference: &str) -> Result<Option<Order>> {
        self.reads.lock().unwrap().push(reference.into());
        if self.fail_reads {
            return Err(PaymentError::Store("read failed".into()));
        }
        self.inner.find_by_external_reference(reference).await
    }

    async fn create_pending(&self, reference: &str) -> Result<()> {
        self.creates.lock().unwrap().push(reference.into());
        if self.fail_writes {
            return Err(PaymentError::Store("write failed".into()));
        }
        self.inner.create_pending(reference).await
    }

    async fn upsert_status(
        &self,
        reference: &str,
        status: &PaymentStatus,
        payment_id: &str,
    ) -> Result<WriteOutcome> {
        self.upserts
            .lock()
            .unwrap()
            .push((reference.into(), status.clone(), payment_id.into()));
        if self.fail_writes {
            return Err(PaymentError::Store("write failed".into()));
        }
        self.inner.upsert_status(reference, status, payment_id).await
    }
}
