//! Application State

use std::sync::Arc;

use flip_chat::{ChatAssistant, SessionStore};
use flip_payments::{
    CheckoutService, CheckoutSettings, MemoryOrderStore, MercadoPagoClient, NotificationHandler,
    OrderStore, PaymentError, PaymentGateway, StatusReconciler, SupabaseOrderStore,
    WebhookVerifier,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Chat assistant (None if no Gemini key is configured)
    pub assistant: Option<Arc<ChatAssistant>>,

    pub sessions: Arc<dyn SessionStore>,

    /// Payment services (None if Mercado Pago is not configured)
    pub payments: Option<Arc<Payments>>,
}

impl AppState {
    pub fn payments(&self) -> Result<&Payments, PaymentError> {
        self.payments
            .as_deref()
            .ok_or_else(|| PaymentError::Config("MP_ACCESS_TOKEN not set".into()))
    }
}

/// Everything the payment routes need, built over one gateway and one store
pub struct Payments {
    pub checkout: CheckoutService,
    pub reconciler: StatusReconciler,
    pub notifications: NotificationHandler,
    pub store: Arc<dyn OrderStore>,
}

impl Payments {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn OrderStore>,
        verifier: WebhookVerifier,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            checkout: CheckoutService::new(gateway.clone(), store.clone(), settings),
            reconciler: StatusReconciler::new(gateway.clone(), store.clone()),
            notifications: NotificationHandler::new(verifier, gateway, store.clone()),
            store,
        }
    }

    /// Build from the environment; `None` when the access token is missing
    pub fn from_env(public_base_url: Option<String>) -> Option<Self> {
        let client = match MercadoPagoClient::from_env() {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(error = %e, "Mercado Pago not configured, payments disabled");
                return None;
            }
        };

        let config = client.config().clone();
        let verifier = WebhookVerifier::new(config.webhook_secret.clone());
        if !verifier.is_enforcing() {
            tracing::warn!("MP_WEBHOOK_SECRET not set, webhook signatures will not be checked");
        }

        let settings = CheckoutSettings {
            currency: config.currency,
            public_base_url,
            notification_url: config.notification_url,
        };

        Some(Self::new(Arc::new(client), order_store(), verifier, settings))
    }
}

fn order_store() -> Arc<dyn OrderStore> {
    match SupabaseOrderStore::from_env() {
        Ok(store) => {
            tracing::info!("Order store: supabase");
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Supabase not configured, orders kept in memory");
            Arc::new(MemoryOrderStore::new())
        }
    }
}

