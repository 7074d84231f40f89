//! # flip-payments
//!
//! Mercado Pago checkout and payment-status reconciliation for the Flip storefront.
//!
//! ## Flow
//!
//! ```text
//! ┌────────────┐  create   ┌──────────────┐  redirect  ┌────────────┐
//! │ Storefront │──────────▶│ Hosted       │───────────▶│ Storefront │
//! │ (cart)     │           │ checkout     │            │ (callback) │
//! └────────────┘           └──────┬───────┘            └─────┬──────┘
//!                                 │ notification              │ status query
//!                                 ▼                           ▼
//!                         NotificationHandler         StatusReconciler
//!                                 │ upsert (rank-guarded)     │ read only
//!                                 └──────────▶ OrderStore ◀───┘
//! ```
//!
//! The gateway is the source of truth. The order store is a cache of it that is
//! written only by signature-verified notifications (and a `pending` row at
//! checkout time).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use flip_payments::{MercadoPagoClient, MemoryOrderStore, StatusQuery, StatusReconciler};
//!
//! let gateway = Arc::new(MercadoPagoClient::from_env()?);
//! let store = Arc::new(MemoryOrderStore::new());
//! let reconciler = StatusReconciler::new(gateway, store);
//!
//! let outcome = reconciler.resolve(&StatusQuery {
//!     payment_id: None,
//!     external_reference: Some("5f1c2d9e-...".into()),
//! }).await?;
//! ```

mod checkout;
mod error;
mod gateway;
mod order;
mod reconcile;
#[cfg(feature = "axum-handlers")]
mod response;
mod signature;
mod store;
mod webhook;

#[cfg(test)]
pub(crate) mod testing;

pub use checkout::{
    CheckoutItem, CheckoutRequest, CheckoutResponse, CheckoutService, CheckoutSettings,
};
pub use error::{PaymentError, Result};
pub use gateway::{
    BackUrls, CreatedPreference, GatewayPayment, MercadoPagoClient, MercadoPagoConfig,
    PaymentGateway, Preference, PreferenceItem,
};
pub use order::{Order, PaymentStatus, PaymentStatusResult, StatusSource};
pub use reconcile::{StatusOutcome, StatusQuery, StatusReconciler};
#[cfg(feature = "axum-handlers")]
pub use response::ErrorBody;
pub use signature::{SignatureHeader, Verification, WebhookVerifier, manifest, sign};
pub use store::{MemoryOrderStore, OrderStore, SupabaseConfig, SupabaseOrderStore, WriteOutcome};
pub use webhook::{Notification, NotificationHandler, NotificationOutcome};
