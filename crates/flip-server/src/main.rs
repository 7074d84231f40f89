//! Flip HTTP Server
//!
//! Axum-based server for the Flip storefront: the FlipBot chat widget (REST and
//! WebSocket) and the Mercado Pago checkout, status and notification routes.

mod config;
mod handlers;
mod state;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flip_chat::{
    AssistantConfig, ChatAssistant, MemorySessionStore, SessionStore,
    provider::GenerationOptions,
};
use flip_runtime::GeminiProvider;

use crate::config::ServerConfig;
use crate::handlers::{
    chat_handler, chat_stream_handler, check_payment_status, create_preference, health_check,
    list_models, mercadopago_webhook, process_payment,
};
use crate::state::{AppState, Payments};

/// All routes; the storefront is served from `static_dir` when given
pub fn router(state: AppState, static_dir: Option<&Path>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        // Health & info
        .route("/health", get(health_check))
        .route("/api/models", get(list_models))
        // Chat widget
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/stream", get(chat_stream_handler))
        // Checkout
        .route("/api/create-preference", post(create_preference))
        .route("/api/create_preference", post(create_preference))
        .route("/create-preference", post(create_preference))
        .route("/api/process-payment", post(process_payment))
        .route("/process_payment", post(process_payment))
        // Reconciliation
        .route("/api/check-payment-status", get(check_payment_status))
        .route("/api/webhook", post(mercadopago_webhook))
        .route("/webhook", post(mercadopago_webhook))
        .route("/api/webhooks/mercadopago", post(mercadopago_webhook));

    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors),
    )
    .with_state(state)
}

fn build_assistant() -> Option<Arc<ChatAssistant>> {
    let provider = match GeminiProvider::from_env() {
        Ok(provider) => provider,
        Err(e) => {
            tracing::warn!(error = %e, "Gemini not configured, chat disabled");
            return None;
        }
    };

    let config = AssistantConfig {
        generation: GenerationOptions {
            model: provider.config().model.clone(),
            ..Default::default()
        },
        ..Default::default()
    };
    Some(Arc::new(ChatAssistant::new(Arc::new(provider), config)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    config::load_dotenv();
    let config = ServerConfig::from_env();

    // Chat
    let assistant = build_assistant();
    if let Some(assistant) = &assistant {
        match assistant.provider().health_check().await {
            Ok(true) => tracing::info!(model = assistant.model(), "✓ Connected to Gemini"),
            Ok(false) | Err(_) => tracing::warn!("⚠ Gemini not reachable - chat requests will fail"),
        }
    }

    let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let max_idle = chrono::Duration::minutes(config.session_idle_minutes);
    let pruner = sessions.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            if let Err(e) = pruner.prune_idle(max_idle).await {
                tracing::warn!(error = %e, "Session pruning failed");
            }
        }
    });

    // Payments
    let payments = Payments::from_env(config.public_base_url.clone()).map(Arc::new);
    if let Some(payments) = &payments {
        tracing::info!(order_store = payments.store.kind(), "✓ Mercado Pago configured");
    } else {
        tracing::warn!("⚠ Mercado Pago not configured - set MP_ACCESS_TOKEN in .env");
    }

    let state = AppState {
        assistant,
        sessions,
        payments,
    };

    let app = router(state, config.static_dir.as_deref());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 flip server running on http://{}", config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                      - Health check");
    tracing::info!("  GET  /api/models                  - Chat models");
    tracing::info!("  POST /api/chat                    - FlipBot message");
    tracing::info!("  GET  /api/chat/stream             - FlipBot WebSocket");
    tracing::info!("  POST /api/create-preference       - Start checkout");
    tracing::info!("  POST /api/process-payment         - Card payment");
    tracing::info!("  GET  /api/check-payment-status    - Payment status");
    tracing::info!("  POST /api/webhooks/mercadopago    - Gateway notifications");
    if let Some(dir) = &config.static_dir {
        tracing::info!("Serving storefront from {}", dir.display());
    }

    axum::serve(listener, app).await?;

    Ok(())
}
