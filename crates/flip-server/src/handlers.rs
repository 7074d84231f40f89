//! HTTP/WebSocket Handlers

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{
        Query, State, WebSocketUpgrade,
        rejection::QueryRejection,
        ws::{Message, WebSocket},
    },
    http::{HeaderMap, StatusCode},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};

use flip_chat::{ChatAssistant, ChatError, Session, SessionId, provider::ModelInfo};
use flip_payments::{
    CheckoutRequest, CheckoutResponse, Notification, PaymentError, StatusOutcome, StatusQuery,
};

use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub gemini_connected: bool,
    pub payments_configured: bool,
    pub webhook_signatures: bool,
    pub order_store: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub message: String,
    pub conversation_id: String,
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.into(),
        }),
    )
}

fn chat_error(err: &ChatError) -> ApiError {
    let (status, code) = match err {
        ChatError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
        ChatError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
        ChatError::ProviderUnavailable(_) | ChatError::EmptyResponse => {
            (StatusCode::SERVICE_UNAVAILABLE, "PROVIDER_UNAVAILABLE")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "CHAT_ERROR"),
    };
    if status.is_server_error() {
        tracing::error!(error = %err, "Chat request failed");
    } else {
        tracing::debug!(error = %err, "Chat request rejected");
    }
    api_error(status, err.user_message(), code)
}

fn assistant(state: &AppState) -> Result<&Arc<ChatAssistant>, ApiError> {
    state.assistant.as_ref().ok_or_else(|| {
        api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "El asistente no está configurado.",
            "CHAT_DISABLED",
        )
    })
}

/// Stored session for `id`, or a fresh one (keeping the caller's id)
async fn load_session(state: &AppState, assistant: &ChatAssistant, id: Option<&str>) -> Session {
    let Some(id) = id.map(str::trim).filter(|id| !id.is_empty()) else {
        return Session::new(assistant.new_conversation());
    };
    let id = SessionId::from_string(id);

    match state.sessions.load(&id).await {
        Ok(Some(session)) => session,
        Ok(None) => Session::new(assistant.new_conversation()).with_id(id),
        Err(e) => {
            tracing::warn!(conversation_id = %id, error = %e, "Session lookup failed, starting over");
            Session::new(assistant.new_conversation()).with_id(id)
        }
    }
}

async fn save_session(state: &AppState, session: &mut Session) {
    session.touch();
    if let Err(e) = state.sessions.save(session).await {
        tracing::warn!(conversation_id = %session.id, error = %e, "Failed to save chat session");
    }
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, PaymentError> {
    serde_json::from_slice(body)
        .map_err(|e| PaymentError::Validation(format!("invalid JSON body: {e}")))
}

/// Query string rejections answered with the JSON error body
fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, PaymentError> {
    query
        .map(|Query(params)| params)
        .map_err(|rejection| PaymentError::Validation(rejection.body_text()))
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let gemini_connected = match &state.assistant {
        Some(assistant) => assistant.provider().health_check().await.unwrap_or(false),
        None => false,
    };

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        gemini_connected,
        payments_configured: state.payments.is_some(),
        webhook_signatures: state
            .payments
            .as_ref()
            .is_some_and(|p| p.notifications.verifier().is_enforcing()),
        order_store: state.payments.as_ref().map(|p| p.store.kind()),
    })
}

/// Models offered by the chat provider
pub async fn list_models(State(state): State<AppState>) -> Result<Json<Vec<ModelInfo>>, ApiError> {
    let assistant = assistant(&state)?;
    assistant
        .provider()
        .list_models()
        .await
        .map(Json)
        .map_err(|e| chat_error(&e))
}

/// Chat widget endpoint (non-streaming)
pub async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let assistant = assistant(&state)?;
    let mut session = load_session(&state, assistant, payload.conversation_id.as_deref()).await;

    let message = assistant
        .reply(&mut session.conversation, &payload.message)
        .await
        .map_err(|e| chat_error(&e))?;

    save_session(&state, &mut session).await;

    Ok(Json(ChatResponse {
        message,
        conversation_id: session.id.to_string(),
        model: assistant.model().to_string(),
    }))
}

/// WebSocket streaming chat
pub async fn chat_stream_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_stream(socket, state))
}

fn error_frame(error: &str) -> Message {
    Message::Text(json!({"type": "error", "error": error}).to_string().into())
}

async fn handle_stream(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let Some(assistant) = state.assistant.clone() else {
        let _ = sender.send(error_frame("El asistente no está configurado.")).await;
        return;
    };

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::error!("WebSocket error: {}", e);
                break;
            }
            _ => continue,
        };

        let request: ChatRequest = match serde_json::from_str(&msg) {
            Ok(r) => r,
            Err(e) => {
                let _ = sender.send(error_frame(&e.to_string())).await;
                continue;
            }
        };

        let mut session =
            load_session(&state, &assistant, request.conversation_id.as_deref()).await;

        let mut stream = match assistant
            .reply_stream(&session.conversation, &request.message)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "Chat stream could not start");
                let _ = sender.send(error_frame(&e.user_message())).await;
                continue;
            }
        };

        let mut answer = String::new();
        let mut failed = false;
        while let Some(result) = stream.next().await {
            match result {
                Ok(chunk) => {
                    answer.push_str(&chunk.delta);
                    let frame = json!({
                        "type": "chunk",
                        "content": chunk.delta,
                        "done": chunk.done,
                        "conversation_id": session.id.as_str(),
                    });
                    if sender.send(Message::Text(frame.to_string().into())).await.is_err() {
                        return;
                    }
                    if chunk.done {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Chat stream failed");
                    let _ = sender.send(error_frame(&e.user_message())).await;
                    failed = true;
                    break;
                }
            }
        }

        if !failed && !answer.trim().is_empty() {
            assistant.record_exchange(&mut session.conversation, &request.message, &answer);
            save_session(&state, &mut session).await;
        }
    }
}

/// Create a hosted-checkout preference for the cart
pub async fn create_preference(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<CheckoutResponse>, PaymentError> {
    let payments = state.payments()?;
    let request: CheckoutRequest = parse_json(&body)?;
    payments.checkout.create(request).await.map(Json)
}

/// Direct card payment, body forwarded to the gateway
pub async fn process_payment(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, PaymentError> {
    let payments = state.payments()?;
    let body: Value = parse_json(&body)?;
    payments.checkout.process_payment(&body).await.map(Json)
}

/// Payment status for the storefront callback page
pub async fn check_payment_status(
    State(state): State<AppState>,
    query: Result<Query<StatusQuery>, QueryRejection>,
) -> Result<Json<StatusOutcome>, PaymentError> {
    let payments = state.payments()?;
    let query = query_params(query)?;
    payments.reconciler.resolve(&query).await.map(Json)
}

/// Mercado Pago notification receiver
pub async fn mercadopago_webhook(
    State(state): State<AppState>,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, PaymentError> {
    let payments = state.payments()?;
    let query = query_params(query)?;

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let notification = Notification::from_parts(
        &body,
        &query,
        header("x-signature"),
        header("x-request-id"),
    )?;

    let outcome = payments.notifications.handle(&notification).await?;
    tracing::debug!(?outcome, "Notification handled");

    Ok(Json(json!({ "status": "OK" })))
}
