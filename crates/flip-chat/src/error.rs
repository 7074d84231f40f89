//! Error Types

use thiserror::Error;

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Chat error types
#[derive(Error, Debug)]
pub enum ChatError {
    /// LLM provider returned an error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider unavailable or not responding
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider answered but produced no usable text
    #[error("Empty response from provider")]
    EmptyResponse,

    /// Request was rejected before reaching the provider
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Context length exceeded
    #[error("Context length exceeded: {used} tokens (max: {max})")]
    ContextOverflow { used: u32, max: u32 },

    /// Session error
    #[error("Session error: {0}")]
    Session(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limited by the provider
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Authentication failed (bad API key)
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl ChatError {
    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable(_) | Self::RateLimited(_) | Self::EmptyResponse
        )
    }

    /// Message shown in the chat widget
    pub fn user_message(&self) -> String {
        match self {
            Self::ProviderUnavailable(_) | Self::EmptyResponse => {
                "El asistente no está disponible en este momento. Intenta de nuevo.".into()
            }
            Self::InvalidRequest(msg) => format!("Solicitud inválida: {msg}"),
            Self::ContextOverflow { .. } => {
                "La conversación es demasiado larga. Inicia una nueva.".into()
            }
            Self::RateLimited(_) => "Demasiadas solicitudes. Espera un momento.".into(),
            _ => "Lo siento, tuve un problema al procesar tu mensaje. Por favor intenta de nuevo."
                .into(),
        }
    }
}

impl From<anyhow::Error> for ChatError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
