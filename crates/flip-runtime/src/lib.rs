//! # flip-runtime
//!
//! Runtime providers for the Flip assistant.
//!
//! ## Providers
//!
//! - **Gemini** (default): Google generative-language REST API
//!
//! ## Usage
//!
//! ```rust,ignore
//! use flip_runtime::GeminiProvider;
//!
//! let provider = Arc::new(GeminiProvider::from_env()?);
//! let assistant = ChatAssistant::with_defaults(provider);
//! ```

#[cfg(feature = "gemini")]
pub mod gemini;

#[cfg(feature = "gemini")]
pub use gemini::{GeminiConfig, GeminiProvider};

// Re-export core types for convenience
pub use flip_chat::{ChatAssistant, ChatError, LlmProvider, Message, Result, Role};
