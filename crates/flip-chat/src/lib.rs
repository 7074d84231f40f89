//! # flip-chat
//!
//! Chat layer behind the Flip site's assistant widget ("FlipBot").
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     ChatAssistant                         │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────┐   │
//! │  │ System prompt│  │ Conversation │──│  LlmProvider   │   │
//! │  │  (FlipBot)   │──│   history    │  │  (Strategy)    │   │
//! │  └──────────────┘  └──────────────┘  └────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` trait keeps the widget independent of the backing model
//! service; `flip-runtime` supplies the Gemini implementation.

pub mod assistant;
pub mod error;
pub mod message;
pub mod provider;
pub mod session;

pub use assistant::{AssistantConfig, ChatAssistant, FLIPBOT_GREETING, FLIPBOT_PROMPT};
pub use error::{ChatError, Result};
pub use message::{Conversation, Message, Role};
pub use provider::LlmProvider;
pub use session::{MemorySessionStore, Session, SessionId, SessionStore};
