//! # Edge Functions
//!
//! Server-side handlers behind `/functions/v1`:
//!
//! - `ai-assistant`: coaching chat with rate limits and daily quotas
//! - `payment-webhook/{gateway}`: MercadoPago and Stripe notifications
//!
//! Both share the premium directory; a confirmed payment raises the
//! assistant's daily limit.

pub mod assistant;
pub mod conversation;
pub mod errors;
pub mod model;
pub mod payments;
pub mod usage;

pub use assistant::{AssistantConfig, AssistantReply, AssistantRequest, AssistantService};
pub use errors::{AssistantError, AssistantResult, PaymentError, PaymentResult};
pub use model::{ChatMessage, ChatModel, OpenAiChatModel, OpenAiConfig};
pub use payments::{
    Gateway, PaymentEvent, PaymentLedger, PaymentService, PaymentStatus, PaymentsConfig,
    WebhookOutcome,
};
pub use usage::PremiumDirectory;
