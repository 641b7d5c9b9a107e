//! # AI Assistant
//!
//! Coaching assistant behind `POST /functions/v1/ai-assistant`.
//!
//! ## Request flow
//!
//! 1. Validate the message
//! 2. Resolve the given conversation (must be owned by the caller)
//! 3. Per-minute rate limit, then the daily quota (free or premium)
//! 4. Start a conversation if none was given
//! 5. Model call with the bounded history
//! 6. Charge the quota and record the exchange
//!
//! A failed model call charges nothing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::conversation::ConversationStore;
use super::errors::{AssistantError, AssistantResult};
use super::model::{ChatMessage, ChatModel};
use super::usage::{PremiumDirectory, RateLimiter, UsageTracker};
use crate::auth::AuthenticatedUser;
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};

/// Default coaching prompt
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a fitness coaching assistant. \
Help personal trainers plan workouts, progress students safely and answer \
questions about exercise technique and nutrition. Be concise and practical. \
Recommend a health professional for injuries or medical conditions.";

/// Assistant limits and prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantConfig {
    pub system_prompt: String,
    pub max_message_chars: usize,
    pub requests_per_minute: u32,
    pub free_daily_limit: u32,
    pub premium_daily_limit: u32,
    pub max_history: usize,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_message_chars: 4000,
            requests_per_minute: 10,
            free_daily_limit: 20,
            premium_daily_limit: 200,
            max_history: 20,
        }
    }
}

/// Request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Token and quota accounting returned with each reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub daily_count: u32,
    pub daily_limit: u32,
}

/// Response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantReply {
    pub response: String,
    pub conversation_id: Uuid,
    pub thread_id: String,
    pub usage: UsageReport,
}

/// Assistant service shared by the HTTP handlers
pub struct AssistantService {
    config: AssistantConfig,
    model: Arc<dyn ChatModel>,
    limiter: RateLimiter,
    usage: UsageTracker,
    conversations: ConversationStore,
    premium: Arc<PremiumDirectory>,
    metrics: Arc<MetricsRegistry>,
}

impl AssistantService {
    pub fn new(
        config: AssistantConfig,
        model: Arc<dyn ChatModel>,
        premium: Arc<PremiumDirectory>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            limiter: RateLimiter::per_minute(config.requests_per_minute),
            usage: UsageTracker::new(),
            conversations: ConversationStore::new(config.max_history),
            config,
            model,
            premium,
            metrics,
        }
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Daily limit for a user
    pub fn daily_limit(&self, user: Uuid) -> u32 {
        if self.premium.is_premium(user) {
            self.config.premium_daily_limit
        } else {
            self.config.free_daily_limit
        }
    }

    /// Answer a message
    pub async fn respond(
        &self,
        user: &AuthenticatedUser,
        request: AssistantRequest,
    ) -> AssistantResult<AssistantReply> {
        self.respond_at(user, request, Utc::now()).await
    }

    /// Answer a message as of `now`
    pub async fn respond_at(
        &self,
        user: &AuthenticatedUser,
        request: AssistantRequest,
        now: DateTime<Utc>,
    ) -> AssistantResult<AssistantReply> {
        self.metrics.increment_assistant_requests();

        let message = request.message.trim();
        if message.is_empty() {
            return Err(AssistantError::InvalidRequest("message is required".into()));
        }
        if message.chars().count() > self.config.max_message_chars {
            return Err(AssistantError::InvalidRequest(format!(
                "message exceeds {} characters",
                self.config.max_message_chars
            )));
        }

        let existing = match request.conversation_id.as_deref() {
            Some(id) => Some(self.conversations.get(id, user.id)?),
            None => None,
        };

        self.check_limits(user.id, now)?;

        let conversation = match existing {
            Some(conversation) => conversation,
            None => self.conversations.start(user.id, now),
        };

        let mut messages = Vec::with_capacity(conversation.messages.len() + 2);
        messages.push(ChatMessage::system(self.config.system_prompt.as_str()));
        messages.extend(conversation.messages.iter().cloned());
        messages.push(ChatMessage::user(message));

        let completion = match self.model.complete(&messages).await {
            Ok(completion) => completion,
            Err(e) => {
                log_event_with_fields(
                    Event::AssistantUpstreamFailed,
                    &[
                        ("model", self.model.name()),
                        ("reason", e.to_string().as_str()),
                        ("user", user.id.to_string().as_str()),
                    ],
                );
                return Err(match e {
                    AssistantError::Upstream(_) => e,
                    other => AssistantError::Upstream(other.to_string()),
                });
            }
        };

        let daily_count = self.usage.charge(user.id, now);
        self.conversations.append(
            conversation.id,
            [
                ChatMessage::user(message),
                ChatMessage::assistant(completion.content.as_str()),
            ],
            now,
        )?;

        let daily_limit = self.daily_limit(user.id);
        log_event_with_fields(
            Event::AssistantReply,
            &[
                ("conversation", conversation.id.to_string().as_str()),
                ("daily_count", daily_count.to_string().as_str()),
                ("total_tokens", completion.usage.total_tokens.to_string().as_str()),
                ("user", user.id.to_string().as_str()),
            ],
        );

        Ok(AssistantReply {
            response: completion.content,
            conversation_id: conversation.id,
            thread_id: conversation.thread_id,
            usage: UsageReport {
                prompt_tokens: completion.usage.prompt_tokens,
                completion_tokens: completion.usage.completion_tokens,
                total_tokens: completion.usage.total_tokens,
                daily_count,
                daily_limit,
            },
        })
    }

    fn check_limits(&self, user: Uuid, now: DateTime<Utc>) -> AssistantResult<()> {
        let result = self.limiter.try_acquire(user, now).and_then(|()| {
            let daily_count = self.usage.count(user, now);
            let daily_limit = self.daily_limit(user);
            if daily_count >= daily_limit {
                Err(AssistantError::DailyLimitExceeded {
                    daily_count,
                    daily_limit,
                    is_premium: self.premium.is_premium(user),
                })
            } else {
                Ok(())
            }
        });

        if let Err(e) = &result {
            self.metrics.increment_assistant_rejections();
            log_event_with_fields(
                Event::AssistantLimited,
                &[
                    ("reason", e.to_string().as_str()),
                    ("user", user.to_string().as_str()),
                ],
            );
        }

        result
    }
}
