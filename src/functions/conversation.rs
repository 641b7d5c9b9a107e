//! # Conversation Store
//!
//! Assistant conversations, owned by the user who started them. Only the
//! most recent messages are kept.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::errors::{AssistantError, AssistantResult};
use super::model::ChatMessage;

/// A conversation between one user and the assistant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: Uuid,
    pub thread_id: String,
    pub owner: Uuid,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// In-memory conversation store
#[derive(Debug)]
pub struct ConversationStore {
    max_history: usize,
    conversations: RwLock<HashMap<Uuid, Conversation>>,
}

impl ConversationStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history,
            conversations: RwLock::new(HashMap::new()),
        }
    }

    /// Start an empty conversation
    pub fn start(&self, owner: Uuid, now: DateTime<Utc>) -> Conversation {
        let conversation = Conversation {
            id: Uuid::new_v4(),
            thread_id: format!("thread_{}", Uuid::new_v4().simple()),
            owner,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        self.conversations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(conversation.id, conversation.clone());

        conversation
    }

    /// Fetch a conversation owned by `owner`
    ///
    /// Someone else's conversation is reported as not found.
    pub fn get(&self, id: &str, owner: Uuid) -> AssistantResult<Conversation> {
        let not_found = || AssistantError::ConversationNotFound(id.to_string());
        let id = Uuid::parse_str(id).map_err(|_| not_found())?;

        self.conversations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .filter(|c| c.owner == owner)
            .cloned()
            .ok_or_else(not_found)
    }

    /// Append an exchange, dropping the oldest messages beyond the bound
    pub fn append(
        &self,
        id: Uuid,
        exchange: [ChatMessage; 2],
        now: DateTime<Utc>,
    ) -> AssistantResult<()> {
        let mut conversations = self
            .conversations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let conversation = conversations
            .get_mut(&id)
            .ok_or_else(|| AssistantError::ConversationNotFound(id.to_string()))?;

        conversation.messages.extend(exchange);
        let excess = conversation.messages.len().saturating_sub(self.max_history);
        conversation.messages.drain(..excess);
        conversation.updated_at = now;

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.conversations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
