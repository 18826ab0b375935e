//! Conversation sessions persisted in the key-value store
//!
//! A session is stored as JSON under `session:{id}`. Appends within one
//! instance are serialized per session id, so message order is FIFO; once a
//! session exceeds `max_messages` the oldest messages are removed and handed
//! back as demoted so the caller can move them to long-term memory.

use crate::backend::{ChatMessage, KeyValueStore, Role};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub max_messages: usize,
    pub ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_messages: 20,
            ttl: Duration::from_secs(24 * 3600),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn to_chat(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
    /// Hash of the last query, the predecessor for transition observation
    pub last_query_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            messages: Vec::new(),
            last_query_hash: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Result of an append
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    /// Hash recorded before this append
    pub previous_query_hash: Option<String>,
    /// Oldest messages pushed out, in their original order
    pub demoted: Vec<Message>,
}

/// Demoted messages as (question, reply) turns; unpaired messages are dropped
pub fn pair_turns(messages: Vec<Message>) -> Vec<(Message, Message)> {
    let mut turns = Vec::new();
    let mut question: Option<Message> = None;
    for message in messages {
        match message.role {
            Role::User => question = Some(message),
            Role::Assistant => {
                if let Some(q) = question.take() {
                    turns.push((q, message));
                }
            }
            Role::System => question = None,
        }
    }
    turns
}

fn session_key(id: &str) -> String {
    format!("session:{}", id)
}

pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
    config: SessionConfig,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, config: SessionConfig) -> Self {
        Self {
            kv,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The stored session, or a fresh one if none exists
    pub async fn load(&self, id: &str) -> Result<Session> {
        match self.kv.get(&session_key(id)).await? {
            Some(json) => match serde_json::from_str(&json) {
                Ok(session) => Ok(session),
                Err(e) => {
                    warn!("Discarding unreadable session {}: {}", id, e);
                    Ok(Session::new(id))
                }
            },
            None => Ok(Session::new(id)),
        }
    }

    pub async fn history(&self, id: &str) -> Result<Vec<Message>> {
        Ok(self.load(id).await?.messages)
    }

    async fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Append messages and optionally record the latest query hash
    pub async fn append(
        &self,
        id: &str,
        messages: Vec<Message>,
        query_hash: Option<&str>,
    ) -> Result<AppendOutcome> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let mut session = self.load(id).await?;
        let previous_query_hash = session.last_query_hash.clone();

        session.messages.extend(messages);
        if let Some(hash) = query_hash {
            session.last_query_hash = Some(hash.to_string());
        }
        session.updated_at = Utc::now();

        let mut overflow = session
            .messages
            .len()
            .saturating_sub(self.config.max_messages);
        // Never keep a reply whose question was demoted.
        while overflow > 0
            && overflow < session.messages.len()
            && session.messages[overflow].role == Role::Assistant
        {
            overflow += 1;
        }
        let demoted: Vec<Message> = session.messages.drain(..overflow).collect();
        if !demoted.is_empty() {
            debug!("Session {} demoted {} messages", id, demoted.len());
        }

        let json = serde_json::to_string(&session)?;
        self.kv
            .set(&session_key(id), json, Some(self.config.ttl))
            .await?;

        Ok(AppendOutcome {
            previous_query_hash,
            demoted,
        })
    }
}
