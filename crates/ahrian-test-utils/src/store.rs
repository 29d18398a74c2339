use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::BoxFuture;

use ahrian_core::error::{AhrianError, Result};
use ahrian_core::traits::ConversationStore;
use ahrian_core::types::{Conversation, ConversationId, ConversationStatus};

/// In-memory [`ConversationStore`] that also records every save.
#[derive(Default)]
pub struct MemoryStore {
    conversations: Mutex<HashMap<ConversationId, Conversation>>,
    saves: Mutex<Vec<Conversation>>,
    failing: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose saves always fail.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn get(&self, id: &ConversationId) -> Option<Conversation> {
        self.conversations.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.conversations.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every saved copy of one conversation, in save order.
    pub fn snapshots(&self, id: &ConversationId) -> Vec<Conversation> {
        self.saves
            .lock()
            .unwrap()
            .iter()
            .filter(|saved| &saved.id == id)
            .cloned()
            .collect()
    }

    /// Status at each save of one conversation, in save order.
    pub fn saved_statuses(&self, id: &ConversationId) -> Vec<ConversationStatus> {
        self.snapshots(id).iter().map(|c| c.status).collect()
    }
}

impl ConversationStore for MemoryStore {
    fn save(&self, conversation: &Conversation) -> BoxFuture<'_, Result<()>> {
        let conversation = conversation.clone();
        Box::pin(async move {
            if self.failing {
                return Err(AhrianError::Database("store unavailable".into()));
            }
            self.saves.lock().unwrap().push(conversation.clone());
            self.conversations
                .lock()
                .unwrap()
                .insert(conversation.id.clone(), conversation);
            Ok(())
        })
    }

    fn load_all(&self) -> BoxFuture<'_, Result<Vec<Conversation>>> {
        Box::pin(async move {
            let mut all: Vec<Conversation> =
                self.conversations.lock().unwrap().values().cloned().collect();
            all.sort_by_key(|c| c.created_at);
            Ok(all)
        })
    }

    fn load(&self, id: &ConversationId) -> BoxFuture<'_, Result<Option<Conversation>>> {
        let id = id.clone();
        Box::pin(async move { Ok(self.get(&id)) })
    }

    fn delete(&self, id: &ConversationId) -> BoxFuture<'_, Result<bool>> {
        let id = id.clone();
        Box::pin(async move { Ok(self.conversations.lock().unwrap().remove(&id).is_some()) })
    }
}
