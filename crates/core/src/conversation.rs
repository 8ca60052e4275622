use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::domain::feedback::UserId;
use crate::flows::ConversationState;

/// Per-user conversation state. Every user gets an independent slot; holding
/// a [`ConversationSlot`] serializes all transitions for that user while
/// other users proceed untouched.
#[derive(Clone, Default)]
pub struct ConversationStore {
    slots: Arc<RwLock<HashMap<UserId, Arc<Mutex<ConversationState>>>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to the user's conversation.
    pub async fn lock(&self, user_id: UserId) -> ConversationSlot {
        let slot = self.slot(user_id).await;
        ConversationSlot { user_id, guard: slot.lock_owned().await }
    }

    pub async fn get(&self, user_id: UserId) -> ConversationState {
        let existing = self.slots.read().await.get(&user_id).cloned();
        match existing {
            Some(slot) => slot.lock().await.clone(),
            None => ConversationState::Idle,
        }
    }

    pub async fn set(&self, user_id: UserId, state: ConversationState) {
        let mut slot = self.lock(user_id).await;
        slot.set(state);
        self.release(slot).await;
    }

    pub async fn clear(&self, user_id: UserId) {
        let mut slot = self.lock(user_id).await;
        slot.clear();
        self.release(slot).await;
    }

    /// Unlocks the slot and forgets the user once they are idle and nobody
    /// else is queued on their conversation.
    pub async fn release(&self, slot: ConversationSlot) {
        let ConversationSlot { user_id, guard } = slot;
        let idle = guard.is_idle();
        let cell = Arc::clone(OwnedMutexGuard::mutex(&guard));
        drop(guard);
        if !idle {
            return;
        }

        let mut slots = self.slots.write().await;
        let evictable = slots.get(&user_id).is_some_and(|existing| {
            // One reference held by the map, one by `cell`.
            Arc::ptr_eq(existing, &cell)
                && Arc::strong_count(&cell) == 2
                && existing.try_lock().is_ok_and(|state| state.is_idle())
        });
        if evictable {
            slots.remove(&user_id);
        }
    }

    #[cfg(test)]
    async fn tracked_users(&self) -> usize {
        self.slots.read().await.len()
    }

    async fn slot(&self, user_id: UserId) -> Arc<Mutex<ConversationState>> {
        if let Some(slot) = self.slots.read().await.get(&user_id) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(user_id).or_default())
    }
}

/// Exclusive handle on one user's conversation, released on drop.
pub struct ConversationSlot {
    user_id: UserId,
    guard: OwnedMutexGuard<ConversationState>,
}

impl ConversationSlot {
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn state(&self) -> &ConversationState {
        &self.guard
    }

    pub fn set(&mut self, state: ConversationState) {
        *self.guard = state;
    }

    pub fn clear(&mut self) {
        *self.guard = ConversationState::Idle;
    }
}
