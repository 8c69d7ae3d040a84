// In-memory storage для тестов и встраивания без диска

use crate::delivery::ConversationId;
use crate::error::StoreError;
use crate::storage::models::*;
use crate::storage::{IdentityStorage, LocalStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
struct Inner {
    identity: Option<StoredKeyMaterial>,
    messages: Vec<StoredMessage>,
    message_ids: HashSet<String>,
}

/// In-memory хранилище: реализует и LocalStore, и IdentityStorage
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
    append_calls: AtomicUsize,
    fail_appends: AtomicBool,
    fail_identity_saves: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Сколько раз вызывался `append` (включая неудачные)
    pub fn append_count(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    /// Заставить последующие `append` падать с `StoreError::Backend`
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Заставить последующие `save_identity` падать с `StoreError::Backend`
    pub fn set_fail_identity_saves(&self, fail: bool) {
        self.fail_identity_saves.store(fail, Ordering::SeqCst);
    }

    // === Сообщения ===

    pub fn messages_for_conversation(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
        offset: usize,
    ) -> Vec<StoredMessage> {
        let inner = self.inner.lock();
        let mut messages: Vec<StoredMessage> = inner
            .messages
            .iter()
            .filter(|m| &m.conversation_id == conversation_id)
            .cloned()
            .collect();

        // Сортировка по timestamp, порядок вставки сохраняется при равенстве
        messages.sort_by_key(|m| m.timestamp);

        // Пагинация
        messages.into_iter().skip(offset).take(limit).collect()
    }

    pub fn message_count(&self) -> usize {
        self.inner.lock().messages.len()
    }

    // === Утилиты ===

    pub fn clear_all(&self) {
        let mut inner = self.inner.lock();
        inner.identity = None;
        inner.messages.clear();
        inner.message_ids.clear();
    }
}

#[async_trait]
impl LocalStore for MemoryStorage {
    async fn append(&self, message: StoredMessage) -> Result<(), StoreError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("append disabled".to_string()));
        }

        let mut inner = self.inner.lock();
        inner.message_ids.insert(message.message_id.clone());
        inner.messages.push(message);
        Ok(())
    }

    async fn exists(&self, message_id: &str) -> Result<bool, StoreError> {
        Ok(self.inner.lock().message_ids.contains(message_id))
    }
}

impl IdentityStorage for MemoryStorage {
    fn save_identity(&self, material: &StoredKeyMaterial) -> Result<(), StoreError> {
        if self.fail_identity_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("identity save disabled".to_string()));
        }
        self.inner.lock().identity = Some(material.clone());
        Ok(())
    }

    fn load_identity(&self) -> Result<Option<StoredKeyMaterial>, StoreError> {
        Ok(self.inner.lock().identity.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, conversation: ConversationId, timestamp: i64) -> StoredMessage {
        StoredMessage {
            message_id: id.to_string(),
            conversation_id: conversation,
            sender_id: "bob".to_string(),
            plaintext: b"hi".to_vec(),
            timestamp,
        }
    }

    #[tokio::test]
    async fn test_memory_storage_messages() {
        let storage = MemoryStorage::new();
        let conv = ConversationId::derive("alice", "bob");
        let other = ConversationId::derive("alice", "carol");

        storage.append(message("msg2", conv, 200)).await.unwrap();
        storage.append(message("msg1", conv, 100)).await.unwrap();
        storage.append(message("msg3", other, 150)).await.unwrap();

        let messages = storage.messages_for_conversation(&conv, 10, 0);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].message_id, "msg1"); // Сортировка по timestamp
        assert_eq!(messages[1].message_id, "msg2");

        let page = storage.messages_for_conversation(&conv, 1, 1);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].message_id, "msg2");

        assert!(storage.exists("msg3").await.unwrap());
        assert!(!storage.exists("msg4").await.unwrap());
        assert_eq!(storage.append_count(), 3);
    }

    #[tokio::test]
    async fn test_failed_append_is_counted_but_not_stored() {
        let storage = MemoryStorage::new();
        storage.set_fail_appends(true);

        let conv = ConversationId::derive("alice", "bob");
        assert!(storage.append(message("msg1", conv, 1)).await.is_err());
        assert_eq!(storage.append_count(), 1);
        assert!(!storage.exists("msg1").await.unwrap());
    }

    #[test]
    fn test_identity_roundtrip() {
        let storage = MemoryStorage::new();
        assert!(storage.load_identity().unwrap().is_none());

        let material = StoredKeyMaterial {
            suite_id: 1,
            identity_signing_private: vec![1; 32],
            identity_agreement_private: vec![2; 32],
            signed_prekey: None,
            previous_signed_prekeys: Vec::new(),
            one_time_prekeys: Vec::new(),
            consumed_one_time_prekeys: vec![4, 5],
            next_signed_prekey_id: 1,
            next_one_time_prekey_id: 6,
        };
        storage.save_identity(&material).unwrap();

        let loaded = storage.load_identity().unwrap().unwrap();
        assert_eq!(loaded.identity_agreement_private, vec![2; 32]);
        assert_eq!(loaded.consumed_one_time_prekeys, vec![4, 5]);

        storage.set_fail_identity_saves(true);
        let mut changed = material.clone();
        changed.next_one_time_prekey_id = 9;
        assert!(storage.save_identity(&changed).is_err());
        assert_eq!(storage.load_identity().unwrap().unwrap().next_one_time_prekey_id, 6);
    }
}
