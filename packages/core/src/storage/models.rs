// Модели данных для хранилища

use crate::delivery::ConversationId;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Расшифрованное сообщение в хранилище
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message_id: String,
    pub conversation_id: ConversationId, // Группировка по беседе
    pub sender_id: String,
    #[serde(with = "serde_bytes")]
    pub plaintext: Vec<u8>,
    pub timestamp: i64,
}

/// Signed prekey в сериализуемом виде
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct StoredSignedPrekey {
    pub id: u32,
    pub private_key: Vec<u8>,
    pub signature: Vec<u8>,
    pub created_at: i64,
}

/// One-time prekey в сериализуемом виде
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct StoredOneTimePrekey {
    pub id: u32,
    pub private_key: Vec<u8>,
}

/// Приватный материал KeyStore (НЕ ЗАШИФРОВАН, см. master_key для sealing)
///
/// Публичные ключи не хранятся: они выводятся из приватных при загрузке.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct StoredKeyMaterial {
    pub suite_id: u16,
    pub identity_signing_private: Vec<u8>,
    pub identity_agreement_private: Vec<u8>,
    pub signed_prekey: Option<StoredSignedPrekey>,
    pub previous_signed_prekeys: Vec<StoredSignedPrekey>,
    pub one_time_prekeys: Vec<StoredOneTimePrekey>,
    pub consumed_one_time_prekeys: Vec<u32>,
    pub next_signed_prekey_id: u32,
    pub next_one_time_prekey_id: u32,
}

impl std::fmt::Debug for StoredKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredKeyMaterial")
            .field("suite_id", &self.suite_id)
            .field("one_time_prekeys", &self.one_time_prekeys.len())
            .field("consumed_one_time_prekeys", &self.consumed_one_time_prekeys.len())
            .finish_non_exhaustive()
    }
}
