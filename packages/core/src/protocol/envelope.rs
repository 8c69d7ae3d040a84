// Зашифрованное сообщение (доменный тип, не зависит от wire-кодировки)

use crate::crypto::handshake::PrekeyHeader;
use crate::crypto::{SuiteID, PUBLIC_KEY_LENGTH};

/// Текущая версия формата envelope
pub const ENVELOPE_VERSION: u8 = 1;

/// Один зашифрованный message плюс всё, что нужно для его расшифровки.
///
/// Создаётся `RatchetEngine::encrypt`, после этого не меняется.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    pub version: u8,
    pub suite_id: SuiteID,

    /// Текущий ratchet public key отправителя
    pub ratchet_public_key: [u8; PUBLIC_KEY_LENGTH],

    /// Номер сообщения в текущей send chain отправителя
    pub chain_length: u64,

    /// Длина предыдущей send chain отправителя
    pub previous_chain_length: u64,

    pub nonce: Vec<u8>,

    /// Ciphertext с authentication tag
    pub ciphertext: Vec<u8>,

    /// Есть только у инициатора, пока он не получил ответ
    pub prekey: Option<PrekeyHeader>,
}

impl EncryptedEnvelope {
    /// Associated data для AEAD:
    /// `suite_id (2, BE) || ratchet_public_key (32) || chain_length (8, BE) || previous_chain_length (8, BE)`
    pub fn associated_data(&self) -> Vec<u8> {
        associated_data(
            self.suite_id,
            &self.ratchet_public_key,
            self.chain_length,
            self.previous_chain_length,
        )
    }
}

pub(crate) fn associated_data(
    suite_id: SuiteID,
    ratchet_public_key: &[u8],
    chain_length: u64,
    previous_chain_length: u64,
) -> Vec<u8> {
    let mut ad = Vec::with_capacity(2 + ratchet_public_key.len() + 8 + 8);
    ad.extend_from_slice(&suite_id.to_be_bytes());
    ad.extend_from_slice(ratchet_public_key);
    ad.extend_from_slice(&chain_length.to_be_bytes());
    ad.extend_from_slice(&previous_chain_length.to_be_bytes());
    ad
}
