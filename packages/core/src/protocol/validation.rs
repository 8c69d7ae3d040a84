// Валидация входящих envelope на границе десериализации

use crate::crypto::handshake::PrekeyHeader;
use crate::crypto::{SuiteID, AEAD_TAG_LENGTH, CLASSIC_SUITE_ID, NONCE_LENGTH, PUBLIC_KEY_LENGTH};
use crate::error::{EngineError, Result};
use crate::protocol::envelope::{EncryptedEnvelope, ENVELOPE_VERSION};

/// Suite'ы, которые движок умеет расшифровывать
pub const SUPPORTED_SUITES: &[SuiteID] = &[CLASSIC_SUITE_ID];

/// Поля envelope после декодирования wire-формата, ещё не проверенные
pub(crate) struct UncheckedEnvelope {
    pub version: u8,
    pub suite_id: SuiteID,
    pub ratchet_public_key: Vec<u8>,
    pub chain_length: u64,
    pub previous_chain_length: u64,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub prekey: Option<PrekeyHeader>,
}

fn malformed(reason: impl Into<String>) -> EngineError {
    EngineError::MalformedEnvelope(reason.into())
}

/// Проверить версию
pub fn validate_version(version: u8) -> Result<()> {
    if version != ENVELOPE_VERSION {
        return Err(malformed(format!(
            "unsupported version {} (expected {})",
            version, ENVELOPE_VERSION
        )));
    }
    Ok(())
}

/// Проверить, что suite известен
pub fn validate_suite(suite_id: SuiteID) -> Result<()> {
    if !SUPPORTED_SUITES.contains(&suite_id) {
        return Err(malformed(format!("unknown suite id {}", suite_id)));
    }
    Ok(())
}

/// Ratchet public key: ровно 32 байта
pub fn validate_ratchet_key(key: &[u8]) -> Result<[u8; PUBLIC_KEY_LENGTH]> {
    key.try_into().map_err(|_| {
        malformed(format!(
            "ratchet public key must be {} bytes, got {}",
            PUBLIC_KEY_LENGTH,
            key.len()
        ))
    })
}

pub fn validate_nonce(nonce: &[u8]) -> Result<()> {
    if nonce.len() != NONCE_LENGTH {
        return Err(malformed(format!(
            "nonce must be {} bytes, got {}",
            NONCE_LENGTH,
            nonce.len()
        )));
    }
    Ok(())
}

/// Ciphertext не короче authentication tag
pub fn validate_ciphertext(ciphertext: &[u8]) -> Result<()> {
    if ciphertext.len() < AEAD_TAG_LENGTH {
        return Err(malformed(format!(
            "ciphertext shorter than the {}-byte tag",
            AEAD_TAG_LENGTH
        )));
    }
    Ok(())
}

/// Полная проверка, на выходе доменный тип
pub(crate) fn validate_envelope(raw: UncheckedEnvelope) -> Result<EncryptedEnvelope> {
    validate_version(raw.version)?;
    validate_suite(raw.suite_id)?;
    let ratchet_public_key = validate_ratchet_key(&raw.ratchet_public_key)?;
    validate_nonce(&raw.nonce)?;
    validate_ciphertext(&raw.ciphertext)?;

    Ok(EncryptedEnvelope {
        version: raw.version,
        suite_id: raw.suite_id,
        ratchet_public_key,
        chain_length: raw.chain_length,
        previous_chain_length: raw.previous_chain_length,
        nonce: raw.nonce,
        ciphertext: raw.ciphertext,
        prekey: raw.prekey,
    })
}
