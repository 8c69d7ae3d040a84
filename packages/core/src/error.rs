// Типы ошибок движка

use thiserror::Error;

/// Ошибки криптографических примитивов (уровень CryptoProvider)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Failed to generate keys: {0}")]
    KeyGenerationError(String),
    #[error("Signing failed: {0}")]
    SigningError(String),
    #[error("Signature verification failed: {0}")]
    SignatureVerificationError(String),
    #[error("Key agreement failed: {0}")]
    KeyAgreementError(String),
    #[error("AEAD encryption failed: {0}")]
    AeadEncryptionError(String),
    #[error("AEAD decryption failed: {0}")]
    AeadDecryptionError(String),
    #[error("Key derivation failed: {0}")]
    KeyDerivationError(String),
    #[error("Nonce generation failed: {0}")]
    NonceGenerationError(String),
    #[error("Invalid input: {0}")]
    InvalidInputError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl From<chacha20poly1305::Error> for CryptoError {
    fn from(err: chacha20poly1305::Error) -> Self {
        CryptoError::AeadEncryptionError(err.to_string())
    }
}

impl From<ed25519_dalek::SignatureError> for CryptoError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        CryptoError::SigningError(err.to_string())
    }
}

impl From<rand::Error> for CryptoError {
    fn from(err: rand::Error) -> Self {
        CryptoError::KeyGenerationError(err.to_string()) // General RNG error
    }
}

/// Ошибки DirectoryClient (внешний коллаборатор)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("No bundle published for {0}")]
    NotFound(String),
    #[error("Directory unreachable: {0}")]
    Unreachable(String),
}

/// Ошибки LocalStore / IdentityStorage
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Storage backend failure: {0}")]
    Backend(String),
    #[error("Stored data is corrupted: {0}")]
    Corrupted(String),
}

/// Ошибки транспорта (push / poll / ack)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport unreachable: {0}")]
    Unreachable(String),
    #[error("Transport closed")]
    Closed,
}

/// Класс ошибки для решения о повторе
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Protocol violation or data corruption; retrying the same input cannot succeed.
    Fatal,
    /// Network-bound failure; the same operation may succeed later.
    Retryable,
    /// Well-formed message that could not be decrypted; ask the server to redeliver.
    Redeliverable,
}

/// Ошибки движка, видимые вызывающему коду
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No local identity loaded; generate or load one first")]
    NoIdentityLoaded,

    #[error("Public key bundle for {peer_id} is unavailable: {reason}")]
    MissingPeerBundle { peer_id: String, reason: String },

    #[error("Public key bundle for {peer_id} is invalid: {reason}")]
    InvalidPeerBundle { peer_id: String, reason: String },

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Chain position {requested} is beyond the skip window of {limit} messages")]
    ChainTooFarAhead { requested: u64, limit: u64 },

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("No session established with {0}")]
    SessionNotEstablished(String),

    #[error("Unknown or already consumed prekey: {0}")]
    UnknownPrekey(String),

    /// Handshake проиграл одновременной инициации; повторная доставка бесполезна
    #[error("Handshake from {0} was superseded by the local session")]
    SupersededHandshake(String),

    #[error("Operation timed out: {0}")]
    Timeout(&'static str),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Публикация в directory (получение bundle'а даёт MissingPeerBundle)
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::MissingPeerBundle { .. }
            | EngineError::Timeout(_)
            | EngineError::Storage(_)
            | EngineError::Transport(_)
            | EngineError::Directory(_) => ErrorClass::Retryable,
            EngineError::DecryptionFailed(_) | EngineError::SessionNotEstablished(_) => {
                ErrorClass::Redeliverable
            }
            EngineError::NoIdentityLoaded
            | EngineError::InvalidPeerBundle { .. }
            | EngineError::MalformedEnvelope(_)
            | EngineError::ChainTooFarAhead { .. }
            | EngineError::UnknownPrekey(_)
            | EngineError::SupersededHandshake(_)
            | EngineError::Crypto(_) => ErrorClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() != ErrorClass::Fatal
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
