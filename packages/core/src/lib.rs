// Courier Core
// End-to-end encrypted messaging engine: X3DH sessions, Double Ratchet, duplicate-free delivery

#![warn(clippy::all)]

// Модули
pub mod api;
pub mod config;
pub mod crypto;
pub mod delivery;
pub mod error;
pub mod protocol;
pub mod storage;
pub mod utils;

// Re-exports для удобства
pub use api::Engine;
pub use config::Config;
pub use crypto::handshake::PublicKeyBundle;
pub use crypto::keys::KeyStore;
pub use crypto::master_key::SealedKeyMaterial;
pub use crypto::ClassicSuiteProvider;
pub use delivery::{ConversationId, InboundOutcome};
pub use error::{EngineError, ErrorClass, Result};
pub use protocol::{EncryptedEnvelope, EnvelopeCodec, WireFormat};
