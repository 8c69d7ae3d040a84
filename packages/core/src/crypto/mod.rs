//! Криптографический модуль
//!
//! # Архитектура
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Engine (api::Engine)                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 SessionManager (session_manager)            │
//! │  - Одна RatchetState на собеседника                         │
//! │  - Отдельный lock на каждого собеседника                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                ┌─────────────┴─────────────┐
//!                ▼                           ▼
//! ┌───────────────────────────┐  ┌──────────────────────────┐
//! │   Handshake (X3DH)        │  │  RatchetEngine (DR)      │
//! │  - проверка bundle        │  │  - Double Ratchet        │
//! │  - DH1..DH4 → root key    │  │  - skipped keys          │
//! └───────────────────────────┘  └──────────────────────────┘
//!                │                           │
//!                └─────────────┬─────────────┘
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │         KeyStore (keys)  +  CryptoProvider (provider)       │
//! │  - X25519 / Ed25519 / ChaCha20-Poly1305 / HKDF-SHA256       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Модули
//!
//! - [`provider`]: CryptoProvider trait для crypto-agility
//! - [`suites`]: Реализации CryptoProvider (Classic)
//! - [`keys`]: KeyStore для identity и prekeys
//! - [`master_key`]: шифрование identity паролем (backup/restore)
//! - [`handshake`]: X3DH
//! - [`messaging`]: Double Ratchet
//! - [`session_manager`]: реестр сессий

pub mod provider;

pub mod suites;

pub mod keys;

pub mod master_key;

pub mod handshake;

pub mod messaging;

pub mod session_manager;

// ============================================================================
// Re-exports для удобства
// ============================================================================

pub use provider::CryptoProvider;
pub use suites::classic::ClassicSuiteProvider;

pub type SuiteID = u16;

/// Suite ID for the classic suite
pub const CLASSIC_SUITE_ID: SuiteID = 1;

/// X25519 public/private key and Ed25519 key length
pub const PUBLIC_KEY_LENGTH: usize = 32;
pub const AEAD_KEY_LENGTH: usize = 32;
pub const NONCE_LENGTH: usize = 12;
pub const AEAD_TAG_LENGTH: usize = 16;
pub const SIGNATURE_LENGTH: usize = 64;
