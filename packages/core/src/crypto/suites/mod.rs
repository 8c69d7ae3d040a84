//! Криптографические наборы (Crypto Suites)
//!
//! ### Classic Suite
//! - **Key agreement**: X25519
//! - **Signatures**: Ed25519
//! - **AEAD**: ChaCha20-Poly1305
//! - **KDF**: HKDF-SHA256
//! - **Suite ID**: 1
//!
//! ```rust
//! use courier_core::crypto::suites::classic::ClassicSuiteProvider;
//! use courier_core::crypto::provider::CryptoProvider;
//!
//! let (private_key, public_key) = ClassicSuiteProvider::generate_agreement_keys().unwrap();
//! assert_eq!(ClassicSuiteProvider::agreement_public_from_private(&private_key).unwrap(), public_key);
//! ```

pub mod classic;
