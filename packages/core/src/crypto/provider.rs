//! Defines the CryptoProvider trait for crypto-agility.

use crate::crypto::SuiteID;
use crate::error::CryptoError;
use core::fmt::Debug;
use zeroize::{Zeroize, Zeroizing};

/// Trait that formalizes all cryptographic operations for a specific cipher suite.
///
/// Everything above this trait (handshake, ratchet, key store) is generic over it,
/// so a new suite only has to provide these primitives.
pub trait CryptoProvider: Send + Sync + 'static {
    // Public halves can be logged (as fingerprints), compared and cloned freely.
    type AgreementPublicKey: AsRef<[u8]> + Debug + Clone + PartialEq + Send + Sync + 'static;
    type SignaturePublicKey: AsRef<[u8]> + Debug + Clone + PartialEq + Send + Sync + 'static;

    // Secret halves are wiped on drop and never implement a revealing Debug.
    type AgreementPrivateKey: AsRef<[u8]> + Debug + Clone + Zeroize + Send + Sync + 'static;
    type SignaturePrivateKey: AsRef<[u8]> + Debug + Clone + Zeroize + Send + Sync + 'static;
    type AeadKey: AsRef<[u8]> + Debug + Clone + Zeroize + Send + Sync + 'static;

    /// Generates a new key-agreement key pair.
    fn generate_agreement_keys(
    ) -> Result<(Self::AgreementPrivateKey, Self::AgreementPublicKey), CryptoError>;

    /// Derives a key-agreement public key from its private key.
    fn agreement_public_from_private(
        private_key: &Self::AgreementPrivateKey,
    ) -> Result<Self::AgreementPublicKey, CryptoError>;

    /// Parses a key-agreement public key, validating its length.
    fn agreement_public_key_from_bytes(bytes: Vec<u8>) -> Result<Self::AgreementPublicKey, CryptoError>;

    /// Parses a key-agreement private key, validating its length.
    fn agreement_private_key_from_bytes(bytes: Vec<u8>) -> Result<Self::AgreementPrivateKey, CryptoError>;

    /// Computes a Diffie-Hellman shared secret.
    ///
    /// Fails on a non-contributory result (low-order peer key).
    fn diffie_hellman(
        private_key: &Self::AgreementPrivateKey,
        public_key: &Self::AgreementPublicKey,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError>;

    /// Generates a new signature key pair.
    fn generate_signature_keys(
    ) -> Result<(Self::SignaturePrivateKey, Self::SignaturePublicKey), CryptoError>;

    /// Derives a signature public key from its private key.
    fn signature_public_from_private(
        private_key: &Self::SignaturePrivateKey,
    ) -> Result<Self::SignaturePublicKey, CryptoError>;

    fn signature_public_key_from_bytes(bytes: Vec<u8>) -> Result<Self::SignaturePublicKey, CryptoError>;

    fn signature_private_key_from_bytes(bytes: Vec<u8>) -> Result<Self::SignaturePrivateKey, CryptoError>;

    /// Signs a message with the given private key.
    fn sign(private_key: &Self::SignaturePrivateKey, message: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Verifies a signature with the given public key.
    fn verify(
        public_key: &Self::SignaturePublicKey,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), CryptoError>;

    fn aead_key_from_bytes(bytes: Vec<u8>) -> Result<Self::AeadKey, CryptoError>;

    /// Performs AEAD encryption.
    /// `associated_data` is authenticated but not encrypted.
    fn aead_encrypt(
        key: &Self::AeadKey,
        nonce: &[u8],
        plaintext: &[u8],
        associated_data: Option<&[u8]>,
    ) -> Result<Vec<u8>, CryptoError>;

    /// Performs AEAD decryption.
    fn aead_decrypt(
        key: &Self::AeadKey,
        nonce: &[u8],
        ciphertext: &[u8],
        associated_data: Option<&[u8]>,
    ) -> Result<Vec<u8>, CryptoError>;

    /// Derives `len` bytes from input key material using HKDF.
    fn hkdf_derive_key(
        salt: &[u8],
        ikm: &[u8],
        info: &[u8],
        len: usize,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError>;

    /// KDF_RK: derives a new root key and a chain key from the current root key and DH output.
    fn kdf_rk(
        root_key: &Self::AeadKey,
        dh_output: &[u8],
    ) -> Result<(Self::AeadKey, Self::AeadKey), CryptoError>;

    /// KDF_CK: derives a message key and the next chain key from the current chain key.
    ///
    /// Returns `(message_key, next_chain_key)`.
    fn kdf_ck(chain_key: &Self::AeadKey) -> Result<(Self::AeadKey, Self::AeadKey), CryptoError>;

    /// Generates a cryptographically secure random nonce of a specified length.
    fn generate_nonce(len: usize) -> Result<Vec<u8>, CryptoError>;

    /// Nonce length expected by `aead_encrypt`.
    fn nonce_length() -> usize;

    /// Returns the SuiteID associated with this CryptoProvider.
    fn suite_id() -> SuiteID;
}
