use crate::crypto::provider::CryptoProvider;
use crate::crypto::{SuiteID, AEAD_KEY_LENGTH, CLASSIC_SUITE_ID, NONCE_LENGTH, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use crate::error::CryptoError;
use chacha20poly1305::{
    aead::{Aead, Payload},
    ChaCha20Poly1305, Key as AeadKeyChacha, KeyInit, Nonce,
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand_core::RngCore;
use sha2::Sha256;
use std::fmt;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const ROOT_KDF_INFO: &[u8] = b"courier-ratchet-root";
const CHAIN_KDF_INFO: &[u8] = b"courier-ratchet-chain";

/// Owned secret bytes, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for SecretBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes(<{} bytes redacted>)", self.0.len())
    }
}

fn fixed<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N], CryptoError> {
    bytes.try_into().map_err(|_| {
        CryptoError::InvalidInputError(format!("Invalid {} length: expected {}, got {}", what, N, bytes.len()))
    })
}

/// Concrete implementation of `CryptoProvider` for the classic suite:
/// X25519, Ed25519, ChaCha20-Poly1305, HKDF-SHA256.
pub struct ClassicSuiteProvider;

impl CryptoProvider for ClassicSuiteProvider {
    type AgreementPublicKey = Vec<u8>;
    type SignaturePublicKey = Vec<u8>;
    type AgreementPrivateKey = SecretBytes;
    type SignaturePrivateKey = SecretBytes;
    type AeadKey = SecretBytes;

    fn generate_agreement_keys() -> Result<(Self::AgreementPrivateKey, Self::AgreementPublicKey), CryptoError> {
        let private_key = StaticSecret::random_from_rng(OsRng);
        let public_key = X25519PublicKey::from(&private_key);
        Ok((
            SecretBytes::new(private_key.to_bytes().to_vec()),
            public_key.to_bytes().to_vec(),
        ))
    }

    fn agreement_public_from_private(
        private_key: &Self::AgreementPrivateKey,
    ) -> Result<Self::AgreementPublicKey, CryptoError> {
        let bytes = Zeroizing::new(fixed::<PUBLIC_KEY_LENGTH>(private_key.as_ref(), "agreement private key")?);
        let static_secret = StaticSecret::from(*bytes);
        Ok(X25519PublicKey::from(&static_secret).to_bytes().to_vec())
    }

    fn agreement_public_key_from_bytes(bytes: Vec<u8>) -> Result<Self::AgreementPublicKey, CryptoError> {
        fixed::<PUBLIC_KEY_LENGTH>(&bytes, "agreement public key")?;
        Ok(bytes)
    }

    fn agreement_private_key_from_bytes(bytes: Vec<u8>) -> Result<Self::AgreementPrivateKey, CryptoError> {
        let secret = SecretBytes::new(bytes);
        fixed::<PUBLIC_KEY_LENGTH>(secret.as_ref(), "agreement private key")?.zeroize();
        Ok(secret)
    }

    fn diffie_hellman(
        private_key: &Self::AgreementPrivateKey,
        public_key: &Self::AgreementPublicKey,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let secret_bytes = Zeroizing::new(fixed::<PUBLIC_KEY_LENGTH>(private_key.as_ref(), "agreement private key")?);
        let public_bytes = fixed::<PUBLIC_KEY_LENGTH>(public_key.as_ref(), "agreement public key")?;

        let static_secret = StaticSecret::from(*secret_bytes);
        let shared = static_secret.diffie_hellman(&X25519PublicKey::from(public_bytes));
        if !shared.was_contributory() {
            return Err(CryptoError::KeyAgreementError(
                "Non-contributory shared secret (low-order public key)".to_string(),
            ));
        }
        Ok(Zeroizing::new(shared.as_bytes().to_vec()))
    }

    fn generate_signature_keys() -> Result<(Self::SignaturePrivateKey, Self::SignaturePublicKey), CryptoError> {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Ok((
            SecretBytes::new(signing_key.to_bytes().to_vec()),
            verifying_key.to_bytes().to_vec(),
        ))
    }

    fn signature_public_from_private(
        private_key: &Self::SignaturePrivateKey,
    ) -> Result<Self::SignaturePublicKey, CryptoError> {
        let bytes = Zeroizing::new(fixed::<32>(private_key.as_ref(), "signing key")?);
        let signing_key = SigningKey::from_bytes(&bytes);
        Ok(signing_key.verifying_key().to_bytes().to_vec())
    }

    fn signature_public_key_from_bytes(bytes: Vec<u8>) -> Result<Self::SignaturePublicKey, CryptoError> {
        let vk_bytes = fixed::<32>(&bytes, "verifying key")?;
        VerifyingKey::from_bytes(&vk_bytes)
            .map_err(|e| CryptoError::InvalidInputError(format!("Invalid verifying key: {}", e)))?;
        Ok(bytes)
    }

    fn signature_private_key_from_bytes(bytes: Vec<u8>) -> Result<Self::SignaturePrivateKey, CryptoError> {
        let secret = SecretBytes::new(bytes);
        fixed::<32>(secret.as_ref(), "signing key")?.zeroize();
        Ok(secret)
    }

    fn sign(private_key: &Self::SignaturePrivateKey, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let bytes = Zeroizing::new(fixed::<32>(private_key.as_ref(), "signing key")?);
        let signing_key = SigningKey::from_bytes(&bytes);
        Ok(signing_key.sign(message).to_bytes().to_vec())
    }

    fn verify(
        public_key: &Self::SignaturePublicKey,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), CryptoError> {
        let vk_bytes = fixed::<32>(public_key.as_ref(), "verifying key")?;
        let verifying_key = VerifyingKey::from_bytes(&vk_bytes)
            .map_err(|e| CryptoError::InvalidInputError(format!("Invalid verifying key: {}", e)))?;

        let sig_bytes = fixed::<SIGNATURE_LENGTH>(signature, "signature")?;
        let signature_obj = Signature::from_bytes(&sig_bytes);

        verifying_key
            .verify(message, &signature_obj)
            .map_err(|e| CryptoError::SignatureVerificationError(e.to_string()))
    }

    fn aead_key_from_bytes(bytes: Vec<u8>) -> Result<Self::AeadKey, CryptoError> {
        let secret = SecretBytes::new(bytes);
        fixed::<AEAD_KEY_LENGTH>(secret.as_ref(), "AEAD key")?.zeroize();
        Ok(secret)
    }

    fn aead_encrypt(
        key: &Self::AeadKey,
        nonce: &[u8],
        plaintext: &[u8],
        associated_data: Option<&[u8]>,
    ) -> Result<Vec<u8>, CryptoError> {
        if key.as_ref().len() != AEAD_KEY_LENGTH || nonce.len() != NONCE_LENGTH {
            return Err(CryptoError::InvalidInputError("Invalid AEAD key or nonce length".to_string()));
        }
        let cipher = ChaCha20Poly1305::new(AeadKeyChacha::from_slice(key.as_ref()));
        let payload = Payload {
            msg: plaintext,
            aad: associated_data.unwrap_or(b""),
        };

        cipher
            .encrypt(Nonce::from_slice(nonce), payload)
            .map_err(|e| CryptoError::AeadEncryptionError(e.to_string()))
    }

    fn aead_decrypt(
        key: &Self::AeadKey,
        nonce: &[u8],
        ciphertext: &[u8],
        associated_data: Option<&[u8]>,
    ) -> Result<Vec<u8>, CryptoError> {
        if key.as_ref().len() != AEAD_KEY_LENGTH || nonce.len() != NONCE_LENGTH {
            return Err(CryptoError::InvalidInputError("Invalid AEAD key or nonce length".to_string()));
        }
        let cipher = ChaCha20Poly1305::new(AeadKeyChacha::from_slice(key.as_ref()));
        let payload = Payload {
            msg: ciphertext,
            aad: associated_data.unwrap_or(b""),
        };

        cipher
            .decrypt(Nonce::from_slice(nonce), payload)
            .map_err(|e| CryptoError::AeadDecryptionError(e.to_string()))
    }

    fn hkdf_derive_key(
        salt: &[u8],
        ikm: &[u8],
        info: &[u8],
        len: usize,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let hkdf = Hkdf::<Sha256>::new(Some(salt), ikm);
        let mut okm = Zeroizing::new(vec![0u8; len]);
        hkdf.expand(info, &mut okm)
            .map_err(|e| CryptoError::KeyDerivationError(e.to_string()))?;
        Ok(okm)
    }

    fn kdf_rk(
        root_key: &Self::AeadKey,
        dh_output: &[u8],
    ) -> Result<(Self::AeadKey, Self::AeadKey), CryptoError> {
        let output = Self::hkdf_derive_key(root_key.as_ref(), dh_output, ROOT_KDF_INFO, 64)?;
        Ok((
            SecretBytes::new(output[..32].to_vec()),
            SecretBytes::new(output[32..].to_vec()),
        ))
    }

    fn kdf_ck(chain_key: &Self::AeadKey) -> Result<(Self::AeadKey, Self::AeadKey), CryptoError> {
        let output = Self::hkdf_derive_key(chain_key.as_ref(), b"", CHAIN_KDF_INFO, 64)?;
        Ok((
            SecretBytes::new(output[..32].to_vec()),
            SecretBytes::new(output[32..].to_vec()),
        ))
    }

    fn generate_nonce(len: usize) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = vec![0u8; len];
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|e| CryptoError::NonceGenerationError(e.to_string()))?;
        Ok(nonce_bytes)
    }

    fn nonce_length() -> usize {
        NONCE_LENGTH
    }

    fn suite_id() -> SuiteID {
        CLASSIC_SUITE_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type P = ClassicSuiteProvider;

    #[test]
    fn test_dh_agreement_is_symmetric() {
        let (a_priv, a_pub) = P::generate_agreement_keys().unwrap();
        let (b_priv, b_pub) = P::generate_agreement_keys().unwrap();

        let ab = P::diffie_hellman(&a_priv, &b_pub).unwrap();
        let ba = P::diffie_hellman(&b_priv, &a_pub).unwrap();
        assert_eq!(*ab, *ba);
        assert_eq!(P::agreement_public_from_private(&a_priv).unwrap(), a_pub);
    }

    #[test]
    fn test_dh_rejects_low_order_point() {
        let (a_priv, _) = P::generate_agreement_keys().unwrap();
        let zero_point = vec![0u8; 32];
        let result = P::diffie_hellman(&a_priv, &zero_point);
        assert!(matches!(result, Err(CryptoError::KeyAgreementError(_))));
    }

    #[test]
    fn test_sign_and_verify() {
        let (sk, vk) = P::generate_signature_keys().unwrap();
        let sig = P::sign(&sk, b"prekey bytes").unwrap();
        assert_eq!(sig.len(), SIGNATURE_LENGTH);
        assert!(P::verify(&vk, b"prekey bytes", &sig).is_ok());
        assert!(matches!(
            P::verify(&vk, b"other bytes", &sig),
            Err(CryptoError::SignatureVerificationError(_))
        ));
    }

    #[test]
    fn test_aead_binds_associated_data() {
        let key = P::aead_key_from_bytes(vec![7u8; 32]).unwrap();
        let nonce = P::generate_nonce(P::nonce_length()).unwrap();
        let ct = P::aead_encrypt(&key, &nonce, b"hello", Some(b"header")).unwrap();

        assert_eq!(P::aead_decrypt(&key, &nonce, &ct, Some(b"header")).unwrap(), b"hello");
        assert!(P::aead_decrypt(&key, &nonce, &ct, Some(b"tampered")).is_err());
    }

    #[test]
    fn test_chain_kdf_outputs_differ() {
        let ck = P::aead_key_from_bytes(vec![1u8; 32]).unwrap();
        let (mk, next) = P::kdf_ck(&ck).unwrap();
        assert_ne!(mk.as_ref(), next.as_ref());
        assert_ne!(next.as_ref(), ck.as_ref());

        // Детерминированность
        let (mk2, _) = P::kdf_ck(&ck).unwrap();
        assert_eq!(mk.as_ref(), mk2.as_ref());
    }

    #[test]
    fn test_invalid_lengths_rejected() {
        assert!(P::agreement_public_key_from_bytes(vec![0u8; 31]).is_err());
        assert!(P::aead_key_from_bytes(vec![0u8; 16]).is_err());
        assert!(P::signature_private_key_from_bytes(vec![0u8; 33]).is_err());
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let key = P::aead_key_from_bytes(vec![0xAB; 32]).unwrap();
        let rendered = format!("{:?}", key);
        assert!(!rendered.contains("171"));
        assert!(rendered.contains("redacted"));
    }
}
