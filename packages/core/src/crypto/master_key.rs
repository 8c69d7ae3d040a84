// Шифрование приватного материала KeyStore паролем (backup/restore)
// PBKDF2 для деривации ключа + AES-256-GCM для шифрования

use crate::crypto::NONCE_LENGTH;
use crate::error::CryptoError;
use crate::storage::models::StoredKeyMaterial;
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

const KEY_LENGTH: usize = 32;
const SEAL_AAD: &[u8] = b"courier-sealed-identity-v1";

/// Зашифрованный пакет ключей, который можно хранить вне процесса
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedKeyMaterial {
    pub salt: Vec<u8>,
    pub iterations: u32,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// Деривировать ключ шифрования из пароля с использованием PBKDF2
pub fn derive_master_key(
    password: &str,
    salt: &[u8],
    iterations: u32,
) -> Result<Zeroizing<[u8; KEY_LENGTH]>, CryptoError> {
    if password.is_empty() {
        return Err(CryptoError::InvalidInputError("Password cannot be empty".to_string()));
    }
    if salt.is_empty() || iterations == 0 {
        return Err(CryptoError::InvalidInputError("Invalid PBKDF2 parameters".to_string()));
    }

    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut *key);
    Ok(key)
}

/// Генерировать случайную соль
pub fn generate_salt(len: usize) -> Result<Vec<u8>, CryptoError> {
    let mut salt = vec![0u8; len];
    rand::rngs::OsRng.try_fill_bytes(&mut salt)?;
    Ok(salt)
}

/// Зашифровать приватный материал
pub fn seal_key_material(
    material: &StoredKeyMaterial,
    password: &str,
    salt_length: usize,
    iterations: u32,
) -> Result<SealedKeyMaterial, CryptoError> {
    let salt = generate_salt(salt_length)?;
    let key = derive_master_key(password, &salt, iterations)?;
    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| CryptoError::InvalidInputError(e.to_string()))?;

    let plaintext = Zeroizing::new(
        bincode::serialize(material).map_err(|e| CryptoError::SerializationError(e.to_string()))?,
    );

    let mut nonce = vec![0u8; NONCE_LENGTH];
    rand::rngs::OsRng.try_fill_bytes(&mut nonce)?;

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: &plaintext,
                aad: SEAL_AAD,
            },
        )
        .map_err(|e| CryptoError::AeadEncryptionError(e.to_string()))?;

    Ok(SealedKeyMaterial {
        salt,
        iterations,
        nonce,
        ciphertext,
    })
}

/// Расшифровать приватный материал
///
/// Неверный пароль даёт `AeadDecryptionError`.
pub fn unseal_key_material(
    sealed: &SealedKeyMaterial,
    password: &str,
) -> Result<StoredKeyMaterial, CryptoError> {
    if sealed.nonce.len() != NONCE_LENGTH {
        return Err(CryptoError::InvalidInputError("Invalid sealed nonce length".to_string()));
    }

    let key = derive_master_key(password, &sealed.salt, sealed.iterations)?;
    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| CryptoError::InvalidInputError(e.to_string()))?;

    let plaintext = Zeroizing::new(
        cipher
            .decrypt(
                Nonce::from_slice(&sealed.nonce),
                Payload {
                    msg: &sealed.ciphertext,
                    aad: SEAL_AAD,
                },
            )
            .map_err(|e| CryptoError::AeadDecryptionError(e.to_string()))?,
    );

    bincode::deserialize(&plaintext).map_err(|e| CryptoError::DeserializationError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Мало итераций, чтобы тесты были быстрыми
    const TEST_ITERATIONS: u32 = 1_000;

    fn sample_material() -> StoredKeyMaterial {
        StoredKeyMaterial {
            suite_id: 1,
            identity_signing_private: vec![3; 32],
            identity_agreement_private: vec![4; 32],
            signed_prekey: None,
            previous_signed_prekeys: Vec::new(),
            one_time_prekeys: Vec::new(),
            consumed_one_time_prekeys: vec![1],
            next_signed_prekey_id: 2,
            next_one_time_prekey_id: 10,
        }
    }

    #[test]
    fn test_derive_master_key_deterministic() {
        let salt = generate_salt(32).unwrap();
        let key1 = derive_master_key("password", &salt, TEST_ITERATIONS).unwrap();
        let key2 = derive_master_key("password", &salt, TEST_ITERATIONS).unwrap();
        assert_eq!(*key1, *key2);

        let key3 = derive_master_key("other", &salt, TEST_ITERATIONS).unwrap();
        assert_ne!(*key1, *key3);
    }

    #[test]
    fn test_empty_password_rejected() {
        let salt = generate_salt(32).unwrap();
        assert!(derive_master_key("", &salt, TEST_ITERATIONS).is_err());
    }

    #[test]
    fn test_seal_unseal() {
        let sealed = seal_key_material(&sample_material(), "correct horse", 32, TEST_ITERATIONS).unwrap();
        assert_eq!(sealed.salt.len(), 32);

        let restored = unseal_key_material(&sealed, "correct horse").unwrap();
        assert_eq!(restored.identity_agreement_private, vec![4; 32]);
        assert_eq!(restored.next_one_time_prekey_id, 10);
    }

    #[test]
    fn test_wrong_password_fails() {
        let sealed = seal_key_material(&sample_material(), "correct horse", 32, TEST_ITERATIONS).unwrap();
        let result = unseal_key_material(&sealed, "battery staple");
        assert!(matches!(result, Err(CryptoError::AeadDecryptionError(_))));
    }
}
