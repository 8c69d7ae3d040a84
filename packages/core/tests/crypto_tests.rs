//! Tests for the cryptographic layer through the public API
//!
//! This test suite covers:
//! - Classic Suite Provider (X25519, Ed25519, ChaCha20-Poly1305, HKDF)
//! - X3DH Key Agreement
//! - Double Ratchet Protocol
//! - Key store and identity sealing

use courier_core::crypto::handshake::{PublicKeyBundle, X3DHProtocol};
use courier_core::crypto::messaging::{RatchetEngine, RatchetState};
use courier_core::crypto::suites::classic::ClassicSuiteProvider;
use courier_core::crypto::CryptoProvider;
use courier_core::storage::MemoryStorage;
use courier_core::{EngineError, KeyStore};
use std::sync::Arc;

type P = ClassicSuiteProvider;

/// Test that ClassicSuiteProvider generates agreement keys of the right size
#[test]
fn test_classic_suite_generate_agreement_keys() {
    let (private_key, public_key) = P::generate_agreement_keys().expect("Failed to generate agreement keys");

    // X25519 keys should be 32 bytes
    assert_eq!(private_key.as_ref().len(), 32, "Private key should be 32 bytes");
    assert_eq!(AsRef::<[u8]>::as_ref(&public_key).len(), 32, "Public key should be 32 bytes");
    assert_eq!(P::agreement_public_from_private(&private_key).unwrap(), public_key);
}

/// Test signature creation and verification
#[test]
fn test_classic_suite_sign_verify() {
    let (signing_key, verifying_key) = P::generate_signature_keys().unwrap();
    let message = b"Hello, Courier!";

    let signature = P::sign(&signing_key, message).unwrap();
    assert_eq!(signature.len(), 64, "Ed25519 signature should be 64 bytes");

    assert!(P::verify(&verifying_key, message, &signature).is_ok());
    assert!(
        P::verify(&verifying_key, b"Different message", &signature).is_err(),
        "Verification should fail for a different message"
    );
}

/// Test AEAD with associated data
#[test]
fn test_classic_suite_aead_encrypt_decrypt() {
    let key = P::aead_key_from_bytes(vec![0u8; 32]).unwrap();
    let nonce = P::generate_nonce(12).unwrap();
    let plaintext = b"Secret message for encryption test";
    let aad = b"associated data";

    let ciphertext = P::aead_encrypt(&key, &nonce, plaintext, Some(aad)).unwrap();

    // Ciphertext should be plaintext + 16-byte tag
    assert_eq!(ciphertext.len(), plaintext.len() + 16, "Ciphertext length incorrect");

    let decrypted = P::aead_decrypt(&key, &nonce, &ciphertext, Some(aad)).unwrap();
    assert_eq!(decrypted, plaintext, "Decrypted plaintext doesn't match");

    assert!(
        P::aead_decrypt(&key, &nonce, &ciphertext, Some(b"other data")).is_err(),
        "Decryption should fail with different associated data"
    );
}

/// Test that AEAD decryption fails with wrong key or nonce
#[test]
fn test_classic_suite_aead_rejects_wrong_key_and_nonce() {
    let key = P::aead_key_from_bytes(vec![0u8; 32]).unwrap();
    let wrong_key = P::aead_key_from_bytes(vec![1u8; 32]).unwrap();
    let nonce = P::generate_nonce(12).unwrap();
    let wrong_nonce = P::generate_nonce(12).unwrap();

    let ciphertext = P::aead_encrypt(&key, &nonce, b"Secret message", None).unwrap();

    assert!(P::aead_decrypt(&wrong_key, &nonce, &ciphertext, None).is_err());
    assert!(P::aead_decrypt(&key, &wrong_nonce, &ciphertext, None).is_err());
}

/// Test HKDF determinism
#[test]
fn test_classic_suite_hkdf() {
    let key = P::hkdf_derive_key(b"test_salt", b"input_key_material", b"context_info", 32).unwrap();
    assert_eq!(key.len(), 32, "Derived key length incorrect");

    let again = P::hkdf_derive_key(b"test_salt", b"input_key_material", b"context_info", 32).unwrap();
    assert_eq!(key, again, "HKDF should be deterministic");

    let other_info = P::hkdf_derive_key(b"test_salt", b"input_key_material", b"other_info", 32).unwrap();
    assert_ne!(key, other_info);
}

/// Test KDF_RK (root key step)
#[test]
fn test_classic_suite_kdf_rk() {
    let root_key = P::aead_key_from_bytes(vec![0u8; 32]).unwrap();

    let (new_root_key, chain_key) = P::kdf_rk(&root_key, &[1u8; 32]).unwrap();
    assert_eq!(new_root_key.as_ref().len(), 32);
    assert_eq!(chain_key.as_ref().len(), 32);
    assert_ne!(new_root_key.as_ref(), root_key.as_ref(), "New root key should differ");
    assert_ne!(new_root_key.as_ref(), chain_key.as_ref());
}

/// Test nonce uniqueness
#[test]
fn test_random_number_quality() {
    let mut seen = std::collections::HashSet::new();

    for _ in 0..100 {
        let nonce = P::generate_nonce(12).unwrap();
        let nonce_hex = hex::encode(&nonce);
        assert!(seen.insert(nonce_hex.clone()), "Duplicate nonce generated: {}", nonce_hex);
    }
}

fn bob_key_store() -> KeyStore<P> {
    let mut store = KeyStore::<P>::new(Arc::new(MemoryStorage::new()), 3600);
    store.generate_identity().unwrap();
    store.generate_prekey_material(2).unwrap();
    store
}

/// Full X3DH + Double Ratchet exchange with raw key material
#[test]
fn test_x3dh_then_ratchet_roundtrip() {
    let engine = RatchetEngine::<P>::new(1000);

    // Bob
    let (bob_identity_priv, bob_identity_pub) = P::generate_agreement_keys().unwrap();
    let (bob_spk_priv, bob_spk_pub) = P::generate_agreement_keys().unwrap();
    let (bob_signing, bob_verifying) = P::generate_signature_keys().unwrap();
    let bundle = PublicKeyBundle {
        suite_id: P::suite_id(),
        identity_signing_key: AsRef::<[u8]>::as_ref(&bob_verifying).to_vec(),
        identity_agreement_key: AsRef::<[u8]>::as_ref(&bob_identity_pub).to_vec(),
        signed_prekey_id: 1,
        signed_prekey: AsRef::<[u8]>::as_ref(&bob_spk_pub).to_vec(),
        signed_prekey_signature: P::sign(&bob_signing, AsRef::<[u8]>::as_ref(&bob_spk_pub)).unwrap(),
        one_time_prekey: None,
    };

    // Alice
    let (alice_identity_priv, alice_identity_pub) = P::generate_agreement_keys().unwrap();
    let verified = bundle.verify::<P>().expect("Bundle should verify");
    let (alice_secret, handshake) =
        X3DHProtocol::<P>::perform_as_initiator(&alice_identity_priv, &verified).unwrap();
    let header = handshake.prekey_header;
    let mut alice = RatchetState::initiator("bob", &alice_secret, handshake).unwrap();

    let first = engine.encrypt(&mut alice, b"Hello Bob!").unwrap();
    assert_eq!(first.prekey, Some(header), "First message must carry the prekey header");

    // Bob derives the same secret from the first envelope
    let alice_ephemeral = P::agreement_public_key_from_bytes(first.ratchet_public_key.to_vec()).unwrap();
    let bob_secret = X3DHProtocol::<P>::perform_as_responder(
        &bob_identity_priv,
        &bob_spk_priv,
        None,
        &alice_identity_pub,
        &alice_ephemeral,
    )
    .unwrap();
    assert_eq!(alice_secret, bob_secret, "Shared secrets should match");

    let mut bob = RatchetState::responder("alice", &bob_secret, bob_spk_priv, &first.ratchet_public_key).unwrap();
    assert_eq!(engine.decrypt(&mut bob, &first).unwrap(), b"Hello Bob!");

    let reply = engine.encrypt(&mut bob, b"Hello Alice!").unwrap();
    assert!(reply.prekey.is_none(), "Responder never sends a prekey header");
    assert_eq!(engine.decrypt(&mut alice, &reply).unwrap(), b"Hello Alice!");
    assert!(!alice.awaiting_reply(), "Initiator stops sending the header after a reply");

    let next = engine.encrypt(&mut alice, b"How are you?").unwrap();
    assert!(next.prekey.is_none());
    assert_eq!(engine.decrypt(&mut bob, &next).unwrap(), b"How are you?");
}

/// Test that sealed key material restores the same public bundle
#[test]
fn test_seal_and_unseal_identity() {
    let bob_store = bob_key_store();
    let sealed = bob_store.seal_identity("correct horse", 16, 1_000).unwrap();

    let mut restored = KeyStore::<P>::new(Arc::new(MemoryStorage::new()), 3600);
    restored.unseal_identity(&sealed, "correct horse").unwrap();
    assert_eq!(
        restored.export_public_bundle(false).unwrap(),
        bob_store.export_public_bundle(false).unwrap(),
        "Unsealed key store must export the same bundle"
    );
    assert_eq!(restored.one_time_prekey_count(), 2);

    let mut wrong = KeyStore::<P>::new(Arc::new(MemoryStorage::new()), 3600);
    assert!(wrong.unseal_identity(&sealed, "wrong password").is_err());
    assert!(!wrong.has_identity());
}

/// Test that a forged signed prekey is rejected before any DH is computed
#[test]
fn test_x3dh_fails_with_invalid_signature() {
    let bob_store = bob_key_store();
    let mut bundle = bob_store.export_public_bundle(false).unwrap();
    bundle.signed_prekey_signature[10] ^= 0x01;

    assert!(bundle.verify::<P>().is_err(), "Tampered signature must not verify");
}

/// Test that the key store refuses to export without an identity
#[test]
fn test_key_store_requires_identity() {
    let store = KeyStore::<P>::new(Arc::new(MemoryStorage::new()), 3600);
    assert!(matches!(store.export_public_bundle(true), Err(EngineError::NoIdentityLoaded)));
}
