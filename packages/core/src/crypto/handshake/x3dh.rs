//! X3DH (Extended Triple Diffie-Hellman)
//!
//! ## Ключи
//!
//! ### Alice (инициатор)
//! - **IK_A**: Identity agreement key (долгосрочный)
//! - **EK_A**: Ephemeral key (новый для каждой сессии)
//!
//! ### Bob (получатель)
//! - **IK_B**: Identity agreement key
//! - **SPK_B**: Signed prekey + Sig(SPK_B) от identity signing key
//! - **OPK_B**: One-time prekey (необязательный)
//!
//! ## Протокол
//!
//! ```text
//! DH1 = DH(IK_A, SPK_B)
//! DH2 = DH(EK_A, IK_B)
//! DH3 = DH(EK_A, SPK_B)
//! DH4 = DH(EK_A, OPK_B)          (если OPK_B был в bundle)
//!
//! SK = HKDF(salt = 0^32, ikm = 0xFF^32 || DH1 || DH2 || DH3 [|| DH4], info = "courier-x3dh")
//! ```
//!
//! Bob вычисляет те же DH в обратную сторону: DH(a, B) = DH(b, A).

use crate::crypto::handshake::{InitiatorState, PrekeyHeader};
use crate::crypto::keys::OneTimePrekeyPublic;
use crate::crypto::provider::CryptoProvider;
use crate::crypto::SuiteID;
use crate::error::CryptoError;
use crate::utils::fingerprint;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use zeroize::Zeroizing;

const X3DH_INFO: &[u8] = b"courier-x3dh";
const SHARED_SECRET_LENGTH: usize = 32;

/// Публичные ключи одной identity, публикуемые в directory
///
/// Неизменяем после публикации. Перед использованием обязательно
/// проходит [`PublicKeyBundle::verify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyBundle {
    pub suite_id: SuiteID,

    /// Ed25519 verifying key (проверяет подпись SPK)
    #[serde(with = "crate::utils::b64::serde_base64")]
    pub identity_signing_key: Vec<u8>,

    /// X25519 identity key (IK)
    #[serde(with = "crate::utils::b64::serde_base64")]
    pub identity_agreement_key: Vec<u8>,

    pub signed_prekey_id: u32,

    #[serde(with = "crate::utils::b64::serde_base64")]
    pub signed_prekey: Vec<u8>,

    /// Sig(SPK) над байтами signed_prekey
    #[serde(with = "crate::utils::b64::serde_base64")]
    pub signed_prekey_signature: Vec<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_time_prekey: Option<OneTimePrekeyPublic>,
}

/// Bundle, прошедший проверку подписи и формата ключей
pub struct VerifiedBundle<P: CryptoProvider> {
    pub identity_signing_key: P::SignaturePublicKey,
    pub identity_agreement_key: P::AgreementPublicKey,
    pub signed_prekey_id: u32,
    pub signed_prekey: P::AgreementPublicKey,
    pub one_time_prekey: Option<(u32, P::AgreementPublicKey)>,
}

impl PublicKeyBundle {
    /// Проверить suite, формат ключей и подпись signed prekey.
    ///
    /// Ошибка здесь окончательна: тот же bundle повторно не проверяется.
    pub fn verify<P: CryptoProvider>(&self) -> Result<VerifiedBundle<P>, CryptoError> {
        use tracing::debug;

        if self.suite_id != P::suite_id() {
            return Err(CryptoError::InvalidInputError(format!(
                "Unsupported suite {} (expected {})",
                self.suite_id,
                P::suite_id()
            )));
        }

        let identity_signing_key = P::signature_public_key_from_bytes(self.identity_signing_key.clone())?;
        let identity_agreement_key = P::agreement_public_key_from_bytes(self.identity_agreement_key.clone())?;
        let signed_prekey = P::agreement_public_key_from_bytes(self.signed_prekey.clone())?;

        P::verify(&identity_signing_key, signed_prekey.as_ref(), &self.signed_prekey_signature).map_err(|e| {
            debug!(
                target: "crypto::x3dh",
                identity = %fingerprint(&self.identity_signing_key),
                error = %e,
                "Signed prekey signature verification failed"
            );
            e
        })?;

        let one_time_prekey = self
            .one_time_prekey
            .as_ref()
            .map(|otpk| P::agreement_public_key_from_bytes(otpk.public_key.clone()).map(|key| (otpk.id, key)))
            .transpose()?;

        Ok(VerifiedBundle {
            identity_signing_key,
            identity_agreement_key,
            signed_prekey_id: self.signed_prekey_id,
            signed_prekey,
            one_time_prekey,
        })
    }
}

/// X3DH Protocol Implementation
///
/// Stateless struct - все данные передаются через параметры методов.
pub struct X3DHProtocol<P: CryptoProvider> {
    _phantom: PhantomData<P>,
}

impl<P: CryptoProvider> X3DHProtocol<P> {
    /// Выполнить handshake как инициатор (Alice)
    pub fn perform_as_initiator(
        local_identity: &P::AgreementPrivateKey,
        remote: &VerifiedBundle<P>,
    ) -> Result<(Zeroizing<Vec<u8>>, InitiatorState<P>), CryptoError> {
        use tracing::{debug, trace};

        debug!(
            target: "crypto::x3dh",
            remote_identity = %fingerprint(remote.identity_agreement_key.as_ref()),
            signed_prekey_id = remote.signed_prekey_id,
            one_time_prekey = remote.one_time_prekey.is_some(),
            "Starting X3DH as initiator"
        );

        // Новый ephemeral key для этой сессии
        let (ephemeral_private, ephemeral_public) = P::generate_agreement_keys()?;

        trace!(target: "crypto::x3dh", "Computing DH1 = DH(IK_A, SPK_B)");
        let dh1 = P::diffie_hellman(local_identity, &remote.signed_prekey)?;
        trace!(target: "crypto::x3dh", "Computing DH2 = DH(EK_A, IK_B)");
        let dh2 = P::diffie_hellman(&ephemeral_private, &remote.identity_agreement_key)?;
        trace!(target: "crypto::x3dh", "Computing DH3 = DH(EK_A, SPK_B)");
        let dh3 = P::diffie_hellman(&ephemeral_private, &remote.signed_prekey)?;
        let dh4 = remote
            .one_time_prekey
            .as_ref()
            .map(|(_, opk)| P::diffie_hellman(&ephemeral_private, opk))
            .transpose()?;

        let shared_secret = Self::derive_shared_secret(&dh1, &dh2, &dh3, dh4.as_deref().map(Vec::as_slice))?;

        let initiator_state = InitiatorState {
            ephemeral_private,
            ephemeral_public,
            remote_signed_prekey: remote.signed_prekey.clone(),
            prekey_header: PrekeyHeader {
                signed_prekey_id: remote.signed_prekey_id,
                one_time_prekey_id: remote.one_time_prekey.as_ref().map(|(id, _)| *id),
            },
        };

        debug!(
            target: "crypto::x3dh",
            ephemeral = %fingerprint(AsRef::<[u8]>::as_ref(&initiator_state.ephemeral_public)),
            "X3DH completed as initiator"
        );
        Ok((shared_secret, initiator_state))
    }

    /// Выполнить handshake как получатель (Bob)
    ///
    /// `remote_ephemeral` берётся из ratchet_public_key первого сообщения.
    pub fn perform_as_responder(
        local_identity: &P::AgreementPrivateKey,
        local_signed_prekey: &P::AgreementPrivateKey,
        local_one_time_prekey: Option<&P::AgreementPrivateKey>,
        remote_identity: &P::AgreementPublicKey,
        remote_ephemeral: &P::AgreementPublicKey,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        use tracing::{debug, trace};

        debug!(
            target: "crypto::x3dh",
            remote_identity = %fingerprint(remote_identity.as_ref()),
            remote_ephemeral = %fingerprint(remote_ephemeral.as_ref()),
            one_time_prekey = local_one_time_prekey.is_some(),
            "Starting X3DH as responder"
        );

        trace!(target: "crypto::x3dh", "Computing DH1 = DH(SPK_B, IK_A)");
        let dh1 = P::diffie_hellman(local_signed_prekey, remote_identity)?;
        trace!(target: "crypto::x3dh", "Computing DH2 = DH(IK_B, EK_A)");
        let dh2 = P::diffie_hellman(local_identity, remote_ephemeral)?;
        trace!(target: "crypto::x3dh", "Computing DH3 = DH(SPK_B, EK_A)");
        let dh3 = P::diffie_hellman(local_signed_prekey, remote_ephemeral)?;
        let dh4 = local_one_time_prekey
            .map(|opk| P::diffie_hellman(opk, remote_ephemeral))
            .transpose()?;

        let shared_secret = Self::derive_shared_secret(&dh1, &dh2, &dh3, dh4.as_deref().map(Vec::as_slice))?;
        debug!(target: "crypto::x3dh", "X3DH completed as responder");
        Ok(shared_secret)
    }

    fn derive_shared_secret(
        dh1: &[u8],
        dh2: &[u8],
        dh3: &[u8],
        dh4: Option<&[u8]>,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let dh4 = dh4.unwrap_or_default();
        let mut ikm = Zeroizing::new(Vec::with_capacity(32 + dh1.len() + dh2.len() + dh3.len() + dh4.len()));
        ikm.extend_from_slice(&[0xFF; 32]);
        ikm.extend_from_slice(dh1);
        ikm.extend_from_slice(dh2);
        ikm.extend_from_slice(dh3);
        ikm.extend_from_slice(dh4);

        P::hkdf_derive_key(&[0u8; 32], &ikm, X3DH_INFO, SHARED_SECRET_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::suites::classic::ClassicSuiteProvider;

    type P = ClassicSuiteProvider;

    struct BobKeys {
        identity_priv: <P as CryptoProvider>::AgreementPrivateKey,
        signed_prekey_priv: <P as CryptoProvider>::AgreementPrivateKey,
        one_time_priv: <P as CryptoProvider>::AgreementPrivateKey,
        bundle: PublicKeyBundle,
    }

    fn bob_keys(with_one_time: bool) -> BobKeys {
        let (identity_priv, identity_pub) = P::generate_agreement_keys().unwrap();
        let (signed_prekey_priv, signed_prekey_pub) = P::generate_agreement_keys().unwrap();
        let (one_time_priv, one_time_pub) = P::generate_agreement_keys().unwrap();
        let (signing_key, verifying_key) = P::generate_signature_keys().unwrap();
        let signature = P::sign(&signing_key, &signed_prekey_pub).unwrap();

        BobKeys {
            identity_priv,
            signed_prekey_priv,
            one_time_priv,
            bundle: PublicKeyBundle {
                suite_id: P::suite_id(),
                identity_signing_key: verifying_key,
                identity_agreement_key: identity_pub,
                signed_prekey_id: 1,
                signed_prekey: signed_prekey_pub,
                signed_prekey_signature: signature,
                one_time_prekey: with_one_time.then(|| OneTimePrekeyPublic {
                    id: 42,
                    public_key: one_time_pub,
                }),
            },
        }
    }

    #[test]
    fn test_x3dh_alice_bob_get_same_root_key() {
        for with_one_time in [false, true] {
            let bob = bob_keys(with_one_time);
            let (alice_identity_priv, alice_identity_pub) = P::generate_agreement_keys().unwrap();

            let verified = bob.bundle.verify::<P>().unwrap();
            let (alice_root, alice_state) =
                X3DHProtocol::<P>::perform_as_initiator(&alice_identity_priv, &verified).unwrap();

            assert_eq!(alice_state.prekey_header.signed_prekey_id, 1);
            assert_eq!(
                alice_state.prekey_header.one_time_prekey_id,
                with_one_time.then_some(42)
            );

            let bob_root = X3DHProtocol::<P>::perform_as_responder(
                &bob.identity_priv,
                &bob.signed_prekey_priv,
                with_one_time.then_some(&bob.one_time_priv),
                &alice_identity_pub,
                &alice_state.ephemeral_public,
            )
            .unwrap();

            assert_eq!(*alice_root, *bob_root, "X3DH must produce same root key for Alice and Bob");
            assert_eq!(alice_root.len(), 32);
        }
    }

    #[test]
    fn test_missing_one_time_prekey_changes_secret() {
        let bob = bob_keys(true);
        let (alice_identity_priv, alice_identity_pub) = P::generate_agreement_keys().unwrap();
        let verified = bob.bundle.verify::<P>().unwrap();
        let (alice_root, alice_state) =
            X3DHProtocol::<P>::perform_as_initiator(&alice_identity_priv, &verified).unwrap();

        // Bob без OPK получает другой секрет: DH4 обязателен, если был в bundle
        let bob_root = X3DHProtocol::<P>::perform_as_responder(
            &bob.identity_priv,
            &bob.signed_prekey_priv,
            None,
            &alice_identity_pub,
            &alice_state.ephemeral_public,
        )
        .unwrap();
        assert_ne!(*alice_root, *bob_root);
    }

    #[test]
    fn test_x3dh_rejects_invalid_signature() {
        let mut bob = bob_keys(false);
        bob.bundle.signed_prekey_signature = vec![0xFF; 64]; // Невалидная подпись

        let result = bob.bundle.verify::<P>();
        assert!(matches!(result, Err(CryptoError::SignatureVerificationError(_)) | Err(CryptoError::InvalidInputError(_))));
    }

    #[test]
    fn test_x3dh_rejects_swapped_prekey() {
        let mut bob = bob_keys(false);
        let (_, other_pub) = P::generate_agreement_keys().unwrap();
        bob.bundle.signed_prekey = other_pub;

        assert!(matches!(
            bob.bundle.verify::<P>(),
            Err(CryptoError::SignatureVerificationError(_))
        ));
    }

    #[test]
    fn test_bundle_rejects_unknown_suite() {
        let mut bob = bob_keys(false);
        bob.bundle.suite_id = 2;
        assert!(matches!(bob.bundle.verify::<P>(), Err(CryptoError::InvalidInputError(_))));
    }

    #[test]
    fn test_bundle_json_is_base64() {
        let bob = bob_keys(true);
        let json = serde_json::to_string(&bob.bundle).unwrap();
        assert!(json.contains("\"identitySigningKey\""));
        assert!(json.contains("\"oneTimePrekey\""));

        let parsed: PublicKeyBundle = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, bob.bundle);
    }
}
