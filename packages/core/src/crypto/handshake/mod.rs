//! Key Agreement
//!
//! Цель: установить общий секретный ключ между двумя сторонами без
//! предварительного обмена секретами (X3DH).
//!
//! ## Dataflow
//! ```text
//! Alice (инициатор)                          Bob (получатель)
//! ==================                         =================
//!
//! 1. Получает Bob's bundle из directory
//! 2. PublicKeyBundle::verify() → VerifiedBundle
//! 3. X3DHProtocol::perform_as_initiator()
//!    → (shared_secret, InitiatorState)
//! 4. InitiatorState содержит ephemeral_private
//!    (он станет первым DH ratchet key)
//! 5. Первые сообщения несут PrekeyHeader →
//!                                            1. Получает сообщение с PrekeyHeader
//!                                            2. Берёт Alice's EK из ratchet_public_key
//!                                            3. Получает и проверяет Alice's bundle
//!                                            4. X3DHProtocol::perform_as_responder()
//!                                               → тот же shared_secret
//! ```

pub mod x3dh;

use crate::crypto::provider::CryptoProvider;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use x3dh::{PublicKeyBundle, VerifiedBundle, X3DHProtocol};

/// Какие prekeys получателя использовал инициатор.
///
/// Едет в каждом envelope инициатора, пока тот не получил ни одного ответа.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrekeyHeader {
    pub signed_prekey_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_time_prekey_id: Option<u32>,
}

/// Состояние инициатора после key agreement
///
/// Ephemeral key НЕ генерируется заново в Double Ratchet: он используется
/// в X3DH (DH2, DH3, DH4) и затем как первый DH ratchet key.
pub struct InitiatorState<P: CryptoProvider> {
    pub ephemeral_private: P::AgreementPrivateKey,
    pub ephemeral_public: P::AgreementPublicKey,

    /// Signed prekey получателя, он же первый remote ratchet key
    pub remote_signed_prekey: P::AgreementPublicKey,

    pub prekey_header: PrekeyHeader,
}

impl<P: CryptoProvider> fmt::Debug for InitiatorState<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitiatorState")
            .field("ephemeral_public", &crate::utils::fingerprint(self.ephemeral_public.as_ref()))
            .field("prekey_header", &self.prekey_header)
            .finish_non_exhaustive()
    }
}
