//! Double Ratchet
//!
//! Состояние ([`RatchetState`]) и операции над ним ([`RatchetEngine`]) разделены:
//! состоянием владеет SessionManager, движок stateless (кроме лимита skip window).
//!
//! ## Структура RatchetState
//!
//! ### Root Key
//! - Обновляется при каждом DH ratchet step
//!
//! ### Chain Keys
//! - `send_chain_key`: для шифрования (нет у responder до первого входящего сообщения)
//! - `receive_chain_key`: для расшифровки (нет у initiator до первого ответа)
//!
//! ### DH Ratchet Keys
//! - `local_ratchet_private/public`: наша текущая пара (public едет в envelope)
//! - `remote_ratchet_public`: последний известный ratchet key собеседника
//!
//! ### Skipped Message Keys
//! - Ключ кэша: (remote ratchet key, номер сообщения)
//! - У каждого есть timestamp для cleanup и порядковый номер для вытеснения

use crate::crypto::handshake::{InitiatorState, PrekeyHeader};
use crate::crypto::provider::CryptoProvider;
use crate::crypto::SuiteID;
use crate::error::{CryptoError, EngineError, Result};
use crate::protocol::envelope::{associated_data, EncryptedEnvelope, ENVELOPE_VERSION};
use crate::utils::{fingerprint, time::current_timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use zeroize::{Zeroize, ZeroizeOnDrop};

fn wipe<K: Zeroize>(mut key: K) {
    key.zeroize();
}

/// Кто начал сессию
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionRole {
    Initiator,
    Responder,
}

type SkippedKeyId = (Vec<u8>, u64);

struct SkippedKey<P: CryptoProvider> {
    key: P::AeadKey,
    stored_at: i64,
    sequence: u64,
}

impl<P: CryptoProvider> Clone for SkippedKey<P> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            stored_at: self.stored_at,
            sequence: self.sequence,
        }
    }
}

/// Состояние одной сессии
///
/// Принадлежит SessionManager и наружу не отдаётся. Секреты стираются при drop.
pub struct RatchetState<P: CryptoProvider> {
    session_id: String,
    peer_id: String,
    suite_id: SuiteID,
    role: SessionRole,

    root_key: P::AeadKey,
    send_chain_key: Option<P::AeadKey>,
    receive_chain_key: Option<P::AeadKey>,

    local_ratchet_private: P::AgreementPrivateKey,
    local_ratchet_public: P::AgreementPublicKey,
    remote_ratchet_public: Option<P::AgreementPublicKey>,

    send_chain_length: u64,
    receive_chain_length: u64,
    previous_chain_length: u64,

    skipped_keys: HashMap<SkippedKeyId, SkippedKey<P>>,
    skipped_sequence: u64,

    /// Заголовок prekey, пока initiator не получил ответ
    pending_prekey: Option<PrekeyHeader>,

    /// Ephemeral key инициатора: идентифицирует handshake
    base_key: Vec<u8>,

    created_at: i64,
}

/// Сводка по сессии без секретов
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: String,
    pub peer_id: String,
    pub role: SessionRole,
    pub send_chain_length: u64,
    pub receive_chain_length: u64,
    pub previous_chain_length: u64,
    pub skipped_keys: usize,
    pub awaiting_reply: bool,
    pub created_at: i64,
}

impl<P: CryptoProvider> RatchetState<P> {
    /// Создать сессию как инициатор.
    ///
    /// Ephemeral key из X3DH становится первым ratchet key, первый remote
    /// ratchet key это signed prekey получателя.
    pub fn initiator(peer_id: &str, shared_secret: &[u8], handshake: InitiatorState<P>) -> Result<Self> {
        use tracing::debug;

        let InitiatorState {
            ephemeral_private,
            ephemeral_public,
            remote_signed_prekey,
            prekey_header,
        } = handshake;

        let initial_root = P::aead_key_from_bytes(shared_secret.to_vec())?;
        let dh_output = P::diffie_hellman(&ephemeral_private, &remote_signed_prekey)?;
        let (root_key, send_chain_key) = P::kdf_rk(&initial_root, &dh_output)?;
        wipe(initial_root);

        let state = Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            peer_id: peer_id.to_string(),
            suite_id: P::suite_id(),
            role: SessionRole::Initiator,
            root_key,
            send_chain_key: Some(send_chain_key),
            receive_chain_key: None,
            base_key: ephemeral_public.as_ref().to_vec(),
            local_ratchet_private: ephemeral_private,
            local_ratchet_public: ephemeral_public,
            remote_ratchet_public: Some(remote_signed_prekey),
            send_chain_length: 0,
            receive_chain_length: 0,
            previous_chain_length: 0,
            skipped_keys: HashMap::new(),
            skipped_sequence: 0,
            pending_prekey: Some(prekey_header),
            created_at: current_timestamp(),
        };

        debug!(
            target: "crypto::ratchet",
            peer_id = %state.peer_id,
            session_id = %state.session_id,
            "Created initiator ratchet state"
        );
        Ok(state)
    }

    /// Создать сессию как получатель.
    ///
    /// Signed prekey служит первым локальным ratchet key; первое входящее
    /// сообщение (с ratchet key = `remote_base_key`) запускает DH ratchet step,
    /// после которого появляются обе цепочки.
    pub fn responder(
        peer_id: &str,
        shared_secret: &[u8],
        signed_prekey_private: P::AgreementPrivateKey,
        remote_base_key: &[u8],
    ) -> Result<Self> {
        use tracing::debug;

        let root_key = P::aead_key_from_bytes(shared_secret.to_vec())?;
        let local_ratchet_public = P::agreement_public_from_private(&signed_prekey_private)?;

        let state = Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            peer_id: peer_id.to_string(),
            suite_id: P::suite_id(),
            role: SessionRole::Responder,
            root_key,
            send_chain_key: None,
            receive_chain_key: None,
            local_ratchet_private: signed_prekey_private,
            local_ratchet_public,
            remote_ratchet_public: None,
            send_chain_length: 0,
            receive_chain_length: 0,
            previous_chain_length: 0,
            skipped_keys: HashMap::new(),
            skipped_sequence: 0,
            pending_prekey: None,
            base_key: remote_base_key.to_vec(),
            created_at: current_timestamp(),
        };

        debug!(
            target: "crypto::ratchet",
            peer_id = %state.peer_id,
            session_id = %state.session_id,
            base_key = %fingerprint(remote_base_key),
            "Created responder ratchet state"
        );
        Ok(state)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn send_chain_length(&self) -> u64 {
        self.send_chain_length
    }

    pub fn receive_chain_length(&self) -> u64 {
        self.receive_chain_length
    }

    pub fn previous_chain_length(&self) -> u64 {
        self.previous_chain_length
    }

    pub fn skipped_key_count(&self) -> usize {
        self.skipped_keys.len()
    }

    /// Initiator ещё не получил ни одного ответа
    pub fn awaiting_reply(&self) -> bool {
        self.pending_prekey.is_some()
    }

    pub fn base_key(&self) -> &[u8] {
        &self.base_key
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id.clone(),
            peer_id: self.peer_id.clone(),
            role: self.role,
            send_chain_length: self.send_chain_length,
            receive_chain_length: self.receive_chain_length,
            previous_chain_length: self.previous_chain_length,
            skipped_keys: self.skipped_keys.len(),
            awaiting_reply: self.awaiting_reply(),
            created_at: self.created_at,
        }
    }

    /// Удалить skipped keys старше `max_age_secs`. Возвращает число удалённых.
    pub fn cleanup_skipped_keys(&mut self, max_age_secs: i64) -> usize {
        use tracing::debug;

        let now = current_timestamp();
        let initial_count = self.skipped_keys.len();
        self.skipped_keys.retain(|_, skipped| {
            let keep = now - skipped.stored_at < max_age_secs;
            if !keep {
                skipped.key.zeroize();
            }
            keep
        });

        let removed = initial_count - self.skipped_keys.len();
        if removed > 0 {
            debug!(
                target: "crypto::ratchet",
                peer_id = %self.peer_id,
                removed,
                remaining = self.skipped_keys.len(),
                "Cleaned up old skipped message keys"
            );
        }
        removed
    }

    /// Сериализовать сессию для сохранения
    pub fn to_serializable(&self) -> SerializableRatchetState {
        let mut skipped_keys: Vec<SerializableSkippedKey> = self
            .skipped_keys
            .iter()
            .map(|((ratchet_key, index), skipped)| SerializableSkippedKey {
                ratchet_public_key: ratchet_key.clone(),
                index: *index,
                message_key: skipped.key.as_ref().to_vec(),
                stored_at: skipped.stored_at,
                sequence: skipped.sequence,
            })
            .collect();
        // Детерминированный порядок: одинаковое состояние даёт одинаковые байты
        skipped_keys.sort_by_key(|k| k.sequence);

        SerializableRatchetState {
            session_id: self.session_id.clone(),
            peer_id: self.peer_id.clone(),
            suite_id: self.suite_id,
            role: self.role,
            root_key: self.root_key.as_ref().to_vec(),
            send_chain_key: self.send_chain_key.as_ref().map(|k| k.as_ref().to_vec()),
            receive_chain_key: self.receive_chain_key.as_ref().map(|k| k.as_ref().to_vec()),
            local_ratchet_private: self.local_ratchet_private.as_ref().to_vec(),
            remote_ratchet_public: self.remote_ratchet_public.as_ref().map(|k| k.as_ref().to_vec()),
            send_chain_length: self.send_chain_length,
            receive_chain_length: self.receive_chain_length,
            previous_chain_length: self.previous_chain_length,
            skipped_keys,
            skipped_sequence: self.skipped_sequence,
            pending_prekey: self.pending_prekey,
            base_key: self.base_key.clone(),
            created_at: self.created_at,
        }
    }

    /// Восстановить сессию, проверив длины всех ключей
    pub fn from_serializable(data: &SerializableRatchetState) -> Result<Self> {
        if data.suite_id != P::suite_id() {
            return Err(CryptoError::InvalidInputError(format!(
                "Session uses suite {}, expected {}",
                data.suite_id,
                P::suite_id()
            ))
            .into());
        }

        let local_ratchet_private = P::agreement_private_key_from_bytes(data.local_ratchet_private.clone())?;
        let local_ratchet_public = P::agreement_public_from_private(&local_ratchet_private)?;

        let mut skipped_keys = HashMap::with_capacity(data.skipped_keys.len());
        for skipped in &data.skipped_keys {
            skipped_keys.insert(
                (skipped.ratchet_public_key.clone(), skipped.index),
                SkippedKey {
                    key: P::aead_key_from_bytes(skipped.message_key.clone())?,
                    stored_at: skipped.stored_at,
                    sequence: skipped.sequence,
                },
            );
        }

        Ok(Self {
            session_id: data.session_id.clone(),
            peer_id: data.peer_id.clone(),
            suite_id: data.suite_id,
            role: data.role,
            root_key: P::aead_key_from_bytes(data.root_key.clone())?,
            send_chain_key: data.send_chain_key.clone().map(P::aead_key_from_bytes).transpose()?,
            receive_chain_key: data.receive_chain_key.clone().map(P::aead_key_from_bytes).transpose()?,
            local_ratchet_private,
            local_ratchet_public,
            remote_ratchet_public: data
                .remote_ratchet_public
                .clone()
                .map(P::agreement_public_key_from_bytes)
                .transpose()?,
            send_chain_length: data.send_chain_length,
            receive_chain_length: data.receive_chain_length,
            previous_chain_length: data.previous_chain_length,
            skipped_keys,
            skipped_sequence: data.skipped_sequence,
            pending_prekey: data.pending_prekey,
            base_key: data.base_key.clone(),
            created_at: data.created_at,
        })
    }
}

impl<P: CryptoProvider> Clone for RatchetState<P> {
    fn clone(&self) -> Self {
        Self {
            session_id: self.session_id.clone(),
            peer_id: self.peer_id.clone(),
            suite_id: self.suite_id,
            role: self.role,
            root_key: self.root_key.clone(),
            send_chain_key: self.send_chain_key.clone(),
            receive_chain_key: self.receive_chain_key.clone(),
            local_ratchet_private: self.local_ratchet_private.clone(),
            local_ratchet_public: self.local_ratchet_public.clone(),
            remote_ratchet_public: self.remote_ratchet_public.clone(),
            send_chain_length: self.send_chain_length,
            receive_chain_length: self.receive_chain_length,
            previous_chain_length: self.previous_chain_length,
            skipped_keys: self.skipped_keys.clone(),
            skipped_sequence: self.skipped_sequence,
            pending_prekey: self.pending_prekey,
            base_key: self.base_key.clone(),
            created_at: self.created_at,
        }
    }
}

impl<P: CryptoProvider> Drop for RatchetState<P> {
    fn drop(&mut self) {
        self.root_key.zeroize();
        self.send_chain_key.zeroize();
        self.receive_chain_key.zeroize();
        self.local_ratchet_private.zeroize();
        for skipped in self.skipped_keys.values_mut() {
            skipped.key.zeroize();
        }
    }
}

impl<P: CryptoProvider> fmt::Debug for RatchetState<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RatchetState")
            .field("session_id", &self.session_id)
            .field("peer_id", &self.peer_id)
            .field("role", &self.role)
            .field("send_chain_length", &self.send_chain_length)
            .field("receive_chain_length", &self.receive_chain_length)
            .field("previous_chain_length", &self.previous_chain_length)
            .field("skipped_keys", &self.skipped_keys.len())
            .finish_non_exhaustive()
    }
}

/// Шифрование и расшифровка поверх RatchetState
pub struct RatchetEngine<P: CryptoProvider> {
    max_skip: u64,
    _phantom: PhantomData<P>,
}

impl<P: CryptoProvider> RatchetEngine<P> {
    /// `max_skipped_messages` ограничивает и число ключей, выводимых одним
    /// decrypt, и размер кэша skipped keys.
    pub fn new(max_skipped_messages: u32) -> Self {
        Self {
            max_skip: u64::from(max_skipped_messages),
            _phantom: PhantomData,
        }
    }

    pub fn max_skip(&self) -> u64 {
        self.max_skip
    }

    /// Зашифровать сообщение
    ///
    /// 1. (message_key, chain_key') = KDF_CK(chain_key), старый chain key стирается
    /// 2. ciphertext = AEAD(message_key, nonce, plaintext, AD(header))
    /// 3. send_chain_length += 1
    ///
    /// Всё вычисляется до мутации, state меняется только при успехе.
    pub fn encrypt(&self, state: &mut RatchetState<P>, plaintext: &[u8]) -> Result<EncryptedEnvelope> {
        use tracing::trace;

        let send_chain_key = state
            .send_chain_key
            .as_ref()
            .ok_or_else(|| EngineError::SessionNotEstablished(state.peer_id.clone()))?;

        let chain_length = state.send_chain_length;
        let next_length = chain_length
            .checked_add(1)
            .ok_or_else(|| CryptoError::InvalidInputError("send chain exhausted".to_string()))?;

        let ratchet_public_key: [u8; 32] = state
            .local_ratchet_public
            .as_ref()
            .try_into()
            .map_err(|_| CryptoError::InvalidInputError("Invalid ratchet public key length".to_string()))?;

        let (message_key, next_chain_key) = P::kdf_ck(send_chain_key)?;
        let nonce = P::generate_nonce(P::nonce_length())?;
        let ad = associated_data(state.suite_id, &ratchet_public_key, chain_length, state.previous_chain_length);

        let sealed = P::aead_encrypt(&message_key, &nonce, plaintext, Some(&ad));
        wipe(message_key);
        let ciphertext = match sealed {
            Ok(ciphertext) => ciphertext,
            Err(e) => {
                wipe(next_chain_key);
                return Err(e.into());
            }
        };

        // Commit
        if let Some(old) = state.send_chain_key.replace(next_chain_key) {
            wipe(old);
        }
        state.send_chain_length = next_length;

        trace!(
            target: "crypto::ratchet",
            peer_id = %state.peer_id,
            chain_length,
            ciphertext_len = ciphertext.len(),
            "Encrypted message"
        );

        Ok(EncryptedEnvelope {
            version: ENVELOPE_VERSION,
            suite_id: state.suite_id,
            ratchet_public_key,
            chain_length,
            previous_chain_length: state.previous_chain_length,
            nonce,
            ciphertext,
            prekey: state.pending_prekey,
        })
    }

    /// Расшифровать сообщение
    ///
    /// Работает на копии state; при любой ошибке исходный state не меняется.
    pub fn decrypt(&self, state: &mut RatchetState<P>, envelope: &EncryptedEnvelope) -> Result<Vec<u8>> {
        use tracing::{debug, trace};

        if envelope.version != ENVELOPE_VERSION {
            return Err(EngineError::MalformedEnvelope(format!(
                "unsupported envelope version {}",
                envelope.version
            )));
        }
        if envelope.suite_id != state.suite_id {
            return Err(EngineError::MalformedEnvelope(format!(
                "envelope suite {} does not match session suite {}",
                envelope.suite_id, state.suite_id
            )));
        }

        trace!(
            target: "crypto::ratchet",
            peer_id = %state.peer_id,
            ratchet_key = %fingerprint(&envelope.ratchet_public_key),
            chain_length = envelope.chain_length,
            previous_chain_length = envelope.previous_chain_length,
            receive_chain_length = state.receive_chain_length,
            "Decrypting message"
        );

        let mut scratch = state.clone();
        match self.decrypt_in_place(&mut scratch, envelope) {
            Ok(plaintext) => {
                // Любой аутентичный ответ значит, что собеседник знает сессию
                scratch.pending_prekey = None;
                *state = scratch;
                Ok(plaintext)
            }
            Err(e) => {
                debug!(
                    target: "crypto::ratchet",
                    peer_id = %state.peer_id,
                    error = %e,
                    "Decryption failed, state unchanged"
                );
                Err(e)
            }
        }
    }

    fn decrypt_in_place(&self, s: &mut RatchetState<P>, envelope: &EncryptedEnvelope) -> Result<Vec<u8>> {
        use tracing::trace;

        let remote_bytes = envelope.ratchet_public_key.to_vec();

        // 1. Ключ уже в кэше skipped keys
        if let Some(skipped) = s.skipped_keys.remove(&(remote_bytes.clone(), envelope.chain_length)) {
            trace!(
                target: "crypto::ratchet",
                chain_length = envelope.chain_length,
                "Found skipped message key"
            );
            let SkippedKey { key, .. } = skipped;
            return Self::open(key, envelope);
        }

        let is_new_ratchet_key = s
            .remote_ratchet_public
            .as_ref()
            .map_or(true, |current| current.as_ref() != remote_bytes.as_slice());

        if is_new_ratchet_key {
            // 2a. Новая цепочка: сначала дочитываем старую до previous_chain_length
            let old_chain_skip = if s.receive_chain_key.is_some() {
                envelope.previous_chain_length.saturating_sub(s.receive_chain_length)
            } else {
                0
            };
            let requested = old_chain_skip.saturating_add(envelope.chain_length);
            if requested > self.max_skip {
                return Err(EngineError::ChainTooFarAhead {
                    requested,
                    limit: self.max_skip,
                });
            }

            self.skip_message_keys(s, envelope.previous_chain_length)?;
            let remote = P::agreement_public_key_from_bytes(remote_bytes)?;
            Self::dh_ratchet(s, remote)?;
        } else {
            // 2b. Та же цепочка
            if s.receive_chain_key.is_none() || envelope.chain_length < s.receive_chain_length {
                return Err(EngineError::DecryptionFailed(
                    "message key already consumed or never derived".to_string(),
                ));
            }
            let ahead = envelope.chain_length - s.receive_chain_length;
            if ahead > self.max_skip {
                return Err(EngineError::ChainTooFarAhead {
                    requested: ahead,
                    limit: self.max_skip,
                });
            }
        }

        // 3. Пропущенные ключи текущей цепочки в кэш, затем ключ сообщения
        self.skip_message_keys(s, envelope.chain_length)?;

        let chain_key = s
            .receive_chain_key
            .take()
            .ok_or_else(|| EngineError::DecryptionFailed("no receiving chain".to_string()))?;
        let (message_key, next_chain_key) = P::kdf_ck(&chain_key)?;
        wipe(chain_key);
        s.receive_chain_key = Some(next_chain_key);
        s.receive_chain_length = s
            .receive_chain_length
            .checked_add(1)
            .ok_or_else(|| CryptoError::InvalidInputError("receive chain exhausted".to_string()))?;

        Self::open(message_key, envelope)
    }

    /// Вывести и закэшировать ключи receive chain до номера `until` (не включая)
    fn skip_message_keys(&self, s: &mut RatchetState<P>, until: u64) -> Result<()> {
        let Some(remote_bytes) = s.remote_ratchet_public.as_ref().map(|k| k.as_ref().to_vec()) else {
            return Ok(());
        };
        let Some(mut chain_key) = s.receive_chain_key.take() else {
            return Ok(());
        };
        let now = current_timestamp();

        while s.receive_chain_length < until {
            let (message_key, next_chain_key) = P::kdf_ck(&chain_key)?;
            wipe(std::mem::replace(&mut chain_key, next_chain_key));

            s.skipped_sequence += 1;
            s.skipped_keys.insert(
                (remote_bytes.clone(), s.receive_chain_length),
                SkippedKey {
                    key: message_key,
                    stored_at: now,
                    sequence: s.skipped_sequence,
                },
            );
            s.receive_chain_length += 1;
        }
        s.receive_chain_key = Some(chain_key);

        self.evict_overflow(s);
        Ok(())
    }

    /// Кэш не больше max_skip: вытесняем самые старые
    fn evict_overflow(&self, s: &mut RatchetState<P>) {
        use tracing::debug;

        let limit = usize::try_from(self.max_skip).unwrap_or(usize::MAX);
        if s.skipped_keys.len() <= limit {
            return;
        }

        let mut by_age: Vec<(u64, SkippedKeyId)> = s
            .skipped_keys
            .iter()
            .map(|(id, skipped)| (skipped.sequence, id.clone()))
            .collect();
        by_age.sort_unstable_by_key(|(sequence, _)| *sequence);

        let excess = s.skipped_keys.len() - limit;
        for (_, id) in by_age.into_iter().take(excess) {
            if let Some(evicted) = s.skipped_keys.remove(&id) {
                let SkippedKey { key, .. } = evicted;
                wipe(key);
            }
        }
        debug!(target: "crypto::ratchet", evicted = excess, "Evicted oldest skipped keys");
    }

    /// DH ratchet step
    ///
    /// 1. DH(local, new_remote) → receive chain
    /// 2. Новая локальная пара
    /// 3. DH(new_local, new_remote) → send chain
    fn dh_ratchet(s: &mut RatchetState<P>, remote: P::AgreementPublicKey) -> Result<()> {
        use tracing::debug;

        let dh_receive = P::diffie_hellman(&s.local_ratchet_private, &remote)?;
        let (intermediate_root, receive_chain_key) = P::kdf_rk(&s.root_key, &dh_receive)?;

        let (new_private, new_public) = P::generate_agreement_keys()?;
        let dh_send = P::diffie_hellman(&new_private, &remote)?;
        let (next_root, send_chain_key) = P::kdf_rk(&intermediate_root, &dh_send)?;
        wipe(intermediate_root);

        s.previous_chain_length = s.send_chain_length;
        s.send_chain_length = 0;
        s.receive_chain_length = 0;

        wipe(std::mem::replace(&mut s.root_key, next_root));
        if let Some(old) = s.receive_chain_key.replace(receive_chain_key) {
            wipe(old);
        }
        if let Some(old) = s.send_chain_key.replace(send_chain_key) {
            wipe(old);
        }
        wipe(std::mem::replace(&mut s.local_ratchet_private, new_private));
        s.local_ratchet_public = new_public;

        debug!(
            target: "crypto::ratchet",
            peer_id = %s.peer_id,
            remote_ratchet = %fingerprint(remote.as_ref()),
            local_ratchet = %fingerprint(s.local_ratchet_public.as_ref()),
            previous_chain_length = s.previous_chain_length,
            "DH ratchet step completed"
        );
        s.remote_ratchet_public = Some(remote);
        Ok(())
    }

    fn open(message_key: P::AeadKey, envelope: &EncryptedEnvelope) -> Result<Vec<u8>> {
        let ad = envelope.associated_data();
        let opened = P::aead_decrypt(&message_key, &envelope.nonce, &envelope.ciphertext, Some(&ad));
        wipe(message_key);
        opened.map_err(|_| EngineError::DecryptionFailed("authentication failed".to_string()))
    }
}

/// Сохранённый skipped key
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SerializableSkippedKey {
    ratchet_public_key: Vec<u8>,
    index: u64,
    message_key: Vec<u8>,
    stored_at: i64,
    sequence: u64,
}

/// Serializable session format for storage
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SerializableRatchetState {
    session_id: String,
    peer_id: String,
    suite_id: u16,
    #[zeroize(skip)]
    role: SessionRole,
    root_key: Vec<u8>,
    send_chain_key: Option<Vec<u8>>,
    receive_chain_key: Option<Vec<u8>>,
    local_ratchet_private: Vec<u8>,
    remote_ratchet_public: Option<Vec<u8>>,
    send_chain_length: u64,
    receive_chain_length: u64,
    previous_chain_length: u64,
    skipped_keys: Vec<SerializableSkippedKey>,
    skipped_sequence: u64,
    #[zeroize(skip)]
    pending_prekey: Option<PrekeyHeader>,
    base_key: Vec<u8>,
    created_at: i64,
}

impl SerializableRatchetState {
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| CryptoError::SerializationError(e.to_string()).into())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| CryptoError::DeserializationError(e.to_string()).into())
    }
}

impl fmt::Debug for SerializableRatchetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializableRatchetState")
            .field("session_id", &self.session_id)
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}
