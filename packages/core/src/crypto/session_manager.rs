//! Session Manager
//!
//! Одна сессия (RatchetState) на собеседника. Машина состояний:
//! `NoSession → Established`, без teardown.
//!
//! ## Блокировки
//!
//! ```text
//! sessions: parking_lot::Mutex<HashMap<peer_id, Slot>>    короткий, никогда не держится через await
//! Slot:     Arc<tokio::sync::Mutex<PeerSession>>          сериализует операции одного peer'а
//! ```
//!
//! Операции с разными peer'ами идут параллельно. Запрос к directory выполняется
//! под lock'ом своего slot'а, но до любой мутации состояния; сама мутация
//! синхронна и не прерывается await'ом.
//!
//! Slot без сессии удаляется из реестра сразу после неудачной операции:
//! sender_id приходит от транспорта и не должен раздувать реестр.

use crate::config::Config;
use crate::crypto::handshake::{PrekeyHeader, VerifiedBundle, X3DHProtocol};
use crate::crypto::keys::KeyStore;
use crate::crypto::messaging::{RatchetEngine, RatchetState, SerializableRatchetState, SessionInfo, SessionRole};
use crate::crypto::provider::CryptoProvider;
use crate::error::{EngineError, Result, StoreError};
use crate::protocol::directory::DirectoryClient;
use crate::protocol::envelope::EncryptedEnvelope;
use crate::utils::fingerprint;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Сколько проигравших base keys помнить на одного peer'а
const MAX_SUPERSEDED_HANDSHAKES: usize = 16;

/// Сессия с одним peer'ом и base keys его handshake'ов, проигравших локальной сессии
struct PeerSession<P: CryptoProvider> {
    state: Option<RatchetState<P>>,
    superseded: VecDeque<Vec<u8>>,
}

impl<P: CryptoProvider> Default for PeerSession<P> {
    fn default() -> Self {
        Self {
            state: None,
            superseded: VecDeque::new(),
        }
    }
}

impl<P: CryptoProvider> PeerSession<P> {
    fn is_vacant(&self) -> bool {
        self.state.is_none() && self.superseded.is_empty()
    }

    fn is_superseded(&self, base_key: &[u8]) -> bool {
        self.superseded.iter().any(|key| key.as_slice() == base_key)
    }

    fn mark_superseded(&mut self, base_key: &[u8]) {
        if self.superseded.len() == MAX_SUPERSEDED_HANDSHAKES {
            self.superseded.pop_front();
        }
        self.superseded.push_back(base_key.to_vec());
    }
}

type SessionSlot<P> = Arc<tokio::sync::Mutex<PeerSession<P>>>;

pub struct SessionManager<P: CryptoProvider> {
    local_id: String,
    key_store: Arc<RwLock<KeyStore<P>>>,
    directory: Arc<dyn DirectoryClient>,
    ratchet: RatchetEngine<P>,
    directory_timeout: Duration,
    max_skipped_message_age_secs: i64,
    sessions: Mutex<HashMap<String, SessionSlot<P>>>,
}

impl<P: CryptoProvider> SessionManager<P> {
    pub fn new(
        local_id: &str,
        key_store: Arc<RwLock<KeyStore<P>>>,
        directory: Arc<dyn DirectoryClient>,
        config: &Config,
    ) -> Self {
        Self {
            local_id: local_id.to_string(),
            key_store,
            directory,
            ratchet: RatchetEngine::new(config.max_skipped_messages),
            directory_timeout: config.directory_timeout,
            max_skipped_message_age_secs: config.max_skipped_message_age_secs,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    fn slot(&self, peer_id: &str) -> SessionSlot<P> {
        Arc::clone(self.sessions.lock().entry(peer_id.to_string()).or_default())
    }

    fn existing_slot(&self, peer_id: &str) -> Option<SessionSlot<P>> {
        self.sessions.lock().get(peer_id).cloned()
    }

    /// Убрать slot без сессии из реестра, если его больше никто не держит
    fn release_if_vacant(&self, peer_id: &str, slot: SessionSlot<P>) {
        let mut sessions = self.sessions.lock();
        let registered = match sessions.get(peer_id) {
            Some(registered) => Arc::ptr_eq(registered, &slot),
            None => false,
        };
        // Реестр плюс наш clone; новые clone'ы выдаются только под lock'ом реестра
        if !registered || Arc::strong_count(&slot) != 2 {
            return;
        }
        let vacant = slot.try_lock().map_or(false, |peer| peer.is_vacant());
        if vacant {
            sessions.remove(peer_id);
        }
    }

    /// Гарантировать наличие сессии с peer'ом (идемпотентно).
    ///
    /// Если сессии нет: bundle из directory → проверка подписи → X3DH → RatchetState.
    pub async fn ensure_session(&self, peer_id: &str) -> Result<SessionInfo> {
        let slot = self.slot(peer_id);
        let result = {
            let mut peer = slot.lock().await;
            self.establish_if_missing(peer_id, &mut peer.state)
                .await
                .map(|state| state.info())
        };
        self.release_if_vacant(peer_id, slot);
        result
    }

    /// Зашифровать сообщение для peer'а, при необходимости установив сессию
    pub async fn encrypt(&self, peer_id: &str, plaintext: &[u8]) -> Result<EncryptedEnvelope> {
        let slot = self.slot(peer_id);
        let result = {
            let mut peer = slot.lock().await;
            match self.establish_if_missing(peer_id, &mut peer.state).await {
                Ok(state) => self.ratchet.encrypt(state, plaintext),
                Err(e) => Err(e),
            }
        };
        self.release_if_vacant(peer_id, slot);
        result
    }

    /// Расшифровать сообщение от peer'а.
    ///
    /// Envelope с PrekeyHeader и новым base key создаёт (или заменяет) сессию
    /// как responder; иначе используется существующая сессия.
    pub async fn decrypt(&self, peer_id: &str, envelope: &EncryptedEnvelope) -> Result<Vec<u8>> {
        let Some(header) = envelope.prekey else {
            // Без заголовка сессию не создать: slot не заводится
            let slot = self
                .existing_slot(peer_id)
                .ok_or_else(|| EngineError::SessionNotEstablished(peer_id.to_string()))?;
            let mut peer = slot.lock().await;
            let state = peer
                .state
                .as_mut()
                .ok_or_else(|| EngineError::SessionNotEstablished(peer_id.to_string()))?;
            return self.ratchet.decrypt(state, envelope);
        };

        let slot = self.slot(peer_id);
        let result = {
            let mut peer = slot.lock().await;
            self.decrypt_with_header(peer_id, header, &mut peer, envelope).await
        };
        self.release_if_vacant(peer_id, slot);
        result
    }

    async fn decrypt_with_header(
        &self,
        peer_id: &str,
        header: PrekeyHeader,
        peer: &mut PeerSession<P>,
        envelope: &EncryptedEnvelope,
    ) -> Result<Vec<u8>> {
        use tracing::{info, warn};

        let base_key = envelope.ratchet_public_key.as_slice();

        // Продолжение уже принятого handshake
        if let Some(state) = peer.state.as_mut() {
            if state.base_key() == base_key {
                return self.ratchet.decrypt(state, envelope);
            }
        }

        if peer.is_superseded(base_key) {
            return Err(EngineError::SupersededHandshake(peer_id.to_string()));
        }

        // Одновременная инициация: побеждает сессия участника с меньшим id.
        // Проигравший base key запоминается, чтобы его повторная доставка
        // после сходимости не заменила рабочую сессию.
        let local_wins = peer.state.as_ref().map_or(false, |existing| {
            existing.role() == SessionRole::Initiator
                && existing.awaiting_reply()
                && self.local_id.as_str() < peer_id
        });
        if local_wins {
            warn!(
                target: "crypto::session",
                peer_id = %peer_id,
                base_key = %fingerprint(base_key),
                "Rejecting competing handshake, local session takes precedence"
            );
            peer.mark_superseded(base_key);
            return Err(EngineError::SupersededHandshake(peer_id.to_string()));
        }

        let remote = self.fetch_verified_bundle(peer_id).await?;
        let (state, plaintext) = self.accept_handshake(peer_id, header, &remote, envelope)?;

        info!(
            target: "crypto::session",
            peer_id = %peer_id,
            session_id = %state.session_id(),
            replaced = peer.state.is_some(),
            "Session established as responder"
        );
        peer.state = Some(state);
        Ok(plaintext)
    }

    pub async fn has_session(&self, peer_id: &str) -> bool {
        match self.existing_slot(peer_id) {
            Some(slot) => slot.lock().await.state.is_some(),
            None => false,
        }
    }

    pub async fn session_info(&self, peer_id: &str) -> Option<SessionInfo> {
        let slot = self.existing_slot(peer_id)?;
        let peer = slot.lock().await;
        peer.state.as_ref().map(RatchetState::info)
    }

    /// Peer'ы с установленной сессией, по алфавиту
    pub async fn session_ids(&self) -> Vec<String> {
        let slots: Vec<(String, SessionSlot<P>)> = self
            .sessions
            .lock()
            .iter()
            .map(|(peer, slot)| (peer.clone(), Arc::clone(slot)))
            .collect();

        let mut ids = Vec::new();
        for (peer, slot) in slots {
            if slot.lock().await.state.is_some() {
                ids.push(peer);
            }
        }
        ids.sort();
        ids
    }

    /// Снимок сессии для сохранения
    pub async fn export_session(&self, peer_id: &str) -> Option<SerializableRatchetState> {
        let slot = self.existing_slot(peer_id)?;
        let peer = slot.lock().await;
        peer.state.as_ref().map(RatchetState::to_serializable)
    }

    /// Восстановить сессию из снимка (заменяет текущую)
    pub async fn restore_session(&self, peer_id: &str, snapshot: &SerializableRatchetState) -> Result<()> {
        use tracing::debug;

        if snapshot.peer_id() != peer_id {
            return Err(StoreError::Corrupted(format!(
                "session snapshot belongs to {}, not {}",
                snapshot.peer_id(),
                peer_id
            ))
            .into());
        }
        let state = RatchetState::<P>::from_serializable(snapshot)?;

        let slot = self.slot(peer_id);
        let mut peer = slot.lock().await;
        debug!(target: "crypto::session", peer_id = %peer_id, "Restored session from snapshot");
        peer.state = Some(state);
        Ok(())
    }

    /// Удалить устаревшие skipped keys во всех сессиях
    pub async fn cleanup_skipped_keys(&self) -> usize {
        let slots: Vec<SessionSlot<P>> = self.sessions.lock().values().cloned().collect();
        let mut removed = 0;
        for slot in slots {
            if let Some(state) = slot.lock().await.state.as_mut() {
                removed += state.cleanup_skipped_keys(self.max_skipped_message_age_secs);
            }
        }
        removed
    }

    async fn establish_if_missing<'a>(
        &self,
        peer_id: &str,
        slot: &'a mut Option<RatchetState<P>>,
    ) -> Result<&'a mut RatchetState<P>> {
        use tracing::info;

        if slot.is_none() {
            let state = self.initiate(peer_id).await?;
            info!(
                target: "crypto::session",
                peer_id = %peer_id,
                session_id = %state.session_id(),
                "Session established as initiator"
            );
            *slot = Some(state);
        }
        slot.as_mut()
            .ok_or_else(|| EngineError::SessionNotEstablished(peer_id.to_string()))
    }

    async fn initiate(&self, peer_id: &str) -> Result<RatchetState<P>> {
        // Без identity в сеть не ходим
        self.key_store.read().identity()?;

        let remote = self.fetch_verified_bundle(peer_id).await?;

        let (shared_secret, handshake) = {
            let store = self.key_store.read();
            let identity = store.identity()?;
            X3DHProtocol::<P>::perform_as_initiator(identity.agreement_private(), &remote)?
        };

        RatchetState::initiator(peer_id, &shared_secret, handshake)
    }

    /// Bundle из directory (с таймаутом) + проверка подписи signed prekey
    async fn fetch_verified_bundle(&self, peer_id: &str) -> Result<VerifiedBundle<P>> {
        use tracing::{debug, warn};

        let bundle = match tokio::time::timeout(self.directory_timeout, self.directory.fetch(peer_id)).await {
            Err(_) => {
                warn!(target: "crypto::session", peer_id = %peer_id, "Directory lookup timed out");
                return Err(EngineError::Timeout("directory lookup"));
            }
            Ok(Err(e)) => {
                warn!(target: "crypto::session", peer_id = %peer_id, error = %e, "Directory lookup failed");
                return Err(EngineError::MissingPeerBundle {
                    peer_id: peer_id.to_string(),
                    reason: e.to_string(),
                });
            }
            Ok(Ok(bundle)) => bundle,
        };

        let verified = bundle.verify::<P>().map_err(|e| {
            warn!(target: "crypto::session", peer_id = %peer_id, error = %e, "Rejected peer bundle");
            EngineError::InvalidPeerBundle {
                peer_id: peer_id.to_string(),
                reason: e.to_string(),
            }
        })?;

        debug!(
            target: "crypto::session",
            peer_id = %peer_id,
            identity = %fingerprint(verified.identity_agreement_key.as_ref()),
            one_time_prekey = verified.one_time_prekey.is_some(),
            "Verified peer bundle"
        );
        Ok(verified)
    }

    /// Responder-сторона X3DH плюс расшифровка первого сообщения.
    ///
    /// Выполняется целиком под write-lock'ом KeyStore. One-time prekey
    /// расходуется только если первое сообщение прошло аутентификацию.
    fn accept_handshake(
        &self,
        peer_id: &str,
        header: PrekeyHeader,
        remote: &VerifiedBundle<P>,
        envelope: &EncryptedEnvelope,
    ) -> Result<(RatchetState<P>, Vec<u8>)> {
        use tracing::warn;

        let mut store = self.key_store.write();
        let remote_ephemeral = P::agreement_public_key_from_bytes(envelope.ratchet_public_key.to_vec())?;

        let shared_secret = {
            let identity = store.identity()?;
            let signed_prekey = store.signed_prekey_private(header.signed_prekey_id)?;
            let one_time_prekey = header
                .one_time_prekey_id
                .map(|id| store.one_time_prekey_private(id))
                .transpose()?;

            X3DHProtocol::<P>::perform_as_responder(
                identity.agreement_private(),
                signed_prekey,
                one_time_prekey,
                &remote.identity_agreement_key,
                &remote_ephemeral,
            )?
        };

        let signed_prekey = store.signed_prekey_private(header.signed_prekey_id)?.clone();
        let mut state = RatchetState::responder(peer_id, &shared_secret, signed_prekey, &envelope.ratchet_public_key)?;

        let plaintext = self.ratchet.decrypt(&mut state, envelope).map_err(|e| {
            warn!(
                target: "crypto::session",
                peer_id = %peer_id,
                error = %e,
                "First message under handshake failed to authenticate"
            );
            e
        })?;

        if let Some(id) = header.one_time_prekey_id {
            store.consume_one_time_prekey(id)?;
        }
        Ok((state, plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ClassicSuiteProvider;
    use crate::error::DirectoryError;
    use crate::protocol::directory::MemoryDirectory;
    use crate::storage::MemoryStorage;

    type P = ClassicSuiteProvider;

    struct Participant {
        sessions: SessionManager<P>,
        key_store: Arc<RwLock<KeyStore<P>>>,
        storage: Arc<MemoryStorage>,
    }

    async fn participant(directory: &Arc<MemoryDirectory>, id: &str, config: &Config) -> Participant {
        let storage = Arc::new(MemoryStorage::new());
        let mut store = KeyStore::<P>::new(storage.clone(), config.prekey_retention_secs);
        store.generate_identity().unwrap();
        let (_, one_time_prekeys) = store.generate_prekey_material(5).unwrap();

        let client = directory.client(id);
        client.publish(store.export_public_bundle(false).unwrap()).await.unwrap();
        client.upload_one_time_prekeys(one_time_prekeys).await.unwrap();

        let key_store = Arc::new(RwLock::new(store));
        Participant {
            sessions: SessionManager::new(id, Arc::clone(&key_store), Arc::new(client), config),
            key_store,
            storage,
        }
    }

    #[tokio::test]
    async fn test_establish_and_exchange() {
        let config = Config::default();
        let directory = MemoryDirectory::new();
        let alice = participant(&directory, "alice", &config).await;
        let bob = participant(&directory, "bob", &config).await;

        let hello = alice.sessions.encrypt("bob", b"hello").await.unwrap();
        assert!(hello.prekey.and_then(|h| h.one_time_prekey_id).is_some());
        assert_eq!(bob.sessions.decrypt("alice", &hello).await.unwrap(), b"hello");
        assert_eq!(bob.key_store.read().one_time_prekey_count(), 4);

        let reply = bob.sessions.encrypt("alice", b"hi").await.unwrap();
        assert_eq!(alice.sessions.decrypt("bob", &reply).await.unwrap(), b"hi");

        let info = alice.sessions.session_info("bob").await.unwrap();
        assert_eq!(info.role, SessionRole::Initiator);
        assert!(!info.awaiting_reply);
        assert_eq!(bob.sessions.session_ids().await, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_ensure_session_is_idempotent() {
        let config = Config::default();
        let directory = MemoryDirectory::new();
        let alice = participant(&directory, "alice", &config).await;
        let _bob = participant(&directory, "bob", &config).await;

        let first = alice.sessions.ensure_session("bob").await.unwrap();
        let second = alice.sessions.ensure_session("bob").await.unwrap();
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(directory.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_bundle_creates_no_session() {
        let config = Config::default();
        let directory = MemoryDirectory::new();
        let alice = participant(&directory, "alice", &config).await;
        let bob = participant(&directory, "bob", &config).await;

        let mut forged = bob.key_store.read().export_public_bundle(false).unwrap();
        forged.signed_prekey_signature[0] ^= 0xFF;
        directory.insert("bob", forged);

        let result = alice.sessions.ensure_session("bob").await;
        assert!(matches!(result, Err(EngineError::InvalidPeerBundle { .. })));
        assert!(!alice.sessions.has_session("bob").await);
    }

    #[tokio::test]
    async fn test_directory_failures_are_retryable() {
        let config = Config::default();
        let directory = MemoryDirectory::new();
        let alice = participant(&directory, "alice", &config).await;

        let missing = alice.sessions.ensure_session("carol").await.unwrap_err();
        assert!(matches!(missing, EngineError::MissingPeerBundle { .. }));
        assert!(missing.is_retryable());

        directory.set_failure(Some(DirectoryError::Unreachable("down".to_string())));
        let unreachable = alice.sessions.encrypt("carol", b"x").await.unwrap_err();
        assert!(matches!(unreachable, EngineError::MissingPeerBundle { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_directory_timeout() {
        let config = Config {
            directory_timeout: Duration::from_millis(50),
            ..Config::default()
        };
        let directory = MemoryDirectory::new();
        let alice = participant(&directory, "alice", &config).await;
        let _bob = participant(&directory, "bob", &config).await;

        directory.set_latency(Some(Duration::from_secs(5)));
        let result = alice.sessions.ensure_session("bob").await;
        assert!(matches!(result, Err(EngineError::Timeout(_))));
        assert!(!alice.sessions.has_session("bob").await);
    }

    #[tokio::test]
    async fn test_requires_local_identity() {
        let config = Config::default();
        let directory = MemoryDirectory::new();
        let _bob = participant(&directory, "bob", &config).await;

        let empty = Arc::new(RwLock::new(KeyStore::<P>::new(Arc::new(MemoryStorage::new()), 0)));
        let sessions = SessionManager::new("alice", empty, Arc::new(directory.client("alice")), &config);

        assert!(matches!(sessions.ensure_session("bob").await, Err(EngineError::NoIdentityLoaded)));
        assert_eq!(directory.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_forged_first_message_does_not_burn_prekey() {
        let config = Config::default();
        let directory = MemoryDirectory::new();
        let alice = participant(&directory, "alice", &config).await;
        let bob = participant(&directory, "bob", &config).await;

        let hello = alice.sessions.encrypt("bob", b"hello").await.unwrap();
        let mut forged = hello.clone();
        forged.ciphertext[3] ^= 0x10;

        let result = bob.sessions.decrypt("alice", &forged).await;
        assert!(matches!(result, Err(EngineError::DecryptionFailed(_))));
        assert_eq!(bob.key_store.read().one_time_prekey_count(), 5);
        assert!(!bob.sessions.has_session("alice").await);

        assert_eq!(bob.sessions.decrypt("alice", &hello).await.unwrap(), b"hello");
        assert_eq!(bob.key_store.read().one_time_prekey_count(), 4);

        // Тот же handshake второй раз: prekey уже израсходован, сессия не трогается
        let again = alice.sessions.encrypt("bob", b"again").await.unwrap();
        assert_eq!(bob.sessions.decrypt("alice", &again).await.unwrap(), b"again");
    }

    #[tokio::test]
    async fn test_message_without_session_or_header() {
        let config = Config::default();
        let directory = MemoryDirectory::new();
        let alice = participant(&directory, "alice", &config).await;
        let bob = participant(&directory, "bob", &config).await;

        let mut envelope = alice.sessions.encrypt("bob", b"hello").await.unwrap();
        envelope.prekey = None;
        assert!(matches!(
            bob.sessions.decrypt("alice", &envelope).await,
            Err(EngineError::SessionNotEstablished(_))
        ));
    }

    #[tokio::test]
    async fn test_simultaneous_initiation_lower_id_wins() {
        let config = Config::default();
        let directory = MemoryDirectory::new();
        let alice = participant(&directory, "alice", &config).await;
        let bob = participant(&directory, "bob", &config).await;

        let from_alice = alice.sessions.encrypt("bob", b"from alice").await.unwrap();
        let from_bob = bob.sessions.encrypt("alice", b"from bob").await.unwrap();

        // "alice" < "bob": Alice держит свою сессию, Bob переключается на неё
        let rejected = alice.sessions.decrypt("bob", &from_bob).await.unwrap_err();
        assert!(matches!(rejected, EngineError::SupersededHandshake(_)));
        assert!(!rejected.is_retryable());
        assert_eq!(bob.sessions.decrypt("alice", &from_alice).await.unwrap(), b"from alice");
        assert_eq!(bob.sessions.session_info("alice").await.unwrap().role, SessionRole::Responder);

        let reply = bob.sessions.encrypt("alice", b"converged").await.unwrap();
        assert!(reply.prekey.is_none());
        assert_eq!(alice.sessions.decrypt("bob", &reply).await.unwrap(), b"converged");
        let converged = alice.sessions.session_info("bob").await.unwrap();
        assert!(!converged.awaiting_reply);

        // Повторная доставка проигравшего handshake после сходимости
        let redelivered = alice.sessions.decrypt("bob", &from_bob).await.unwrap_err();
        assert!(matches!(redelivered, EngineError::SupersededHandshake(_)));
        assert_eq!(
            alice.sessions.session_info("bob").await.unwrap().session_id,
            converged.session_id
        );

        let later = bob.sessions.encrypt("alice", b"still here").await.unwrap();
        assert_eq!(alice.sessions.decrypt("bob", &later).await.unwrap(), b"still here");
        let answer = alice.sessions.encrypt("bob", b"me too").await.unwrap();
        assert_eq!(bob.sessions.decrypt("alice", &answer).await.unwrap(), b"me too");
    }

    #[tokio::test]
    async fn test_unknown_senders_leave_no_slots() {
        let config = Config::default();
        let directory = MemoryDirectory::new();
        let alice = participant(&directory, "alice", &config).await;
        let bob = participant(&directory, "bob", &config).await;

        let mut headerless = alice.sessions.encrypt("bob", b"hello").await.unwrap();
        let with_header = headerless.clone();
        headerless.prekey = None;

        for n in 0..50 {
            let sender = format!("spoofed-{}", n);
            assert!(matches!(
                bob.sessions.decrypt(&sender, &headerless).await,
                Err(EngineError::SessionNotEstablished(_))
            ));
        }
        // Handshake от отправителя без bundle в directory
        assert!(matches!(
            bob.sessions.decrypt("mallory", &with_header).await,
            Err(EngineError::MissingPeerBundle { .. })
        ));
        assert!(bob.sessions.encrypt("nobody", b"x").await.is_err());
        assert!(bob.sessions.ensure_session("nobody").await.is_err());

        assert_eq!(bob.sessions.sessions.lock().len(), 0);
        assert!(bob.sessions.session_ids().await.is_empty());

        assert_eq!(bob.sessions.decrypt("alice", &with_header).await.unwrap(), b"hello");
        assert_eq!(bob.sessions.sessions.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_prekey_kept_when_identity_save_fails() {
        let config = Config::default();
        let directory = MemoryDirectory::new();
        let alice = participant(&directory, "alice", &config).await;
        let bob = participant(&directory, "bob", &config).await;

        let hello = alice.sessions.encrypt("bob", b"hello").await.unwrap();

        bob.storage.set_fail_identity_saves(true);
        let failed = bob.sessions.decrypt("alice", &hello).await.unwrap_err();
        assert!(matches!(failed, EngineError::Storage(_)));
        assert!(failed.is_retryable());
        assert_eq!(bob.key_store.read().one_time_prekey_count(), 5);
        assert!(!bob.sessions.has_session("alice").await);

        bob.storage.set_fail_identity_saves(false);
        assert_eq!(bob.sessions.decrypt("alice", &hello).await.unwrap(), b"hello");
        assert_eq!(bob.key_store.read().one_time_prekey_count(), 4);
    }

    #[tokio::test]
    async fn test_export_and_restore_session() {
        let config = Config::default();
        let directory = MemoryDirectory::new();
        let alice = participant(&directory, "alice", &config).await;
        let bob = participant(&directory, "bob", &config).await;

        let hello = alice.sessions.encrypt("bob", b"hello").await.unwrap();
        bob.sessions.decrypt("alice", &hello).await.unwrap();

        let snapshot = bob.sessions.export_session("alice").await.unwrap();
        let bytes = snapshot.to_bytes().unwrap();

        let restored = SessionManager::new(
            "bob",
            Arc::clone(&bob.key_store),
            Arc::new(directory.client("bob")),
            &config,
        );
        let snapshot = SerializableRatchetState::from_bytes(&bytes).unwrap();
        assert!(restored.restore_session("carol", &snapshot).await.is_err());
        restored.restore_session("alice", &snapshot).await.unwrap();

        let next = alice.sessions.encrypt("bob", b"after restore").await.unwrap();
        assert_eq!(restored.decrypt("alice", &next).await.unwrap(), b"after restore");
        assert_eq!(restored.cleanup_skipped_keys().await, 0);
    }
}
