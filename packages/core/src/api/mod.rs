// Публичный API движка
//
// Engine создаётся один раз на локальную identity и передаётся по ссылке;
// глобального состояния нет.

pub mod messaging;

use crate::config::Config;
use crate::crypto::handshake::PublicKeyBundle;
use crate::crypto::keys::KeyStore;
use crate::crypto::master_key::SealedKeyMaterial;
use crate::crypto::provider::CryptoProvider;
use crate::crypto::session_manager::SessionManager;
use crate::crypto::ClassicSuiteProvider;
use crate::delivery::{ConversationId, DeliveryCoordinator};
use crate::error::{EngineError, Result};
use crate::protocol::directory::DirectoryClient;
use crate::storage::LocalStore;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;

/// Главный API мессенджера
pub struct Engine<P: CryptoProvider = ClassicSuiteProvider> {
    local_id: String,
    config: Config,
    key_store: Arc<RwLock<KeyStore<P>>>,
    directory: Arc<dyn DirectoryClient>,
    sessions: Arc<SessionManager<P>>,
    delivery: Arc<DeliveryCoordinator<P>>,
}

impl<P: CryptoProvider> Engine<P> {
    pub fn new(
        local_id: &str,
        config: Config,
        key_store: KeyStore<P>,
        directory: Arc<dyn DirectoryClient>,
        local_store: Arc<dyn LocalStore>,
    ) -> Self {
        let key_store = Arc::new(RwLock::new(key_store));
        let sessions = Arc::new(SessionManager::new(
            local_id,
            Arc::clone(&key_store),
            Arc::clone(&directory),
            &config,
        ));
        let delivery = Arc::new(DeliveryCoordinator::new(Arc::clone(&sessions), local_store, &config));

        Self {
            local_id: local_id.to_string(),
            config,
            key_store,
            directory,
            sessions,
            delivery,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn key_store(&self) -> &Arc<RwLock<KeyStore<P>>> {
        &self.key_store
    }

    pub fn sessions(&self) -> &SessionManager<P> {
        &self.sessions
    }

    pub fn delivery(&self) -> &DeliveryCoordinator<P> {
        &self.delivery
    }

    pub fn conversation_id_with(&self, peer_id: &str) -> ConversationId {
        ConversationId::derive(&self.local_id, peer_id)
    }

    /// Загрузить сохранённую identity или создать новую вместе с prekeys.
    ///
    /// Возвращает `true`, если identity была создана.
    pub fn ensure_identity(&self) -> Result<bool> {
        use tracing::info;

        let mut store = self.key_store.write();
        if store.has_identity() || store.load_identity()?.is_some() {
            return Ok(false);
        }

        store.generate_identity()?;
        store.generate_prekey_material(self.config.one_time_prekey_count)?;
        info!(
            target: "engine",
            local_id = %self.local_id,
            one_time_prekeys = self.config.one_time_prekey_count,
            "Generated new identity"
        );
        Ok(true)
    }

    /// Bundle для передачи собеседнику (с одним one-time prekey, если есть)
    pub fn export_own_bundle(&self) -> Result<PublicKeyBundle> {
        self.key_store.read().export_public_bundle(true)
    }

    /// Опубликовать bundle и весь пул one-time prekeys в directory
    pub async fn publish_own_bundle(&self) -> Result<()> {
        use tracing::info;

        let (bundle, one_time_prekeys) = {
            let store = self.key_store.read();
            (store.export_public_bundle(false)?, store.one_time_prekeys_public())
        };
        let prekey_count = one_time_prekeys.len();

        self.with_directory_timeout("directory publish", self.directory.publish(bundle))
            .await?;
        self.with_directory_timeout(
            "directory prekey upload",
            self.directory.upload_one_time_prekeys(one_time_prekeys),
        )
        .await?;

        info!(target: "engine", local_id = %self.local_id, one_time_prekeys = prekey_count, "Published own bundle");
        Ok(())
    }

    /// Догенерировать one-time prekeys до размера пула из конфигурации и загрузить новые.
    ///
    /// Возвращает число загруженных ключей.
    pub async fn replenish_one_time_prekeys(&self) -> Result<usize> {
        use tracing::debug;

        let fresh = self
            .key_store
            .write()
            .replenish_one_time_prekeys(self.config.one_time_prekey_count)?;
        if fresh.is_empty() {
            return Ok(0);
        }

        let count = fresh.len();
        self.with_directory_timeout("directory prekey upload", self.directory.upload_one_time_prekeys(fresh))
            .await?;
        debug!(target: "engine", uploaded = count, "Replenished one-time prekeys");
        Ok(count)
    }

    /// Зашифровать ключевой материал паролем (PBKDF2 с параметрами из конфигурации)
    pub fn seal_identity(&self, password: &str) -> Result<SealedKeyMaterial> {
        self.key_store
            .read()
            .seal_identity(password, self.config.salt_length, self.config.pbkdf2_iterations)
    }

    /// Восстановить identity и prekeys из пакета, созданного `seal_identity`.
    ///
    /// Заменяет текущий материал; уже установленные сессии не трогаются.
    pub fn unseal_identity(&self, sealed: &SealedKeyMaterial, password: &str) -> Result<()> {
        use tracing::info;

        self.key_store.write().unseal_identity(sealed, password)?;
        info!(target: "engine", local_id = %self.local_id, "Restored identity from sealed material");
        Ok(())
    }

    /// Удалить устаревшие skipped message keys во всех сессиях
    pub async fn cleanup_skipped_keys(&self) -> usize {
        self.sessions.cleanup_skipped_keys().await
    }

    async fn with_directory_timeout<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, crate::error::DirectoryError>>,
    {
        tokio::time::timeout(self.config.directory_timeout, call)
            .await
            .map_err(|_| EngineError::Timeout(operation))?
            .map_err(EngineError::from)
    }
}
