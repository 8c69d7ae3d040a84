// Directory: публикация и получение PublicKeyBundle
//
// Сам сервер вне движка; здесь только trait и in-memory реализация для тестов.

use crate::crypto::handshake::PublicKeyBundle;
use crate::crypto::keys::OneTimePrekeyPublic;
use crate::error::DirectoryError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Клиент directory-сервиса
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Опубликовать bundle локальной identity
    async fn publish(&self, bundle: PublicKeyBundle) -> Result<(), DirectoryError>;

    /// Догрузить one-time prekeys (после replenish)
    async fn upload_one_time_prekeys(&self, prekeys: Vec<OneTimePrekeyPublic>) -> Result<(), DirectoryError>;

    /// Получить bundle собеседника
    async fn fetch(&self, peer_id: &str) -> Result<PublicKeyBundle, DirectoryError>;
}

struct PublishedEntry {
    bundle: PublicKeyBundle,
    one_time_prekeys: VecDeque<OneTimePrekeyPublic>,
}

#[derive(Default)]
struct DirectoryState {
    entries: HashMap<String, PublishedEntry>,
    failure: Option<DirectoryError>,
    latency: Option<Duration>,
    /// Задержка `fetch` bundle'а конкретного участника, поверх общей
    fetch_latency: HashMap<String, Duration>,
}

/// Общий реестр bundle'ов в памяти.
///
/// Каждый участник получает свой [`MemoryDirectoryClient`] через [`MemoryDirectory::client`].
/// Каждый one-time prekey выдаётся не более одного раза.
#[derive(Default)]
pub struct MemoryDirectory {
    state: Mutex<DirectoryState>,
    fetch_count: AtomicUsize,
}

impl MemoryDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Клиент, публикующий от имени `owner_id`
    pub fn client(self: &Arc<Self>, owner_id: &str) -> MemoryDirectoryClient {
        MemoryDirectoryClient {
            owner_id: owner_id.to_string(),
            directory: Arc::clone(self),
        }
    }

    /// Положить bundle напрямую (например, подделанный в тесте)
    pub fn insert(&self, owner_id: &str, mut bundle: PublicKeyBundle) {
        let mut one_time_prekeys = VecDeque::new();
        if let Some(prekey) = bundle.one_time_prekey.take() {
            one_time_prekeys.push_back(prekey);
        }
        self.state.lock().entries.insert(
            owner_id.to_string(),
            PublishedEntry {
                bundle,
                one_time_prekeys,
            },
        );
    }

    /// Все последующие вызовы завершаются этой ошибкой (`None` снимает отказ)
    pub fn set_failure(&self, failure: Option<DirectoryError>) {
        self.state.lock().failure = failure;
    }

    /// Искусственная задержка каждого вызова
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    /// Искусственная задержка `fetch` только для bundle'а `peer_id`
    pub fn set_fetch_latency(&self, peer_id: &str, latency: Option<Duration>) {
        let mut state = self.state.lock();
        match latency {
            Some(latency) => state.fetch_latency.insert(peer_id.to_string(), latency),
            None => state.fetch_latency.remove(peer_id),
        };
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Сколько one-time prekeys участника ещё не выдано
    pub fn available_one_time_prekeys(&self, owner_id: &str) -> usize {
        self.state
            .lock()
            .entries
            .get(owner_id)
            .map_or(0, |entry| entry.one_time_prekeys.len())
    }

    async fn simulate_network(&self) -> Result<(), DirectoryError> {
        let (latency, failure) = {
            let state = self.state.lock();
            (state.latency, state.failure.clone())
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    fn take_bundle(&self, peer_id: &str) -> Result<PublicKeyBundle, DirectoryError> {
        let mut state = self.state.lock();
        let entry = state
            .entries
            .get_mut(peer_id)
            .ok_or_else(|| DirectoryError::NotFound(peer_id.to_string()))?;

        let mut bundle = entry.bundle.clone();
        bundle.one_time_prekey = entry.one_time_prekeys.pop_front();
        Ok(bundle)
    }
}

/// Handle одного участника к [`MemoryDirectory`]
#[derive(Clone)]
pub struct MemoryDirectoryClient {
    owner_id: String,
    directory: Arc<MemoryDirectory>,
}

#[async_trait]
impl DirectoryClient for MemoryDirectoryClient {
    async fn publish(&self, bundle: PublicKeyBundle) -> Result<(), DirectoryError> {
        self.directory.simulate_network().await?;
        self.directory.insert(&self.owner_id, bundle);
        Ok(())
    }

    async fn upload_one_time_prekeys(&self, prekeys: Vec<OneTimePrekeyPublic>) -> Result<(), DirectoryError> {
        self.directory.simulate_network().await?;
        let mut state = self.directory.state.lock();
        let entry = state
            .entries
            .get_mut(&self.owner_id)
            .ok_or_else(|| DirectoryError::NotFound(self.owner_id.clone()))?;
        entry.one_time_prekeys.extend(prekeys);
        Ok(())
    }

    async fn fetch(&self, peer_id: &str) -> Result<PublicKeyBundle, DirectoryError> {
        self.directory.fetch_count.fetch_add(1, Ordering::SeqCst);
        let peer_latency = self.directory.state.lock().fetch_latency.get(peer_id).copied();
        if let Some(latency) = peer_latency {
            tokio::time::sleep(latency).await;
        }
        self.directory.simulate_network().await?;
        self.directory.take_bundle(peer_id)
    }
}
