//! Хранилище
//!
//! Движок не владеет форматом хранения: он пишет через два trait'а,
//! реализации которых предоставляет приложение.
//!
//! - [`LocalStore`]: расшифрованные сообщения (async, может ходить на диск)
//! - [`IdentityStorage`]: приватный материал KeyStore (sync, вызывается под lock'ом KeyStore)

pub mod memory;
pub mod models;

use crate::error::StoreError;
use async_trait::async_trait;

pub use memory::MemoryStorage;
pub use models::{StoredKeyMaterial, StoredMessage};

/// Долговременное хранилище расшифрованных сообщений
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn append(&self, message: StoredMessage) -> Result<(), StoreError>;

    async fn exists(&self, message_id: &str) -> Result<bool, StoreError>;
}

/// Хранилище приватного материала KeyStore
pub trait IdentityStorage: Send + Sync {
    fn save_identity(&self, material: &StoredKeyMaterial) -> Result<(), StoreError>;

    /// `None` если identity ещё ни разу не сохранялась.
    fn load_identity(&self) -> Result<Option<StoredKeyMaterial>, StoreError>;
}
