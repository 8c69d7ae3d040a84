// Сетевая граница движка: envelope, его wire-кодировка, внешние коллабораторы

pub mod directory;
pub mod envelope;
pub mod transport;
pub mod validation;
pub mod wire;

pub use directory::{DirectoryClient, MemoryDirectory, MemoryDirectoryClient};
pub use envelope::{EncryptedEnvelope, ENVELOPE_VERSION};
pub use transport::{AckOutcome, InboundDelivery, MemoryTransport, PushHandler, Transport};
pub use wire::{EnvelopeCodec, WireFormat};
