//! Доставка входящих сообщений
//!
//! Push и poll могут доставить одно и то же сообщение; DeliveryCoordinator
//! сводит оба канала в один идемпотентный конвейер и пишет результат в LocalStore.

pub mod conversation;
pub mod coordinator;
pub mod record;

pub use conversation::ConversationId;
pub use coordinator::{DeliveryCoordinator, InboundOutcome, PollSummary};
pub use record::{InboundMessageRecord, InboundStatus, TransportKind};
