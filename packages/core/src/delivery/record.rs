// Учёт входящих сообщений для дедупликации между push и poll

use crate::delivery::conversation::ConversationId;
use crate::utils::time::current_timestamp;

/// Статус обработки входящего сообщения
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundStatus {
    Pending,
    Processed,
    Failed,
}

/// Откуда пришло сообщение
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Push,
    Poll,
    /// Вызов `Engine::handle_inbound` напрямую
    Direct,
}

/// Одна запись на message_id, какой бы транспорт его ни доставил
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessageRecord {
    pub message_id: String,
    pub conversation_id: ConversationId,
    pub sender_id: String,
    pub status: InboundStatus,
    /// Транспорт последней попытки
    pub transport: TransportKind,
    pub first_seen_at: i64,
    pub attempts: u32,
}

impl InboundMessageRecord {
    pub fn pending(
        message_id: &str,
        conversation_id: ConversationId,
        sender_id: &str,
        transport: TransportKind,
    ) -> Self {
        Self {
            message_id: message_id.to_string(),
            conversation_id,
            sender_id: sender_id.to_string(),
            status: InboundStatus::Pending,
            transport,
            first_seen_at: current_timestamp(),
            attempts: 1,
        }
    }

    /// Можно ли начать новую попытку обработки
    pub fn is_retriable(&self) -> bool {
        self.status == InboundStatus::Failed
    }
}
