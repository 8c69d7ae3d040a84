// Транспорт: два входящих канала (push и poll) и подтверждения
//
// Реальный транспорт (WebSocket, HTTP) предоставляет приложение.

use crate::error::TransportError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Одно входящее сообщение, как его отдал транспорт
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundDelivery {
    pub raw_envelope: Vec<u8>,
    pub sender_id: String,
    pub message_id: String,
}

impl InboundDelivery {
    pub fn new(raw_envelope: Vec<u8>, sender_id: &str, message_id: &str) -> Self {
        Self {
            raw_envelope,
            sender_id: sender_id.to_string(),
            message_id: message_id.to_string(),
        }
    }
}

/// Результат обработки для сервера
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    Delivered,
    /// `retryable == true`: сервер может доставить сообщение повторно
    Rejected { retryable: bool, reason: String },
}

/// Обработчик push-сообщений. Вызывается из контекста транспорта, не должен блокировать.
pub type PushHandler = Box<dyn Fn(InboundDelivery) + Send + Sync>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Подписаться на push-канал (заменяет предыдущий обработчик)
    fn on_push(&self, handler: PushHandler);

    /// Забрать пачку ещё не подтверждённых сообщений
    async fn poll(&self) -> Result<Vec<InboundDelivery>, TransportError>;

    async fn acknowledge(&self, message_id: &str, outcome: AckOutcome) -> Result<(), TransportError>;
}

#[derive(Default)]
struct TransportState {
    unacknowledged: Vec<InboundDelivery>,
    handler: Option<Arc<PushHandler>>,
    acknowledgements: Vec<(String, AckOutcome)>,
    poll_latency: Option<Duration>,
    closed: bool,
}

/// Транспорт в памяти: очередь для poll, ручной push, журнал подтверждений
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<TransportState>,
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Поставить сообщение в очередь poll (до подтверждения)
    pub fn enqueue(&self, delivery: InboundDelivery) {
        self.state.lock().unacknowledged.push(delivery);
    }

    /// Доставить через push. `false`, если никто не подписан.
    pub fn push(&self, delivery: InboundDelivery) -> bool {
        // Обработчик вызывается без lock'а
        let handler = self.state.lock().handler.clone();
        match handler {
            Some(handler) => {
                (*handler)(delivery);
                true
            }
            None => false,
        }
    }

    /// Отписать push-обработчик (закрывает канал у подписчика)
    pub fn disconnect_push(&self) {
        self.state.lock().handler = None;
    }

    pub fn set_poll_latency(&self, latency: Option<Duration>) {
        self.state.lock().poll_latency = latency;
    }

    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.handler = None;
    }

    pub fn acknowledgements(&self) -> Vec<(String, AckOutcome)> {
        self.state.lock().acknowledgements.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().unacknowledged.len()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn on_push(&self, handler: PushHandler) {
        self.state.lock().handler = Some(Arc::new(handler));
    }

    async fn poll(&self) -> Result<Vec<InboundDelivery>, TransportError> {
        let latency = {
            let state = self.state.lock();
            if state.closed {
                return Err(TransportError::Closed);
            }
            state.poll_latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(self.state.lock().unacknowledged.clone())
    }

    async fn acknowledge(&self, message_id: &str, outcome: AckOutcome) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }

        // Retryable rejection оставляет сообщение в очереди для повторной доставки
        let keep = matches!(outcome, AckOutcome::Rejected { retryable: true, .. });
        if !keep {
            state.unacknowledged.retain(|d| d.message_id != message_id);
        }
        state.acknowledgements.push((message_id.to_string(), outcome));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_poll_returns_until_acknowledged() {
        let transport = MemoryTransport::new();
        transport.enqueue(InboundDelivery::new(vec![1], "alice", "m1"));
        transport.enqueue(InboundDelivery::new(vec![2], "alice", "m2"));

        assert_eq!(transport.poll().await.unwrap().len(), 2);

        transport.acknowledge("m1", AckOutcome::Delivered).await.unwrap();
        transport
            .acknowledge(
                "m2",
                AckOutcome::Rejected {
                    retryable: true,
                    reason: "later".to_string(),
                },
            )
            .await
            .unwrap();

        let remaining = transport.poll().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].message_id, "m2");
        assert_eq!(transport.acknowledgements().len(), 2);
    }

    #[tokio::test]
    async fn test_push_reaches_handler() {
        let transport = MemoryTransport::new();
        assert!(!transport.push(InboundDelivery::new(vec![], "alice", "m0")));

        let received = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&received);
        transport.on_push(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(transport.push(InboundDelivery::new(vec![], "alice", "m1")));
        assert_eq!(received.load(Ordering::SeqCst), 1);

        transport.close();
        assert_eq!(transport.poll().await, Err(TransportError::Closed));
    }
}
