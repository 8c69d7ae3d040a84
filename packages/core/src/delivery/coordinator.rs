// DeliveryCoordinator: один конвейер для push и poll
//
// Каждый message_id обрабатывается не более одного раза:
//
//   claim (record table) → LocalStore.exists → decode → SessionManager.decrypt
//     → LocalStore.append → processed → ack
//
// Расшифрованный текст паркуется до успешного append: повторная доставка
// после сбоя хранилища не требует повторной расшифровки (ключ уже израсходован).
// Припаркованное живёт не дольше `Config::parked_message_ttl`.

use crate::config::Config;
use crate::crypto::provider::CryptoProvider;
use crate::crypto::session_manager::SessionManager;
use crate::delivery::conversation::ConversationId;
use crate::delivery::record::{InboundMessageRecord, InboundStatus, TransportKind};
use crate::error::{EngineError, ErrorClass, Result};
use crate::protocol::transport::{AckOutcome, InboundDelivery, Transport};
use crate::protocol::wire::EnvelopeCodec;
use crate::storage::{LocalStore, StoredMessage};
use crate::utils::time::current_timestamp_millis;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use zeroize::Zeroizing;

/// Итог обработки одного входящего сообщения
#[derive(Debug)]
pub enum InboundOutcome {
    /// Расшифровано и записано в LocalStore
    Processed { conversation_id: ConversationId },
    /// Уже было обработано раньше (другим транспортом или до рестарта)
    Duplicate { conversation_id: ConversationId },
    /// Прямо сейчас обрабатывается другим вызовом; он и отправит ack
    InFlight,
    Failed {
        conversation_id: ConversationId,
        error: EngineError,
    },
}

impl InboundOutcome {
    /// Подтверждение для транспорта. `None`: подтверждать не нужно.
    pub fn ack(&self) -> Option<AckOutcome> {
        match self {
            InboundOutcome::Processed { .. } | InboundOutcome::Duplicate { .. } => Some(AckOutcome::Delivered),
            InboundOutcome::InFlight => None,
            InboundOutcome::Failed { error, .. } => Some(AckOutcome::Rejected {
                retryable: error.class() != ErrorClass::Fatal,
                reason: error.to_string(),
            }),
        }
    }

    pub fn is_processed(&self) -> bool {
        matches!(self, InboundOutcome::Processed { .. })
    }
}

/// Сводка одного poll-цикла
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub processed: usize,
    pub duplicates: usize,
    pub in_flight: usize,
    pub failed: usize,
}

impl PollSummary {
    fn record(&mut self, outcome: &InboundOutcome) {
        match outcome {
            InboundOutcome::Processed { .. } => self.processed += 1,
            InboundOutcome::Duplicate { .. } => self.duplicates += 1,
            InboundOutcome::InFlight => self.in_flight += 1,
            InboundOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

enum Claim {
    Fresh,
    AlreadyProcessed,
    InFlight,
}

/// Запись в статусе Pending. Если обработку прервали (drop future),
/// запись переходит в Failed и сообщение можно доставить повторно.
struct PendingClaim<'a> {
    records: &'a Mutex<HashMap<String, InboundMessageRecord>>,
    message_id: &'a str,
    settled: bool,
}

impl<'a> PendingClaim<'a> {
    fn settle(mut self, status: InboundStatus) {
        self.set_status(status);
        self.settled = true;
    }

    fn set_status(&self, status: InboundStatus) {
        if let Some(record) = self.records.lock().get_mut(self.message_id) {
            record.status = status;
        }
    }
}

impl Drop for PendingClaim<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.set_status(InboundStatus::Failed);
        }
    }
}

/// Расшифрованный текст, ждущий записи в LocalStore
struct Parked {
    plaintext: Zeroizing<Vec<u8>>,
    parked_at: Instant,
}

pub struct DeliveryCoordinator<P: CryptoProvider> {
    local_id: String,
    sessions: Arc<SessionManager<P>>,
    local_store: Arc<dyn LocalStore>,
    records: Mutex<HashMap<String, InboundMessageRecord>>,
    parked: Mutex<HashMap<String, Parked>>,
    poll_timeout: Duration,
    push_channel_capacity: usize,
    parked_ttl: Duration,
}

impl<P: CryptoProvider> DeliveryCoordinator<P> {
    pub fn new(sessions: Arc<SessionManager<P>>, local_store: Arc<dyn LocalStore>, config: &Config) -> Self {
        Self {
            local_id: sessions.local_id().to_string(),
            sessions,
            local_store,
            records: Mutex::new(HashMap::new()),
            parked: Mutex::new(HashMap::new()),
            poll_timeout: config.poll_timeout,
            push_channel_capacity: config.push_channel_capacity,
            parked_ttl: config.parked_message_ttl,
        }
    }

    pub fn conversation_id_with(&self, peer_id: &str) -> ConversationId {
        ConversationId::derive(&self.local_id, peer_id)
    }

    pub fn record(&self, message_id: &str) -> Option<InboundMessageRecord> {
        self.records.lock().get(message_id).cloned()
    }

    /// Сколько расшифрованных сообщений ждут успешной записи в LocalStore
    pub fn parked_count(&self) -> usize {
        self.parked.lock().len()
    }

    /// Выбросить припаркованные тексты старше TTL. Возвращает число удалённых.
    ///
    /// Повторная доставка такого сообщения уже не расшифруется.
    pub fn purge_expired_parked(&self) -> usize {
        use tracing::warn;

        let ttl = self.parked_ttl;
        let mut parked = self.parked.lock();
        let before = parked.len();
        parked.retain(|message_id, entry| {
            let keep = entry.parked_at.elapsed() < ttl;
            if !keep {
                warn!(target: "delivery", message_id = %message_id, "Dropping expired parked plaintext");
            }
            keep
        });
        before - parked.len()
    }

    /// Обработать одно входящее сообщение с любого транспорта
    pub async fn on_inbound(&self, delivery: InboundDelivery, via: TransportKind) -> InboundOutcome {
        use tracing::{debug, info, warn};

        let conversation_id = self.conversation_id_with(&delivery.sender_id);
        self.purge_expired_parked();

        match self.claim(&delivery, conversation_id, via) {
            Claim::AlreadyProcessed => {
                debug!(target: "delivery", message_id = %delivery.message_id, ?via, "Duplicate delivery");
                return InboundOutcome::Duplicate { conversation_id };
            }
            Claim::InFlight => {
                debug!(target: "delivery", message_id = %delivery.message_id, ?via, "Delivery already in flight");
                return InboundOutcome::InFlight;
            }
            Claim::Fresh => {}
        }

        let claim = PendingClaim {
            records: &self.records,
            message_id: &delivery.message_id,
            settled: false,
        };

        match self.process(&delivery, conversation_id).await {
            Ok(true) => {
                claim.settle(InboundStatus::Processed);
                info!(
                    target: "delivery",
                    message_id = %delivery.message_id,
                    conversation_id = %conversation_id,
                    ?via,
                    "Inbound message stored"
                );
                InboundOutcome::Processed { conversation_id }
            }
            Ok(false) => {
                claim.settle(InboundStatus::Processed);
                debug!(target: "delivery", message_id = %delivery.message_id, "Message already in local store");
                InboundOutcome::Duplicate { conversation_id }
            }
            Err(error) => {
                claim.settle(InboundStatus::Failed);
                warn!(
                    target: "delivery",
                    message_id = %delivery.message_id,
                    sender_id = %delivery.sender_id,
                    error = %error,
                    class = ?error.class(),
                    "Inbound message failed"
                );
                InboundOutcome::Failed { conversation_id, error }
            }
        }
    }

    /// Забрать пачку через poll и прогнать её через `on_inbound` с подтверждениями
    pub async fn poll_once(&self, transport: &dyn Transport) -> Result<PollSummary> {
        use tracing::debug;

        let batch = tokio::time::timeout(self.poll_timeout, transport.poll())
            .await
            .map_err(|_| EngineError::Timeout("poll"))??;

        let mut summary = PollSummary::default();
        for delivery in batch {
            let message_id = delivery.message_id.clone();
            let outcome = self.on_inbound(delivery, TransportKind::Poll).await;
            summary.record(&outcome);
            Self::acknowledge(transport, &message_id, &outcome).await;
        }

        debug!(target: "delivery", ?summary, "Poll cycle finished");
        Ok(summary)
    }

    /// Подписаться на push: обработчик транспорта кладёт сообщения в mpsc,
    /// отдельная задача обрабатывает их по одному. Задача завершается,
    /// когда транспорт отпускает обработчик.
    pub fn attach_push(self: &Arc<Self>, transport: Arc<dyn Transport>) -> JoinHandle<()> {
        use tracing::{debug, warn};

        let (tx, mut rx) = mpsc::channel::<InboundDelivery>(self.push_channel_capacity);
        transport.on_push(Box::new(move |delivery| {
            let message_id = delivery.message_id.clone();
            if let Err(e) = tx.try_send(delivery) {
                // Не подтверждено: сообщение придёт снова через poll
                warn!(target: "delivery", message_id = %message_id, error = %e, "Dropped push delivery");
            }
        }));

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                let message_id = delivery.message_id.clone();
                let outcome = coordinator.on_inbound(delivery, TransportKind::Push).await;
                Self::acknowledge(transport.as_ref(), &message_id, &outcome).await;
            }
            debug!(target: "delivery", "Push channel closed");
        })
    }

    async fn acknowledge(transport: &dyn Transport, message_id: &str, outcome: &InboundOutcome) {
        use tracing::warn;

        if let Some(ack) = outcome.ack() {
            // Повтор ack'а на совести транспорта
            if let Err(e) = transport.acknowledge(message_id, ack).await {
                warn!(target: "delivery", message_id = %message_id, error = %e, "Acknowledgement failed");
            }
        }
    }

    fn claim(&self, delivery: &InboundDelivery, conversation_id: ConversationId, via: TransportKind) -> Claim {
        let mut records = self.records.lock();
        match records.get_mut(&delivery.message_id) {
            Some(record) if record.is_retriable() => {
                record.status = InboundStatus::Pending;
                record.transport = via;
                record.attempts += 1;
                Claim::Fresh
            }
            Some(record) if record.status == InboundStatus::Processed => Claim::AlreadyProcessed,
            Some(_) => Claim::InFlight,
            None => {
                records.insert(
                    delivery.message_id.clone(),
                    InboundMessageRecord::pending(&delivery.message_id, conversation_id, &delivery.sender_id, via),
                );
                Claim::Fresh
            }
        }
    }

    /// `Ok(true)`: записано сейчас, `Ok(false)`: уже было в LocalStore
    async fn process(&self, delivery: &InboundDelivery, conversation_id: ConversationId) -> Result<bool> {
        let message_id = delivery.message_id.as_str();

        if self.local_store.exists(message_id).await? {
            self.parked.lock().remove(message_id);
            return Ok(false);
        }

        let parked = self.parked.lock().remove(message_id);
        let plaintext = match parked {
            Some(entry) => entry.plaintext,
            None => {
                let envelope = EnvelopeCodec::decode(&delivery.raw_envelope)?;
                Zeroizing::new(self.sessions.decrypt(&delivery.sender_id, &envelope).await?)
            }
        };

        // Паркуем до append: переживает и сбой хранилища, и отмену future
        self.parked.lock().insert(
            message_id.to_string(),
            Parked {
                plaintext: plaintext.clone(),
                parked_at: Instant::now(),
            },
        );

        self.local_store
            .append(StoredMessage {
                message_id: message_id.to_string(),
                conversation_id,
                sender_id: delivery.sender_id.clone(),
                plaintext: plaintext.to_vec(),
                timestamp: current_timestamp_millis(),
            })
            .await?;

        self.parked.lock().remove(message_id);
        Ok(true)
    }
}
