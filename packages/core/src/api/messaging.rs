// API для отправки и получения сообщений

use crate::api::Engine;
use crate::crypto::provider::CryptoProvider;
use crate::delivery::{InboundOutcome, PollSummary, TransportKind};
use crate::error::Result;
use crate::protocol::envelope::EncryptedEnvelope;
use crate::protocol::transport::{InboundDelivery, Transport};
use std::sync::Arc;
use tokio::task::JoinHandle;

impl<P: CryptoProvider> Engine<P> {
    /// Зашифровать сообщение для peer'а.
    ///
    /// Передать envelope транспорту (например, через `EnvelopeCodec::encode`) должен вызывающий.
    pub async fn send_message(&self, peer_id: &str, plaintext: &[u8]) -> Result<EncryptedEnvelope> {
        use tracing::debug;

        let envelope = self.sessions.encrypt(peer_id, plaintext).await?;
        debug!(
            target: "engine",
            peer_id = %peer_id,
            chain_length = envelope.chain_length,
            handshake = envelope.prekey.is_some(),
            "Message encrypted"
        );
        Ok(envelope)
    }

    /// Точка входа для любого транспорта.
    ///
    /// Подтверждение (`outcome.ack()`) отправляет вызывающий; `poll_once` и
    /// `attach_push` делают это сами.
    pub async fn handle_inbound(&self, raw_envelope: &[u8], sender_id: &str, message_id: &str) -> InboundOutcome {
        self.delivery
            .on_inbound(
                InboundDelivery::new(raw_envelope.to_vec(), sender_id, message_id),
                TransportKind::Direct,
            )
            .await
    }

    /// Один poll-цикл транспорта
    pub async fn poll_once(&self, transport: &dyn Transport) -> Result<PollSummary> {
        self.delivery.poll_once(transport).await
    }

    /// Подключить push-канал транспорта
    pub fn attach_push(&self, transport: Arc<dyn Transport>) -> JoinHandle<()> {
        self.delivery.attach_push(transport)
    }
}
