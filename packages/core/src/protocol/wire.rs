// Wire format для EncryptedEnvelope
//
// Два представления одного и того же объекта:
// - JSON (camelCase, бинарные поля в base64) для текстовых каналов
// - MessagePack (named fields, бинарные поля как bin) для WebSocket
//
// Криптографии здесь нет. Любая ошибка декодирования → MalformedEnvelope.

use crate::crypto::handshake::PrekeyHeader;
use crate::crypto::SuiteID;
use crate::error::{CryptoError, EngineError, Result};
use crate::protocol::envelope::EncryptedEnvelope;
use crate::protocol::validation::{validate_envelope, UncheckedEnvelope};
use crate::utils::b64::serde_base64;
use serde::{Deserialize, Serialize};

/// Представление envelope на проводе
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Json,
    MessagePack,
}

impl WireFormat {
    /// JSON всегда начинается с `{`, MessagePack map с байта 0x80..=0x8f / 0xde / 0xdf
    pub fn detect(bytes: &[u8]) -> WireFormat {
        match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') => WireFormat::Json,
            _ => WireFormat::MessagePack,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct JsonEnvelope {
    version: u8,
    suite_id: SuiteID,
    #[serde(with = "serde_base64")]
    ratchet_public_key: Vec<u8>,
    chain_length: u64,
    previous_chain_length: u64,
    #[serde(with = "serde_base64")]
    nonce: Vec<u8>,
    #[serde(with = "serde_base64")]
    ciphertext: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prekey: Option<PrekeyHeader>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinaryEnvelope {
    version: u8,
    suite_id: SuiteID,
    #[serde(with = "serde_bytes")]
    ratchet_public_key: Vec<u8>,
    chain_length: u64,
    previous_chain_length: u64,
    #[serde(with = "serde_bytes")]
    nonce: Vec<u8>,
    #[serde(with = "serde_bytes")]
    ciphertext: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prekey: Option<PrekeyHeader>,
}

macro_rules! impl_envelope_dto {
    ($dto:ident) => {
        impl From<&EncryptedEnvelope> for $dto {
            fn from(envelope: &EncryptedEnvelope) -> Self {
                Self {
                    version: envelope.version,
                    suite_id: envelope.suite_id,
                    ratchet_public_key: envelope.ratchet_public_key.to_vec(),
                    chain_length: envelope.chain_length,
                    previous_chain_length: envelope.previous_chain_length,
                    nonce: envelope.nonce.clone(),
                    ciphertext: envelope.ciphertext.clone(),
                    prekey: envelope.prekey,
                }
            }
        }

        impl From<$dto> for UncheckedEnvelope {
            fn from(dto: $dto) -> Self {
                Self {
                    version: dto.version,
                    suite_id: dto.suite_id,
                    ratchet_public_key: dto.ratchet_public_key,
                    chain_length: dto.chain_length,
                    previous_chain_length: dto.previous_chain_length,
                    nonce: dto.nonce,
                    ciphertext: dto.ciphertext,
                    prekey: dto.prekey,
                }
            }
        }
    };
}

impl_envelope_dto!(JsonEnvelope);
impl_envelope_dto!(BinaryEnvelope);

/// Сериализация EncryptedEnvelope ↔ байты
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    /// Упаковать envelope в выбранный формат
    pub fn encode(envelope: &EncryptedEnvelope, format: WireFormat) -> Result<Vec<u8>> {
        match format {
            WireFormat::Json => serde_json::to_vec(&JsonEnvelope::from(envelope))
                .map_err(|e| CryptoError::SerializationError(format!("JSON pack error: {}", e)).into()),
            WireFormat::MessagePack => rmp_serde::to_vec_named(&BinaryEnvelope::from(envelope))
                .map_err(|e| CryptoError::SerializationError(format!("MessagePack pack error: {}", e)).into()),
        }
    }

    /// Распаковать envelope, определив формат по первому байту
    pub fn decode(bytes: &[u8]) -> Result<EncryptedEnvelope> {
        Self::decode_as(bytes, WireFormat::detect(bytes))
    }

    /// Распаковать envelope в заданном формате
    pub fn decode_as(bytes: &[u8], format: WireFormat) -> Result<EncryptedEnvelope> {
        if bytes.is_empty() {
            return Err(EngineError::MalformedEnvelope("empty input".to_string()));
        }

        let unchecked: UncheckedEnvelope = match format {
            WireFormat::Json => serde_json::from_slice::<JsonEnvelope>(bytes)
                .map_err(|e| EngineError::MalformedEnvelope(format!("JSON unpack error: {}", e)))?
                .into(),
            WireFormat::MessagePack => rmp_serde::from_slice::<BinaryEnvelope>(bytes)
                .map_err(|e| EngineError::MalformedEnvelope(format!("MessagePack unpack error: {}", e)))?
                .into(),
        };

        validate_envelope(unchecked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::envelope::ENVELOPE_VERSION;

    fn sample() -> EncryptedEnvelope {
        EncryptedEnvelope {
            version: ENVELOPE_VERSION,
            suite_id: 1,
            ratchet_public_key: [0xAB; 32],
            chain_length: 4,
            previous_chain_length: 2,
            nonce: vec![1; 12],
            ciphertext: vec![2; 40],
            prekey: Some(PrekeyHeader {
                signed_prekey_id: 1,
                one_time_prekey_id: Some(17),
            }),
        }
    }

    #[test]
    fn test_both_formats_decode_to_same_envelope() {
        let envelope = sample();
        let json = EnvelopeCodec::encode(&envelope, WireFormat::Json).unwrap();
        let packed = EnvelopeCodec::encode(&envelope, WireFormat::MessagePack).unwrap();

        assert_eq!(WireFormat::detect(&json), WireFormat::Json);
        assert_eq!(WireFormat::detect(&packed), WireFormat::MessagePack);
        assert!(packed.len() < json.len());

        assert_eq!(EnvelopeCodec::decode(&json).unwrap(), envelope);
        assert_eq!(EnvelopeCodec::decode(&packed).unwrap(), envelope);
    }

    #[test]
    fn test_json_uses_camel_case_and_base64() {
        let json = EnvelopeCodec::encode(&sample(), WireFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["chainLength"], 4);
        assert_eq!(value["previousChainLength"], 2);
        assert_eq!(value["prekey"]["oneTimePrekeyId"], 17);
        assert!(value["ratchetPublicKey"].is_string());
    }

    fn json_with(field: &str, replacement: serde_json::Value) -> Vec<u8> {
        let json = EnvelopeCodec::encode(&sample(), WireFormat::Json).unwrap();
        let mut value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        value[field] = replacement;
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        let cases = vec![
            json_with("chainLength", serde_json::json!("4")),
            json_with("chainLength", serde_json::json!(-1)),
            json_with("previousChainLength", serde_json::json!(2.5)),
            json_with("ratchetPublicKey", serde_json::json!("AAAA")),
            json_with("nonce", serde_json::json!("%%%")),
            json_with("suiteId", serde_json::json!(99)),
            b"{\"version\":1}".to_vec(),
            b"{not json".to_vec(),
        ];
        for bytes in cases {
            assert!(
                matches!(EnvelopeCodec::decode(&bytes), Err(EngineError::MalformedEnvelope(_))),
                "accepted {}",
                String::from_utf8_lossy(&bytes)
            );
        }
    }

    #[test]
    fn test_malformed_binary_is_rejected() {
        let packed = EnvelopeCodec::encode(&sample(), WireFormat::MessagePack).unwrap();
        let truncated = &packed[..packed.len() / 2];
        assert!(matches!(
            EnvelopeCodec::decode_as(truncated, WireFormat::MessagePack),
            Err(EngineError::MalformedEnvelope(_))
        ));
        assert!(matches!(EnvelopeCodec::decode(&[]), Err(EngineError::MalformedEnvelope(_))));
        assert!(matches!(EnvelopeCodec::decode(&[0xc1, 0x00]), Err(EngineError::MalformedEnvelope(_))));
    }
}
