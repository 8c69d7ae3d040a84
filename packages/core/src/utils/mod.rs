// Вспомогательные функции

pub mod b64;
pub mod time;

/// Короткий hex-отпечаток публичного ключа для логов.
///
/// Только для публичных данных: приватный материал не логируется вообще.
pub fn fingerprint(public_bytes: &[u8]) -> String {
    let prefix = &public_bytes[..public_bytes.len().min(8)];
    hex::encode(prefix)
}
