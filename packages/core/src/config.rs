//! Конфигурация движка
//!
//! Все настраиваемые параметры собраны здесь. Конфигурация передаётся явно
//! в `Engine::new` и дальше в компоненты; глобального синглтона нет.

use std::str::FromStr;
use std::time::Duration;

/// Основная структура конфигурации
#[derive(Debug, Clone)]
pub struct Config {
    // ============================================
    // КЛЮЧИ
    // ============================================

    /// Сколько one-time prekeys генерировать и поддерживать в запасе
    pub one_time_prekey_count: u32,

    /// Сколько хранить вытесненный signed prekey после ротации (в секундах)
    /// По умолчанию: 30 дней
    pub prekey_retention_secs: i64,

    /// PBKDF2: количество итераций для деривации ключа шифрования из пароля
    pub pbkdf2_iterations: u32,

    /// Длина соли для PBKDF2 (в байтах)
    pub salt_length: usize,

    // ============================================
    // DOUBLE RATCHET ПАРАМЕТРЫ
    // ============================================

    /// Максимальное количество пропущенных сообщений (DoS защита)
    pub max_skipped_messages: u32,

    /// Максимальный возраст пропущенных ключей сообщений (в секундах)
    /// По умолчанию: 7 дней
    pub max_skipped_message_age_secs: i64,

    // ============================================
    // СЕТЕВЫЕ ПАРАМЕТРЫ
    // ============================================

    /// Таймаут запроса к directory
    pub directory_timeout: Duration,

    /// Таймаут одного poll-цикла транспорта
    pub poll_timeout: Duration,

    /// Ёмкость канала push-доставок
    pub push_channel_capacity: usize,

    /// Сколько держать расшифрованное, но не сохранённое сообщение до повторной доставки
    pub parked_message_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            one_time_prekey_count: 100,
            prekey_retention_secs: 30 * 24 * 60 * 60, // 30 days
            pbkdf2_iterations: 100_000,
            salt_length: 32,

            max_skipped_messages: 1000,
            max_skipped_message_age_secs: 7 * 24 * 60 * 60, // 7 days

            directory_timeout: Duration::from_secs(10),
            poll_timeout: Duration::from_secs(30),
            push_channel_capacity: 256,
            parked_message_ttl: Duration::from_secs(60 * 60),
        }
    }
}

impl Config {
    /// Создать конфигурацию из переменных окружения
    ///
    /// Нераспознанные значения игнорируются, остаётся значение по умолчанию.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = env_value("COURIER_ONE_TIME_PREKEYS") {
            config.one_time_prekey_count = val;
        }
        if let Some(val) = env_value("COURIER_MAX_SKIPPED_MESSAGES") {
            config.max_skipped_messages = val;
        }
        if let Some(val) = env_value("COURIER_MAX_SKIPPED_MESSAGE_AGE_SECS") {
            config.max_skipped_message_age_secs = val;
        }
        if let Some(ms) = env_value("COURIER_DIRECTORY_TIMEOUT_MS") {
            config.directory_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_value("COURIER_POLL_TIMEOUT_MS") {
            config.poll_timeout = Duration::from_millis(ms);
        }
        if let Some(val) = env_value("COURIER_PBKDF2_ITERATIONS") {
            config.pbkdf2_iterations = val;
        }
        if let Some(secs) = env_value("COURIER_PARKED_MESSAGE_TTL_SECS") {
            config.parked_message_ttl = Duration::from_secs(secs);
        }

        config
    }
}

fn env_value<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(target: "config", variable = name, value = %raw, "ignoring unparsable override");
            None
        }
    }
}
