// Время

/// Текущее время, секунды Unix
pub fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Текущее время, миллисекунды Unix
pub fn current_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
