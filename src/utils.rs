use chrono::Utc;

/// Wall-clock processing time in milliseconds.
pub fn now_ms() -> i64 {
  Utc::now().timestamp_millis()
}
