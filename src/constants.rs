use rand::Rng;

/// Current local database schema version
/// Older databases are migrated forward on open; newer ones are rejected
pub const SCHEMA_VERSION: u32 = 3;

/// Placeholder stored in `local_video_path` while a recording is still running
pub const RECORDING_SENTINEL: &str = "__RECORDING_IN_PROGRESS__";

/// Default ceiling of not-yet-uploaded records before new captures are refused
pub const DEFAULT_DRAFT_CEILING: u64 = 10;

/// Session id prefix for captures started by an officer
pub const SESSION_PREFIX: &str = "SESSION";

/// Session id prefix for records adopted from orphaned cache files
pub const RECOVERED_PREFIX: &str = "RECOVERED";

pub const PING_PATH: &str = "api/v1/capture/ping";
pub const UPLOAD_PATH: &str = "api/v1/capture/upload";

/// Generate a human-correlatable session id: `<prefix>_<unix ms>_<random suffix>`
pub fn generate_session_id(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!(
        "{}_{}_{}",
        prefix,
        chrono::Utc::now().timestamp_millis(),
        suffix
    )
}

/// Generate a unique record id
pub fn generate_record_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
