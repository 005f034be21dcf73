use std::path::PathBuf;

use rollcall_notify::SmtpConfig;

/// Runtime configuration, loaded from `ROLLCALL_*` environment
/// variables with defaults. SMTP credentials are never hard-coded;
/// leaving them unset disables delivery (attempts are logged as
/// failed).
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Maximum probe-to-gallery distance for a positive match.
    pub tolerance: f32,
    /// Bound on the notification queue.
    pub notify_queue: usize,
    /// Percentage below which a low-attendance alert is queued.
    pub low_attendance_threshold: f32,
    pub smtp: SmtpConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        Self {
            db_path,
            tolerance: env_f32("ROLLCALL_TOLERANCE", 0.55),
            notify_queue: env_usize("ROLLCALL_NOTIFY_QUEUE", 64),
            low_attendance_threshold: env_f32("ROLLCALL_LOW_ATTENDANCE_THRESHOLD", 75.0),
            smtp: SmtpConfig {
                host: env_string("ROLLCALL_SMTP_HOST", "smtp.gmail.com"),
                port: env_u16("ROLLCALL_SMTP_PORT", 587),
                username: env_string("ROLLCALL_SMTP_USER", ""),
                password: env_string("ROLLCALL_SMTP_PASSWORD", ""),
                from_name: env_string("ROLLCALL_SMTP_FROM_NAME", "Attendance System"),
                from_addr: std::env::var("ROLLCALL_SMTP_FROM")
                    .or_else(|_| std::env::var("ROLLCALL_SMTP_USER"))
                    .unwrap_or_default(),
                timeout_secs: env_u64("ROLLCALL_SMTP_TIMEOUT_SECS", 15),
            },
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
