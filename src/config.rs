use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::auth::Secrets;
use crate::engine::EngineOptions;
use crate::model::BookingStatus;

/// Runtime settings, read once from `SLOTLINE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub secrets: Secrets,
    pub sweep_interval: Duration,
    pub reserve_lock_timeout: Duration,
    pub notify_queue_capacity: usize,
    /// New bookings start confirmed instead of pending.
    pub auto_confirm: bool,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn parsed<T: FromStr>(name: &str, default: T) -> T {
    match var(name) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("ignoring unparsable {name}={raw:?}");
            default
        }),
        None => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: parsed("SLOTLINE_PORT", 5433),
            bind: var("SLOTLINE_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: PathBuf::from(var("SLOTLINE_DATA_DIR").unwrap_or_else(|| "./data".into())),
            max_connections: parsed("SLOTLINE_MAX_CONNECTIONS", 256),
            compact_threshold: parsed("SLOTLINE_COMPACT_THRESHOLD", 1000),
            secrets: Secrets {
                admin_password: var("SLOTLINE_ADMIN_PASSWORD").unwrap_or_else(|| "slotline".into()),
                channel_secret: var("SLOTLINE_CHANNEL_SECRET"),
                sweep_secret: var("SLOTLINE_SWEEP_SECRET"),
            },
            sweep_interval: Duration::from_secs(parsed("SLOTLINE_SWEEP_INTERVAL_SECS", 300)),
            reserve_lock_timeout: Duration::from_millis(parsed("SLOTLINE_RESERVE_LOCK_TIMEOUT_MS", 2000)),
            notify_queue_capacity: parsed("SLOTLINE_NOTIFY_QUEUE", 1024),
            auto_confirm: parsed("SLOTLINE_AUTO_CONFIRM", false),
            tls_cert: var("SLOTLINE_TLS_CERT"),
            tls_key: var("SLOTLINE_TLS_KEY"),
            metrics_port: var("SLOTLINE_METRICS_PORT").and_then(|p| p.parse().ok()),
        }
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            initial_status: if self.auto_confirm {
                BookingStatus::Confirmed
            } else {
                BookingStatus::Pending
            },
            lock_timeout: self.reserve_lock_timeout,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotline.wal")
    }
}
