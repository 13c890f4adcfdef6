//! Engine configuration
//!
//! Defaults mirror the production tuning; every knob can be overridden
//! through `GAMMA_*` environment variables (loaded after `dotenv`).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Full configuration surface of the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upstream WebSocket URL
    pub ws_url: String,
    /// Upstream API key, sent in the auth frame
    pub api_key: String,
    /// Index symbol carrying the underlying spot
    pub index_symbol: String,
    /// Root filter for traded contracts (e.g. SPXW)
    pub option_root: String,

    /// Gamma-snapshot cadence, seconds
    pub snapshot_interval_s: u64,
    /// NBBO staleness cutoff, seconds
    pub quote_stale_s: u64,
    /// IV cache TTL, seconds
    pub surface_ttl_s: u64,
    /// Fallback IV TTL, seconds
    pub surface_fallback_ttl_s: u64,
    /// IV cache bound
    pub surface_capacity: usize,
    /// Trade channel size
    pub channel_capacity: usize,
    /// Backpressure tolerance before shedding, seconds
    pub backpressure_max_s: u64,
    /// Reconnect backoff base, seconds
    pub reconnect_initial_s: u64,
    /// Reconnect backoff cap, seconds
    pub reconnect_cap_s: u64,
    /// Auth/subscription retries before the ingest task exits
    pub auth_max_retries: u32,
    /// Subscription batch size
    pub subscribe_batch: usize,
    /// Delay between subscription batches, milliseconds
    pub subscribe_batch_delay_ms: u64,

    /// Shares per contract
    pub contract_multiplier: u32,
    /// Risk-free rate
    pub risk_free_rate: f64,
    /// Fallback anchor IV
    pub fallback_base_iv: f64,
    /// Fallback slope per unit |ln(K/S)|
    pub fallback_iv_slope: f64,
    /// Underlying bucket width for the surface key, points
    pub surface_under_bucket: f64,
    /// Time-to-expiry bucket width for the surface key, seconds
    pub surface_ttm_bucket_s: u64,
    /// Seconds after midnight UTC at which contracts expire (index close)
    pub expiry_close_utc_s: u64,

    /// Chain snapshot CSV seeding the symbol universe and fallback spot
    pub snapshot_path: Option<PathBuf>,
    /// Gamma store directory
    pub data_dir: PathBuf,
    /// Live mode: a missing chain snapshot is fatal
    pub live: bool,
    /// Per-phase shutdown timeout, seconds
    pub shutdown_phase_timeout_s: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://socket.polygon.io/options".to_string(),
            api_key: String::new(),
            index_symbol: "I:SPX".to_string(),
            option_root: "SPXW".to_string(),
            snapshot_interval_s: 1,
            quote_stale_s: 5,
            surface_ttl_s: 30,
            surface_fallback_ttl_s: 10,
            surface_capacity: 50_000,
            channel_capacity: 4096,
            backpressure_max_s: 5,
            reconnect_initial_s: 1,
            reconnect_cap_s: 60,
            auth_max_retries: 5,
            subscribe_batch: 50,
            subscribe_batch_delay_ms: 50,
            contract_multiplier: 100,
            risk_free_rate: 0.0,
            fallback_base_iv: 0.2,
            fallback_iv_slope: 0.5,
            surface_under_bucket: 1.0,
            surface_ttm_bucket_s: 60,
            expiry_close_utc_s: 20 * 3600,
            snapshot_path: None,
            data_dir: PathBuf::from("./data/gamma"),
            live: false,
            shutdown_phase_timeout_s: 5,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by any `GAMMA_*` environment variables present.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        env_string("GAMMA_WS_URL", &mut config.ws_url);
        env_string("GAMMA_API_KEY", &mut config.api_key);
        env_string("GAMMA_INDEX_SYMBOL", &mut config.index_symbol);
        env_string("GAMMA_OPTION_ROOT", &mut config.option_root);
        env_parse("GAMMA_SNAPSHOT_INTERVAL_S", &mut config.snapshot_interval_s);
        env_parse("GAMMA_QUOTE_STALE_S", &mut config.quote_stale_s);
        env_parse("GAMMA_SURFACE_TTL_S", &mut config.surface_ttl_s);
        env_parse(
            "GAMMA_SURFACE_FALLBACK_TTL_S",
            &mut config.surface_fallback_ttl_s,
        );
        env_parse("GAMMA_SURFACE_CAPACITY", &mut config.surface_capacity);
        env_parse("GAMMA_CHANNEL_CAPACITY", &mut config.channel_capacity);
        env_parse("GAMMA_BACKPRESSURE_MAX_S", &mut config.backpressure_max_s);
        env_parse("GAMMA_RECONNECT_INITIAL_S", &mut config.reconnect_initial_s);
        env_parse("GAMMA_RECONNECT_CAP_S", &mut config.reconnect_cap_s);
        env_parse("GAMMA_AUTH_MAX_RETRIES", &mut config.auth_max_retries);
        env_parse("GAMMA_SUBSCRIBE_BATCH", &mut config.subscribe_batch);
        env_parse(
            "GAMMA_SUBSCRIBE_BATCH_DELAY_MS",
            &mut config.subscribe_batch_delay_ms,
        );
        env_parse("GAMMA_CONTRACT_MULTIPLIER", &mut config.contract_multiplier);
        env_parse("GAMMA_RISK_FREE_RATE", &mut config.risk_free_rate);
        env_parse("GAMMA_FALLBACK_BASE_IV", &mut config.fallback_base_iv);
        env_parse("GAMMA_FALLBACK_IV_SLOPE", &mut config.fallback_iv_slope);
        env_parse("GAMMA_EXPIRY_CLOSE_UTC_S", &mut config.expiry_close_utc_s);
        env_parse("GAMMA_LIVE", &mut config.live);
        env_parse(
            "GAMMA_SHUTDOWN_PHASE_TIMEOUT_S",
            &mut config.shutdown_phase_timeout_s,
        );

        if let Ok(path) = std::env::var("GAMMA_SNAPSHOT_PATH") {
            if !path.is_empty() {
                config.snapshot_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(dir) = std::env::var("GAMMA_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }

        config
    }

    /// Gamma-snapshot cadence
    #[must_use]
    pub const fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_s)
    }

    /// NBBO staleness window in milliseconds
    #[must_use]
    pub const fn quote_stale_ms(&self) -> u64 {
        self.quote_stale_s * 1_000
    }

    /// Longest a blocked enqueue waits before shedding
    #[must_use]
    pub const fn backpressure_max(&self) -> Duration {
        Duration::from_secs(self.backpressure_max_s)
    }

    /// Per-phase shutdown budget
    #[must_use]
    pub const fn shutdown_phase_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_phase_timeout_s)
    }
}

fn env_string(key: &str, slot: &mut String) {
    if let Ok(value) = std::env::var(key) {
        if !value.is_empty() {
            *slot = value;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(value) = std::env::var(key) {
        if let Ok(parsed) = value.parse() {
            *slot = parsed;
        }
    }
}
