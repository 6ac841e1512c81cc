use std::env;
use std::num::NonZeroU32;
use std::time::Duration;
use governor::Quota;

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,

    // Game table and geolocation data
    pub games_config: Option<String>,
    pub geoip_ranges: Option<String>,

    // Latency prober
    pub ping_command: String,
    pub ping_workers: usize,
    pub ping_timeout_secs: u64,

    // Adapters
    pub http_timeout_secs: u64,
    pub qstat_command: String,
    pub qstat_timeout_secs: u64,
    pub adapter_timeout_secs: u64,

    // Rate limiting for refresh requests
    pub refresh_period_secs: u64,
    pub refresh_burst_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            games_config: None,
            geoip_ranges: None,
            ping_command: "ping".to_string(),
            ping_workers: 100,
            ping_timeout_secs: 1,
            http_timeout_secs: 10,
            qstat_command: "qstat".to_string(),
            qstat_timeout_secs: 30,
            adapter_timeout_secs: 120,
            refresh_period_secs: 5,
            refresh_burst_limit: 10,
        }
    }
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            port: parsed("PORT", defaults.port),
            games_config: optional("GAMES_CONFIG"),
            geoip_ranges: optional("GEOIP_RANGES"),
            ping_command: env::var("PING_COMMAND").unwrap_or(defaults.ping_command),
            ping_workers: parsed("PING_WORKERS", defaults.ping_workers),
            ping_timeout_secs: parsed("PING_TIMEOUT_SECS", defaults.ping_timeout_secs),
            http_timeout_secs: parsed("HTTP_TIMEOUT_SECS", defaults.http_timeout_secs),
            qstat_command: env::var("QSTAT_COMMAND").unwrap_or(defaults.qstat_command),
            qstat_timeout_secs: parsed("QSTAT_TIMEOUT_SECS", defaults.qstat_timeout_secs),
            adapter_timeout_secs: parsed("ADAPTER_TIMEOUT_SECS", defaults.adapter_timeout_secs),
            refresh_period_secs: parsed("REFRESH_PERIOD_SECS", defaults.refresh_period_secs),
            refresh_burst_limit: parsed("REFRESH_BURST_LIMIT", defaults.refresh_burst_limit),
        }
    }

    pub fn bind(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn qstat_timeout(&self) -> Duration {
        Duration::from_secs(self.qstat_timeout_secs)
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }

    pub fn refresh_quota(&self) -> Quota {
        let burst = NonZeroU32::new(self.refresh_burst_limit).unwrap_or(NonZeroU32::MIN);
        let period = Duration::from_secs(self.refresh_period_secs.max(1));
        Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(burst)
    }
}
