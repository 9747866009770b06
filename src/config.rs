//! Process configuration, read from environment variables (spec §6). Mirrors
//! `edge_agent`'s `AgentConfig::from_env` style: manual `std::env::var` reads
//! with typed defaults rather than a config-file crate, since the whole
//! surface is a flat list of env vars.

use std::time::Duration;

use crate::bot::ReconnectPolicy;
use crate::manager::{BOTS_PER_WORKER, MAX_RETRIES};
use crate::queue::QUEUE_CAPACITY;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub credentials_path: String,
    pub database_url: Option<String>,
    pub worker_enabled: bool,
    pub bots_per_worker: usize,
    pub queue_capacity: usize,
    pub queue_deadline: Duration,
    pub inspect_timeout: Duration,
    pub inspect_cooldown: Duration,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub reconnect_max_attempts: u32,
    pub max_retries: u32,
    pub health_check_interval: Duration,
    pub health_check_initial_delay: Duration,
    pub stats_interval: Duration,
    pub asset_cache_ttl: Duration,
    pub proxy_url: Option<String>,
    pub allow_refresh: bool,
    pub session_path: String,
    pub blacklist_path: String,
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_millis(name: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_parsed(name, default_ms))
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            listen_addr: format!("0.0.0.0:{}", env_parsed("PORT", 3000u16)),
            credentials_path: env_string("CREDENTIALS_PATH", "./credentials.txt"),
            database_url: std::env::var("DATABASE_URL").ok(),
            worker_enabled: env_parsed("WORKER_ENABLED", false),
            bots_per_worker: env_parsed("BOTS_PER_WORKER", BOTS_PER_WORKER),
            queue_capacity: env_parsed("MAX_QUEUE_SIZE", QUEUE_CAPACITY),
            queue_deadline: env_millis("QUEUE_TIMEOUT", 10_000),
            inspect_timeout: env_millis("INSPECT_TIMEOUT", 10_000),
            inspect_cooldown: env_millis("BOT_COOLDOWN_TIME", 30_000),
            reconnect_base_delay: env_millis("BASE_RECONNECT_DELAY", 30_000),
            reconnect_max_delay: env_millis("MAX_RECONNECT_DELAY", 600_000),
            reconnect_max_attempts: env_parsed("MAX_RECONNECT_ATTEMPTS", 10),
            max_retries: env_parsed("MAX_RETRIES", MAX_RETRIES),
            health_check_interval: env_millis("HEALTH_CHECK_INTERVAL", 60_000),
            health_check_initial_delay: Duration::from_secs(30),
            stats_interval: env_millis("STATS_UPDATE_INTERVAL", 3_000),
            asset_cache_ttl: Duration::from_secs(60),
            proxy_url: std::env::var("PROXY_URL").ok(),
            allow_refresh: env_parsed("ALLOW_REFRESH", false),
            session_path: env_string("SESSION_PATH", "./sessions"),
            blacklist_path: env_string("BLACKLIST_PATH", "./blacklist.txt"),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: self.reconnect_base_delay,
            max_delay: self.reconnect_max_delay,
            max_attempts: self.reconnect_max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        // SAFETY: test-only env manipulation, single-threaded within this test.
        for var in [
            "PORT",
            "WORKER_ENABLED",
            "BOTS_PER_WORKER",
            "MAX_QUEUE_SIZE",
            "QUEUE_TIMEOUT",
            "INSPECT_TIMEOUT",
            "BOT_COOLDOWN_TIME",
            "BASE_RECONNECT_DELAY",
            "MAX_RECONNECT_DELAY",
            "MAX_RECONNECT_ATTEMPTS",
            "MAX_RETRIES",
            "HEALTH_CHECK_INTERVAL",
            "STATS_UPDATE_INTERVAL",
            "ALLOW_REFRESH",
        ] {
            unsafe { std::env::remove_var(var) };
        }
        let cfg = Config::from_env();
        assert_eq!(cfg.listen_addr, "0.0.0.0:3000");
        assert!(!cfg.worker_enabled);
        assert_eq!(cfg.bots_per_worker, 50);
        assert_eq!(cfg.queue_capacity, 100);
        assert_eq!(cfg.queue_deadline, Duration::from_millis(10_000));
        assert_eq!(cfg.inspect_timeout, Duration::from_millis(10_000));
        assert_eq!(cfg.inspect_cooldown, Duration::from_millis(30_000));
        assert_eq!(cfg.reconnect_base_delay, Duration::from_millis(30_000));
        assert_eq!(cfg.reconnect_max_delay, Duration::from_millis(600_000));
        assert_eq!(cfg.reconnect_max_attempts, 10);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.health_check_interval, Duration::from_millis(60_000));
        assert_eq!(cfg.stats_interval, Duration::from_millis(3_000));
        assert!(!cfg.allow_refresh);
        assert_eq!(cfg.session_path, "./sessions");
        assert_eq!(cfg.blacklist_path, "./blacklist.txt");
    }
}
