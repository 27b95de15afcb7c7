//! Process configuration loaded from environment variables.
//!
//! Every variable is optional. Parsing does not stop at the first bad value: all
//! problems are collected so a misconfigured deployment reports them in one go.

use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use dispatch_core::eta::EtaCacheConfig;
use dispatch_core::matching::MatcherConfig;
use dispatch_core::retry::RetryPolicy;
use dispatch_core::spatial::DEFAULT_SEARCH_RADIUS_M;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
#[error("invalid configuration: {}", .problems.join("; "))]
pub struct ConfigError {
    pub problems: Vec<String>,
}

/// Which driver index the process runs with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GeoBackend {
    #[default]
    Memory,
    /// Store-backed index over the in-process H3 cell store.
    H3,
}

impl FromStr for GeoBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "h3" => Ok(Self::H3),
            other => Err(format!("unknown backend {other:?} (expected memory or h3)")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown format {other:?} (expected json or pretty)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub http_addr: SocketAddr,
    pub shutdown_timeout: Duration,
    pub matcher: MatcherConfig,
    /// `None` disables the ETA cache.
    pub eta_cache: Option<EtaCacheConfig>,
    pub osrm_endpoint: Option<String>,
    pub push_endpoint: Option<String>,
    pub ingest_retry: RetryPolicy,
    pub ingest_queue_capacity: usize,
    pub geo_backend: GeoBackend,
    pub geo_search_radius_m: f64,
    pub log: LogConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            shutdown_timeout: Duration::from_secs(15),
            matcher: MatcherConfig::default(),
            eta_cache: Some(EtaCacheConfig::default()),
            osrm_endpoint: None,
            push_endpoint: None,
            ingest_retry: RetryPolicy::default(),
            ingest_queue_capacity: 1024,
            geo_backend: GeoBackend::Memory,
            geo_search_radius_m: DEFAULT_SEARCH_RADIUS_M,
            log: LogConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = EnvReader {
            lookup: |key: &str| lookup(key).filter(|value| !value.trim().is_empty()),
            problems: Vec::new(),
        };
        let mut config = Self::default();

        env.parse("HTTP_ADDR", &mut config.http_addr);
        if let Some(secs) = env.value::<u64>("HTTP_SHUTDOWN_TIMEOUT_SECS") {
            config.shutdown_timeout = Duration::from_secs(secs);
        }

        env.parse("MATCHER_TOP_N", &mut config.matcher.top_n);
        env.parse("MATCHER_DEFAULT_SPEED_MPS", &mut config.matcher.default_speed_mps);
        env.parse("MATCHER_RATING_WEIGHT", &mut config.matcher.rating_weight);
        if config.matcher.top_n <= 0 {
            env.problem("MATCHER_TOP_N must be > 0");
        }

        if let Some(secs) = env.value::<u64>("ETA_CACHE_TTL_SECS") {
            config.eta_cache = (secs > 0)
                .then(|| EtaCacheConfig::default().with_ttl(Duration::from_secs(secs)));
        }
        config.osrm_endpoint = env.raw("OSRM_ENDPOINT");
        config.push_endpoint = env.raw("DISPATCH_PUSH_ENDPOINT");

        env.parse("INGEST_RETRY_ATTEMPTS", &mut config.ingest_retry.max_attempts);
        if let Some(ms) = env.value::<u64>("INGEST_RETRY_BASE_DELAY_MS") {
            config.ingest_retry.base_delay = Duration::from_millis(ms);
        }
        env.parse("INGEST_QUEUE_CAPACITY", &mut config.ingest_queue_capacity);
        if config.ingest_queue_capacity == 0 {
            env.problem("INGEST_QUEUE_CAPACITY must be > 0");
        }

        env.parse("GEO_BACKEND", &mut config.geo_backend);
        env.parse("GEO_SEARCH_RADIUS_M", &mut config.geo_search_radius_m);
        if !(config.geo_search_radius_m.is_finite() && config.geo_search_radius_m > 0.0) {
            env.problem("GEO_SEARCH_RADIUS_M must be a positive number");
        }

        if let Some(level) = env.raw("LOG_LEVEL") {
            config.log.level = level.trim().to_ascii_lowercase();
        }
        env.parse("LOG_FORMAT", &mut config.log.format);

        if env.problems.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError {
                problems: env.problems,
            })
        }
    }
}

struct EnvReader<L> {
    lookup: L,
    problems: Vec<String>,
}

impl<L> EnvReader<L>
where
    L: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key).map(|value| value.trim().to_string())
    }

    fn value<T>(&mut self, key: &str) -> Option<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self.raw(key)?;
        match raw.parse::<T>() {
            Ok(value) => Some(value),
            Err(err) => {
                self.problems.push(format!("invalid {key}={raw:?}: {err}"));
                None
            }
        }
    }

    fn parse<T>(&mut self, key: &str, target: &mut T)
    where
        T: FromStr,
        T::Err: Display,
    {
        if let Some(value) = self.value(key) {
            *target = value;
        }
    }

    fn problem(&mut self, message: &str) {
        self.problems.push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = load(&[]).expect("defaults");
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.http_addr.port(), 8080);
        assert_eq!(config.matcher.top_n, 8);
        assert_eq!(config.matcher.default_speed_mps, 10.0);
        assert_eq!(config.ingest_retry.max_attempts, 3);
        assert_eq!(config.ingest_retry.base_delay, Duration::from_millis(200));
        assert_eq!(config.geo_search_radius_m, 5_000.0);
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("MATCHER_TOP_N", "3"),
            ("MATCHER_RATING_WEIGHT", "12.5"),
            ("ETA_CACHE_TTL_SECS", "5"),
            ("OSRM_ENDPOINT", "http://osrm:5000"),
            ("INGEST_RETRY_ATTEMPTS", "5"),
            ("INGEST_RETRY_BASE_DELAY_MS", "50"),
            ("GEO_BACKEND", "H3"),
            ("LOG_LEVEL", "DEBUG"),
            ("LOG_FORMAT", "json"),
        ])
        .expect("valid");

        assert_eq!(config.http_addr, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.matcher.top_n, 3);
        assert_eq!(config.matcher.rating_weight, 12.5);
        assert_eq!(config.eta_cache.map(|c| c.ttl), Some(Duration::from_secs(5)));
        assert_eq!(config.osrm_endpoint.as_deref(), Some("http://osrm:5000"));
        assert_eq!(config.ingest_retry.max_attempts, 5);
        assert_eq!(config.ingest_retry.base_delay, Duration::from_millis(50));
        assert_eq!(config.geo_backend, GeoBackend::H3);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn zero_ttl_disables_cache_and_blank_values_are_ignored() {
        let config = load(&[("ETA_CACHE_TTL_SECS", "0"), ("OSRM_ENDPOINT", "  ")]).expect("valid");
        assert!(config.eta_cache.is_none());
        assert!(config.osrm_endpoint.is_none());
    }

    #[test]
    fn all_problems_are_reported_together() {
        let err = load(&[
            ("HTTP_ADDR", "not-an-addr"),
            ("MATCHER_TOP_N", "0"),
            ("MATCHER_DEFAULT_SPEED_MPS", "fast"),
            ("GEO_BACKEND", "redis"),
        ])
        .unwrap_err();

        assert_eq!(err.problems.len(), 4, "{:?}", err.problems);
        assert!(err.to_string().contains("MATCHER_TOP_N must be > 0"));
        assert!(err.to_string().contains("GEO_BACKEND"));
    }
}
