use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::reputation::{DecaySettings, KeyNormalizer, Violation, ViolationCatalog, MAX_SCORE};
use crate::store::RedisOptions;

/// Configuration for the reputation service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IprepdConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Storage backend selection
    pub store: StoreBackend,
    /// Redis connection settings
    pub redis: RedisConfig,
    /// API authentication
    pub auth: AuthConfig,
    /// Prefix width applied to IPv6 addresses
    pub ip6_prefix: u8,
    /// Score recovery settings
    pub decay: DecayConfig,
    /// Violation catalog, in configured order
    pub violations: Vec<Violation>,
    /// Exception list sources
    pub exceptions: ExceptionsConfig,
    /// Security configuration
    pub security: SecurityConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on, `host:port`
    pub listen: String,
    /// JSON file served at `/__version__`
    pub version_response: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    /// In-process store; state is lost on restart
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Primary address
    pub addr: String,
    /// Read replica addresses
    pub replicas: Vec<String>,
    /// Read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Write timeout in milliseconds
    pub write_timeout_ms: u64,
    /// Connect timeout in milliseconds
    pub dial_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Skip authentication entirely
    pub disable_auth: bool,
    /// Read-write keys, name -> key
    pub api_keys: HashMap<String, String>,
    /// Read-only keys, name -> key
    pub ro_api_keys: HashMap<String, String>,
    /// Read-write Hawk credentials, id -> key
    pub hawk: HashMap<String, String>,
    /// Read-only Hawk credentials, id -> key
    pub ro_hawk: HashMap<String, String>,
}

impl AuthConfig {
    fn has_credentials(&self) -> bool {
        !(self.api_keys.is_empty()
            && self.ro_api_keys.is_empty()
            && self.hawk.is_empty()
            && self.ro_hawk.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayConfig {
    /// Points recovered per interval
    pub points: i32,
    /// Interval length in seconds
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionsConfig {
    /// Newline-delimited CIDR files
    pub files: Vec<PathBuf>,
    /// Reload interval in seconds
    pub refresh_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Maximum request body size in bytes
    pub max_request_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Enable per-request logging
    pub log_requests: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:6379".to_string(),
            replicas: Vec::new(),
            read_timeout_ms: 100,
            write_timeout_ms: 100,
            dial_timeout_ms: 250,
        }
    }
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            points: 0,
            interval_secs: 60,
        }
    }
}

impl Default for ExceptionsConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            refresh_secs: 3600,
        }
    }
}

impl Default for IprepdConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                listen: "0.0.0.0:8080".to_string(),
                version_response: PathBuf::from("./version.json"),
            },
            store: StoreBackend::Redis,
            redis: RedisConfig::default(),
            auth: AuthConfig::default(),
            ip6_prefix: 64,
            decay: DecayConfig::default(),
            violations: Vec::new(),
            exceptions: ExceptionsConfig::default(),
            security: SecurityConfig {
                max_request_size: 1024 * 1024, // 1MB
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                log_requests: true,
            },
        }
    }
}

impl IprepdConfig {
    /// Load configuration from `IPREPD_*` environment variables and validate
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Server configuration
        if let Some(listen) = var("IPREPD_LISTEN") {
            config.server.listen = listen;
        }

        if let Some(path) = var("IPREPD_VERSION_RESPONSE") {
            config.server.version_response = PathBuf::from(path);
        }

        // Store configuration
        if let Some(backend) = var("IPREPD_STORE") {
            config.store = match backend.to_lowercase().as_str() {
                "redis" => StoreBackend::Redis,
                "memory" => StoreBackend::Memory,
                other => return Err(anyhow::anyhow!("Invalid IPREPD_STORE value: {}", other)),
            };
        }

        if let Some(addr) = var("IPREPD_REDIS_ADDR") {
            config.redis.addr = addr;
        }

        if let Some(replicas) = var("IPREPD_REDIS_REPLICAS") {
            config.redis.replicas = parse_list(&replicas);
        }

        if let Some(ms) = var("IPREPD_REDIS_READ_TIMEOUT_MS") {
            config.redis.read_timeout_ms = ms
                .parse()
                .context("Invalid IPREPD_REDIS_READ_TIMEOUT_MS value")?;
        }

        if let Some(ms) = var("IPREPD_REDIS_WRITE_TIMEOUT_MS") {
            config.redis.write_timeout_ms = ms
                .parse()
                .context("Invalid IPREPD_REDIS_WRITE_TIMEOUT_MS value")?;
        }

        if let Some(ms) = var("IPREPD_REDIS_DIAL_TIMEOUT_MS") {
            config.redis.dial_timeout_ms = ms
                .parse()
                .context("Invalid IPREPD_REDIS_DIAL_TIMEOUT_MS value")?;
        }

        // Authentication
        if let Some(disable) = var("IPREPD_DISABLE_AUTH") {
            config.auth.disable_auth = disable
                .parse()
                .context("Invalid IPREPD_DISABLE_AUTH value")?;
        }

        if let Some(keys) = var("IPREPD_API_KEYS") {
            config.auth.api_keys =
                parse_api_keys(&keys).context("Invalid IPREPD_API_KEYS value")?;
        }

        if let Some(keys) = var("IPREPD_RO_API_KEYS") {
            config.auth.ro_api_keys =
                parse_api_keys(&keys).context("Invalid IPREPD_RO_API_KEYS value")?;
        }

        if let Some(keys) = var("IPREPD_HAWK") {
            config.auth.hawk = parse_api_keys(&keys).context("Invalid IPREPD_HAWK value")?;
        }

        if let Some(keys) = var("IPREPD_RO_HAWK") {
            config.auth.ro_hawk = parse_api_keys(&keys).context("Invalid IPREPD_RO_HAWK value")?;
        }

        // Scoring
        if let Some(prefix) = var("IPREPD_IP6_PREFIX") {
            config.ip6_prefix = prefix.parse().context("Invalid IPREPD_IP6_PREFIX value")?;
        }

        if let Some(points) = var("IPREPD_DECAY_POINTS") {
            config.decay.points = points
                .parse()
                .context("Invalid IPREPD_DECAY_POINTS value")?;
        }

        if let Some(secs) = var("IPREPD_DECAY_INTERVAL_SECS") {
            config.decay.interval_secs = secs
                .parse()
                .context("Invalid IPREPD_DECAY_INTERVAL_SECS value")?;
        }

        if let Some(violations) = var("IPREPD_VIOLATIONS") {
            config.violations =
                parse_violations(&violations).context("Invalid IPREPD_VIOLATIONS value")?;
        }

        // Exceptions
        if let Some(files) = var("IPREPD_EXCEPTION_FILES") {
            config.exceptions.files = parse_list(&files).into_iter().map(PathBuf::from).collect();
        }

        if let Some(secs) = var("IPREPD_EXCEPTION_REFRESH_SECS") {
            config.exceptions.refresh_secs = secs
                .parse()
                .context("Invalid IPREPD_EXCEPTION_REFRESH_SECS value")?;
        }

        // Security and logging
        if let Some(size) = var("IPREPD_MAX_REQUEST_SIZE") {
            config.security.max_request_size = size
                .parse()
                .context("Invalid IPREPD_MAX_REQUEST_SIZE value")?;
        }

        if let Some(level) = var("IPREPD_LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Some(log_requests) = var("IPREPD_LOG_REQUESTS") {
            config.logging.log_requests = log_requests
                .parse()
                .context("Invalid IPREPD_LOG_REQUESTS value")?;
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for consistency
    pub fn validate(&self) -> Result<()> {
        if self.server.listen.is_empty() {
            return Err(anyhow::anyhow!("Listen address cannot be empty"));
        }

        if self.store == StoreBackend::Redis && self.redis.addr.is_empty() {
            return Err(anyhow::anyhow!("Redis address cannot be empty"));
        }

        if !(1..=128).contains(&self.ip6_prefix) {
            return Err(anyhow::anyhow!(
                "IPv6 prefix must be between 1 and 128: {}",
                self.ip6_prefix
            ));
        }

        if self.decay.points < 0 {
            return Err(anyhow::anyhow!(
                "Decay points cannot be negative: {}",
                self.decay.points
            ));
        }

        if self.decay.points > 0 && self.decay.interval_secs == 0 {
            return Err(anyhow::anyhow!(
                "Decay interval must be non-zero when decay points are set"
            ));
        }

        for violation in &self.violations {
            if violation.name.is_empty() {
                return Err(anyhow::anyhow!("Violation name cannot be empty"));
            }
            if violation.penalty < 0 {
                return Err(anyhow::anyhow!(
                    "Penalty for violation {} cannot be negative",
                    violation.name
                ));
            }
            if !(0..=MAX_SCORE).contains(&violation.decrease_limit) {
                return Err(anyhow::anyhow!(
                    "Decrease limit for violation {} must be between 0 and {}",
                    violation.name,
                    MAX_SCORE
                ));
            }
        }

        if !self.auth.disable_auth && !self.auth.has_credentials() {
            return Err(anyhow::anyhow!(
                "Authentication is enabled but no credentials are configured \
                 (set IPREPD_API_KEYS, IPREPD_HAWK or IPREPD_DISABLE_AUTH=true)"
            ));
        }

        if self.exceptions.refresh_secs == 0 && !self.exceptions.files.is_empty() {
            return Err(anyhow::anyhow!("Exception refresh interval must be non-zero"));
        }

        if self.security.max_request_size == 0 {
            return Err(anyhow::anyhow!("Maximum request size must be non-zero"));
        }

        Ok(())
    }

    pub fn redis_options(&self) -> RedisOptions {
        RedisOptions {
            addr: self.redis.addr.clone(),
            replicas: self.redis.replicas.clone(),
            read_timeout: Duration::from_millis(self.redis.read_timeout_ms),
            write_timeout: Duration::from_millis(self.redis.write_timeout_ms),
            dial_timeout: Duration::from_millis(self.redis.dial_timeout_ms),
        }
    }

    pub fn decay_settings(&self) -> DecaySettings {
        DecaySettings::new(
            self.decay.points,
            Duration::from_secs(self.decay.interval_secs),
        )
    }

    pub fn violation_catalog(&self) -> ViolationCatalog {
        ViolationCatalog::new(self.violations.iter().cloned())
    }

    pub fn key_normalizer(&self) -> KeyNormalizer {
        KeyNormalizer::new(self.ip6_prefix)
    }

    pub fn exception_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.exceptions.refresh_secs)
    }
}

/// Split a comma-separated list, dropping empty entries
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `name:key` pairs, used for API keys and Hawk `id:key` credentials
fn parse_api_keys(value: &str) -> Result<HashMap<String, String>> {
    let mut keys = HashMap::new();
    for entry in parse_list(value) {
        let (name, key) = entry
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("Credential entry must be name:key"))?;
        if name.is_empty() || key.is_empty() {
            return Err(anyhow::anyhow!("Credential entry must be name:key"));
        }
        keys.insert(name.to_string(), key.to_string());
    }
    Ok(keys)
}

/// Parse `name:penalty:decreaselimit` triples
fn parse_violations(value: &str) -> Result<Vec<Violation>> {
    let mut violations: Vec<Violation> = Vec::new();
    for entry in parse_list(value) {
        let parts: Vec<&str> = entry.split(':').collect();
        let [name, penalty, limit] = parts.as_slice() else {
            return Err(anyhow::anyhow!(
                "Violation entry must be name:penalty:decreaselimit: {}",
                entry
            ));
        };
        let penalty = penalty
            .parse()
            .with_context(|| format!("Invalid penalty for violation {}", name))?;
        let limit = limit
            .parse()
            .with_context(|| format!("Invalid decrease limit for violation {}", name))?;

        if violations.iter().any(|v| v.name == *name) {
            warn!(violation = %name, "Duplicate violation definition ignored");
            continue;
        }
        violations.push(Violation::new(*name, penalty, limit));
    }
    Ok(violations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_with_keys() {
        let config = IprepdConfig::from_vars(vars(&[("IPREPD_API_KEYS", "tester:secret")])).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.store, StoreBackend::Redis);
        assert_eq!(config.ip6_prefix, 64);
        assert_eq!(config.redis_options().read_timeout, Duration::from_millis(100));
        assert_eq!(config.redis_options().dial_timeout, Duration::from_millis(250));
        assert_eq!(config.decay_settings(), DecaySettings::default());
        assert_eq!(config.auth.api_keys.get("tester").map(String::as_str), Some("secret"));
        assert!(config.logging.log_requests);
    }

    #[test]
    fn test_auth_required_unless_disabled() {
        assert!(IprepdConfig::from_vars(vars(&[])).is_err());
        let config = IprepdConfig::from_vars(vars(&[("IPREPD_DISABLE_AUTH", "true")])).unwrap();
        assert!(config.auth.disable_auth);
    }

    #[test]
    fn test_hawk_credentials_satisfy_auth() {
        let config = IprepdConfig::from_vars(vars(&[
            ("IPREPD_HAWK", "root:toor"),
            ("IPREPD_RO_HAWK", "viewer:weiv, auditor:rotidua"),
        ]))
        .unwrap();
        assert!(config.auth.api_keys.is_empty());
        assert_eq!(config.auth.hawk.get("root").map(String::as_str), Some("toor"));
        assert_eq!(config.auth.ro_hawk.len(), 2);

        assert!(IprepdConfig::from_vars(vars(&[("IPREPD_HAWK", "no-key")])).is_err());
    }

    #[test]
    fn test_full_overlay() {
        let config = IprepdConfig::from_vars(vars(&[
            ("IPREPD_LISTEN", "127.0.0.1:9000"),
            ("IPREPD_STORE", "memory"),
            ("IPREPD_REDIS_REPLICAS", "10.0.0.2:6379, 10.0.0.3:6379"),
            ("IPREPD_RO_API_KEYS", "reader:ro-key"),
            ("IPREPD_IP6_PREFIX", "48"),
            ("IPREPD_DECAY_POINTS", "1"),
            ("IPREPD_DECAY_INTERVAL_SECS", "1"),
            ("IPREPD_VIOLATIONS", "violation1:5:25,violation2:50:50,violation1:1:1"),
            ("IPREPD_EXCEPTION_FILES", "/etc/iprepd/a.txt,/etc/iprepd/b.txt"),
            ("IPREPD_LOG_LEVEL", "debug"),
        ]))
        .unwrap();

        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.redis.replicas.len(), 2);
        assert_eq!(config.key_normalizer().ip6_prefix(), 48);
        assert_eq!(
            config.decay_settings(),
            DecaySettings::new(1, Duration::from_secs(1))
        );

        let catalog = config.violation_catalog();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.lookup("violation1").unwrap().penalty, 5);
        assert_eq!(config.exceptions.files.len(), 2);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let base = ("IPREPD_DISABLE_AUTH", "true");
        for bad in [
            ("IPREPD_IP6_PREFIX", "0"),
            ("IPREPD_IP6_PREFIX", "129"),
            ("IPREPD_STORE", "postgres"),
            ("IPREPD_VIOLATIONS", "violation1:5"),
            ("IPREPD_VIOLATIONS", "violation1:-5:25"),
            ("IPREPD_VIOLATIONS", "violation1:5:101"),
            ("IPREPD_API_KEYS", "justakey"),
            ("IPREPD_REDIS_READ_TIMEOUT_MS", "fast"),
            ("IPREPD_LISTEN", ""),
        ] {
            assert!(
                IprepdConfig::from_vars(vars(&[base, bad])).is_err(),
                "{:?} should be rejected",
                bad
            );
        }

        assert!(IprepdConfig::from_vars(vars(&[
            base,
            ("IPREPD_DECAY_POINTS", "5"),
            ("IPREPD_DECAY_INTERVAL_SECS", "0"),
        ]))
        .is_err());
    }
}
