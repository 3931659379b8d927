//! ABOUTME: Configuration management with validation and environment loading
//! ABOUTME: Handles all worker settings from defaults, an optional file, and env vars

use config::{Config as ConfigBuilder, Environment, File};
use cw_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

/// Main configuration struct
#[derive(Debug, Clone, Deserialize, Serialize, Validate, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub etcd: EtcdConfig,
    #[validate(nested)]
    pub mongodb: MongoConfig,
    #[validate(nested)]
    pub sink: SinkConfig,
    #[validate(nested)]
    pub lease: LeaseConfig,
    #[validate(nested)]
    pub smtp: Option<SmtpConfig>,
}

/// Coordination store connection
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct EtcdConfig {
    /// Cluster endpoints as host:port
    #[validate(length(min = 1))]
    pub endpoints: Vec<String>,
    /// Dial timeout in milliseconds
    #[validate(range(min = 100, max = 60000))]
    pub dial_timeout_ms: u64,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["127.0.0.1:2379".to_string()],
            dial_timeout_ms: 5000,
        }
    }
}

/// Execution log store connection
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct MongoConfig {
    #[validate(length(min = 1))]
    pub uri: String,
    /// Connect timeout in milliseconds
    #[validate(range(min = 100, max = 60000))]
    pub connect_timeout_ms: u64,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://127.0.0.1:27017".to_string(),
            connect_timeout_ms: 5000,
        }
    }
}

/// Log sink batching knobs
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct SinkConfig {
    /// Flush a batch once it reaches this many entries
    #[validate(range(min = 1, max = 10000))]
    pub batch_size: usize,
    /// Flush a partial batch after this many milliseconds
    #[validate(range(min = 10, max = 600000))]
    pub commit_timeout_ms: u64,
    /// Bounded ingress capacity; logs are dropped when full
    #[validate(range(min = 1, max = 1000000))]
    pub channel_capacity: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            commit_timeout_ms: 1000,
            channel_capacity: 1000,
        }
    }
}

/// Lease TTLs for liveness registration and per-job locks
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LeaseConfig {
    /// Worker registration lease TTL in seconds
    #[validate(range(min = 1, max = 3600))]
    pub registry_ttl_secs: i64,
    /// Per-job lock lease TTL in seconds
    #[validate(range(min = 1, max = 3600))]
    pub lock_ttl_secs: i64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            registry_ttl_secs: 10,
            lock_ttl_secs: 5,
        }
    }
}

/// SMTP configuration with secret redaction
#[derive(Clone, Deserialize, Serialize, Validate)]
pub struct SmtpConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,
    #[validate(length(min = 1))]
    pub username: String,
    #[validate(length(min = 1))]
    pub password: String,
    #[validate(email)]
    pub from: String,
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("from", &self.from)
            .finish()
    }
}

impl Config {
    /// Load configuration from defaults, an optional `cronwork` file, and
    /// `CRONWORK_`-prefixed environment variables (highest priority).
    pub fn load() -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        // Set defaults first
        builder = builder
            .set_default("etcd.endpoints", vec!["127.0.0.1:2379"])?
            .set_default("etcd.dial_timeout_ms", 5000)?
            .set_default("mongodb.uri", "mongodb://127.0.0.1:27017")?
            .set_default("mongodb.connect_timeout_ms", 5000)?
            .set_default("sink.batch_size", 100)?
            .set_default("sink.commit_timeout_ms", 1000)?
            .set_default("sink.channel_capacity", 1000)?
            .set_default("lease.registry_ttl_secs", 10)?
            .set_default("lease.lock_ttl_secs", 5)?;

        // Optional config file next to the binary
        builder = builder.add_source(File::with_name("cronwork").required(false));

        // Compound keys do not survive the single-underscore separator, so
        // they are applied as explicit overrides.
        if let Ok(endpoints) = std::env::var("CRONWORK_ETCD_ENDPOINTS") {
            let endpoints: Vec<String> = endpoints
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            builder = builder.set_override("etcd.endpoints", endpoints)?;
        }
        if let Ok(timeout) = std::env::var("CRONWORK_ETCD_DIAL_TIMEOUT_MS") {
            builder = builder.set_override("etcd.dial_timeout_ms", timeout)?;
        }
        if let Ok(uri) = std::env::var("CRONWORK_MONGODB_URI") {
            builder = builder.set_override("mongodb.uri", uri)?;
        }
        if let Ok(timeout) = std::env::var("CRONWORK_MONGODB_CONNECT_TIMEOUT_MS") {
            builder = builder.set_override("mongodb.connect_timeout_ms", timeout)?;
        }
        if let Ok(size) = std::env::var("CRONWORK_SINK_BATCH_SIZE") {
            builder = builder.set_override("sink.batch_size", size)?;
        }
        if let Ok(timeout) = std::env::var("CRONWORK_SINK_COMMIT_TIMEOUT_MS") {
            builder = builder.set_override("sink.commit_timeout_ms", timeout)?;
        }
        if let Ok(capacity) = std::env::var("CRONWORK_SINK_CHANNEL_CAPACITY") {
            builder = builder.set_override("sink.channel_capacity", capacity)?;
        }
        if let Ok(ttl) = std::env::var("CRONWORK_LEASE_REGISTRY_TTL_SECS") {
            builder = builder.set_override("lease.registry_ttl_secs", ttl)?;
        }
        if let Ok(ttl) = std::env::var("CRONWORK_LEASE_LOCK_TTL_SECS") {
            builder = builder.set_override("lease.lock_ttl_secs", ttl)?;
        }
        for key in ["host", "port", "username", "password", "from"] {
            let var = format!("CRONWORK_SMTP_{}", key.to_uppercase());
            if let Ok(value) = std::env::var(var) {
                builder = builder.set_override(format!("smtp.{key}"), value)?;
            }
        }

        // Remaining simple keys from environment variables
        builder = builder.add_source(
            Environment::with_prefix("CRONWORK")
                .try_parsing(true)
                .separator("_"),
        );

        let config = builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to build config: {}", e)))?;

        let parsed: Config = config
            .try_deserialize()
            .map_err(|e| Error::Config(format!("Failed to deserialize config: {}", e)))?;

        parsed
            .validate()
            .map_err(|e| Error::Config(format!("Config validation failed: {}", e)))?;

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Use a mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "CRONWORK_ETCD_ENDPOINTS",
        "CRONWORK_ETCD_DIAL_TIMEOUT_MS",
        "CRONWORK_MONGODB_URI",
        "CRONWORK_MONGODB_CONNECT_TIMEOUT_MS",
        "CRONWORK_SINK_BATCH_SIZE",
        "CRONWORK_SINK_COMMIT_TIMEOUT_MS",
        "CRONWORK_SMTP_HOST",
        "CRONWORK_SMTP_PORT",
        "CRONWORK_SMTP_USERNAME",
        "CRONWORK_SMTP_PASSWORD",
        "CRONWORK_SMTP_FROM",
    ];

    fn clear_vars() {
        for key in VARS {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_config_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_vars();

        let config = Config::load().expect("Should load with defaults");

        assert_eq!(config.etcd.endpoints, vec!["127.0.0.1:2379"]);
        assert_eq!(config.etcd.dial_timeout_ms, 5000);
        assert_eq!(config.mongodb.uri, "mongodb://127.0.0.1:27017");
        assert_eq!(config.sink.batch_size, 100);
        assert_eq!(config.sink.commit_timeout_ms, 1000);
        assert_eq!(config.sink.channel_capacity, 1000);
        assert_eq!(config.lease.registry_ttl_secs, 10);
        assert_eq!(config.lease.lock_ttl_secs, 5);
        assert!(config.smtp.is_none());
    }

    #[test]
    fn test_config_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_vars();

        env::set_var(
            "CRONWORK_ETCD_ENDPOINTS",
            "etcd-a:2379, etcd-b:2379,etcd-c:2379",
        );
        env::set_var("CRONWORK_SINK_BATCH_SIZE", "25");
        env::set_var("CRONWORK_MONGODB_URI", "mongodb://db:27017");

        let config = Config::load().expect("Should load from env");

        assert_eq!(
            config.etcd.endpoints,
            vec!["etcd-a:2379", "etcd-b:2379", "etcd-c:2379"]
        );
        assert_eq!(config.sink.batch_size, 25);
        assert_eq!(config.mongodb.uri, "mongodb://db:27017");

        clear_vars();
    }

    #[test]
    fn test_smtp_block_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_vars();

        env::set_var("CRONWORK_SMTP_HOST", "smtp.example.com");
        env::set_var("CRONWORK_SMTP_PORT", "465");
        env::set_var("CRONWORK_SMTP_USERNAME", "alerts");
        env::set_var("CRONWORK_SMTP_PASSWORD", "hunter2");
        env::set_var("CRONWORK_SMTP_FROM", "alerts@example.com");

        let config = Config::load().expect("Should load SMTP block");
        let smtp = config.smtp.expect("smtp block present");
        assert_eq!(smtp.host, "smtp.example.com");
        assert_eq!(smtp.port, 465);
        assert_eq!(smtp.from, "alerts@example.com");

        clear_vars();
    }

    #[test]
    fn test_config_validation_failure() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_vars();

        env::set_var("CRONWORK_SINK_BATCH_SIZE", "0"); // below minimum

        let result = Config::load();
        assert!(result.is_err());

        clear_vars();
    }

    #[test]
    fn test_secret_redaction() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_vars();

        env::set_var("CRONWORK_SMTP_HOST", "smtp.example.com");
        env::set_var("CRONWORK_SMTP_PORT", "465");
        env::set_var("CRONWORK_SMTP_USERNAME", "alerts");
        env::set_var("CRONWORK_SMTP_PASSWORD", "hunter2");
        env::set_var("CRONWORK_SMTP_FROM", "alerts@example.com");

        let config = Config::load().expect("Should load with smtp");
        let debug_output = format!("{:?}", config);

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("hunter2"));

        clear_vars();
    }
}
