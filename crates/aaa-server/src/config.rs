use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A NAS client entry. The set of clients is owned by the management
/// layer; the server only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NasClientConfig {
    /// Matches the NAS-Identifier attribute the device sends.
    pub identifier: String,
    /// Source IP the requests arrive from. At most one active client
    /// per address.
    pub ip_address: String,
    pub shared_secret: String,
    #[serde(default = "default_auth_port")]
    pub auth_port: u16,
    #[serde(default = "default_acct_port")]
    pub acct_port: u16,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub description: String,
}

/// An account entry consumed by the static account registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub username: String,
    /// Bcrypt hash, or a clear-text credential tagged with `ctp:`
    /// (legacy mode).
    pub credential: String,
    #[serde(default = "default_true")]
    pub active: bool,
    /// None means the account never expires.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u32,
    /// None means unlimited traffic.
    #[serde(default)]
    pub quota_bytes: Option<u64>,
    #[serde(default)]
    pub consumed_bytes: u64,
}

/// Server configuration, loaded from JSON with environment overrides
/// (`AAA_*`) applied on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_auth_port")]
    pub auth_port: u16,

    #[serde(default = "default_acct_port")]
    pub acct_port: u16,

    /// Advisory Acct-Interim-Interval sent in Access-Accept, seconds.
    /// Also the base of the stale-session threshold.
    #[serde(default = "default_interim_interval")]
    pub interim_interval: u32,

    /// A session with no update for `interim_interval * stale_multiplier`
    /// seconds is force-stopped by the reaper.
    #[serde(default = "default_stale_multiplier")]
    pub stale_multiplier: u32,

    /// How often the reaper sweeps, seconds.
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval: u64,

    /// Window during which a retransmitted request is answered from
    /// the response cache, seconds.
    #[serde(default = "default_duplicate_window")]
    pub duplicate_window: u64,

    /// How long an Access-Accept holds a concurrency slot while
    /// waiting for the matching Accounting-Start, seconds.
    #[serde(default = "default_reservation_ttl")]
    pub reservation_ttl: u64,

    /// How many stopped sessions to retain for inspection.
    #[serde(default = "default_inactive_session_retention")]
    pub inactive_session_retention: usize,

    /// "trace", "debug", "info", "warn" or "error".
    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default)]
    pub nas_clients: Vec<NasClientConfig>,

    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_auth_port() -> u16 {
    1812
}

fn default_acct_port() -> u16 {
    1813
}

fn default_interim_interval() -> u32 {
    600
}

fn default_stale_multiplier() -> u32 {
    3
}

fn default_reaper_interval() -> u64 {
    60
}

fn default_duplicate_window() -> u64 {
    5
}

fn default_reservation_ttl() -> u64 {
    10
}

fn default_inactive_session_retention() -> usize {
    100
}

fn default_true() -> bool {
    true
}

fn default_max_sessions() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_address: default_bind_address(),
            auth_port: default_auth_port(),
            acct_port: default_acct_port(),
            interim_interval: default_interim_interval(),
            stale_multiplier: default_stale_multiplier(),
            reaper_interval: default_reaper_interval(),
            duplicate_window: default_duplicate_window(),
            reservation_ttl: default_reservation_ttl(),
            inactive_session_retention: default_inactive_session_retention(),
            log_level: None,
            nas_clients: vec![],
            accounts: vec![],
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, then apply `AAA_*`
    /// environment overrides and validate.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&contents)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Environment overrides for the recognized scalar options.
    fn apply_env(&mut self) {
        fn set<T: std::str::FromStr>(name: &str, slot: &mut T) {
            if let Ok(raw) = std::env::var(name) {
                if let Ok(value) = raw.parse() {
                    *slot = value;
                }
            }
        }

        set("AAA_BIND_ADDRESS", &mut self.bind_address);
        set("AAA_AUTH_PORT", &mut self.auth_port);
        set("AAA_ACCT_PORT", &mut self.acct_port);
        set("AAA_INTERIM_INTERVAL", &mut self.interim_interval);
        set("AAA_STALE_MULTIPLIER", &mut self.stale_multiplier);
        set("AAA_REAPER_INTERVAL", &mut self.reaper_interval);
        set("AAA_DUPLICATE_WINDOW", &mut self.duplicate_window);
        set("AAA_RESERVATION_TTL", &mut self.reservation_ttl);
        set(
            "AAA_INACTIVE_SESSION_RETENTION",
            &mut self.inactive_session_retention,
        );
        if let Ok(level) = std::env::var("AAA_LOG_LEVEL") {
            self.log_level = Some(level);
        }
    }

    pub fn auth_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.bind_ip()?, self.auth_port))
    }

    pub fn acct_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.bind_ip()?, self.acct_port))
    }

    fn bind_ip(&self) -> Result<IpAddr, ConfigError> {
        self.bind_address.parse().map_err(|_| {
            ConfigError::Invalid(format!("invalid bind address: {}", self.bind_address))
        })
    }

    /// Threshold past which an active session without updates is
    /// considered dead.
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(u64::from(self.interim_interval) * u64::from(self.stale_multiplier))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_ip()?;

        if self.auth_port == 0 || self.acct_port == 0 {
            return Err(ConfigError::Invalid("ports cannot be 0".to_string()));
        }
        if self.auth_port == self.acct_port {
            return Err(ConfigError::Invalid(
                "auth and accounting ports must differ".to_string(),
            ));
        }
        if self.interim_interval == 0 || self.stale_multiplier == 0 {
            return Err(ConfigError::Invalid(
                "interim_interval and stale_multiplier must be positive".to_string(),
            ));
        }

        for nas in &self.nas_clients {
            if nas.shared_secret.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "NAS {} has an empty shared secret",
                    nas.identifier
                )));
            }
            let _: IpAddr = nas.ip_address.parse().map_err(|_| {
                ConfigError::Invalid(format!(
                    "NAS {} has an invalid IP address: {}",
                    nas.identifier, nas.ip_address
                ))
            })?;
        }

        // At most one active NAS client per IP address.
        let mut active_ips = std::collections::HashSet::new();
        for nas in self.nas_clients.iter().filter(|n| n.active) {
            if !active_ips.insert(&nas.ip_address) {
                return Err(ConfigError::Invalid(format!(
                    "multiple active NAS clients share IP {}",
                    nas.ip_address
                )));
            }
        }

        for account in &self.accounts {
            if account.username.is_empty() {
                return Err(ConfigError::Invalid("account with empty username".to_string()));
            }
            if account.max_sessions == 0 {
                return Err(ConfigError::Invalid(format!(
                    "account {} has max_sessions = 0",
                    account.username
                )));
            }
        }

        Ok(())
    }

    /// Example configuration written on first start.
    pub fn example() -> Self {
        Config {
            nas_clients: vec![NasClientConfig {
                identifier: "vpn1".to_string(),
                ip_address: "10.0.0.1".to_string(),
                shared_secret: "change_me".to_string(),
                auth_port: 1812,
                acct_port: 1813,
                active: true,
                description: "OpenVPN gateway".to_string(),
            }],
            accounts: vec![AccountConfig {
                username: "alice".to_string(),
                credential: "ctp:change_me_too".to_string(),
                active: true,
                expires_at: None,
                max_sessions: 1,
                quota_bytes: None,
                consumed_bytes: 0,
            }],
            log_level: Some("info".to_string()),
            ..Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.auth_port, 1812);
        assert_eq!(config.acct_port, 1813);
    }

    #[test]
    fn stale_threshold_multiplies() {
        let config = Config {
            interim_interval: 600,
            stale_multiplier: 3,
            ..Config::default()
        };
        assert_eq!(config.stale_after(), Duration::from_secs(1800));
    }

    #[test]
    fn rejects_colliding_ports() {
        let config = Config {
            acct_port: 1812,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_active_nas_ip() {
        let nas = NasClientConfig {
            identifier: "a".to_string(),
            ip_address: "10.0.0.1".to_string(),
            shared_secret: "s".to_string(),
            auth_port: 1812,
            acct_port: 1813,
            active: true,
            description: String::new(),
        };
        let mut other = nas.clone();
        other.identifier = "b".to_string();

        let config = Config {
            nas_clients: vec![nas.clone(), other.clone()],
            ..Config::default()
        };
        assert!(config.validate().is_err());

        // An inactive duplicate is fine.
        other.active = false;
        let config = Config {
            nas_clients: vec![nas, other],
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_max_sessions() {
        let config = Config {
            accounts: vec![AccountConfig {
                username: "alice".to_string(),
                credential: "ctp:pw".to_string(),
                active: true,
                expires_at: None,
                max_sessions: 0,
                quota_bytes: None,
                consumed_bytes: 0,
            }],
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn example_config_round_trips_through_json() {
        let example = Config::example();
        let json = serde_json::to_string(&example).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.nas_clients.len(), 1);
        assert_eq!(parsed.accounts.len(), 1);
    }
}
