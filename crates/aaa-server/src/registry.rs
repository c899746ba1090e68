//! NAS client and account lookups.
//!
//! The server consults two registries on every request: the NAS
//! registry keyed by source IP, and the account registry keyed by
//! username. Both are traits so a management backend can replace the
//! in-memory implementations without touching the engines.

use crate::config::{AccountConfig, Config, NasClientConfig};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Prefix marking a clear-text credential (legacy accounts imported
/// from systems that never hashed).
const CLEAR_TEXT_PREFIX: &str = "ctp:";

/// A known NAS device. Requests from addresses without an active
/// entry are dropped before any parsing.
#[derive(Clone)]
pub struct NasClient {
    pub identifier: String,
    pub ip_address: IpAddr,
    shared_secret: Vec<u8>,
    pub active: bool,
    pub description: String,
}

impl NasClient {
    pub fn secret(&self) -> &[u8] {
        &self.shared_secret
    }
}

// The shared secret must never reach logs, so Debug is manual.
impl fmt::Debug for NasClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NasClient")
            .field("identifier", &self.identifier)
            .field("ip_address", &self.ip_address)
            .field("shared_secret", &"<redacted>")
            .field("active", &self.active)
            .finish()
    }
}

impl TryFrom<&NasClientConfig> for NasClient {
    type Error = std::net::AddrParseError;

    fn try_from(config: &NasClientConfig) -> Result<Self, Self::Error> {
        Ok(NasClient {
            identifier: config.identifier.clone(),
            ip_address: config.ip_address.parse()?,
            shared_secret: config.shared_secret.clone().into_bytes(),
            active: config.active,
            description: config.description.clone(),
        })
    }
}

/// Stored credential. Verification is constant work for the clear-text
/// case and a bcrypt check otherwise; the auth engine runs the latter
/// on the blocking pool.
#[derive(Clone)]
pub enum Credential {
    Bcrypt(String),
    ClearText(String),
}

impl Credential {
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix(CLEAR_TEXT_PREFIX) {
            Some(clear) => Credential::ClearText(clear.to_string()),
            None => Credential::Bcrypt(raw.to_string()),
        }
    }

    /// Check a candidate password. May block on bcrypt.
    pub fn verify(&self, password: &str) -> bool {
        match self {
            Credential::ClearText(stored) => stored == password,
            Credential::Bcrypt(hash) => bcrypt::verify(password, hash).unwrap_or(false),
        }
    }

    pub fn is_clear_text(&self) -> bool {
        matches!(self, Credential::ClearText(_))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Bcrypt(_) => write!(f, "Credential::Bcrypt(<redacted>)"),
            Credential::ClearText(_) => write!(f, "Credential::ClearText(<redacted>)"),
        }
    }
}

/// A user account as the engines see it.
#[derive(Debug, Clone)]
pub struct Account {
    pub username: String,
    pub credential: Credential,
    pub active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_sessions: u32,
    pub quota_bytes: Option<u64>,
    pub consumed_bytes: u64,
}

impl Account {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry <= now)
    }

    /// Quota exhaustion check. Enforcement is lazy: this is consulted
    /// at authentication time only, never to cut a live session.
    pub fn over_quota(&self) -> bool {
        matches!(self.quota_bytes, Some(quota) if self.consumed_bytes >= quota)
    }
}

impl From<&AccountConfig> for Account {
    fn from(config: &AccountConfig) -> Self {
        Account {
            username: config.username.clone(),
            credential: Credential::parse(&config.credential),
            active: config.active,
            expires_at: config.expires_at,
            max_sessions: config.max_sessions,
            quota_bytes: config.quota_bytes,
            consumed_bytes: config.consumed_bytes,
        }
    }
}

/// Source of NAS clients, keyed by the address requests arrive from.
pub trait NasRegistry: Send + Sync {
    /// Active client for this source address, if any.
    fn lookup_by_ip(&self, ip: IpAddr) -> Option<NasClient>;
}

/// Source of user accounts plus the quota counter sink.
pub trait AccountRegistry: Send + Sync {
    fn lookup(&self, username: &str) -> Option<Account>;

    /// Fold a traffic delta into the account's lifetime consumption.
    /// Unknown usernames are ignored; the session may outlive the
    /// account record.
    fn add_consumed_bytes(&self, username: &str, delta: u64);
}

/// In-memory NAS registry populated from configuration.
#[derive(Default)]
pub struct StaticNasRegistry {
    by_ip: DashMap<IpAddr, NasClient>,
}

impl StaticNasRegistry {
    pub fn from_config(config: &Config) -> Result<Self, crate::config::ConfigError> {
        let registry = StaticNasRegistry::default();
        for entry in &config.nas_clients {
            let client = NasClient::try_from(entry).map_err(|_| {
                crate::config::ConfigError::Invalid(format!(
                    "NAS {} has an invalid IP address",
                    entry.identifier
                ))
            })?;
            registry.insert(client);
        }
        Ok(registry)
    }

    pub fn insert(&self, client: NasClient) {
        self.by_ip.insert(client.ip_address, client);
    }

    pub fn len(&self) -> usize {
        self.by_ip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ip.is_empty()
    }
}

impl NasRegistry for StaticNasRegistry {
    fn lookup_by_ip(&self, ip: IpAddr) -> Option<NasClient> {
        self.by_ip
            .get(&ip)
            .filter(|client| client.active)
            .map(|client| client.clone())
    }
}

struct AccountSlot {
    account: Account,
    /// Bytes accumulated since the account was loaded. Kept separate
    /// so lookups can fold it in without write-locking.
    extra_consumed: AtomicU64,
}

/// In-memory account registry populated from configuration.
#[derive(Default)]
pub struct StaticAccountRegistry {
    accounts: DashMap<String, Arc<AccountSlot>>,
}

impl StaticAccountRegistry {
    pub fn from_config(config: &Config) -> Self {
        let registry = StaticAccountRegistry::default();
        for entry in &config.accounts {
            registry.insert(Account::from(entry));
        }
        registry
    }

    pub fn insert(&self, account: Account) {
        self.accounts.insert(
            account.username.clone(),
            Arc::new(AccountSlot {
                account,
                extra_consumed: AtomicU64::new(0),
            }),
        );
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl AccountRegistry for StaticAccountRegistry {
    fn lookup(&self, username: &str) -> Option<Account> {
        let slot = self.accounts.get(username)?;
        let mut account = slot.account.clone();
        account.consumed_bytes = account
            .consumed_bytes
            .saturating_add(slot.extra_consumed.load(Ordering::Relaxed));
        Some(account)
    }

    fn add_consumed_bytes(&self, username: &str, delta: u64) {
        if let Some(slot) = self.accounts.get(username) {
            slot.extra_consumed.fetch_add(delta, Ordering::Relaxed);
        }
    }
}
