use std::env;
use std::sync::{Arc, RwLock};

const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 100;
const DEFAULT_SESSION_REFRESH_INTERVAL_SECS: u64 = 8 * 3600;
const DEFAULT_SESSION_TTL_SECS: i64 = 8 * 3600;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: String,
    /// Public base URL prepended to subscription access links.
    pub subscription_domain_prefix: String,
    /// 64 hex characters; key for sealing panel session material at rest.
    pub credential_key: String,
    pub reconcile_interval_secs: u64,
    pub session_refresh_interval_secs: u64,
    pub session_ttl_secs: i64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set".to_string())?;

        let listen_addr = env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let subscription_domain_prefix = env::var("SUBSCRIPTION_DOMAIN_PREFIX")
            .map_err(|_| "SUBSCRIPTION_DOMAIN_PREFIX must be set".to_string())?;

        let credential_key =
            env::var("CREDENTIAL_KEY").map_err(|_| "CREDENTIAL_KEY must be set".to_string())?;

        let reconcile_interval_secs =
            parse_var("RECONCILE_INTERVAL_SECS", DEFAULT_RECONCILE_INTERVAL_SECS)?;
        let session_refresh_interval_secs = parse_var(
            "SESSION_REFRESH_INTERVAL_SECS",
            DEFAULT_SESSION_REFRESH_INTERVAL_SECS,
        )?;
        let session_ttl_secs = parse_var("SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?;

        Ok(AppConfig {
            database_url,
            listen_addr,
            subscription_domain_prefix,
            credential_key,
            reconcile_interval_secs,
            session_refresh_interval_secs,
            session_ttl_secs,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| format!("{name} must be a number")),
        Err(_) => Ok(default),
    }
}

/// Owned configuration handle. Callers hold a clone and read snapshots;
/// `reload` re-reads the environment in place so long-lived tasks pick up
/// changes on their next snapshot instead of caching a stale copy forever.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<AppConfig>>,
}

impl ConfigHandle {
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn get(&self) -> AppConfig {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn reload(&self) -> Result<(), String> {
        let fresh = AppConfig::from_env()?;
        match self.inner.write() {
            Ok(mut guard) => *guard = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
        Ok(())
    }
}
