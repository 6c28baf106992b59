//! Database connection management
//!
//! - `ConnectionRegistry`: lazily created pools keyed by connection string,
//!   injected into the store and the introspector
//! - `connect_options`: `postgresql://` URLs including `?service=` lookups
//! - `store`: the ConfigDB entity store

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use tracing::info;
use url::Url;

use crate::error::StoreError;

pub mod pg_service;
pub mod store;

pub use pg_service::ServiceEntry;
pub use store::{EntityStore, MemoryStore, PgConfigStore, PrecacheScope, Session};

/// Pool sizing for every pool the registry creates.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: std::env::var("DATABASE_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Process wide cache of connection pools keyed by connection string.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    pools: Mutex<HashMap<String, PgPool>>,
    settings: PoolSettings,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: PoolSettings) -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            settings,
        }
    }

    /// Returns the pool for `connection`, creating it on first use.
    ///
    /// Pools connect lazily; connection failures surface on the first query.
    pub fn pool(&self, connection: &str) -> Result<PgPool, StoreError> {
        let mut pools = self
            .pools
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(pool) = pools.get(connection) {
            return Ok(pool.clone());
        }

        let options = connect_options(connection)?;
        let pool = PgPoolOptions::new()
            .max_connections(self.settings.max_connections)
            .acquire_timeout(self.settings.acquire_timeout)
            .connect_lazy_with(options);
        info!("Created connection pool for {}", mask_database_url(connection));
        pools.insert(connection.to_string(), pool.clone());
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.pools
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whether `connection` is a PostgreSQL URL.
pub fn is_postgres_url(connection: &str) -> bool {
    connection.starts_with("postgresql:") || connection.starts_with("postgres:")
}

/// Connect options for a PostgreSQL URL, resolving `?service=` entries.
pub fn connect_options(connection: &str) -> Result<PgConnectOptions, StoreError> {
    connect_options_using(connection, pg_service::lookup)
}

pub fn connect_options_using<F>(connection: &str, lookup: F) -> Result<PgConnectOptions, StoreError>
where
    F: FnOnce(&str) -> Result<ServiceEntry, StoreError>,
{
    let invalid = |message: String| StoreError::InvalidConnection {
        connection: mask_database_url(connection),
        message,
    };

    if !is_postgres_url(connection) {
        return Err(invalid("not a postgresql:// URL".to_string()));
    }
    let url = Url::parse(connection).map_err(|e| invalid(e.to_string()))?;
    let service = url
        .query_pairs()
        .find(|(key, _)| key == "service")
        .map(|(_, value)| value.into_owned());

    let Some(service) = service else {
        return PgConnectOptions::from_str(connection).map_err(|e| invalid(e.to_string()));
    };

    let entry = lookup(&service)?;
    let mut options = PgConnectOptions::new();
    for (key, value) in &entry {
        options = match key.as_str() {
            "host" => options.host(value),
            "port" => options.port(
                value
                    .parse()
                    .map_err(|_| invalid(format!("invalid port '{value}' in service '{service}'")))?,
            ),
            "dbname" => options.database(value),
            "user" => options.username(value),
            "password" => options.password(value),
            "sslmode" => options.ssl_mode(
                PgSslMode::from_str(value).map_err(|e| invalid(e.to_string()))?,
            ),
            "application_name" => options.application_name(value),
            _ => options,
        };
    }

    // explicit URL parts win over the service entry
    if let Some(host) = url.host_str().filter(|host| !host.is_empty()) {
        options = options.host(host);
    }
    if let Some(port) = url.port() {
        options = options.port(port);
    }
    if !url.username().is_empty() {
        options = options.username(url.username());
    }
    if let Some(password) = url.password() {
        options = options.password(password);
    }
    let database = url.path().trim_start_matches('/');
    if !database.is_empty() {
        options = options.database(database);
    }
    Ok(options)
}

/// Mask password in database URL for logging
pub fn mask_database_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) if parsed.password().is_some() => {
            let mut masked = parsed.clone();
            let _ = masked.set_password(Some("***"));
            masked.to_string()
        }
        Ok(_) => url.to_string(),
        Err(_) if url.len() > 20 => format!("{}***{}", &url[..10], &url[url.len() - 10..]),
        Err(_) => "***".to_string(),
    }
}
