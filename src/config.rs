//! Daemon configuration, read from the environment (and `.env` if present).

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::store::{StoreLocation, DEFAULT_MAX_BATCH_WRITES};
use crate::templates::Locale;

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite file, or `:memory:` for a throwaway store.
    /// Env: `TIDINGS_DB_PATH`
    /// Default: `$HOME/.tidings/tidings.db`
    pub store: StoreLocation,

    /// Address the trigger ingress listens on.
    /// Env: `TIDINGS_HTTP_ADDR`
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// Language of notification texts.
    /// Env: `TIDINGS_LOCALE` (`en` or `es`)
    pub locale: Locale,

    /// Most operations one atomic batch may carry.
    /// Env: `TIDINGS_MAX_BATCH_WRITES`
    pub max_batch_writes: usize,

    /// Env: `TIDINGS_BUS_CAPACITY`
    pub bus_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        let home_dir = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        Self {
            store: StoreLocation::File(
                PathBuf::from(home_dir).join(".tidings").join("tidings.db"),
            ),
            http_addr: ([0, 0, 0, 0], 3000).into(),
            locale: Locale::En,
            max_batch_writes: DEFAULT_MAX_BATCH_WRITES,
            bus_capacity: 100,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] but reading from any key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = lookup("TIDINGS_DB_PATH") {
            config.store = match path.trim() {
                ":memory:" => StoreLocation::Memory,
                other => StoreLocation::File(PathBuf::from(other)),
            };
        }
        if let Some(addr) = lookup("TIDINGS_HTTP_ADDR") {
            config.http_addr = addr
                .trim()
                .parse()
                .with_context(|| format!("TIDINGS_HTTP_ADDR is not a socket address: {}", addr))?;
        }
        if let Some(locale) = lookup("TIDINGS_LOCALE") {
            config.locale = locale
                .parse()
                .map_err(|e: String| anyhow::anyhow!("TIDINGS_LOCALE: {}", e))?;
        }
        if let Some(max) = lookup("TIDINGS_MAX_BATCH_WRITES") {
            config.max_batch_writes = parse_positive(&max, "TIDINGS_MAX_BATCH_WRITES")?;
        }
        if let Some(capacity) = lookup("TIDINGS_BUS_CAPACITY") {
            config.bus_capacity = parse_positive(&capacity, "TIDINGS_BUS_CAPACITY")?;
        }

        Ok(config)
    }
}

fn parse_positive(raw: &str, key: &str) -> Result<usize> {
    let value: usize = raw
        .trim()
        .parse()
        .with_context(|| format!("{} must be a positive integer, got {:?}", key, raw))?;
    anyhow::ensure!(value > 0, "{} must be greater than zero", key);
    Ok(value)
}
