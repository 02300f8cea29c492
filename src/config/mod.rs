//! Configuration layer: typed settings with layered precedence (file → env).

use std::{
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    path::Path,
    str::FromStr,
};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::INVALIDATION_CHANNEL;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "entity-loader";
const ENV_PREFIX: &str = "ENTITY_LOADER";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_CACHE_TTL_MS: u64 = 30_000;
const DEFAULT_BATCH_DELAY_MS: u64 = 20;
const DEFAULT_MAX_BATCH_SIZE: u64 = 100;
const DEFAULT_MAX_PAGE_SIZE: u64 = 200;
const DEFAULT_PAGE_SIZE: u64 = 20;
const DEFAULT_FIRST: u64 = 10;
const DEFAULT_MAX_FIRST: u64 = 20;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub invalidation: InvalidationSettings,
    pub query: QuerySettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_ms: NonZeroU64,
    /// Zero flushes on the next scheduler tick.
    pub batch_delay_ms: u64,
    pub max_batch_size: NonZeroUsize,
    pub fetch_timeout_ms: Option<NonZeroU64>,
}

#[derive(Debug, Clone)]
pub struct InvalidationSettings {
    pub channel: String,
}

#[derive(Debug, Clone)]
pub struct QuerySettings {
    pub max_page_size: NonZeroU32,
    pub default_page_size: NonZeroU32,
    pub default_first: NonZeroU32,
    pub max_first: NonZeroU32,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (files → environment).
///
/// An explicit `config_file` must exist; the default file locations are optional.
pub fn load(config_file: Option<&Path>) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

impl Settings {
    /// Built-in defaults with no file or environment input.
    pub fn defaults() -> Result<Self, LoadError> {
        Self::from_raw(RawSettings::default())
    }

    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            cache,
            invalidation,
            query,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let cache = build_cache_settings(cache)?;
        let invalidation = build_invalidation_settings(invalidation)?;
        let query = build_query_settings(query)?;

        Ok(Self {
            logging,
            database,
            cache,
            invalidation,
            query,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let ttl_ms = non_zero_u64(cache.ttl_ms.unwrap_or(DEFAULT_CACHE_TTL_MS), "cache.ttl_ms")?;

    let batch_size = cache.max_batch_size.unwrap_or(DEFAULT_MAX_BATCH_SIZE);
    let max_batch_size = usize::try_from(batch_size)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| LoadError::invalid("cache.max_batch_size", "must be greater than zero"))?;

    let fetch_timeout_ms = cache
        .fetch_timeout_ms
        .map(|value| non_zero_u64(value, "cache.fetch_timeout_ms"))
        .transpose()?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        ttl_ms,
        batch_delay_ms: cache.batch_delay_ms.unwrap_or(DEFAULT_BATCH_DELAY_MS),
        max_batch_size,
        fetch_timeout_ms,
    })
}

fn build_invalidation_settings(
    invalidation: RawInvalidationSettings,
) -> Result<InvalidationSettings, LoadError> {
    let channel = match invalidation.channel {
        Some(channel) => {
            let trimmed = channel.trim();
            if trimmed.is_empty() {
                return Err(LoadError::invalid(
                    "invalidation.channel",
                    "must not be empty",
                ));
            }
            trimmed.to_string()
        }
        None => INVALIDATION_CHANNEL.to_string(),
    };

    Ok(InvalidationSettings { channel })
}

fn build_query_settings(query: RawQuerySettings) -> Result<QuerySettings, LoadError> {
    let max_page_size = non_zero_u32(
        query.max_page_size.unwrap_or(DEFAULT_MAX_PAGE_SIZE),
        "query.max_page_size",
    )?;
    let default_page_size = non_zero_u32(
        query.default_page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        "query.default_page_size",
    )?;
    let max_first = non_zero_u32(
        query.max_first.unwrap_or(DEFAULT_MAX_FIRST),
        "query.max_first",
    )?;
    let default_first = non_zero_u32(
        query.default_first.unwrap_or(DEFAULT_FIRST),
        "query.default_first",
    )?;

    if default_page_size > max_page_size {
        return Err(LoadError::invalid(
            "query.default_page_size",
            format!("must not exceed query.max_page_size ({max_page_size})"),
        ));
    }
    if default_first > max_first {
        return Err(LoadError::invalid(
            "query.default_first",
            format!("must not exceed query.max_first ({max_first})"),
        ));
    }

    Ok(QuerySettings {
        max_page_size,
        default_page_size,
        default_first,
        max_first,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    invalidation: RawInvalidationSettings,
    query: RawQuerySettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    ttl_ms: Option<u64>,
    batch_delay_ms: Option<u64>,
    max_batch_size: Option<u64>,
    fetch_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawInvalidationSettings {
    channel: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawQuerySettings {
    max_page_size: Option<u64>,
    default_page_size: Option<u64>,
    default_first: Option<u64>,
    max_first: Option<u64>,
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_u64(value: u64, key: &'static str) -> Result<NonZeroU64, LoadError> {
    NonZeroU64::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
