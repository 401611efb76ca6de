//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    collections::BTreeMap,
    num::{NonZeroU32, NonZeroU64},
    str::FromStr,
    time::Duration,
};

use chrono::NaiveTime;
use chrono_tz::Tz;
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{CliArgs, Command, HarmonizeArgs, LifetimeArgs, ScopeArgs, SettingsOverrides};

use crate::application::harmonize::parse_slot;
use crate::domain::ContentTable;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "tidemark";
const ENV_PREFIX: &str = "TIDEMARK";
const DEFAULT_DB_MAX_CONNECTIONS: u64 = 8;
const DEFAULT_SCOPING_STRATEGY: &str = "global";
const DEFAULT_TIMING_STRATEGY: &str = "dynamic";
const DEFAULT_HYBRID_KIND: &str = "scheduler";
const DEFAULT_SCHEDULER_INTERVAL_SECS: u64 = 300;
pub const MIN_SCHEDULER_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAX_LIFETIME_SECS: u64 = 86_400;
const DEFAULT_CACHE_BUCKET_SECS: u64 = 1;
const DEFAULT_HARMONIZATION_SLOT: &str = "00:00";
const DEFAULT_HARMONIZATION_TOLERANCE_SECS: u64 = 3600;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub strategy: StrategySettings,
    pub scheduler: SchedulerSettings,
    pub lifetime: LifetimeSettings,
    pub content: ContentSettings,
    pub harmonization: HarmonizationSettings,
    pub purge: PurgeSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
    /// Forces `debug` for tidemark targets regardless of `level`.
    pub debug: bool,
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

/// Strategy selections are kept verbatim; unknown names resolve to the
/// documented fallbacks at wiring time instead of failing the load.
#[derive(Debug, Clone)]
pub struct StrategySettings {
    pub scoping: String,
    pub use_reference_index: bool,
    pub timing: String,
    pub hybrid_routes: BTreeMap<String, String>,
    pub hybrid_default: String,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub interval: Duration,
    /// The value asked for, before the floor was applied.
    pub requested_seconds: u64,
}

impl SchedulerSettings {
    pub fn was_clamped(&self) -> bool {
        self.requested_seconds < MIN_SCHEDULER_INTERVAL_SECS
    }
}

#[derive(Debug, Clone)]
pub struct LifetimeSettings {
    pub default_max_lifetime: u64,
    /// `0` means "no site ceiling".
    pub site_ceiling: u64,
}

#[derive(Debug, Clone)]
pub struct ContentSettings {
    pub tables: Vec<ContentTable>,
    pub include_hidden: bool,
    pub cache_bucket_seconds: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct HarmonizationSettings {
    pub enabled: bool,
    pub slots: Vec<NaiveTime>,
    pub tolerance_seconds: u64,
    pub timezone: Tz,
}

#[derive(Debug, Clone)]
pub struct PurgeSettings {
    pub url: Option<reqwest::Url>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("content.tables")
            .with_list_parse_key("harmonization.slots"),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    strategy: RawStrategySettings,
    scheduler: RawSchedulerSettings,
    lifetime: RawLifetimeSettings,
    content: RawContentSettings,
    harmonization: RawHarmonizationSettings,
    purge: RawPurgeSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &SettingsOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if overrides.debug {
            self.logging.debug = Some(true);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(scoping) = overrides.scoping.as_ref() {
            self.strategy.scoping = Some(scoping.clone());
        }
        if let Some(timing) = overrides.timing.as_ref() {
            self.strategy.timing = Some(timing.clone());
        }
        if let Some(interval) = overrides.scheduler_interval_seconds {
            self.scheduler.interval_seconds = Some(interval);
        }
        if let Some(include_hidden) = overrides.include_hidden {
            self.content.include_hidden = Some(include_hidden);
        }
        if let Some(url) = overrides.purge_url.as_ref() {
            self.purge.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            strategy,
            scheduler,
            lifetime,
            content,
            harmonization,
            purge,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            strategy: build_strategy_settings(strategy),
            scheduler: build_scheduler_settings(scheduler),
            lifetime: build_lifetime_settings(lifetime),
            content: build_content_settings(content)?,
            harmonization: build_harmonization_settings(harmonization)?,
            purge: build_purge_settings(purge)?,
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logging: LoggingSettings {
                level: LevelFilter::INFO,
                format: LogFormat::Compact,
                debug: false,
            },
            database: DatabaseSettings {
                url: None,
                max_connections: NonZeroU32::new(DEFAULT_DB_MAX_CONNECTIONS as u32)
                    .unwrap_or(NonZeroU32::MIN),
            },
            strategy: build_strategy_settings(RawStrategySettings::default()),
            scheduler: build_scheduler_settings(RawSchedulerSettings::default()),
            lifetime: build_lifetime_settings(RawLifetimeSettings::default()),
            content: ContentSettings {
                tables: default_tables(),
                include_hidden: false,
                cache_bucket_seconds: NonZeroU64::MIN,
            },
            harmonization: HarmonizationSettings {
                enabled: false,
                slots: vec![NaiveTime::default()],
                tolerance_seconds: DEFAULT_HARMONIZATION_TOLERANCE_SECS,
                timezone: Tz::UTC,
            },
            purge: PurgeSettings { url: None },
        }
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

    Ok(LoggingSettings {
        level,
        format,
        debug: logging.debug.unwrap_or(false),
    })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_blank(database.url);
    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_strategy_settings(strategy: RawStrategySettings) -> StrategySettings {
    let hybrid_routes = strategy.hybrid.routes.unwrap_or_else(|| {
        BTreeMap::from([
            (ContentTable::pages().to_string(), "dynamic".to_string()),
            (
                ContentTable::content_elements().to_string(),
                "scheduler".to_string(),
            ),
        ])
    });

    StrategySettings {
        scoping: non_blank(strategy.scoping).unwrap_or_else(|| DEFAULT_SCOPING_STRATEGY.into()),
        use_reference_index: strategy.use_reference_index.unwrap_or(true),
        timing: non_blank(strategy.timing).unwrap_or_else(|| DEFAULT_TIMING_STRATEGY.into()),
        hybrid_routes,
        hybrid_default: non_blank(strategy.hybrid.default)
            .unwrap_or_else(|| DEFAULT_HYBRID_KIND.into()),
    }
}

fn build_scheduler_settings(scheduler: RawSchedulerSettings) -> SchedulerSettings {
    let requested_seconds = scheduler
        .interval_seconds
        .unwrap_or(DEFAULT_SCHEDULER_INTERVAL_SECS);

    SchedulerSettings {
        interval: Duration::from_secs(requested_seconds.max(MIN_SCHEDULER_INTERVAL_SECS)),
        requested_seconds,
    }
}

fn build_lifetime_settings(lifetime: RawLifetimeSettings) -> LifetimeSettings {
    LifetimeSettings {
        default_max_lifetime: lifetime
            .default_max_lifetime
            .unwrap_or(DEFAULT_MAX_LIFETIME_SECS),
        site_ceiling: lifetime.site_ceiling.unwrap_or(0),
    }
}

fn default_tables() -> Vec<ContentTable> {
    vec![ContentTable::pages(), ContentTable::content_elements()]
}

fn build_content_settings(content: RawContentSettings) -> Result<ContentSettings, LoadError> {
    let tables = match content.tables {
        None => default_tables(),
        Some(names) => {
            let mut tables: Vec<ContentTable> = Vec::with_capacity(names.len());
            for name in names {
                let table = ContentTable::new(name.trim())
                    .map_err(|err| LoadError::invalid("content.tables", err.to_string()))?;
                if !tables.contains(&table) {
                    tables.push(table);
                }
            }
            if tables.is_empty() {
                return Err(LoadError::invalid(
                    "content.tables",
                    "at least one table is required",
                ));
            }
            tables
        }
    };

    let bucket = content
        .cache_bucket_seconds
        .unwrap_or(DEFAULT_CACHE_BUCKET_SECS);
    let cache_bucket_seconds = NonZeroU64::new(bucket).ok_or_else(|| {
        LoadError::invalid("content.cache_bucket_seconds", "must be greater than zero")
    })?;

    Ok(ContentSettings {
        tables,
        include_hidden: content.include_hidden.unwrap_or(false),
        cache_bucket_seconds,
    })
}

fn build_harmonization_settings(
    harmonization: RawHarmonizationSettings,
) -> Result<HarmonizationSettings, LoadError> {
    let raw_slots = harmonization
        .slots
        .unwrap_or_else(|| vec![DEFAULT_HARMONIZATION_SLOT.to_string()]);
    let slots = raw_slots
        .iter()
        .map(|slot| parse_slot(slot))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| LoadError::invalid("harmonization.slots", err.to_string()))?;

    let enabled = harmonization.enabled.unwrap_or(false);
    if enabled && slots.is_empty() {
        return Err(LoadError::invalid(
            "harmonization.slots",
            "at least one slot is required when harmonization is enabled",
        ));
    }

    let timezone = match non_blank(harmonization.timezone) {
        Some(name) => Tz::from_str(&name).map_err(|err| {
            LoadError::invalid("harmonization.timezone", format!("`{name}`: {err}"))
        })?,
        None => Tz::UTC,
    };

    Ok(HarmonizationSettings {
        enabled,
        slots,
        tolerance_seconds: harmonization
            .tolerance_seconds
            .unwrap_or(DEFAULT_HARMONIZATION_TOLERANCE_SECS),
        timezone,
    })
}

fn build_purge_settings(purge: RawPurgeSettings) -> Result<PurgeSettings, LoadError> {
    let url = non_blank(purge.url)
        .map(|value| {
            reqwest::Url::parse(&value)
                .map_err(|err| LoadError::invalid("purge.url", format!("`{value}`: {err}")))
        })
        .transpose()?;

    Ok(PurgeSettings { url })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
    debug: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStrategySettings {
    scoping: Option<String>,
    use_reference_index: Option<bool>,
    timing: Option<String>,
    hybrid: RawHybridSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHybridSettings {
    routes: Option<BTreeMap<String, String>>,
    default: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSchedulerSettings {
    interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLifetimeSettings {
    default_max_lifetime: Option<u64>,
    site_ceiling: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawContentSettings {
    tables: Option<Vec<String>>,
    include_hidden: Option<bool>,
    cache_bucket_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHarmonizationSettings {
    enabled: Option<bool>,
    slots: Option<Vec<String>>,
    tolerance_seconds: Option<u64>,
    timezone: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPurgeSettings {
    url: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
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
