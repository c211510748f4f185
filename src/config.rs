use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::FixedOffset;
use tracing_subscriber::EnvFilter;

use crate::engine::EngineSettings;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: invalid value {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime settings, read from `BOOKDESK_*` environment variables.
///
/// | Env Var                       | Default        |
/// |-------------------------------|----------------|
/// | `BOOKDESK_JOURNAL_PATH`       | unset (memory) |
/// | `BOOKDESK_REPO_TIMEOUT_MS`    | `5000`         |
/// | `BOOKDESK_UTC_OFFSET_MINUTES` | `480`          |
/// | `BOOKDESK_METRICS_PORT`       | unset (off)    |
/// | `BOOKDESK_COMPACT_THRESHOLD`  | `1000`         |
/// | `BOOKDESK_LOG`                | `info`         |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub journal_path: Option<PathBuf>,
    pub repo_timeout: Duration,
    pub utc_offset_minutes: i32,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            journal_path: None,
            repo_timeout: Duration::from_millis(5_000),
            utc_offset_minutes: 480,
            metrics_port: None,
            compact_threshold: 1000,
            log_filter: "info".into(),
        }
    }
}

fn parse<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable lookup. Unset or blank variables take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let repo_timeout = match get("BOOKDESK_REPO_TIMEOUT_MS") {
            Some(raw) => {
                let ms: u64 = parse("BOOKDESK_REPO_TIMEOUT_MS", &raw)?;
                if ms == 0 {
                    return Err(ConfigError::Invalid {
                        var: "BOOKDESK_REPO_TIMEOUT_MS",
                        value: raw,
                        reason: "must be positive".into(),
                    });
                }
                Duration::from_millis(ms)
            }
            None => defaults.repo_timeout,
        };

        let utc_offset_minutes = match get("BOOKDESK_UTC_OFFSET_MINUTES") {
            Some(raw) => {
                let minutes: i32 = parse("BOOKDESK_UTC_OFFSET_MINUTES", &raw)?;
                if FixedOffset::east_opt(minutes.saturating_mul(60)).is_none() {
                    return Err(ConfigError::Invalid {
                        var: "BOOKDESK_UTC_OFFSET_MINUTES",
                        value: raw,
                        reason: "offset must be within ±24h".into(),
                    });
                }
                minutes
            }
            None => defaults.utc_offset_minutes,
        };

        Ok(Self {
            journal_path: get("BOOKDESK_JOURNAL_PATH").map(PathBuf::from),
            repo_timeout,
            utc_offset_minutes,
            metrics_port: get("BOOKDESK_METRICS_PORT")
                .map(|raw| parse("BOOKDESK_METRICS_PORT", &raw))
                .transpose()?,
            compact_threshold: get("BOOKDESK_COMPACT_THRESHOLD")
                .map(|raw| parse("BOOKDESK_COMPACT_THRESHOLD", &raw))
                .transpose()?
                .unwrap_or(defaults.compact_threshold),
            log_filter: match get("BOOKDESK_LOG") {
                Some(raw) => {
                    if let Err(e) = EnvFilter::try_new(raw.trim()) {
                        return Err(ConfigError::Invalid {
                            var: "BOOKDESK_LOG",
                            value: raw,
                            reason: e.to_string(),
                        });
                    }
                    raw.trim().to_string()
                }
                None => defaults.log_filter,
            },
        })
    }

    pub fn office_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| EngineSettings::default().office_offset)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            repo_timeout: self.repo_timeout,
            office_offset: self.office_offset(),
        }
    }
}
