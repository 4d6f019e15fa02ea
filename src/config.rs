use std::env;
use std::time::Duration;

use chrono::NaiveDate;
use chrono_tz::Tz;

#[derive(Debug, Clone)]
pub struct Config {
    pub silae: SilaeConfig,
    pub google: GoogleConfig,
    pub sync: SyncConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct SilaeConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    /// Portal id of the employee whose shifts are synced.
    pub employee_id: String,
}

#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    /// Dedicated calendar receiving the shifts. Read from `GOOGLE_CALENDAR_ID`,
    /// falling back to `HOTEL_CALENDAR_ID`.
    pub calendar_id: String,
    pub api_url: String,
    pub token_url: String,
    pub color_id: String,
    pub reminder_minutes: u32,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub timezone: Tz,
    /// Upper bound for every single call to the portal or the calendar.
    pub call_timeout: Duration,
    /// Pin the run to the week containing this date instead of next week.
    pub week_start: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default level for this crate when `RUST_LOG` is not set.
    pub level: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnv(key.to_string()));

        let timezone = get("TIMEZONE")
            .unwrap_or_else(|| "Europe/Paris".to_string())
            .trim()
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidValue("TIMEZONE".to_string()))?;

        let call_timeout_secs: u64 = get("SYNC_CALL_TIMEOUT_SECONDS")
            .unwrap_or_else(|| "60".to_string())
            .trim()
            .parse()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| ConfigError::InvalidValue("SYNC_CALL_TIMEOUT_SECONDS".to_string()))?;

        let week_start = match get("SYNC_WEEK_START") {
            Some(v) => Some(
                NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d")
                    .map_err(|_| ConfigError::InvalidValue("SYNC_WEEK_START".to_string()))?,
            ),
            None => None,
        };

        Ok(Config {
            silae: SilaeConfig {
                base_url: http_url(
                    "SILAE_BASE_URL",
                    get("SILAE_BASE_URL")
                        .unwrap_or_else(|| "https://fiteco.rhsuite.silae.fr".to_string()),
                )?,
                username: require("SILAE_USERNAME")?,
                password: require("SILAE_PASSWORD")?,
                employee_id: require("EMPLOYEE_ID")?.trim().to_string(),
            },
            google: GoogleConfig {
                client_id: require("GOOGLE_CLIENT_ID")?,
                client_secret: require("GOOGLE_CLIENT_SECRET")?,
                refresh_token: require("GOOGLE_REFRESH_TOKEN")?,
                calendar_id: get("GOOGLE_CALENDAR_ID")
                    .or_else(|| get("HOTEL_CALENDAR_ID"))
                    .ok_or_else(|| ConfigError::MissingEnv("GOOGLE_CALENDAR_ID".to_string()))?,
                api_url: http_url(
                    "GOOGLE_API_URL",
                    get("GOOGLE_API_URL")
                        .unwrap_or_else(|| "https://www.googleapis.com/calendar/v3".to_string()),
                )?,
                token_url: http_url(
                    "GOOGLE_TOKEN_URL",
                    get("GOOGLE_TOKEN_URL")
                        .unwrap_or_else(|| "https://oauth2.googleapis.com/token".to_string()),
                )?,
                color_id: get("GOOGLE_EVENT_COLOR_ID").unwrap_or_else(|| "1".to_string()),
                reminder_minutes: get("GOOGLE_REMINDER_MINUTES")
                    .unwrap_or_else(|| "30".to_string())
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("GOOGLE_REMINDER_MINUTES".to_string()))?,
            },
            sync: SyncConfig {
                timezone,
                call_timeout: Duration::from_secs(call_timeout_secs),
                week_start,
            },
            log: LogConfig {
                level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            },
        })
    }
}

/// Accept only absolute http(s) URLs; the trailing slash is dropped.
fn http_url(key: &str, value: String) -> Result<String, ConfigError> {
    match url::Url::parse(value.trim()) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {
            Ok(value.trim().trim_end_matches('/').to_string())
        }
        _ => Err(ConfigError::InvalidValue(key.to_string())),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn required() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("SILAE_USERNAME", "jdoe"),
            ("SILAE_PASSWORD", "secret"),
            ("EMPLOYEE_ID", " 1689 "),
            ("GOOGLE_CLIENT_ID", "client"),
            ("GOOGLE_CLIENT_SECRET", "client-secret"),
            ("GOOGLE_REFRESH_TOKEN", "refresh"),
            ("GOOGLE_CALENDAR_ID", "shifts@group.calendar.google.com"),
        ])
    }

    fn load(vars: HashMap<&'static str, &'static str>) -> Result<Config, ConfigError> {
        Config::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn applies_defaults() {
        let config = load(required()).unwrap();
        assert_eq!(config.silae.base_url, "https://fiteco.rhsuite.silae.fr");
        assert_eq!(config.silae.employee_id, "1689");
        assert_eq!(config.google.color_id, "1");
        assert_eq!(config.google.reminder_minutes, 30);
        assert_eq!(config.sync.timezone, chrono_tz::Europe::Paris);
        assert_eq!(config.sync.call_timeout, Duration::from_secs(60));
        assert_eq!(config.sync.week_start, None);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn reports_missing_variable() {
        let mut vars = required();
        vars.remove("SILAE_PASSWORD");
        match load(vars) {
            Err(ConfigError::MissingEnv(key)) => assert_eq!(key, "SILAE_PASSWORD"),
            other => panic!("expected missing env, got {:?}", other),
        }

        let mut vars = required();
        vars.insert("GOOGLE_REFRESH_TOKEN", "   ");
        assert!(matches!(load(vars), Err(ConfigError::MissingEnv(_))));
    }

    #[test]
    fn accepts_legacy_calendar_variable() {
        let mut vars = required();
        vars.remove("GOOGLE_CALENDAR_ID");
        vars.insert("HOTEL_CALENDAR_ID", "hotel-calendar");
        assert_eq!(load(vars).unwrap().google.calendar_id, "hotel-calendar");

        let mut vars = required();
        vars.remove("GOOGLE_CALENDAR_ID");
        match load(vars) {
            Err(ConfigError::MissingEnv(key)) => assert_eq!(key, "GOOGLE_CALENDAR_ID"),
            other => panic!("expected missing env, got {:?}", other),
        }
    }

    #[test]
    fn rejects_invalid_values() {
        let mut vars = required();
        vars.insert("TIMEZONE", "Mars/Olympus");
        assert!(matches!(load(vars), Err(ConfigError::InvalidValue(k)) if k == "TIMEZONE"));

        let mut vars = required();
        vars.insert("SYNC_CALL_TIMEOUT_SECONDS", "0");
        assert!(matches!(load(vars), Err(ConfigError::InvalidValue(_))));

        let mut vars = required();
        vars.insert("GOOGLE_API_URL", "googleapis.com/calendar");
        assert!(matches!(load(vars), Err(ConfigError::InvalidValue(k)) if k == "GOOGLE_API_URL"));

        let mut vars = required();
        vars.insert("SYNC_WEEK_START", "next monday");
        assert!(matches!(load(vars), Err(ConfigError::InvalidValue(k)) if k == "SYNC_WEEK_START"));
    }

    #[test]
    fn parses_overrides() {
        let mut vars = required();
        vars.insert("TIMEZONE", "America/New_York");
        vars.insert("SYNC_CALL_TIMEOUT_SECONDS", "15");
        vars.insert("SYNC_WEEK_START", "2024-06-12");
        vars.insert("GOOGLE_REMINDER_MINUTES", "0");
        vars.insert("SILAE_BASE_URL", "http://127.0.0.1:8081/");

        let config = load(vars).unwrap();
        assert_eq!(config.sync.timezone, chrono_tz::America::New_York);
        assert_eq!(config.sync.call_timeout, Duration::from_secs(15));
        assert_eq!(config.sync.week_start, NaiveDate::from_ymd_opt(2024, 6, 12));
        assert_eq!(config.google.reminder_minutes, 0);
        assert_eq!(config.silae.base_url, "http://127.0.0.1:8081");
    }
}
