use crate::domain::models::{
    BlockTitles, EngineConfig, WindowedBlockConfig, WorkHours, parse_hhmm, parse_weekday,
};
use crate::infrastructure::error::InfraError;
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_DIR: &str = "config";
const ENGINE_JSON: &str = "engine.json";
const SUPPORTED_SCHEMA: u64 = 1;

const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8080/oauth2/callback";
const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/calendar.events";

pub fn default_engine_config() -> serde_json::Value {
    serde_json::json!({
        "schema": 1,
        "timezone": "UTC",
        "calendarId": "primary",
        "workHours": {
            "start": "09:00",
            "end": "17:00",
            "days": ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday"]
        },
        "lookaheadDays": 7,
        "shortBlockMinutes": 5,
        "longBlockMinutes": 45,
        "minShortenedMinutes": 20,
        "anchorMinute": 55,
        "anchoredHours": [9, 10, 11, 13, 14, 15, 16],
        "cascadeIterationCap": 10,
        "windowedBlocks": [
            {
                "name": "post-lunch",
                "defaultTime": "12:45",
                "windowStart": "10:45",
                "windowEnd": "14:45"
            },
            {
                "name": "end-of-day",
                "defaultTime": "16:00",
                "windowStart": "14:45",
                "windowEnd": "17:00"
            }
        ],
        "outOfOfficeKeywords": [
            "out of office", "ooo", "vacation", "annual leave", "holiday", "pto", "sick"
        ],
        "titles": {
            "check": "Check Messages",
            "response": "Respond to Messages"
        }
    })
}

/// Writes `engine.json` with defaults unless it already exists.
pub fn ensure_default_config(config_dir: &Path) -> Result<PathBuf, InfraError> {
    fs::create_dir_all(config_dir)?;
    let path = config_dir.join(ENGINE_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&default_engine_config())?;
        fs::write(&path, format!("{formatted}\n"))?;
    }
    Ok(path)
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_engine_config(config_dir: &Path) -> Result<EngineConfig, InfraError> {
    let path = config_dir.join(ENGINE_JSON);
    let raw: RawEngineConfig = serde_json::from_value(read_config(&path)?)?;
    let config = raw
        .into_engine_config()
        .and_then(|config| config.validate().map(|_| config))
        .map_err(|message| InfraError::InvalidConfig(format!("{message} ({})", path.display())))?;
    Ok(config)
}

/// Fields left out of the file keep their built-in defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEngineConfig {
    timezone: Option<String>,
    calendar_id: Option<String>,
    work_hours: Option<RawWorkHours>,
    lookahead_days: Option<u32>,
    short_block_minutes: Option<u32>,
    long_block_minutes: Option<u32>,
    min_shortened_minutes: Option<u32>,
    anchor_minute: Option<u32>,
    anchored_hours: Option<Vec<u32>>,
    cascade_iteration_cap: Option<u32>,
    windowed_blocks: Option<Vec<RawWindowedBlock>>,
    out_of_office_keywords: Option<Vec<String>>,
    titles: Option<RawTitles>,
}

#[derive(Debug, Deserialize)]
struct RawWorkHours {
    start: String,
    end: String,
    days: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWindowedBlock {
    name: String,
    default_time: String,
    window_start: String,
    window_end: String,
}

#[derive(Debug, Deserialize)]
struct RawTitles {
    check: String,
    response: String,
}

impl RawEngineConfig {
    fn into_engine_config(self) -> Result<EngineConfig, String> {
        let defaults = EngineConfig::default();

        let timezone = match self.timezone {
            Some(name) => name
                .trim()
                .parse::<Tz>()
                .map_err(|_| format!("config.timezone '{name}' is not an IANA timezone"))?,
            None => defaults.timezone,
        };

        let work_hours = match self.work_hours {
            Some(raw) => WorkHours {
                start: time_field(&raw.start, "config.work_hours.start")?,
                end: time_field(&raw.end, "config.work_hours.end")?,
                days: raw
                    .days
                    .iter()
                    .map(|day| {
                        parse_weekday(day).ok_or_else(|| {
                            format!("config.work_hours.days has unknown day '{day}'")
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            },
            None => defaults.work_hours,
        };

        let windowed_blocks = match self.windowed_blocks {
            Some(blocks) => blocks
                .into_iter()
                .map(|block| -> Result<WindowedBlockConfig, String> {
                    let field = format!("config.windowed_blocks[{}]", block.name);
                    Ok(WindowedBlockConfig {
                        default_time: time_field(
                            &block.default_time,
                            &format!("{field}.default_time"),
                        )?,
                        window_start: time_field(
                            &block.window_start,
                            &format!("{field}.window_start"),
                        )?,
                        window_end: time_field(&block.window_end, &format!("{field}.window_end"))?,
                        name: block.name,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => defaults.windowed_blocks,
        };

        let titles = match self.titles {
            Some(raw) => BlockTitles {
                check: raw.check.trim().to_string(),
                response: raw.response.trim().to_string(),
            },
            None => defaults.titles,
        };

        Ok(EngineConfig {
            timezone,
            calendar_id: self
                .calendar_id
                .map(|value| value.trim().to_string())
                .unwrap_or(defaults.calendar_id),
            work_hours,
            lookahead_days: self.lookahead_days.unwrap_or(defaults.lookahead_days),
            short_block_minutes: self.short_block_minutes.unwrap_or(defaults.short_block_minutes),
            long_block_minutes: self.long_block_minutes.unwrap_or(defaults.long_block_minutes),
            min_shortened_minutes: self
                .min_shortened_minutes
                .unwrap_or(defaults.min_shortened_minutes),
            anchor_minute: self.anchor_minute.unwrap_or(defaults.anchor_minute),
            anchored_hours: self.anchored_hours.unwrap_or(defaults.anchored_hours),
            cascade_iteration_cap: self
                .cascade_iteration_cap
                .unwrap_or(defaults.cascade_iteration_cap),
            windowed_blocks,
            out_of_office_keywords: self
                .out_of_office_keywords
                .unwrap_or(defaults.out_of_office_keywords),
            titles,
        })
    }
}

fn time_field(value: &str, field_name: &str) -> Result<NaiveTime, String> {
    parse_hhmm(value).ok_or_else(|| format!("{field_name} must be HH:MM"))
}

/// Google OAuth client settings, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

pub fn load_oauth_settings_from_env() -> Result<OAuthSettings, InfraError> {
    load_oauth_settings_from_lookup(|key| std::env::var(key).ok())
}

pub fn load_oauth_settings_from_lookup<F>(lookup: F) -> Result<OAuthSettings, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let client_id = required_lookup_value(
        &lookup,
        &["MSGBLOCK_GOOGLE_CLIENT_ID", "GOOGLE_CLIENT_ID"],
        "google client id",
    )?;
    let client_secret = required_lookup_value(
        &lookup,
        &["MSGBLOCK_GOOGLE_CLIENT_SECRET", "GOOGLE_CLIENT_SECRET"],
        "google client secret",
    )?;
    let redirect_uri = optional_lookup_value(&lookup, &["MSGBLOCK_GOOGLE_REDIRECT_URI"])
        .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());
    let scopes = optional_lookup_value(&lookup, &["MSGBLOCK_GOOGLE_SCOPES"])
        .map(|raw| parse_scope_list(&raw))
        .filter(|scopes| !scopes.is_empty())
        .unwrap_or_else(|| vec![DEFAULT_SCOPE.to_string()]);

    Ok(OAuthSettings {
        client_id,
        client_secret,
        redirect_uri,
        scopes,
    })
}

fn required_lookup_value<F>(
    lookup: &F,
    keys: &[&str],
    field_name: &str,
) -> Result<String, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    optional_lookup_value(lookup, keys).ok_or_else(|| {
        InfraError::InvalidConfig(format!(
            "missing {} (set one of: {})",
            field_name,
            keys.join(", ")
        ))
    })
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn parse_scope_list(raw: &str) -> Vec<String> {
    raw.split([',', ' ', '\n', '\t'])
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}
