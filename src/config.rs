use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, ensure};
use chrono_tz::Tz;
use log::warn;
use serde_derive::Deserialize;

use crate::debounce::DebounceConfig;

const DEFAULT_DEBOUNCE_COUNT: u32 = 2;
const DEFAULT_TIMEZONE: &str = "Europe/Kyiv";
const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 60;
const DEFAULT_STATE_PATH: &str = "power_state.json";

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub tuya: TuyaConfig,
    pub telegram: Option<TelegramConfig>,
    pub mqtt: Option<MqttConfig>,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TuyaConfig {
    pub endpoint: String,
    pub access_id: String,
    pub access_key: String,
    pub device_id: String,
    /// Used in MQTT topics; defaults to the device id.
    pub device_name: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub api_base: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publisher_id: Option<String>,
    pub topic_path: Option<String>,
    pub keep_alive_seconds: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct StateConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct SettingsConfig {
    pub debounce_count: Option<u32>,
    pub confirmation_delay_seconds: Option<u64>,
    pub timezone: Option<String>,
    pub poll_interval_seconds: Option<u64>,
}

impl AppConfig {
    /// Environment variables win when `TUYA_ACCESS_ID` is set, otherwise the TOML file is read.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = match Self::from_lookup(|key| std::env::var(key).ok())? {
            Some(config) => config,
            None => Self::from_file(path)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::de::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Option<Self>> {
        if lookup("TUYA_ACCESS_ID").is_none() {
            return Ok(None);
        }
        let required =
            |key: &str| lookup(key).with_context(|| format!("environment variable {key} is not set"));
        let parsed = |key: &str| -> anyhow::Result<Option<u64>> {
            lookup(key)
                .map(|value| value.parse().with_context(|| format!("{key}={value} is not a number")))
                .transpose()
        };

        let telegram = match (lookup("TG_BOT_TOKEN"), lookup("TG_CHAT_ID")) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramConfig {
                bot_token,
                chat_id,
                api_base: None,
            }),
            _ => None,
        };

        Ok(Some(AppConfig {
            tuya: TuyaConfig {
                endpoint: required("TUYA_ENDPOINT")?,
                access_id: required("TUYA_ACCESS_ID")?,
                access_key: required("TUYA_ACCESS_KEY")?,
                device_id: required("TUYA_DEVICE_ID")?,
                device_name: lookup("TUYA_DEVICE_NAME"),
            },
            telegram,
            mqtt: None,
            state: StateConfig {
                path: lookup("STATE_PATH").map(PathBuf::from),
            },
            settings: SettingsConfig {
                debounce_count: parsed("DEBOUNCE_COUNT")?
                    .map(u32::try_from)
                    .transpose()
                    .context("DEBOUNCE_COUNT is out of range")?,
                confirmation_delay_seconds: parsed("CONFIRMATION_DELAY_SECONDS")?,
                timezone: lookup("TIMEZONE"),
                poll_interval_seconds: parsed("POLL_INTERVAL_SECONDS")?,
            },
        }))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.tuya.endpoint.is_empty(), "tuya.endpoint must be set");
        ensure!(!self.tuya.access_id.is_empty(), "tuya.access_id must be set");
        ensure!(!self.tuya.access_key.is_empty(), "tuya.access_key must be set");
        ensure!(!self.tuya.device_id.is_empty(), "tuya.device_id must be set");
        ensure!(
            self.settings.debounce_count() >= 1,
            "settings.debounce_count must be at least 1"
        );
        ensure!(
            !self.settings.poll_interval().is_zero(),
            "settings.poll_interval_seconds must be greater than 0"
        );
        if let Some(telegram) = &self.telegram {
            ensure!(
                !telegram.bot_token.is_empty() && !telegram.chat_id.is_empty(),
                "telegram.bot_token and telegram.chat_id must be set"
            );
        }
        Ok(())
    }

    pub fn state_path(&self) -> PathBuf {
        self.state
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH))
    }

    pub fn device_name(&self) -> &str {
        self.tuya.device_name.as_deref().unwrap_or(&self.tuya.device_id)
    }
}

impl SettingsConfig {
    pub fn debounce_count(&self) -> u32 {
        self.debounce_count.unwrap_or(DEFAULT_DEBOUNCE_COUNT)
    }

    pub fn confirmation_delay(&self) -> Duration {
        Duration::from_secs(self.confirmation_delay_seconds.unwrap_or(0))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(
            self.poll_interval_seconds
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECONDS),
        )
    }

    pub fn debounce(&self) -> DebounceConfig {
        DebounceConfig {
            threshold: self.debounce_count(),
            confirmation_delay: self.confirmation_delay(),
        }
    }

    /// Falls back to UTC when the configured zone is not recognised.
    pub fn timezone(&self) -> Tz {
        let name = self.timezone.as_deref().unwrap_or(DEFAULT_TIMEZONE);
        name.parse().unwrap_or_else(|err| {
            warn!("Invalid timezone {name:?} ({err}), using UTC");
            Tz::UTC
        })
    }
}
