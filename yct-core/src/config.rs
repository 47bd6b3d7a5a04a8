//! Device configuration
//!
//! A single flat JSON object. It is read at startup and rewritten wholesale
//! on every update; there is no partial patch and no schema version.

use serde::{Deserialize, Serialize};

use crate::storage::{load_document, save_document, Storage, StoreError};

/// Name of the configuration document
pub const CONFIG_FILE: &str = "/config.json";

pub const MAX_MINUTES_STAND_BY: u32 = 60;
pub const MAX_DAYS_OF_HISTORIC: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Station network
    pub ssid: String,
    pub password: String,
    /// Access point served by the device
    #[serde(rename = "APssid")]
    pub ap_ssid: String,
    #[serde(rename = "APpassword")]
    pub ap_password: String,
    /// Minutes another device must stay nearby before it becomes a contact
    pub minutes_stand_by: u32,
    /// Days a contact is kept before it expires
    pub days_of_historic: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ssid: "DEFAULT_SSID".to_string(),
            password: "DEFAULT_PASSWORD".to_string(),
            ap_ssid: "ESP32_AP".to_string(),
            ap_password: "12345678".to_string(),
            minutes_stand_by: 5,
            days_of_historic: 30,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be a whole number, got {value:?}")]
    InvalidNumber { field: &'static str, value: String },
    #[error("{field} must be between 0 and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        max: u32,
    },
}

impl Config {
    /// `None` when the document does not exist yet
    pub fn load<S: Storage + ?Sized>(storage: &S) -> Result<Option<Self>, StoreError> {
        load_document(storage, CONFIG_FILE)
    }

    pub fn save<S: Storage + ?Sized>(&self, storage: &mut S) -> Result<(), StoreError> {
        save_document(storage, CONFIG_FILE, self)
    }

    /// Load the configuration, writing the defaults on first run
    pub fn load_or_init<S: Storage + ?Sized>(storage: &mut S) -> Result<Self, StoreError> {
        if let Some(config) = Self::load(storage)? {
            return Ok(config);
        }
        let config = Self::default();
        config.save(storage)?;
        Ok(config)
    }

    /// Build a complete configuration from submitted form fields.
    ///
    /// Fields absent from the form take their default value. Unknown fields
    /// are ignored.
    pub fn from_form(fields: &[(String, String)]) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for (name, value) in fields {
            match name.as_str() {
                "ssid" => config.ssid = value.clone(),
                "password" => config.password = value.clone(),
                "APssid" => config.ap_ssid = value.clone(),
                "APpassword" => config.ap_password = value.clone(),
                "minutes_stand_by" => {
                    config.minutes_stand_by =
                        parse_bounded("minutes_stand_by", value, MAX_MINUTES_STAND_BY)?
                }
                "days_of_historic" => {
                    config.days_of_historic =
                        parse_bounded("days_of_historic", value, MAX_DAYS_OF_HISTORIC)?
                }
                _ => {}
            }
        }
        Ok(config)
    }
}

fn parse_bounded(field: &'static str, value: &str, max: u32) -> Result<u32, ConfigError> {
    let parsed: u32 = value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber {
            field,
            value: value.to_string(),
        })?;
    if parsed > max {
        return Err(ConfigError::OutOfRange {
            field,
            value: parsed,
            max,
        });
    }
    Ok(parsed)
}
