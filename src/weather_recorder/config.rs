// weather_recorder - Record current weather observations into InfluxDB
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::client::ForecastRequest;
use crate::points::Tags;
use crate::retry::{ExponentialBackoff, FixedBackoff, RetryPolicy};
use clap::builder::NonEmptyStringValueParser;
use clap::{Parser, ValueEnum};
use serde_json::Value;
use std::error;
use std::fmt;
use std::time::Duration;
use tracing::Level;

pub const DEFAULT_LOG_LEVEL: Level = Level::INFO;
pub const DEFAULT_API_URL: &str = "https://api.darksky.net/";
pub const DEFAULT_INFLUXDB_ADDRESS: &str = "influxdb";
pub const DEFAULT_INFLUXDB_PORT: u16 = 8086;
pub const DEFAULT_INFLUXDB_NAME: &str = "weather";
pub const DEFAULT_INFLUXDB_CREDENTIAL: &str = "root";
pub const DEFAULT_PERIOD_SECS: u64 = 120;
pub const DEFAULT_UNITS: &str = "us";
pub const DEFAULT_TAGS: &str = "{}";
pub const DEFAULT_TIMEOUT_MILLIS: u64 = 5000;
pub const DEFAULT_RETRY_SECS: u64 = 5;
pub const DEFAULT_RETRY_MAX_SECS: u64 = 300;

/// Tag added to every point, set from `--location`.
pub const LOCATION_TAG: &str = "location";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backoff {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Parser)]
#[clap(name = "weather_recorder", version = clap::crate_version!())]
pub struct RecorderOptions {
    /// API key for the forecast API
    #[clap(long, env = "API_KEY", hide_env_values = true, value_parser = NonEmptyStringValueParser::new())]
    pub api_key: String,

    /// Latitude of the location to record weather for
    #[clap(long, env = "LATITUDE", allow_hyphen_values = true)]
    pub latitude: f64,

    /// Longitude of the location to record weather for
    #[clap(long, env = "LONGITUDE", allow_hyphen_values = true)]
    pub longitude: f64,

    /// Name of the location, added to every point as the 'location' tag
    #[clap(long, env = "LOCATION", value_parser = NonEmptyStringValueParser::new())]
    pub location: String,

    /// Host name or address of the InfluxDB server
    #[clap(long, env = "INFLUXDB_ADDRESS", default_value_t = DEFAULT_INFLUXDB_ADDRESS.into())]
    pub influxdb_address: String,

    /// Port of the InfluxDB HTTP API
    #[clap(long, env = "INFLUXDB_PORT", default_value_t = DEFAULT_INFLUXDB_PORT)]
    pub influxdb_port: u16,

    /// Database to write points to, created if it doesn't exist
    #[clap(long, env = "INFLUXDB_NAME", default_value_t = DEFAULT_INFLUXDB_NAME.into())]
    pub influxdb_name: String,

    /// User for the InfluxDB HTTP API
    #[clap(long, env = "INFLUXDB_USER", default_value_t = DEFAULT_INFLUXDB_CREDENTIAL.into())]
    pub influxdb_user: String,

    /// Password for the InfluxDB HTTP API
    #[clap(long, env = "INFLUXDB_PASSWORD", default_value_t = DEFAULT_INFLUXDB_CREDENTIAL.into(), hide_env_values = true)]
    pub influxdb_password: String,

    /// Record current weather at this interval, in seconds.
    #[clap(long, env = "PERIOD", default_value_t = DEFAULT_PERIOD_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    pub period: u64,

    /// Unit system for readings. Allowed values are 'us', 'si', 'ca', 'uk2', and 'auto'
    #[clap(long, env = "UNITS", default_value_t = DEFAULT_UNITS.into())]
    pub units: String,

    /// Extra tags for every point as a JSON object, e.g. "{'sensor': 'roof'}". Single
    /// quotes are accepted in place of double quotes.
    #[clap(long, env = "TAGS", default_value_t = DEFAULT_TAGS.into())]
    pub tags: String,

    /// Base URL for the forecast API
    #[clap(long, env = "API_URL", default_value_t = DEFAULT_API_URL.into())]
    pub api_url: String,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, env = "LOG_LEVEL", default_value_t = DEFAULT_LOG_LEVEL)]
    pub log_level: Level,

    /// Timeout for requests to the forecast API and InfluxDB, in milliseconds.
    #[clap(long, env = "TIMEOUT_MILLIS", default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    pub timeout_millis: u64,

    /// How the wait between retries of a forecast request that failed to connect grows.
    /// 'fixed' always waits --retry-secs, 'exponential' doubles the wait after each
    /// failure starting at --retry-secs, up to --retry-max-secs.
    #[clap(long, env = "RETRY_BACKOFF", value_enum, default_value_t = Backoff::Fixed)]
    pub retry_backoff: Backoff,

    /// Longest wait between retries when using exponential backoff, in seconds.
    #[clap(long, env = "RETRY_MAX_SECS", default_value_t = DEFAULT_RETRY_MAX_SECS)]
    pub retry_max_secs: u64,

    /// Wait this long before retrying a forecast request that failed to connect, in seconds.
    #[clap(long, env = "RETRY_SECS", default_value_t = DEFAULT_RETRY_SECS)]
    pub retry_secs: u64,

    /// Give up on a forecast request after this many failed attempts and wait for the
    /// next period. By default, requests are retried until shutdown.
    #[clap(long, env = "RETRY_MAX_ATTEMPTS", value_parser = clap::value_parser!(u32).range(1..))]
    pub retry_max_attempts: Option<u32>,
}

impl RecorderOptions {
    /// Static tags with the location tag merged in.
    pub fn tags(&self) -> Result<Tags, TagsError> {
        let mut tags = parse_tags(&self.tags)?;
        tags.insert(LOCATION_TAG.to_owned(), self.location.clone());
        Ok(tags)
    }

    pub fn forecast_request(&self) -> ForecastRequest {
        ForecastRequest {
            api_key: self.api_key.clone(),
            latitude: self.latitude,
            longitude: self.longitude,
            units: self.units.clone(),
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis)
    }

    pub fn retry_policy(&self) -> Box<dyn RetryPolicy + Send + Sync> {
        let delay = Duration::from_secs(self.retry_secs);
        match self.retry_backoff {
            Backoff::Fixed => Box::new(FixedBackoff {
                delay,
                max_attempts: self.retry_max_attempts,
            }),
            Backoff::Exponential => Box::new(ExponentialBackoff {
                initial: delay,
                max: Duration::from_secs(self.retry_max_secs).max(delay),
                max_attempts: self.retry_max_attempts,
            }),
        }
    }
}

#[derive(Debug)]
pub enum TagsError {
    Invalid(serde_json::Error),
    NotAnObject,
    NestedValue(String),
}

impl fmt::Display for TagsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid(e) => write!(f, "invalid tags: {}", e),
            Self::NotAnObject => write!(f, "tags must be a JSON object"),
            Self::NestedValue(k) => write!(f, "tag {} must be a string, number, or boolean", k),
        }
    }
}

impl error::Error for TagsError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Invalid(e) => Some(e),
            _ => None,
        }
    }
}

/// Parse a JSON object of tags, allowing single quotes in place of double quotes.
pub fn parse_tags(raw: &str) -> Result<Tags, TagsError> {
    let normalized = raw.replace('\'', "\"");
    let parsed: Value = serde_json::from_str(&normalized).map_err(TagsError::Invalid)?;
    let obj = match parsed {
        Value::Object(obj) => obj,
        _ => return Err(TagsError::NotAnObject),
    };

    let mut tags = Tags::new();
    for (k, v) in obj {
        let val = match v {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return Err(TagsError::NestedValue(k)),
        };

        tags.insert(k, val);
    }

    Ok(tags)
}
