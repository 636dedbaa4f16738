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

use crate::retry::{retry, RetryError, RetryPolicy};
use crate::shutdown::Shutdown;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error;
use std::fmt;

#[derive(Debug)]
pub enum ClientError {
    InvalidUrl(String, String),
    Cancelled,
    Exhausted { attempts: u32, last: reqwest::Error },
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl(url, e) => write!(f, "invalid URL {}: {}", url, e),
            Self::Cancelled => write!(f, "request cancelled by shutdown"),
            Self::Exhausted { attempts, last } => write!(f, "request failed after {} attempts: {}", attempts, last),
        }
    }
}

impl error::Error for ClientError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            _ => None,
        }
    }
}

impl From<RetryError<reqwest::Error>> for ClientError {
    fn from(e: RetryError<reqwest::Error>) -> Self {
        match e {
            RetryError::Cancelled { .. } => Self::Cancelled,
            RetryError::Exhausted { attempts, last } => Self::Exhausted { attempts, last },
        }
    }
}

/// Location and units to request current conditions for.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRequest {
    pub api_key: String,
    pub latitude: f64,
    pub longitude: f64,
    pub units: String,
}

/// Response to a forecast request, successful or not.
///
/// The body is decoded as JSON regardless of the status code. Bodies that
/// aren't valid JSON are kept as a JSON string so they can still be logged.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub status: StatusCode,
    pub document: Value,
}

impl Fetched {
    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK
    }

    /// Error details from the body of a rejected request, if it has them.
    pub fn api_error(&self) -> Option<ApiError> {
        ApiError::deserialize(&self.document).ok()
    }
}

/// Error body returned by the forecast API along with non-200 statuses.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApiError {
    #[serde(alias = "code")]
    pub code: u16,
    #[serde(alias = "error")]
    pub error: String,
}

#[derive(Debug)]
pub struct ForecastClient {
    client: Client,
    base_url: Url,
}

impl ForecastClient {
    const USER_AGENT: &'static str = "weather_recorder (https://github.com/56quarters/weather_recorder)";
    const JSON_RESPONSE: &'static str = "application/json";
    const EXCLUDE: &'static str = "minutely,hourly,daily,alerts,flags";

    pub fn new(client: Client, base_url: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url).map_err(|e| ClientError::InvalidUrl(base_url.to_owned(), e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(base_url.to_string(), "not a base URL".to_owned()));
        }

        Ok(ForecastClient { client, base_url })
    }

    /// Fetch current conditions, retrying transport failures according to `policy`.
    ///
    /// A response with any status code ends the retries and is returned to the
    /// caller. `ClientError::Cancelled` is returned if shutdown is triggered
    /// before a response is received.
    pub async fn fetch<P>(&self, req: &ForecastRequest, policy: &P, shutdown: &Shutdown) -> Result<Fetched, ClientError>
    where
        P: RetryPolicy + ?Sized,
    {
        let url = self.forecast_url(req);
        tracing::debug!(
            message = "making forecast request",
            latitude = req.latitude,
            longitude = req.longitude,
            units = %req.units,
        );

        let (status, body) = retry(policy, shutdown, || {
            let builder = self
                .client
                .get(url.clone())
                .header(USER_AGENT, Self::USER_AGENT)
                .header(ACCEPT, Self::JSON_RESPONSE);

            async move {
                let res = builder.send().await?;
                let status = res.status();
                let body = res.text().await?;
                Ok::<_, reqwest::Error>((status, body))
            }
        })
        .await?;

        let document = serde_json::from_str(&body).unwrap_or_else(|e| {
            tracing::debug!(message = "forecast response is not JSON", status = %status, error = %e);
            Value::String(body)
        });

        Ok(Fetched { status, document })
    }

    pub fn forecast_url(&self, req: &ForecastRequest) -> Url {
        let encoded_key = utf8_percent_encode(&req.api_key, NON_ALPHANUMERIC);
        let mut url = self.base_url.clone();
        let path = format!(
            "{}/forecast/{}/{},{}",
            self.base_url.path().trim_end_matches('/'),
            encoded_key,
            req.latitude,
            req.longitude
        );

        url.set_path(&path);
        url.query_pairs_mut()
            .clear()
            .append_pair("units", &req.units)
            .append_pair("exclude", Self::EXCLUDE);
        url
    }
}
