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

//! Mapping of a forecast document into InfluxDB points.
//!
//! Only the `currently` section of a forecast is recorded. Every reading in it
//! that can be interpreted as a number becomes a point named after the reading,
//! carrying the static tags and a single `value` field. Everything else (the
//! summary text, the icon name, missing values) is skipped.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::error;
use std::fmt;

/// Key of the object holding current readings in a forecast document.
pub const READINGS_KEY: &str = "currently";

/// Name of the only field set on each point.
pub const VALUE_FIELD: &str = "value";

/// Numeric readings documented by the forecast API, in the order they are written.
///
/// Readings that aren't listed here are still written after these, in key order.
pub const KNOWN_READINGS: &[&str] = &[
    "time",
    "temperature",
    "apparentTemperature",
    "dewPoint",
    "humidity",
    "pressure",
    "windSpeed",
    "windGust",
    "windBearing",
    "cloudCover",
    "uvIndex",
    "visibility",
    "ozone",
    "precipIntensity",
    "precipIntensityError",
    "precipProbability",
    "precipAccumulation",
    "nearestStormDistance",
    "nearestStormBearing",
];

pub type Tags = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: Tags,
    pub fields: BTreeMap<String, f64>,
}

impl Point {
    /// Create a point for a single reading, stored in the `value` field.
    pub fn reading<S: Into<String>>(measurement: S, tags: &Tags, value: f64) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(VALUE_FIELD.to_owned(), value);

        Point {
            measurement: measurement.into(),
            tags: tags.clone(),
            fields,
        }
    }

    /// Render this point as a line of InfluxDB line protocol without a timestamp.
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape(&self.measurement, &[',', ' ']);

        for (k, v) in self.tags.iter().filter(|(_, v)| !v.is_empty()) {
            line.push(',');
            line.push_str(&escape(k, &[',', '=', ' ']));
            line.push('=');
            line.push_str(&escape(v, &[',', '=', ' ']));
        }

        let fields = self
            .fields
            .iter()
            .map(|(k, v)| format!("{}={}", escape(k, &[',', '=', ' ']), v))
            .collect::<Vec<_>>()
            .join(",");

        line.push(' ');
        line.push_str(&fields);
        line
    }
}

fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    MissingReadings,
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingReadings => write!(f, "document has no '{}' object", READINGS_KEY),
        }
    }
}

impl error::Error for MappingError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadingError {
    Missing,
    NotNumeric,
    NotFinite,
}

impl fmt::Display for ReadingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "missing value"),
            Self::NotNumeric => write!(f, "not a number"),
            Self::NotFinite => write!(f, "not a finite number"),
        }
    }
}

impl error::Error for ReadingError {}

/// Interpret a single reading as a float.
///
/// JSON numbers and strings containing a number are accepted. Infinities and
/// NaN are rejected since they can't be written as field values.
pub fn parse_reading(value: &Value) -> Result<f64, ReadingError> {
    let v = match value {
        Value::Null => return Err(ReadingError::Missing),
        Value::Number(n) => n.as_f64().ok_or(ReadingError::NotNumeric)?,
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| ReadingError::NotNumeric)?,
        _ => return Err(ReadingError::NotNumeric),
    };

    if v.is_finite() {
        Ok(v)
    } else {
        Err(ReadingError::NotFinite)
    }
}

/// Decode every reading of the `currently` object, known readings first.
pub fn decode_readings(document: &Value) -> Result<Vec<(&str, Result<f64, ReadingError>)>, MappingError> {
    let readings = readings(document)?;
    let mut out = Vec::with_capacity(readings.len());

    for name in KNOWN_READINGS {
        if let Some(v) = readings.get(*name) {
            out.push((*name, parse_reading(v)));
        }
    }

    for (name, v) in readings.iter().filter(|(k, _)| !KNOWN_READINGS.contains(&k.as_str())) {
        tracing::trace!(message = "passing through unrecognized reading", reading = %name);
        out.push((name.as_str(), parse_reading(v)));
    }

    Ok(out)
}

fn readings(document: &Value) -> Result<&Map<String, Value>, MappingError> {
    document
        .get(READINGS_KEY)
        .and_then(Value::as_object)
        .ok_or(MappingError::MissingReadings)
}

/// Convert the numeric readings of a forecast document into points with the given tags.
pub fn map_to_points(document: &Value, tags: &Tags) -> Result<Vec<Point>, MappingError> {
    let points = decode_readings(document)?
        .into_iter()
        .filter_map(|(name, res)| match res {
            Ok(v) => Some(Point::reading(name, tags, v)),
            Err(e) => {
                tracing::trace!(message = "skipping reading", reading = %name, reason = %e);
                None
            }
        })
        .collect();

    Ok(points)
}
