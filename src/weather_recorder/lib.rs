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

//! Record current weather observations into InfluxDB
//!
//! ## Features
//!
//! `weather_recorder` periodically fetches current conditions for a single location from the
//! [Dark Sky] forecast API and writes every numeric reading to an [InfluxDB] 1.x database. Each
//! reading becomes a point named after the reading (`temperature`, `humidity`, `pressure`, etc.)
//! with a single `value` field and a set of tags. The `location` tag is always set, any others
//! are configurable.
//!
//! Failed connections to the forecast API are retried, the database is created if it doesn't
//! exist, and `SIGINT` or `SIGTERM` stop the recorder within a second even when it's waiting for
//! the next period.
//!
//! [Dark Sky]: https://darksky.net/dev/docs
//! [InfluxDB]: https://docs.influxdata.com/influxdb/v1/
//!
//! ## Build
//!
//! `weather_recorder` is a Rust program and must be built from source using a
//! [Rust toolchain](https://rustup.rs/).
//!
//! ```text
//! git clone git@github.com:56quarters/weather_recorder.git && cd weather_recorder
//! cargo build --release
//! ```
//!
//! ## Usage
//!
//! All options can be set with command line flags or environment variables. The API key,
//! latitude, longitude, and location name are required.
//!
//! ```text
//! API_KEY=0123abcd LATITUDE=42.3601 LONGITUDE=-71.0589 LOCATION=boston \
//!     INFLUXDB_ADDRESS=localhost TAGS="{'sensor': 'darksky'}" \
//!     ./weather_recorder
//! ```
//!
//! * `INFLUXDB_ADDRESS` - InfluxDB host, default `influxdb`.
//! * `INFLUXDB_PORT` - InfluxDB HTTP port, default `8086`.
//! * `INFLUXDB_NAME` - Database to write to, default `weather`.
//! * `PERIOD` - Seconds between observations, default `120`.
//! * `UNITS` - Unit system for readings, default `us`.
//! * `TAGS` - JSON object of extra tags, default `{}`. Single quotes may be used instead of
//!   double quotes.
//!
//! Run `weather_recorder --help` for the remaining options.
//!

pub mod client;
pub mod config;
pub mod influxdb;
pub mod points;
pub mod recorder;
pub mod retry;
pub mod shutdown;
