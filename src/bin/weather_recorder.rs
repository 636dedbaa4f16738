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

use clap::Parser;
use reqwest::Client;
use std::error::Error;
use std::process;
use weather_recorder::client::ForecastClient;
use weather_recorder::config::RecorderOptions;
use weather_recorder::influxdb::InfluxClient;
use weather_recorder::recorder::{Recorder, RecorderSettings};
use weather_recorder::shutdown::{trigger_on_signals, Shutdown};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = RecorderOptions::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let (shutdown, trigger) = Shutdown::new();
    trigger_on_signals(trigger).unwrap_or_else(|e| {
        tracing::error!(message = "unable to install signal handlers", error = %e);
        process::exit(1)
    });

    let tags = opts.tags().unwrap_or_else(|e| {
        tracing::error!(message = "invalid tags", tags = %opts.tags, error = %e);
        process::exit(1)
    });

    let http_client = Client::builder().timeout(opts.timeout()).build().unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    let forecasts = ForecastClient::new(http_client.clone(), &opts.api_url).unwrap_or_else(|e| {
        tracing::error!(message = "invalid forecast API URL", error = %e);
        process::exit(1)
    });

    tracing::info!(
        message = "connecting to InfluxDB",
        address = %opts.influxdb_address,
        port = opts.influxdb_port,
    );
    let store = InfluxClient::new(
        http_client,
        &opts.influxdb_address,
        opts.influxdb_port,
        opts.influxdb_user.clone(),
        opts.influxdb_password.clone(),
    )
    .unwrap_or_else(|e| {
        tracing::error!(message = "invalid InfluxDB address", error = %e);
        process::exit(1)
    });

    let settings = RecorderSettings {
        request: opts.forecast_request(),
        database: opts.influxdb_name.clone(),
        tags,
        period: opts.period(),
    };

    let recorder = Recorder::new(settings, forecasts, store, opts.retry_policy());
    recorder.run(&shutdown).await;

    tracing::info!("shutdown complete");
    Ok(())
}
