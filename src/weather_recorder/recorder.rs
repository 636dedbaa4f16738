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

use crate::client::{ClientError, ForecastClient, ForecastRequest};
use crate::influxdb::InfluxClient;
use crate::points::{map_to_points, Tags};
use crate::retry::RetryPolicy;
use crate::shutdown::{Shutdown, DEFAULT_STEP};
use reqwest::StatusCode;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    ShuttingDown,
}

/// What happened during a single fetch, map, and write cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Written(usize),
    Rejected(StatusCode),
    FetchFailed,
    Unmapped,
    StoreFailed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub request: ForecastRequest,
    pub database: String,
    pub tags: Tags,
    pub period: Duration,
}

/// Periodically fetch current weather and write it to InfluxDB until shutdown.
#[derive(Debug)]
pub struct Recorder<P> {
    settings: RecorderSettings,
    forecasts: ForecastClient,
    store: InfluxClient,
    policy: P,
}

impl<P: RetryPolicy> Recorder<P> {
    pub fn new(settings: RecorderSettings, forecasts: ForecastClient, store: InfluxClient, policy: P) -> Self {
        Recorder {
            settings,
            forecasts,
            store,
            policy,
        }
    }

    /// Run cycles until `shutdown` is triggered, returning the number of cycles run.
    ///
    /// Shutdown is observed between cycles and during waits only. A request or
    /// write that is in progress is allowed to complete.
    pub async fn run(&self, shutdown: &Shutdown) -> u64 {
        let mut state = LoopState::Running;
        let mut cycles = 0;

        tracing::info!(
            message = "recording started",
            database = %self.settings.database,
            period_secs = self.settings.period.as_secs(),
        );

        while state == LoopState::Running {
            let outcome = self.run_cycle(shutdown).await;
            cycles += 1;
            tracing::debug!(message = "cycle complete", outcome = ?outcome, cycle = cycles);

            tracing::info!(message = "sleeping until next cycle", period_secs = self.settings.period.as_secs());
            shutdown.sleep(self.settings.period, DEFAULT_STEP).await;

            if shutdown.is_triggered() {
                state = LoopState::ShuttingDown;
            }
        }

        tracing::info!(message = "recording stopped", cycles = cycles);
        cycles
    }

    /// Fetch current conditions once and write them as points.
    pub async fn run_cycle(&self, shutdown: &Shutdown) -> CycleOutcome {
        let fetched = match self.forecasts.fetch(&self.settings.request, &self.policy, shutdown).await {
            Ok(f) => f,
            Err(ClientError::Cancelled) => {
                tracing::info!("forecast request cancelled by shutdown");
                return CycleOutcome::Cancelled;
            }
            Err(e) => {
                tracing::error!(message = "failed to fetch forecast", error = %e);
                return CycleOutcome::FetchFailed;
            }
        };

        if !fetched.is_ok() {
            match fetched.api_error() {
                Some(api) => tracing::warn!(
                    message = "forecast request failed, retrying next cycle",
                    status = %fetched.status,
                    code = api.code,
                    error = %api.error,
                ),
                None => tracing::warn!(
                    message = "forecast request failed, retrying next cycle",
                    status = %fetched.status,
                    document = %fetched.document,
                ),
            }

            return CycleOutcome::Rejected(fetched.status);
        }

        let points = match map_to_points(&fetched.document, &self.settings.tags) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(message = "measurement failed", error = %e, document = %fetched.document);
                return CycleOutcome::Unmapped;
            }
        };

        if let Err(e) = self.store.ensure_database(&self.settings.database).await {
            tracing::error!(message = "unable to ensure database exists", database = %self.settings.database, error = %e);
            return CycleOutcome::StoreFailed;
        }

        for p in points.iter() {
            tracing::debug!(message = "sending point", point = %p.to_line_protocol());
        }

        match self.store.write_points(&self.settings.database, &points).await {
            Ok(_) => {
                tracing::info!(message = "measurement complete", num_points = points.len());
                CycleOutcome::Written(points.len())
            }
            Err(e) => {
                tracing::error!(message = "failed to write points", database = %self.settings.database, error = %e);
                CycleOutcome::StoreFailed
            }
        }
    }
}
