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

use std::io;
use std::time::Duration;
use tokio::signal::unix::{self, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// How often an interruptible sleep rechecks the shutdown flag by default.
pub const DEFAULT_STEP: Duration = Duration::from_secs(1);

/// Cancellation token shared by everything that sleeps or retries.
///
/// The flag starts out `false` and only ever moves to `true`, once, when the
/// matching `ShutdownTrigger` fires. Clones observe the same flag.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Sending half of a `Shutdown` token, held by whatever handles signals.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> (Shutdown, ShutdownTrigger) {
        let (tx, rx) = watch::channel(false);
        (Shutdown { rx }, ShutdownTrigger { tx })
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown has been triggered. Never resolves if the trigger
    /// is dropped without firing.
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }

            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Wait for up to `total`, returning early once shutdown is triggered.
    ///
    /// The wait proceeds in increments of `step` and the flag is rechecked
    /// between increments, so a shutdown is observed within one `step` at
    /// worst. A zero `step` waits for `total` in one increment.
    pub async fn sleep(&self, total: Duration, step: Duration) {
        // A total too large to add to the current time has no deadline and
        // only ends on shutdown.
        let deadline = Instant::now().checked_add(total);
        let step = if step.is_zero() { total } else { step };

        loop {
            if self.is_triggered() {
                return;
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return;
                    }
                    step.min(deadline - now)
                }
                None => step,
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.triggered() => return,
            }
        }
    }
}

impl ShutdownTrigger {
    /// Set the shutdown flag, returning `true` if this call is the one that set it.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        })
    }
}

/// Trigger shutdown on the first SIGTERM or SIGINT received by this process.
///
/// Both signal streams are registered before this returns, so a signal that
/// arrives any time afterwards is handled instead of killing the process.
pub fn trigger_on_signals(trigger: ShutdownTrigger) -> io::Result<JoinHandle<()>> {
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    let mut sigint = unix::signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }

        tracing::info!("exiting gracefully");
        trigger.trigger();
    }))
}
