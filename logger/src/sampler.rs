//! The sampling loop.
//!
//! Each tick samples both sensors, forward-fills the climate values when the
//! DHT-style sensor faults, appends the reading to the local log and hands it
//! to the publisher. No step can end the loop; only the stop signal does.

use crate::metrics::{LOG_FAILURES_TOTAL, READINGS_TOTAL};
use crate::model::{self, Reading};
use crate::publisher::{PublishOutcome, Publisher};
use crate::reconcile::{Reconciled, ReconciliationState};
use crate::sensors::{ContinuousSensor, IntermittentSensor};
use crate::storage::ReadingLog;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Interval between the starts of two ticks
    pub cadence: Duration,
    /// Pause before re-polling a climate sensor that had no data
    pub retry_delay: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    Emitted {
        reading: Reading,
        publish: PublishOutcome,
    },
    Stopped,
}

pub struct Sampler<G, C, L, P> {
    gas: G,
    climate: C,
    log: L,
    publisher: P,
    state: ReconciliationState,
    timing: Timing,
    latest: Option<watch::Sender<Option<Reading>>>,
}

impl<G, C, L, P> Sampler<G, C, L, P>
where
    G: ContinuousSensor,
    C: IntermittentSensor,
    L: ReadingLog,
    P: Publisher,
{
    pub fn new(
        gas: G,
        climate: C,
        log: L,
        publisher: P,
        state: ReconciliationState,
        timing: Timing,
    ) -> Self {
        Self {
            gas,
            climate,
            log,
            publisher,
            state,
            timing,
            latest: None,
        }
    }

    /// Mirrors every emitted reading into `tx`.
    pub fn with_latest(mut self, tx: watch::Sender<Option<Reading>>) -> Self {
        self.latest = Some(tx);
        self
    }

    pub fn state(&self) -> ReconciliationState {
        self.state
    }

    /// Runs until `stop` flips to true, then disconnects the publisher and
    /// hands back the reconciliation state.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> ReconciliationState {
        info!(
            "Sampling every {:?} (no-data retry after {:?})",
            self.timing.cadence, self.timing.retry_delay
        );

        loop {
            if *stop.borrow() {
                break;
            }

            let tick_start = Instant::now();
            if self.tick(&mut stop).await == Tick::Stopped {
                break;
            }

            let remaining = self.timing.cadence.saturating_sub(tick_start.elapsed());
            if !sleep_unless_stopped(remaining, &mut stop).await {
                break;
            }
        }

        info!("Stop requested, shutting down sampler");
        self.publisher.disconnect().await;
        self.state
    }

    /// One full sampling cycle. Returns [`Tick::Stopped`] only if the stop
    /// signal arrives while waiting for the climate sensor.
    pub async fn tick(&mut self, stop: &mut watch::Receiver<bool>) -> Tick {
        let (timestamp, gas_level) = loop {
            let timestamp = model::now();
            let gas_level = self.gas.sample();

            match self.state.apply(self.climate.sample()) {
                Reconciled::Fresh | Reconciled::ForwardFilled => break (timestamp, gas_level),
                Reconciled::Retry => {
                    warn!(
                        "Climate sensor returned no data, retrying in {:?}",
                        self.timing.retry_delay
                    );
                    if !sleep_unless_stopped(self.timing.retry_delay, stop).await {
                        return Tick::Stopped;
                    }
                }
            }
        };

        let reading = Reading::new(
            timestamp,
            self.state.temperature,
            self.state.humidity,
            gas_level,
        );
        READINGS_TOTAL.inc();

        if let Err(e) = self.log.append(&reading).await {
            LOG_FAILURES_TOTAL.inc();
            error!("Failed to append reading to local log: {}", e);
        }

        let publish = self.publisher.publish(&reading).await;
        match publish {
            PublishOutcome::Delivered => info!(
                "Sent: T:{}C | H:{}% | GAS:{:.3}",
                reading.temperature, reading.humidity, reading.gas_level
            ),
            PublishOutcome::Failed => info!(
                "Local only: T:{}C | H:{}% | GAS:{:.3}",
                reading.temperature, reading.humidity, reading.gas_level
            ),
        }

        if let Some(tx) = &self.latest {
            tx.send_replace(Some(reading.clone()));
        }

        Tick::Emitted { reading, publish }
    }
}

/// Sleeps for `duration` unless the stop signal fires first.
///
/// Returns false when the caller should stop. A dropped sender counts as a
/// stop request.
async fn sleep_unless_stopped(duration: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    if *stop.borrow() {
        return false;
    }

    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow_and_update() {
                    debug!("Stop signal interrupted sleep");
                    return false;
                }
            }
        }
    }
}
