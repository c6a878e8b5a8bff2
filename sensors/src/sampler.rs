//! The per-sensor sampling loop.
//!
//! Each sensor gets one long-running task built from [`run`]: configure the
//! device, then sample at a fixed cadence and hand every good reading to the
//! module's output queue. Failed cycles are logged and skipped; the next
//! attempt happens at the normal interval, with no backoff and no retry
//! inside the cycle.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Sender;
use embassy_sync::signal::Signal;
use embedded_hal_async::delay::DelayNs;

/// What the sampling loop needs from a device: bring-up and one-shot
/// sampling. The three station drivers implement this so tasks can be wired
/// uniformly and the device picked at startup.
#[allow(async_fn_in_trait)]
pub trait Sensor {
    type Reading;
    type Error;

    /// Settle time spent inside a single [`sample`](Self::sample) call.
    /// Subtracted from the cycle-end sleep so the trigger-to-trigger period
    /// equals the configured interval.
    const SETTLE_MS: u32 = 0;

    /// One-time bring-up after power-on or reset.
    async fn configure(&mut self) -> Result<(), Self::Error>;

    /// One complete measurement cycle.
    async fn sample(&mut self) -> Result<Self::Reading, Self::Error>;
}

#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Trigger-to-trigger sampling period [ms], uniform across sensors.
    pub interval_ms: u32,
}

impl Config {
    pub const fn seconds(interval: u32) -> Self {
        Self {
            interval_ms: interval * 1000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::seconds(10)
    }
}

/// Drives one sensor forever, pushing readings into its queue.
///
/// The queue handoff blocks until the consumer accepts, so a stalled
/// consumer stalls the producer; the collector loop polls continuously to
/// keep that from happening. The shutdown signal is checked between the bus,
/// settle and sleep phases so a stop request never interrupts a transaction
/// halfway.
pub async fn run<S, D, M, const N: usize>(
    mut sensor: S,
    mut delay: D,
    config: Config,
    readings: Sender<'_, M, S::Reading, N>,
    shutdown: &Signal<M, ()>,
    label: &str,
) where
    S: Sensor,
    D: DelayNs,
    M: RawMutex,
{
    #[cfg(not(feature = "defmt"))]
    let _ = label;

    loop {
        match sensor.configure().await {
            Ok(()) => break,
            Err(_) => {
                #[cfg(feature = "defmt")]
                defmt::error!("{=str}: configuration failed, retrying", label);
                delay.delay_ms(config.interval_ms).await;
            }
        }
        if shutdown.signaled() {
            return;
        }
    }

    let idle_ms = config.interval_ms.saturating_sub(S::SETTLE_MS);

    loop {
        if shutdown.signaled() {
            return;
        }

        match sensor.sample().await {
            Ok(reading) => readings.send(reading).await,
            Err(_) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("{=str}: sample failed, cycle dropped", label);
            }
        }

        if shutdown.signaled() {
            return;
        }
        delay.delay_ms(idle_ms).await;
    }
}
