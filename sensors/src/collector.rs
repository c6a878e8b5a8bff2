//! Fan-in of the per-sensor queues.
//!
//! Sampling tasks are producers; a single collector consumes all three
//! queues and forwards each reading to the downstream sink (state for the
//! reporting link, a metrics push, a display). Readings from different
//! sensors have no ordering guarantee relative to each other.

use embassy_futures::select::{select3, Either3};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Receiver;

use crate::{dps310, htu31d, pmsa003i};

/// One reading from any of the station's sensors.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reading {
    Climate(htu31d::Measurement),
    Pressure(dps310::Measurement),
    Particulate(pmsa003i::Reading),
}

/// Downstream consumer of completed readings. Injected into the collector so
/// the sink is an explicit handle, not process-wide state.
pub trait ReadingSink {
    fn record(&mut self, reading: Reading);
}

/// Waits for the next reading from any queue.
pub async fn next_reading<M, const A: usize, const B: usize, const C: usize>(
    climate: Receiver<'_, M, htu31d::Measurement, A>,
    pressure: Receiver<'_, M, dps310::Measurement, B>,
    particulate: Receiver<'_, M, pmsa003i::Reading, C>,
) -> Reading
where
    M: RawMutex,
{
    match select3(
        climate.receive(),
        pressure.receive(),
        particulate.receive(),
    )
    .await
    {
        Either3::First(measurement) => Reading::Climate(measurement),
        Either3::Second(measurement) => Reading::Pressure(measurement),
        Either3::Third(reading) => Reading::Particulate(reading),
    }
}

/// Drains the queues into the sink forever. The sink must keep up with the
/// sampling interval or producers stall on their queue handoff.
pub async fn run<M, S, const A: usize, const B: usize, const C: usize>(
    climate: Receiver<'_, M, htu31d::Measurement, A>,
    pressure: Receiver<'_, M, dps310::Measurement, B>,
    particulate: Receiver<'_, M, pmsa003i::Reading, C>,
    sink: &mut S,
) -> !
where
    M: RawMutex,
    S: ReadingSink,
{
    loop {
        let reading = next_reading(climate, pressure, particulate).await;
        sink.record(reading);
    }
}
