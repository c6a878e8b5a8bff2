//! Driver for the PMSA003I particulate matter sensor.
//!
//! The device free-runs and answers a plain read with a fixed 32-byte frame:
//! a two-byte start marker, big-endian 16-bit concentration and count
//! fields, version and error bytes, and a trailing additive checksum.

use embedded_hal_async::i2c::I2c;

use crate::sampler::Sensor;
use crate::Error;

const SENSOR_ADDR: u8 = 0x12;
const FRAME_LEN: usize = 32;
const FRAME_MARKER: [u8; 2] = [0x42, 0x4d];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reading {
    /// Payload length reported by the device
    pub frame_length: u16,
    /// PM1.0 concentration, standard particle [µg/m³]
    pub pm1_0_std: u16,
    /// PM2.5 concentration, standard particle [µg/m³]
    pub pm2_5_std: u16,
    /// PM10 concentration, standard particle [µg/m³]
    pub pm10_std: u16,
    /// PM1.0 concentration, atmospheric environment [µg/m³]
    pub pm1_0_env: u16,
    /// PM2.5 concentration, atmospheric environment [µg/m³]
    pub pm2_5_env: u16,
    /// PM10 concentration, atmospheric environment [µg/m³]
    pub pm10_env: u16,
    /// Particles with diameter ≥ 0.3 µm in 0.1 l of air
    pub particles_0_3um: u16,
    /// Particles with diameter ≥ 0.5 µm in 0.1 l of air
    pub particles_0_5um: u16,
    /// Particles with diameter ≥ 1.0 µm in 0.1 l of air
    pub particles_1_0um: u16,
    /// Particles with diameter ≥ 2.5 µm in 0.1 l of air
    pub particles_2_5um: u16,
    /// Particles with diameter ≥ 5.0 µm in 0.1 l of air
    pub particles_5_0um: u16,
    /// Particles with diameter ≥ 10 µm in 0.1 l of air
    pub particles_10um: u16,
    pub version: u8,
    pub error_code: u8,
}

pub struct Pmsa003i<T>
where
    T: I2c,
{
    bus: T,
}

impl<T> Pmsa003i<T>
where
    T: I2c,
{
    pub fn new(bus: T) -> Self {
        Self { bus }
    }

    pub async fn read(&mut self) -> Result<Reading, Error<T::Error>> {
        let mut buffer = [0u8; FRAME_LEN];
        self.bus.read(SENSOR_ADDR, &mut buffer).await?;

        Ok(raw_data_processing::parse_frame(&buffer)?)
    }
}

impl<T> Sensor for Pmsa003i<T>
where
    T: I2c,
{
    type Reading = Reading;
    type Error = Error<T::Error>;

    async fn configure(&mut self) -> Result<(), Self::Error> {
        // The device needs no bring-up; it measures continuously from
        // power-on.
        Ok(())
    }

    async fn sample(&mut self) -> Result<Self::Reading, Self::Error> {
        self.read().await
    }
}

mod raw_data_processing {
    use super::{Reading, FRAME_LEN, FRAME_MARKER};
    use crate::IntegrityError;

    pub(super) fn parse_frame(data: &[u8; FRAME_LEN]) -> Result<Reading, IntegrityError> {
        let reported = u16::from_be_bytes([data[30], data[31]]);
        if checksum(data) != reported {
            return Err(IntegrityError::Checksum);
        }

        let word = |index: usize| u16::from_be_bytes([data[index], data[index + 1]]);

        Ok(Reading {
            frame_length: word(2),
            pm1_0_std: word(4),
            pm2_5_std: word(6),
            pm10_std: word(8),
            pm1_0_env: word(10),
            pm2_5_env: word(12),
            pm10_env: word(14),
            particles_0_3um: word(16),
            particles_0_5um: word(18),
            particles_1_0um: word(20),
            particles_2_5um: word(22),
            particles_5_0um: word(24),
            particles_10um: word(26),
            version: data[28],
            error_code: data[29],
        })
    }

    /// Additive checksum: the two fixed marker bytes plus every byte from
    /// offset 2 through 29.
    fn checksum(data: &[u8; FRAME_LEN]) -> u16 {
        let mut sum = FRAME_MARKER[0] as u16 + FRAME_MARKER[1] as u16;
        for byte in &data[2..30] {
            sum = sum.wrapping_add(*byte as u16);
        }
        sum
    }

    #[cfg(test)]
    pub(super) const FRAME: [u8; FRAME_LEN] = [
        0x42, 0x4d, // frame start
        0x00, 0x1c, // payload length 28
        0x00, 0x05, 0x00, 0x08, 0x00, 0x0a, // standard PM1.0 / PM2.5 / PM10
        0x00, 0x04, 0x00, 0x07, 0x00, 0x09, // environmental PM1.0 / PM2.5 / PM10
        0x03, 0x84, 0x01, 0x2c, 0x00, 0x64, // counts ≥ 0.3 / 0.5 / 1.0 µm
        0x00, 0x1e, 0x00, 0x0a, 0x00, 0x05, // counts ≥ 2.5 / 5.0 / 10 µm
        0x97, 0x00, // version, error code
        0x02, 0xb2, // checksum
    ];

}

#[cfg(test)]
mod tests {
    use embassy_futures::block_on;
    use embedded_hal_mock::eh1::i2c::{Mock, Transaction};

    use super::raw_data_processing::FRAME;
    use super::*;

    #[test]
    fn read_issues_a_single_frame_transaction() {
        let expectations = [Transaction::read(0x12, FRAME.to_vec())];
        let mut bus = Mock::new(&expectations);

        let mut sensor = Pmsa003i::new(bus.clone());
        let reading = block_on(sensor.read()).unwrap();
        assert_eq!(reading.pm2_5_std, 8);
        assert_eq!(reading.particles_0_3um, 900);

        bus.done();
    }

    #[test]
    fn checksum_mismatch_is_an_integrity_error() {
        let mut frame = FRAME;
        frame[9] ^= 0x40;

        let expectations = [Transaction::read(0x12, frame.to_vec())];
        let mut bus = Mock::new(&expectations);

        let mut sensor = Pmsa003i::new(bus.clone());
        assert!(matches!(
            block_on(sensor.read()),
            Err(Error::Integrity(crate::IntegrityError::Checksum))
        ));

        bus.done();
    }
}
