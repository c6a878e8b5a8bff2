//! Driver for the HTU31D temperature/humidity sensor.
//!
//! The device runs a command/response protocol: a conversion is triggered,
//! the device needs a fixed settle time, and the result frame carries a CRC
//! per 16-bit half. The CRC is the device's own shifting-polynomial variant,
//! not a table CRC-8.

use embedded_hal_async::{delay::DelayNs, i2c::I2c};

use crate::sampler::Sensor;
use crate::Error;

const SENSOR_ADDR: u8 = 0x40;

/// Pause between the conversion trigger and the result read. Mandatory;
/// reading earlier returns stale data.
pub const CONVERSION_PAUSE_MS: u32 = 25;

#[derive(Clone, Copy)]
enum Command {
    SoftReset,
    HeaterOff,
    ReadSerial,
    Conversion,
    ReadTempHumid,
}

impl From<Command> for u8 {
    fn from(value: Command) -> Self {
        match value {
            Command::SoftReset => 0x1e,
            Command::HeaterOff => 0x02,
            Command::ReadSerial => 0x0a,
            Command::Conversion => 0x5e,
            Command::ReadTempHumid => 0x00,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Measurement {
    /// Air temperature [°C]
    pub temperature: f32,
    /// Relative humidity [%RH]
    pub humidity: f32,
}

pub struct Htu31d<T, D>
where
    T: I2c,
    D: DelayNs,
{
    bus: T,
    delay: D,
}

impl<T, D> Htu31d<T, D>
where
    T: I2c,
    D: DelayNs,
{
    pub fn new(bus: T, delay: D) -> Self {
        Self { bus, delay }
    }

    pub async fn soft_reset(&mut self) -> Result<(), Error<T::Error>> {
        self.command(Command::SoftReset).await
    }

    pub async fn heater_off(&mut self) -> Result<(), Error<T::Error>> {
        self.command(Command::HeaterOff).await
    }

    pub async fn read_serial(&mut self) -> Result<u32, Error<T::Error>> {
        let mut buffer = [0u8; 6];
        self.bus
            .write_read(SENSOR_ADDR, &[Command::ReadSerial.into()], &mut buffer)
            .await?;

        Ok(u32::from_be_bytes(buffer[..4].try_into().unwrap()))
    }

    pub async fn trigger_conversion(&mut self) -> Result<(), Error<T::Error>> {
        self.command(Command::Conversion).await
    }

    pub async fn read_measurement(&mut self) -> Result<Measurement, Error<T::Error>> {
        let mut buffer = [0u8; 6];
        self.bus
            .write_read(SENSOR_ADDR, &[Command::ReadTempHumid.into()], &mut buffer)
            .await?;

        Ok(raw_data_processing::parse_measurement(&buffer)?)
    }

    /// Runs one conversion cycle: trigger, settle, read.
    pub async fn measure(&mut self) -> Result<Measurement, Error<T::Error>> {
        self.trigger_conversion().await?;
        self.delay.delay_ms(CONVERSION_PAUSE_MS).await;
        self.read_measurement().await
    }

    async fn command(&mut self, command: Command) -> Result<(), Error<T::Error>> {
        self.bus.write(SENSOR_ADDR, &[command.into()]).await?;
        Ok(())
    }
}

impl<T, D> Sensor for Htu31d<T, D>
where
    T: I2c,
    D: DelayNs,
{
    type Reading = Measurement;
    type Error = Error<T::Error>;

    const SETTLE_MS: u32 = CONVERSION_PAUSE_MS;

    async fn configure(&mut self) -> Result<(), Self::Error> {
        self.soft_reset().await?;
        self.delay.delay_ms(500).await;
        self.heater_off().await?;
        self.delay.delay_ms(1000).await;

        let _serial = self.read_serial().await?;
        #[cfg(feature = "defmt")]
        defmt::info!("HTU31D serial: {=u32:x}", _serial);

        Ok(())
    }

    async fn sample(&mut self) -> Result<Self::Reading, Self::Error> {
        self.measure().await
    }
}

mod raw_data_processing {
    use super::Measurement;
    use crate::IntegrityError;

    pub(super) fn parse_measurement(data: &[u8; 6]) -> Result<Measurement, IntegrityError> {
        let raw_temperature = u16::from_be_bytes(data[..2].try_into().unwrap());
        let raw_humidity = u16::from_be_bytes(data[3..5].try_into().unwrap());

        // Each half carries its own CRC; a bad half spoils the whole frame.
        if crc(raw_temperature) != data[2] || crc(raw_humidity) != data[5] {
            return Err(IntegrityError::Crc);
        }

        Ok(Measurement {
            temperature: -40.0 + 165.0 * raw_temperature as f32 / 65535.0,
            humidity: 100.0 * raw_humidity as f32 / 65535.0,
        })
    }

    /// The device's checksum over one 16-bit result.
    ///
    /// The value is shifted into a 24-bit working register and long-divided
    /// by the polynomial `0x988000`, probing from bit 23 down to bit 8 while
    /// the probe, field mask and polynomial shift right in lockstep. The low
    /// byte left over is the checksum.
    pub(super) fn crc(value: u16) -> u8 {
        let mut polynom: u32 = 0x98_8000;
        let mut msb: u32 = 0x80_0000;
        let mut mask: u32 = 0xff_8000;
        let mut result: u32 = (value as u32) << 8;

        while msb != 0x80 {
            if result & msb != 0 {
                result = ((result ^ polynom) & mask) | (result & !mask);
            }

            msb >>= 1;
            mask >>= 1;
            polynom >>= 1;
        }

        result as u8
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        // Plain bit-at-a-time CRC-8 with generator 0x31 and zero init, the
        // textbook form of the same division.
        fn crc8_reference(data: [u8; 2]) -> u8 {
            let mut crc: u8 = 0x00;
            for byte in data {
                crc ^= byte;
                for _ in 0..8 {
                    if crc & 0x80 == 0 {
                        crc <<= 1;
                    } else {
                        crc = (crc << 1) ^ 0x31;
                    }
                }
            }
            crc
        }

        #[test]
        fn matches_reference_division() {
            assert_eq!(crc(0x0000), 0x00);
            for value in (0u32..=0xffff).step_by(119) {
                let value = value as u16;
                assert_eq!(crc(value), crc8_reference(value.to_be_bytes()));
            }
            assert_eq!(crc(0xffff), crc8_reference([0xff, 0xff]));
        }

        #[test]
        fn measurement_parsing() {
            let raw_temperature: u16 = 0x6666;
            let raw_humidity: u16 = 0x8000;

            let mut data = [0u8; 6];
            data[..2].copy_from_slice(&raw_temperature.to_be_bytes());
            data[2] = crc(raw_temperature);
            data[3..5].copy_from_slice(&raw_humidity.to_be_bytes());
            data[5] = crc(raw_humidity);

            let measurement = parse_measurement(&data).unwrap();
            assert!((measurement.temperature - 26.0).abs() < 1e-3);
            assert!((measurement.humidity - 50.0008).abs() < 1e-3);
        }

        #[test]
        fn corrupted_half_fails_the_frame() {
            let raw_temperature: u16 = 0x6666;
            let raw_humidity: u16 = 0x8000;

            let mut data = [0u8; 6];
            data[..2].copy_from_slice(&raw_temperature.to_be_bytes());
            data[2] = crc(raw_temperature);
            data[3..5].copy_from_slice(&raw_humidity.to_be_bytes());
            data[5] = crc(raw_humidity) ^ 0x01;

            assert!(parse_measurement(&data).is_err());
        }
    }
}
