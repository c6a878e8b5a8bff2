//! Driver for the DPS310 barometric pressure/temperature sensor.
//!
//! The device is register-addressed with sub-byte configuration fields, a
//! factory calibration block of nine coefficients at mixed bit widths, and a
//! set of readiness flags that gate every phase of bring-up. Raw counts are
//! 24-bit two's-complement and only become physical quantities through the
//! compensation polynomials over the decoded coefficients.

use embedded_hal_async::{delay::DelayNs, i2c::I2c};

use crate::bits::sign_extend;
use crate::sampler::Sensor;
use crate::Error;

const SENSOR_ADDR: u8 = 0x77;

const REG_PRS_B2: u8 = 0x00;
const REG_TMP_B2: u8 = 0x03;
const REG_PRS_CFG: u8 = 0x06;
const REG_TMP_CFG: u8 = 0x07;
const REG_MEAS_CFG: u8 = 0x08;
const REG_CFG: u8 = 0x09;
const REG_RESET: u8 = 0x0c;
const REG_COEF: u8 = 0x10;
const REG_TMP_COEF_SRCE: u8 = 0x28;

// MEAS_CFG status bits
const COEF_RDY: u8 = 7;
const SENSOR_RDY: u8 = 6;
const TMP_RDY: u8 = 5;
const PRS_RDY: u8 = 4;

const RESET_MAGIC: u8 = 0x89;
const COEF_LEN: usize = 18;

/// Continuous pressure and temperature measurement.
const MODE_CONTINUOUS: u8 = 0b111;

/// Background measurement rate code, 4 measurements per second.
const MEASURE_RATE: u8 = 0b010;

/// Readiness flags are re-checked at this granularity.
const POLL_INTERVAL_MS: u32 = 1;

/// Poll attempts before a flag that never asserts is reported as
/// [`Error::NotResponding`] instead of blocking the task forever.
const POLL_BUDGET: u32 = 250;

/// Raw readout scale factors from the datasheet, indexed by the 3-bit
/// oversampling code.
const OVERSAMPLE_SCALE: [u32; 8] = [
    524288, 1572864, 3670016, 7864320, 253952, 516096, 1040384, 2088960,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Oversample {
    X1 = 0,
    X2,
    X4,
    X8,
    X16,
    X32,
    X64,
    X128,
}

impl Oversample {
    pub fn scale_factor(self) -> u32 {
        OVERSAMPLE_SCALE[self as usize]
    }

    /// Above 8x the readout no longer fits the result registers and the
    /// matching shift bit in CFG must be set.
    fn shift_required(self) -> bool {
        (self as u8) > Oversample::X8 as u8
    }
}

/// The nine factory compensation coefficients, unpacked and sign-extended
/// from the 18-byte calibration block. Decoded once per reset; stale sets
/// must not survive a re-initialization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationSet {
    pub c0: i32,
    pub c1: i32,
    pub c00: i32,
    pub c10: i32,
    pub c01: i32,
    pub c11: i32,
    pub c20: i32,
    pub c21: i32,
    pub c30: i32,
}

impl CalibrationSet {
    /// Unpacks the coefficient block. Fields are concatenated MSB-first and
    /// straddle nibble boundaries: `c0`/`c1` are 12-bit, `c00`/`c10` 20-bit,
    /// the rest 16-bit, all two's-complement.
    pub fn decode(raw: &[u8; COEF_LEN]) -> Self {
        let c0 = sign_extend(((raw[0] as u32) << 4) | ((raw[1] as u32) >> 4), 12);
        let c1 = sign_extend((((raw[1] as u32) & 0x0f) << 8) | raw[2] as u32, 12);
        let c00 = sign_extend(
            ((raw[3] as u32) << 12) | ((raw[4] as u32) << 4) | ((raw[5] as u32) >> 4),
            20,
        );
        let c10 = sign_extend(
            (((raw[5] as u32) & 0x0f) << 16) | ((raw[6] as u32) << 8) | raw[7] as u32,
            20,
        );
        let c01 = sign_extend(((raw[8] as u32) << 8) | raw[9] as u32, 16);
        let c11 = sign_extend(((raw[10] as u32) << 8) | raw[11] as u32, 16);
        let c20 = sign_extend(((raw[12] as u32) << 8) | raw[13] as u32, 16);
        let c21 = sign_extend(((raw[14] as u32) << 8) | raw[15] as u32, 16);
        let c30 = sign_extend(((raw[16] as u32) << 8) | raw[17] as u32, 16);

        Self {
            c0,
            c1,
            c00,
            c10,
            c01,
            c11,
            c20,
            c21,
            c30,
        }
    }

    /// Compensated temperature [°C] from a scaled raw count in [-1, 1].
    ///
    /// Coefficients reach 20 bits, so the arithmetic stays in double
    /// precision end to end.
    pub fn temperature(&self, traw_scaled: f64) -> f64 {
        traw_scaled * self.c1 as f64 + self.c0 as f64 / 2.0
    }

    /// Compensated pressure [hPa] from scaled raw counts in [-1, 1].
    pub fn pressure(&self, praw_scaled: f64, traw_scaled: f64) -> f64 {
        let pascal = self.c00 as f64
            + praw_scaled
                * (self.c10 as f64
                    + praw_scaled * (self.c20 as f64 + praw_scaled * self.c30 as f64))
            + traw_scaled
                * (self.c01 as f64
                    + praw_scaled * (self.c11 as f64 + praw_scaled * self.c21 as f64));
        pascal / 100.0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Measurement {
    /// Barometric pressure [hPa]
    pub pressure: f32,
    /// Die temperature [°C]
    pub temperature: f32,
}

fn field_mask(length: u8) -> u8 {
    ((1u16 << length) - 1) as u8
}

/// Replaces `length` bits at `offset` in `current` with `value`, leaving
/// every bit outside the range untouched.
fn splice_bits(current: u8, offset: u8, length: u8, value: u8) -> u8 {
    let mask = field_mask(length) << offset;
    (current & !mask) | ((value << offset) & mask)
}

pub struct Dps310<T, D>
where
    T: I2c,
    D: DelayNs,
{
    bus: T,
    delay: D,
    oversample: Oversample,
    calibration: Option<CalibrationSet>,
}

impl<T, D> Dps310<T, D>
where
    T: I2c,
    D: DelayNs,
{
    pub fn new(bus: T, delay: D) -> Self {
        Self {
            bus,
            delay,
            oversample: Oversample::X8,
            calibration: None,
        }
    }

    /// The coefficient set decoded by the last [`init`](Self::init).
    pub fn calibration(&self) -> Option<&CalibrationSet> {
        self.calibration.as_ref()
    }

    pub async fn reset(&mut self) -> Result<(), Error<T::Error>> {
        self.write_register(REG_RESET, RESET_MAGIC).await
    }

    /// Full bring-up: reset, readiness waits, the coefficient-source
    /// workaround, calibration decode, measurement configuration and the
    /// switch to continuous mode. Must run once per power-on or reset before
    /// [`read`](Self::read); re-running re-decodes the calibration block.
    pub async fn init(&mut self) -> Result<(), Error<T::Error>> {
        self.calibration = None;

        self.reset().await?;
        self.wait_flag(REG_MEAS_CFG, SENSOR_RDY).await?;
        self.correct_temperature().await?;

        let calibration = self.read_calibration().await?;
        self.calibration = Some(calibration);

        self.configure_pressure(MEASURE_RATE, self.oversample).await?;
        self.configure_temperature(MEASURE_RATE, self.oversample).await?;
        self.write_bits(REG_MEAS_CFG, 0, 3, MODE_CONTINUOUS).await?;

        self.wait_flag(REG_MEAS_CFG, TMP_RDY).await?;
        self.wait_flag(REG_MEAS_CFG, PRS_RDY).await?;

        Ok(())
    }

    /// One compensated sample from the continuous measurement stream.
    pub async fn read(&mut self) -> Result<Measurement, Error<T::Error>> {
        let calibration = self.calibration.ok_or(Error::NotCalibrated)?;
        let scale = self.oversample.scale_factor() as f64;

        let traw_scaled = self.read_raw(REG_TMP_B2).await? as f64 / scale;
        let praw_scaled = self.read_raw(REG_PRS_B2).await? as f64 / scale;

        Ok(Measurement {
            pressure: calibration.pressure(praw_scaled, traw_scaled) as f32,
            temperature: calibration.temperature(traw_scaled) as f32,
        })
    }

    /// Vendor workaround for parts whose coefficients were calibrated against
    /// the internal temperature element. Runs once per reset, before the
    /// coefficient read; the write/clear order is fixed.
    async fn correct_temperature(&mut self) -> Result<(), Error<T::Error>> {
        self.write_register(0x0e, 0xa5).await?;
        self.write_register(0x0f, 0x96).await?;
        self.write_register(0x62, 0x02).await?;
        self.write_register(0x0e, 0x00).await?;
        self.write_register(0x0f, 0x00).await?;
        Ok(())
    }

    async fn read_calibration(&mut self) -> Result<CalibrationSet, Error<T::Error>> {
        self.wait_flag(REG_MEAS_CFG, COEF_RDY).await?;

        let mut raw = [0u8; COEF_LEN];
        for (i, byte) in raw.iter_mut().enumerate() {
            *byte = self.read_register(REG_COEF + i as u8).await?;
        }

        Ok(CalibrationSet::decode(&raw))
    }

    async fn configure_pressure(
        &mut self,
        rate: u8,
        oversample: Oversample,
    ) -> Result<(), Error<T::Error>> {
        self.write_bits(REG_PRS_CFG, 4, 3, rate).await?;
        self.write_bits(REG_PRS_CFG, 0, 4, oversample as u8).await?;
        self.write_bits(REG_CFG, 2, 1, oversample.shift_required() as u8)
            .await?;
        Ok(())
    }

    async fn configure_temperature(
        &mut self,
        rate: u8,
        oversample: Oversample,
    ) -> Result<(), Error<T::Error>> {
        // The measurement source must match the element the coefficients
        // were calibrated against.
        let source = self.read_bits(REG_TMP_COEF_SRCE, 7, 1).await?;
        self.write_bits(REG_TMP_CFG, 7, 1, source).await?;
        self.write_bits(REG_TMP_CFG, 4, 3, rate).await?;
        self.write_bits(REG_TMP_CFG, 0, 3, oversample as u8).await?;
        self.write_bits(REG_CFG, 3, 1, oversample.shift_required() as u8)
            .await?;
        Ok(())
    }

    /// A 24-bit two's-complement readout, MSB first.
    async fn read_raw(&mut self, base: u8) -> Result<i32, Error<T::Error>> {
        let mut buffer = [0u8; 3];
        self.bus
            .write_read(SENSOR_ADDR, &[base], &mut buffer)
            .await?;

        let raw = ((buffer[0] as u32) << 16) | ((buffer[1] as u32) << 8) | buffer[2] as u32;
        Ok(sign_extend(raw, 24))
    }

    /// Bounded readiness poll. The hardware offers no interrupt for these
    /// flags, so they are re-read every millisecond up to the budget.
    async fn wait_flag(&mut self, register: u8, bit: u8) -> Result<(), Error<T::Error>> {
        for _ in 0..POLL_BUDGET {
            if self.read_bits(register, bit, 1).await? == 1 {
                return Ok(());
            }
            self.delay.delay_ms(POLL_INTERVAL_MS).await;
        }

        Err(Error::NotResponding)
    }

    async fn read_bits(
        &mut self,
        register: u8,
        offset: u8,
        length: u8,
    ) -> Result<u8, Error<T::Error>> {
        let value = self.read_register(register).await?;
        Ok((value >> offset) & field_mask(length))
    }

    /// Read-modify-write of a sub-byte field.
    async fn write_bits(
        &mut self,
        register: u8,
        offset: u8,
        length: u8,
        value: u8,
    ) -> Result<(), Error<T::Error>> {
        let current = self.read_register(register).await?;
        self.write_register(register, splice_bits(current, offset, length, value))
            .await
    }

    async fn read_register(&mut self, register: u8) -> Result<u8, Error<T::Error>> {
        let mut buffer = [0u8; 1];
        self.bus
            .write_read(SENSOR_ADDR, &[register], &mut buffer)
            .await?;
        Ok(buffer[0])
    }

    async fn write_register(&mut self, register: u8, value: u8) -> Result<(), Error<T::Error>> {
        self.bus.write(SENSOR_ADDR, &[register, value]).await?;
        Ok(())
    }
}

impl<T, D> Sensor for Dps310<T, D>
where
    T: I2c,
    D: DelayNs,
{
    type Reading = Measurement;
    type Error = Error<T::Error>;

    async fn configure(&mut self) -> Result<(), Self::Error> {
        self.init().await
    }

    async fn sample(&mut self) -> Result<Self::Reading, Self::Error> {
        self.read().await
    }
}

#[cfg(test)]
mod tests {
    use embassy_futures::block_on;
    use embedded_hal_mock::eh1::i2c::{Mock, Transaction};

    use super::*;
    use crate::test_util::RecordingDelay;

    const COEF_BLOCK: [u8; COEF_LEN] = [
        0x91, 0x22, 0x33, 0xc4, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee,
        0x0f, 0x10, 0x21, 0x32,
    ];

    #[test]
    fn calibration_decode_unpacks_mixed_widths() {
        let calibration = CalibrationSet::decode(&COEF_BLOCK);

        assert_eq!(calibration.c0, -1774);
        assert_eq!(calibration.c1, 563);
        assert_eq!(calibration.c00, -244394);
        assert_eq!(calibration.c10, 423816);
        assert_eq!(calibration.c01, -26198);
        assert_eq!(calibration.c11, -17460);
        assert_eq!(calibration.c20, -8722);
        assert_eq!(calibration.c21, 3856);
        assert_eq!(calibration.c30, 8498);
    }

    #[test]
    fn calibration_decode_is_idempotent() {
        assert_eq!(
            CalibrationSet::decode(&COEF_BLOCK),
            CalibrationSet::decode(&COEF_BLOCK)
        );
    }

    #[test]
    fn temperature_compensation() {
        let calibration = CalibrationSet {
            c0: 0,
            c1: 1_000_000,
            ..Default::default()
        };
        assert_eq!(calibration.temperature(0.0), 0.0);

        let calibration = CalibrationSet {
            c0: 200,
            c1: -2,
            ..Default::default()
        };
        assert!((calibration.temperature(-0.5) - 101.0).abs() < 1e-9);
    }

    #[test]
    fn pressure_compensation_matches_worked_example() {
        let calibration = CalibrationSet {
            c0: 0,
            c1: 0,
            c00: 80_000,
            c10: 1_000,
            c01: 500,
            c11: 200,
            c20: 100,
            c21: 40,
            c30: 10,
        };

        // praw/scale = 0.25, traw/scale = -0.5, expanded by hand.
        let pressure = calibration.pressure(0.25, -0.5);
        assert!((pressure - 799.8015625).abs() < 1e-6);
    }

    #[test]
    fn splice_preserves_bits_outside_the_field() {
        assert_eq!(splice_bits(0b1010_1010, 3, 3, 0b111), 0b1011_1010);
        assert_eq!(splice_bits(0b1111_1111, 0, 4, 0b0000), 0b1111_0000);
        // Oversized values are clipped to the field.
        assert_eq!(splice_bits(0b0000_0000, 0, 2, 0b1111), 0b0000_0011);
        assert_eq!(splice_bits(0b0100_0000, 6, 1, 1), 0b0100_0000);
    }

    #[test]
    fn scale_factor_table_is_indexed_by_oversampling_code() {
        assert_eq!(Oversample::X1.scale_factor(), 524288);
        assert_eq!(Oversample::X8.scale_factor(), 7864320);
        assert_eq!(Oversample::X128.scale_factor(), 2088960);
        assert!(!Oversample::X8.shift_required());
        assert!(Oversample::X16.shift_required());
    }

    fn init_expectations() -> Vec<Transaction> {
        let mut expectations = vec![
            // reset, then the sensor-ready gate
            Transaction::write(0x77, vec![0x0c, 0x89]),
            Transaction::write_read(0x77, vec![0x08], vec![0x40]),
            // temperature coefficient source workaround, fixed order
            Transaction::write(0x77, vec![0x0e, 0xa5]),
            Transaction::write(0x77, vec![0x0f, 0x96]),
            Transaction::write(0x77, vec![0x62, 0x02]),
            Transaction::write(0x77, vec![0x0e, 0x00]),
            Transaction::write(0x77, vec![0x0f, 0x00]),
            // coefficients-ready gate
            Transaction::write_read(0x77, vec![0x08], vec![0xc0]),
        ];
        for (i, byte) in COEF_BLOCK.iter().enumerate() {
            expectations.push(Transaction::write_read(
                0x77,
                vec![0x10 + i as u8],
                vec![*byte],
            ));
        }
        expectations.extend([
            // pressure config: rate, oversampling, shift bit
            Transaction::write_read(0x77, vec![0x06], vec![0x00]),
            Transaction::write(0x77, vec![0x06, 0x20]),
            Transaction::write_read(0x77, vec![0x06], vec![0x20]),
            Transaction::write(0x77, vec![0x06, 0x23]),
            Transaction::write_read(0x77, vec![0x09], vec![0x00]),
            Transaction::write(0x77, vec![0x09, 0x00]),
            // temperature config mirrors the coefficient source bit
            Transaction::write_read(0x77, vec![0x28], vec![0x80]),
            Transaction::write_read(0x77, vec![0x07], vec![0x00]),
            Transaction::write(0x77, vec![0x07, 0x80]),
            Transaction::write_read(0x77, vec![0x07], vec![0x80]),
            Transaction::write(0x77, vec![0x07, 0xa0]),
            Transaction::write_read(0x77, vec![0x07], vec![0xa0]),
            Transaction::write(0x77, vec![0x07, 0xa3]),
            Transaction::write_read(0x77, vec![0x09], vec![0x00]),
            Transaction::write(0x77, vec![0x09, 0x00]),
            // continuous mode, then both readiness gates
            Transaction::write_read(0x77, vec![0x08], vec![0xc0]),
            Transaction::write(0x77, vec![0x08, 0xc7]),
            Transaction::write_read(0x77, vec![0x08], vec![0xe7]),
            Transaction::write_read(0x77, vec![0x08], vec![0xf7]),
        ]);
        expectations
    }

    #[test]
    fn init_runs_the_bring_up_sequence_and_reads_compensated_values() {
        let mut expectations = init_expectations();
        expectations.extend([
            Transaction::write_read(0x77, vec![0x03], vec![0x00, 0x00, 0x00]),
            Transaction::write_read(0x77, vec![0x00], vec![0x00, 0x10, 0x00]),
        ]);
        let mut bus = Mock::new(&expectations);

        let mut sensor = Dps310::new(bus.clone(), RecordingDelay::default());
        let measurement = block_on(async {
            sensor.init().await.unwrap();
            sensor.read().await.unwrap()
        });

        let calibration = CalibrationSet::decode(&COEF_BLOCK);
        assert_eq!(sensor.calibration(), Some(&calibration));

        let praw_scaled = 4096.0 / 7864320.0;
        assert!((measurement.pressure as f64 - calibration.pressure(praw_scaled, 0.0)).abs() < 1e-3);
        assert!((measurement.temperature as f64 - calibration.temperature(0.0)).abs() < 1e-3);

        bus.done();
    }

    #[test]
    fn read_before_init_is_rejected() {
        let mut bus = Mock::new(&[]);
        let mut sensor = Dps310::new(bus.clone(), RecordingDelay::default());

        assert!(matches!(
            block_on(sensor.read()),
            Err(Error::NotCalibrated)
        ));

        bus.done();
    }

    #[test]
    fn stuck_readiness_flag_surfaces_instead_of_hanging() {
        let mut expectations = vec![Transaction::write(0x77, vec![0x0c, 0x89])];
        for _ in 0..POLL_BUDGET {
            expectations.push(Transaction::write_read(0x77, vec![0x08], vec![0x00]));
        }
        let mut bus = Mock::new(&expectations);

        let delay = RecordingDelay::default();
        let pauses = delay.handle();

        let mut sensor = Dps310::new(bus.clone(), delay);
        assert!(matches!(
            block_on(sensor.init()),
            Err(Error::NotResponding)
        ));
        assert_eq!(pauses.borrow().len(), POLL_BUDGET as usize);

        bus.done();
    }
}
