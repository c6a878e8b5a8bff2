#![cfg_attr(not(test), no_std)]

pub mod bits;
pub mod collector;
pub mod dps310;
pub mod htu31d;
pub mod pmsa003i;
pub mod sampler;

/// Failure modes shared by all station drivers.
#[derive(Debug)]
pub enum Error<Inner: core::fmt::Debug> {
    /// The transaction failed at the transport layer.
    Bus(Inner),
    /// A frame arrived but failed its device-specific integrity check.
    Integrity(IntegrityError),
    /// A readiness flag never asserted within the poll budget.
    NotResponding,
    /// A measurement was requested before the calibration block was read.
    NotCalibrated,
}

impl<E: embedded_hal_async::i2c::Error> From<E> for Error<E> {
    fn from(e: E) -> Self {
        Self::Bus(e)
    }
}

#[cfg(feature = "defmt")]
impl<E: core::fmt::Debug + defmt::Format> defmt::Format for Error<E> {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Error::Bus(e) => e.format(fmt),
            Error::Integrity(e) => e.format(fmt),
            Error::NotResponding => defmt::write!(fmt, "NotResponding"),
            Error::NotCalibrated => defmt::write!(fmt, "NotCalibrated"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IntegrityError {
    Crc,
    Checksum,
}

impl<T: core::fmt::Debug> From<IntegrityError> for Error<T> {
    fn from(e: IntegrityError) -> Self {
        Self::Integrity(e)
    }
}
