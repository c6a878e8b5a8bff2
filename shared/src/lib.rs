#![cfg_attr(not(test), no_std)]

/// Latest value of every quantity the station measures, folded together from
/// the per-sensor queues. Serialized with postcard/COBS on the reporting link.
#[cfg_attr(feature = "std", derive(Debug))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(serde::Serialize, serde::Deserialize, PartialEq, Default, Clone, Copy)]
pub struct AirQuality {
    /// Air temperature [°C]
    pub temperature: f32,
    /// Relative humidity [%RH]
    pub humidity: f32,
    /// Barometric pressure [hPa]
    pub pressure: f32,
    /// Mass Concentration PM1.0, standard particle [µg/m³]
    pub pm1_0_std: u16,
    /// Mass Concentration PM2.5, standard particle [µg/m³]
    pub pm2_5_std: u16,
    /// Mass Concentration PM10, standard particle [µg/m³]
    pub pm10_std: u16,
    /// Mass Concentration PM1.0, atmospheric environment [µg/m³]
    pub pm1_0_env: u16,
    /// Mass Concentration PM2.5, atmospheric environment [µg/m³]
    pub pm2_5_env: u16,
    /// Mass Concentration PM10, atmospheric environment [µg/m³]
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use postcard::{from_bytes_cobs, to_slice_cobs};

    #[test]
    fn it_works() {
        let data = AirQuality {
            temperature: 22.5,
            humidity: 40.0,
            pressure: 1013.25,
            pm1_0_std: 10,
            pm2_5_std: 12,
            pm10_std: 15,
            pm1_0_env: 9,
            pm2_5_env: 11,
            pm10_env: 14,
            particles_0_3um: 900,
            particles_0_5um: 300,
            particles_1_0um: 100,
            particles_2_5um: 30,
            particles_5_0um: 10,
            particles_10um: 5,
        };
        let mut buffer = [0u8; 100];
        let output = to_slice_cobs(&data, &mut buffer).unwrap();

        assert!(output.len() > 0);
        assert!(output.len() < 100);

        let data = from_bytes_cobs::<AirQuality>(output).unwrap();
        assert_eq!(data.pm2_5_std, 12);
        assert!(data.pressure > 1013.0);
        assert!(data.pressure < 1014.0);
    }
}
