#![no_std]
#![no_main]
#![feature(type_alias_impl_trait)]

use core::cell::RefCell;
use defmt_rtt as _;
use static_cell::make_static;

use embassy_executor::Spawner;
use embassy_embedded_hal::shared_bus::asynch::i2c::I2cDevice;
use embassy_nrf::gpio::{AnyPin, Level, Output, OutputDrive, Pin};
use embassy_nrf::twim::{self, Twim};
use embassy_nrf::uarte::{self, Uarte};
use embassy_nrf::{bind_interrupts, peripherals};
use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, NoopRawMutex};
use embassy_sync::blocking_mutex::ThreadModeMutex;
use embassy_sync::channel::{Channel, Sender};
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Delay, Timer};

use air_station_sensors::collector::{self, Reading, ReadingSink};
use air_station_sensors::dps310::{self, Dps310};
use air_station_sensors::htu31d::{self, Htu31d};
use air_station_sensors::pmsa003i::{self, Pmsa003i};
use air_station_sensors::sampler::{self, Config};
use shared::AirQuality;

#[cfg(feature = "dev")]
use panic_probe as _;

#[cfg(not(feature = "dev"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    defmt::error!("panic!");
    cortex_m::peripheral::SCB::sys_reset();
}

#[cortex_m_rt::exception]
unsafe fn HardFault(_frame: &cortex_m_rt::ExceptionFrame) -> ! {
    cortex_m::peripheral::SCB::sys_reset()
}

bind_interrupts!(struct Irqs {
    SPIM0_SPIS0_TWIM0_TWIS0_SPI0_TWI0 => twim::InterruptHandler<peripherals::TWISPI0>;
    UARTE0_UART0 => uarte::InterruptHandler<peripherals::UARTE0>;
});

/// Trigger-to-trigger sampling period, uniform across all sensors.
const SAMPLING: Config = Config::seconds(10);

type SensorBus = Mutex<NoopRawMutex, Twim<'static, peripherals::TWISPI0>>;
type BusHandle = I2cDevice<'static, NoopRawMutex, Twim<'static, peripherals::TWISPI0>>;

static CLIMATE: Channel<CriticalSectionRawMutex, htu31d::Measurement, 1> = Channel::new();
static PRESSURE: Channel<CriticalSectionRawMutex, dps310::Measurement, 1> = Channel::new();
static PARTICULATE: Channel<CriticalSectionRawMutex, pmsa003i::Reading, 1> = Channel::new();
static SHUTDOWN: Signal<CriticalSectionRawMutex, ()> = Signal::new();

type State = ThreadModeMutex<RefCell<AirQuality>>;

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let mut config = embassy_nrf::config::Config::default();
    config.hfclk_source = embassy_nrf::config::HfclkSource::Internal;
    config.lfclk_source = embassy_nrf::config::LfclkSource::InternalRC;

    let p = embassy_nrf::init(config);

    // All three sensors hang off one physical bus; every handle below locks
    // it per transaction.
    let bus: &'static SensorBus = make_static!(Mutex::new(Twim::new(
        p.TWISPI0,
        Irqs,
        p.P0_12,
        p.P0_13,
        Default::default()
    )));

    let mut uarte_config = uarte::Config::default();
    uarte_config.baudrate = uarte::Baudrate::BAUD115200;
    let uart = Uarte::new(p.UARTE0, Irqs, p.P0_08, p.P0_06, uarte_config);

    let state: &'static State = make_static!(ThreadModeMutex::new(RefCell::new(
        AirQuality::default()
    )));

    let climate = Htu31d::new(I2cDevice::new(bus), Delay);
    let pressure = Dps310::new(I2cDevice::new(bus), Delay);
    let particulate = Pmsa003i::new(I2cDevice::new(bus));

    defmt::unwrap!(spawner.spawn(climate_task(climate, CLIMATE.sender())));
    defmt::unwrap!(spawner.spawn(pressure_task(pressure, PRESSURE.sender())));
    defmt::unwrap!(spawner.spawn(particulate_task(particulate, PARTICULATE.sender())));
    defmt::unwrap!(spawner.spawn(collector_task(state)));
    defmt::unwrap!(spawner.spawn(reporting_task(uart, state)));
    defmt::unwrap!(spawner.spawn(blinky(Output::new(
        p.P1_15.degrade(),
        Level::Low,
        OutputDrive::Standard
    ))));

    defmt::info!("air station up, sampling every {} ms", SAMPLING.interval_ms);
}

#[embassy_executor::task]
async fn climate_task(
    sensor: Htu31d<BusHandle, Delay>,
    readings: Sender<'static, CriticalSectionRawMutex, htu31d::Measurement, 1>,
) {
    sampler::run(sensor, Delay, SAMPLING, readings, &SHUTDOWN, "htu31d").await;
}

#[embassy_executor::task]
async fn pressure_task(
    sensor: Dps310<BusHandle, Delay>,
    readings: Sender<'static, CriticalSectionRawMutex, dps310::Measurement, 1>,
) {
    sampler::run(sensor, Delay, SAMPLING, readings, &SHUTDOWN, "dps310").await;
}

#[embassy_executor::task]
async fn particulate_task(
    sensor: Pmsa003i<BusHandle>,
    readings: Sender<'static, CriticalSectionRawMutex, pmsa003i::Reading, 1>,
) {
    sampler::run(sensor, Delay, SAMPLING, readings, &SHUTDOWN, "pmsa003i").await;
}

/// Folds every completed reading into the station state.
struct StationSink {
    state: &'static State,
}

impl ReadingSink for StationSink {
    fn record(&mut self, reading: Reading) {
        match reading {
            Reading::Climate(m) => {
                defmt::info!("temperature {}, humidity {}", m.temperature, m.humidity)
            }
            Reading::Pressure(m) => defmt::info!("pressure {} hPa", m.pressure),
            Reading::Particulate(r) => defmt::info!(
                "PM1.0 {} PM2.5 {} PM10 {}",
                r.pm1_0_std,
                r.pm2_5_std,
                r.pm10_std
            ),
        }

        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            match reading {
                Reading::Climate(m) => {
                    state.temperature = m.temperature;
                    state.humidity = m.humidity;
                }
                Reading::Pressure(m) => {
                    state.pressure = m.pressure;
                }
                Reading::Particulate(r) => {
                    state.pm1_0_std = r.pm1_0_std;
                    state.pm2_5_std = r.pm2_5_std;
                    state.pm10_std = r.pm10_std;
                    state.pm1_0_env = r.pm1_0_env;
                    state.pm2_5_env = r.pm2_5_env;
                    state.pm10_env = r.pm10_env;
                    state.particles_0_3um = r.particles_0_3um;
                    state.particles_0_5um = r.particles_0_5um;
                    state.particles_1_0um = r.particles_1_0um;
                    state.particles_2_5um = r.particles_2_5um;
                    state.particles_5_0um = r.particles_5_0um;
                    state.particles_10um = r.particles_10um;
                }
            }
        });
    }
}

#[embassy_executor::task]
async fn collector_task(state: &'static State) -> ! {
    let mut sink = StationSink { state };
    collector::run(
        CLIMATE.receiver(),
        PRESSURE.receiver(),
        PARTICULATE.receiver(),
        &mut sink,
    )
    .await
}

/// Ships the current state over the serial link every second as a
/// postcard/COBS frame; the bridge process on the other end feeds the
/// metrics endpoint and the display.
#[embassy_executor::task]
async fn reporting_task(mut uart: Uarte<'static, peripherals::UARTE0>, state: &'static State) {
    loop {
        Timer::after_secs(1).await;

        let snapshot = state.lock(|cell| *cell.borrow());

        let mut buffer = [0u8; 96];
        match postcard::to_slice_cobs(&snapshot, &mut buffer) {
            Ok(frame) => {
                if uart.write(frame).await.is_err() {
                    defmt::error!("reporting: uart write failed");
                }
            }
            Err(_) => defmt::error!("reporting: encoding failed"),
        }
    }
}

/// Blink the LED for a very short time, to avoid the blinking being
/// distracting at night
#[embassy_executor::task]
async fn blinky(mut led: Output<'static, AnyPin>) {
    loop {
        led.set_high();
        Timer::after_millis(50).await;
        led.set_low();
        Timer::after_secs(60).await;
    }
}
