//! Analog monitor task
//!
//! Samples the bus voltage and the die temperature and publishes them for
//! the motor loop.

use core::sync::atomic::Ordering;

use embassy_stm32::adc::{Adc, AnyAdcChannel, Temperature};
use embassy_stm32::peripherals;
use embassy_time::{Duration, Ticker};

use crate::config::analog::SAMPLE_PERIOD_MS;
use crate::fmt::*;
use crate::state::{BATTERY_MV, TEMPERATURE_C};
use crate::voltage_monitor::{TemperatureCalibration, VoltageMonitor};

#[embassy_executor::task]
pub async fn voltage_monitor_task(
    mut adc2: Adc<'static, peripherals::ADC2>,
    mut voltage_pin: AnyAdcChannel<peripherals::ADC2>,
    mut adc1: Adc<'static, peripherals::ADC1>,
    mut temperature: Temperature,
) {
    info!("Voltage monitor task started");

    let calibration = TemperatureCalibration::read();

    // First reading seeds the filter so startup does not see a low battery
    let initial_adc = adc2.blocking_read(&mut voltage_pin);
    let mut monitor = VoltageMonitor::new(initial_adc);
    BATTERY_MV.store(monitor.millivolts(), Ordering::Release);
    info!(
        "Initial voltage: {} mV (ADC raw: {})",
        monitor.millivolts(),
        initial_adc
    );

    let mut ticker = Ticker::every(Duration::from_millis(SAMPLE_PERIOD_MS));

    // Log once per second
    let mut log_counter = 0u32;

    loop {
        ticker.next().await;

        let millivolts = monitor.update(adc2.blocking_read(&mut voltage_pin));
        BATTERY_MV.store(millivolts, Ordering::Release);

        let celsius = calibration.celsius(adc1.blocking_read(&mut temperature));
        TEMPERATURE_C.store(celsius, Ordering::Release);

        log_counter += 1;
        if log_counter >= 10 {
            log_counter = 0;
            debug!("[Analog] battery={} mV, temperature={} C", millivolts, celsius);
        }
    }
}
