//! Battery voltage and temperature measurement
//!
//! Battery voltage comes from the bus divider on PC1, temperature from the
//! internal sensor using the factory calibration values.

use crate::config::analog::{ADC_MAX, FILTER_WEIGHT, R_LOWER_OHM, R_UPPER_OHM, VREF_MV};

/// Filtered battery voltage
pub struct VoltageMonitor {
    /// Filtered voltage [mV]
    millivolts: u32,
}

impl VoltageMonitor {
    /// Starts the filter at the first reading so it does not ramp up from zero.
    pub fn new(adc_raw: u16) -> Self {
        Self {
            millivolts: adc_to_millivolts(adc_raw),
        }
    }

    /// Adds a sample and returns the filtered voltage [mV].
    pub fn update(&mut self, adc_raw: u16) -> u16 {
        let sample = adc_to_millivolts(adc_raw);
        self.millivolts = (sample * FILTER_WEIGHT + self.millivolts * (16 - FILTER_WEIGHT)) / 16;
        self.millivolts()
    }

    pub fn millivolts(&self) -> u16 {
        self.millivolts.min(u16::MAX as u32) as u16
    }
}

/// Bus voltage [mV] from a raw ADC reading.
///
/// V_bus = V_adc * (R_upper + R_lower) / R_lower
fn adc_to_millivolts(adc_raw: u16) -> u32 {
    let v_adc = adc_raw as u32 * VREF_MV / ADC_MAX;
    v_adc * (R_UPPER_OHM + R_LOWER_OHM) / R_LOWER_OHM
}

/// Temperature sensor calibration at 30 °C (VDDA = 3.0 V)
const TS_CAL1: *const u16 = 0x1FFF_75A8 as *const u16;
/// Temperature sensor calibration at 130 °C (VDDA = 3.0 V)
const TS_CAL2: *const u16 = 0x1FFF_75CA as *const u16;
const TS_CAL1_TEMP: i32 = 30;
const TS_CAL2_TEMP: i32 = 130;
const TS_CAL_VREF_MV: i32 = 3000;

/// Factory calibration of the internal temperature sensor
#[derive(Clone, Copy)]
pub struct TemperatureCalibration {
    cal1: i32,
    cal2: i32,
}

impl TemperatureCalibration {
    pub fn read() -> Self {
        // SAFETY: fixed system memory addresses, always readable
        let (cal1, cal2) = unsafe {
            (
                core::ptr::read_volatile(TS_CAL1),
                core::ptr::read_volatile(TS_CAL2),
            )
        };
        Self {
            cal1: cal1 as i32,
            cal2: cal2 as i32,
        }
    }

    /// Temperature [°C] from a raw sensor reading taken at VREF_MV.
    pub fn celsius(&self, adc_raw: u16) -> i16 {
        let span = (self.cal2 - self.cal1).max(1);
        // Rescale the reading to the 3.0 V calibration reference
        let raw = adc_raw as i32 * VREF_MV as i32 / TS_CAL_VREF_MV;
        let temp = (raw - self.cal1) * (TS_CAL2_TEMP - TS_CAL1_TEMP) / span + TS_CAL1_TEMP;
        temp.clamp(i16::MIN as i32, i16::MAX as i32) as i16
    }
}
