//! Peripheral setup helpers

use embassy_executor::InterruptExecutor;
use embassy_stm32::crc::{Config as CrcConfig, ConfigError, InputReverseConfig, PolySize};
use embassy_stm32::{interrupt, Config};

/// Executor for the RC tasks, preempting the motor loop
pub static EXECUTOR_HIGH: InterruptExecutor = InterruptExecutor::new();

#[interrupt]
#[allow(non_snake_case)]
unsafe fn UART4() {
    EXECUTOR_HIGH.on_interrupt()
}

/// RCC clock configuration
///
/// HSI -> PLL (/4 x85 /2) for a 170 MHz system clock
pub fn create_clock_config() -> Config {
    let mut config = Config::default();
    {
        use embassy_stm32::rcc::mux::{Adcsel, ClockMux};
        use embassy_stm32::rcc::{Pll, PllMul, PllPreDiv, PllRDiv, PllSource, Sysclk};

        config.rcc.hsi = true;
        config.rcc.pll = Some(Pll {
            source: PllSource::HSI,
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL85,
            divp: None,
            divq: None,
            divr: Some(PllRDiv::DIV2),
        });
        config.rcc.sys = Sysclk::PLL1_R;

        let mut clock_mux = ClockMux::default();
        clock_mux.adc12sel = Adcsel::SYS;
        config.rcc.mux = clock_mux;
    }
    config
}

/// STM32 default CRC-32 (poly 0x04C11DB7, init 0xFFFFFFFF)
pub fn crc_config() -> Result<CrcConfig, ConfigError> {
    CrcConfig::new(
        InputReverseConfig::None,
        false,
        PolySize::Width32,
        0xFFFF_FFFF,
        0x04C1_1DB7,
    )
}
