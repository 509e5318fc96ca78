#![no_std]
#![no_main]

// This mod MUST go first, so that the others see its macros.
mod fmt;

mod board;
mod clock;
mod config;
mod eeprom;
mod hardware;
mod motor_driver;
mod state;
mod tasks;
mod voltage_monitor;

#[cfg(not(feature = "defmt"))]
use panic_halt as _;
#[cfg(feature = "defmt")]
use {defmt_rtt as _, panic_probe as _};

use embassy_executor::Spawner;
use embassy_stm32::{
    adc::{Adc, AdcChannel, SampleTime},
    crc::Crc,
    exti::ExtiInput,
    flash::Flash,
    gpio::{Input, Level, Output, OutputType, Pull, Speed},
    interrupt::{self, InterruptExt, Priority},
    timer::{
        complementary_pwm::{ComplementaryPwm, ComplementaryPwmPin},
        low_level::CountingMode,
        simple_pwm::PwmPin,
    },
};
use embassy_time::{Duration, Timer};
use esc_core::config::load_config;

use board::Board;
use eeprom::FlashParamStore;
use fmt::*;
use hardware::EXECUTOR_HIGH;
use motor_driver::MotorDriver;
use tasks::{motor_control_task, rc_capture_task, rc_tick_task, voltage_monitor_task};

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_stm32::init(hardware::create_clock_config());

    info!("═══════════════════════════════════════════════");
    info!("   Sensorless BLDC ESC • STM32G431VB @ 170MHz");
    info!("═══════════════════════════════════════════════");

    unsafe {
        clock::enable_cycle_counter();
    }

    // Parameters from the last flash page, defaults on any failure
    let flash = Flash::new_blocking(p.FLASH);
    let crc = Crc::new(p.CRC, unwrap!(hardware::crc_config()));
    let mut store = FlashParamStore::new(flash, crc);
    let esc_config = load_config(&mut store, config::DEPLOYMENT);
    info!(
        "Config: {:?}, timing {:?}, governor {:?}",
        esc_config.deployment, esc_config.comm_timing, esc_config.governor_mode
    );
    state::RC_DECODER.configure(esc_config.rc_config());

    // RC input on PA15, on the high-priority executor
    interrupt::UART4.set_priority(Priority::P6);
    let rc_spawner = EXECUTOR_HIGH.start(interrupt::UART4);
    let rc_input = ExtiInput::new(p.PA15, p.EXTI15, Pull::Down);
    rc_spawner.spawn(rc_capture_task(rc_input)).unwrap();
    rc_spawner.spawn(rc_tick_task()).unwrap();
    info!("RC input started on PA15");

    // Bus voltage on PC1 (ADC2_IN7), die temperature on ADC1
    let mut adc1 = Adc::new(p.ADC1);
    adc1.set_sample_time(SampleTime::CYCLES640_5);
    let temperature = adc1.enable_temperature();
    let mut adc2 = Adc::new(p.ADC2);
    adc2.set_sample_time(SampleTime::CYCLES640_5);
    let voltage_pin = p.PC1.degrade_adc();
    spawner
        .spawn(voltage_monitor_task(adc2, voltage_pin, adc1, temperature))
        .unwrap();

    // Bridge on TIM1 (CH1-3 high side, CH1N-3N low side)
    let mut bridge = ComplementaryPwm::new(
        p.TIM1,
        Some(PwmPin::new(p.PE9, OutputType::PushPull)),
        Some(ComplementaryPwmPin::new(p.PE8, OutputType::PushPull)),
        Some(PwmPin::new(p.PE11, OutputType::PushPull)),
        Some(ComplementaryPwmPin::new(p.PE10, OutputType::PushPull)),
        Some(PwmPin::new(p.PE13, OutputType::PushPull)),
        Some(ComplementaryPwmPin::new(p.PE12, OutputType::PushPull)),
        None,
        None,
        config::pwm::DEFAULT_FREQUENCY,
        CountingMode::EdgeAlignedUp,
    );
    bridge.set_dead_time(config::pwm::DEFAULT_DEAD_TIME);
    let driver = MotorDriver::new(bridge);
    info!("Bridge ready, max duty {}", driver.max_duty());

    // Back-EMF comparator outputs for legs A, B, C
    let comparators = [
        Input::new(p.PB4, Pull::None),
        Input::new(p.PB5, Pull::None),
        Input::new(p.PB6, Pull::None),
    ];
    let rpm = Output::new(p.PC13, Level::Low, Speed::Low);

    let board = Board::new(driver, comparators, rpm, store);
    spawner.spawn(motor_control_task(board, esc_config)).unwrap();

    loop {
        Timer::after(Duration::from_millis(100)).await;
    }
}
