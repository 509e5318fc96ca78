//! Run orchestrator
//!
//! Owns the controller state machine and drives every other component:
//!
//! ```text
//! NoSignal -> Arm -> PowerOnWait -> Startup -> TransitionToRun -> Run
//!              |                      ^                            |
//!              +-> Calibrate          +------- Stopped(reason) <---+
//! ```
//!
//! [`Orchestrator::step`] runs one unit of work and returns the new state.
//! While the motor turns, one step is one commutation phase: zero-cross
//! scan, governor sub-step, wait to commutation, commutate, period update,
//! wait advance, new schedule, wait before the next scan.

mod phase;
#[cfg(test)]
mod sim;

pub use phase::{CommutationPhase, PhaseDrive};

use crate::config::beacon::INTERVAL_TICKS;
use crate::config::rc::{
    ARM_BIDIR_MARGIN, POWER_ON_HYSTERESIS_PWM, STOP_LIMIT, STOP_LIMIT_TAIL,
};
use crate::config::startup::{
    DEADLOCK_BREAK_OK, INITIAL_RUN_ROTATIONS, MAX_RETRIES, OK_REQUIRED, STOP_SETTLE_TICKS,
};
use crate::config::timing::{MAX_BRAKE_PERIOD4X, MAX_RUN_PERIOD4X};
use crate::config::{Deployment, EscConfig, MotorDirection, RCP_MIDSTICK, RCP_STOP};
use crate::demag::{DemagDetector, DemagMetric};
use crate::governor::{Activation, Governor, GovernorInput, Spoolup, SpoolupInput};
use crate::hal::{EscHardware, PwmMode, Tone};
use crate::period::{CommPeriod, PeriodEstimator};
use crate::power::{self, PowerCeilings, VoltageGuard};
use crate::rc_decoder::calibration::CalibrationStep;
use crate::rc_decoder::{Direction, RcProtocol, ThrottleCalibration, ThrottleCommand, ThrottleRange};
use crate::timing::{TimingSchedule, TimingScheduler, ZeroCrossFilter};

/// Scan polls between two checks for a direction reversal.
const REVERSAL_POLL_INTERVAL: u16 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationStage {
    Max,
    Min,
}

/// Why a running motor was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopReason {
    /// Zero-cross timeout, or startup did not succeed in time
    Stall,
    /// Command below stop for longer than the stop limit
    CommandStop,
    /// PPM/OneShot125 input lost
    SignalLost,
    /// Commutation period above the run limit
    TooSlow,
    /// Braked down for a direction reversal
    DirectionChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RunState {
    NoSignal,
    Arm,
    Calibrate(CalibrationStage),
    PowerOnWait,
    Startup,
    TransitionToRun,
    Run,
    Stopped(StopReason),
}

impl RunState {
    /// The six-phase commutation loop is running.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Startup | Self::TransitionToRun | Self::Run)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanOutcome {
    ZeroCross,
    /// No zero-cross in time. `demag` is set when the scan never saw the
    /// pre zero-cross level.
    Timeout { demag: bool },
    Reversal,
}

pub struct Orchestrator {
    config: EscConfig,
    state: RunState,
    phase: CommutationPhase,
    period: PeriodEstimator,
    demag: DemagDetector,
    scheduler: TimingScheduler,
    schedule: TimingSchedule,
    governor: Governor,
    spoolup: Spoolup,
    voltage: VoltageGuard,
    ceilings: PowerCeilings,
    calibration: Option<ThrottleCalibration>,
    command: ThrottleCommand,
    requested: u8,
    current: u8,
    applied: u8,
    direction: Direction,
    pwm_mode: PwmMode,
    startup: bool,
    initial_run: bool,
    braking: bool,
    startup_ok: u8,
    startup_commutations: u16,
    initial_run_rotations: u8,
    halve_timeout: bool,
    retries: u8,
    arm_target: u8,
    arm_checked: bool,
    idle_ticks: u32,
    next_tone: u32,
    powered_up: bool,
}

impl Orchestrator {
    pub fn new(config: EscConfig) -> Self {
        let period = PeriodEstimator::new();
        let demag = DemagDetector::new(config.demag_compensation);
        let scheduler = TimingScheduler::new(config.comm_timing, false);
        let schedule = scheduler.schedule(period.period(), demag.metric());
        Self {
            config,
            state: RunState::NoSignal,
            phase: CommutationPhase::FIRST,
            period,
            demag,
            scheduler,
            schedule,
            governor: Governor::new(&config),
            spoolup: Spoolup::new(&config),
            voltage: VoltageGuard::new(config.low_voltage_limit_mv),
            ceilings: PowerCeilings::NONE,
            calibration: None,
            command: ThrottleCommand::NONE,
            requested: 0,
            current: 0,
            applied: 0,
            direction: Direction::Forward,
            pwm_mode: PwmMode::NonDamped,
            startup: false,
            initial_run: false,
            braking: false,
            startup_ok: 0,
            startup_commutations: 0,
            initial_run_rotations: 0,
            halve_timeout: false,
            retries: 0,
            arm_target: 0,
            arm_checked: false,
            idle_ticks: 0,
            next_tone: INTERVAL_TICKS,
            powered_up: false,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> &EscConfig {
        &self.config
    }

    pub fn phase(&self) -> CommutationPhase {
        self.phase
    }

    pub fn period4x(&self) -> CommPeriod {
        self.period.period()
    }

    pub fn demag_metric(&self) -> DemagMetric {
        self.demag.metric()
    }

    /// Power last written to the bridge.
    pub fn applied_power(&self) -> u8 {
        self.applied
    }

    pub fn ceilings(&self) -> &PowerCeilings {
        &self.ceilings
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Runs one unit of work and returns the new state.
    pub fn step<H: EscHardware>(&mut self, hw: &mut H) -> RunState {
        if !self.powered_up {
            self.power_up(hw);
        }
        if self.voltage.cells().is_none() {
            self.voltage.measure_cells(hw.battery_millivolts());
        }

        let ticks = hw.take_housekeeping_ticks();
        self.command = hw.command();
        self.refresh_power();
        for _ in 0..ticks {
            self.housekeeping_tick();
        }

        let next = match self.state {
            RunState::NoSignal => self.no_signal(hw),
            RunState::Arm => self.arm(hw),
            RunState::Calibrate(stage) => self.calibrate(hw, stage, ticks),
            RunState::PowerOnWait => self.power_on_wait(hw),
            RunState::Startup | RunState::TransitionToRun | RunState::Run => self.run_phase(hw),
            RunState::Stopped(reason) => self.stopped(hw, reason),
        };
        if next != self.state {
            info!("{:?} -> {:?}", self.state, next);
        }
        self.state = next;
        next
    }

    fn power_up<H: EscHardware>(&mut self, hw: &mut H) {
        hw.all_off();
        hw.beep(Tone::PowerUp);
        self.powered_up = true;
    }

    fn spinning(&self) -> bool {
        self.startup || self.initial_run || self.state == RunState::Run
    }

    fn signal_lost(&self) -> bool {
        match self.command.protocol {
            None => true,
            Some(protocol) => protocol.is_ppm() && !self.command.live,
        }
    }

    fn requested_direction(&self) -> Direction {
        match self.config.direction {
            MotorDirection::Reversed => self.command.direction.reversed(),
            MotorDirection::Normal | MotorDirection::Bidirectional => self.command.direction,
        }
    }

    /// Recomputes requested and current power from the latest command.
    fn refresh_power(&mut self) {
        let idle = if self.spinning() { self.config.motor_idle } else { 0 };
        let mut requested = power::requested_power(&self.command, &self.config, idle);
        if self.startup {
            requested = power::startup_requested(
                requested,
                self.config.deployment,
                self.ceilings.pwm_limit,
            );
        }
        self.requested = requested;
        self.current = if self.governor.active() {
            self.governor.output(self.spoolup.governor_requested())
        } else {
            requested
        };
    }

    fn housekeeping_tick(&mut self) {
        self.spoolup.tick(&SpoolupInput {
            command: self.command.value,
            requested: self.requested,
            current: self.current,
            governor_active: self.governor.active(),
        });
        self.ceilings.spoolup = self.spoolup.limit();
        self.idle_ticks = self.idle_ticks.saturating_add(1);
    }

    fn enter_no_signal<H: EscHardware>(&mut self, hw: &mut H) -> RunState {
        hw.all_off();
        hw.restart_detection();
        self.applied = 0;
        self.governor.deactivate();
        self.idle_ticks = 0;
        self.next_tone = INTERVAL_TICKS;
        RunState::NoSignal
    }

    fn no_signal<H: EscHardware>(&mut self, hw: &mut H) -> RunState {
        if self.command.live && self.command.protocol.is_some() {
            debug!("Input locked: {:?}", self.command.protocol);
            self.arm_target = 0;
            self.arm_checked = false;
            return RunState::Arm;
        }
        if self.idle_ticks >= self.next_tone {
            hw.beep(Tone::NoSignal);
            self.next_tone = self.idle_ticks.saturating_add(INTERVAL_TICKS);
        }
        RunState::NoSignal
    }

    fn arm<H: EscHardware>(&mut self, hw: &mut H) -> RunState {
        if self.signal_lost() {
            return self.enter_no_signal(hw);
        }
        let command = self.command;

        if !self.arm_checked {
            self.arm_checked = true;
            let ppm = command.protocol.is_some_and(RcProtocol::is_ppm);
            if self.config.throttle_calibration && ppm && command.value > RCP_MIDSTICK {
                info!("Throttle calibration requested");
                hw.beep(Tone::Programming);
                self.calibration = Some(ThrottleCalibration::new(self.config.throttle.center));
                return RunState::Calibrate(CalibrationStage::Max);
            }
        }

        self.arm_target = self.arm_target.max(command.value);
        let margin = if self.config.bidirectional() { ARM_BIDIR_MARGIN } else { 0 };
        if command.value < RCP_STOP + margin {
            hw.beep(Tone::Armed);
            self.spoolup.set_arm_target(self.arm_target);
            return self.enter_power_on_wait(hw);
        }
        RunState::Arm
    }

    fn calibrate<H: EscHardware>(
        &mut self,
        hw: &mut H,
        stage: CalibrationStage,
        ticks: u8,
    ) -> RunState {
        let Some(mut calibration) = self.calibration.take() else {
            return RunState::Arm;
        };

        if let Err(e) = calibration.on_ticks(ticks) {
            error!("Throttle calibration failed: {:?}", e);
            hw.beep(Tone::NoSignal);
            return self.enter_no_signal(hw);
        }

        let mut stage = stage;
        while let Some(raw) = hw.take_raw_width() {
            match calibration.on_sample(raw) {
                CalibrationStep::Collecting => {}
                CalibrationStep::MaxCaptured(max) => {
                    debug!("Calibration max {}", max);
                    hw.beep(Tone::CalibrationStep);
                    stage = CalibrationStage::Min;
                }
                CalibrationStep::Done(range) => {
                    self.finish_calibration(hw, range);
                    return RunState::Arm;
                }
            }
        }

        self.calibration = Some(calibration);
        RunState::Calibrate(stage)
    }

    fn finish_calibration<H: EscHardware>(&mut self, hw: &mut H, range: ThrottleRange) {
        info!(
            "Throttle calibrated: min {} max {} center {}",
            range.min,
            range.max,
            range.center
        );
        self.config.throttle = range;
        hw.apply_throttle_range(range);
        if let Err(e) = hw.save(&self.config.to_record()) {
            error!("Failed to store calibration: {:?}", e);
        }
        hw.beep(Tone::CalibrationDone);
    }

    fn enter_power_on_wait<H: EscHardware>(&mut self, hw: &mut H) -> RunState {
        hw.all_off();
        self.applied = 0;
        self.retries = 0;
        self.idle_ticks = 0;
        self.next_tone = self.config.beacon_delay.ticks().unwrap_or(u32::MAX);
        RunState::PowerOnWait
    }

    fn power_on_wait<H: EscHardware>(&mut self, hw: &mut H) -> RunState {
        if self.signal_lost() {
            return self.enter_no_signal(hw);
        }

        let hysteresis = match self.command.protocol {
            Some(RcProtocol::Pwm(_)) => POWER_ON_HYSTERESIS_PWM,
            _ => 0,
        };
        // No start before the cell count behind the voltage cut-in is known
        if self.command.live
            && self.command.value >= RCP_STOP + hysteresis
            && self.voltage.ready()
        {
            self.direction = self.requested_direction();
            return self.enter_startup(hw);
        }

        if self.idle_ticks >= self.next_tone {
            hw.beep(Tone::Beacon(self.config.beacon_strength));
            self.next_tone = self.idle_ticks.saturating_add(INTERVAL_TICKS);
        }
        RunState::PowerOnWait
    }

    fn enter_startup<H: EscHardware>(&mut self, hw: &mut H) -> RunState {
        let pwm_limit = power::startup_power(&self.config, self.retries);
        info!(
            "Startup {:?}, attempt {}, power limit {}",
            self.direction,
            self.retries,
            pwm_limit
        );

        self.spoolup.set_start_power(pwm_limit);
        self.spoolup.rearm();
        self.spoolup.reset_stop_count();
        self.ceilings.pwm_limit = pwm_limit;
        self.ceilings.spoolup = self.spoolup.limit();
        self.ceilings.low_rpm = 255;

        self.period.reset();
        self.demag.reset();
        self.demag.set_enabled(false);
        self.governor.deactivate();
        self.scheduler.set_damped(false);
        self.pwm_mode = PwmMode::NonDamped;
        self.schedule = self.scheduler.schedule(self.period.period(), self.demag.metric());

        self.startup = true;
        self.initial_run = false;
        self.braking = false;
        self.startup_ok = 0;
        self.startup_commutations = 0;
        self.refresh_power();

        self.phase = CommutationPhase::FIRST;
        self.drive(hw);
        RunState::Startup
    }

    fn enter_initial_run(&mut self) -> RunState {
        debug!("Startup done, period4x {}", self.period.period());
        self.startup = false;
        self.initial_run = true;
        self.initial_run_rotations = INITIAL_RUN_ROTATIONS;
        self.scheduler.set_damped(self.config.damped);
        self.pwm_mode = if self.config.damped {
            PwmMode::Damped
        } else {
            PwmMode::NonDamped
        };
        self.spoolup.rearm();
        self.ceilings.spoolup = self.spoolup.limit();
        RunState::TransitionToRun
    }

    /// One commutation phase.
    fn run_phase<H: EscHardware>(&mut self, hw: &mut H) -> RunState {
        let completed = self.phase;

        let demag_flag = match self.scan_zero_cross(hw) {
            ScanOutcome::Reversal => {
                info!("Direction reversal, braking");
                hw.all_off();
                self.applied = 0;
                self.braking = true;
                self.governor.deactivate();
                return self.state;
            }
            ScanOutcome::ZeroCross => {
                if self.startup {
                    self.startup_ok = self.startup_ok.saturating_add(1);
                }
                false
            }
            ScanOutcome::Timeout { demag } => {
                if self.startup {
                    self.startup_ok = 0;
                } else if !demag && !self.braking {
                    warn!(
                        "Zero-cross timeout in phase {}, period4x {}",
                        completed.number(),
                        self.period.period()
                    );
                    return self.stop(hw, StopReason::Stall);
                }
                demag
            }
        };

        if self.demag.enabled() && self.demag.update(!demag_flag) {
            self.apply_power(hw);
        }

        self.governor_step(hw, completed);

        hw.wait(self.schedule.wait_comm);
        self.commutate(hw);
        self.period.on_commutation(hw.now());
        hw.wait(self.schedule.wait_advance);
        self.schedule = self.scheduler.schedule(self.period.period(), self.demag.metric());
        hw.wait(self.schedule.wait_zc_scan);

        if self.braking {
            if self.signal_lost() {
                return self.stop(hw, StopReason::SignalLost);
            }
            if self.period.period() > MAX_BRAKE_PERIOD4X {
                return self.stop(hw, StopReason::DirectionChange);
            }
            return self.state;
        }

        if self.startup {
            return self.startup_progress(hw);
        }

        if completed == CommutationPhase::LAST {
            return self.run_checks(hw);
        }
        self.state
    }

    /// Waits for the zero-cross of the current phase.
    ///
    /// A scan that opens on the post zero-cross level is taken as winding
    /// demagnetization: those reads are ignored until the pre zero-cross level
    /// shows up, and the first pre level read extends the timeout to a full
    /// `period4x`. Startup and initial run accept the first correct reads.
    fn scan_zero_cross<H: EscHardware>(&mut self, hw: &mut H) -> ScanOutcome {
        let drive = self.phase.drive(self.direction);
        let period4x = self.period.period();
        let required = ZeroCrossFilter::for_period(period4x).required_reads();

        let blind = self.startup || self.initial_run;
        let timeout = if blind {
            // Alternate timeouts break a deadlock against a rotor that
            // happens to be aligned with the scan
            self.halve_timeout = !self.halve_timeout;
            if self.startup && self.startup_ok < DEADLOCK_BREAK_OK && self.halve_timeout {
                period4x / 2
            } else {
                period4x
            }
        } else {
            self.schedule.wait_zc_timeout
        };

        let mut demag = !blind;
        let mut good = 0u8;
        let mut polls = 0u16;
        hw.start(timeout);
        loop {
            if hw.expired() {
                return ScanOutcome::Timeout { demag };
            }

            polls = polls.wrapping_add(1);
            if polls % REVERSAL_POLL_INTERVAL == 0 && self.reversal_requested(hw) {
                return ScanOutcome::Reversal;
            }

            if hw.is_high(drive.sense) != drive.rising {
                good = 0;
                if demag {
                    demag = false;
                    hw.start(period4x);
                }
            } else if !demag {
                good += 1;
                if good >= required {
                    return ScanOutcome::ZeroCross;
                }
            }
        }
    }

    fn reversal_requested<H: EscHardware>(&self, hw: &mut H) -> bool {
        if !self.config.bidirectional() || self.braking {
            return false;
        }
        let command = hw.command();
        command.live && command.above_stop() && command.direction != self.direction
    }

    /// Governor sub-step of the phase, plus the ceilings checked once per
    /// electrical revolution.
    fn governor_step<H: EscHardware>(&mut self, hw: &mut H, phase: CommutationPhase) {
        let period4x = self.period.period();
        let spinning_up = self.startup || self.initial_run;
        match phase.number() {
            1 => {
                let input = GovernorInput {
                    period4x,
                    command: self.command.value,
                    requested: self.requested,
                    governor_requested: self.spoolup.governor_requested(),
                    startup: spinning_up,
                };
                if self.governor.calc_target(&input) == Activation::JustDeactivated {
                    self.spoolup.on_governor_deactivated();
                    self.ceilings.spoolup = self.spoolup.limit();
                }
            }
            2 => {
                self.governor
                    .calc_proportional_error(period4x, self.spoolup.governor_requested());
                let limit = power::low_rpm_limit(
                    period4x,
                    self.applied,
                    spinning_up,
                    self.config.demag_compensation.low_rpm_slope(),
                    self.spoolup.start_power(),
                );
                self.ceilings.low_rpm = limit.ceiling;
                self.demag.set_enabled(limit.demag_enabled);
            }
            3 => self.governor.calc_integral_error(),
            4 => self.governor.calc_proportional_correction(),
            5 => self.governor.calc_integral_correction(),
            _ => {
                if self.config.temperature_protection {
                    let celsius = hw.temperature_celsius();
                    let ceiling = power::temperature_ceiling(celsius);
                    if ceiling < self.ceilings.temperature {
                        warn!("Temperature {} C, power limited to {}", celsius, ceiling);
                    }
                    self.ceilings.temperature = ceiling;
                }
                self.ceilings.voltage = self.voltage.check(hw.battery_millivolts());
            }
        }
        self.refresh_power();
    }

    fn commutate<H: EscHardware>(&mut self, hw: &mut H) {
        self.phase = self.phase.next();
        self.demag.clear_cut();
        if !self.braking {
            self.drive(hw);
        }
        hw.toggle();
    }

    /// Puts the bridge in the current phase and applies power.
    fn drive<H: EscHardware>(&mut self, hw: &mut H) {
        self.phase.drive(self.direction).apply(hw, self.pwm_mode);
        self.apply_power(hw);
    }

    fn apply_power<H: EscHardware>(&mut self, hw: &mut H) {
        self.applied = if self.braking {
            0
        } else {
            self.ceilings.apply(self.current, self.demag.power_cut())
        };
        hw.set_duty(self.applied);
    }

    fn startup_progress<H: EscHardware>(&mut self, hw: &mut H) -> RunState {
        self.startup_commutations = self.startup_commutations.saturating_add(1);

        if self.signal_lost() {
            return self.stop(hw, StopReason::SignalLost);
        }
        if !self.command.above_stop() {
            return self.stop(hw, StopReason::CommandStop);
        }
        if self.startup_ok >= OK_REQUIRED {
            return self.enter_initial_run();
        }
        if self.startup_commutations > self.config.startup_rotations as u16 * 6 {
            warn!("Startup failed after {} commutations", self.startup_commutations);
            return self.stop(hw, StopReason::Stall);
        }
        RunState::Startup
    }

    /// Escalation checks, once per electrical revolution.
    fn run_checks<H: EscHardware>(&mut self, hw: &mut H) -> RunState {
        if self.signal_lost() {
            return self.stop(hw, StopReason::SignalLost);
        }

        let stop_limit = match self.config.deployment {
            Deployment::Tail => STOP_LIMIT_TAIL,
            Deployment::Main | Deployment::Multi => STOP_LIMIT,
        };
        if self.spoolup.stop_count() > stop_limit {
            return self.stop(hw, StopReason::CommandStop);
        }

        if self.period.period() > MAX_RUN_PERIOD4X {
            return self.stop(hw, StopReason::TooSlow);
        }

        if self.initial_run {
            self.initial_run_rotations = self.initial_run_rotations.saturating_sub(1);
            if self.initial_run_rotations == 0 {
                self.initial_run = false;
                self.ceilings.pwm_limit = 255;
                self.retries = 0;
                return RunState::Run;
            }
        }
        self.state
    }

    fn stop<H: EscHardware>(&mut self, hw: &mut H, reason: StopReason) -> RunState {
        hw.all_off();
        self.applied = 0;
        self.startup = false;
        self.initial_run = false;
        self.braking = false;
        self.governor.deactivate();
        self.demag.set_enabled(false);
        warn!("Motor stopped: {:?}", reason);
        RunState::Stopped(reason)
    }

    fn stopped<H: EscHardware>(&mut self, hw: &mut H, reason: StopReason) -> RunState {
        hw.wait(STOP_SETTLE_TICKS);
        match reason {
            StopReason::SignalLost => self.enter_no_signal(hw),
            StopReason::CommandStop => self.enter_power_on_wait(hw),
            StopReason::Stall | StopReason::TooSlow => {
                if !self.signal_lost() && self.command.above_stop() && self.retries < MAX_RETRIES {
                    self.retries += 1;
                    self.direction = self.requested_direction();
                    self.enter_startup(hw)
                } else {
                    self.enter_power_on_wait(hw)
                }
            }
            StopReason::DirectionChange => {
                self.retries = 0;
                if self.signal_lost() {
                    self.enter_no_signal(hw)
                } else if self.command.live && self.command.above_stop() {
                    self.direction = self.requested_direction();
                    self.enter_startup(hw)
                } else {
                    self.enter_power_on_wait(hw)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::sim::{SimBoard, SimTransmitter};
    use super::*;
    use crate::config::demag::CUTOFF_HIGH;
    use crate::config::DemagCompensation;
    use crate::hal::{Fet, Leg};
    use crate::rc_decoder::{PwmFrequency, RcConfig};

    const STEP_TICKS: u32 = 1000;

    fn ppm_command(value: u8) -> ThrottleCommand {
        ThrottleCommand {
            value,
            live: true,
            protocol: Some(RcProtocol::Ppm),
            direction: Direction::Forward,
        }
    }

    fn multi_config() -> EscConfig {
        let mut config = EscConfig::defaults(Deployment::Multi);
        config.throttle_calibration = false;
        config
    }

    /// Steps until `state` is reached or `limit` steps have passed.
    fn step_until(
        esc: &mut Orchestrator,
        board: &mut SimBoard,
        state: RunState,
        limit: usize,
    ) -> bool {
        for _ in 0..limit {
            if esc.step(board) == state {
                return true;
            }
        }
        false
    }

    /// Powered up, armed and waiting for power.
    fn armed(config: EscConfig) -> (Orchestrator, SimBoard) {
        let mut esc = Orchestrator::new(config);
        let mut board = SimBoard::new(STEP_TICKS);
        board.command = ppm_command(0);
        assert_eq!(esc.step(&mut board), RunState::Arm);
        assert_eq!(esc.step(&mut board), RunState::PowerOnWait);
        (esc, board)
    }

    fn running(config: EscConfig) -> (Orchestrator, SimBoard) {
        let (mut esc, mut board) = armed(config);
        board.command = ppm_command(100);
        assert!(step_until(&mut esc, &mut board, RunState::Run, 200));
        (esc, board)
    }

    #[test]
    fn test_boot_to_power_on_wait() {
        let mut esc = Orchestrator::new(multi_config());
        let mut board = SimBoard::new(STEP_TICKS);

        assert_eq!(esc.step(&mut board), RunState::NoSignal);
        assert_eq!(board.tones, [Tone::PowerUp]);

        board.command = ppm_command(0);
        assert_eq!(esc.step(&mut board), RunState::Arm);
        assert_eq!(esc.step(&mut board), RunState::PowerOnWait);
        assert_eq!(board.tones, [Tone::PowerUp, Tone::Armed]);
        assert!(board.all_fets_off());
    }

    #[test]
    fn test_arm_waits_for_stop() {
        let mut esc = Orchestrator::new(multi_config());
        let mut board = SimBoard::new(STEP_TICKS);
        board.command = ppm_command(60);
        esc.step(&mut board);
        for _ in 0..5 {
            assert_eq!(esc.step(&mut board), RunState::Arm);
        }
        board.command = ppm_command(0);
        assert_eq!(esc.step(&mut board), RunState::PowerOnWait);
    }

    #[test]
    fn test_no_signal_tone() {
        let mut esc = Orchestrator::new(multi_config());
        let mut board = SimBoard::new(STEP_TICKS);
        esc.step(&mut board);
        board.extra_ticks = INTERVAL_TICKS as u8;
        assert_eq!(esc.step(&mut board), RunState::NoSignal);
        assert_eq!(board.tones.last(), Some(&Tone::NoSignal));
    }

    #[test]
    fn test_pwm_power_on_hysteresis() {
        let (mut esc, mut board) = armed(multi_config());
        board.command = ThrottleCommand {
            protocol: Some(RcProtocol::Pwm(PwmFrequency::Khz8)),
            ..ppm_command(RCP_STOP + 2)
        };
        assert_eq!(esc.step(&mut board), RunState::PowerOnWait);
        board.command.value = RCP_STOP + POWER_ON_HYSTERESIS_PWM;
        assert_eq!(esc.step(&mut board), RunState::Startup);
    }

    #[test]
    fn test_power_on_wait_signal_loss() {
        let (mut esc, mut board) = armed(multi_config());
        board.command.live = false;
        assert_eq!(esc.step(&mut board), RunState::NoSignal);
        assert_eq!(board.restarts, 1);
    }

    #[test]
    fn test_beacon_after_delay() {
        let (mut esc, mut board) = armed(multi_config());
        let delay = esc.config().beacon_delay.ticks().unwrap();
        let mut elapsed = 0;
        while elapsed + 255 < delay {
            board.extra_ticks = 255;
            esc.step(&mut board);
            elapsed += 255;
        }
        assert!(!board.tones.iter().any(|t| matches!(t, Tone::Beacon(_))));
        board.extra_ticks = 255;
        esc.step(&mut board);
        assert_eq!(board.tones.last(), Some(&Tone::Beacon(80)));
    }

    #[test]
    fn test_startup_resets_phase() {
        let (mut esc, mut board) = armed(multi_config());
        board.command = ppm_command(100);
        assert_eq!(esc.step(&mut board), RunState::Startup);
        assert_eq!(esc.phase(), CommutationPhase::FIRST);
        assert_eq!(esc.period4x(), crate::config::timing::INITIAL_PERIOD4X);

        // Phase 1: B high side on, PWM on C
        assert!(board.fet(Fet::High(Leg::B)));
        assert_eq!(board.pwm_leg, Some(Leg::C));
        assert_eq!(board.pwm_mode, Some(PwmMode::NonDamped));
        // Startup power: 50 x 64 / 64 with the multi boost capped
        assert_eq!(board.duty, 50);
    }

    #[test]
    fn test_startup_reaches_run() {
        let (mut esc, mut board) = armed(multi_config());
        board.command = ppm_command(100);
        assert!(step_until(&mut esc, &mut board, RunState::TransitionToRun, 60));
        assert_eq!(board.pwm_mode, Some(PwmMode::NonDamped));
        assert!(step_until(&mut esc, &mut board, RunState::Run, 120));
        assert_eq!(esc.phase(), CommutationPhase::FIRST);
        assert_eq!(board.pwm_mode, Some(PwmMode::Damped));

        // The estimate settles on four motor steps
        for _ in 0..120 {
            assert_eq!(esc.step(&mut board), RunState::Run);
        }
        let period = esc.period4x() as u32;
        assert!(period > 4 * STEP_TICKS - 100 && period < 4 * STEP_TICKS + 200);
        assert_eq!(esc.applied_power(), 100);
        assert!(board.rpm_toggles > 200);
    }

    #[test]
    fn test_phase_cycles_in_run() {
        let (mut esc, mut board) = running(multi_config());
        let mut phases = Vec::new();
        for _ in 0..12 {
            esc.step(&mut board);
            phases.push(esc.phase().number());
        }
        assert_eq!(phases, [2, 3, 4, 5, 6, 1, 2, 3, 4, 5, 6, 1]);
    }

    #[test]
    fn test_command_stop_in_run() {
        let (mut esc, mut board) = running(multi_config());
        board.command = ppm_command(0);
        board.extra_ticks = STOP_LIMIT - 10;
        for _ in 0..6 {
            assert_eq!(esc.step(&mut board), RunState::Run);
        }
        board.extra_ticks = 20;
        assert!(step_until(
            &mut esc,
            &mut board,
            RunState::Stopped(StopReason::CommandStop),
            6
        ));
        assert!(board.all_fets_off());
        assert_eq!(board.duty, 0);

        assert_eq!(esc.step(&mut board), RunState::PowerOnWait);
    }

    #[test]
    fn test_stall_restarts_with_more_power() {
        let (mut esc, mut board) = running(multi_config());
        board.stalled = true;
        assert!(step_until(
            &mut esc,
            &mut board,
            RunState::Stopped(StopReason::Stall),
            6
        ));
        assert!(board.all_fets_off());

        assert_eq!(esc.step(&mut board), RunState::Startup);
        assert_eq!(esc.phase(), CommutationPhase::FIRST);
        assert_eq!(esc.ceilings().pwm_limit, 75);
        assert_eq!(board.duty, 75);
    }

    #[test]
    fn test_stall_gives_up_after_retries() {
        let (mut esc, mut board) = running(multi_config());
        board.stalled = true;
        let mut stalls = 0;
        for _ in 0..2000 {
            match esc.step(&mut board) {
                RunState::Stopped(StopReason::Stall) => stalls += 1,
                RunState::PowerOnWait => break,
                _ => {}
            }
        }
        assert_eq!(stalls, 1 + MAX_RETRIES as usize);
        assert_eq!(esc.state(), RunState::PowerOnWait);
    }

    #[test]
    fn test_signal_loss_in_run() {
        let (mut esc, mut board) = running(multi_config());
        board.command.live = false;
        assert!(step_until(
            &mut esc,
            &mut board,
            RunState::Stopped(StopReason::SignalLost),
            6
        ));
        assert_eq!(esc.step(&mut board), RunState::NoSignal);
        assert_eq!(board.restarts, 1);
    }

    #[test]
    fn test_direction_reversal_brakes() {
        let mut config = multi_config();
        config.direction = MotorDirection::Bidirectional;
        let (mut esc, mut board) = running(config);
        assert_eq!(esc.direction(), Direction::Forward);

        board.spin_down = true;
        board.command.direction = Direction::Reverse;
        esc.step(&mut board);
        assert!(board.all_fets_off());

        assert!(step_until(
            &mut esc,
            &mut board,
            RunState::Stopped(StopReason::DirectionChange),
            300
        ));
        assert_eq!(esc.step(&mut board), RunState::Startup);
        assert_eq!(esc.direction(), Direction::Reverse);
        // Phase 1 reversed: B high side on, PWM on A
        assert!(board.fet(Fet::High(Leg::B)));
        assert_eq!(board.pwm_leg, Some(Leg::A));
    }

    fn reversing(config: EscConfig) -> (Orchestrator, SimBoard) {
        let (mut esc, mut board) = running(config);
        board.spin_down = true;
        board.command.direction = Direction::Reverse;
        assert_eq!(esc.step(&mut board), RunState::Run);
        assert!(board.all_fets_off());
        (esc, board)
    }

    #[test]
    fn test_signal_loss_while_braking() {
        let mut config = multi_config();
        config.direction = MotorDirection::Bidirectional;
        let (mut esc, mut board) = reversing(config);

        board.command.live = false;
        let mut states = Vec::new();
        for _ in 0..300 {
            let state = esc.step(&mut board);
            states.push(state);
            if state == RunState::NoSignal {
                break;
            }
        }
        assert!(states.contains(&RunState::Stopped(StopReason::SignalLost)));
        assert!(!states.contains(&RunState::Startup));
        assert_eq!(esc.state(), RunState::NoSignal);
        assert!(board.all_fets_off());
    }

    #[test]
    fn test_reversal_ends_at_stop_command() {
        let mut config = multi_config();
        config.direction = MotorDirection::Bidirectional;
        let (mut esc, mut board) = reversing(config);

        board.command.value = 0;
        assert!(step_until(
            &mut esc,
            &mut board,
            RunState::Stopped(StopReason::DirectionChange),
            300
        ));
        assert_eq!(esc.step(&mut board), RunState::PowerOnWait);
        assert!(board.all_fets_off());
    }

    #[test]
    fn test_start_waits_for_battery_reading() {
        let mut config = multi_config();
        config.low_voltage_limit_mv = Some(3300);
        let mut esc = Orchestrator::new(config);
        let mut board = SimBoard::new(STEP_TICKS);
        board.battery_mv = 0;
        board.command = ppm_command(0);
        assert_eq!(esc.step(&mut board), RunState::Arm);
        assert_eq!(esc.step(&mut board), RunState::PowerOnWait);

        board.command = ppm_command(100);
        for _ in 0..5 {
            assert_eq!(esc.step(&mut board), RunState::PowerOnWait);
        }

        board.battery_mv = 12_400;
        assert_eq!(esc.step(&mut board), RunState::Startup);
        assert!(step_until(&mut esc, &mut board, RunState::Run, 200));

        // Below 3 x 3.3 V the ceiling steps down once per revolution
        board.battery_mv = 9_000;
        for _ in 0..60 {
            assert_eq!(esc.step(&mut board), RunState::Run);
        }
        assert!(esc.ceilings().voltage <= 255 - 9);
    }

    #[test]
    fn test_demag_cuts_power_in_run() {
        let mut config = multi_config();
        config.demag_compensation = DemagCompensation::High;
        let (mut esc, mut board) = running(config);
        for _ in 0..120 {
            assert_eq!(esc.step(&mut board), RunState::Run);
        }
        assert!(esc.demag_metric() < CUTOFF_HIGH);

        // The scan only ever sees the post zero-cross level: no stall, but
        // power is cut until the next commutation
        board.demag = true;
        board.duty_log.clear();
        assert_eq!(esc.step(&mut board), RunState::Run);
        assert!(esc.demag_metric() >= CUTOFF_HIGH);
        assert_eq!(board.duty_log.first(), Some(&0));
        assert!(board.duty > 0);
    }

    #[test]
    fn test_pwm_input_boot_to_run() {
        let mut esc = Orchestrator::new(multi_config());
        let mut board = SimBoard::new(STEP_TICKS);
        // 2 kHz PWM at zero throttle
        board.transmitter = Some(SimTransmitter::new(RcConfig::DEFAULT, 1000, 2));

        assert_eq!(esc.step(&mut board), RunState::NoSignal);
        board.idle(20_000);
        assert_eq!(esc.step(&mut board), RunState::Arm);
        assert_eq!(esc.step(&mut board), RunState::PowerOnWait);

        if let Some(tx) = board.transmitter.as_mut() {
            tx.width = 600;
        }
        board.idle(2_000);
        assert_eq!(esc.step(&mut board), RunState::Startup);
        assert!(step_until(&mut esc, &mut board, RunState::Run, 200));

        // A missing pulse keeps the lock and the motor running
        if let Some(tx) = board.transmitter.as_mut() {
            tx.skip = 1;
        }
        for _ in 0..12 {
            assert_eq!(esc.step(&mut board), RunState::Run);
        }
        let command = board.transmitter.as_ref().unwrap().decoder.command();
        assert_eq!(command.protocol, Some(RcProtocol::Pwm(PwmFrequency::Khz2)));
        assert!(command.live);
        assert_eq!(command.value, 150);
    }

    #[test]
    fn test_ppm_input_loss_stops_motor() {
        let mut esc = Orchestrator::new(multi_config());
        let mut board = SimBoard::new(STEP_TICKS);
        // 50 Hz PPM at 1000 µs
        board.transmitter = Some(SimTransmitter::new(RcConfig::DEFAULT, 40_000, 2000));

        esc.step(&mut board);
        board.idle(14 * 40_000);
        assert_eq!(esc.step(&mut board), RunState::Arm);
        assert_eq!(esc.step(&mut board), RunState::PowerOnWait);

        if let Some(tx) = board.transmitter.as_mut() {
            tx.width = 3000;
        }
        board.idle(2 * 40_000);
        assert_eq!(esc.step(&mut board), RunState::Startup);
        assert!(step_until(&mut esc, &mut board, RunState::Run, 200));

        if let Some(tx) = board.transmitter.as_mut() {
            tx.enabled = false;
        }
        assert!(step_until(
            &mut esc,
            &mut board,
            RunState::Stopped(StopReason::SignalLost),
            2000
        ));
        assert_eq!(esc.step(&mut board), RunState::NoSignal);
        let decoder = &board.transmitter.as_ref().unwrap().decoder;
        assert_eq!(decoder.command().protocol, None);
    }

    #[test]
    fn test_throttle_calibration() {
        let mut config = EscConfig::defaults(Deployment::Multi);
        config.throttle_calibration = true;
        let mut esc = Orchestrator::new(config);
        let mut board = SimBoard::new(STEP_TICKS);
        board.command = ppm_command(255);

        assert_eq!(esc.step(&mut board), RunState::Arm);
        assert_eq!(
            esc.step(&mut board),
            RunState::Calibrate(CalibrationStage::Max)
        );
        assert_eq!(board.tones.last(), Some(&Tone::Programming));

        board.raw_widths.extend([500; 16]);
        assert_eq!(
            esc.step(&mut board),
            RunState::Calibrate(CalibrationStage::Min)
        );
        assert_eq!(board.tones.last(), Some(&Tone::CalibrationStep));

        // Stick low, then held there
        board.raw_widths.push_back(250);
        esc.step(&mut board);
        board.extra_ticks = crate::config::calibration::SETTLE_TICKS;
        board.raw_widths.extend([250; 16]);
        assert_eq!(esc.step(&mut board), RunState::Arm);
        assert_eq!(board.tones.last(), Some(&Tone::CalibrationDone));

        let range = ThrottleRange {
            min: 5,
            max: 245,
            center: 122,
        };
        assert_eq!(board.range, Some(range));
        assert_eq!(esc.config().throttle, range);
        let stored = board.stored.unwrap();
        assert_eq!(stored.ppm_min, 5);
        assert_eq!(stored.ppm_max, 245);

        board.command = ppm_command(0);
        assert_eq!(esc.step(&mut board), RunState::PowerOnWait);
    }

    #[test]
    fn test_calibration_timeout() {
        let mut config = EscConfig::defaults(Deployment::Multi);
        config.throttle_calibration = true;
        let mut esc = Orchestrator::new(config);
        let mut board = SimBoard::new(STEP_TICKS);
        board.command = ppm_command(255);
        esc.step(&mut board);
        esc.step(&mut board);

        board.extra_ticks = 101;
        assert_eq!(esc.step(&mut board), RunState::NoSignal);
        assert!(board.stored.is_none());
    }

    #[test]
    fn test_no_calibration_on_pwm() {
        let mut config = EscConfig::defaults(Deployment::Multi);
        config.throttle_calibration = true;
        let mut esc = Orchestrator::new(config);
        let mut board = SimBoard::new(STEP_TICKS);
        board.command = ThrottleCommand {
            protocol: Some(RcProtocol::Pwm(PwmFrequency::Khz2)),
            ..ppm_command(255)
        };
        esc.step(&mut board);
        assert_eq!(esc.step(&mut board), RunState::Arm);
    }

    #[test]
    fn test_temperature_ceiling_in_run() {
        let (mut esc, mut board) = running(multi_config());
        board.temperature = 135;
        for _ in 0..12 {
            esc.step(&mut board);
        }
        assert_eq!(esc.ceilings().temperature, 128);
        board.command = ppm_command(200);
        for _ in 0..12 {
            esc.step(&mut board);
        }
        assert_eq!(esc.applied_power(), 128);
    }

    #[test]
    fn test_main_rotor_governor_engages() {
        let mut config = EscConfig::defaults(Deployment::Main);
        config.throttle_calibration = false;
        config.governor_range = crate::config::GovernorRange::Low;
        let (mut esc, mut board) = armed(config);
        board.command = ppm_command(200);
        assert!(step_until(&mut esc, &mut board, RunState::Run, 200));
        assert!(!esc.governor().active());

        // period4x of about 4000 is inside the low range activation limit
        for _ in 0..12 {
            assert_eq!(esc.step(&mut board), RunState::Run);
        }
        assert!(esc.governor().active());

        // Throttle below 10% drops the governor
        board.command = ppm_command(10);
        for _ in 0..6 {
            esc.step(&mut board);
        }
        assert!(!esc.governor().active());
        assert_eq!(esc.governor().state().integral_error_ext, 0);
    }
}
