//! Motor control task
//!
//! Runs the orchestrator in thread mode. Each step does at most one
//! commutation (or one idle-state check), so yielding between steps keeps the
//! analog task running.

use embassy_futures::yield_now;
use esc_core::{EscConfig, Orchestrator, RunState};

use crate::board::Board;
use crate::fmt::*;

#[embassy_executor::task]
pub async fn motor_control_task(mut board: Board, config: EscConfig) {
    info!("Motor control task started ({:?})", config.deployment);

    let mut orchestrator = Orchestrator::new(config);
    let mut last = orchestrator.state();

    loop {
        let state = orchestrator.step(&mut board);
        if state != last {
            if state == RunState::Run {
                info!(
                    "Running: period4x 0x{:04X}, power {}",
                    orchestrator.period4x(),
                    orchestrator.applied_power()
                );
            }
            last = state;
        }

        yield_now().await;
    }
}
