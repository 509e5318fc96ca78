//! Task modules

pub mod motor_control;
pub mod rc_input;
pub mod voltage_monitor;

pub use motor_control::motor_control_task;
pub use rc_input::{rc_capture_task, rc_tick_task};
pub use voltage_monitor::voltage_monitor_task;
