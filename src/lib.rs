//! Sensorless brushless ESC control core
//!
//! Back-EMF zero-cross commutation, RC command decoding, speed governor and
//! the power-up/startup/run state machine. Board access goes through the
//! traits in [`hal`].
#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
#[macro_use]
pub(crate) mod fmt;

pub mod config;
pub mod demag;
pub mod governor;
pub mod hal;
pub mod orchestrator;
pub mod period;
pub mod power;
pub mod rc_decoder;
pub mod timing;

pub use config::{Deployment, EscConfig};
pub use orchestrator::{Orchestrator, RunState, StopReason};
