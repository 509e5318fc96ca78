//! Configuration module
//!
//! Board constants and the flash image of the persisted parameters.

pub mod params;
pub mod storage;

pub use params::*;
