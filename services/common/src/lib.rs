//! Shared types and constants for the BarterBay live-trade services

pub mod constants;
pub mod types;

pub use constants::*;
pub use types::*;
