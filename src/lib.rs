//! carbon-decider: run deferrable jobs when the grid is clean
//!
//! Compares the current grid carbon intensity against the last 24 hours,
//! fetched from Electricity Maps, and answers "run now" or "wait".

pub mod carbon_aware;
pub mod error;

pub use crate::error::{Error, Result};
