//! Agent wiring: options, identity, state and the run loop

pub mod identity;
pub mod options;
pub mod run;
pub mod state;
