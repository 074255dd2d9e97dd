//! hawkup core: a hawkBit DDI polling agent that downloads software bundles
//! and hands them to an installer service (RAUC) over D-Bus.

pub mod action;
pub mod agent;
pub mod checksum;
pub mod config;
pub mod ddi;
pub mod error;
pub mod installer;
pub mod logging;
#[cfg(feature = "systemd")]
pub mod sd;
