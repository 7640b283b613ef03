//! sdcore - SD card host driver core
//!
//! Bring-up, command, block transfer and clock control for an SD card
//! attached to a LiteSDCard-style controller, for bare-metal firmware.
//!
//! The crate is `no_std`; the firmware image linking it provides the entry
//! point and the panic handler, and hands console output to [`logger`].

#![cfg_attr(not(test), no_std)]

pub mod drivers;
pub mod logger;
