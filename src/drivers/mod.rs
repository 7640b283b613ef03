//! Hardware drivers
//!
//! This module contains drivers for the storage devices we bring up.

pub mod sdcard;
