//! SD card host driver
//!
//! Driver for an SD card behind a LiteSDCard-style core: a command/response
//! engine, a pair of single-block DMA units, an MMCM-based bus clock
//! generator and a countdown timer, all reached through CSR registers.
//!
//! [`init`] brings the card up and parks it in a global slot; [`with_card`]
//! gives serialized access to it.

pub mod block;
pub mod card;
pub mod clock;
pub mod command;
pub mod config;
pub mod decode;
pub mod regs;
pub mod selftest;
pub mod timer;
pub mod transport;

#[cfg(test)]
pub(crate) mod sim;

use spin::Mutex;

pub use card::{CardInfo, CardSession, CardState, CardStatus, SdCard};
pub use clock::ClockParams;
pub use command::{
    Command, CommandResult, DataPhase, EventFlags, ResponseKind, SdError, SdHost, Status,
};
pub use config::{AccessMode, DriverStrength, PollLimit, SdConfig, StepPolicy};
pub use decode::{Cid, Csd, Scr, SwitchStatus};
pub use transport::{CsrMap, MmioTransport, ReadReg, Transport, WriteReg};

/// The brought-up card; every command cycle runs under this lock
static SDCARD: Mutex<Option<SdCard<MmioTransport>>> = Mutex::new(None);

/// Bring up the card behind `map` and store it globally
///
/// Replaces any previously stored card.
///
/// # Safety
///
/// See [`MmioTransport::new`].
pub unsafe fn init(map: CsrMap, config: SdConfig) -> Result<(), SdError> {
    log::info!("Initializing SD card controller at {:#x}...", map.core);

    // Hold the lock across bring-up so nothing else touches the controller
    let mut slot = SDCARD.lock();
    *slot = None;

    let transport = unsafe { MmioTransport::new(map) };
    match SdCard::bring_up(SdHost::new(transport, config)) {
        Ok(card) => {
            *slot = Some(card);
            Ok(())
        }
        Err(e) => {
            log::error!("SD: Failed to initialize card: {:?}", e);
            Err(e)
        }
    }
}

/// Whether [`init`] has stored a card
pub fn is_initialized() -> bool {
    SDCARD.lock().is_some()
}

/// Run `f` on the stored card
pub fn with_card<R>(f: impl FnOnce(&mut SdCard<MmioTransport>) -> R) -> Result<R, SdError> {
    SDCARD.lock().as_mut().map(f).ok_or(SdError::NotInitialized)
}

/// Read one block of the stored card into the bus buffer at `dest`
pub fn global_read_block(block: u32, dest: u32) -> Result<(), SdError> {
    log::trace!("SD global_read_block: block={}", block);
    with_card(|card| card.read_block(block, dest))?.into_result(true)
}

/// Write one block of the stored card from the bus buffer at `src`
pub fn global_write_block(block: u32, src: u32) -> Result<(), SdError> {
    log::trace!("SD global_write_block: block={}", block);
    with_card(|card| card.write_block(block, src))?.into_result(true)
}
