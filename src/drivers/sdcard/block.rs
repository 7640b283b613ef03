//! Single-block transfers
//!
//! Writes complete when the DMA reader's done latch is set: the command and
//! data events alone do not prove the buffer was drained. Reads complete on
//! the data-phase event; the writer DMA has no latch that is consulted.
//!
//! Block numbers are converted to byte addresses for standard-capacity cards.

use super::card::SdCard;
use super::command::{Command, ResponseKind, Status};
use super::regs::*;
use super::transport::{ReadReg, Transport};

impl<T: Transport> SdCard<T> {
    /// CMD17/CMD24 argument for `block`
    fn data_address(&self, block: u32) -> u32 {
        if self.info().high_capacity {
            block
        } else {
            block.saturating_mul(SD_BLOCK_SIZE)
        }
    }

    /// Read block `block` into the bus buffer at `dest`
    pub fn read_block(&mut self, block: u32, dest: u32) -> Status {
        log::trace!("SD: read block {} -> {:#x}", block, dest);
        let cmd = Command::new(
            SD_CMD_READ_SINGLE_BLOCK,
            self.data_address(block),
            ResponseKind::Short,
        )
        .with_read(dest, SD_BLOCK_SIZE);
        self.host.execute(&cmd).status
    }

    /// Write the bus buffer at `src` to block `block`
    pub fn write_block(&mut self, block: u32, src: u32) -> Status {
        log::trace!("SD: write block {} <- {:#x}", block, src);
        let cmd = Command::new(
            SD_CMD_WRITE_SINGLE_BLOCK,
            self.data_address(block),
            ResponseKind::Short,
        )
        .with_write(src, SD_BLOCK_SIZE);
        let r = self.host.execute(&cmd);

        // No command response, no data phase: the reader may never drain
        if !r.command_status.is_ok() {
            log::warn!("SD: CMD24 for block {} failed: {:?}", block, r.command_status);
            return r.command_status;
        }
        let status = r.status;

        let host = &mut self.host;
        let drained = host
            .config
            .dma_poll
            .poll(|| (host.transport.read(ReadReg::ReaderDone) != 0).then_some(()));
        if drained.is_none() {
            log::warn!("SD: DMA reader did not finish block {}", block);
            return Status::Timeout;
        }

        status
    }
}
