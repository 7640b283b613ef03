//! Register transport
//!
//! The driver never touches hardware directly: every register access and
//! every DMA buffer access goes through a [`Transport`]. [`MmioTransport`]
//! maps the named registers onto the tock-registers blocks in [`super::regs`].

use core::ptr;
use core::sync::atomic::{Ordering, fence};

use tock_registers::interfaces::{Readable, Writeable};

use super::regs::*;

/// Writable controller registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteReg {
    Argument,
    Command,
    BlockSize,
    BlockCount,
    CmdTimeout,
    DataTimeout,
    /// DMA reader source address (memory to card)
    ReaderAddress,
    /// DMA reader length; starts the reader
    ReaderLength,
    /// DMA writer destination address (card to memory)
    WriterAddress,
    PllAddress,
    PllData,
    PllWrite,
    TimerEnable,
    TimerReload,
    TimerLoad,
    TimerUpdate,
}

/// Readable controller registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadReg {
    CmdEvent,
    DataEvent,
    /// Response buffer word 0..=3
    Response(u8),
    /// DMA reader done latch, 0 or 1
    ReaderDone,
    /// Clock generator DRP ready, 0 or 1
    PllReady,
    TimerValue,
}

/// Primitive access to the SD controller and its DMA memory
pub trait Transport {
    /// Write a 32-bit value to a control register
    fn write(&mut self, reg: WriteReg, value: u32);

    /// Read a 32-bit status register
    fn read(&mut self, reg: ReadReg) -> u32;

    /// Copy bytes out of a DMA-visible buffer at `addr`
    fn read_memory(&mut self, addr: u32, buf: &mut [u8]);

    /// Copy bytes into a DMA-visible buffer at `addr`
    fn write_memory(&mut self, addr: u32, data: &[u8]);

    /// Block until the clock generator accepted the last DRP write
    fn wait_until_ready(&mut self) {
        while self.read(ReadReg::PllReady) == 0 {
            core::hint::spin_loop();
        }
    }
}

/// Base addresses of the controller's CSR blocks
#[derive(Debug, Clone, Copy)]
pub struct CsrMap {
    /// SD core (command, response, events)
    pub core: usize,
    /// Memory-to-card DMA
    pub reader: usize,
    /// Card-to-memory DMA
    pub writer: usize,
    /// Clock generator DRP port
    pub clocker: usize,
    /// Millisecond timer
    pub timer: usize,
}

/// Memory-mapped transport over the SoC CSR bus
pub struct MmioTransport {
    core: &'static SdCoreRegs,
    reader: &'static DmaReaderRegs,
    writer: &'static DmaWriterRegs,
    clocker: &'static ClockerRegs,
    timer: &'static TimerRegs,
}

// Safety: the register blocks are only reached through `&mut self`, and the
// global card slot serializes all access behind its Mutex
unsafe impl Send for MmioTransport {}

impl MmioTransport {
    /// Create a transport for the blocks described by `map`
    ///
    /// # Safety
    ///
    /// Every address in `map` must point at the corresponding, live register
    /// block, and every buffer address later handed to the driver must be a
    /// valid, CPU-visible bus address.
    pub unsafe fn new(map: CsrMap) -> Self {
        unsafe {
            Self {
                core: &*(map.core as *const SdCoreRegs),
                reader: &*(map.reader as *const DmaReaderRegs),
                writer: &*(map.writer as *const DmaWriterRegs),
                clocker: &*(map.clocker as *const ClockerRegs),
                timer: &*(map.timer as *const TimerRegs),
            }
        }
    }
}

impl Transport for MmioTransport {
    fn write(&mut self, reg: WriteReg, value: u32) {
        match reg {
            WriteReg::Argument => self.core.argument.set(value),
            WriteReg::Command => self.core.command.set(value),
            WriteReg::BlockSize => self.core.block_size.set(value),
            WriteReg::BlockCount => self.core.block_count.set(value),
            WriteReg::CmdTimeout => self.core.cmd_timeout.set(value),
            WriteReg::DataTimeout => self.core.data_timeout.set(value),
            WriteReg::ReaderAddress => self.reader.address.set(value),
            WriteReg::ReaderLength => {
                // Buffer contents must be visible before the reader starts
                fence(Ordering::SeqCst);
                self.reader.length.set(value)
            }
            WriteReg::WriterAddress => self.writer.address.set(value),
            WriteReg::PllAddress => self.clocker.drp_address.set(value),
            WriteReg::PllData => self.clocker.drp_data.set(value),
            WriteReg::PllWrite => self.clocker.drp_write.set(value),
            WriteReg::TimerEnable => self.timer.enable.set(value),
            WriteReg::TimerReload => self.timer.reload.set(value),
            WriteReg::TimerLoad => self.timer.load.set(value),
            WriteReg::TimerUpdate => self.timer.update_value.set(value),
        }
    }

    fn read(&mut self, reg: ReadReg) -> u32 {
        match reg {
            ReadReg::CmdEvent => self.core.cmd_event.get(),
            ReadReg::DataEvent => self.core.data_event.get(),
            ReadReg::Response(n) => self.core.response[usize::from(n & 0x3)].get(),
            ReadReg::ReaderDone => self.reader.done.read(DMA_DONE::DONE),
            ReadReg::PllReady => self.clocker.drp_status.read(DRP_STATUS::READY),
            ReadReg::TimerValue => self.timer.value.get(),
        }
    }

    fn read_memory(&mut self, addr: u32, buf: &mut [u8]) {
        // Make sure the DMA engine's writes are observed
        fence(Ordering::SeqCst);
        let src = addr as usize as *const u8;
        for (i, byte) in buf.iter_mut().enumerate() {
            // Safety: `new` requires buffer addresses to be valid bus memory
            *byte = unsafe { ptr::read_volatile(src.add(i)) };
        }
    }

    fn write_memory(&mut self, addr: u32, data: &[u8]) {
        let dst = addr as usize as *mut u8;
        for (i, byte) in data.iter().enumerate() {
            // Safety: `new` requires buffer addresses to be valid bus memory
            unsafe { ptr::write_volatile(dst.add(i), *byte) };
        }
        fence(Ordering::SeqCst);
    }
}
