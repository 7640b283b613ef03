//! SD Core Register Definitions using tock-registers
//!
//! This module defines the CSR blocks of the SD card controller core, its
//! DMA reader/writer, the clock generator reconfiguration port and the
//! free-running timer, plus the SD command set used by the driver.
//!
//! All blocks use 32-bit CSR words laid out back to back.

use tock_registers::register_bitfields;
use tock_registers::registers::{ReadOnly, WriteOnly};

// ============================================================================
// Register Bitfield Definitions
// ============================================================================

register_bitfields! [
    u32,
    /// Command register - written last to launch a command
    pub COMMAND [
        /// Expected response length
        RESPONSE OFFSET(0) NUMBITS(2) [
            None = 0,
            Short = 1,
            Long = 2
        ],
        /// Data-phase direction
        TRANSFER OFFSET(5) NUMBITS(2) [
            None = 0,
            Read = 1,
            Write = 2
        ],
        /// Command index
        INDEX OFFSET(8) NUMBITS(6) []
    ],

    /// DMA reader completion latch
    pub DMA_DONE [
        DONE OFFSET(0) NUMBITS(1) []
    ],

    /// Clock generator reconfiguration port status
    pub DRP_STATUS [
        /// Last DRP write has been accepted
        READY OFFSET(0) NUMBITS(1) []
    ]
];

// ============================================================================
// Register Block Memory Maps
// ============================================================================

/// SD core command/response block
#[repr(C)]
pub struct SdCoreRegs {
    /// Command argument
    pub argument: WriteOnly<u32>,
    /// Command index, response type and transfer direction
    pub command: WriteOnly<u32, COMMAND::Register>,
    /// Response buffer (word 3 holds the low 32 bits of the response)
    pub response: [ReadOnly<u32>; 4],
    /// Command phase event
    pub cmd_event: ReadOnly<u32>,
    /// Data phase event
    pub data_event: ReadOnly<u32>,
    /// Data-phase block size in bytes
    pub block_size: WriteOnly<u32>,
    /// Data-phase block count
    pub block_count: WriteOnly<u32>,
    /// Command timeout in controller clock cycles
    pub cmd_timeout: WriteOnly<u32>,
    /// Data timeout in controller clock cycles
    pub data_timeout: WriteOnly<u32>,
}

/// Memory-to-card DMA unit (feeds write commands)
#[repr(C)]
pub struct DmaReaderRegs {
    /// Source bus address
    pub address: WriteOnly<u32>,
    /// Transfer length in bytes; writing it starts the unit
    pub length: WriteOnly<u32>,
    /// Set once the unit has drained the buffer
    pub done: ReadOnly<u32, DMA_DONE::Register>,
}

/// Card-to-memory DMA unit (drains read commands)
#[repr(C)]
pub struct DmaWriterRegs {
    /// Destination bus address
    pub address: WriteOnly<u32>,
}

/// Clock generator dynamic reconfiguration port
#[repr(C)]
pub struct ClockerRegs {
    /// DRP register address
    pub drp_address: WriteOnly<u32>,
    /// DRP data word
    pub drp_data: WriteOnly<u32>,
    /// Write 1 to issue the DRP write
    pub drp_write: WriteOnly<u32>,
    /// DRP ready status
    pub drp_status: ReadOnly<u32, DRP_STATUS::Register>,
}

/// Free-running countdown timer
#[repr(C)]
pub struct TimerRegs {
    /// One-shot load value
    pub load: WriteOnly<u32>,
    /// Reload value (0 = one-shot)
    pub reload: WriteOnly<u32>,
    /// Enable
    pub enable: WriteOnly<u32>,
    /// Write 1 to latch the current count into `value`
    pub update_value: WriteOnly<u32>,
    /// Latched count
    pub value: ReadOnly<u32>,
}

// ============================================================================
// Clock Generator DRP Addresses
// ============================================================================

/// Feedback multiplier (CLKFBOUT) register
pub const DRP_CLKFBOUT: u32 = 0x14;

/// Input divider (DIVCLK) register
pub const DRP_DIVCLK: u32 = 0x16;

/// Output 0 divider register
pub const DRP_CLKOUT0: u32 = 0x08;

/// Output 1 divider register
pub const DRP_CLKOUT1: u32 = 0x0A;

/// Flag bit 12 of a DRP counter word
pub const DRP_COUNTER_FLAG: u32 = 0x1000;

// ============================================================================
// SD Commands
// ============================================================================

/// GO_IDLE_STATE - Resets all cards to idle state
pub const SD_CMD_GO_IDLE_STATE: u8 = 0;

/// ALL_SEND_CID - Asks all cards to send their CID
pub const SD_CMD_ALL_SEND_CID: u8 = 2;

/// SEND_RELATIVE_ADDR - Ask card to publish a new RCA
pub const SD_CMD_SEND_RELATIVE_ADDR: u8 = 3;

/// SWITCH_FUNC - Check/switch card function
pub const SD_CMD_SWITCH_FUNC: u8 = 6;

/// SELECT/DESELECT_CARD - Toggles card between stand-by and transfer states
pub const SD_CMD_SELECT_CARD: u8 = 7;

/// SEND_IF_COND - Sends SD interface condition
pub const SD_CMD_SEND_IF_COND: u8 = 8;

/// SEND_CSD - Asks card to send its CSD
pub const SD_CMD_SEND_CSD: u8 = 9;

/// SEND_CID - Asks card to send its CID
pub const SD_CMD_SEND_CID: u8 = 10;

/// SEND_STATUS - Asks card to send its status
pub const SD_CMD_SEND_STATUS: u8 = 13;

/// SET_BLOCKLEN - Sets block length for block commands
pub const SD_CMD_SET_BLOCKLEN: u8 = 16;

/// READ_SINGLE_BLOCK - Reads a single block
pub const SD_CMD_READ_SINGLE_BLOCK: u8 = 17;

/// WRITE_SINGLE_BLOCK - Writes a single block
pub const SD_CMD_WRITE_SINGLE_BLOCK: u8 = 24;

/// APP_CMD - Indicates next command is application specific
pub const SD_CMD_APP_CMD: u8 = 55;

/// SET_BUS_WIDTH (ACMD6) - Sets bus width
pub const SD_CMD_APP_SET_BUS_WIDTH: u8 = 6;

/// SD_SEND_OP_COND (ACMD41) - Sends host capacity support info
pub const SD_CMD_APP_SEND_OP_COND: u8 = 41;

/// SEND_SCR (ACMD51) - Reads SD Configuration Register
pub const SD_CMD_APP_SEND_SCR: u8 = 51;

// ============================================================================
// Command Arguments
// ============================================================================

/// SEND_IF_COND argument: 2.7-3.6V + check pattern
pub const IF_COND_ARG: u32 = 0x0000_01AA;

/// ACMD41 base argument: XPC + full voltage window
pub const OCR_ARG_BASE: u32 = 0x10FF_8000;

/// ACMD41 host capacity support bits
pub const OCR_ARG_HCS: u32 = 0x6000_0000;

/// Card power-up done (bit 31 of the OCR)
pub const OCR_POWER_UP_DONE: u32 = 1 << 31;

/// Card capacity status (bit 30 of the OCR): block-addressed SDHC/SDXC
pub const OCR_CCS: u32 = 1 << 30;

/// ACMD6 argument selecting the 4-bit bus
pub const BUS_WIDTH_4BIT: u32 = 0x2;

/// SWITCH_FUNC mode bit (1 = switch, 0 = check)
pub const SWITCH_MODE_SHIFT: u32 = 31;

/// SWITCH_FUNC "keep current" pattern for all groups
pub const SWITCH_KEEP_ALL: u32 = 0x00FF_FFFF;

// ============================================================================
// Block Sizes
// ============================================================================

/// Data block size for read/write commands
pub const SD_BLOCK_SIZE: u32 = 512;

/// SWITCH_FUNC status block size (512 bits)
pub const SWITCH_STATUS_SIZE: u32 = 64;

/// SCR block size (64 bits)
pub const SCR_SIZE: u32 = 8;
