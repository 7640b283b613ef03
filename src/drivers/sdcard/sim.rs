//! Simulated SD controller and card for unit tests
//!
//! Records every register access in order, models the event registers with
//! scriptable errors and busy polls, moves DMA data between a simulated bus
//! memory and a block store, and answers the bring-up command set.

use std::collections::{BTreeMap, VecDeque};

use super::command::EventFlags;
use super::regs::*;
use super::transport::{ReadReg, Transport, WriteReg};

/// Size of the simulated bus memory
pub const RAM_SIZE: usize = 0x4000;

/// One recorded register access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Write(WriteReg, u32),
    Read(ReadReg),
}

/// One command as seen by the card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Issued {
    pub index: u8,
    pub argument: u32,
    /// Preceded by APP_CMD
    pub app: bool,
}

/// Pack a 128-bit register (CRC byte included) into response words
pub fn response_words(register: u128) -> [u32; 4] {
    let v = register >> 8;
    [(v >> 96) as u32, (v >> 64) as u32, (v >> 32) as u32, v as u32]
}

/// CID of the simulated card: MID 0x03, OID "SD", PNM "SU08G"
pub fn sample_cid() -> u128 {
    let pnm = u128::from_be_bytes({
        let mut b = [0u8; 16];
        b[11..].copy_from_slice(b"SU08G");
        b
    });
    (0x03u128 << 120)
        | (u128::from(u16::from_be_bytes(*b"SD")) << 104)
        | (pnm << 64)
        | (0x80u128 << 56)
        | (0x1234_5678u128 << 24)
        | (0x0C5u128 << 8)
        | 1
}

/// Version 2.0 CSD with C_SIZE 15159 (7.4 GiB)
pub fn sample_csd() -> u128 {
    (1u128 << 126) | (0x32u128 << 96) | (9u128 << 80) | (15159u128 << 48) | 1
}

/// SCR: physical layer 3.0x, SDHC security, 1/4-bit bus, CMD23 supported
pub fn sample_scr() -> [u8; 8] {
    let v: u64 = (2 << 56) | (3 << 52) | (0b0101 << 48) | (1 << 47) | (0b10 << 32);
    v.to_be_bytes()
}

pub struct SimController {
    pub log: Vec<Access>,
    pub issued: Vec<Issued>,
    pub ram: Vec<u8>,
    pub blocks: BTreeMap<u32, Vec<u8>>,
    pub pll_words: BTreeMap<u32, u32>,

    /// Event words for the next commands; default is plain done
    pub cmd_events: VecDeque<u32>,
    pub data_events: VecDeque<u32>,
    /// Not-done reads before the event becomes visible
    pub cmd_busy_polls: u32,
    pub data_busy_polls: u32,
    /// Not-done reads of the DMA reader latch after each start
    pub reader_busy_polls: u32,
    /// Non-zero timer reads before expiry
    pub timer_polls: u32,
    /// Response override for the next command
    pub next_response: Option<[u32; 4]>,
    /// `(offset, xor)` applied to every block read
    pub read_corruption: Vec<(usize, u8)>,

    /// ACMD41 replies that still report busy
    pub ocr_busy_replies: u32,
    /// Card capacity status reported in the ready OCR
    pub high_capacity: bool,
    /// SWITCH_FUNC groups (1-based) whose requested function is refused
    pub rejected_groups: Vec<u32>,
    pub rca: u16,
    pub cid: u128,
    pub csd: u128,
    pub scr: [u8; 8],

    argument: u32,
    block_size: u32,
    reader_addr: u32,
    reader_fifo: Vec<u8>,
    reader_pending: u32,
    writer_addr: u32,
    pll_addr: u32,
    pll_data: u32,
    cmd_event: u32,
    data_event: u32,
    response: [u32; 4],
    app: bool,
}

impl SimController {
    pub fn new() -> Self {
        Self {
            log: Vec::new(),
            issued: Vec::new(),
            ram: vec![0; RAM_SIZE],
            blocks: BTreeMap::new(),
            pll_words: BTreeMap::new(),
            cmd_events: VecDeque::new(),
            data_events: VecDeque::new(),
            cmd_busy_polls: 0,
            data_busy_polls: 0,
            reader_busy_polls: 0,
            timer_polls: 0,
            next_response: None,
            read_corruption: Vec::new(),
            ocr_busy_replies: 0,
            high_capacity: true,
            rejected_groups: Vec::new(),
            rca: 0xB368,
            cid: sample_cid(),
            csd: sample_csd(),
            scr: sample_scr(),
            argument: 0,
            block_size: 0,
            reader_addr: 0,
            reader_fifo: Vec::new(),
            reader_pending: 0,
            writer_addr: 0,
            pll_addr: 0,
            pll_data: 0,
            cmd_event: 0,
            data_event: 0,
            response: [0; 4],
            app: false,
        }
    }

    pub fn script_cmd_event(&mut self, event: EventFlags) {
        self.cmd_events.push_back(event.bits());
    }

    pub fn script_data_event(&mut self, event: EventFlags) {
        self.data_events.push_back(event.bits());
    }

    /// Indices of issued commands, ACMDs offset by 100
    pub fn command_trace(&self) -> Vec<u32> {
        self.issued
            .iter()
            .map(|c| u32::from(c.index) + if c.app { 100 } else { 0 })
            .collect()
    }

    fn card_status(&self) -> u32 {
        // CURRENT_STATE = tran, READY_FOR_DATA
        (4 << 9) | (1 << 8)
    }

    fn to_ram(&mut self, data: &[u8]) {
        let start = self.writer_addr as usize;
        self.ram[start..start + data.len()].copy_from_slice(data);
    }

    fn switch_status(&self, argument: u32) -> [u8; 64] {
        let mut status = [0u8; 64];
        status[0..2].copy_from_slice(&100u16.to_be_bytes());
        // Every group supports functions 0..=4
        for g in 0..6 {
            status[2 + 2 * g..4 + 2 * g].copy_from_slice(&0x001Fu16.to_be_bytes());
        }
        for group in 0..6u32 {
            let mut f = ((argument >> (group * 4)) & 0xF) as u8;
            if self.rejected_groups.contains(&(group + 1)) {
                f = 0xF;
            } else if f == 0xF {
                f = 0;
            }
            let byte = 16 - (group / 2) as usize;
            if group % 2 == 0 {
                status[byte] |= f;
            } else {
                status[byte] |= f << 4;
            }
        }
        status[17] = 1;
        status
    }

    fn launch(&mut self, value: u32) {
        let index = COMMAND::INDEX.read(value) as u8;
        let transfer = COMMAND::TRANSFER.read(value);
        let app = self.app;
        let argument = self.argument;
        self.issued.push(Issued {
            index,
            argument,
            app,
        });

        let mut response = [0u32; 4];
        match (index, app) {
            (SD_CMD_GO_IDLE_STATE, _) => {}
            (SD_CMD_SEND_IF_COND, false) => response[3] = argument & 0xFFF,
            (SD_CMD_APP_CMD, _) => response[3] = self.card_status() | (1 << 5),
            (SD_CMD_APP_SEND_OP_COND, true) => {
                response[3] = if self.ocr_busy_replies > 0 {
                    self.ocr_busy_replies -= 1;
                    0x00FF_8000
                } else if self.high_capacity {
                    0x80FF_8000 | OCR_CCS
                } else {
                    0x80FF_8000
                };
            }
            (SD_CMD_ALL_SEND_CID, _) | (SD_CMD_SEND_CID, _) => response = response_words(self.cid),
            (SD_CMD_SEND_CSD, _) => response = response_words(self.csd),
            (SD_CMD_SEND_RELATIVE_ADDR, _) => response[3] = (u32::from(self.rca) << 16) | 0x0500,
            (SD_CMD_SWITCH_FUNC, false) => {
                let status = self.switch_status(argument);
                let len = self.block_size as usize;
                self.to_ram(&status[..len.min(64)]);
                response[3] = self.card_status();
            }
            (SD_CMD_APP_SEND_SCR, true) => {
                let scr = self.scr;
                self.to_ram(&scr);
                response[3] = self.card_status();
            }
            (SD_CMD_READ_SINGLE_BLOCK, _) => {
                let mut data = self
                    .blocks
                    .get(&argument)
                    .cloned()
                    .unwrap_or_else(|| vec![0; SD_BLOCK_SIZE as usize]);
                for &(offset, xor) in &self.read_corruption {
                    data[offset] ^= xor;
                }
                self.to_ram(&data);
                response[3] = self.card_status();
            }
            (SD_CMD_WRITE_SINGLE_BLOCK, _) => {
                let data = self.reader_fifo.clone();
                self.blocks.insert(argument, data);
                response[3] = self.card_status();
            }
            _ => response[3] = self.card_status(),
        }

        self.response = self.next_response.take().unwrap_or(response);
        self.cmd_event = self
            .cmd_events
            .pop_front()
            .unwrap_or(EventFlags::DONE.bits());
        if transfer != 0 {
            self.data_event = self
                .data_events
                .pop_front()
                .unwrap_or(EventFlags::DONE.bits());
        }
        self.app = index == SD_CMD_APP_CMD;
    }
}

impl Transport for SimController {
    fn write(&mut self, reg: WriteReg, value: u32) {
        self.log.push(Access::Write(reg, value));
        match reg {
            WriteReg::Argument => self.argument = value,
            WriteReg::BlockSize => self.block_size = value,
            WriteReg::ReaderAddress => self.reader_addr = value,
            WriteReg::ReaderLength => {
                let start = self.reader_addr as usize;
                self.reader_fifo = self.ram[start..start + value as usize].to_vec();
                self.reader_pending = self.reader_busy_polls;
            }
            WriteReg::WriterAddress => self.writer_addr = value,
            WriteReg::Command => self.launch(value),
            WriteReg::PllAddress => self.pll_addr = value,
            WriteReg::PllData => self.pll_data = value,
            WriteReg::PllWrite => {
                self.pll_words.insert(self.pll_addr, self.pll_data);
            }
            _ => {}
        }
    }

    fn read(&mut self, reg: ReadReg) -> u32 {
        self.log.push(Access::Read(reg));
        match reg {
            ReadReg::CmdEvent => {
                if self.cmd_busy_polls > 0 {
                    self.cmd_busy_polls -= 1;
                    0
                } else {
                    self.cmd_event
                }
            }
            ReadReg::DataEvent => {
                if self.data_busy_polls > 0 {
                    self.data_busy_polls -= 1;
                    0
                } else {
                    self.data_event
                }
            }
            ReadReg::Response(n) => self.response[usize::from(n & 0x3)],
            ReadReg::ReaderDone => {
                if self.reader_pending > 0 {
                    self.reader_pending -= 1;
                    0
                } else {
                    1
                }
            }
            ReadReg::PllReady => 1,
            ReadReg::TimerValue => {
                if self.timer_polls > 0 {
                    self.timer_polls -= 1;
                    1
                } else {
                    0
                }
            }
        }
    }

    fn read_memory(&mut self, addr: u32, buf: &mut [u8]) {
        let start = addr as usize;
        buf.copy_from_slice(&self.ram[start..start + buf.len()]);
    }

    fn write_memory(&mut self, addr: u32, data: &[u8]) {
        let start = addr as usize;
        self.ram[start..start + data.len()].copy_from_slice(data);
    }
}
