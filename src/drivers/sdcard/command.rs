//! Command engine
//!
//! Issues one SD command at a time and polls the controller until it is
//! done. The argument register is always written before the command
//! register, and any DMA unit a data phase needs is armed before the
//! command register write launches the command.

use bitflags::bitflags;
use tock_registers::fields::FieldValue;

use super::config::{PollLimit, SdConfig};
use super::regs::*;
use super::transport::{ReadReg, Transport, WriteReg};

bitflags! {
    /// Command / data event register contents
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventFlags: u32 {
        const DONE = 1 << 0;
        const WRITE_ERROR = 1 << 1;
        const TIMEOUT = 1 << 2;
        const CRC_ERROR = 1 << 3;
    }
}

/// Completion class of one command or data phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    CrcError,
    Timeout,
    /// Card rejected the written block (data phase only)
    WriteError,
}

impl Status {
    /// Classify an event word, or `None` while the phase is still running
    ///
    /// Timeout wins over every other error bit. The write-error bit only
    /// exists on the data event register.
    pub fn from_event(event: EventFlags, data_phase: bool) -> Option<Status> {
        if !event.contains(EventFlags::DONE) {
            return None;
        }
        let status = if event.contains(EventFlags::TIMEOUT) {
            Status::Timeout
        } else if data_phase && event.contains(EventFlags::WRITE_ERROR) {
            Status::WriteError
        } else if event.contains(EventFlags::CRC_ERROR) {
            Status::CrcError
        } else {
            Status::Ok
        };
        Some(status)
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    /// Map a non-Ok status onto the matching error
    pub fn into_result(self, data_phase: bool) -> Result<(), SdError> {
        match (self, data_phase) {
            (Status::Ok, _) => Ok(()),
            (Status::Timeout, false) => Err(SdError::CommandTimeout),
            (Status::CrcError, false) => Err(SdError::CommandCrcError),
            (Status::Timeout, true) => Err(SdError::DataTimeout),
            (Status::CrcError, true) => Err(SdError::DataCrcError),
            (Status::WriteError, _) => Err(SdError::DataWriteError),
        }
    }
}

/// SD driver error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdError {
    /// Command timeout
    CommandTimeout,
    /// Command CRC error
    CommandCrcError,
    /// Data timeout
    DataTimeout,
    /// Data CRC error
    DataCrcError,
    /// Card rejected written data
    DataWriteError,
    /// Card never reported power-up done within the attempt budget
    CardNotReady,
    /// A bring-up command failed under the abort policy
    StepFailed { index: u8, status: Status },
    /// No card has been brought up
    NotInitialized,
    /// Pattern self-test read back wrong words
    SelfTestMismatch { errors: u32 },
}

/// Expected response length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    None,
    /// 48-bit response, low 32 bits in response word 3
    Short,
    /// 136-bit response (CID/CSD)
    Long,
}

impl ResponseKind {
    fn field(self) -> FieldValue<u32, COMMAND::Register> {
        match self {
            ResponseKind::None => COMMAND::RESPONSE::None,
            ResponseKind::Short => COMMAND::RESPONSE::Short,
            ResponseKind::Long => COMMAND::RESPONSE::Long,
        }
    }
}

/// Optional data phase and the bus buffer it moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataPhase {
    None,
    /// Card to memory at `dest`
    Read { dest: u32 },
    /// Memory at `src` to card
    Write { src: u32 },
}

/// One SD command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub index: u8,
    pub argument: u32,
    pub response: ResponseKind,
    pub data: DataPhase,
    pub block_size: u32,
    pub block_count: u32,
}

impl Command {
    /// Command without a data phase
    pub const fn new(index: u8, argument: u32, response: ResponseKind) -> Self {
        Self {
            index,
            argument,
            response,
            data: DataPhase::None,
            block_size: 0,
            block_count: 0,
        }
    }

    /// Add a single-block card-to-memory data phase
    pub const fn with_read(mut self, dest: u32, block_size: u32) -> Self {
        self.data = DataPhase::Read { dest };
        self.block_size = block_size;
        self.block_count = 1;
        self
    }

    /// Add a single-block memory-to-card data phase
    pub const fn with_write(mut self, src: u32, block_size: u32) -> Self {
        self.data = DataPhase::Write { src };
        self.block_size = block_size;
        self.block_count = 1;
        self
    }

    pub const fn has_data(&self) -> bool {
        !matches!(self.data, DataPhase::None)
    }

    /// Command register value: `(index << 8) | (direction << 5) | response`
    pub fn encode(&self) -> u32 {
        let transfer = match self.data {
            DataPhase::None => COMMAND::TRANSFER::None,
            DataPhase::Read { .. } => COMMAND::TRANSFER::Read,
            DataPhase::Write { .. } => COMMAND::TRANSFER::Write,
        };
        (COMMAND::INDEX.val(u32::from(self.index)) + self.response.field() + transfer).value
    }
}

/// Outcome of one [`SdHost::execute`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandResult {
    /// Final status: the data phase's when one ran, else the command phase's
    pub status: Status,
    /// Command phase alone
    pub command_status: Status,
    /// Response buffer; all zero when no response was requested
    pub response: [u32; 4],
}

impl CommandResult {
    /// Low 32 bits of a short response (card status / OCR / RCA word)
    pub const fn short(&self) -> u32 {
        self.response[3]
    }

    /// Relative card address from a SEND_RELATIVE_ADDR response
    pub const fn rca(&self) -> u16 {
        (self.response[3] >> 16) as u16
    }

    /// Response as a 128-bit value (CID/CSD bits shifted down by 8)
    pub const fn long(&self) -> u128 {
        ((self.response[0] as u128) << 96)
            | ((self.response[1] as u128) << 64)
            | ((self.response[2] as u128) << 32)
            | (self.response[3] as u128)
    }
}

/// SD host: the controller transport plus driver configuration
pub struct SdHost<T: Transport> {
    pub(crate) transport: T,
    pub(crate) config: SdConfig,
}

impl<T: Transport> SdHost<T> {
    pub fn new(transport: T, config: SdConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &SdConfig {
        &self.config
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Issue `cmd` and block until it (and its data phase) completes
    pub fn execute(&mut self, cmd: &Command) -> CommandResult {
        log::trace!("SD: CMD{} arg={:#010x}", cmd.index, cmd.argument);

        self.transport.write(WriteReg::Argument, cmd.argument);

        match cmd.data {
            DataPhase::None => {}
            DataPhase::Read { dest } => {
                self.transport.write(WriteReg::BlockSize, cmd.block_size);
                self.transport.write(WriteReg::BlockCount, cmd.block_count);
                self.transport.write(WriteReg::WriterAddress, dest);
            }
            DataPhase::Write { src } => {
                self.transport.write(WriteReg::BlockSize, cmd.block_size);
                self.transport.write(WriteReg::BlockCount, cmd.block_count);
                self.transport.write(WriteReg::ReaderAddress, src);
                self.transport
                    .write(WriteReg::ReaderLength, cmd.block_size * cmd.block_count);
            }
        }

        self.transport.write(WriteReg::Command, cmd.encode());

        let cmd_status = self.wait_event(ReadReg::CmdEvent, self.config.cmd_poll, false);

        // Captured even on error; callers must check the status first
        let mut response = [0u32; 4];
        if cmd.response != ResponseKind::None {
            for (i, word) in response.iter_mut().enumerate() {
                *word = self.transport.read(ReadReg::Response(i as u8));
            }
        }

        if cmd_status != Status::Ok {
            log::debug!("SD: CMD{} failed: {:?}", cmd.index, cmd_status);
            return CommandResult {
                status: cmd_status,
                command_status: cmd_status,
                response,
            };
        }

        let status = if cmd.has_data() {
            let data_status = self.wait_event(ReadReg::DataEvent, self.config.data_poll, true);
            if data_status != Status::Ok {
                log::debug!("SD: CMD{} data phase failed: {:?}", cmd.index, data_status);
            }
            data_status
        } else {
            cmd_status
        };

        CommandResult {
            status,
            command_status: cmd_status,
            response,
        }
    }

    /// Poll an event register until its done bit is set
    fn wait_event(&mut self, reg: ReadReg, limit: PollLimit, data_phase: bool) -> Status {
        let transport = &mut self.transport;
        let status = limit.poll(|| {
            let raw = transport.read(reg);
            #[cfg(feature = "event-trace")]
            log::trace!("SD: {:?}: {:#010x}", reg, raw);
            Status::from_event(EventFlags::from_bits_truncate(raw), data_phase)
        });

        status.unwrap_or_else(|| {
            log::warn!("SD: {:?} poll budget exhausted", reg);
            Status::Timeout
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::sdcard::sim::{Access, SimController};

    fn host() -> SdHost<SimController> {
        SdHost::new(SimController::new(), SdConfig::default())
    }

    #[test]
    fn test_classification_precedence() {
        let done = EventFlags::DONE;
        let all = done | EventFlags::TIMEOUT | EventFlags::CRC_ERROR;
        assert_eq!(Status::from_event(all, false), Some(Status::Timeout));
        assert_eq!(
            Status::from_event(done | EventFlags::CRC_ERROR, false),
            Some(Status::CrcError)
        );
        assert_eq!(Status::from_event(done, false), Some(Status::Ok));
        // Error bits are not interpreted before done
        assert_eq!(Status::from_event(EventFlags::TIMEOUT, false), None);
        // The write-error bit only means something on the data event
        assert_eq!(
            Status::from_event(done | EventFlags::WRITE_ERROR, false),
            Some(Status::Ok)
        );
        assert_eq!(
            Status::from_event(done | EventFlags::WRITE_ERROR | EventFlags::CRC_ERROR, true),
            Some(Status::WriteError)
        );
    }

    #[test]
    fn test_encode() {
        let cmd = Command::new(SD_CMD_ALL_SEND_CID, 0, ResponseKind::Long);
        assert_eq!(cmd.encode(), (2 << 8) | 2);

        let read = Command::new(SD_CMD_READ_SINGLE_BLOCK, 7, ResponseKind::Short)
            .with_read(0x1000, SD_BLOCK_SIZE);
        assert_eq!(read.encode(), (17 << 8) | (1 << 5) | 1);

        let write = Command::new(SD_CMD_WRITE_SINGLE_BLOCK, 7, ResponseKind::Short)
            .with_write(0x1000, SD_BLOCK_SIZE);
        assert_eq!(write.encode(), (24 << 8) | (2 << 5) | 1);
        assert_eq!(COMMAND::INDEX.read(write.encode()), 24);
        assert_eq!(COMMAND::TRANSFER.read(write.encode()), 2);
    }

    #[test]
    fn test_argument_written_before_command() {
        let mut host = host();
        host.execute(&Command::new(SD_CMD_SET_BLOCKLEN, 512, ResponseKind::Short));

        let log = &host.transport.log;
        let arg = log
            .iter()
            .position(|a| *a == Access::Write(WriteReg::Argument, 512));
        let cmd = log
            .iter()
            .position(|a| matches!(a, Access::Write(WriteReg::Command, _)));
        assert!(arg.is_some() && cmd.is_some());
        assert!(arg < cmd);
    }

    #[test]
    fn test_status_read_only_after_done() {
        let mut host = host();
        host.transport.cmd_busy_polls = 3;
        host.transport
            .script_cmd_event(EventFlags::DONE | EventFlags::CRC_ERROR);

        let r = host.execute(&Command::new(SD_CMD_SEND_STATUS, 0, ResponseKind::Short));
        assert_eq!(r.status, Status::CrcError);
        let polls = host
            .transport
            .log
            .iter()
            .filter(|a| **a == Access::Read(ReadReg::CmdEvent))
            .count();
        assert_eq!(polls, 4);
    }

    #[test]
    fn test_response_read_once_in_order_even_on_error() {
        let mut host = host();
        host.transport
            .script_cmd_event(EventFlags::DONE | EventFlags::TIMEOUT);
        host.transport.next_response = Some([1, 2, 3, 4]);

        let r = host.execute(&Command::new(SD_CMD_SEND_CSD, 0, ResponseKind::Long));
        assert_eq!(r.status, Status::Timeout);
        assert_eq!(r.response, [1, 2, 3, 4]);

        let reads: Vec<_> = host
            .transport
            .log
            .iter()
            .filter_map(|a| match a {
                Access::Read(ReadReg::Response(n)) => Some(*n),
                _ => None,
            })
            .collect();
        assert_eq!(reads, [0, 1, 2, 3]);
    }

    #[test]
    fn test_no_response_reads_nothing() {
        let mut host = host();
        let r = host.execute(&Command::new(SD_CMD_GO_IDLE_STATE, 0, ResponseKind::None));
        assert_eq!(r.status, Status::Ok);
        assert_eq!(r.response, [0; 4]);
        assert!(
            !host
                .transport
                .log
                .iter()
                .any(|a| matches!(a, Access::Read(ReadReg::Response(_))))
        );
    }

    #[test]
    fn test_data_phase_status_supersedes() {
        let mut host = host();
        host.transport
            .script_data_event(EventFlags::DONE | EventFlags::CRC_ERROR);

        let cmd = Command::new(SD_CMD_READ_SINGLE_BLOCK, 0, ResponseKind::Short)
            .with_read(0x100, SD_BLOCK_SIZE);
        let r = host.execute(&cmd);
        assert_eq!(r.status, Status::CrcError);
        assert_eq!(r.command_status, Status::Ok);
    }

    #[test]
    fn test_failed_command_skips_data_wait() {
        let mut host = host();
        host.transport
            .script_cmd_event(EventFlags::DONE | EventFlags::TIMEOUT);

        let cmd = Command::new(SD_CMD_READ_SINGLE_BLOCK, 0, ResponseKind::Short)
            .with_read(0x100, SD_BLOCK_SIZE);
        let r = host.execute(&cmd);
        assert_eq!(r.status, Status::Timeout);
        assert_eq!(r.command_status, Status::Timeout);
        assert!(
            !host
                .transport
                .log
                .contains(&Access::Read(ReadReg::DataEvent))
        );
    }

    #[test]
    fn test_bounded_poll_reports_timeout() {
        let mut config = SdConfig::default();
        config.cmd_poll = PollLimit::Attempts(10);
        let mut host = SdHost::new(SimController::new(), config);
        host.transport.cmd_busy_polls = u32::MAX;

        let r = host.execute(&Command::new(SD_CMD_SEND_STATUS, 0, ResponseKind::Short));
        assert_eq!(r.status, Status::Timeout);
    }

    #[test]
    fn test_rca_extraction() {
        let r = CommandResult {
            status: Status::Ok,
            command_status: Status::Ok,
            response: [0, 0, 0, 0x1234_ABCD],
        };
        assert_eq!(r.rca(), 0x1234);
    }

    #[test]
    fn test_into_result() {
        assert_eq!(Status::Ok.into_result(true), Ok(()));
        assert_eq!(Status::Timeout.into_result(false), Err(SdError::CommandTimeout));
        assert_eq!(Status::CrcError.into_result(true), Err(SdError::DataCrcError));
    }
}
