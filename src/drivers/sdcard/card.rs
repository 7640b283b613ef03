//! Card bring-up
//!
//! Runs the fixed initialization script against an [`SdHost`] and tracks
//! the card's protocol state. Only the power-up handshake gates bring-up;
//! every other step is best-effort unless [`StepPolicy::Abort`] is set.

use super::clock;
use super::command::{Command, CommandResult, ResponseKind, SdError, SdHost, Status};
use super::config::{AccessMode, SDR12_MAX_CLOCK_KHZ, StepPolicy};
use super::decode::{Cid, Csd, Scr, SwitchStatus};
use super::regs::*;
use super::timer;
use super::transport::{Transport, WriteReg};

/// SWITCH_FUNC group index (0-based) of the access mode
const GROUP_ACCESS_MODE: u32 = 0;

/// SWITCH_FUNC group index (0-based) of the driver strength
const GROUP_DRIVER_STRENGTH: u32 = 2;

/// Protocol state as seen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    Idle,
    /// Reset sent, waiting for power-up
    ReadyWait,
    Identification,
    StandBy,
    Transfer(AccessMode),
}

/// Per-connection state threaded through bring-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardSession {
    pub rca: u16,
    pub state: CardState,
}

impl CardSession {
    pub const fn new() -> Self {
        Self {
            rca: 0,
            state: CardState::Idle,
        }
    }

    /// RCA in the argument position of addressed commands
    pub const fn rca_arg(&self) -> u32 {
        (self.rca as u32) << 16
    }
}

impl Default for CardSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Registers decoded during bring-up, kept for diagnostics
#[derive(Debug, Clone, Default)]
pub struct CardInfo {
    pub ocr: u32,
    /// SDHC/SDXC: block-addressed data commands (OCR CCS bit)
    pub high_capacity: bool,
    pub cid: Option<Cid>,
    pub csd: Option<Csd>,
    pub scr: Option<Scr>,
    pub switch_status: Option<SwitchStatus>,
}

/// R1 card status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardStatus {
    pub raw: u32,
    /// CURRENT_STATE field (4 = tran, 5 = data, ...)
    pub current_state: u8,
}

impl CardStatus {
    pub const fn from_r1(raw: u32) -> Self {
        Self {
            raw,
            current_state: ((raw >> 9) & 0xF) as u8,
        }
    }

    pub const fn ready_for_data(&self) -> bool {
        self.raw & (1 << 8) != 0
    }
}

/// A brought-up SD card
pub struct SdCard<T: Transport> {
    pub(crate) host: SdHost<T>,
    session: CardSession,
    info: CardInfo,
}

impl<T: Transport> SdCard<T> {
    /// Run the initialization script and return the card in transfer state
    ///
    /// Fails only when the power-up handshake runs out of attempts or, with
    /// [`StepPolicy::Abort`], when any step fails.
    pub fn bring_up(host: SdHost<T>) -> Result<Self, SdError> {
        let mut card = Self {
            host,
            session: CardSession::new(),
            info: CardInfo::default(),
        };
        card.run()?;
        Ok(card)
    }

    pub fn session(&self) -> &CardSession {
        &self.session
    }

    pub fn rca(&self) -> u16 {
        self.session.rca
    }

    pub fn state(&self) -> CardState {
        self.session.state
    }

    pub fn info(&self) -> &CardInfo {
        &self.info
    }

    pub fn host(&self) -> &SdHost<T> {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut SdHost<T> {
        &mut self.host
    }

    /// Issue SEND_STATUS (CMD13) for this card
    pub fn send_status(&mut self) -> Result<CardStatus, SdError> {
        let cmd = Command::new(SD_CMD_SEND_STATUS, self.session.rca_arg(), ResponseKind::Short);
        let r = self.host.execute(&cmd);
        r.status.into_result(false)?;
        Ok(CardStatus::from_r1(r.short()))
    }

    fn run(&mut self) -> Result<(), SdError> {
        let timeout = self.host.config.controller_timeout_cycles;
        self.host.transport.write(WriteReg::CmdTimeout, timeout);
        self.host.transport.write(WriteReg::DataTimeout, timeout);

        let init_khz = self.host.config.init_clock_khz;
        clock::program(&mut self.host.transport, init_khz);
        self.delay(1);

        log::debug!("SD: Sending CMD0 (GO_IDLE_STATE)");
        self.step(&Command::new(SD_CMD_GO_IDLE_STATE, 0, ResponseKind::None))?;

        log::debug!("SD: Sending CMD8 (SEND_IF_COND)");
        let r = self.step(&Command::new(SD_CMD_SEND_IF_COND, IF_COND_ARG, ResponseKind::Short))?;
        if r.status.is_ok() && r.short() & 0xFFF != IF_COND_ARG {
            log::debug!("SD: CMD8 response mismatch: {:#x}", r.short());
        }
        self.session.state = CardState::ReadyWait;

        self.power_up()?;
        self.session.state = CardState::Identification;

        log::debug!("SD: Sending CMD2 (ALL_SEND_CID)");
        let r = self.step(&Command::new(SD_CMD_ALL_SEND_CID, 0, ResponseKind::Long))?;
        if r.status.is_ok() {
            Cid::decode(r.long()).log();
        }

        log::debug!("SD: Sending CMD3 (SEND_RELATIVE_ADDR)");
        let r = self.step(&Command::new(SD_CMD_SEND_RELATIVE_ADDR, 0, ResponseKind::Short))?;
        if r.status.is_ok() {
            self.session.rca = r.rca();
            self.session.state = CardState::StandBy;
            log::debug!("SD: RCA={:#06x}", self.session.rca);
        }

        let rca = self.session.rca_arg();

        log::debug!("SD: Sending CMD10 (SEND_CID)");
        let r = self.step(&Command::new(SD_CMD_SEND_CID, rca, ResponseKind::Long))?;
        if r.status.is_ok() {
            self.info.cid = Some(Cid::decode(r.long()));
        }

        log::debug!("SD: Sending CMD9 (SEND_CSD)");
        let r = self.step(&Command::new(SD_CMD_SEND_CSD, rca, ResponseKind::Long))?;
        if r.status.is_ok() {
            let csd = Csd::decode(r.long());
            csd.log();
            self.info.csd = Some(csd);
        }

        log::debug!("SD: Sending CMD7 (SELECT_CARD)");
        let r = self.step(&Command::new(SD_CMD_SELECT_CARD, rca, ResponseKind::Short))?;
        if r.status.is_ok() {
            self.session.state = CardState::Transfer(AccessMode::Sdr12);
        }

        log::debug!("SD: Switching to 4-bit mode");
        self.app_step(&Command::new(
            SD_CMD_APP_SET_BUS_WIDTH,
            BUS_WIDTH_4BIT,
            ResponseKind::Short,
        ))?;

        let scratch = self.host.config.scratch_address;
        if let Some(scratch) = scratch {
            let mode = self.host.config.access_mode;
            if self.switch_function(scratch, GROUP_ACCESS_MODE, mode as u8)? {
                self.session.state = CardState::Transfer(mode);
            }
            let strength = self.host.config.driver_strength;
            self.switch_function(scratch, GROUP_DRIVER_STRENGTH, strength as u8)?;
        } else {
            log::warn!("SD: No scratch buffer, skipping SWITCH_FUNC and SCR");
        }

        let clock_khz = match self.session.state {
            CardState::Transfer(mode) if mode != AccessMode::Sdr12 => self.host.config.clock_khz,
            _ => self.host.config.clock_khz.min(SDR12_MAX_CLOCK_KHZ),
        };
        clock::program(&mut self.host.transport, clock_khz);

        if let Some(scratch) = scratch {
            log::debug!("SD: Sending ACMD51 (SEND_SCR)");
            let r = self.app_step(
                &Command::new(SD_CMD_APP_SEND_SCR, 0, ResponseKind::Short)
                    .with_read(scratch, SCR_SIZE),
            )?;
            if r.status.is_ok() {
                let mut bytes = [0u8; SCR_SIZE as usize];
                self.host.transport.read_memory(scratch, &mut bytes);
                let scr = Scr::decode(bytes);
                log::info!("SD: SCR {:?}", scr);
                self.info.scr = Some(scr);
            }
        }

        log::debug!("SD: Sending CMD16 (SET_BLOCKLEN)");
        self.step(&Command::new(SD_CMD_SET_BLOCKLEN, SD_BLOCK_SIZE, ResponseKind::Short))?;

        log::info!(
            "SD: Card initialized, RCA={:#06x}, {:?} at {} kHz",
            self.session.rca,
            self.session.state,
            clock_khz
        );
        Ok(())
    }

    /// Repeat APP_CMD + SD_SEND_OP_COND until the card reports power-up done
    fn power_up(&mut self) -> Result<(), SdError> {
        log::debug!("SD: Starting ACMD41 loop");
        let attempts = self.host.config.ocr_attempts;
        let delay_ms = self.host.config.ocr_retry_delay_ms;

        let ocr = attempts.poll(|| {
            self.host
                .execute(&Command::new(SD_CMD_APP_CMD, 0, ResponseKind::Short));
            let r = self.host.execute(&Command::new(
                SD_CMD_APP_SEND_OP_COND,
                OCR_ARG_BASE | OCR_ARG_HCS,
                ResponseKind::Short,
            ));
            if r.short() & OCR_POWER_UP_DONE != 0 {
                return Some(r.short());
            }
            self.delay(delay_ms);
            None
        });

        match ocr {
            Some(ocr) => {
                self.info.ocr = ocr;
                self.info.high_capacity = ocr & OCR_CCS != 0;
                log::debug!(
                    "SD: Card ready, OCR={:#010x}, {}",
                    ocr,
                    if self.info.high_capacity {
                        "SDHC/SDXC"
                    } else {
                        "SDSC"
                    }
                );
                Ok(())
            }
            None => {
                log::error!("SD: Card did not finish power-up");
                Err(SdError::CardNotReady)
            }
        }
    }

    /// SWITCH_FUNC (mode 1) for one group, keeping every other group
    ///
    /// Returns whether the card reported `function` as selected; the status
    /// block goes through `scratch`.
    fn switch_function(&mut self, scratch: u32, group: u32, function: u8) -> Result<bool, SdError> {
        let shift = group * 4;
        let arg = (1 << SWITCH_MODE_SHIFT)
            | (SWITCH_KEEP_ALL & !(0xF << shift))
            | (u32::from(function) << shift);
        log::debug!(
            "SD: Sending CMD6 (SWITCH_FUNC) group {} function {}",
            group + 1,
            function
        );

        let cmd = Command::new(SD_CMD_SWITCH_FUNC, arg, ResponseKind::Short)
            .with_read(scratch, SWITCH_STATUS_SIZE);
        let r = self.step(&cmd)?;
        if !r.status.is_ok() {
            return Ok(false);
        }

        let mut block = [0u8; SWITCH_STATUS_SIZE as usize];
        self.host.transport.read_memory(scratch, &mut block);
        let Some(status) = SwitchStatus::decode(&block) else {
            return Ok(false);
        };
        self.info.switch_status = Some(status);

        let selected = status.selected(group as usize + 1);
        if selected != Some(function) {
            log::warn!(
                "SD: Group {} function {} not selected (got {:?})",
                group + 1,
                function,
                selected
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Execute a bring-up command, applying the configured failure policy
    ///
    /// Under [`StepPolicy::Continue`] a failed command is logged and its
    /// result returned so the caller can skip dependent state updates.
    fn step(&mut self, cmd: &Command) -> Result<CommandResult, SdError> {
        let r = self.host.execute(cmd);
        if r.status == Status::Ok {
            return Ok(r);
        }
        match self.host.config.step_policy {
            StepPolicy::Continue => {
                log::warn!("SD: CMD{} failed ({:?}), continuing", cmd.index, r.status);
                Ok(r)
            }
            StepPolicy::Abort => {
                log::error!("SD: CMD{} failed ({:?}), aborting", cmd.index, r.status);
                Err(SdError::StepFailed {
                    index: cmd.index,
                    status: r.status,
                })
            }
        }
    }

    /// APP_CMD with this card's RCA, then `cmd`
    fn app_step(&mut self, cmd: &Command) -> Result<CommandResult, SdError> {
        let rca = self.session.rca_arg();
        self.step(&Command::new(SD_CMD_APP_CMD, rca, ResponseKind::Short))?;
        self.step(cmd)
    }

    fn delay(&mut self, ms: u32) {
        let sys_clk_hz = self.host.config.sys_clk_hz;
        timer::delay_ms(&mut self.host.transport, sys_clk_hz, ms);
    }
}
