//! Driver configuration
//!
//! `SdConfig::default()` reproduces the classic bring-up behaviour: every
//! hardware wait and the card power-up loop are unbounded, and failures on
//! non-gating bring-up steps are logged and skipped.

/// Initialization clock frequency (400 kHz for card identification)
pub const INIT_CLOCK_KHZ: u32 = 400;

/// Operating clock frequency once the card is selected (50 MHz)
pub const DEFAULT_CLOCK_KHZ: u32 = 50_000;

/// Bus clock ceiling while the card runs at default speed (SDR12)
pub const SDR12_MAX_CLOCK_KHZ: u32 = 25_000;

/// Controller command/data timeout in SD clock cycles
pub const DEFAULT_TIMEOUT_CYCLES: u32 = 1 << 19;

/// Default system clock driving the delay timer (100 MHz)
pub const DEFAULT_SYS_CLK_HZ: u32 = 100_000_000;

/// Delay between power-up (ACMD41) attempts
pub const OCR_RETRY_DELAY_MS: u32 = 1;

/// Upper bound on a busy-poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollLimit {
    /// Spin until the condition holds
    Unbounded,
    /// Give up after this many polls
    Attempts(u32),
}

impl PollLimit {
    /// Call `probe` until it yields a value or the budget runs out
    pub fn poll<R>(self, mut probe: impl FnMut() -> Option<R>) -> Option<R> {
        match self {
            PollLimit::Unbounded => loop {
                if let Some(r) = probe() {
                    return Some(r);
                }
                core::hint::spin_loop();
            },
            PollLimit::Attempts(n) => {
                for _ in 0..n {
                    if let Some(r) = probe() {
                        return Some(r);
                    }
                    core::hint::spin_loop();
                }
                None
            }
        }
    }
}

/// What bring-up does when a non-gating step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPolicy {
    /// Log a warning and carry on with the next command
    Continue,
    /// Stop bring-up and report the failing command
    Abort,
}

/// SWITCH_FUNC function group 1 (bus speed / access mode)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AccessMode {
    Sdr12 = 0,
    Sdr25 = 1,
    Sdr50 = 2,
    Sdr104 = 3,
    Ddr50 = 4,
}

/// SWITCH_FUNC function group 3 (driver strength)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DriverStrength {
    TypeB = 0,
    TypeA = 1,
    TypeC = 2,
    TypeD = 3,
}

/// SD driver configuration
#[derive(Debug, Clone, Copy)]
pub struct SdConfig {
    /// Frequency of the clock driving the delay timer
    pub sys_clk_hz: u32,
    /// Identification-phase bus clock
    pub init_clock_khz: u32,
    /// Operating bus clock, capped at [`SDR12_MAX_CLOCK_KHZ`] unless the
    /// card accepts a faster access mode
    pub clock_khz: u32,
    /// Written to the core's command and data timeout registers
    pub controller_timeout_cycles: u32,
    /// Budget for command-phase done polling
    pub cmd_poll: PollLimit,
    /// Budget for data-phase done polling
    pub data_poll: PollLimit,
    /// Budget for the DMA reader done latch
    pub dma_poll: PollLimit,
    /// Budget for the ACMD41 power-up loop
    pub ocr_attempts: PollLimit,
    /// Delay between ACMD41 attempts
    pub ocr_retry_delay_ms: u32,
    /// Access mode requested through SWITCH_FUNC
    pub access_mode: AccessMode,
    /// Driver strength requested through SWITCH_FUNC
    pub driver_strength: DriverStrength,
    /// Reaction to a failed non-gating bring-up step
    pub step_policy: StepPolicy,
    /// Bus address of a 64-byte buffer for SWITCH_FUNC / SCR reads
    ///
    /// Without one, the access-mode and driver-strength switches and the
    /// SCR read are skipped and the card stays at default speed.
    pub scratch_address: Option<u32>,
}

impl Default for SdConfig {
    fn default() -> Self {
        Self {
            sys_clk_hz: DEFAULT_SYS_CLK_HZ,
            init_clock_khz: INIT_CLOCK_KHZ,
            clock_khz: DEFAULT_CLOCK_KHZ,
            controller_timeout_cycles: DEFAULT_TIMEOUT_CYCLES,
            cmd_poll: PollLimit::Unbounded,
            data_poll: PollLimit::Unbounded,
            dma_poll: PollLimit::Unbounded,
            ocr_attempts: PollLimit::Unbounded,
            ocr_retry_delay_ms: OCR_RETRY_DELAY_MS,
            access_mode: AccessMode::Sdr25,
            driver_strength: DriverStrength::TypeD,
            step_policy: StepPolicy::Continue,
            scratch_address: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_poll_gives_up() {
        let mut calls = 0;
        let r: Option<()> = PollLimit::Attempts(5).poll(|| {
            calls += 1;
            None
        });
        assert_eq!(r, None);
        assert_eq!(calls, 5);
    }

    #[test]
    fn test_poll_returns_first_hit() {
        let mut calls = 0u32;
        let r = PollLimit::Unbounded.poll(|| {
            calls += 1;
            (calls == 3).then_some(calls)
        });
        assert_eq!(r, Some(3));
    }

    #[test]
    fn test_default_preserves_unbounded_bring_up() {
        let cfg = SdConfig::default();
        assert_eq!(cfg.ocr_attempts, PollLimit::Unbounded);
        assert_eq!(cfg.step_policy, StepPolicy::Continue);
        assert_eq!(cfg.init_clock_khz, 400);
    }

    #[test]
    fn test_default_needs_no_voltage_switch() {
        let cfg = SdConfig::default();
        // High speed is the fastest 3.3 V mode and matches the 50 MHz clock
        assert_eq!(cfg.access_mode, AccessMode::Sdr25);
        assert_eq!(cfg.clock_khz, 2 * SDR12_MAX_CLOCK_KHZ);
        assert_eq!(cfg.scratch_address, None);
    }
}
