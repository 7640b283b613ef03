//! SD clock generator
//!
//! The bus clock comes from a PLL fed by a 100 MHz reference whose output is
//! divided by a fixed 10, so the card sees `10 MHz * multiplier / divider`.
//! [`solve`] picks the PLL pair, [`program`] writes it through the DRP port.

use super::regs::*;
use super::transport::{Transport, WriteReg};

/// Denominator of the ideal ratio (`target_khz : IDEAL_DIVIDER`)
const IDEAL_DIVIDER: u64 = 10_000;

/// Smallest PLL feedback multiplier
pub const MIN_MULTIPLIER: u32 = 2;

/// Largest PLL feedback multiplier
pub const MAX_MULTIPLIER: u32 = 128;

/// Smallest PLL input divider
pub const MIN_DIVIDER: u32 = 1;

/// Largest PLL input divider
pub const MAX_DIVIDER: u32 = 128;

/// Fixed half-count of the output 0 divider (divide by 10)
const CLKOUT0_HALF: u32 = 5;

/// Fixed half-count of the output 1 divider (divide by 2)
const CLKOUT1_HALF: u32 = 1;

/// PLL multiplier/divider pair for one bus frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockParams {
    pub multiplier: u32,
    pub divider: u32,
}

/// Split a counter value into DRP high/low half-counts
///
/// Odd values put the extra cycle in the low half.
const fn half_counts(value: u32) -> u32 {
    ((value / 2) << 6) | (value / 2 + value % 2)
}

impl ClockParams {
    /// DRP word for the feedback multiplier register
    pub const fn multiplier_word(&self) -> u32 {
        DRP_COUNTER_FLAG | half_counts(self.multiplier)
    }

    /// DRP word for the input divider register
    pub const fn divider_word(&self) -> u32 {
        if self.divider == 1 {
            DRP_COUNTER_FLAG
        } else {
            half_counts(self.divider)
        }
    }
}

/// Cross-multiplied distance of `m/d` from `target_khz / IDEAL_DIVIDER`,
/// scaled by `d * IDEAL_DIVIDER`
fn scaled_error(target_khz: u64, m: u64, d: u64) -> u64 {
    (m * IDEAL_DIVIDER).abs_diff(d * target_khz)
}

/// Find the PLL pair closest to `target_khz`
///
/// Exhaustive search over every divider and multiplier; ties keep the first
/// pair found scanning dividers, then multipliers, in ascending order. An
/// unreachable target yields the least-bad pair.
pub fn solve(target_khz: u32) -> ClockParams {
    let target = u64::from(target_khz);
    let mut best: Option<(u64, u64)> = None;

    for d in u64::from(MIN_DIVIDER)..=u64::from(MAX_DIVIDER) {
        for m in u64::from(MIN_MULTIPLIER)..=u64::from(MAX_MULTIPLIER) {
            let better = match best {
                None => true,
                // err(m,d)/d < err(bm,bd)/bd, with both sides multiplied out
                Some((bm, bd)) => {
                    scaled_error(target, m, d) * bd < scaled_error(target, bm, bd) * d
                }
            };
            if better {
                best = Some((m, d));
            }
        }
    }

    let (m, d) = best.unwrap_or((u64::from(MIN_MULTIPLIER), u64::from(MIN_DIVIDER)));
    ClockParams {
        multiplier: m as u32,
        divider: d as u32,
    }
}

/// Write one DRP register and wait for the port to accept it
fn drp_write<T: Transport>(transport: &mut T, addr: u32, data: u32) {
    transport.write(WriteReg::PllAddress, addr);
    transport.write(WriteReg::PllData, data);
    transport.write(WriteReg::PllWrite, 1);
    transport.wait_until_ready();
}

/// Reprogram the clock generator for `target_khz`
pub fn program<T: Transport>(transport: &mut T, target_khz: u32) -> ClockParams {
    let params = solve(target_khz);

    log::debug!(
        "SD: Setting clock to {} kHz (m={}, d={})",
        target_khz,
        params.multiplier,
        params.divider
    );

    drp_write(transport, DRP_CLKFBOUT, params.multiplier_word());
    drp_write(transport, DRP_DIVCLK, params.divider_word());
    drp_write(
        transport,
        DRP_CLKOUT0,
        DRP_COUNTER_FLAG | (CLKOUT0_HALF << 6) | CLKOUT0_HALF,
    );
    drp_write(
        transport,
        DRP_CLKOUT1,
        DRP_COUNTER_FLAG | (CLKOUT1_HALF << 6) | CLKOUT1_HALF,
    );

    params
}
