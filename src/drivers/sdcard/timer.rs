//! Millisecond delays on the free-running countdown timer

use super::transport::{ReadReg, Transport, WriteReg};

/// Busy-wait `ms` milliseconds using the timer clocked at `sys_clk_hz`
pub fn delay_ms<T: Transport>(transport: &mut T, sys_clk_hz: u32, ms: u32) {
    let ticks = (sys_clk_hz / 1000).saturating_mul(ms);

    transport.write(WriteReg::TimerEnable, 0);
    transport.write(WriteReg::TimerReload, 0);
    transport.write(WriteReg::TimerLoad, ticks);
    transport.write(WriteReg::TimerEnable, 1);

    loop {
        transport.write(WriteReg::TimerUpdate, 1);
        if transport.read(ReadReg::TimerValue) == 0 {
            break;
        }
        core::hint::spin_loop();
    }
}
