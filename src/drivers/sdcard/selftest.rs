//! Pattern write/read-back test

use super::card::SdCard;
use super::command::SdError;
use super::regs::SD_BLOCK_SIZE;
use super::transport::Transport;

const WORDS: usize = SD_BLOCK_SIZE as usize / 4;

/// Write `data[i] = i` to `block` through `src`, read it back through `dst`
/// and compare word by word
///
/// Overwrites `block` on the card.
pub fn pattern_round_trip<T: Transport>(
    card: &mut SdCard<T>,
    block: u32,
    src: u32,
    dst: u32,
) -> Result<(), SdError> {
    log::info!("SD: Self-test on block {}", block);

    let mut buf = [0u8; SD_BLOCK_SIZE as usize];
    for (i, word) in buf.chunks_exact_mut(4).enumerate() {
        word.copy_from_slice(&(i as u32).to_le_bytes());
    }
    card.host.transport.write_memory(src, &buf);
    card.write_block(block, src).into_result(true)?;

    card.host.transport.write_memory(dst, &[0u8; SD_BLOCK_SIZE as usize]);
    card.read_block(block, dst).into_result(true)?;

    card.host.transport.read_memory(dst, &mut buf);
    let mut errors = 0u32;
    for (i, word) in buf.chunks_exact(4).enumerate() {
        let got = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        if got != i as u32 {
            log::debug!("SD: word {}: expected {:#x}, got {:#x}", i, i, got);
            errors += 1;
        }
    }

    if errors != 0 {
        log::error!("SD: Self-test failed, {}/{} words wrong", errors, WORDS);
        return Err(SdError::SelfTestMismatch { errors });
    }
    log::info!("SD: Self-test passed");
    Ok(())
}
