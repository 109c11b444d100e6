//
// ZMODEM protocol specification http://cristal.inria.fr/~doligez/zmodem/zmodem.txt

pub mod constants;
pub use constants::*;

mod crc;
pub use crc::*;

mod err;
pub use err::*;

mod header;
pub use header::*;

mod rz;
pub use rz::*;

mod sz;
pub use sz::*;

#[cfg(test)]
mod tests;

/// Patterns a sender emits when it opens a session: the ASCII lead-in of a
/// hex ZRQINIT header and the binary CRC16/CRC32 frame starts.
const DETECT_PATTERNS: [&[u8]; 3] = [
    b"**\x18B00",
    &[0x2A, 0x18, 0x41, 0x00],
    &[0x2A, 0x18, 0x43, 0x00],
];

/// Returns true when `data` contains the start of a ZMODEM session.
pub fn detect(data: &[u8]) -> bool {
    DETECT_PATTERNS
        .iter()
        .any(|p| data.windows(p.len()).any(|w| w == *p))
}

/// ZDLE-escapes every reserved byte in `data`.
pub fn zdle_encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 2);
    for b in data {
        if ZDLE_ESCAPED.contains(b) {
            out.extend_from_slice(&[ZDLE, *b ^ 0x40]);
        } else {
            out.push(*b);
        }
    }
    out
}

/// Average transfer speed in kB/s since `started_at`.
pub(crate) fn transfer_rate(bytes: u64, started_at: std::time::Instant) -> f64 {
    let elapsed = started_at.elapsed().as_secs_f64().max(0.1);
    bytes as f64 / 1024.0 / elapsed
}

/// Reverses [`zdle_encode`]. A trailing lone ZDLE is dropped.
pub fn zdle_decode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter();
    while let Some(&b) = iter.next() {
        if b == ZDLE {
            if let Some(&escaped) = iter.next() {
                out.push(escaped ^ 0x40);
            }
        } else {
            out.push(b);
        }
    }
    out
}
