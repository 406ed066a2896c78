//! CRC-16 validation for console frames.
//!
//! Every binary payload the console sends or accepts carries a trailing
//! big-endian CRC-16 (CCITT polynomial 0x1021, init 0xffff, no reflection).
//! Because the CRC is appended big-endian with no output xor, running the
//! same CRC over payload-plus-trailer yields zero for an intact frame.

use crc_all::Crc;

/// Compute the CRC over `bytes`.
pub fn compute(bytes: &[u8]) -> u16 {
    let mut crc = Crc::<u16>::new(0x1021, 16, 0xffff, 0x0000, false);
    crc.update(bytes)
}

/// True iff `bytes` ends in a correct big-endian CRC trailer.
pub fn is_valid(bytes: &[u8]) -> bool {
    compute(bytes) == 0
}

/// Append the big-endian CRC trailer to `buf`.
pub fn append(buf: &mut Vec<u8>) {
    let crc = compute(buf);
    buf.extend_from_slice(&crc.to_be_bytes());
}
