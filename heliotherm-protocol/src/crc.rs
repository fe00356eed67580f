//! Vendor checksum used by the Heliotherm serial protocol.

/// Compute the one-byte checksum over `data`.
///
/// Each byte is folded in twice: once as-is and once shifted left by one
/// (truncated to 8 bits). The result is the XOR of all folded bytes, so the
/// checksum is order-independent but still catches any single corrupted byte.
pub fn checksum(data: &[u8]) -> u8 {
    let mut crc: u8 = 0;
    for &byte in data {
        crc ^= byte;
        crc ^= byte << 1;
    }
    crc
}
