//! Checksum and bit-field helpers shared by the protocol decoders.

/// CRC-16/X25 as used by GT06 acknowledgement frames.
///
/// Reflected polynomial 0x1021, initial value 0xFFFF, final complement.
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0x8408;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

/// Extract `width` bits of `value` starting at bit `shift`.
pub fn bit_range(value: u32, shift: u32, width: u32) -> u32 {
    (value >> shift) & ((1u32 << width) - 1)
}
