//! Bit-level helpers shared by the flag checks and the sized memory
//! operations.

/// Returns the value with the low `bits + 1` bits set. Saturates to all-ones
/// once the mask would cover the full 64-bit word.
pub fn mask(bits: u32) -> u64 {
    if bits >= 63 {
        u64::MAX
    } else {
        (2u64 << bits) - 1
    }
}

/// True when the number of set bits in the least significant byte is even.
pub fn parity_even(value: u64) -> bool {
    (value & 0xff).count_ones() % 2 == 0
}

/// Interpret up to eight bytes as an unsigned value in the given byte order.
pub fn value_from_bytes(buf: &[u8], big_endian: bool) -> u64 {
    debug_assert!(buf.len() <= 8);
    let mut value = 0u64;
    if big_endian {
        for &byte in buf {
            value = (value << 8) | u64::from(byte);
        }
    } else {
        for (i, &byte) in buf.iter().enumerate() {
            value |= u64::from(byte) << (8 * i);
        }
    }
    value
}

/// Encode the low `buf.len()` bytes of `value` in the given byte order.
pub fn value_to_bytes(value: u64, buf: &mut [u8], big_endian: bool) {
    debug_assert!(buf.len() <= 8);
    let len = buf.len();
    for (i, byte) in buf.iter_mut().enumerate() {
        let shift = if big_endian { len - 1 - i } else { i };
        *byte = (value >> (8 * shift)) as u8;
    }
}

/// Render a byte run as lowercase hex, for the memory access traces.
pub fn hex_bytes(buf: &[u8]) -> String {
    buf.iter().map(|b| format!("{b:02x}")).collect()
}
