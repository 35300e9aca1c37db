//! Internet checksum (RFC 1071).

/// One's-complement sum of 16-bit big-endian words, odd trailing byte padded
/// with zero, carries folded back into the low 16 bits.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = data.chunks_exact(2);

    for word in &mut words {
        sum = sum.wrapping_add(u16::from_be_bytes([word[0], word[1]]) as u32);
    }

    if let [last] = words.remainder() {
        sum = sum.wrapping_add((*last as u32) << 8);
    }

    // two folds are enough for any carry out of a 32-bit accumulator
    sum = (sum & 0xFFFF) + (sum >> 16);
    sum = (sum & 0xFFFF) + (sum >> 16);

    !(sum as u16)
}

/// True when `data` already carries a valid checksum in its checksum field.
pub fn verify_checksum(data: &[u8]) -> bool {
    checksum(data) == 0
}
