//! The Internet checksum (RFC 1071).

/// Compute the Internet checksum of `data`.
///
/// Consecutive byte pairs are summed as big-endian 16-bit words; a trailing
/// odd byte is the high byte of a zero-padded word. Carries are folded back
/// into the low 16 bits and the one's complement is returned. The returned
/// value is in network order when written with `u16::to_be_bytes`, which is
/// what the pnet `set_checksum` setters do.
///
/// The empty buffer checksums to `0xFFFF`.
#[must_use]
pub fn compute(data: &[u8]) -> u16 {
    let mut words = data.chunks_exact(2);
    let mut sum: u64 = words
        .by_ref()
        .map(|w| u64::from(u16::from_be_bytes([w[0], w[1]])))
        .sum();
    if let [last] = words.remainder() {
        sum += u64::from(*last) << 8;
    }
    fold(sum)
}

const fn fold(mut sum: u64) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum >> 16) + (sum & 0xFFFF);
    }
    !sum as u16
}
