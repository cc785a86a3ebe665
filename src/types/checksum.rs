//! Packet checksum algorithms

use serde::{Deserialize, Serialize};

/// Supported checksum algorithms.
///
/// Only the additive 16-bit checksum exists. Two bit flips in the same column
/// of two words cancel out and go undetected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChecksumCodec {
    /// Sum of all little-endian 16-bit payload words modulo 65536, stored LSB first.
    Uint16LsbFirst,
}

impl ChecksumCodec {
    /// Every checksum algorithm.
    pub const ALL: [ChecksumCodec; 1] = [ChecksumCodec::Uint16LsbFirst];

    /// Width of the checksum field, which is also the payload word size.
    pub const fn width(&self) -> usize {
        match self {
            ChecksumCodec::Uint16LsbFirst => 2,
        }
    }

    /// Name used by the layout line format.
    pub const fn name(&self) -> &'static str {
        match self {
            ChecksumCodec::Uint16LsbFirst => "uint16 Checksum LSB First",
        }
    }

    /// Look an algorithm up by its persistent name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|codec| codec.name() == name)
    }

    /// Compute the checksum of `payload`.
    ///
    /// Returns `None` when the payload length is not a whole number of words.
    pub fn compute(&self, payload: &[u8]) -> Option<u16> {
        match self {
            ChecksumCodec::Uint16LsbFirst => {
                if payload.len() % 2 != 0 {
                    return None;
                }
                Some(
                    payload
                        .chunks_exact(2)
                        .fold(0u16, |sum, word| sum.wrapping_add(u16::from_le_bytes([word[0], word[1]]))),
                )
            }
        }
    }

    /// Validate `packet` against the checksum stored at `offset`.
    ///
    /// The payload is every byte after the sync word and before the checksum. A
    /// payload with an odd byte count, or a packet too short to hold the checksum,
    /// never validates.
    pub fn validate(&self, packet: &[u8], offset: usize) -> bool {
        let Some(stored) = packet.get(offset..offset + self.width()) else {
            return false;
        };
        let Some(payload) = packet.get(1..offset) else {
            return false;
        };

        match self {
            ChecksumCodec::Uint16LsbFirst => self
                .compute(payload)
                .is_some_and(|sum| sum == u16::from_le_bytes([stored[0], stored[1]])),
        }
    }
}

impl std::fmt::Display for ChecksumCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn validates_matching_sum() {
        // sync, one u16 = 100, checksum = 100
        let packet = [0xAA, 0x64, 0x00, 0x64, 0x00];
        assert!(ChecksumCodec::Uint16LsbFirst.validate(&packet, 3));

        let corrupted = [0xAA, 0x64, 0x00, 0x65, 0x00];
        assert!(!ChecksumCodec::Uint16LsbFirst.validate(&corrupted, 3));
    }

    #[test]
    fn sum_wraps_modulo_65536() {
        let payload = [0xFF, 0xFF, 0x02, 0x00];
        assert_eq!(ChecksumCodec::Uint16LsbFirst.compute(&payload), Some(1));
    }

    #[test]
    fn odd_payload_never_validates() {
        // payload is bytes 1..2 (one byte), checksum of zero would otherwise match
        let packet = [0xAA, 0x00, 0x00, 0x00];
        assert!(!ChecksumCodec::Uint16LsbFirst.validate(&packet, 2));
        assert_eq!(ChecksumCodec::Uint16LsbFirst.compute(&[0x01]), None);
    }

    #[test]
    fn truncated_packet_never_validates() {
        assert!(!ChecksumCodec::Uint16LsbFirst.validate(&[0xAA, 0x00, 0x00], 3));
    }

    #[test]
    fn name_round_trips() {
        let codec = ChecksumCodec::Uint16LsbFirst;
        assert_eq!(ChecksumCodec::from_name(codec.name()), Some(codec));
    }

    proptest! {
        #[test]
        fn prop_computed_sum_always_validates(words in prop::collection::vec(any::<u16>(), 0..64)) {
            let codec = ChecksumCodec::Uint16LsbFirst;
            let mut packet = vec![0xAA];
            for word in &words {
                packet.extend_from_slice(&word.to_le_bytes());
            }
            let expected = words.iter().fold(0u16, |acc, w| acc.wrapping_add(*w));
            let sum = codec.compute(&packet[1..]).expect("even payload");
            prop_assert_eq!(sum, expected);

            let offset = packet.len();
            packet.extend_from_slice(&sum.to_le_bytes());
            prop_assert!(codec.validate(&packet, offset));
        }

        #[test]
        fn prop_single_bit_flip_is_detected(
            words in prop::collection::vec(any::<u16>(), 1..32),
            flip in any::<prop::sample::Index>(),
            bit in 0u8..8
        ) {
            // A single flip changes the sum by +-2^k (k < 16), never 0 mod 65536.
            let codec = ChecksumCodec::Uint16LsbFirst;
            let mut packet = vec![0xAA];
            for word in &words {
                packet.extend_from_slice(&word.to_le_bytes());
            }
            let offset = packet.len();
            let sum = codec.compute(&packet[1..]).expect("even payload");
            packet.extend_from_slice(&sum.to_le_bytes());

            let target = 1 + flip.index(offset - 1);
            packet[target] ^= 1 << bit;
            prop_assert!(!codec.validate(&packet, offset));
        }
    }
}
