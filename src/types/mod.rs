//! Core types for packet definitions and decoded data.
//!
//! ## Architecture
//!
//! - [`FieldCodec`] maps raw field bytes to an `f32` (closed set of encodings)
//! - [`ChecksumCodec`] validates the trailing checksum of a packet
//! - [`Channel`] describes one decoded series: where it lives in a packet, how to
//!   decode it and how to present it
//! - [`PacketsBuffer`] is the framer's zero-copy view over complete packets
//! - [`UpdateRate`] and [`Progress`] describe the progress stream handed to
//!   consumers
//!
//! ## Usage Example
//!
//! ```rust
//! use framewire::types::{Channel, Color, FieldCodec};
//!
//! let voltage = Channel {
//!     location: 1,
//!     codec: Some(FieldCodec::Uint16LsbFirst),
//!     name: "Voltage".to_string(),
//!     color: Color::rgb(0xFF, 0x00, 0x00),
//!     unit: "V".to_string(),
//!     conversion_factor_a: 2.0,
//!     conversion_factor_b: 1.0,
//! };
//!
//! let packet = [0xAA, 0xE8, 0x03]; // sync word, then 1000 LSB first
//! let raw = voltage.codec.unwrap().extract_value(&packet[voltage.location..]);
//! assert_eq!(raw * voltage.conversion_ratio(), 500.0);
//! ```

mod channel;
mod checksum;
mod field_codec;
mod packets;
mod update_rate;

pub use channel::{Channel, Color};
pub(crate) use channel::valid_conversion;
pub use checksum::ChecksumCodec;
pub use field_codec::FieldCodec;
pub use packets::PacketsBuffer;
pub use update_rate::{Progress, UpdateRate};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_codec_widths_are_valid(codec in prop::sample::select(FieldCodec::ALL.to_vec())) {
            let width = codec.width();
            prop_assert!(matches!(width, 1 | 2 | 4));

            // A zeroed field always decodes to zero regardless of endianness.
            prop_assert_eq!(codec.extract_value(&[0u8; 4]), 0.0);
        }

        #[test]
        fn prop_channel_ranges_match_codec_width(
            location in 1usize..512,
            codec in prop::sample::select(FieldCodec::ALL.to_vec())
        ) {
            let channel = Channel {
                location,
                codec: Some(codec),
                name: "ch".to_string(),
                color: Color::default(),
                unit: String::new(),
                conversion_factor_a: 1.0,
                conversion_factor_b: 1.0,
            };
            prop_assert_eq!(channel.end() - channel.location + 1, codec.width());
            prop_assert!(channel.overlaps(channel.location, channel.location));
            prop_assert!(channel.overlaps(channel.end(), channel.end() + 8));
            prop_assert!(!channel.overlaps(channel.end() + 1, channel.end() + 8));
        }
    }
}
