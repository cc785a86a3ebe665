//! Channel (dataset) definitions

use serde::{Deserialize, Serialize};

use super::FieldCodec;

/// A 24-bit RGB display color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Color(pub u32);

impl Color {
    /// Build a color from its red, green and blue components.
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color(((r as u32) << 16) | ((g as u32) << 8) | b as u32)
    }

    /// Parse the `0xRRGGBB` form used by the layout line format.
    pub fn from_hex(text: &str) -> Option<Self> {
        let digits = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))?;
        if digits.is_empty() || digits.len() > 6 {
            return None;
        }
        u32::from_str_radix(digits, 16).ok().map(Color)
    }

    /// Format as `0xRRGGBB`.
    pub fn to_hex(self) -> String {
        format!("0x{:06X}", self.0 & 0x00FF_FFFF)
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::rgb(0xFF, 0x00, 0x00)
    }
}

/// One named, typed, colored series decoded from a fixed packet location.
///
/// `location` is a byte offset for binary packets and a column index for CSV
/// packets. Binary channels always carry a codec; CSV channels never do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Byte offset (binary) or column index (CSV) within a packet
    pub location: usize,
    /// Raw encoding of the field, `None` for CSV columns
    pub codec: Option<FieldCodec>,
    /// Display name
    pub name: String,
    /// Display color
    pub color: Color,
    /// Unit of measurement (e.g. "V", "degC")
    pub unit: String,
    /// Divisor of the linear conversion
    pub conversion_factor_a: f32,
    /// Multiplier of the linear conversion
    pub conversion_factor_b: f32,
}

impl Channel {
    /// Number of packet bytes this channel occupies (1 for CSV columns).
    pub fn width(&self) -> usize {
        self.codec.map_or(1, |codec| codec.width())
    }

    /// Last byte offset (inclusive) covered by this channel.
    pub fn end(&self) -> usize {
        self.location + self.width() - 1
    }

    /// Whether `[start, end]` intersects this channel's byte range.
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        start <= self.end() && end >= self.location
    }

    /// The `b / a` ratio applied to every raw value.
    pub fn conversion_ratio(&self) -> f32 {
        self.conversion_factor_b / self.conversion_factor_a
    }
}

/// Check that a pair of conversion factors describes a usable linear conversion.
pub(crate) fn valid_conversion(a: f32, b: f32) -> bool {
    a.is_finite() && b.is_finite() && a != 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(location: usize, codec: FieldCodec) -> Channel {
        Channel {
            location,
            codec: Some(codec),
            name: "Voltage".to_string(),
            color: Color::default(),
            unit: "V".to_string(),
            conversion_factor_a: 1.0,
            conversion_factor_b: 1.0,
        }
    }

    #[test]
    fn color_hex_round_trip() {
        let color = Color::rgb(0x12, 0xAB, 0x0F);
        assert_eq!(color.to_hex(), "0x12AB0F");
        assert_eq!(Color::from_hex("0x12AB0F"), Some(color));
        assert_eq!(Color::from_hex("12AB0F"), None);
        assert_eq!(Color::from_hex("0x1234567"), None);
        assert_eq!(Color::from_hex("0xZZ"), None);
    }

    #[test]
    fn overlap_cases() {
        let existing = channel(4, FieldCodec::Uint32LsbFirst); // bytes 4..=7

        assert!(existing.overlaps(3, 4)); // end inside
        assert!(existing.overlaps(7, 8)); // start inside
        assert!(existing.overlaps(2, 9)); // encompassing
        assert!(existing.overlaps(5, 6)); // contained
        assert!(!existing.overlaps(1, 3));
        assert!(!existing.overlaps(8, 11));
    }

    #[test]
    fn conversion_ratio_is_b_over_a() {
        let mut ch = channel(1, FieldCodec::Uint8);
        ch.conversion_factor_a = 4.0;
        ch.conversion_factor_b = 2.0;
        assert_eq!(ch.conversion_ratio(), 0.5);
        assert!(valid_conversion(4.0, 2.0));
        assert!(!valid_conversion(0.0, 2.0));
        assert!(!valid_conversion(f32::NAN, 2.0));
    }
}
