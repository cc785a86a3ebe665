//! Raw field codecs

use serde::{Deserialize, Serialize};

/// Supported binary field encodings.
///
/// The set is closed: every variant has a fixed width and a persistent name that
/// the layout line format refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldCodec {
    /// 8-bit unsigned integer
    Uint8,
    /// 8-bit signed integer
    Int8,
    /// 16-bit unsigned integer, least significant byte first
    Uint16LsbFirst,
    /// 16-bit unsigned integer, most significant byte first
    Uint16MsbFirst,
    /// 16-bit signed integer, least significant byte first
    Int16LsbFirst,
    /// 16-bit signed integer, most significant byte first
    Int16MsbFirst,
    /// 32-bit unsigned integer, least significant byte first
    Uint32LsbFirst,
    /// 32-bit unsigned integer, most significant byte first
    Uint32MsbFirst,
    /// IEEE 754 single precision, least significant byte first
    Float32LsbFirst,
    /// IEEE 754 single precision, most significant byte first
    Float32MsbFirst,
}

impl FieldCodec {
    /// Every codec, in the order they are offered to users.
    pub const ALL: [FieldCodec; 10] = [
        FieldCodec::Uint8,
        FieldCodec::Int8,
        FieldCodec::Uint16LsbFirst,
        FieldCodec::Uint16MsbFirst,
        FieldCodec::Int16LsbFirst,
        FieldCodec::Int16MsbFirst,
        FieldCodec::Uint32LsbFirst,
        FieldCodec::Uint32MsbFirst,
        FieldCodec::Float32LsbFirst,
        FieldCodec::Float32MsbFirst,
    ];

    /// Number of bytes this codec consumes.
    pub const fn width(&self) -> usize {
        match self {
            FieldCodec::Uint8 | FieldCodec::Int8 => 1,
            FieldCodec::Uint16LsbFirst
            | FieldCodec::Uint16MsbFirst
            | FieldCodec::Int16LsbFirst
            | FieldCodec::Int16MsbFirst => 2,
            FieldCodec::Uint32LsbFirst
            | FieldCodec::Uint32MsbFirst
            | FieldCodec::Float32LsbFirst
            | FieldCodec::Float32MsbFirst => 4,
        }
    }

    /// Name used by the layout line format.
    pub const fn name(&self) -> &'static str {
        match self {
            FieldCodec::Uint8 => "uint8",
            FieldCodec::Int8 => "int8",
            FieldCodec::Uint16LsbFirst => "uint16 LSB First",
            FieldCodec::Uint16MsbFirst => "uint16 MSB First",
            FieldCodec::Int16LsbFirst => "int16 LSB First",
            FieldCodec::Int16MsbFirst => "int16 MSB First",
            FieldCodec::Uint32LsbFirst => "uint32 LSB First",
            FieldCodec::Uint32MsbFirst => "uint32 MSB First",
            FieldCodec::Float32LsbFirst => "float32 LSB First",
            FieldCodec::Float32MsbFirst => "float32 MSB First",
        }
    }

    /// Look a codec up by its persistent name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|codec| codec.name() == name)
    }

    /// Reinterpret `bytes` as this codec's numeric type and widen it to `f32`.
    ///
    /// `bytes` must hold at least [`width`](Self::width) bytes; extra bytes are
    /// ignored. Conversion uses plain `as f32`, so 32-bit integers above 2^24 lose
    /// precision exactly like the device firmware expects.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is shorter than the codec width.
    #[inline]
    pub fn extract_value(&self, bytes: &[u8]) -> f32 {
        match self {
            FieldCodec::Uint8 => bytes[0] as f32,
            FieldCodec::Int8 => bytes[0] as i8 as f32,
            FieldCodec::Uint16LsbFirst => u16::from_le_bytes([bytes[0], bytes[1]]) as f32,
            FieldCodec::Uint16MsbFirst => u16::from_be_bytes([bytes[0], bytes[1]]) as f32,
            FieldCodec::Int16LsbFirst => i16::from_le_bytes([bytes[0], bytes[1]]) as f32,
            FieldCodec::Int16MsbFirst => i16::from_be_bytes([bytes[0], bytes[1]]) as f32,
            FieldCodec::Uint32LsbFirst => {
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32
            }
            FieldCodec::Uint32MsbFirst => {
                u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32
            }
            FieldCodec::Float32LsbFirst => {
                f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
            }
            FieldCodec::Float32MsbFirst => {
                f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
            }
        }
    }
}

impl std::fmt::Display for FieldCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
