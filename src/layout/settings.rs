//! Line-oriented layout persistence.
//!
//! Layouts are stored by an external settings loader as `key = value` lines.
//! This module only translates between lines and layout types; it never touches
//! the filesystem. Names and units are kept verbatim after the `" = "`
//! separator, so surrounding spaces survive a round trip.
//!
//! ```text
//! packet type = Binary
//! sync word = 0xAA
//! sync word byte count = 1
//! datasets count = 1
//!
//! dataset location = 1
//! binary processor = uint16 LSB First
//! name = Voltage
//! color = 0xFF0000
//! unit = V
//! conversion factor a = 1.0
//! conversion factor b = 1.0
//!
//! checksum location = 3
//! checksum processor = uint16 Checksum LSB First
//! ```

use super::PacketLayout;
use super::csv::CsvLayout;
use crate::types::{Channel, ChecksumCodec, Color, FieldCodec};
use crate::{Result, TelemetryError};

const NULL: &str = "null";

/// Cursor over settings lines that tracks line numbers for error messages.
///
/// Blank lines are skipped.
pub struct SettingsLines<I> {
    lines: I,
    line_number: usize,
}

impl<'a, I: Iterator<Item = &'a str>> SettingsLines<I> {
    pub fn new(lines: I) -> Self {
        Self { lines, line_number: 0 }
    }

    /// Line number of the most recently read line (1-based).
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Read the next non-blank line and return the trimmed value of `key`.
    pub fn value(&mut self, key: &str) -> Result<&'a str> {
        self.raw_value(key).map(str::trim)
    }

    /// Read the next non-blank line and return the value of `key` as written,
    /// dropping only the single space after `=`.
    pub fn raw_value(&mut self, key: &str) -> Result<&'a str> {
        let line = loop {
            self.line_number += 1;
            match self.lines.next() {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => break line,
                None => return Err(self.error(format!("expected '{key} = ...', found end of input"))),
            }
        };

        let (found_key, value) = line
            .split_once('=')
            .ok_or_else(|| self.error(format!("expected '{key} = ...', found '{line}'")))?;
        if found_key.trim() != key {
            return Err(self.error(format!("expected '{key} = ...', found '{}'", line.trim())));
        }
        Ok(value.strip_prefix(' ').unwrap_or(value))
    }

    /// Read `key` and parse its value.
    pub fn parse<T: std::str::FromStr>(&mut self, key: &str) -> Result<T> {
        let value = self.value(key)?;
        value.parse().map_err(|_| self.error(format!("invalid value '{value}' for '{key}'")))
    }

    fn error(&self, details: String) -> TelemetryError {
        TelemetryError::parse_error(format!("layout settings line {}", self.line_number), details)
    }
}

/// Serialize one channel into its seven settings lines.
pub fn export_field(channel: &Channel) -> Vec<String> {
    vec![
        format!("dataset location = {}", channel.location),
        format!("binary processor = {}", channel.codec.map_or(NULL, |codec| codec.name())),
        format!("name = {}", channel.name),
        format!("color = {}", channel.color.to_hex()),
        format!("unit = {}", channel.unit),
        format!("conversion factor a = {:?}", channel.conversion_factor_a),
        format!("conversion factor b = {:?}", channel.conversion_factor_b),
    ]
}

/// Parse one channel from its seven settings lines.
pub fn import_field<'a, I>(lines: &mut SettingsLines<I>) -> Result<Channel>
where
    I: Iterator<Item = &'a str>,
{
    let location = lines.parse::<usize>("dataset location")?;

    let processor = lines.value("binary processor")?;
    let codec = if processor == NULL {
        None
    } else {
        Some(FieldCodec::from_name(processor).ok_or_else(|| {
            lines.error(format!("unknown binary processor '{processor}'"))
        })?)
    };

    let name = lines.raw_value("name")?.to_string();
    let color_text = lines.value("color")?;
    let color = Color::from_hex(color_text)
        .ok_or_else(|| lines.error(format!("invalid color '{color_text}'")))?;
    let unit = lines.raw_value("unit")?.to_string();
    let conversion_factor_a = lines.parse::<f32>("conversion factor a")?;
    let conversion_factor_b = lines.parse::<f32>("conversion factor b")?;

    Ok(Channel { location, codec, name, color, unit, conversion_factor_a, conversion_factor_b })
}

/// Serialize a binary layout.
pub fn export_layout(layout: &PacketLayout) -> Vec<String> {
    let mut lines = vec![
        "packet type = Binary".to_string(),
        format!("sync word = 0x{:02X}", layout.sync_word()),
        format!("sync word byte count = {}", layout.sync_word_byte_count()),
        format!("datasets count = {}", layout.channel_count()),
        String::new(),
    ];

    for channel in layout.channels() {
        lines.extend(export_field(channel));
        lines.push(String::new());
    }

    match layout.checksum() {
        Some(checksum) => {
            lines.push(format!("checksum location = {}", checksum.offset));
            lines.push(format!("checksum processor = {}", checksum.codec.name()));
        }
        None => {
            lines.push("checksum location = -1".to_string());
            lines.push(format!("checksum processor = {NULL}"));
        }
    }

    lines
}

/// Parse a binary layout, re-validating every field through the layout rules.
pub fn import_layout<'a, I>(lines: I) -> Result<PacketLayout>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut lines = SettingsLines::new(lines.into_iter());

    let packet_type = lines.value("packet type")?;
    if packet_type != "Binary" {
        return Err(lines.error(format!("expected packet type 'Binary', found '{packet_type}'")));
    }

    let sync_text = lines.value("sync word")?;
    let sync_word = sync_text
        .strip_prefix("0x")
        .and_then(|hex| u8::from_str_radix(hex, 16).ok())
        .ok_or_else(|| lines.error(format!("invalid sync word '{sync_text}'")))?;
    let sync_count = lines.parse::<usize>("sync word byte count")?;
    let mut layout = PacketLayout::new();
    layout.set_sync_word(sync_word);
    layout.set_sync_word_byte_count(sync_count).map_err(|e| lines.error(e.to_string()))?;
    let count = lines.parse::<usize>("datasets count")?;

    for _ in 0..count {
        let channel = import_field(&mut lines)?;
        layout.insert_channel(channel)?;
    }

    let checksum_location = lines.parse::<i64>("checksum location")?;
    let processor = lines.value("checksum processor")?;
    if checksum_location >= 0 && processor != NULL {
        let codec = ChecksumCodec::from_name(processor)
            .ok_or_else(|| lines.error(format!("unknown checksum processor '{processor}'")))?;
        layout.insert_checksum(checksum_location as usize, codec)?;
    }

    Ok(layout)
}

/// Serialize a CSV layout.
pub fn export_csv_layout(layout: &CsvLayout) -> Vec<String> {
    let mut lines = vec![
        "packet type = CSV".to_string(),
        format!("datasets count = {}", layout.channel_count()),
        String::new(),
    ];
    for channel in layout.channels() {
        lines.extend(export_field(channel));
        lines.push(String::new());
    }
    lines
}

/// Parse a CSV layout.
pub fn import_csv_layout<'a, I>(lines: I) -> Result<CsvLayout>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut lines = SettingsLines::new(lines.into_iter());

    let packet_type = lines.value("packet type")?;
    if packet_type != "CSV" {
        return Err(lines.error(format!("expected packet type 'CSV', found '{packet_type}'")));
    }
    let count = lines.parse::<usize>("datasets count")?;

    let mut layout = CsvLayout::new();
    for _ in 0..count {
        let channel = import_field(&mut lines)?;
        if channel.codec.is_some() {
            return Err(lines.error("CSV datasets cannot have a binary processor".to_string()));
        }
        layout.insert_channel(channel)?;
    }
    Ok(layout)
}
