//! Column layouts for CSV telemetry

use serde::{Deserialize, Serialize};

use crate::LayoutError;
use crate::types::{Channel, Color, valid_conversion};

/// Column-indexed channel set for line-oriented CSV packets.
///
/// Columns are numbered from 0 and must stay contiguous, so the channel at
/// index `i` always reads column `i`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CsvLayout {
    channels: Vec<Channel>,
}

impl CsvLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Next column a channel can be added at.
    pub fn next_column(&self) -> usize {
        self.channels.len()
    }

    /// Add a channel reading `column`.
    pub fn insert_field(
        &mut self,
        column: usize,
        name: impl Into<String>,
        color: Color,
        unit: impl Into<String>,
        conversion_factor_a: f32,
        conversion_factor_b: f32,
    ) -> Result<(), LayoutError> {
        self.insert_channel(Channel {
            location: column,
            codec: None,
            name: name.into(),
            color,
            unit: unit.into(),
            conversion_factor_a,
            conversion_factor_b,
        })
    }

    /// Add a fully described channel. Its codec is ignored.
    pub fn insert_channel(&mut self, mut channel: Channel) -> Result<(), LayoutError> {
        let column = channel.location;
        if column < self.channels.len() {
            return Err(LayoutError::OverlapsField { offset: column, existing: column });
        }
        if column > self.channels.len() {
            return Err(LayoutError::ColumnGap { column, next: self.channels.len() });
        }
        if !valid_conversion(channel.conversion_factor_a, channel.conversion_factor_b) {
            return Err(LayoutError::InvalidConversion {
                a: channel.conversion_factor_a,
                b: channel.conversion_factor_b,
            });
        }
        channel.codec = None;
        self.channels.push(channel);
        Ok(())
    }

    /// Remove the last column's channel.
    pub fn remove_field(&mut self, column: usize) -> Result<Channel, LayoutError> {
        if column + 1 != self.channels.len() {
            return Err(LayoutError::NoFieldAt { offset: column });
        }
        self.channels.pop().ok_or(LayoutError::NoFieldAt { offset: column })
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_must_be_contiguous() {
        let mut layout = CsvLayout::new();
        layout.insert_field(0, "a", Color::default(), "", 1.0, 1.0).unwrap();
        assert_eq!(
            layout.insert_field(2, "c", Color::default(), "", 1.0, 1.0),
            Err(LayoutError::ColumnGap { column: 2, next: 1 })
        );
        assert_eq!(
            layout.insert_field(0, "dup", Color::default(), "", 1.0, 1.0),
            Err(LayoutError::OverlapsField { offset: 0, existing: 0 })
        );
        layout.insert_field(1, "b", Color::default(), "", 1.0, 1.0).unwrap();
        assert_eq!(layout.next_column(), 2);
    }

    #[test]
    fn only_the_last_column_can_be_removed() {
        let mut layout = CsvLayout::new();
        layout.insert_field(0, "a", Color::default(), "", 1.0, 1.0).unwrap();
        layout.insert_field(1, "b", Color::default(), "", 1.0, 1.0).unwrap();

        assert_eq!(layout.remove_field(0), Err(LayoutError::NoFieldAt { offset: 0 }));
        assert_eq!(layout.remove_field(1).unwrap().name, "b");
        assert_eq!(layout.remove_field(0).unwrap().name, "a");
        assert_eq!(layout.remove_field(0), Err(LayoutError::NoFieldAt { offset: 0 }));
    }
}
