//! CSV line decoding

use std::sync::Arc;

use tracing::debug;

use super::DecoderStats;
use crate::Result;
use crate::layout::csv::CsvLayout;
use crate::notify::{Notification, NotificationSink};
use crate::store::{SampleStore, now_millis};

/// Decodes comma-separated lines, one sample per channel per line.
pub struct CsvDecoder {
    layout: Arc<CsvLayout>,
    ratios: Vec<f32>,
    store: Arc<SampleStore>,
    sink: Arc<dyn NotificationSink>,
    next_index: u64,
    lines_seen: u64,
    malformed_lines: u64,
    stats: DecoderStats,
    values: Vec<f32>,
}

impl CsvDecoder {
    pub fn new(layout: Arc<CsvLayout>, store: Arc<SampleStore>, sink: Arc<dyn NotificationSink>) -> Self {
        let ratios = layout.channels().iter().map(|channel| channel.conversion_ratio()).collect();
        Self {
            values: Vec::with_capacity(layout.channel_count()),
            layout,
            ratios,
            next_index: store.sample_count(),
            store,
            sink,
            lines_seen: 0,
            malformed_lines: 0,
            stats: DecoderStats::default(),
        }
    }

    pub fn layout(&self) -> &Arc<CsvLayout> {
        &self.layout
    }

    pub fn store(&self) -> &Arc<SampleStore> {
        &self.store
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Lines dropped because they could not be parsed.
    pub fn malformed_lines(&self) -> u64 {
        self.malformed_lines
    }

    /// Decode one line. Returns whether it produced a sample.
    ///
    /// Blank lines are ignored. A line with too few columns or an unparsable
    /// configured column is dropped and reported, except for the very first
    /// line, which is assumed to be a header.
    pub fn decode_line(&mut self, line: &str) -> Result<bool> {
        if line.trim().is_empty() {
            return Ok(false);
        }
        self.lines_seen += 1;

        if !self.parse(line) {
            if self.lines_seen == 1 {
                debug!(line, "Skipping CSV header");
            } else {
                self.malformed_lines += 1;
                self.sink.notify(Notification::MalformedLine { line: line.to_string() }, 0);
            }
            return Ok(false);
        }

        let index = self.next_index;
        self.store.prepare(index + 1)?;
        for (channel, value) in self.values.iter().enumerate() {
            self.store.write_sample(channel, index, *value)?;
        }
        self.store.write_timestamps(index, 1, now_millis())?;
        self.next_index += 1;
        self.store.commit(self.next_index);

        self.stats.packets_decoded += 1;
        self.stats.serial_packets += 1;
        Ok(true)
    }

    fn parse(&mut self, line: &str) -> bool {
        self.values.clear();
        let mut tokens = line.split(',');
        for ratio in &self.ratios {
            match tokens.next().map(|token| token.trim().parse::<f32>()) {
                Some(Ok(raw)) => self.values.push(raw * ratio),
                _ => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::notify::RecordingSink;
    use crate::test_utils::csv_layout;

    fn decoder() -> (CsvDecoder, Arc<RecordingSink>) {
        let layout = Arc::new(csv_layout());
        let store = Arc::new(SampleStore::new(layout.channel_count(), &StoreConfig::default()).unwrap());
        let sink = Arc::new(RecordingSink::default());
        (CsvDecoder::new(layout, store, sink.clone()), sink)
    }

    #[test]
    fn columns_are_scaled_and_stored() {
        let (mut decoder, _) = decoder();
        assert!(decoder.decode_line("0.5, 3.3 ,0.25").unwrap());

        let store = decoder.store();
        assert_eq!(store.sample_count(), 1);
        assert_eq!(store.value_at(0, 0).unwrap(), Some(0.5));
        assert_eq!(store.value_at(1, 0).unwrap(), Some(3.3));
        assert_eq!(store.value_at(2, 0).unwrap(), Some(250.0));
    }

    #[test]
    fn header_is_skipped_quietly() {
        let (mut decoder, sink) = decoder();
        assert!(!decoder.decode_line("time,voltage,current").unwrap());
        assert!(decoder.decode_line("1,2,3").unwrap());
        assert!(sink.received().is_empty());
        assert_eq!(decoder.malformed_lines(), 0);
    }

    #[test]
    fn malformed_lines_are_dropped_and_reported() {
        let (mut decoder, sink) = decoder();
        decoder.decode_line("1,2,3").unwrap();
        assert!(!decoder.decode_line("4,5").unwrap());
        assert!(!decoder.decode_line("4,x,6").unwrap());
        assert!(!decoder.decode_line("   ").unwrap());
        assert!(decoder.decode_line("7,8,9,extra").unwrap());

        assert_eq!(decoder.store().sample_count(), 2);
        assert_eq!(decoder.malformed_lines(), 2);
        assert_eq!(
            sink.received()[0],
            (Notification::MalformedLine { line: "4,5".to_string() }, 0)
        );
    }
}
