//! Chunked UTF-8 line framing with resumable partial-line state (§4.3).
//!
//! A `LineReader` consumes arbitrarily-partitioned byte chunks and yields
//! non-empty, trimmed lines regardless of where chunk boundaries fall inside
//! a line. `flush()` emits whatever remains in the partial-line buffer once
//! the source is exhausted.

use serde::{Deserialize, Serialize};

/// Partial-line buffer cap. On overflow the *tail* (most recent bytes) is
/// retained, since callers still want a best-effort line rather than
/// unbounded memory growth on a malformed or binary source.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 65_536;

#[derive(Debug, Clone)]
pub struct LineReaderConfig {
    pub max_buffer_size: usize,
}

impl Default for LineReaderConfig {
    fn default() -> Self {
        LineReaderConfig {
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
        }
    }
}

/// Snapshottable parsing position, per §4.3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineReaderState {
    pub bytes_processed: u64,
    pub lines_emitted: u64,
    pub partial_line: Vec<u8>,
}

pub struct LineReader {
    config: LineReaderConfig,
    state: LineReaderState,
}

impl LineReader {
    pub fn new(config: LineReaderConfig) -> Self {
        LineReader {
            config,
            state: LineReaderState {
                bytes_processed: 0,
                lines_emitted: 0,
                partial_line: Vec::new(),
            },
        }
    }

    pub fn state(&self) -> &LineReaderState {
        &self.state
    }

    /// Fully re-establish parsing position from a prior snapshot.
    pub fn restore_state(&mut self, state: LineReaderState) {
        self.state = state;
    }

    /// Feed the next byte chunk, returning the non-empty trimmed lines it
    /// completed. Bytes that don't yet form a full line stay buffered.
    pub fn process_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.state.bytes_processed += chunk.len() as u64;
        self.state.partial_line.extend_from_slice(chunk);

        let mut lines = Vec::new();
        loop {
            let Some(pos) = self.state.partial_line.iter().position(|&b| b == b'\n') else {
                break;
            };
            let raw = self.state.partial_line.drain(..=pos).collect::<Vec<u8>>();
            let raw = &raw[..raw.len() - 1]; // drop the newline itself
            if let Some(line) = Self::decode_and_trim(raw) {
                self.state.lines_emitted += 1;
                lines.push(line);
            }
        }

        if self.state.partial_line.len() > self.config.max_buffer_size {
            let excess = self.state.partial_line.len() - self.config.max_buffer_size;
            self.state.partial_line.drain(..excess);
        }

        lines
    }

    /// Emit whatever remains in the partial-line buffer. Call once after the
    /// source is exhausted; calling `process_chunk` afterward is still valid.
    pub fn flush(&mut self) -> Option<String> {
        if self.state.partial_line.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.state.partial_line);
        let line = Self::decode_and_trim(&raw);
        if line.is_some() {
            self.state.lines_emitted += 1;
        }
        line
    }

    fn decode_and_trim(raw: &[u8]) -> Option<String> {
        let text = String::from_utf8_lossy(raw);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

impl Default for LineReader {
    fn default() -> Self {
        LineReader::new(LineReaderConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_lines_split_across_chunks() {
        let mut r = LineReader::default();
        let mut lines = r.process_chunk(b"hello wor");
        lines.extend(r.process_chunk(b"ld\nsecond line\nthir"));
        lines.extend(r.flush());
        assert_eq!(lines, vec!["hello world", "second line", "thir"]);
    }

    #[test]
    fn filters_empty_and_whitespace_only_lines() {
        let mut r = LineReader::default();
        let lines = r.process_chunk(b"one\n\n   \ntwo\n");
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn overflow_retains_tail_of_partial_line() {
        let mut r = LineReader::new(LineReaderConfig { max_buffer_size: 8 });
        let big = vec![b'a'; 20];
        r.process_chunk(&big);
        assert_eq!(r.state().partial_line.len(), 8);
        assert!(r.state().partial_line.iter().all(|&b| b == b'a'));
    }

    #[test]
    fn bytes_processed_tracks_total_input_length() {
        let mut r = LineReader::default();
        r.process_chunk(b"abc");
        r.process_chunk(b"def\n");
        assert_eq!(r.state().bytes_processed, 7);
    }

    #[test]
    fn restore_state_resumes_parsing_position() {
        let mut r = LineReader::default();
        r.process_chunk(b"partial");
        let snapshot = r.state().clone();

        let mut resumed = LineReader::default();
        resumed.restore_state(snapshot);
        let lines = resumed.process_chunk(b" line\n");
        assert_eq!(lines, vec!["partial line"]);
    }

    proptest::proptest! {
        #[test]
        fn partition_invariance(
            s in "[a-zA-Z0-9 \\n]{0,200}",
            splits in proptest::collection::vec(0usize..50, 0..10),
        ) {
            let bytes = s.as_bytes();

            let mut whole = LineReader::default();
            let mut whole_lines = whole.process_chunk(bytes);
            whole_lines.extend(whole.flush());

            let mut chunked = LineReader::default();
            let mut chunked_lines = Vec::new();
            let mut pos = 0;
            for split in &splits {
                let end = (pos + split % 20.max(1)).min(bytes.len());
                chunked_lines.extend(chunked.process_chunk(&bytes[pos..end]));
                pos = end;
            }
            chunked_lines.extend(chunked.process_chunk(&bytes[pos..]));
            chunked_lines.extend(chunked.flush());

            let mut a = whole_lines.clone();
            let mut b = chunked_lines.clone();
            a.sort();
            b.sort();
            proptest::prop_assert_eq!(a, b);
            proptest::prop_assert_eq!(whole.state().bytes_processed, bytes.len() as u64);
            proptest::prop_assert_eq!(chunked.state().bytes_processed, bytes.len() as u64);
        }
    }
}
