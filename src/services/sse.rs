//! Incremental decoder for the provider's SSE body
//!
//! Frames are separated by a blank line and carry one `data: <json>` payload.
//! The decoder keeps only the unconsumed remainder between reads and never
//! rescans bytes it has already searched.

use tracing::warn;

const DATA_TAG: &str = "data:";
const FRAME_DELIMITER: &str = "\n\n";

/// Where the decoder stands with respect to the buffered text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    /// No complete frame yet; the next search starts at `scan_from`
    SearchingBoundary { scan_from: usize },
    /// A complete frame ends at `end` (delimiter excluded)
    FrameReady { end: usize },
}

/// Buffered SSE frame decoder
#[derive(Debug)]
pub struct FrameDecoder {
    /// Decoded text not yet consumed (CR characters removed)
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 sequence
    incomplete_utf8: Vec<u8>,
    state: DecoderState,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            incomplete_utf8: Vec::new(),
            state: DecoderState::SearchingBoundary { scan_from: 0 },
        }
    }

    /// Feed raw bytes and return the payloads of every frame completed by them
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.append(chunk);

        let mut payloads = Vec::new();
        loop {
            match self.state {
                DecoderState::SearchingBoundary { scan_from } => {
                    match self.buffer[scan_from..].find(FRAME_DELIMITER) {
                        Some(offset) => {
                            self.state = DecoderState::FrameReady { end: scan_from + offset };
                        }
                        None => {
                            // a delimiter may straddle the next read
                            let mut resume = self.buffer.len().saturating_sub(FRAME_DELIMITER.len() - 1);
                            while !self.buffer.is_char_boundary(resume) {
                                resume -= 1;
                            }
                            self.state = DecoderState::SearchingBoundary { scan_from: resume };
                            break;
                        }
                    }
                }
                DecoderState::FrameReady { end } => {
                    let frame: String = self.buffer.drain(..end + FRAME_DELIMITER.len()).collect();
                    if let Some(payload) = parse_frame(&frame[..end]) {
                        payloads.push(payload);
                    }
                    self.state = DecoderState::SearchingBoundary { scan_from: 0 };
                }
            }
        }

        payloads
    }

    /// Flush a final frame that arrived without a trailing delimiter
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        self.incomplete_utf8.clear();
        self.state = DecoderState::SearchingBoundary { scan_from: 0 };
        parse_frame(&rest)
    }

    /// Bytes waiting for a frame boundary
    pub fn pending(&self) -> usize {
        self.buffer.len() + self.incomplete_utf8.len()
    }

    fn append(&mut self, chunk: &[u8]) {
        let mut bytes = std::mem::take(&mut self.incomplete_utf8);
        bytes.extend_from_slice(chunk);

        let text = match std::str::from_utf8(&bytes) {
            Ok(text) => text.to_string(),
            Err(e) if e.error_len().is_none() => {
                // incomplete sequence at the end: keep it for the next read
                let valid_up_to = e.valid_up_to();
                self.incomplete_utf8 = bytes[valid_up_to..].to_vec();
                String::from_utf8_lossy(&bytes[..valid_up_to]).into_owned()
            }
            Err(e) => {
                warn!("Invalid UTF-8 in provider stream at byte {}", e.valid_up_to());
                String::from_utf8_lossy(&bytes).into_owned()
            }
        };

        self.buffer.extend(text.chars().filter(|c| *c != '\r'));
    }
}

/// Extract the data payload of one frame; comments and empty payloads yield `None`
fn parse_frame(frame: &str) -> Option<String> {
    let data: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix(DATA_TAG))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();

    if data.is_empty() {
        return None;
    }

    let payload = data.join("\n");
    let trimmed = payload.trim();
    if trimmed.is_empty() || trimmed == "[DONE]" {
        return None;
    }
    Some(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame() {
        let mut decoder = FrameDecoder::new();
        let payloads = decoder.feed(b"data: {\"a\":1}\n\n");
        assert_eq!(payloads, vec!["{\"a\":1}".to_string()]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_frame_split_across_reads() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"data: {\"te").is_empty());
        assert!(decoder.feed(b"xt\":\"hi\"}\n").is_empty());
        let payloads = decoder.feed(b"\ndata: {\"b\":2}");
        assert_eq!(payloads, vec!["{\"text\":\"hi\"}".to_string()]);
        assert_eq!(decoder.feed(b"\n\n"), vec!["{\"b\":2}".to_string()]);
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut decoder = FrameDecoder::new();
        let payloads = decoder.feed(b"data: 1\n\ndata: 2\n\n: comment\n\ndata: 3\n\n");
        assert_eq!(payloads, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_crlf_delimiters() {
        let mut decoder = FrameDecoder::new();
        let payloads = decoder.feed(b"data: {\"x\":1}\r\n\r\ndata: {\"y\":2}\r\n\r\n");
        assert_eq!(payloads, vec!["{\"x\":1}", "{\"y\":2}"]);
    }

    #[test]
    fn test_utf8_split_across_reads() {
        let frame = "data: {\"text\":\"안녕\"}\n\n".as_bytes();
        let split = frame.iter().position(|b| *b >= 0x80).unwrap() + 1;

        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(&frame[..split]).is_empty());
        let payloads = decoder.feed(&frame[split..]);
        assert_eq!(payloads, vec!["{\"text\":\"안녕\"}".to_string()]);
    }

    #[test]
    fn test_done_marker_and_empty_payload_skipped() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"data: [DONE]\n\ndata: \n\n").is_empty());
    }

    #[test]
    fn test_finish_flushes_trailing_frame() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"data: {\"last\":true}").is_empty());
        assert_eq!(decoder.finish(), Some("{\"last\":true}".to_string()));
        assert_eq!(decoder.finish(), None);
    }
}
