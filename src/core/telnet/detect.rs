//! Inline ZMODEM auto-detection
//!
//! Senders announce themselves in-band: an `rz` banner followed by the first
//! ZRQINIT (hex) or ZFILE (binary) header. The detector watches the cleaned
//! stream for the header intro sequences and hands the matched bytes to a
//! fresh receiver.

/// Bytes of previous clean chunks retained for cross-chunk matching. The
/// longest registered pattern is 6 bytes, so 64 covers any split plus the
/// sender's banner; a pattern fragmented across more than two reads inside
/// this window is still found.
const DETECT_TAIL: usize = 64;

/// Header intros that trigger a transfer: hex ZRQINIT, binary CRC16 and
/// binary CRC32 frame openings.
const PATTERNS: [&[u8]; 3] = [
    b"**\x18B00",
    &[0x2A, 0x18, 0x41, 0x00],
    &[0x2A, 0x18, 0x43, 0x00],
];

/// Watches the clean byte stream for a ZMODEM transfer opening.
pub(crate) struct ZmodemDetector {
    tail: Vec<u8>,
}

impl ZmodemDetector {
    pub fn new() -> Self {
        Self { tail: Vec::new() }
    }

    /// Scan the previous tail plus this chunk. On a match, clears the tail
    /// and returns the bytes from the start of the matched pattern onward,
    /// which become the receiver's initial input.
    pub fn scan(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        let mut window = Vec::with_capacity(self.tail.len() + chunk.len());
        window.extend_from_slice(&self.tail);
        window.extend_from_slice(chunk);

        let hit = PATTERNS
            .iter()
            .filter_map(|pattern| find(&window, pattern))
            .min();

        match hit {
            Some(pos) => {
                self.tail.clear();
                Some(window[pos..].to_vec())
            }
            None => {
                if window.len() > DETECT_TAIL {
                    window.drain(..window.len() - DETECT_TAIL);
                }
                self.tail = window;
                None
            }
        }
    }

    /// Forget the tail, e.g. after a transfer ends.
    pub fn reset(&mut self) {
        self.tail.clear();
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
