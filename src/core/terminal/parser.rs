//! ANSI escape sequence parser
//!
//! A four-state machine over decoded code points. CSI parameters accumulate
//! as raw bytes and are split out at dispatch time; the buffer is bounded,
//! and overflowing it silently drops the sequence.

/// Parser state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    AfterEsc,
    InCsi,
    InOsc,
}

/// Upper bound on accumulated CSI parameter bytes.
const CSI_BUF_MAX: usize = 1024;

/// Parsed ANSI event
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AnsiEvent {
    /// Printable code point
    Print(char),
    /// C0 control character
    Control(char),
    /// ESC followed by a final character
    Esc(char),
    /// CSI sequence: raw parameter bytes and the final character
    Csi {
        /// Accumulated parameter bytes (digits, `;`, `?`).
        params: Vec<u8>,
        /// Final byte that selects the command.
        action: char,
    },
}

/// ANSI escape sequence parser
pub(crate) struct AnsiParser {
    state: State,
    buf: Vec<u8>,
}

impl AnsiParser {
    pub fn new() -> Self {
        Self {
            state: State::Normal,
            buf: Vec::new(),
        }
    }

    /// Drop any partial sequence and return to ground state.
    pub fn reset(&mut self) {
        self.state = State::Normal;
        self.buf.clear();
    }

    /// Parse a character sequence and return the resulting events.
    pub fn parse(&mut self, text: &str) -> Vec<AnsiEvent> {
        let mut events = Vec::new();
        for ch in text.chars() {
            if let Some(event) = self.advance(ch) {
                events.push(event);
            }
        }
        events
    }

    fn advance(&mut self, ch: char) -> Option<AnsiEvent> {
        match self.state {
            State::Normal => self.normal(ch),
            State::AfterEsc => self.after_esc(ch),
            State::InCsi => self.in_csi(ch),
            State::InOsc => self.in_osc(ch),
        }
    }

    fn normal(&mut self, ch: char) -> Option<AnsiEvent> {
        match ch {
            '\u{1b}' => {
                self.state = State::AfterEsc;
                None
            }
            c if (c as u32) < 0x20 => Some(AnsiEvent::Control(c)),
            c => Some(AnsiEvent::Print(c)),
        }
    }

    fn after_esc(&mut self, ch: char) -> Option<AnsiEvent> {
        match ch {
            '[' => {
                self.buf.clear();
                self.state = State::InCsi;
                None
            }
            ']' => {
                self.buf.clear();
                self.state = State::InOsc;
                None
            }
            c => {
                self.state = State::Normal;
                Some(AnsiEvent::Esc(c))
            }
        }
    }

    fn in_csi(&mut self, ch: char) -> Option<AnsiEvent> {
        match ch {
            '0'..='9' | ';' | '?' => {
                if self.buf.len() >= CSI_BUF_MAX {
                    // Runaway sequence: drop it without dispatching.
                    self.reset();
                    return None;
                }
                self.buf.push(ch as u8);
                None
            }
            action => {
                let params = std::mem::take(&mut self.buf);
                self.state = State::Normal;
                Some(AnsiEvent::Csi { params, action })
            }
        }
    }

    fn in_osc(&mut self, ch: char) -> Option<AnsiEvent> {
        // Title sets and palette queries are not modeled; swallow to BEL/ESC.
        if ch == '\u{07}' || ch == '\u{1b}' {
            self.state = State::Normal;
        }
        None
    }
}

/// Split accumulated CSI parameter bytes into `;`-separated numbers.
/// Empty slots parse as `None` so callers can apply per-command defaults.
pub(crate) fn split_params(raw: &[u8]) -> Vec<Option<u16>> {
    let body = if raw.first() == Some(&b'?') {
        &raw[1..]
    } else {
        raw
    };
    body.split(|&b| b == b';')
        .map(|field| {
            if field.is_empty() {
                None
            } else {
                std::str::from_utf8(field)
                    .ok()
                    .and_then(|s| s.parse::<u16>().ok())
            }
        })
        .collect()
}
