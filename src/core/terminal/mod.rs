//! Terminal emulation module
//!
//! Provides the ANSI/VT100 emulation a BBS session needs:
//! - CSI (Control Sequence Introducer) parsing with bounded parameters
//! - SGR colors and attributes (16-color, 256-color, truecolor)
//! - Cursor movement, save/restore, scrolling, erase operations
//! - Device status reports answered through a response callback
//! - Atomic deep snapshots for a renderer

mod cell;
mod color;
pub mod cp437;
mod parser;
mod screen;

pub use cell::{Cell, CellStyle};
pub use color::Color;

use parser::{split_params, AnsiEvent, AnsiParser};
use screen::Screen;

/// Terminal size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    /// Columns (width)
    pub cols: u16,
    /// Rows (height)
    pub rows: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 25 }
    }
}

impl TerminalSize {
    /// Create new terminal size
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

/// Cursor position in a snapshot (0-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorPos {
    /// Column; may equal the column count when a wrap is pending.
    pub col: u16,
    /// Row.
    pub row: u16,
}

/// One resolved cell in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotCell {
    /// Character displayed
    pub ch: char,
    /// Resolved foreground RGB
    pub fg: (u8, u8, u8),
    /// Resolved background RGB
    pub bg: (u8, u8, u8),
    /// Bold
    pub bold: bool,
    /// Underline
    pub underline: bool,
    /// Blink
    pub blink: bool,
    /// Reverse video
    pub reverse: bool,
}

/// A deep copy of the grid and cursor, safe to hold without locking.
#[derive(Debug, Clone)]
pub struct ScreenSnapshot {
    /// Columns
    pub cols: u16,
    /// Rows
    pub rows: u16,
    /// Row-major cells
    pub cells: Vec<SnapshotCell>,
    /// Cursor position
    pub cursor: CursorPos,
}

impl ScreenSnapshot {
    /// Cell at (col, row).
    pub fn cell(&self, col: u16, row: u16) -> Option<&SnapshotCell> {
        if col < self.cols && row < self.rows {
            self.cells.get(row as usize * self.cols as usize + col as usize)
        } else {
            None
        }
    }
}

/// Callback invoked with reply bytes for device status reports.
pub type ResponseFn = Box<dyn FnMut(Vec<u8>) + Send>;

/// Terminal emulator state
pub struct Terminal {
    screen: Screen,
    parser: AnsiParser,
    style: CellStyle,
    size: TerminalSize,
    responder: Option<ResponseFn>,
}

impl Terminal {
    /// Create a terminal with the default 80×25 size.
    pub fn new() -> Self {
        Self::with_size(TerminalSize::default())
    }

    /// Create a terminal with a specific size.
    pub fn with_size(size: TerminalSize) -> Self {
        Self {
            screen: Screen::new(size.cols as usize, size.rows as usize),
            parser: AnsiParser::new(),
            style: CellStyle::default(),
            size,
            responder: None,
        }
    }

    /// Install the callback that carries DSR replies back to the transport.
    pub fn set_responder(&mut self, responder: ResponseFn) {
        self.responder = Some(responder);
    }

    /// Get terminal size
    pub fn size(&self) -> TerminalSize {
        self.size
    }

    /// Process decoded characters, mutating the grid.
    pub fn feed(&mut self, text: &str) {
        for event in self.parser.parse(text) {
            self.handle_event(event);
        }
    }

    /// Clear the grid and all state.
    pub fn reset(&mut self) {
        self.screen = Screen::new(self.size.cols as usize, self.size.rows as usize);
        self.parser.reset();
        self.style = CellStyle::default();
    }

    /// Atomic deep copy of the grid and cursor with colors resolved.
    pub fn snapshot(&self) -> ScreenSnapshot {
        let cells = self
            .screen
            .cells()
            .iter()
            .map(|cell| {
                let mut fg = cell.style.fg_rgb();
                let mut bg = cell.style.bg_rgb();
                if cell.style.reverse {
                    std::mem::swap(&mut fg, &mut bg);
                }
                SnapshotCell {
                    ch: cell.ch,
                    fg,
                    bg,
                    bold: cell.style.bold,
                    underline: cell.style.underline,
                    blink: cell.style.blink,
                    reverse: cell.style.reverse,
                }
            })
            .collect();
        let (col, row) = self.screen.cursor();
        ScreenSnapshot {
            cols: self.size.cols,
            rows: self.size.rows,
            cells,
            cursor: CursorPos {
                col: col as u16,
                row: row as u16,
            },
        }
    }

    fn handle_event(&mut self, event: AnsiEvent) {
        match event {
            AnsiEvent::Print(ch) => self.screen.put_char(ch, self.style),
            AnsiEvent::Control(ch) => self.handle_control(ch),
            AnsiEvent::Esc(action) => self.handle_esc(action),
            AnsiEvent::Csi { params, action } => self.handle_csi(&params, action),
        }
    }

    fn handle_control(&mut self, ch: char) {
        match ch {
            '\u{08}' => self.screen.backspace(),
            '\u{09}' => self.screen.tab(),
            '\u{0A}' => self.screen.linefeed(),
            '\u{0D}' => self.screen.carriage_return(),
            // BEL and the rest of C0 are ignored
            _ => {}
        }
    }

    fn handle_esc(&mut self, action: char) {
        match action {
            'D' => self.screen.linefeed(),
            'M' => self.screen.reverse_linefeed(),
            'E' => {
                self.screen.carriage_return();
                self.screen.linefeed();
            }
            '7' => self.screen.save_cursor(),
            '8' => self.screen.restore_cursor(),
            'c' => self.reset(),
            _ => {}
        }
    }

    fn handle_csi(&mut self, raw: &[u8], action: char) {
        let params = split_params(raw);
        // Cursor-motion commands default absent parameters to 1.
        let arg = |idx: usize, default: u16| -> u16 {
            params
                .get(idx)
                .copied()
                .flatten()
                .filter(|&v| v != 0)
                .unwrap_or(default)
        };

        match action {
            'A' => self.screen.move_up(arg(0, 1) as usize),
            'B' => self.screen.move_down(arg(0, 1) as usize),
            'C' => self.screen.move_right(arg(0, 1) as usize),
            'D' => self.screen.move_left(arg(0, 1) as usize),
            'E' => {
                self.screen.move_down(arg(0, 1) as usize);
                self.screen.carriage_return();
            }
            'F' => {
                self.screen.move_up(arg(0, 1) as usize);
                self.screen.carriage_return();
            }
            'G' => self.screen.set_col(arg(0, 1) as usize - 1),
            'H' | 'f' => {
                let row = arg(0, 1) as usize - 1;
                let col = arg(1, 1) as usize - 1;
                self.screen.set_cursor(col, row);
            }
            'J' => self
                .screen
                .erase_display(params.first().copied().flatten().unwrap_or(0)),
            'K' => self
                .screen
                .erase_line(params.first().copied().flatten().unwrap_or(0)),
            'S' => self.screen.scroll_up(arg(0, 1) as usize),
            'T' => self.screen.scroll_down(arg(0, 1) as usize),
            's' => self.screen.save_cursor(),
            'u' => self.screen.restore_cursor(),
            'm' => self.handle_sgr(&params),
            'n' => self.handle_dsr(params.first().copied().flatten().unwrap_or(0)),
            _ => {
                tracing::debug!(?raw, %action, "unhandled CSI sequence");
            }
        }
    }

    fn handle_dsr(&mut self, request: u16) {
        let reply = match request {
            5 => b"\x1b[0n".to_vec(),
            6 => {
                let (col, row) = self.screen.cursor();
                format!("\x1b[{};{}R", row + 1, col + 1).into_bytes()
            }
            _ => return,
        };
        if let Some(responder) = self.responder.as_mut() {
            responder(reply);
        }
    }

    fn handle_sgr(&mut self, params: &[Option<u16>]) {
        let mut iter = params.iter().copied().map(|p| p.unwrap_or(0)).peekable();
        while let Some(param) = iter.next() {
            match param {
                0 => self.style = CellStyle::default(),
                1 => self.style.bold = true,
                2 | 22 => self.style.bold = false,
                4 => self.style.underline = true,
                5 | 6 => self.style.blink = true,
                7 => self.style.reverse = true,
                24 => self.style.underline = false,
                25 => self.style.blink = false,
                27 => self.style.reverse = false,
                30..=37 => self.style.fg = Color::Indexed((param - 30) as u8),
                38 => {
                    if let Some(color) = Self::parse_extended_color(&mut iter) {
                        self.style.fg = color;
                    }
                }
                39 => self.style.fg = Color::DEFAULT_FG,
                40..=47 => self.style.bg = Color::Indexed((param - 40) as u8),
                48 => {
                    if let Some(color) = Self::parse_extended_color(&mut iter) {
                        self.style.bg = color;
                    }
                }
                49 => self.style.bg = Color::DEFAULT_BG,
                90..=97 => self.style.fg = Color::Indexed((param - 90 + 8) as u8),
                100..=107 => self.style.bg = Color::Indexed((param - 100 + 8) as u8),
                _ => {}
            }
        }
    }

    /// Parse the 38/48 extension: `5;n` indexed or `2;r;g;b` truecolor.
    /// A malformed extension aborts, leaving later parameters intact.
    fn parse_extended_color<I>(iter: &mut std::iter::Peekable<I>) -> Option<Color>
    where
        I: Iterator<Item = u16>,
    {
        match iter.next()? {
            5 => Some(Color::Indexed(iter.next()?.min(255) as u8)),
            2 => {
                let r = iter.next()?.min(255) as u8;
                let g = iter.next()?.min(255) as u8;
                let b = iter.next()?.min(255) as u8;
                Some(Color::Rgb(r, g, b))
            }
            _ => None,
        }
    }
}

impl Default for Terminal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn row_text(snapshot: &ScreenSnapshot, row: u16) -> String {
        (0..snapshot.cols)
            .map(|c| snapshot.cell(c, row).unwrap().ch)
            .collect::<String>()
            .trim_end()
            .to_string()
    }

    #[test]
    fn test_plain_text_lines() {
        let mut term = Terminal::new();
        term.feed("first\r\nsecond");
        let snap = term.snapshot();
        assert_eq!(row_text(&snap, 0), "first");
        assert_eq!(row_text(&snap, 1), "second");
        assert_eq!(snap.cursor, CursorPos { col: 6, row: 1 });
    }

    #[test]
    fn test_sgr_truecolor_and_reset() {
        let mut term = Terminal::new();
        term.feed("\x1b[38;2;10;20;30mX\x1b[0mY");
        let snap = term.snapshot();
        let x = snap.cell(0, 0).unwrap();
        assert_eq!(x.ch, 'X');
        assert_eq!(x.fg, (10, 20, 30));
        let y = snap.cell(1, 0).unwrap();
        assert_eq!(y.ch, 'Y');
        assert_eq!(y.fg, (170, 170, 170));
    }

    #[test]
    fn test_sgr_indexed_and_bold_promotion() {
        let mut term = Terminal::new();
        term.feed("\x1b[31mr\x1b[1mb\x1b[38;5;196mc");
        let snap = term.snapshot();
        assert_eq!(snap.cell(0, 0).unwrap().fg, (170, 0, 0));
        // Bold red promotes to bright red.
        assert_eq!(snap.cell(1, 0).unwrap().fg, (255, 85, 85));
        // 256-color indices are not promoted.
        assert_eq!(snap.cell(2, 0).unwrap().fg, (255, 0, 0));
    }

    #[test]
    fn test_sgr_malformed_extension_continues() {
        let mut term = Terminal::new();
        // `38;9` is not a valid extension; the trailing `4` must still apply
        // as underline.
        term.feed("\x1b[38;9;4mZ");
        let snap = term.snapshot();
        assert!(snap.cell(0, 0).unwrap().underline);
    }

    #[test]
    fn test_reverse_swaps_resolved_rgb() {
        let mut term = Terminal::new();
        term.feed("\x1b[7mR");
        let snap = term.snapshot();
        let cell = snap.cell(0, 0).unwrap();
        assert_eq!(cell.fg, (0, 0, 0));
        assert_eq!(cell.bg, (170, 170, 170));
        assert!(cell.reverse);
    }

    #[test]
    fn test_cursor_positioning_and_clamping() {
        let mut term = Terminal::new();
        term.feed("\x1b[10;20H");
        assert_eq!(term.snapshot().cursor, CursorPos { col: 19, row: 9 });
        term.feed("\x1b[999;999H");
        assert_eq!(term.snapshot().cursor, CursorPos { col: 79, row: 24 });
        term.feed("\x1b[H");
        assert_eq!(term.snapshot().cursor, CursorPos { col: 0, row: 0 });
    }

    #[test]
    fn test_dsr_cursor_report() {
        let replies = Arc::new(Mutex::new(Vec::new()));
        let sink = replies.clone();
        let mut term = Terminal::new();
        term.set_responder(Box::new(move |bytes| {
            sink.lock().unwrap().push(bytes);
        }));

        // Move to col=3 row=4 (0-based), then request a report.
        term.feed("\x1b[5;4H\x1b[6n");
        let replies = replies.lock().unwrap();
        assert_eq!(*replies, vec![b"\x1b[5;4R".to_vec()]);
    }

    #[test]
    fn test_dsr_status_ok() {
        let replies = Arc::new(Mutex::new(Vec::new()));
        let sink = replies.clone();
        let mut term = Terminal::new();
        term.set_responder(Box::new(move |bytes| {
            sink.lock().unwrap().push(bytes);
        }));
        term.feed("\x1b[5n");
        assert_eq!(*replies.lock().unwrap(), vec![b"\x1b[0n".to_vec()]);
    }

    #[test]
    fn test_scroll_up_on_full_screen() {
        let mut term = Terminal::new();
        for i in 0..26 {
            term.feed(&format!("line{i}\r\n"));
        }
        let snap = term.snapshot();
        // 26 lines plus a trailing newline scrolled the first two away.
        assert_eq!(row_text(&snap, 0), "line2");
        assert_eq!(snap.cursor.row, 24);
    }

    #[test]
    fn test_erase_display_modes() {
        let mut term = Terminal::new();
        term.feed("aaaa\r\nbbbb\r\ncccc");
        term.feed("\x1b[2;2H\x1b[0J");
        let snap = term.snapshot();
        assert_eq!(row_text(&snap, 0), "aaaa");
        assert_eq!(row_text(&snap, 1), "b");
        assert_eq!(row_text(&snap, 2), "");
    }

    #[test]
    fn test_save_restore_cursor() {
        let mut term = Terminal::new();
        term.feed("\x1b[3;7H\x1b7\x1b[HX\x1b8");
        assert_eq!(term.snapshot().cursor, CursorPos { col: 6, row: 2 });
        term.feed("\x1b[s\x1b[H\x1b[u");
        assert_eq!(term.snapshot().cursor, CursorPos { col: 6, row: 2 });
    }

    #[test]
    fn test_invariants_after_hostile_input() {
        let mut term = Terminal::new();
        // Garbage, partial sequences, overflow attempts.
        term.feed("\x1b[");
        term.feed(&"9".repeat(3000));
        term.feed("m\x1b[999A\x1b[999B\x1b]runaway");
        term.feed(&String::from_utf8_lossy(&[0xB0; 500]).into_owned());
        let snap = term.snapshot();
        assert_eq!(snap.cells.len(), 80 * 25);
        assert!(snap.cursor.col <= 80);
        assert!(snap.cursor.row < 25);
    }

    #[test]
    fn test_full_reset_via_esc_c() {
        let mut term = Terminal::new();
        term.feed("\x1b[1;31mhello\x1bc");
        let snap = term.snapshot();
        assert_eq!(row_text(&snap, 0), "");
        assert_eq!(snap.cursor, CursorPos { col: 0, row: 0 });
        term.feed("x");
        assert_eq!(term.snapshot().cell(0, 0).unwrap().fg, (170, 170, 170));
    }
}
