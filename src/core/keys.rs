//! Outbound key encoding
//!
//! BBS software expects the classic VT100/xterm byte sequences. The mapping
//! is fixed; there is no application-keypad or cursor-mode switching on these
//! systems.

/// A key press to encode for the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// A printable character (ASCII goes out verbatim)
    Char(char),
    /// Enter / Return
    Enter,
    /// Backspace
    Backspace,
    /// Tab
    Tab,
    /// Escape
    Escape,
    /// Cursor up
    Up,
    /// Cursor down
    Down,
    /// Cursor right
    Right,
    /// Cursor left
    Left,
    /// Home
    Home,
    /// End
    End,
    /// Page up
    PageUp,
    /// Page down
    PageDown,
    /// Insert
    Insert,
    /// Delete
    Delete,
    /// Function key F1-F12
    Function(u8),
    /// Ctrl plus a letter
    Ctrl(char),
}

impl Key {
    /// The byte sequence this key puts on the wire. Unknown or non-ASCII
    /// keys encode to nothing.
    pub fn encode(self) -> Vec<u8> {
        match self {
            Key::Char(c) if c.is_ascii() && !c.is_ascii_control() => vec![c as u8],
            Key::Char(_) => Vec::new(),
            Key::Enter => vec![0x0D],
            Key::Backspace => vec![0x08],
            Key::Tab => vec![0x09],
            Key::Escape => vec![0x1B],
            Key::Up => b"\x1b[A".to_vec(),
            Key::Down => b"\x1b[B".to_vec(),
            Key::Right => b"\x1b[C".to_vec(),
            Key::Left => b"\x1b[D".to_vec(),
            Key::Home => b"\x1b[H".to_vec(),
            Key::End => b"\x1b[F".to_vec(),
            Key::PageUp => b"\x1b[5~".to_vec(),
            Key::PageDown => b"\x1b[6~".to_vec(),
            Key::Insert => b"\x1b[2~".to_vec(),
            Key::Delete => b"\x1b[3~".to_vec(),
            Key::Function(n) => function_key(n),
            Key::Ctrl(c) => ctrl_key(c),
        }
    }
}

fn function_key(n: u8) -> Vec<u8> {
    match n {
        1 => b"\x1bOP".to_vec(),
        2 => b"\x1bOQ".to_vec(),
        3 => b"\x1bOR".to_vec(),
        4 => b"\x1bOS".to_vec(),
        5 => b"\x1b[15~".to_vec(),
        6 => b"\x1b[17~".to_vec(),
        7 => b"\x1b[18~".to_vec(),
        8 => b"\x1b[19~".to_vec(),
        9 => b"\x1b[20~".to_vec(),
        10 => b"\x1b[21~".to_vec(),
        11 => b"\x1b[23~".to_vec(),
        12 => b"\x1b[24~".to_vec(),
        _ => Vec::new(),
    }
}

fn ctrl_key(c: char) -> Vec<u8> {
    let upper = c.to_ascii_uppercase();
    if upper.is_ascii_uppercase() {
        vec![upper as u8 - b'A' + 1]
    } else {
        Vec::new()
    }
}
