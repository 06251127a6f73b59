//! Terminal cell representation

use super::color::Color;

/// A single cell in the terminal grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    /// Character displayed
    pub ch: char,
    /// Cell style
    pub style: CellStyle,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            ch: ' ',
            style: CellStyle::default(),
        }
    }
}

impl Cell {
    /// Create a new cell with a character
    pub fn new(ch: char, style: CellStyle) -> Self {
        Self { ch, style }
    }
}

/// Cell styling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellStyle {
    /// Foreground color
    pub fg: Color,
    /// Background color
    pub bg: Color,
    /// Bold
    pub bold: bool,
    /// Underline
    pub underline: bool,
    /// Blink
    pub blink: bool,
    /// Reverse video
    pub reverse: bool,
}

impl Default for CellStyle {
    fn default() -> Self {
        Self {
            fg: Color::DEFAULT_FG,
            bg: Color::DEFAULT_BG,
            bold: false,
            underline: false,
            blink: false,
            reverse: false,
        }
    }
}

impl CellStyle {
    /// Resolved foreground RGB. Bold promotes the base palette (0-7) to its
    /// bright half; truecolor and extended indices are unaffected.
    pub fn fg_rgb(&self) -> (u8, u8, u8) {
        match self.fg {
            Color::Indexed(idx @ 0..=7) if self.bold => Color::Indexed(idx + 8).to_rgb(),
            other => other.to_rgb(),
        }
    }

    /// Resolved background RGB.
    pub fn bg_rgb(&self) -> (u8, u8, u8) {
        self.bg.to_rgb()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cell_is_blank_grey_on_black() {
        let cell = Cell::default();
        assert_eq!(cell.ch, ' ');
        assert_eq!(cell.style.fg_rgb(), (170, 170, 170));
        assert_eq!(cell.style.bg_rgb(), (0, 0, 0));
    }

    #[test]
    fn test_bold_promotes_base_palette_only() {
        let mut style = CellStyle {
            fg: Color::Indexed(1),
            bold: true,
            ..CellStyle::default()
        };
        assert_eq!(style.fg_rgb(), Color::Indexed(9).to_rgb());

        style.fg = Color::Rgb(10, 20, 30);
        assert_eq!(style.fg_rgb(), (10, 20, 30));

        style.fg = Color::Indexed(100);
        assert_eq!(style.fg_rgb(), Color::Indexed(100).to_rgb());
    }
}
