//! Terminal colors
//!
//! Colors are either an index into the 256-entry ANSI palette or a direct
//! 24-bit triple. The 16 base entries use the IBM VGA text-mode palette,
//! which is what BBS ANSI art is authored against.

/// Terminal color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    /// 256-color palette index
    Indexed(u8),
    /// True color RGB
    Rgb(u8, u8, u8),
}

impl Color {
    /// Default foreground: VGA light grey.
    pub const DEFAULT_FG: Color = Color::Indexed(7);
    /// Default background: black.
    pub const DEFAULT_BG: Color = Color::Indexed(0);

    /// Convert to RGB
    pub fn to_rgb(self) -> (u8, u8, u8) {
        match self {
            Color::Indexed(idx) => index_to_rgb(idx),
            Color::Rgb(r, g, b) => (r, g, b),
        }
    }
}

/// The IBM VGA 16-color text palette.
const VGA_PALETTE: [(u8, u8, u8); 16] = [
    (0, 0, 0),
    (170, 0, 0),
    (0, 170, 0),
    (170, 85, 0),
    (0, 0, 170),
    (170, 0, 170),
    (0, 170, 170),
    (170, 170, 170),
    (85, 85, 85),
    (255, 85, 85),
    (85, 255, 85),
    (255, 255, 85),
    (85, 85, 255),
    (255, 85, 255),
    (85, 255, 255),
    (255, 255, 255),
];

/// Convert 256-color palette index to RGB
fn index_to_rgb(idx: u8) -> (u8, u8, u8) {
    match idx {
        // VGA colors (0-15)
        0..=15 => VGA_PALETTE[idx as usize],
        // 216 color cube (16-231)
        16..=231 => {
            let idx = idx - 16;
            let r = (idx / 36) % 6;
            let g = (idx / 6) % 6;
            let b = idx % 6;
            let to_component = |c: u8| if c == 0 { 0 } else { 55 + c * 40 };
            (to_component(r), to_component(g), to_component(b))
        }
        // Grayscale ramp (232-255)
        232..=255 => {
            let gray = 8 + (idx - 232) * 10;
            (gray, gray, gray)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fg_is_vga_grey() {
        assert_eq!(Color::DEFAULT_FG.to_rgb(), (170, 170, 170));
    }

    #[test]
    fn test_cube_corners() {
        assert_eq!(Color::Indexed(16).to_rgb(), (0, 0, 0));
        assert_eq!(Color::Indexed(231).to_rgb(), (255, 255, 255));
        // 196 = 16 + 5*36: pure red corner
        assert_eq!(Color::Indexed(196).to_rgb(), (255, 0, 0));
    }

    #[test]
    fn test_grayscale_ramp() {
        assert_eq!(Color::Indexed(232).to_rgb(), (8, 8, 8));
        assert_eq!(Color::Indexed(255).to_rgb(), (238, 238, 238));
    }

    #[test]
    fn test_truecolor_passthrough() {
        assert_eq!(Color::Rgb(1, 2, 3).to_rgb(), (1, 2, 3));
    }
}
