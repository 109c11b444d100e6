use super::palette::{DEFAULT_BG, DEFAULT_FG, PALETTE_16};

/// A cell color: either an index into the 256-color ANSI space or a direct
/// 24-bit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalColor {
    Palette(u8),
    Rgb(u8, u8, u8),
}

impl TerminalColor {
    /// Resolves to RGB. Bold promotes foreground palette indices 0-7 to
    /// their bright counterparts; indices 16-231 map through the 6x6x6 cube
    /// and 232-255 through the 24-step grayscale ramp.
    pub fn to_rgb(self, is_foreground: bool, bold: bool) -> (u8, u8, u8) {
        match self {
            TerminalColor::Rgb(r, g, b) => (r, g, b),
            TerminalColor::Palette(index) => {
                let mut index = index;
                if is_foreground && bold && index <= 7 {
                    index += 8;
                }
                match index {
                    0..=15 => PALETTE_16[usize::from(index)],
                    16..=231 => {
                        let index = index - 16;
                        let r = (index / 36) * 51;
                        let g = ((index % 36) / 6) * 51;
                        let b = (index % 6) * 51;
                        (r, g, b)
                    }
                    232..=255 => {
                        let v = 8 + (index - 232) * 10;
                        (v, v, v)
                    }
                }
            }
        }
    }
}

/// Graphic attributes carried by every cell and by the screen's current
/// drawing state. `reverse` is stored as-is; foreground and background are
/// swapped when a snapshot resolves colors, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextAttribute {
    pub foreground: TerminalColor,
    pub background: TerminalColor,
    pub bold: bool,
    pub underline: bool,
    pub blink: bool,
    pub reverse: bool,
}

impl TextAttribute {
    pub const DEFAULT: TextAttribute = TextAttribute {
        foreground: TerminalColor::Palette(DEFAULT_FG),
        background: TerminalColor::Palette(DEFAULT_BG),
        bold: false,
        underline: false,
        blink: false,
        reverse: false,
    };
}

impl Default for TextAttribute {
    fn default() -> Self {
        TextAttribute::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::TerminalColor;

    #[test]
    fn palette_resolution() {
        assert_eq!(TerminalColor::Palette(7).to_rgb(true, false), (170, 170, 170));
        // bold promotes only low foreground indices
        assert_eq!(TerminalColor::Palette(4).to_rgb(true, true), (85, 85, 255));
        assert_eq!(TerminalColor::Palette(4).to_rgb(false, true), (0, 0, 170));
        assert_eq!(TerminalColor::Palette(12).to_rgb(true, true), (85, 85, 255));
    }

    #[test]
    fn color_cube_and_grayscale() {
        // 196 is full red in the 6x6x6 cube
        assert_eq!(TerminalColor::Palette(196).to_rgb(true, false), (255, 0, 0));
        assert_eq!(TerminalColor::Palette(16).to_rgb(true, false), (0, 0, 0));
        assert_eq!(TerminalColor::Palette(231).to_rgb(true, false), (255, 255, 255));
        assert_eq!(TerminalColor::Palette(232).to_rgb(true, false), (8, 8, 8));
        assert_eq!(TerminalColor::Palette(240).to_rgb(true, false), (88, 88, 88));
        assert_eq!(TerminalColor::Palette(255).to_rgb(true, false), (238, 238, 238));
    }

    #[test]
    fn rgb_passes_through() {
        assert_eq!(TerminalColor::Rgb(1, 2, 3).to_rgb(true, true), (1, 2, 3));
    }
}
