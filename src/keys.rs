//! Outbound encoding of special keys, as BBS software expects them.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialKey {
    Enter,
    Backspace,
    Tab,
    Escape,
    ArrowUp,
    ArrowDown,
    ArrowRight,
    ArrowLeft,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    Delete,
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
}

impl SpecialKey {
    /// The byte sequence sent over the wire for this key.
    pub fn sequence(self) -> &'static [u8] {
        match self {
            SpecialKey::Enter => &[0x0D],
            SpecialKey::Backspace => &[0x08],
            SpecialKey::Tab => &[0x09],
            SpecialKey::Escape => &[0x1B],
            SpecialKey::ArrowUp => b"\x1b[A",
            SpecialKey::ArrowDown => b"\x1b[B",
            SpecialKey::ArrowRight => b"\x1b[C",
            SpecialKey::ArrowLeft => b"\x1b[D",
            SpecialKey::Home => b"\x1b[H",
            SpecialKey::End => b"\x1b[F",
            SpecialKey::PageUp => b"\x1b[5~",
            SpecialKey::PageDown => b"\x1b[6~",
            SpecialKey::Insert => b"\x1b[2~",
            SpecialKey::Delete => b"\x1b[3~",
            SpecialKey::F1 => b"\x1bOP",
            SpecialKey::F2 => b"\x1bOQ",
            SpecialKey::F3 => b"\x1bOR",
            SpecialKey::F4 => b"\x1bOS",
            SpecialKey::F5 => b"\x1b[15~",
            SpecialKey::F6 => b"\x1b[17~",
            SpecialKey::F7 => b"\x1b[18~",
            SpecialKey::F8 => b"\x1b[19~",
            SpecialKey::F9 => b"\x1b[20~",
            SpecialKey::F10 => b"\x1b[21~",
            SpecialKey::F11 => b"\x1b[23~",
            SpecialKey::F12 => b"\x1b[24~",
        }
    }

    /// Looks a key up by the name a GUI front-end reports (the DOM
    /// `KeyboardEvent.key` vocabulary).
    pub fn from_name(name: &str) -> Option<SpecialKey> {
        Some(match name {
            "Enter" => SpecialKey::Enter,
            "Backspace" => SpecialKey::Backspace,
            "Tab" => SpecialKey::Tab,
            "Escape" => SpecialKey::Escape,
            "ArrowUp" => SpecialKey::ArrowUp,
            "ArrowDown" => SpecialKey::ArrowDown,
            "ArrowRight" => SpecialKey::ArrowRight,
            "ArrowLeft" => SpecialKey::ArrowLeft,
            "Home" => SpecialKey::Home,
            "End" => SpecialKey::End,
            "PageUp" => SpecialKey::PageUp,
            "PageDown" => SpecialKey::PageDown,
            "Insert" => SpecialKey::Insert,
            "Delete" => SpecialKey::Delete,
            "F1" => SpecialKey::F1,
            "F2" => SpecialKey::F2,
            "F3" => SpecialKey::F3,
            "F4" => SpecialKey::F4,
            "F5" => SpecialKey::F5,
            "F6" => SpecialKey::F6,
            "F7" => SpecialKey::F7,
            "F8" => SpecialKey::F8,
            "F9" => SpecialKey::F9,
            "F10" => SpecialKey::F10,
            "F11" => SpecialKey::F11,
            "F12" => SpecialKey::F12,
            _ => return None,
        })
    }
}

/// Ctrl+A..Z as the single bytes 0x01..0x1A.
pub fn ctrl_key(letter: char) -> Option<u8> {
    let upper = letter.to_ascii_uppercase();
    if upper.is_ascii_uppercase() {
        Some(upper as u8 - 0x40)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::{ctrl_key, SpecialKey};

    #[test]
    fn well_known_sequences() {
        assert_eq!(SpecialKey::Enter.sequence(), &[0x0D]);
        assert_eq!(SpecialKey::ArrowUp.sequence(), b"\x1b[A");
        assert_eq!(SpecialKey::F1.sequence(), b"\x1bOP");
        assert_eq!(SpecialKey::F5.sequence(), b"\x1b[15~");
        assert_eq!(SpecialKey::F12.sequence(), b"\x1b[24~");
        assert_eq!(SpecialKey::PageDown.sequence(), b"\x1b[6~");
    }

    #[test]
    fn name_lookup() {
        assert_eq!(SpecialKey::from_name("ArrowLeft"), Some(SpecialKey::ArrowLeft));
        assert_eq!(SpecialKey::from_name("F10"), Some(SpecialKey::F10));
        assert_eq!(SpecialKey::from_name("Meta"), None);
    }

    #[test]
    fn ctrl_letters() {
        assert_eq!(ctrl_key('a'), Some(0x01));
        assert_eq!(ctrl_key('C'), Some(0x03));
        assert_eq!(ctrl_key('z'), Some(0x1A));
        assert_eq!(ctrl_key('1'), None);
    }
}
