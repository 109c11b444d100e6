//! IBM PC code page 437, the encoding BBSes draw their screens in.

use std::collections::HashMap;

use lazy_static::lazy_static;

/// Canonical CP437 to Unicode mapping. The first 32 entries carry the
/// classic glyphs (smileys, card suits, arrows); the byte-stream decoder
/// passes control bytes through instead so ANSI parsing still sees them.
#[rustfmt::skip]
pub const CP437_TO_UNICODE: [char; 256] = [
    '\u{0000}', '\u{263A}', '\u{263B}', '\u{2665}', '\u{2666}', '\u{2663}', '\u{2660}', '\u{2022}',
    '\u{25D8}', '\u{25CB}', '\u{25D9}', '\u{2642}', '\u{2640}', '\u{266A}', '\u{266B}', '\u{263C}',
    '\u{25BA}', '\u{25C4}', '\u{2195}', '\u{203C}', '\u{00B6}', '\u{00A7}', '\u{25AC}', '\u{21A8}',
    '\u{2191}', '\u{2193}', '\u{2192}', '\u{2190}', '\u{221F}', '\u{2194}', '\u{25B2}', '\u{25BC}',
    ' ', '!', '"', '#', '$', '%', '&', '\'',
    '(', ')', '*', '+', ',', '-', '.', '/',
    '0', '1', '2', '3', '4', '5', '6', '7',
    '8', '9', ':', ';', '<', '=', '>', '?',
    '@', 'A', 'B', 'C', 'D', 'E', 'F', 'G',
    'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O',
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W',
    'X', 'Y', 'Z', '[', '\\', ']', '^', '_',
    '`', 'a', 'b', 'c', 'd', 'e', 'f', 'g',
    'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o',
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w',
    'x', 'y', 'z', '{', '|', '}', '~', '\u{2302}',
    '\u{00C7}', '\u{00FC}', '\u{00E9}', '\u{00E2}', '\u{00E4}', '\u{00E0}', '\u{00E5}', '\u{00E7}',
    '\u{00EA}', '\u{00EB}', '\u{00E8}', '\u{00EF}', '\u{00EE}', '\u{00EC}', '\u{00C4}', '\u{00C5}',
    '\u{00C9}', '\u{00E6}', '\u{00C6}', '\u{00F4}', '\u{00F6}', '\u{00F2}', '\u{00FB}', '\u{00F9}',
    '\u{00FF}', '\u{00D6}', '\u{00DC}', '\u{00A2}', '\u{00A3}', '\u{00A5}', '\u{20A7}', '\u{0192}',
    '\u{00E1}', '\u{00ED}', '\u{00F3}', '\u{00FA}', '\u{00F1}', '\u{00D1}', '\u{00AA}', '\u{00BA}',
    '\u{00BF}', '\u{2310}', '\u{00AC}', '\u{00BD}', '\u{00BC}', '\u{00A1}', '\u{00AB}', '\u{00BB}',
    '\u{2591}', '\u{2592}', '\u{2593}', '\u{2502}', '\u{2524}', '\u{2561}', '\u{2562}', '\u{2556}',
    '\u{2555}', '\u{2563}', '\u{2551}', '\u{2557}', '\u{255D}', '\u{255C}', '\u{255B}', '\u{2510}',
    '\u{2514}', '\u{2534}', '\u{252C}', '\u{251C}', '\u{2500}', '\u{253C}', '\u{255E}', '\u{255F}',
    '\u{255A}', '\u{2554}', '\u{2569}', '\u{2566}', '\u{2560}', '\u{2550}', '\u{256C}', '\u{2567}',
    '\u{2568}', '\u{2564}', '\u{2565}', '\u{2559}', '\u{2558}', '\u{2552}', '\u{2553}', '\u{256B}',
    '\u{256A}', '\u{2518}', '\u{250C}', '\u{2588}', '\u{2584}', '\u{258C}', '\u{2590}', '\u{2580}',
    '\u{03B1}', '\u{00DF}', '\u{0393}', '\u{03C0}', '\u{03A3}', '\u{03C3}', '\u{00B5}', '\u{03C4}',
    '\u{03A6}', '\u{0398}', '\u{03A9}', '\u{03B4}', '\u{221E}', '\u{03C6}', '\u{03B5}', '\u{2229}',
    '\u{2261}', '\u{00B1}', '\u{2265}', '\u{2264}', '\u{2320}', '\u{2321}', '\u{00F7}', '\u{2248}',
    '\u{00B0}', '\u{2219}', '\u{00B7}', '\u{221A}', '\u{207F}', '\u{00B2}', '\u{25A0}', '\u{00A0}',
];

lazy_static! {
    static ref UNICODE_TO_CP437: HashMap<char, u8> = {
        let mut map = HashMap::with_capacity(256);
        for (byte, ch) in CP437_TO_UNICODE.iter().enumerate() {
            map.entry(*ch).or_insert(byte as u8);
        }
        map
    };
}

/// Decodes a raw byte stream. Control bytes 0x00-0x1F pass through unchanged
/// so the ANSI state machine sees ESC, CR, LF, BS, TAB and BEL.
pub fn decode_cp437(data: &[u8]) -> String {
    data.iter()
        .map(|&b| {
            if b < 0x20 {
                char::from(b)
            } else {
                CP437_TO_UNICODE[usize::from(b)]
            }
        })
        .collect()
}

/// Encodes one character for the wire; unmappable code points become `?`.
pub fn encode_cp437(ch: char) -> u8 {
    if (ch as u32) < 0x20 {
        return ch as u8;
    }
    UNICODE_TO_CP437.get(&ch).copied().unwrap_or(b'?')
}

#[cfg(test)]
mod tests {
    use super::{decode_cp437, encode_cp437};

    #[test]
    fn control_bytes_pass_through() {
        assert_eq!(decode_cp437(b"\x1b[0m\r\n"), "\x1b[0m\r\n");
    }

    #[test]
    fn box_drawing_and_shades() {
        assert_eq!(decode_cp437(&[0xC9, 0xCD, 0xBB]), "╔═╗");
        assert_eq!(decode_cp437(&[0xB0, 0xB1, 0xB2, 0xDB]), "░▒▓█");
    }

    #[test]
    fn ascii_is_identity() {
        let ascii: Vec<u8> = (0x20..=0x7E).collect();
        let decoded = decode_cp437(&ascii);
        assert_eq!(decoded.as_bytes(), ascii.as_slice());
    }

    #[test]
    fn encode_round_trips_and_falls_back() {
        for b in [0x20u8, b'A', 0xC9, 0xDB, 0xE1] {
            assert_eq!(encode_cp437(super::CP437_TO_UNICODE[usize::from(b)]), b);
        }
        assert_eq!(encode_cp437('€'), b'?');
        assert_eq!(encode_cp437('\r'), 0x0D);
    }
}
