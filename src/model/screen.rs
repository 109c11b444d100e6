use serde_derive::Serialize;

use super::palette::{DEFAULT_BG, DEFAULT_FG};
use super::{Position, TerminalColor, TextAttribute};

pub const DEFAULT_COLS: usize = 80;
pub const DEFAULT_ROWS: usize = 25;

/// Runaway control sequences are cut off here and the parser resets.
const MAX_CSI_BUF: usize = 1024;

/// One character cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub ch: char,
    pub attr: TextAttribute,
}

impl Default for Cell {
    fn default() -> Self {
        Cell {
            ch: ' ',
            attr: TextAttribute::DEFAULT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    Normal,
    Escape,
    Csi,
    Osc,
}

/// A cell with its colors resolved for the renderer. Reverse video has
/// already been applied to `fg`/`bg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SnapshotCell {
    pub ch: char,
    pub fg: (u8, u8, u8),
    pub bg: (u8, u8, u8),
    pub bold: bool,
    pub underline: bool,
    pub blink: bool,
    pub reverse: bool,
}

/// A deep copy of the grid plus the cursor, taken in one call so the
/// renderer never pairs a stale cursor with a fresh grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScreenSnapshot {
    pub cols: usize,
    pub rows: usize,
    /// Row-major, exactly `rows * cols` entries.
    pub cells: Vec<SnapshotCell>,
    pub cursor: Position,
}

/// ANSI/VT100 screen emulator over a fixed-size cell grid.
///
/// `feed` consumes text that has already been CP437-decoded; control bytes
/// survive decoding, so the state machine sees them unchanged. Unknown and
/// malformed sequences are dropped silently and the parser returns to its
/// ground state.
pub struct Screen {
    cols: usize,
    rows: usize,
    cursor: Position,
    saved_cursor: Position,
    attr: TextAttribute,
    state: ParserState,
    csi_buf: String,
    buffer: Vec<Cell>,
    response: Option<Box<dyn FnMut(&[u8]) + Send>>,
}

impl Screen {
    pub fn new(cols: usize, rows: usize) -> Self {
        Self {
            cols,
            rows,
            cursor: Position::default(),
            saved_cursor: Position::default(),
            attr: TextAttribute::DEFAULT,
            state: ParserState::Normal,
            csi_buf: String::new(),
            buffer: vec![Cell::default(); cols * rows],
            response: None,
        }
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cursor(&self) -> Position {
        self.cursor
    }

    pub fn cell(&self, x: usize, y: usize) -> Cell {
        self.buffer[y * self.cols + x]
    }

    /// Registers the sink for device status replies; the session points this
    /// at the connection's send path.
    pub fn set_response_callback(&mut self, callback: Box<dyn FnMut(&[u8]) + Send>) {
        self.response = Some(callback);
    }

    /// Clears the grid and every piece of parser state.
    pub fn reset(&mut self) {
        self.cursor = Position::default();
        self.saved_cursor = Position::default();
        self.attr = TextAttribute::DEFAULT;
        self.state = ParserState::Normal;
        self.csi_buf.clear();
        self.buffer.fill(Cell::default());
    }

    pub fn feed(&mut self, text: &str) {
        for ch in text.chars() {
            self.process(ch);
        }
    }

    pub fn snapshot(&self) -> ScreenSnapshot {
        let cells = self
            .buffer
            .iter()
            .map(|cell| {
                let attr = cell.attr;
                let mut fg = attr.foreground.to_rgb(true, attr.bold);
                let mut bg = attr.background.to_rgb(false, false);
                if attr.reverse {
                    std::mem::swap(&mut fg, &mut bg);
                }
                SnapshotCell {
                    ch: if (cell.ch as u32) < 0x20 { ' ' } else { cell.ch },
                    fg,
                    bg,
                    bold: attr.bold,
                    underline: attr.underline,
                    blink: attr.blink,
                    reverse: attr.reverse,
                }
            })
            .collect();
        ScreenSnapshot {
            cols: self.cols,
            rows: self.rows,
            cells,
            cursor: self.cursor,
        }
    }

    fn process(&mut self, ch: char) {
        match self.state {
            ParserState::Normal => match ch {
                '\x1b' => self.state = ParserState::Escape,
                '\r' => self.cursor.x = 0,
                '\n' => self.line_feed(),
                '\x08' => self.cursor.x = self.cursor.x.saturating_sub(1),
                '\t' => {
                    self.cursor.x = (self.cursor.x + (8 - self.cursor.x % 8)).min(self.cols - 1);
                }
                '\x07' => {} // BEL
                ch if ch >= ' ' => self.put_char(ch),
                _ => {}
            },

            ParserState::Escape => match ch {
                '[' => {
                    self.state = ParserState::Csi;
                    self.csi_buf.clear();
                }
                ']' => {
                    self.state = ParserState::Osc;
                    self.csi_buf.clear();
                }
                'D' => {
                    self.line_feed();
                    self.state = ParserState::Normal;
                }
                'M' => {
                    self.reverse_line_feed();
                    self.state = ParserState::Normal;
                }
                'E' => {
                    self.cursor.x = 0;
                    self.line_feed();
                    self.state = ParserState::Normal;
                }
                '7' => {
                    self.saved_cursor = self.cursor;
                    self.state = ParserState::Normal;
                }
                '8' => {
                    self.cursor = self.saved_cursor;
                    self.state = ParserState::Normal;
                }
                'c' => self.reset(),
                _ => self.state = ParserState::Normal,
            },

            ParserState::Csi => {
                if ch.is_ascii_digit() || ch == ';' || ch == '?' {
                    if self.csi_buf.len() < MAX_CSI_BUF {
                        self.csi_buf.push(ch);
                    } else {
                        self.state = ParserState::Normal;
                        self.csi_buf.clear();
                    }
                } else {
                    self.exec_csi(ch);
                    self.state = ParserState::Normal;
                }
            }

            ParserState::Osc => {
                if ch == '\x07' || ch == '\x1b' {
                    self.state = ParserState::Normal;
                }
            }
        }
    }

    fn put_char(&mut self, ch: char) {
        if self.cursor.x >= self.cols {
            self.cursor.x = 0;
            self.line_feed();
        }
        self.buffer[self.cursor.y * self.cols + self.cursor.x] = Cell { ch, attr: self.attr };
        self.cursor.x += 1;
    }

    fn line_feed(&mut self) {
        if self.cursor.y < self.rows - 1 {
            self.cursor.y += 1;
        } else {
            self.scroll_up();
        }
    }

    fn reverse_line_feed(&mut self) {
        if self.cursor.y > 0 {
            self.cursor.y -= 1;
        } else {
            self.scroll_down();
        }
    }

    fn scroll_up(&mut self) {
        self.buffer.drain(..self.cols);
        self.buffer
            .extend(std::iter::repeat(Cell::default()).take(self.cols));
    }

    fn scroll_down(&mut self) {
        self.buffer.truncate(self.cols * (self.rows - 1));
        self.buffer
            .splice(0..0, std::iter::repeat(Cell::default()).take(self.cols));
    }

    /// Splits the accumulated parameter buffer on `;`. Empty and malformed
    /// entries become `default`; a leading `?` (private modes) is dropped.
    fn parse_params(&self, default: i32) -> Vec<i32> {
        let raw = self.csi_buf.trim_start_matches('?');
        if raw.is_empty() {
            return vec![default];
        }
        raw.split(';')
            .map(|part| part.parse::<i32>().unwrap_or(default))
            .collect()
    }

    fn exec_csi(&mut self, cmd: char) {
        let params = self.parse_params(0);
        let p0 = params[0];

        match cmd {
            'm' => self.select_graphic_rendition(&params),

            'H' | 'f' => {
                let row = params.first().copied().unwrap_or(1).max(1) as usize;
                let col = params.get(1).copied().unwrap_or(1).max(1) as usize;
                self.cursor.y = (row - 1).min(self.rows - 1);
                self.cursor.x = (col - 1).min(self.cols - 1);
            }

            'A' => self.cursor.y = self.cursor.y.saturating_sub(step(p0)),
            'B' => self.cursor.y = (self.cursor.y + step(p0)).min(self.rows - 1),
            'C' => self.cursor.x = (self.cursor.x + step(p0)).min(self.cols - 1),
            'D' => self.cursor.x = self.cursor.x.saturating_sub(step(p0)),

            'E' => {
                self.cursor.x = 0;
                self.cursor.y = (self.cursor.y + step(p0)).min(self.rows - 1);
            }
            'F' => {
                self.cursor.x = 0;
                self.cursor.y = self.cursor.y.saturating_sub(step(p0));
            }
            'G' => self.cursor.x = (step(p0) - 1).min(self.cols - 1),

            'J' => self.erase_display(p0),
            'K' => self.erase_line(p0),

            'S' => {
                for _ in 0..step(p0) {
                    self.scroll_up();
                }
            }
            'T' => {
                for _ in 0..step(p0) {
                    self.scroll_down();
                }
            }

            's' => self.saved_cursor = self.cursor,
            'u' => self.cursor = self.saved_cursor,

            'n' => self.device_status_report(p0),

            _ => {} // unknown final byte, drop the sequence
        }
    }

    fn device_status_report(&mut self, param: i32) {
        match param {
            5 => self.emit_response(b"\x1b[0n"),
            6 => {
                let row = (self.cursor.y + 1).min(self.rows);
                let col = (self.cursor.x + 1).min(self.cols);
                let report = format!("\x1b[{row};{col}R");
                self.emit_response(report.as_bytes());
            }
            _ => {}
        }
    }

    fn emit_response(&mut self, data: &[u8]) {
        if let Some(callback) = &mut self.response {
            callback(data);
        }
    }

    fn select_graphic_rendition(&mut self, params: &[i32]) {
        let mut i = 0;
        while i < params.len() {
            match params[i] {
                0 => self.attr = TextAttribute::DEFAULT,
                1 => self.attr.bold = true,
                2 | 22 => self.attr.bold = false,
                4 => self.attr.underline = true,
                5 | 6 => self.attr.blink = true,
                7 => self.attr.reverse = true,
                24 => self.attr.underline = false,
                25 => self.attr.blink = false,
                27 => self.attr.reverse = false,

                p @ 30..=37 => self.attr.foreground = TerminalColor::Palette((p - 30) as u8),
                38 => {
                    if let Some((color, skip)) = extended_color(params, i) {
                        self.attr.foreground = color;
                        i += skip;
                    }
                }
                39 => self.attr.foreground = TerminalColor::Palette(DEFAULT_FG),

                p @ 40..=47 => self.attr.background = TerminalColor::Palette((p - 40) as u8),
                48 => {
                    if let Some((color, skip)) = extended_color(params, i) {
                        self.attr.background = color;
                        i += skip;
                    }
                }
                49 => self.attr.background = TerminalColor::Palette(DEFAULT_BG),

                p @ 90..=97 => self.attr.foreground = TerminalColor::Palette((p - 90 + 8) as u8),
                p @ 100..=107 => self.attr.background = TerminalColor::Palette((p - 100 + 8) as u8),

                _ => {} // unsupported rendition codes are ignored
            }
            i += 1;
        }
    }

    fn erase_display(&mut self, mode: i32) {
        match mode {
            0 => {
                let from = self.cursor.x.min(self.cols - 1);
                for x in from..self.cols {
                    self.buffer[self.cursor.y * self.cols + x] = Cell::default();
                }
                for idx in (self.cursor.y + 1) * self.cols..self.buffer.len() {
                    self.buffer[idx] = Cell::default();
                }
            }
            1 => {
                let to = self.cursor.x.min(self.cols - 1);
                for x in 0..=to {
                    self.buffer[self.cursor.y * self.cols + x] = Cell::default();
                }
                for idx in 0..self.cursor.y * self.cols {
                    self.buffer[idx] = Cell::default();
                }
            }
            2 => self.buffer.fill(Cell::default()),
            _ => {}
        }
    }

    fn erase_line(&mut self, mode: i32) {
        let row = self.cursor.y * self.cols;
        match mode {
            0 => {
                let from = self.cursor.x.min(self.cols - 1);
                for x in from..self.cols {
                    self.buffer[row + x] = Cell::default();
                }
            }
            1 => {
                let to = self.cursor.x.min(self.cols - 1);
                for x in 0..=to {
                    self.buffer[row + x] = Cell::default();
                }
            }
            2 => {
                for x in 0..self.cols {
                    self.buffer[row + x] = Cell::default();
                }
            }
            _ => {}
        }
    }
}

fn step(param: i32) -> usize {
    param.max(1) as usize
}

/// Handles the `38;5;n` / `38;2;r;g;b` (and `48;...`) extensions. Returns
/// the parsed color and how many extra parameters it consumed; a truncated
/// extension returns `None` and parsing continues at the next parameter.
fn extended_color(params: &[i32], i: usize) -> Option<(TerminalColor, usize)> {
    match params.get(i + 1) {
        Some(5) => params
            .get(i + 2)
            .map(|n| (TerminalColor::Palette(*n as u8), 2)),
        Some(2) => {
            if i + 4 < params.len() {
                Some((
                    TerminalColor::Rgb(
                        params[i + 2] as u8,
                        params[i + 3] as u8,
                        params[i + 4] as u8,
                    ),
                    4,
                ))
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{Screen, DEFAULT_COLS, DEFAULT_ROWS};
    use crate::model::Position;

    fn screen() -> Screen {
        Screen::new(DEFAULT_COLS, DEFAULT_ROWS)
    }

    fn row_text(screen: &Screen, y: usize) -> String {
        (0..screen.cols()).map(|x| screen.cell(x, y).ch).collect()
    }

    #[test]
    fn plain_text_and_newlines() {
        let mut s = screen();
        s.feed("hello\r\nworld");
        assert!(row_text(&s, 0).starts_with("hello"));
        assert!(row_text(&s, 1).starts_with("world"));
        assert_eq!(s.cursor(), Position::new(5, 1));
    }

    #[test]
    fn truecolor_cells_and_reset() {
        let mut s = screen();
        s.feed("\x1b[38;2;10;20;30mX\x1b[0mY");
        let snap = s.snapshot();
        assert_eq!(snap.cells[0].ch, 'X');
        assert_eq!(snap.cells[0].fg, (10, 20, 30));
        assert_eq!(snap.cells[1].ch, 'Y');
        assert_eq!(snap.cells[1].fg, (170, 170, 170));
    }

    #[test]
    fn indexed_color_and_bold_promotion() {
        let mut s = screen();
        s.feed("\x1b[38;5;196ma\x1b[0m\x1b[1;34mb");
        let snap = s.snapshot();
        assert_eq!(snap.cells[0].fg, (255, 0, 0));
        assert_eq!(snap.cells[1].fg, (85, 85, 255));
        assert!(snap.cells[1].bold);
    }

    #[test]
    fn truncated_extended_color_keeps_parsing() {
        let mut s = screen();
        // the 38;5 extension is cut short; the later 4 still applies
        s.feed("\x1b[38;5m\x1b[4mu");
        assert!(s.snapshot().cells[0].underline);
    }

    #[test]
    fn reverse_swaps_resolved_colors_only() {
        let mut s = screen();
        s.feed("\x1b[7mR");
        let snap = s.snapshot();
        assert_eq!(snap.cells[0].fg, (0, 0, 0));
        assert_eq!(snap.cells[0].bg, (170, 170, 170));
        assert!(snap.cells[0].reverse);
        // the stored attribute keeps its original colors
        assert_eq!(
            s.cell(0, 0).attr.foreground,
            crate::model::TerminalColor::Palette(7)
        );
    }

    #[test]
    fn cursor_motion_is_clamped() {
        let mut s = screen();
        s.feed("\x1b[99;200H");
        assert_eq!(s.cursor(), Position::new(79, 24));
        s.feed("\x1b[500A\x1b[500D");
        assert_eq!(s.cursor(), Position::new(0, 0));
        s.feed("\x1b[3B\x1b[7C\x1b[40G");
        assert_eq!(s.cursor(), Position::new(39, 3));
    }

    #[test]
    fn wrap_writes_through_the_right_edge() {
        let mut s = screen();
        s.feed(&"x".repeat(81));
        assert_eq!(s.cell(79, 0).ch, 'x');
        assert_eq!(s.cell(0, 1).ch, 'x');
        assert_eq!(s.cursor(), Position::new(1, 1));
    }

    #[test]
    fn bottom_line_feed_scrolls() {
        let mut s = screen();
        s.feed("top");
        s.feed(&"\n".repeat(24));
        assert_eq!(s.cursor().y, 24);
        assert!(row_text(&s, 0).starts_with("top"));
        s.feed("\n");
        assert_eq!(row_text(&s, 0).trim(), "");
    }

    #[test]
    fn reverse_line_feed_scrolls_down_at_the_top() {
        let mut s = screen();
        s.feed("first");
        s.feed("\x1b[H\x1bM");
        assert_eq!(s.cursor().y, 0);
        assert_eq!(row_text(&s, 0).trim(), "");
        assert!(row_text(&s, 1).starts_with("first"));
    }

    #[test]
    fn save_and_restore_cursor() {
        let mut s = screen();
        s.feed("\x1b[10;20H\x1b7\x1b[H\x1b8");
        assert_eq!(s.cursor(), Position::new(19, 9));
        s.feed("\x1b[5;5H\x1b[s\x1b[H\x1b[u");
        assert_eq!(s.cursor(), Position::new(4, 4));
    }

    #[test]
    fn erase_line_modes() {
        let mut s = screen();
        s.feed("abcdefgh");
        s.feed("\x1b[4G\x1b[1K");
        assert_eq!(row_text(&s, 0).trim_end(), "    efgh".trim_end());
        s.feed("\x1b[6G\x1b[0K");
        assert_eq!(row_text(&s, 0).trim_end(), "    e");
        s.feed("\x1b[2K");
        assert_eq!(row_text(&s, 0).trim(), "");
    }

    #[test]
    fn erase_display_clears_everything() {
        let mut s = screen();
        s.feed("one\r\ntwo\r\nthree");
        s.feed("\x1b[2J");
        for y in 0..s.rows() {
            assert_eq!(row_text(&s, y).trim(), "");
        }
    }

    #[test]
    fn device_status_reports() {
        let mut s = screen();
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();
        s.set_response_callback(Box::new(move |data| {
            sink.lock().unwrap().extend_from_slice(data);
        }));

        s.feed("\x1b[5;4H\x1b[6n");
        assert_eq!(captured.lock().unwrap().as_slice(), b"\x1b[5;4R");
        captured.lock().unwrap().clear();
        s.feed("\x1b[5n");
        assert_eq!(captured.lock().unwrap().as_slice(), b"\x1b[0n");
    }

    #[test]
    fn tab_advances_to_the_next_stop() {
        let mut s = screen();
        s.feed("\tA");
        assert_eq!(s.cell(8, 0).ch, 'A');
        s.feed("\x1b[79G\t");
        assert_eq!(s.cursor().x, 79);
    }

    #[test]
    fn oversized_csi_sequences_reset_silently() {
        let mut s = screen();
        let mut soup = String::from("\x1b[");
        soup.push_str(&"9".repeat(3000));
        soup.push('m');
        s.feed(&soup);
        // the parser recovered and keeps rendering
        s.feed("\x1b[HA");
        assert_eq!(s.cell(0, 0).ch, 'A');
        let snap = s.snapshot();
        assert_eq!(snap.cells.len(), s.cols() * s.rows());
    }

    #[test]
    fn grid_and_cursor_invariants_survive_byte_soup() {
        let mut s = screen();
        let soup: String = (0u32..2048)
            .filter_map(|i| char::from_u32(i % 160))
            .collect();
        s.feed(&soup);
        s.feed("\x1b[999;999H\x1b[J\x1b]junk\x07\x1b[?25h");
        let snap = s.snapshot();
        assert_eq!(snap.cells.len(), s.cols() * s.rows());
        assert!(snap.cursor.x <= s.cols());
        assert!(snap.cursor.y < s.rows());
    }

    #[test]
    fn full_reset_restores_defaults() {
        let mut s = screen();
        s.feed("\x1b[1;31mhot\x1b[10;10H");
        s.feed("\x1bc");
        assert_eq!(s.cursor(), Position::new(0, 0));
        assert_eq!(s.cell(0, 0).ch, ' ');
        s.feed("x");
        assert_eq!(s.snapshot().cells[0].fg, (170, 170, 170));
    }
}
