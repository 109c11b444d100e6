/// Default foreground: light grey.
pub const DEFAULT_FG: u8 = 7;
/// Default background: black.
pub const DEFAULT_BG: u8 = 0;

/// The 16-color IBM VGA palette.
pub const PALETTE_16: [(u8, u8, u8); 16] = [
    (0, 0, 0),       //  0 black
    (170, 0, 0),     //  1 red
    (0, 170, 0),     //  2 green
    (170, 85, 0),    //  3 brown
    (0, 0, 170),     //  4 blue
    (170, 0, 170),   //  5 magenta
    (0, 170, 170),   //  6 cyan
    (170, 170, 170), //  7 light grey
    (85, 85, 85),    //  8 dark grey
    (255, 85, 85),   //  9 light red
    (85, 255, 85),   // 10 light green
    (255, 255, 85),  // 11 yellow
    (85, 85, 255),   // 12 light blue
    (255, 85, 255),  // 13 light magenta
    (85, 255, 255),  // 14 light cyan
    (255, 255, 255), // 15 white
];
