mod attribute;
pub use attribute::*;

mod cp437;
pub use cp437::*;

mod palette;
pub use palette::*;

mod screen;
pub use screen::*;

use serde_derive::Serialize;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Size<T> {
    pub width: T,
    pub height: T,
}

impl<T> Size<T> {
    pub fn from(width: T, height: T) -> Self {
        Size { width, height }
    }
}

/// 0-based cell coordinates; `x` is the column, `y` the row.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Position {
    pub x: usize,
    pub y: usize,
}

impl Position {
    pub fn new(x: usize, y: usize) -> Self {
        Position { x, y }
    }
}
