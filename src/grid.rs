//! Pointer position → grid cell classification.

use crate::controller::Screen;

/// A classified grid cell. `row` and `col` are 1-based; `index` is the
/// 0-based row-major position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub row: u8,
    pub col: u8,
    pub index: u8,
}

/// Side length of the square grid laid over `screen`.
pub fn grid_size(screen: Screen) -> u8 {
    match screen {
        Screen::Result => 6,
        _ => 3,
    }
}

pub fn classify(pointer: (f32, f32), viewport: (u32, u32), screen: Screen) -> Option<Cell> {
    let (w, h) = viewport;
    if w == 0 || h == 0 {
        return None;
    }
    let n = grid_size(screen);

    let cell_w = w as f32 / n as f32;
    let cell_h = h as f32 / n as f32;

    // float→int casts saturate (NaN → 0), the min() keeps x == w on the last column
    let col = ((pointer.0 / cell_w) as u32).min(n as u32 - 1) as u8 + 1;
    let row = ((pointer.1 / cell_h) as u32).min(n as u32 - 1) as u8 + 1;

    Some(Cell {
        row,
        col,
        index: (row - 1) * n + (col - 1),
    })
}
