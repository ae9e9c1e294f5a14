//! Stateless projections of the grid onto drawing surfaces.
//!
//! Two views are drawn from the same grid: a cell view that fills every ink
//! cell, and a value view that prints the cell value for ink cells only.
//! Both redraw from scratch on every change.

use std::fmt;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::grid::{Cell, Grid, GridView, GRID_SIZE};

/// Edge length of one cell on a pixel surface.
pub const CELL_PX: f64 = 10.0;

/// Edge length of a whole pixel surface.
pub const SURFACE_PX: f64 = CELL_PX * GRID_SIZE as f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridLine {
    /// Vertical line at x = i * CELL_PX, i in 0..=N.
    Column(usize),
    /// Horizontal line at y = i * CELL_PX, i in 0..=N.
    Row(usize),
}

/// Drawing primitives a host canvas has to offer.
pub trait Surface {
    fn clear(&mut self);
    fn grid_line(&mut self, line: GridLine);
    fn fill_cell(&mut self, row: usize, col: usize);
    fn cell_text(&mut self, row: usize, col: usize, text: &str);
}

fn draw_lines<S: Surface + ?Sized>(surface: &mut S) {
    for i in 0..=GRID_SIZE {
        surface.grid_line(GridLine::Column(i));
        surface.grid_line(GridLine::Row(i));
    }
}

/// Grid lines for all cells, filled squares for ink.
pub fn render_cells<S: Surface + ?Sized>(grid: &Grid, surface: &mut S) {
    surface.clear();
    draw_lines(surface);
    for (row, cells) in grid.rows().enumerate() {
        for (col, &cell) in cells.iter().enumerate() {
            if cell == Cell::Ink {
                surface.fill_cell(row, col);
            }
        }
    }
}

/// Grid lines for all cells, the literal value for ink; background blank.
pub fn render_values<S: Surface + ?Sized>(grid: &Grid, surface: &mut S) {
    surface.clear();
    draw_lines(surface);
    for (row, cells) in grid.rows().enumerate() {
        for (col, &cell) in cells.iter().enumerate() {
            if cell == Cell::Ink {
                surface.cell_text(row, col, &cell.value().to_string());
            }
        }
    }
}

/// Map a pointer position on a pixel surface to `(row, col)`.
pub fn cell_at(x: f64, y: f64) -> Option<(usize, usize)> {
    if !(0.0..SURFACE_PX).contains(&x) || !(0.0..SURFACE_PX).contains(&y) {
        return None;
    }
    let col = (x / CELL_PX).floor() as usize;
    let row = (y / CELL_PX).floor() as usize;
    Some((row, col))
}

pub fn energy_label(energy: Option<f64>) -> String {
    match energy {
        Some(e) => format!("Energy: {e}"),
        None => "Energy: Not calculated".to_string(),
    }
}

/// The pair of surfaces a session draws into.
pub struct RenderSurface<C, V> {
    pub cells: C,
    pub values: V,
}

impl<C: Surface, V: Surface> RenderSurface<C, V> {
    pub fn new(cells: C, values: V) -> Self {
        Self { cells, values }
    }

    pub fn render(&mut self, view: &GridView) {
        render_cells(&view.grid, &mut self.cells);
        render_values(&view.grid, &mut self.values);
    }

    /// Redraw on every grid change until `cancel` fires or the model is
    /// dropped, calling `present` after each full redraw.
    pub async fn follow<F>(
        &mut self,
        mut rx: watch::Receiver<GridView>,
        cancel: CancellationToken,
        mut present: F,
    ) where
        F: FnMut(&Self, &GridView),
    {
        loop {
            let view = rx.borrow_and_update().clone();
            self.render(&view);
            present(self, &view);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// Character-cell surface for terminals: one character per grid cell.
#[derive(Debug, Clone)]
pub struct TextSurface {
    fill: char,
    blank: char,
    chars: Vec<char>,
    lines_drawn: usize,
}

impl TextSurface {
    pub fn new(fill: char, blank: char) -> Self {
        Self {
            fill,
            blank,
            chars: vec![blank; GRID_SIZE * GRID_SIZE],
            lines_drawn: 0,
        }
    }

    /// `█` for filled cells, `·` elsewhere.
    pub fn cells() -> Self {
        Self::new('█', '·')
    }

    /// Digits for ink cells, spaces elsewhere.
    pub fn values() -> Self {
        Self::new('#', ' ')
    }

    pub fn char_at(&self, row: usize, col: usize) -> Option<char> {
        (row < GRID_SIZE && col < GRID_SIZE).then(|| self.chars[row * GRID_SIZE + col])
    }

    pub fn lines_drawn(&self) -> usize {
        self.lines_drawn
    }
}

impl Surface for TextSurface {
    fn clear(&mut self) {
        self.chars.fill(self.blank);
        self.lines_drawn = 0;
    }

    fn grid_line(&mut self, _line: GridLine) {
        // Terminal cells are their own grid.
        self.lines_drawn += 1;
    }

    fn fill_cell(&mut self, row: usize, col: usize) {
        if row < GRID_SIZE && col < GRID_SIZE {
            self.chars[row * GRID_SIZE + col] = self.fill;
        }
    }

    fn cell_text(&mut self, row: usize, col: usize, text: &str) {
        if row < GRID_SIZE && col < GRID_SIZE {
            // "1" is the only text ever drawn; keep its last character.
            self.chars[row * GRID_SIZE + col] = text.chars().last().unwrap_or(self.fill);
        }
    }
}

impl fmt::Display for TextSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.chars.chunks(GRID_SIZE) {
            let line: String = row.iter().collect();
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}
