//! The N×N bipolar pattern grid and the model that owns it.
//!
//! `GridModel` is a cheap cloneable handle. Every mutation goes through a
//! `tokio::sync::watch` channel, so a reader always borrows one complete
//! `GridView`; there is no way to observe a half-written matrix.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::error::ValidationError;
use super::prng::Prng;

/// Side length of the grid (35 × 35 = 1225 neurons).
pub const GRID_SIZE: usize = 35;

/// A bipolar cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i8)]
pub enum Cell {
    #[default]
    Background = -1,
    Ink = 1,
}

impl Cell {
    #[inline]
    pub fn value(self) -> i8 {
        self as i8
    }

    #[inline]
    pub fn flipped(self) -> Self {
        match self {
            Cell::Background => Cell::Ink,
            Cell::Ink => Cell::Background,
        }
    }

    pub fn from_value(v: i64) -> Option<Self> {
        match v {
            -1 => Some(Cell::Background),
            1 => Some(Cell::Ink),
            _ => None,
        }
    }
}

/// Row-major N×N matrix of bipolar cells. On the wire it is a JSON array of
/// N rows of N integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<i64>>", into = "Vec<Vec<i8>>")]
pub struct Grid {
    cells: Vec<Cell>,
}

impl Default for Grid {
    fn default() -> Self {
        Self::blank()
    }
}

impl Grid {
    /// All background (−1).
    pub fn blank() -> Self {
        Self::filled(Cell::Background)
    }

    pub fn filled(cell: Cell) -> Self {
        Self {
            cells: vec![cell; GRID_SIZE * GRID_SIZE],
        }
    }

    /// Build from row-major cells; `None` unless exactly N×N are given.
    pub fn from_cells(cells: Vec<Cell>) -> Option<Self> {
        (cells.len() == GRID_SIZE * GRID_SIZE).then_some(Self { cells })
    }

    /// Validate shape and value domain of a nested integer matrix.
    pub fn from_rows<T>(rows: &[Vec<T>]) -> Result<Self, ValidationError>
    where
        T: Copy + Into<i64>,
    {
        if rows.len() != GRID_SIZE {
            return Err(ValidationError::Rows {
                expected: GRID_SIZE,
                actual: rows.len(),
            });
        }

        let mut cells = Vec::with_capacity(GRID_SIZE * GRID_SIZE);
        for (row, values) in rows.iter().enumerate() {
            if values.len() != GRID_SIZE {
                return Err(ValidationError::Columns {
                    row,
                    expected: GRID_SIZE,
                    actual: values.len(),
                });
            }
            for (col, &v) in values.iter().enumerate() {
                let value: i64 = v.into();
                let cell =
                    Cell::from_value(value).ok_or(ValidationError::Value { row, col, value })?;
                cells.push(cell);
            }
        }
        Ok(Self { cells })
    }

    pub fn to_rows(&self) -> Vec<Vec<i8>> {
        self.cells
            .chunks(GRID_SIZE)
            .map(|row| row.iter().map(|c| c.value()).collect())
            .collect()
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> Option<Cell> {
        if row < GRID_SIZE && col < GRID_SIZE {
            Some(self.cells[row * GRID_SIZE + col])
        } else {
            None
        }
    }

    /// Returns whether the cell changed. Out-of-range coordinates are ignored.
    pub fn set(&mut self, row: usize, col: usize, cell: Cell) -> bool {
        if row >= GRID_SIZE || col >= GRID_SIZE {
            return false;
        }
        let slot = &mut self.cells[row * GRID_SIZE + col];
        let changed = *slot != cell;
        *slot = cell;
        changed
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Cell]> {
        self.cells.chunks(GRID_SIZE)
    }

    pub fn count(&self, cell: Cell) -> usize {
        self.cells.iter().filter(|&&c| c == cell).count()
    }

    /// Flip each cell independently with probability `p`.
    pub fn apply_noise(&mut self, p: f64, rng: &mut Prng) {
        for cell in &mut self.cells {
            if rng.chance(p) {
                *cell = cell.flipped();
            }
        }
    }
}

impl TryFrom<Vec<Vec<i64>>> for Grid {
    type Error = ValidationError;

    fn try_from(rows: Vec<Vec<i64>>) -> Result<Self, Self::Error> {
        Grid::from_rows(&rows)
    }
}

impl From<Grid> for Vec<Vec<i8>> {
    fn from(grid: Grid) -> Self {
        grid.to_rows()
    }
}

/// What readers see: the grid, the energy attached by the last recall, and
/// a revision counter bumped on every change.
#[derive(Debug, Clone, PartialEq)]
pub struct GridView {
    pub grid: Grid,
    pub energy: Option<f64>,
    pub revision: u64,
}

struct Shared {
    tx: watch::Sender<GridView>,
    // Parent of every display lease handed out since the last clear.
    lease: Mutex<CancellationToken>,
    rng: Mutex<Prng>,
}

#[derive(Clone)]
pub struct GridModel {
    shared: Arc<Shared>,
}

impl GridModel {
    pub fn new(seed: Option<u64>) -> Self {
        let (tx, _rx) = watch::channel(GridView {
            grid: Grid::blank(),
            energy: None,
            revision: 0,
        });
        let rng = seed.map(Prng::new).unwrap_or_else(Prng::from_clock);
        Self {
            shared: Arc::new(Shared {
                tx,
                lease: Mutex::new(CancellationToken::new()),
                rng: Mutex::new(rng),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<GridView> {
        self.shared.tx.subscribe()
    }

    pub fn snapshot(&self) -> GridView {
        self.shared.tx.borrow().clone()
    }

    pub fn grid(&self) -> Grid {
        self.shared.tx.borrow().grid.clone()
    }

    pub fn energy(&self) -> Option<f64> {
        self.shared.tx.borrow().energy
    }

    /// Bounds-checked single-cell write; out-of-range is a no-op.
    pub fn set_cell(&self, row: usize, col: usize, cell: Cell) -> bool {
        self.shared.tx.send_if_modified(|view| {
            if view.grid.set(row, col, cell) {
                view.energy = None;
                view.revision += 1;
                true
            } else {
                false
            }
        })
    }

    /// A drawing stroke marks the touched cell as ink.
    pub fn draw(&self, row: usize, col: usize) -> bool {
        self.set_cell(row, col, Cell::Ink)
    }

    /// Reset to all −1 and revoke every outstanding display lease, which
    /// stops an active playback.
    pub fn clear(&self) {
        let mut lease = lock(&self.shared.lease);
        lease.cancel();
        *lease = CancellationToken::new();
        self.commit(Grid::blank(), None);
    }

    pub fn apply_noise(&self, p: f64) {
        let mut rng = lock(&self.shared.rng);
        self.shared.tx.send_modify(|view| {
            view.grid.apply_noise(p, &mut rng);
            view.energy = None;
            view.revision += 1;
        });
    }

    /// Validate and replace wholesale. On error the current grid is kept.
    pub fn load_from<T>(&self, rows: &[Vec<T>]) -> Result<(), ValidationError>
    where
        T: Copy + Into<i64>,
    {
        let grid = Grid::from_rows(rows)?;
        self.replace(grid);
        Ok(())
    }

    pub fn replace(&self, grid: Grid) {
        self.commit(grid, None);
    }

    /// Grid and energy from a recall response, committed together.
    pub fn replace_with_energy(&self, grid: Grid, energy: f64) {
        self.commit(grid, Some(energy));
    }

    /// Token that is cancelled by the next `clear()`.
    pub fn display_lease(&self) -> CancellationToken {
        lock(&self.shared.lease).child_token()
    }

    /// Replace the grid unless `lease` has been revoked. Checked under the
    /// same lock `clear()` takes, so a clear can never be overwritten by a
    /// tick that raced it.
    pub fn display_if_live(&self, lease: &CancellationToken, grid: Grid) -> bool {
        let _guard = lock(&self.shared.lease);
        if lease.is_cancelled() {
            return false;
        }
        self.commit(grid, None);
        true
    }

    fn commit(&self, grid: Grid, energy: Option<f64>) {
        self.shared.tx.send_modify(|view| {
            view.grid = grid;
            view.energy = energy;
            view.revision += 1;
        });
    }
}

impl Default for GridModel {
    fn default() -> Self {
        Self::new(None)
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // A panic while holding these locks cannot leave them inconsistent.
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows_of(n_rows: usize, n_cols: usize, v: i64) -> Vec<Vec<i64>> {
        vec![vec![v; n_cols]; n_rows]
    }

    #[test]
    fn starts_blank() {
        let model = GridModel::new(Some(1));
        let view = model.snapshot();
        assert_eq!(view.grid, Grid::blank());
        assert_eq!(view.grid.count(Cell::Background), GRID_SIZE * GRID_SIZE);
        assert_eq!(view.energy, None);
    }

    #[test]
    fn set_cell_is_bounds_checked() {
        let model = GridModel::new(Some(1));
        assert!(model.set_cell(3, 4, Cell::Ink));
        assert_eq!(model.grid().get(3, 4), Some(Cell::Ink));

        let before = model.snapshot();
        assert!(!model.set_cell(GRID_SIZE, 0, Cell::Ink));
        assert!(!model.set_cell(0, GRID_SIZE, Cell::Ink));
        assert_eq!(model.snapshot(), before);
    }

    #[test]
    fn redrawing_same_cell_does_not_bump_revision() {
        let model = GridModel::new(Some(1));
        assert!(model.draw(0, 0));
        let rev = model.snapshot().revision;
        assert!(!model.draw(0, 0));
        assert_eq!(model.snapshot().revision, rev);
    }

    #[test]
    fn zero_noise_is_identity() {
        let model = GridModel::new(Some(5));
        model.draw(10, 10);
        model.draw(20, 3);
        let before = model.grid();
        model.apply_noise(0.0);
        assert_eq!(model.grid(), before);
    }

    #[test]
    fn full_noise_flips_every_cell() {
        let model = GridModel::new(Some(5));
        model.draw(1, 2);
        let before = model.grid();
        model.apply_noise(1.0);
        let after = model.grid();
        for (a, b) in before.cells().iter().zip(after.cells()) {
            assert_eq!(a.flipped(), *b);
        }
    }

    #[test]
    fn load_rejects_short_matrix_and_keeps_grid() {
        let model = GridModel::new(Some(1));
        model.draw(7, 7);
        let before = model.snapshot();

        let err = model.load_from(&rows_of(34, 35, 1)).unwrap_err();
        assert_eq!(
            err,
            ValidationError::Rows {
                expected: 35,
                actual: 34
            }
        );
        assert_eq!(model.snapshot(), before);
    }

    #[test]
    fn load_rejects_ragged_and_out_of_domain() {
        let model = GridModel::new(Some(1));
        let before = model.snapshot();

        let mut ragged = rows_of(35, 35, -1);
        ragged[12].pop();
        assert!(matches!(
            model.load_from(&ragged),
            Err(ValidationError::Columns { row: 12, .. })
        ));

        let mut zero = rows_of(35, 35, -1);
        zero[2][9] = 0;
        assert_eq!(
            model.load_from(&zero),
            Err(ValidationError::Value {
                row: 2,
                col: 9,
                value: 0
            })
        );
        assert_eq!(model.snapshot(), before);
    }

    #[test]
    fn load_replaces_whole_grid() {
        let model = GridModel::new(Some(1));
        model.load_from(&rows_of(35, 35, 1)).unwrap();
        assert_eq!(model.grid(), Grid::filled(Cell::Ink));
    }

    #[test]
    fn clear_resets_and_revokes_leases() {
        let model = GridModel::new(Some(1));
        let lease = model.display_lease();
        model.replace_with_energy(Grid::filled(Cell::Ink), -12.0);

        model.clear();
        assert!(lease.is_cancelled());
        let view = model.snapshot();
        assert_eq!(view.grid, Grid::blank());
        assert_eq!(view.energy, None);

        assert!(!model.display_if_live(&lease, Grid::filled(Cell::Ink)));
        assert_eq!(model.grid(), Grid::blank());

        let fresh = model.display_lease();
        assert!(model.display_if_live(&fresh, Grid::filled(Cell::Ink)));
        assert_eq!(model.grid(), Grid::filled(Cell::Ink));
    }

    #[test]
    fn local_edits_drop_energy() {
        let model = GridModel::new(Some(1));
        model.replace_with_energy(Grid::blank(), -3.5);
        assert_eq!(model.energy(), Some(-3.5));
        model.draw(0, 1);
        assert_eq!(model.energy(), None);
    }

    #[test]
    fn wire_shape_round_trips_through_json() {
        let mut g = Grid::blank();
        g.set(0, 34, Cell::Ink);
        let json = serde_json::to_string(&g).unwrap();
        assert!(json.starts_with("[[-1,"));
        let back: Grid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, g);

        let bad = serde_json::to_string(&rows_of(35, 35, 2)).unwrap();
        assert!(serde_json::from_str::<Grid>(&bad).is_err());
    }
}
