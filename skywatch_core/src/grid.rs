//! The workspace grid: terrain, ground-truth coverage and the hazard arena.

use crate::hazard::{HazardField, HazardOrigin};
use serde::{Deserialize, Serialize};
use skywatch_env::{
    check_position, check_radius, Cell, EnvError, HazardId, HazardKind, Position, RasterTerrain,
    SensorVector, Severity, Terrain, TerrainSource,
};

/// Row-major explored/unexplored bitmap over the workspace.
///
/// Used for ground-truth coverage, for each drone's personal exploration
/// map and for the base station's global view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageMap {
    width: usize,
    height: usize,
    bits: Vec<bool>,
    marked: usize,
}

impl CoverageMap {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width * height],
            marked: 0,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn contains(&self, cell: Cell) -> bool {
        cell.x >= 0 && cell.y >= 0 && (cell.x as usize) < self.width && (cell.y as usize) < self.height
    }

    fn index(&self, cell: Cell) -> Option<usize> {
        self.contains(cell)
            .then(|| cell.y as usize * self.width + cell.x as usize)
    }

    /// Marks one cell. Returns true if it was newly marked; out-of-bounds
    /// cells are ignored.
    pub fn mark(&mut self, cell: Cell) -> bool {
        match self.index(cell) {
            Some(i) if !self.bits[i] => {
                self.bits[i] = true;
                self.marked += 1;
                true
            }
            _ => false,
        }
    }

    /// Out-of-bounds cells count as explored: there is nothing to visit.
    pub fn is_marked(&self, cell: Cell) -> bool {
        self.index(cell).map(|i| self.bits[i]).unwrap_or(true)
    }

    pub fn marked_count(&self) -> usize {
        self.marked
    }

    /// Fraction of cells marked; an empty map is fully covered.
    pub fn ratio(&self) -> f64 {
        if self.bits.is_empty() {
            1.0
        } else {
            self.marked as f64 / self.bits.len() as f64
        }
    }

    pub fn is_complete(&self) -> bool {
        self.marked == self.bits.len()
    }

    /// OR-merges `other` into `self`. Returns the number of newly marked cells.
    pub fn union_with(&mut self, other: &CoverageMap) -> usize {
        if other.width != self.width || other.height != self.height {
            return 0;
        }
        let mut added = 0;
        for (mine, theirs) in self.bits.iter_mut().zip(other.bits.iter()) {
            if *theirs && !*mine {
                *mine = true;
                added += 1;
            }
        }
        self.marked += added;
        added
    }

    /// Unmarked cells in row-major order.
    pub fn unmarked(&self) -> impl Iterator<Item = Cell> + '_ {
        self.bits.iter().enumerate().filter(|(_, b)| !**b).map(move |(i, _)| {
            Cell::new((i % self.width) as i32, (i / self.width) as i32)
        })
    }
}

/// Ground truth of one mission.
#[derive(Debug, Clone)]
pub struct Workspace {
    terrain: RasterTerrain,
    hazards: HazardField,
    coverage: CoverageMap,
}

impl Workspace {
    /// Captures a terrain source into a new workspace with no hazards.
    pub fn new(terrain: &dyn TerrainSource) -> Result<Self, EnvError> {
        if terrain.width() == 0 || terrain.height() == 0 {
            return Err(EnvError::config(format!(
                "workspace must be non-empty, got {}x{}",
                terrain.width(),
                terrain.height()
            )));
        }
        Ok(Self {
            terrain: RasterTerrain::capture(terrain),
            hazards: HazardField::new(),
            coverage: CoverageMap::new(terrain.width(), terrain.height()),
        })
    }

    pub fn width(&self) -> usize {
        self.coverage.width()
    }

    pub fn height(&self) -> usize {
        self.coverage.height()
    }

    pub fn in_bounds(&self, cell: Cell) -> bool {
        self.coverage.contains(cell)
    }

    pub fn terrain_at(&self, x: i32, y: i32) -> Terrain {
        self.terrain.terrain_at(x, y)
    }

    pub fn terrain(&self) -> &RasterTerrain {
        &self.terrain
    }

    pub fn hazards(&self) -> &HazardField {
        &self.hazards
    }

    pub fn hazards_mut(&mut self) -> &mut HazardField {
        &mut self.hazards
    }

    /// Seeds a hazard at mission start.
    pub fn add_hazard(
        &mut self,
        position: Position,
        severity: Severity,
        radius: f64,
        strength: f64,
        kind: HazardKind,
    ) -> Result<HazardId, EnvError> {
        let cell = Cell::containing(&position);
        if !self.in_bounds(cell) {
            return Err(EnvError::OutOfBounds {
                x: cell.x as i64,
                y: cell.y as i64,
            });
        }
        self.hazards
            .add(position, severity, radius, strength, kind, 0, HazardOrigin::Seeded)
    }

    /// Baseline, terrain modifiers and every active hazard's contribution,
    /// clipped to `[0, 100]`.
    pub fn sensor_signature_at(&self, pos: &Position) -> Result<SensorVector, EnvError> {
        check_position(pos, "sensor sample")?;
        let mut v = SensorVector::BASELINE;

        let cell = Cell::containing(pos);
        match self.terrain_at(cell.x, cell.y) {
            Terrain::Plain => {}
            Terrain::Forest => v.temperature -= 2.0,
            Terrain::River => {
                v.temperature -= 3.0;
                v.flooding += 0.15;
            }
            Terrain::Lake => {
                v.temperature -= 4.0;
                v.flooding += 0.1;
            }
        }

        for hazard in self.hazards.active() {
            let [t, r, m, f] = hazard.signature_at(pos);
            v.temperature += t;
            v.radiation += r;
            v.meteorites += m;
            v.flooding += f;
        }

        Ok(v.clipped())
    }

    /// Marks every in-bounds cell within `radius` of `pos`. Returns the
    /// number of newly explored cells.
    pub fn mark_explored(&mut self, pos: &Position, radius: f64) -> Result<usize, EnvError> {
        check_position(pos, "exploration center")?;
        check_radius(radius, "exploration")?;
        Ok(Cell::disk(pos, radius)
            .into_iter()
            .filter(|c| self.coverage.mark(*c))
            .count())
    }

    pub fn mark_cell(&mut self, cell: Cell) -> bool {
        self.coverage.mark(cell)
    }

    pub fn is_explored(&self, cell: Cell) -> bool {
        self.coverage.is_marked(cell)
    }

    pub fn coverage_ratio(&self) -> f64 {
        self.coverage.ratio()
    }

    pub fn coverage(&self) -> &CoverageMap {
        &self.coverage
    }
}
