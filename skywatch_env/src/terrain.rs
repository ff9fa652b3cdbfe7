//! Terrain boundary: the workspace consumes terrain through this trait only.

use crate::error::EnvError;
use crate::types::Terrain;

/// Source of terrain classes for a bounded rectangular workspace.
///
/// # Implementations
///
/// - **Flat**: `FlatTerrain` - every cell is plain
/// - **Raster**: `RasterTerrain` - a row-major grid filled by a generator
pub trait TerrainSource {
    /// Workspace width in cells.
    fn width(&self) -> usize;

    /// Workspace height in cells.
    fn height(&self) -> usize;

    /// Terrain class at integer coordinates.
    ///
    /// Out-of-bounds coordinates read as `Terrain::Plain`.
    fn terrain_at(&self, x: i32, y: i32) -> Terrain;
}

/// Terrain with no features.
#[derive(Debug, Clone, Copy)]
pub struct FlatTerrain {
    width: usize,
    height: usize,
}

impl FlatTerrain {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }
}

impl TerrainSource for FlatTerrain {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn terrain_at(&self, _x: i32, _y: i32) -> Terrain {
        Terrain::Plain
    }
}

/// Row-major terrain raster.
#[derive(Debug, Clone)]
pub struct RasterTerrain {
    width: usize,
    height: usize,
    cells: Vec<Terrain>,
}

impl RasterTerrain {
    /// Creates an all-plain raster.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![Terrain::Plain; width * height],
        }
    }

    /// Copies any terrain source into a raster.
    pub fn capture(source: &dyn TerrainSource) -> Self {
        let mut raster = Self::new(source.width(), source.height());
        for y in 0..source.height() {
            for x in 0..source.width() {
                raster.cells[y * source.width() + x] = source.terrain_at(x as i32, y as i32);
            }
        }
        raster
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return None;
        }
        Some(y as usize * self.width + x as usize)
    }

    /// Sets the terrain class of one cell.
    pub fn set(&mut self, x: i32, y: i32, terrain: Terrain) -> Result<(), EnvError> {
        let idx = self.index(x, y).ok_or(EnvError::OutOfBounds {
            x: x as i64,
            y: y as i64,
        })?;
        self.cells[idx] = terrain;
        Ok(())
    }

    /// Number of cells of the given class.
    pub fn count(&self, terrain: Terrain) -> usize {
        self.cells.iter().filter(|t| **t == terrain).count()
    }
}

impl TerrainSource for RasterTerrain {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn terrain_at(&self, x: i32, y: i32) -> Terrain {
        self.index(x, y).map(|i| self.cells[i]).unwrap_or_default()
    }
}
