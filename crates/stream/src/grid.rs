use std::collections::{HashMap, HashSet};

use glam::Vec3;
use gridstream_common::{EntityId, WORLD_INTERIOR};

/// A 2D cell coordinate in the streaming grid (x/y plane, z is up).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellCoord {
    pub x: i32,
    pub y: i32,
}

impl CellCoord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Errors from grid insertion. All of them are caller bugs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GridError {
    #[error("position ({x}, {y}) lies outside the grid bounds [{min}, {max}]")]
    OutOfBounds { x: f32, y: f32, min: f32, max: f32 },
    #[error("entity {0} is already indexed by the grid")]
    AlreadyPresent(EntityId),
    #[error("entity {id} is in interior {interior_id}; only the world interior is indexed")]
    NotWorldBound { id: EntityId, interior_id: u32 },
}

/// Fixed-size bucketing of outdoor world space.
///
/// Entities are assigned to the cell containing their position, offset from
/// the lower bound: `floor((coordinate - min_bound) / cell_size)`. A side
/// table remembers each member's cell so removal never has to scan, and so a
/// second insertion of the same entity is caught instead of creating a
/// duplicate bucket entry.
#[derive(Debug)]
pub struct SpatialGrid {
    cell_size: f32,
    min_bound: f32,
    max_bound: f32,
    cells_per_axis: i32,
    cells: HashMap<CellCoord, HashSet<EntityId>>,
    membership: HashMap<EntityId, CellCoord>,
}

impl SpatialGrid {
    /// Create an empty grid covering `[min_bound, max_bound]` on both axes.
    pub fn new(cell_size: f32, min_bound: f32, max_bound: f32) -> Self {
        assert!(cell_size > 0.0, "cell_size must be positive");
        assert!(min_bound < max_bound, "min_bound must be below max_bound");
        Self {
            cell_size,
            min_bound,
            max_bound,
            cells_per_axis: ((max_bound - min_bound) / cell_size).ceil() as i32,
            cells: HashMap::new(),
            membership: HashMap::new(),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn bounds(&self) -> (f32, f32) {
        (self.min_bound, self.max_bound)
    }

    pub fn in_bounds(&self, position: Vec3) -> bool {
        let range = self.min_bound..=self.max_bound;
        range.contains(&position.x) && range.contains(&position.y)
    }

    /// Cell containing `position`. Positions outside the bounds map to the
    /// empty ring of cells just beyond the edge, so observers out there can
    /// still query their surroundings.
    pub fn position_to_cell(&self, position: Vec3) -> CellCoord {
        let axis = |c: f32| {
            let index = ((c - self.min_bound) / self.cell_size).floor() as i32;
            index.clamp(-1, self.cells_per_axis.saturating_add(1))
        };
        CellCoord {
            x: axis(position.x),
            y: axis(position.y),
        }
    }

    /// Index an entity at `position`.
    pub fn insert(
        &mut self,
        id: EntityId,
        position: Vec3,
        interior_id: u32,
    ) -> Result<CellCoord, GridError> {
        if !self.in_bounds(position) {
            return Err(GridError::OutOfBounds {
                x: position.x,
                y: position.y,
                min: self.min_bound,
                max: self.max_bound,
            });
        }
        if interior_id != WORLD_INTERIOR {
            return Err(GridError::NotWorldBound { id, interior_id });
        }
        if self.membership.contains_key(&id) {
            return Err(GridError::AlreadyPresent(id));
        }

        let coord = self.position_to_cell(position);
        self.cells.entry(coord).or_default().insert(id);
        self.membership.insert(id, coord);
        Ok(coord)
    }

    /// Remove an entity. Returns whether it was indexed.
    pub fn remove(&mut self, id: EntityId) -> bool {
        let Some(coord) = self.membership.remove(&id) else {
            return false;
        };
        if let Some(cell) = self.cells.get_mut(&coord) {
            cell.remove(&id);
            if cell.is_empty() {
                self.cells.remove(&coord);
            }
        }
        true
    }

    /// Move an entity to a new position, re-bucketing it when the cell
    /// changes. The grid is left untouched if the new position is rejected.
    pub fn relocate(&mut self, id: EntityId, position: Vec3) -> Result<CellCoord, GridError> {
        if !self.in_bounds(position) {
            return Err(GridError::OutOfBounds {
                x: position.x,
                y: position.y,
                min: self.min_bound,
                max: self.max_bound,
            });
        }
        let coord = self.position_to_cell(position);
        if self.membership.get(&id) == Some(&coord) {
            return Ok(coord);
        }
        self.remove(id);
        self.insert(id, position, WORLD_INTERIOR)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.membership.contains_key(&id)
    }

    pub fn cell_of(&self, id: EntityId) -> Option<CellCoord> {
        self.membership.get(&id).copied()
    }

    /// Entities in every cell within `cell_radius` cells of the cell holding
    /// `center`. The sequence is lazy and unordered; it reflects the grid as
    /// it is when iterated.
    pub fn query(&self, center: Vec3, cell_radius: i32) -> impl Iterator<Item = EntityId> + '_ {
        let origin = self.position_to_cell(center);
        (-cell_radius..=cell_radius)
            .flat_map(move |dx| {
                (-cell_radius..=cell_radius).map(move |dy| {
                    CellCoord::new(origin.x.saturating_add(dx), origin.y.saturating_add(dy))
                })
            })
            .filter_map(|coord| self.cells.get(&coord))
            .flat_map(|cell| cell.iter().copied())
    }

    /// Number of indexed entities.
    pub fn len(&self) -> usize {
        self.membership.len()
    }

    pub fn is_empty(&self) -> bool {
        self.membership.is_empty()
    }

    /// Number of non-empty cells.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}
