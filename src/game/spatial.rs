//! Uniform-grid spatial hash used as the collision broad phase

use std::collections::{BTreeSet, HashMap};

use super::math::Vec2;
use super::physics::BodyId;

/// Buckets bodies by the grid cell containing their position
#[derive(Debug, Clone)]
pub struct SpatialHash {
    cell_size: f32,
    cells: HashMap<(i64, i64), Vec<BodyId>>,
}

impl SpatialHash {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size: if cell_size > 0.0 { cell_size } else { 100.0 },
            cells: HashMap::new(),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }

    fn cell_of(&self, position: Vec2) -> (i64, i64) {
        (
            (position.x / self.cell_size).floor() as i64,
            (position.y / self.cell_size).floor() as i64,
        )
    }

    pub fn insert(&mut self, id: BodyId, position: Vec2) {
        let cell = self.cell_of(position);
        self.cells.entry(cell).or_default().push(id);
    }

    /// Candidate pairs from each body's 3x3 cell neighbourhood.
    ///
    /// Pairs are keyed `(lower, higher)`, deduplicated and returned in
    /// ascending order so resolution order never depends on hash iteration.
    pub fn candidate_pairs(&self) -> Vec<(BodyId, BodyId)> {
        let mut pairs = BTreeSet::new();

        for (&(cx, cy), ids) in &self.cells {
            for &id in ids {
                for dx in -1..=1 {
                    for dy in -1..=1 {
                        let Some(neighbours) = self.cells.get(&(cx + dx, cy + dy)) else {
                            continue;
                        };
                        for &other in neighbours {
                            if other != id {
                                pairs.insert((id.min(other), id.max(other)));
                            }
                        }
                    }
                }
            }
        }

        pairs.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neighbours_pair_once_and_distant_bodies_do_not() {
        let mut grid = SpatialHash::new(100.0);
        grid.insert(BodyId(3), Vec2::new(50.0, 50.0));
        grid.insert(BodyId(1), Vec2::new(150.0, 60.0));
        grid.insert(BodyId(2), Vec2::new(950.0, 950.0));

        assert_eq!(grid.candidate_pairs(), vec![(BodyId(1), BodyId(3))]);
    }

    #[test]
    fn pairs_come_back_sorted() {
        let mut grid = SpatialHash::new(100.0);
        for (i, x) in [5u32, 2, 9, 1].iter().zip([10.0, 20.0, 30.0, 40.0]) {
            grid.insert(BodyId(*i), Vec2::new(x, 10.0));
        }

        let pairs = grid.candidate_pairs();
        assert_eq!(pairs.len(), 6);
        let mut sorted = pairs.clone();
        sorted.sort();
        assert_eq!(pairs, sorted);
        assert_eq!(pairs[0], (BodyId(1), BodyId(2)));
    }

    #[test]
    fn negative_coordinates_use_floor_cells() {
        let mut grid = SpatialHash::new(100.0);
        grid.insert(BodyId(1), Vec2::new(-10.0, 0.0));
        grid.insert(BodyId(2), Vec2::new(-250.0, 0.0));
        assert!(grid.candidate_pairs().is_empty());
    }
}
