//! A* search over the tile grid

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Grid cell coordinate (column, row)
pub type Cell = (usize, usize);

fn manhattan(a: Cell, b: Cell) -> u32 {
    (a.0.abs_diff(b.0) + a.1.abs_diff(b.1)) as u32
}

/// Shortest 4-connected path from `start` to `goal`, both inclusive.
///
/// `walkable` is row-major with `width` columns. Frontier ties are broken by
/// lowest f-score, then by insertion order. Returns an empty path when the
/// goal cannot be reached or either endpoint lies outside the grid.
pub fn find_path(walkable: &[bool], width: usize, start: Cell, goal: Cell) -> Vec<Cell> {
    if width == 0 || walkable.is_empty() {
        return Vec::new();
    }
    let height = walkable.len() / width;
    let in_bounds = |c: Cell| c.0 < width && c.1 < height;
    if !in_bounds(start) || !in_bounds(goal) || !walkable[goal.1 * width + goal.0] {
        return Vec::new();
    }

    let index = |c: Cell| c.1 * width + c.0;
    let start_idx = index(start);
    let goal_idx = index(goal);

    let mut g_score = vec![u32::MAX; walkable.len()];
    let mut came_from: Vec<Option<usize>> = vec![None; walkable.len()];
    let mut closed = vec![false; walkable.len()];
    let mut open = BinaryHeap::new();
    let mut inserted: u64 = 0;

    g_score[start_idx] = 0;
    open.push(Reverse((manhattan(start, goal), inserted, start_idx)));

    while let Some(Reverse((_, _, current))) = open.pop() {
        if closed[current] {
            continue;
        }
        if current == goal_idx {
            let mut path = vec![goal];
            let mut node = current;
            while let Some(prev) = came_from[node] {
                path.push((prev % width, prev / width));
                node = prev;
            }
            path.reverse();
            return path;
        }
        closed[current] = true;

        let (cx, cy) = (current % width, current / width);
        let neighbours = [
            (cx.checked_add(1), Some(cy)),
            (cx.checked_sub(1), Some(cy)),
            (Some(cx), cy.checked_add(1)),
            (Some(cx), cy.checked_sub(1)),
        ];

        for (nx, ny) in neighbours {
            let (Some(nx), Some(ny)) = (nx, ny) else {
                continue;
            };
            let next = (nx, ny);
            if !in_bounds(next) {
                continue;
            }
            let next_idx = index(next);
            if closed[next_idx] || !walkable[next_idx] {
                continue;
            }

            let tentative = g_score[current] + 1;
            if tentative < g_score[next_idx] {
                g_score[next_idx] = tentative;
                came_from[next_idx] = Some(current);
                inserted += 1;
                open.push(Reverse((tentative + manhattan(next, goal), inserted, next_idx)));
            }
        }
    }

    Vec::new()
}
