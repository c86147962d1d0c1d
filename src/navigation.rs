//! Coarse walkability grid and A* fallback pathfinding.
//!
//! Enemies only path through the grid when a straight walk to their target is
//! blocked. The grid itself is derived from the static part of the collision
//! world and shipped to clients in run-length encoded form for debug overlays.

use serde::Serialize;
use tracing::debug;

use crate::constants::{
    LOS_SAMPLE_STEP, NAV_MAX_CELL, NAV_MAX_CELLS, NAV_MAX_EXPANSIONS, NAV_MIN_CELL,
    NAV_PROBE_RADIUS,
};
use crate::geometry::Vec2;
use crate::heap::BinaryMinHeap;
use crate::spatial::{QueryFilter, SpatialEnvironment};
use crate::types::LevelType;

const SQRT_2: f32 = std::f32::consts::SQRT_2;

const NEIGHBORS: [(i32, i32); 8] = [
    (1, 0),
    (-1, 0),
    (0, 1),
    (0, -1),
    (1, 1),
    (1, -1),
    (-1, 1),
    (-1, -1),
];

/// Run-length encoded walkability grid. Each row is `[value, length, ...]`
/// with `1` for walkable and `0` for blocked.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavMesh {
    pub cell_size: f32,
    pub origin: Vec2,
    pub cols: usize,
    pub rows: usize,
    pub rle_rows: Vec<Vec<u32>>,
    pub generation: u64,
}

impl NavMesh {
    pub fn build(env: &SpatialEnvironment, generation: u64) -> Self {
        let (min, max) = env.boundary.extent();
        let width = (max.x - min.x).max(1.0);
        let height = (max.y - min.y).max(1.0);
        let cell_size = choose_cell_size(width, height);
        let cols = (width / cell_size).ceil() as usize;
        let rows = (height / cell_size).ceil() as usize;
        let probe = NAV_PROBE_RADIUS.max(cell_size * 0.5);
        let filter = QueryFilter::navigation();

        let mut rle_rows = Vec::with_capacity(rows);
        let mut row = Vec::with_capacity(cols);
        for r in 0..rows {
            row.clear();
            for c in 0..cols {
                let center = Vec2::new(
                    min.x + (c as f32 + 0.5) * cell_size,
                    min.y + (r as f32 + 0.5) * cell_size,
                );
                let walkable =
                    env.is_inside_bounds(center, NAV_PROBE_RADIUS) && !env.circle_hits(center, probe, &filter);
                row.push(walkable);
            }
            rle_rows.push(encode_row(&row));
        }

        Self {
            cell_size,
            origin: min,
            cols,
            rows,
            rle_rows,
            generation,
        }
    }

    pub fn decode(&self) -> DenseGrid {
        let mut walkable = Vec::with_capacity(self.cols * self.rows);
        for row in &self.rle_rows {
            let mut decoded = decode_row(row);
            decoded.resize(self.cols, false);
            walkable.extend(decoded);
        }
        walkable.resize(self.cols * self.rows, false);
        DenseGrid {
            cols: self.cols,
            rows: self.rows,
            walkable,
        }
    }

    pub fn cell_of(&self, p: Vec2) -> Option<(usize, usize)> {
        if !p.is_finite() {
            return None;
        }
        let c = ((p.x - self.origin.x) / self.cell_size).floor();
        let r = ((p.y - self.origin.y) / self.cell_size).floor();
        if c < 0.0 || r < 0.0 || c >= self.cols as f32 || r >= self.rows as f32 {
            return None;
        }
        Some((c as usize, r as usize))
    }

    pub fn cell_center(&self, cell: (usize, usize)) -> Vec2 {
        Vec2::new(
            self.origin.x + (cell.0 as f32 + 0.5) * self.cell_size,
            self.origin.y + (cell.1 as f32 + 0.5) * self.cell_size,
        )
    }
}

fn choose_cell_size(width: f32, height: f32) -> f32 {
    let mut size = NAV_MIN_CELL;
    while size < NAV_MAX_CELL {
        let cells = (width / size).ceil() * (height / size).ceil();
        if cells <= NAV_MAX_CELLS as f32 {
            break;
        }
        size += 4.0;
    }
    size.min(NAV_MAX_CELL)
}

pub fn encode_row(row: &[bool]) -> Vec<u32> {
    let mut out = Vec::new();
    let mut iter = row.iter().copied();
    let Some(mut current) = iter.next() else {
        return out;
    };
    let mut run = 1u32;
    for value in iter {
        if value == current {
            run += 1;
        } else {
            out.push(u32::from(current));
            out.push(run);
            current = value;
            run = 1;
        }
    }
    out.push(u32::from(current));
    out.push(run);
    out
}

pub fn decode_row(rle: &[u32]) -> Vec<bool> {
    let mut out = Vec::new();
    for pair in rle.chunks_exact(2) {
        out.extend(std::iter::repeat(pair[0] != 0).take(pair[1] as usize));
    }
    out
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DenseGrid {
    pub cols: usize,
    pub rows: usize,
    walkable: Vec<bool>,
}

impl DenseGrid {
    pub fn from_rows(rows: &[Vec<bool>]) -> Self {
        let cols = rows.first().map_or(0, Vec::len);
        let mut walkable = Vec::with_capacity(cols * rows.len());
        for row in rows {
            let mut row = row.clone();
            row.resize(cols, false);
            walkable.extend(row);
        }
        Self {
            cols,
            rows: rows.len(),
            walkable,
        }
    }

    pub fn is_walkable(&self, c: i32, r: i32) -> bool {
        if c < 0 || r < 0 || c as usize >= self.cols || r as usize >= self.rows {
            return false;
        }
        self.walkable[r as usize * self.cols + c as usize]
    }

    fn index(&self, c: usize, r: usize) -> usize {
        r * self.cols + c
    }

    /// A* over 8-connected cells. Diagonal steps cost √2 and are refused when
    /// either orthogonal neighbour is blocked. Gives up after
    /// `max_expansions` closed nodes.
    pub fn find_path(
        &self,
        start: (usize, usize),
        goal: (usize, usize),
        max_expansions: usize,
    ) -> Option<Vec<(usize, usize)>> {
        let (sc, sr) = (start.0 as i32, start.1 as i32);
        let (gc, gr) = (goal.0 as i32, goal.1 as i32);
        if !self.is_walkable(sc, sr) || !self.is_walkable(gc, gr) {
            return None;
        }
        if start == goal {
            return Some(vec![start]);
        }

        let total = self.cols * self.rows;
        let mut g_score = vec![f32::INFINITY; total];
        let mut came_from = vec![usize::MAX; total];
        let mut closed = vec![false; total];
        let heuristic = |c: i32, r: i32| {
            let dx = (c - gc) as f32;
            let dy = (r - gr) as f32;
            (dx * dx + dy * dy).sqrt()
        };

        // (f, g, index): lowest f first, then deepest g, then lowest index.
        let mut open = BinaryMinHeap::new(|a: &(f32, f32, usize), b: &(f32, f32, usize)| {
            a.0.total_cmp(&b.0)
                .then_with(|| b.1.total_cmp(&a.1))
                .then_with(|| a.2.cmp(&b.2))
        });
        let start_idx = self.index(start.0, start.1);
        let goal_idx = self.index(goal.0, goal.1);
        g_score[start_idx] = 0.0;
        open.push((heuristic(sc, sr), 0.0, start_idx));

        let mut expansions = 0usize;
        while let Some((_, g, idx)) = open.pop() {
            if closed[idx] {
                continue;
            }
            if idx == goal_idx {
                return Some(self.reconstruct(&came_from, goal_idx));
            }
            closed[idx] = true;
            expansions += 1;
            if expansions > max_expansions {
                return None;
            }

            let c = (idx % self.cols) as i32;
            let r = (idx / self.cols) as i32;
            for (dc, dr) in NEIGHBORS {
                let nc = c + dc;
                let nr = r + dr;
                if !self.is_walkable(nc, nr) {
                    continue;
                }
                let diagonal = dc != 0 && dr != 0;
                if diagonal && (!self.is_walkable(c + dc, r) || !self.is_walkable(c, r + dr)) {
                    continue;
                }
                let n_idx = self.index(nc as usize, nr as usize);
                if closed[n_idx] {
                    continue;
                }
                let tentative = g + if diagonal { SQRT_2 } else { 1.0 };
                if tentative < g_score[n_idx] {
                    g_score[n_idx] = tentative;
                    came_from[n_idx] = idx;
                    open.push((tentative + heuristic(nc, nr), tentative, n_idx));
                }
            }
        }
        None
    }

    fn reconstruct(&self, came_from: &[usize], goal_idx: usize) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        let mut idx = goal_idx;
        loop {
            out.push((idx % self.cols, idx / self.cols));
            let prev = came_from[idx];
            if prev == usize::MAX {
                break;
            }
            idx = prev;
        }
        out.reverse();
        out
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct NavKey {
    seed: u32,
    level_type: LevelType,
    static_revision: u64,
}

/// Navmesh cache for one room. Rebuilt when the seed, level type or static
/// obstacle set changes; the dense grid is decoded lazily per generation.
#[derive(Debug, Default)]
pub struct NavigationGrid {
    key: Option<NavKey>,
    mesh: Option<NavMesh>,
    decoded: Option<(u64, DenseGrid)>,
    generation: u64,
}

impl NavigationGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the navmesh if none matches the current world. Returns whether
    /// a rebuild happened.
    pub fn ensure(&mut self, env: &SpatialEnvironment, seed: u32, level_type: LevelType) -> bool {
        let key = NavKey {
            seed,
            level_type,
            static_revision: env.static_revision(),
        };
        if self.key == Some(key) && self.mesh.is_some() {
            return false;
        }
        self.generation += 1;
        let mesh = NavMesh::build(env, self.generation);
        debug!(
            generation = self.generation,
            cols = mesh.cols,
            rows = mesh.rows,
            cell_size = mesh.cell_size,
            "navmesh rebuilt"
        );
        self.mesh = Some(mesh);
        self.key = Some(key);
        true
    }

    pub fn invalidate(&mut self) {
        self.key = None;
        self.mesh = None;
        self.decoded = None;
    }

    pub fn mesh(&self) -> Option<&NavMesh> {
        self.mesh.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cell-centre waypoints from `start` to `goal` inclusive, or `None` when
    /// either end is blocked, off-grid, or the search budget runs out.
    pub fn find_path(&mut self, start: Vec2, goal: Vec2) -> Option<Vec<Vec2>> {
        let mesh = self.mesh.as_ref()?;
        let start_cell = mesh.cell_of(start)?;
        let goal_cell = mesh.cell_of(goal)?;
        let stale = self
            .decoded
            .as_ref()
            .map_or(true, |(generation, _)| *generation != mesh.generation);
        if stale {
            self.decoded = Some((mesh.generation, mesh.decode()));
        }
        let (_, grid) = self.decoded.as_ref()?;
        let cells = grid.find_path(start_cell, goal_cell, NAV_MAX_EXPANSIONS)?;
        Some(cells.into_iter().map(|cell| mesh.cell_center(cell)).collect())
    }
}

/// Samples the segment every `LOS_SAMPLE_STEP` units and reports whether a
/// body of `radius` could walk it without touching anything.
pub fn has_walkable_line(
    env: &SpatialEnvironment,
    from: Vec2,
    to: Vec2,
    radius: f32,
    filter: &QueryFilter,
) -> bool {
    let dist = from.distance(to);
    let samples = (dist / LOS_SAMPLE_STEP).ceil().max(1.0) as usize;
    (1..=samples).all(|i| {
        let p = from.lerp(to, i as f32 / samples as f32);
        !env.circle_hits(p, radius, filter)
    })
}

pub fn path_cost(path: &[(usize, usize)]) -> f32 {
    path.windows(2)
        .map(|w| {
            let diagonal = w[0].0 != w[1].0 && w[0].1 != w[1].1;
            if diagonal {
                SQRT_2
            } else {
                1.0
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::{BoxTags, Boundary};
    use proptest::prelude::*;

    fn grid(rows: &[&str]) -> DenseGrid {
        let rows: Vec<Vec<bool>> = rows
            .iter()
            .map(|r| r.chars().map(|ch| ch == '.').collect())
            .collect();
        DenseGrid::from_rows(&rows)
    }

    fn dijkstra(grid: &DenseGrid, start: (usize, usize), goal: (usize, usize)) -> Option<f32> {
        let total = grid.cols * grid.rows;
        let mut dist = vec![f32::INFINITY; total];
        let mut done = vec![false; total];
        dist[start.1 * grid.cols + start.0] = 0.0;
        loop {
            let mut best = None;
            for i in 0..total {
                if !done[i] && dist[i].is_finite() && best.map_or(true, |b: usize| dist[i] < dist[b]) {
                    best = Some(i);
                }
            }
            let cur = best?;
            if cur == goal.1 * grid.cols + goal.0 {
                return Some(dist[cur]);
            }
            done[cur] = true;
            let c = (cur % grid.cols) as i32;
            let r = (cur / grid.cols) as i32;
            for (dc, dr) in NEIGHBORS {
                let (nc, nr) = (c + dc, r + dr);
                if !grid.is_walkable(nc, nr) {
                    continue;
                }
                let diagonal = dc != 0 && dr != 0;
                if diagonal && (!grid.is_walkable(c + dc, r) || !grid.is_walkable(c, r + dr)) {
                    continue;
                }
                let n = nr as usize * grid.cols + nc as usize;
                let nd = dist[cur] + if diagonal { SQRT_2 } else { 1.0 };
                if nd < dist[n] {
                    dist[n] = nd;
                }
            }
        }
    }

    #[test]
    fn rle_rows_decode_to_the_same_cells() {
        let row = vec![true, true, false, false, false, true];
        let rle = encode_row(&row);
        assert_eq!(rle, vec![1, 2, 0, 3, 1, 1]);
        assert_eq!(decode_row(&rle), row);
        assert!(encode_row(&[]).is_empty());
    }

    #[test]
    fn diagonal_corner_cut_is_rejected() {
        let g = grid(&[".#", "#."]);
        assert_eq!(g.find_path((0, 0), (1, 1), 100), None);
        let open = grid(&["..", ".."]);
        assert_eq!(open.find_path((0, 0), (1, 1), 100), Some(vec![(0, 0), (1, 1)]));
    }

    #[test]
    fn blocked_endpoints_and_budget_return_none() {
        let g = grid(&["...", ".#.", "..."]);
        assert_eq!(g.find_path((1, 1), (0, 0), 100), None);
        assert_eq!(g.find_path((0, 0), (1, 1), 100), None);
        let wide = DenseGrid::from_rows(&vec![vec![true; 60]; 60]);
        assert_eq!(wide.find_path((0, 0), (59, 59), 10), None);
        assert!(wide.find_path((0, 0), (59, 59), NAV_MAX_EXPANSIONS).is_some());
    }

    #[test]
    fn path_walks_around_wall() {
        let g = grid(&[".....", "####.", ".....", ".####", "....."]);
        let path = g.find_path((0, 0), (0, 4), 1_000).expect("maze is solvable");
        assert_eq!(path.first(), Some(&(0, 0)));
        assert_eq!(path.last(), Some(&(0, 4)));
        for cell in &path {
            assert!(g.is_walkable(cell.0 as i32, cell.1 as i32));
        }
        let again = g.find_path((0, 0), (0, 4), 1_000);
        assert_eq!(again, Some(path));
    }

    #[test]
    fn navigation_grid_rebuilds_on_static_change_only() {
        let mut env = SpatialEnvironment::new(Boundary::Rect {
            center: Vec2::ZERO,
            half_width: 400.0,
            half_height: 400.0,
        });
        let mut nav = NavigationGrid::new();
        assert!(nav.ensure(&env, 1, LevelType::Survival));
        assert!(!nav.ensure(&env, 1, LevelType::Survival));
        let first = nav.generation();

        let path = nav.find_path(Vec2::new(-300.0, 0.0), Vec2::new(300.0, 0.0));
        assert!(path.is_some());

        let dynamic = BoxTags {
            dynamic: true,
            ..BoxTags::default()
        };
        env.add_box(Vec2::ZERO, 20.0, 20.0, 0.0, dynamic);
        assert!(!nav.ensure(&env, 1, LevelType::Survival));

        env.add_box(Vec2::ZERO, 20.0, 300.0, 0.0, BoxTags::default());
        assert!(nav.ensure(&env, 1, LevelType::Survival));
        assert!(nav.generation() > first);
        let detour = nav
            .find_path(Vec2::new(-300.0, 0.0), Vec2::new(300.0, 0.0))
            .expect("gap at the ends of the wall");
        assert!(detour.len() > 2);
        assert!(detour.iter().all(|p| p.x.abs() > 20.0 || p.y.abs() > 300.0));
    }

    #[test]
    fn walkable_line_sampling_detects_walls() {
        let mut env = SpatialEnvironment::new(Boundary::Circle {
            center: Vec2::ZERO,
            radius: 500.0,
        });
        env.add_circle(Vec2::ZERO, 30.0);
        let filter = QueryFilter::enemy();
        assert!(!has_walkable_line(&env, Vec2::new(-200.0, 0.0), Vec2::new(200.0, 0.0), 10.0, &filter));
        assert!(has_walkable_line(&env, Vec2::new(-200.0, 80.0), Vec2::new(200.0, 80.0), 10.0, &filter));
    }

    fn random_grid() -> impl Strategy<Value = (Vec<Vec<bool>>, (usize, usize), (usize, usize))> {
        (3usize..10, 3usize..10).prop_flat_map(|(cols, rows)| {
            (
                proptest::collection::vec(proptest::collection::vec(prop::bool::weighted(0.75), cols), rows),
                (0..cols, 0..rows),
                (0..cols, 0..rows),
            )
        })
    }

    proptest! {
        #[test]
        fn astar_matches_dijkstra_cost((mut rows, start, goal) in random_grid()) {
            rows[start.1][start.0] = true;
            rows[goal.1][goal.0] = true;
            let g = DenseGrid::from_rows(&rows);
            let reference = dijkstra(&g, start, goal);
            let found = g.find_path(start, goal, NAV_MAX_EXPANSIONS);
            match (reference, found) {
                (None, None) => {}
                (Some(cost), Some(path)) => {
                    prop_assert!((path_cost(&path) - cost).abs() < 1e-3);
                }
                (r, f) => prop_assert!(false, "reference {:?} vs astar {:?}", r, f),
            }
        }
    }
}
