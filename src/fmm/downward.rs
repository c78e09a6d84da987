//! Level-synchronous dual traversal.
//!
//! Every depth holds a set of target cells, each carrying the local expansion inherited
//! from its parent. Source cells of a depth are the children of the cells near the
//! previous targets; they are real tree nodes where the tree goes that deep and leaf
//! ranges split on the fly below that. Cells are addressed by their grid coordinates.

use std::collections::{HashMap, HashSet};

use log::{debug, trace};
use rayon::prelude::*;
use smallvec::SmallVec;

use super::upward::p2m;
use crate::error::{FmmError, Result};
use crate::key::{Axis, KeyDomain, SpatialKey};
use crate::multipole::Multipole;
use crate::shared::{Float, Vec3, rot};
use crate::tree::{Tree, TreeNode, find_particle_split};
use crate::vicinity::{VicinityData, mirror};

type Grid = [i64; 3];

#[derive(Clone, Copy, Debug)]
pub struct TraversalParams<F: Float> {
    pub max_depth: usize,
    pub cost_factor: f64,
    pub g: F,
    pub softening: F,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TraversalStats {
    pub levels: usize,
    pub targets: usize,
    pub conversions: usize,
    pub pairs: usize,
}

#[derive(Clone, Debug)]
struct Cell<F: Float, const N: usize> {
    center: Vec3<F>,
    begin: usize,
    end: usize,
    first_child: usize,
    multipole: Multipole<F, N>,
}

impl<F: Float, const N: usize> Cell<F, N> {
    fn from_node(node: &TreeNode<F, N>) -> Self {
        Self {
            center: node.center,
            begin: node.pbegin,
            end: node.pend,
            first_child: node.first_child,
            multipole: node.multipole,
        }
    }

    fn len(&self) -> usize {
        self.end - self.begin
    }
}

struct Target<F: Float, const N: usize> {
    grid: Grid,
    /// Upper child of its parent along the last split axis.
    upper: bool,
    expansion: Multipole<F, N>,
}

enum Outcome<F: Float, const N: usize> {
    StepIn(Multipole<F, N>),
    Evaluated {
        begin: usize,
        values: Vec<(Vec3<F>, F)>,
        pairs: usize,
    },
}

/// Grid coordinates of the cell `offset` away from `grid`, the offset given in the
/// frame rotated by `step`.
fn neighbour(grid: Grid, offset: [i32; 3], step: i32) -> Grid {
    let step = step as usize;
    let mut out = grid;
    for f in 0..3 {
        out[(step + f) % 3] += offset[f] as i64;
    }
    out
}

fn child_grid(grid: Grid, depth: usize, upper: bool) -> Grid {
    let axis = Axis::split_at(depth).index();
    let mut out = grid;
    out[axis] = 2 * out[axis] + upper as i64;
    out
}

pub(crate) struct Downward<'a, F: Float, K: SpatialKey, const N: usize> {
    pub tree: &'a Tree<F, N>,
    pub keys: &'a [K],
    pub positions: &'a [Vec3<F>],
    pub masses: &'a [F],
    pub domain: &'a KeyDomain<F>,
    pub vicinity: &'a VicinityData,
    pub params: TraversalParams<F>,
}

impl<F: Float, K: SpatialKey, const N: usize> Downward<'_, F, K, N> {
    /// Writes the acceleration and potential of every particle.
    pub fn run(&self, accelerations: &mut [Vec3<F>], potentials: &mut [F]) -> Result<TraversalStats> {
        let mut stats = TraversalStats::default();
        if self.positions.is_empty() {
            return Ok(stats);
        }

        let mut staged: HashMap<Grid, Cell<F, N>> = HashMap::new();
        staged.insert([0; 3], Cell::from_node(self.tree.root()));
        let mut targets = vec![Target {
            grid: [0; 3],
            upper: false,
            expansion: Multipole::zero(),
        }];
        let mut evaluated = 0;
        let mut depth = 0;

        while !targets.is_empty() {
            let outcomes: Vec<(Outcome<F, N>, usize)> = targets
                .par_iter()
                .map(|target| self.process(target, &staged, depth))
                .collect::<Result<_>>()?;

            let mut stepping = Vec::new();
            for (target, (outcome, conversions)) in targets.iter().zip(outcomes) {
                stats.conversions += conversions;
                match outcome {
                    Outcome::StepIn(expansion) => stepping.push((target.grid, expansion)),
                    Outcome::Evaluated { begin, values, pairs } => {
                        let end = begin + values.len();
                        for ((a, p), (acc, pot)) in accelerations[begin..end]
                            .iter_mut()
                            .zip(&mut potentials[begin..end])
                            .zip(values)
                        {
                            *a = acc;
                            *p = pot;
                        }
                        evaluated += end - begin;
                        stats.pairs += pairs;
                    }
                }
            }
            trace!(
                "depth {depth}: {} targets, {} stepping in, {} cells staged",
                targets.len(),
                stepping.len(),
                staged.len()
            );
            stats.targets += targets.len();
            stats.levels += 1;

            if stepping.is_empty() {
                break;
            }

            let step = Axis::frame_step(depth);
            let current = &staged;
            let expand: HashSet<Grid> = stepping
                .iter()
                .flat_map(|(grid, _)| {
                    self.vicinity.local_offsets().iter().filter_map(move |&offset| {
                        let g = neighbour(*grid, offset, step);
                        current.contains_key(&g).then_some(g)
                    })
                })
                .collect();
            let next: HashMap<Grid, Cell<F, N>> = expand
                .par_iter()
                .flat_map_iter(|grid| self.children(*grid, &staged[grid], depth))
                .collect();

            let child_step = Axis::frame_step(depth + 1);
            targets = stepping
                .iter()
                .flat_map(|(grid, expansion)| {
                    let parent = &staged[grid];
                    let shifted = expansion.rot(1);
                    let next = &next;
                    [false, true].into_iter().filter_map(move |upper| {
                        let grid = child_grid(*grid, depth, upper);
                        let child = next.get(&grid)?;
                        Some(Target {
                            grid,
                            upper,
                            expansion: shifted.shift_loc(&rot(&(child.center - parent.center), child_step)),
                        })
                    })
                })
                .collect();
            staged = next;
            depth += 1;
        }

        if evaluated != self.positions.len() {
            return Err(FmmError::InvariantViolation(format!(
                "traversal evaluated {evaluated} of {} particles",
                self.positions.len()
            )));
        }
        debug!(
            "downward pass: {} levels, {} targets, {} conversions, {} direct pairs",
            stats.levels, stats.targets, stats.conversions, stats.pairs
        );
        Ok(stats)
    }

    /// Non-empty children of a staged cell at `depth`.
    fn children(&self, grid: Grid, cell: &Cell<F, N>, depth: usize) -> SmallVec<[(Grid, Cell<F, N>); 2]> {
        let mut out = SmallVec::new();
        if cell.first_child != 0 {
            for (k, node) in self.tree.nodes()[cell.first_child..cell.first_child + 2].iter().enumerate() {
                if !node.is_empty() {
                    out.push((child_grid(grid, depth, k == 1), Cell::from_node(node)));
                }
            }
            return out;
        }

        let axis = Axis::split_at(depth).index();
        let half = self.domain.cell_half_extent(depth + 1)[axis];
        let step = Axis::frame_step(depth + 1);
        let mid = find_particle_split(self.keys, cell.begin, cell.end, depth);
        for (upper, begin, end) in [(false, cell.begin, mid), (true, mid, cell.end)] {
            if begin == end {
                continue;
            }
            let mut center = cell.center;
            if upper {
                center[axis] += half;
            } else {
                center[axis] -= half;
            }
            let multipole = p2m(self.positions, self.masses, begin..end, &center, step);
            out.push((
                child_grid(grid, depth, upper),
                Cell {
                    center,
                    begin,
                    end,
                    first_child: 0,
                    multipole,
                },
            ));
        }
        out
    }

    fn process(
        &self,
        target: &Target<F, N>,
        staged: &HashMap<Grid, Cell<F, N>>,
        depth: usize,
    ) -> Result<(Outcome<F, N>, usize)> {
        let cell = staged.get(&target.grid).ok_or_else(|| {
            FmmError::InvariantViolation(format!("target cell {:?} at depth {depth} was not staged", target.grid))
        })?;
        let step = Axis::frame_step(depth);

        let mut expansion = target.expansion;
        let mut conversions = 0;
        let mut near_particles = 0;
        let mut near: SmallVec<[(usize, usize); 64]> = SmallVec::new();
        for &entry in self.vicinity.access() {
            let (offset, is_update) = self.vicinity.decode(entry);
            let grid = neighbour(target.grid, mirror(offset, target.upper), step);
            let Some(source) = staged.get(&grid) else {
                continue;
            };
            if is_update {
                expansion += source
                    .multipole
                    .makelocal(&rot(&(cell.center - source.center), step));
                conversions += 1;
            } else {
                near_particles += source.len();
                near.push((source.begin, source.end));
            }
        }

        let own = cell.len();
        let descent_cost = 2.0 * self.vicinity.update_offsets().len() as f64 * self.params.cost_factor;
        if own > 0
            && depth + 1 < self.params.max_depth
            && near_particles as f64 * own as f64 > descent_cost
        {
            return Ok((Outcome::StepIn(expansion), conversions));
        }

        let g = self.params.g;
        let soft2 = self.params.softening * self.params.softening;
        let values = (cell.begin..cell.end)
            .map(|i| {
                let x = self.positions[i];
                let r = rot(&(x - cell.center), step);
                let mut acc = rot(&expansion.calc_force(&r), -step);
                let mut pot = expansion.calc_loc_potential(&r);
                for &(begin, end) in &near {
                    for j in begin..end {
                        if j == i {
                            continue;
                        }
                        let d = self.positions[j] - x;
                        let r2 = d.norm_squared() + soft2;
                        // Coincident particles exert nothing on each other.
                        if r2 == F::zero() {
                            continue;
                        }
                        let inv = F::one() / r2.sqrt();
                        let m = self.masses[j];
                        acc += d * (m * inv * inv * inv);
                        pot -= m * inv;
                    }
                }
                (acc * g, pot * g)
            })
            .collect();
        Ok((
            Outcome::Evaluated {
                begin: cell.begin,
                values,
                pairs: own * near_particles,
            },
            conversions,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neighbour_maps_frame_offsets_to_grid_axes() {
        // Depth 1 was created by splitting x, so its frame starts with x.
        assert_eq!(neighbour([4, 4, 4], [1, 2, 3], Axis::frame_step(1)), [5, 6, 7]);
        // The root frame starts with z.
        assert_eq!(neighbour([4, 4, 4], [1, 2, 3], Axis::frame_step(0)), [6, 7, 5]);
        assert_eq!(neighbour([0, 0, 0], [-1, 0, 0], Axis::frame_step(2)), [0, -1, 0]);
    }

    #[test]
    fn children_double_the_split_axis() {
        assert_eq!(child_grid([3, 1, 2], 0, false), [6, 1, 2]);
        assert_eq!(child_grid([3, 1, 2], 0, true), [7, 1, 2]);
        assert_eq!(child_grid([3, 1, 2], 4, true), [3, 3, 2]);
    }
}
