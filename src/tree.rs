//! Binary spatial tree over particles sorted by key.
//!
//! Nodes are stored level by level in one flat array. Slot 0 is a sentinel so that a
//! `first_child` of zero marks a leaf; the root lives in slot 1. The two children of a
//! node are adjacent, lower half first, and their particle ranges partition the parent's.

use std::ops::Range;

use log::{debug, warn};
use rayon::prelude::*;

use crate::error::{FmmError, Result};
use crate::key::{Axis, KeyDomain, SpatialKey};
use crate::multipole::Multipole;
use crate::shared::{Float, SimulationSettings, Vec3, to_f64};

pub const ROOT: usize = 1;

#[derive(Clone, Debug)]
pub struct TreeNode<F: Float, const N: usize> {
    pub first_child: usize,
    pub pbegin: usize,
    pub pend: usize,
    pub center: Vec3<F>,
    /// Expansion about `center`, in the rotated frame of the node's depth.
    pub multipole: Multipole<F, N>,
}

impl<F: Float, const N: usize> TreeNode<F, N> {
    fn new(pbegin: usize, pend: usize, center: Vec3<F>) -> Self {
        Self {
            first_child: 0,
            pbegin,
            pend,
            center,
            multipole: Multipole::zero(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.first_child == 0
    }

    pub fn len(&self) -> usize {
        self.pend - self.pbegin
    }

    pub fn is_empty(&self) -> bool {
        self.pbegin == self.pend
    }

    pub fn range(&self) -> Range<usize> {
        self.pbegin..self.pend
    }
}

/// Limits applied while building.
#[derive(Clone, Copy, Debug)]
pub struct TreeParams {
    pub max_leaf_size: usize,
    pub min_depth: usize,
    pub max_depth: usize,
    pub capacity: usize,
}

impl TreeParams {
    pub fn new<F: Float, K: SpatialKey>(settings: &SimulationSettings<F>) -> Self {
        Self {
            max_leaf_size: settings.max_leaf_size,
            min_depth: settings.min_depth,
            max_depth: settings.max_depth.min(K::BITS as usize),
            capacity: settings.node_capacity(),
        }
    }
}

/// First index in `begin..end` whose key has the split bit of `depth` set.
///
/// The keys of one cell share every bit above `depth`, so within the range the bit is
/// clear for a prefix and set for the rest.
pub fn find_particle_split<K: SpatialKey>(keys: &[K], begin: usize, end: usize, depth: usize) -> usize {
    let (mut lo, mut hi) = (begin, end);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if keys[mid].split_bit(depth) {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    lo
}

#[derive(Clone, Debug)]
pub struct Tree<F: Float, const N: usize> {
    pub(crate) nodes: Vec<TreeNode<F, N>>,
    pub(crate) levels: Vec<Range<usize>>,
}

impl<F: Float, const N: usize> Default for Tree<F, N> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            levels: Vec::new(),
        }
    }
}

impl<F: Float, const N: usize> Tree<F, N> {
    pub fn nodes(&self) -> &[TreeNode<F, N>] {
        &self.nodes
    }

    pub fn root(&self) -> &TreeNode<F, N> {
        &self.nodes[ROOT]
    }

    /// Node index ranges, one per depth.
    pub fn levels(&self) -> &[Range<usize>] {
        &self.levels
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    pub fn children(&self, node: usize) -> Option<[&TreeNode<F, N>; 2]> {
        let first = self.nodes[node].first_child;
        (first != 0).then(|| [&self.nodes[first], &self.nodes[first + 1]])
    }

    /// Rebuilds the hierarchy from scratch for `keys`, which must be sorted.
    pub fn build<K: SpatialKey>(&mut self, keys: &[K], domain: &KeyDomain<F>, params: &TreeParams) -> Result<()> {
        self.nodes.clear();
        self.levels.clear();
        self.nodes.push(TreeNode::new(0, 0, Vec3::zeros()));
        self.nodes.push(TreeNode::new(0, keys.len(), Vec3::zeros()));
        self.levels.push(ROOT..ROOT + 1);

        let mut depth = 0;
        while depth + 1 < params.max_depth {
            let level = self.levels[depth].clone();
            let splits: Vec<bool> = self.nodes[level.clone()]
                .par_iter()
                .map(|node| {
                    node.len() > params.max_leaf_size || (depth < params.min_depth && !node.is_empty())
                })
                .collect();

            // Exclusive scan assigns each splitting node its pair of child slots.
            let mut slots = Vec::with_capacity(splits.len());
            let mut count = 0;
            for &split in &splits {
                slots.push(count);
                if split {
                    count += 2;
                }
            }
            if count == 0 {
                break;
            }

            let next_begin = self.nodes.len();
            let required = self.num_nodes() + count;
            if required > params.capacity {
                return Err(FmmError::CapacityExceeded {
                    depth: depth + 1,
                    required,
                    capacity: params.capacity,
                });
            }

            let axis = Axis::split_at(depth).index();
            let half = domain.cell_half_extent(depth + 1)[axis];
            let children: Vec<TreeNode<F, N>> = self.nodes[level.clone()]
                .par_iter()
                .zip(splits.par_iter())
                .filter(|(_, split)| **split)
                .flat_map_iter(|(node, _)| {
                    let mid = find_particle_split(keys, node.pbegin, node.pend, depth);
                    let mut lower = node.center;
                    lower[axis] -= half;
                    let mut upper = node.center;
                    upper[axis] += half;
                    [
                        TreeNode::new(node.pbegin, mid, lower),
                        TreeNode::new(mid, node.pend, upper),
                    ]
                })
                .collect();

            for (node, (&split, &slot)) in self.nodes[level].iter_mut().zip(splits.iter().zip(&slots)) {
                if split {
                    node.first_child = next_begin + slot;
                }
            }
            self.nodes.extend(children);
            self.levels.push(next_begin..self.nodes.len());
            depth += 1;
        }

        let last = &self.levels[self.levels.len() - 1];
        if self.levels.len() >= params.max_depth {
            let oversized = self.nodes[last.clone()]
                .iter()
                .filter(|node| node.len() > params.max_leaf_size)
                .count();
            if oversized > 0 {
                warn!(
                    "{oversized} leaves at maximum depth {} hold more than {} particles",
                    params.max_depth - 1,
                    params.max_leaf_size
                );
            }
        }
        debug!(
            "tree: {} nodes over {} levels for {} particles",
            self.num_nodes(),
            self.levels.len(),
            keys.len()
        );
        Ok(())
    }

    /// Checks that child ranges partition their parent and that every particle lies in
    /// the box of every node holding it.
    pub fn validate(&self, positions: &[Vec3<F>], domain: &KeyDomain<F>) -> Result<()> {
        let scale = to_f64(domain.half_width());
        let eps = to_f64(F::default_epsilon());
        for (depth, level) in self.levels.iter().enumerate() {
            let half = domain.cell_half_extent(depth);
            // Centres accumulate one rounding error per level.
            let slack = scale * eps * 4.0 * (depth + 2) as f64;
            let tolerance = half.map(|h| to_f64(h) * (1.0 + 1e-7) + slack);
            level.clone().into_par_iter().try_for_each(|index| -> Result<()> {
                let node = &self.nodes[index];
                if let Some([lower, upper]) = self.children(index) {
                    if lower.pbegin != node.pbegin || lower.pend != upper.pbegin || upper.pend != node.pend {
                        return Err(FmmError::InvariantViolation(format!(
                            "children of node {}..{} do not partition it",
                            node.pbegin, node.pend
                        )));
                    }
                }
                for x in &positions[node.range()] {
                    let d = x - node.center;
                    if (0..3).any(|k| to_f64(d[k]).abs() > tolerance[k]) {
                        return Err(FmmError::InvariantViolation(format!(
                            "particle {x:?} outside node at {:?} (depth {depth})",
                            node.center
                        )));
                    }
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Total mass below the root, from the monopole term.
    pub fn total_mass(&self) -> F {
        -self.nodes[ROOT].multipole.a
    }

    pub fn leaves(&self) -> impl Iterator<Item = &TreeNode<F, N>> + '_ {
        self.nodes[ROOT..].iter().filter(|node| node.is_leaf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radix_sort::RadixSort;
    use crate::particles::PingPong;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn sorted_cloud(n: usize, seed: u64) -> (Vec<u64>, Vec<Vec3<f64>>, KeyDomain<f64>) {
        let domain = KeyDomain::new(4.0);
        let mut rng = StdRng::seed_from_u64(seed);
        let positions: Vec<Vec3<f64>> = (0..n)
            .map(|_| Vec3::from_fn(|_, _| rng.random_range(-1.0..1.0)))
            .collect();
        let pairs: Vec<(u64, u32)> = positions
            .iter()
            .enumerate()
            .map(|(i, x)| (domain.encode(x), i as u32))
            .collect();
        let mut buffers = PingPong::new(pairs, Vec::new());
        RadixSort::default().sort(&mut buffers, 64);
        let keys = buffers.front().iter().map(|p| p.0).collect();
        let positions = buffers.front().iter().map(|p| positions[p.1 as usize]).collect();
        (keys, positions, domain)
    }

    fn params(capacity: usize) -> TreeParams {
        TreeParams {
            max_leaf_size: 16,
            min_depth: 0,
            max_depth: 64,
            capacity,
        }
    }

    #[test]
    fn split_matches_partition_point() {
        let (keys, _, _) = sorted_cloud(500, 1);
        let mid = find_particle_split(&keys, 0, keys.len(), 0);
        assert_eq!(mid, keys.partition_point(|k| !k.split_bit(0)));
        let inner = find_particle_split(&keys, 0, mid, 1);
        assert_eq!(inner, keys[..mid].partition_point(|k| !k.split_bit(1)));
        assert_eq!(find_particle_split(&keys, 3, 3, 5), 3);
    }

    #[test]
    fn children_partition_their_parent() {
        let (keys, positions, domain) = sorted_cloud(4000, 2);
        let mut tree = Tree::<f64, 2>::default();
        tree.build(&keys, &domain, &params(10_000)).unwrap();
        tree.validate(&positions, &domain).unwrap();

        for level in tree.levels() {
            let nodes = &tree.nodes()[level.clone()];
            for w in nodes.windows(2) {
                assert!(w[0].pend <= w[1].pbegin);
            }
        }
        for node in &tree.nodes()[ROOT..] {
            if node.is_leaf() {
                assert!(node.len() <= 16);
            }
        }
        let covered: usize = tree.leaves().map(|leaf| leaf.len()).sum();
        assert_eq!(covered, keys.len());
    }

    #[test]
    fn leaves_hold_particles_of_one_key_cell() {
        let (keys, _, _) = sorted_cloud(1000, 3);
        let mut tree = Tree::<f64, 1>::default();
        tree.build(&keys, &KeyDomain::new(4.0), &params(10_000)).unwrap();
        for (depth, level) in tree.levels().iter().enumerate() {
            for node in &tree.nodes()[level.clone()] {
                if let Some(first) = keys[node.range()].first() {
                    let cell = KeyDomain::<f64>::cell_of(*first, depth);
                    assert!(keys[node.range()].iter().all(|k| KeyDomain::<f64>::cell_of(*k, depth) == cell));
                }
            }
        }
    }

    #[test]
    fn forced_minimum_depth() {
        let (keys, _, domain) = sorted_cloud(10, 4);
        let mut tree = Tree::<f64, 0>::default();
        let p = TreeParams {
            min_depth: 6,
            ..params(10_000)
        };
        tree.build(&keys, &domain, &p).unwrap();
        assert!(tree.depth() > 6);
    }

    #[test]
    fn exceeding_the_node_budget_fails() {
        let (keys, _, domain) = sorted_cloud(1000, 5);
        let mut tree = Tree::<f64, 0>::default();
        let err = tree.build(&keys, &domain, &params(20)).unwrap_err();
        assert!(matches!(err, FmmError::CapacityExceeded { capacity: 20, .. }), "{err}");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn coincident_particles_stop_at_max_depth() {
        let domain = KeyDomain::new(4.0f64);
        let keys: Vec<u32> = vec![domain.encode(&Vec3::new(0.5, 0.5, 0.5)); 40];
        let mut tree = Tree::<f64, 0>::default();
        let p = TreeParams {
            max_depth: 32,
            ..params(10_000)
        };
        tree.build(&keys, &domain, &p).unwrap();
        assert_eq!(tree.depth(), 32);
    }
}
