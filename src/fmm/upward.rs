use std::ops::Range;

use log::trace;
use rayon::prelude::*;

use crate::key::Axis;
use crate::multipole::Multipole;
use crate::shared::{Float, Vec3, rot};
use crate::tree::{Tree, TreeNode};

/// Multipole of the particles in `range` about `center`, in the frame rotated by `step`.
pub(crate) fn p2m<F: Float, const N: usize>(
    positions: &[Vec3<F>],
    masses: &[F],
    range: Range<usize>,
    center: &Vec3<F>,
    step: i32,
) -> Multipole<F, N> {
    positions[range.clone()]
        .iter()
        .zip(&masses[range])
        .map(|(x, &m)| Multipole::from_particle(&rot(&(x - center), step), m))
        .sum()
}

/// Fills in the multipole of every node, deepest level first.
pub fn upward_pass<F: Float, const N: usize>(tree: &mut Tree<F, N>, positions: &[Vec3<F>], masses: &[F]) {
    for depth in (0..tree.levels.len()).rev() {
        let level = tree.levels[depth].clone();
        let step = Axis::frame_step(depth);
        // Children always live in later levels.
        let (head, tail) = tree.nodes.split_at_mut(level.end);
        let tail: &[TreeNode<F, N>] = tail;
        let base = level.end;
        head[level.clone()].par_iter_mut().for_each(|node| {
            node.multipole = if node.is_leaf() {
                p2m(positions, masses, node.range(), &node.center, step)
            } else {
                let first = node.first_child - base;
                tail[first..first + 2]
                    .iter()
                    .map(|child| {
                        child
                            .multipole
                            .rot(-1)
                            .shift_ext(&rot(&(node.center - child.center), step))
                    })
                    .sum()
            };
        });
        trace!("upward pass: {} nodes at depth {depth}", level.len());
    }
}
