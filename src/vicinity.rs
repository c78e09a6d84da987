//! Neighbourhood lists of a cell, shared by every cell of every depth.
//!
//! Cells are self-similar, so which neighbours of a cell are "near" depends only on
//! the integer offset between them, measured in the rotated frame of their depth. The
//! lists below are built once for the lower child of a split; the upper child uses
//! them mirrored along frame axis 0, the axis of the split that created it.

use log::info;

use crate::error::{FmmError, Result};

const CBRT2: f64 = 1.259_921_049_894_873_2;

/// Cell half extents in the frame of any depth, in units of the cell's middle extent.
const HALF_BOX: [f64; 3] = [1.0 / CBRT2, CBRT2, 1.0];

#[derive(Clone, Debug)]
pub struct VicinityData {
    acceptance_distance: f64,
    /// Cells whose parent is near the target's parent but which are not near the target.
    update: Vec<[i32; 3]>,
    /// Cells near the target, the target itself included.
    local: Vec<[i32; 3]>,
    /// Sorted union of both lists, encoded as `id * 2 + is_update`.
    access: Vec<u32>,
    maxvec: [i32; 3],
    sizevec: [i32; 3],
}

/// Whether two cells of the same depth `offset` apart are too close for a multipole
/// expansion to converge well.
pub fn is_near(offset: [i32; 3], acceptance_distance: f64) -> bool {
    let limit = acceptance_distance / CBRT2;
    let gap2: f64 = (0..3)
        .map(|k| {
            let centre = offset[k] as f64 * 2.0 * HALF_BOX[k];
            let gap = (centre.abs() - 2.0 * HALF_BOX[k]).max(0.0);
            gap * gap
        })
        .sum();
    gap2 < limit * limit
}

/// Offset between the parents of a lower child and of a cell `offset` away from it,
/// expressed in the parents' frame.
pub fn parent_offset(offset: [i32; 3]) -> [i32; 3] {
    [offset[2], offset[0].div_euclid(2), offset[1]]
}

/// Offset as seen from an upper child.
#[inline]
pub fn mirror(offset: [i32; 3], upper: bool) -> [i32; 3] {
    if upper {
        [-offset[0], offset[1], offset[2]]
    } else {
        offset
    }
}

impl VicinityData {
    pub fn new(acceptance_distance: f64) -> Result<Self> {
        if !(acceptance_distance > 0.0 && acceptance_distance.is_finite()) {
            return Err(FmmError::invalid(
                "acceptance_distance",
                format!("{acceptance_distance} is not a positive distance"),
            ));
        }
        let reach = (acceptance_distance * CBRT2 * 4.0 + 5.0) as i32;

        let mut update = Vec::new();
        let mut local = Vec::new();
        for n2 in -reach..=reach {
            for n1 in -reach..=reach {
                for n0 in -reach..=reach {
                    let offset = [n0, n1, n2];
                    let near = is_near(offset, acceptance_distance);
                    let parent_near = is_near(parent_offset(offset), acceptance_distance);
                    match (near, parent_near) {
                        (true, true) => local.push(offset),
                        (false, true) => update.push(offset),
                        (true, false) => {
                            return Err(FmmError::InvariantViolation(format!(
                                "cell {offset:?} is near but its parent is not"
                            )));
                        }
                        (false, false) => {}
                    }
                }
            }
        }

        let mut maxvec = [0i32; 3];
        for offset in update.iter().chain(local.iter()) {
            for k in 0..3 {
                maxvec[k] = maxvec[k].max(offset[k].abs());
            }
        }
        if maxvec.iter().any(|&m| m >= reach) {
            return Err(FmmError::InvariantViolation(format!(
                "neighbourhood {maxvec:?} reaches the search bound {reach}"
            )));
        }
        let sizevec = maxvec.map(|m| 2 * m + 1);

        let mut this = Self {
            acceptance_distance,
            update,
            local,
            access: Vec::new(),
            maxvec,
            sizevec,
        };
        let mut access: Vec<u32> = this
            .update
            .iter()
            .map(|&o| this.id(o) * 2 + 1)
            .chain(this.local.iter().map(|&o| this.id(o) * 2))
            .collect();
        access.sort_unstable();
        this.access = access;

        info!(
            "vicinity for acceptance distance {acceptance_distance}: {} update cells, {} local cells, extent {:?}",
            this.update.len(),
            this.local.len(),
            this.sizevec
        );
        Ok(this)
    }

    pub fn acceptance_distance(&self) -> f64 {
        self.acceptance_distance
    }

    pub fn update_offsets(&self) -> &[[i32; 3]] {
        &self.update
    }

    pub fn local_offsets(&self) -> &[[i32; 3]] {
        &self.local
    }

    pub fn access(&self) -> &[u32] {
        &self.access
    }

    pub fn maxvec(&self) -> [i32; 3] {
        self.maxvec
    }

    pub fn sizevec(&self) -> [i32; 3] {
        self.sizevec
    }

    /// Position of `offset` in the flattened neighbourhood box.
    pub fn id(&self, offset: [i32; 3]) -> u32 {
        let n = [0, 1, 2].map(|k| offset[k] + self.maxvec[k]);
        (n[0] + n[1] * self.sizevec[0] + n[2] * self.sizevec[0] * self.sizevec[1]) as u32
    }

    pub fn offset_of(&self, id: u32) -> [i32; 3] {
        let id = id as i32;
        let [s0, s1, _] = self.sizevec;
        [
            id % s0 - self.maxvec[0],
            id / s0 % s1 - self.maxvec[1],
            id / (s0 * s1) - self.maxvec[2],
        ]
    }

    /// Splits an access list entry into its offset and whether it belongs to the update list.
    pub fn decode(&self, entry: u32) -> ([i32; 3], bool) {
        (self.offset_of(entry / 2), entry & 1 == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn local_list_is_symmetric_and_holds_the_cell() {
        let v = VicinityData::new(1.2).unwrap();
        let local: HashSet<_> = v.local_offsets().iter().copied().collect();
        assert!(local.contains(&[0, 0, 0]));
        for o in &local {
            assert!(local.contains(&[-o[0], -o[1], -o[2]]), "{o:?}");
        }
        // Face, edge and corner neighbours always touch.
        for o in [[1, 0, 0], [1, 1, 0], [1, 1, 1], [-1, 1, -1]] {
            assert!(local.contains(&o), "{o:?}");
        }
    }

    #[test]
    fn lists_are_disjoint_and_well_formed() {
        let v = VicinityData::new(1.2).unwrap();
        let local: HashSet<_> = v.local_offsets().iter().copied().collect();
        for o in v.update_offsets() {
            assert!(!local.contains(o));
            assert!(!is_near(*o, 1.2));
            assert!(is_near(parent_offset(*o), 1.2));
        }
        assert_eq!(v.access().len(), v.update_offsets().len() + v.local_offsets().len());
        assert!(v.access().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn access_entries_decode_to_their_lists() {
        let v = VicinityData::new(2.0).unwrap();
        let update: HashSet<_> = v.update_offsets().iter().copied().collect();
        let local: HashSet<_> = v.local_offsets().iter().copied().collect();
        for &entry in v.access() {
            let (offset, is_update) = v.decode(entry);
            if is_update {
                assert!(update.contains(&offset));
            } else {
                assert!(local.contains(&offset));
            }
        }
        for k in 0..3 {
            assert_eq!(v.sizevec()[k], 2 * v.maxvec()[k] + 1);
        }
    }

    #[test]
    fn update_list_of_upper_child_is_mirrored() {
        let v = VicinityData::new(1.2).unwrap();
        // An upper child sits one cell above its lower sibling along frame axis 0, so the
        // parent of the cell at offset `o` from it is found at `floor((o0 + 1) / 2)`.
        for n0 in -8i32..=8 {
            for n1 in -6..=6 {
                for n2 in -6..=6 {
                    let o = [n0, n1, n2];
                    let parent = [n2, (n0 + 1).div_euclid(2), n1];
                    let expected = !is_near(o, 1.2) && is_near(parent, 1.2);
                    let listed = v.update_offsets().contains(&mirror(o, true));
                    assert_eq!(listed, expected, "{o:?}");
                }
            }
        }
    }

    #[test]
    fn larger_distance_grows_the_lists() {
        let small = VicinityData::new(1.0).unwrap();
        let large = VicinityData::new(3.0).unwrap();
        assert!(large.local_offsets().len() > small.local_offsets().len());
        assert!(large.update_offsets().len() > small.update_offsets().len());
        assert!(VicinityData::new(0.0).is_err());
        assert!(VicinityData::new(f64::NAN).is_err());
    }
}
