//! Spatial keys for the binary space partition.
//!
//! A key interleaves the three coordinates one bit at a time, x first, so that every
//! additional key bit halves a cell along one axis. The key box is stretched to half
//! extents `L * (2^(2/3), 2^(1/3), 1)`, which makes every cell at every depth similar
//! to every other cell up to a cyclic permutation of the axes.

use std::fmt::Debug;

use crate::shared::{Float, Vec3, to_f64};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Self {
        Self::ALL[i % 3]
    }

    /// Axis that is halved when a node at `depth` is split.
    pub fn split_at(depth: usize) -> Self {
        Self::from_index(depth)
    }

    /// Axis whose split created the cells at `depth`. Expansions of a depth are stored in
    /// a frame rotated so that this axis comes first.
    pub fn created_at(depth: usize) -> Self {
        Self::from_index(depth + 2)
    }

    /// Rotation step from global coordinates into the frame of `depth`.
    pub fn frame_step(depth: usize) -> i32 {
        Self::created_at(depth).index() as i32
    }
}

/// Number of splits along `axis` in a cell at `depth`.
#[inline]
pub fn axis_splits(axis: Axis, depth: usize) -> u32 {
    ((depth + 2 - axis.index()) / 3) as u32
}

pub trait SpatialKey: Copy + Ord + Default + Debug + Send + Sync + 'static {
    const BITS: u32;

    fn from_u64(value: u64) -> Self;
    fn to_u64(self) -> u64;

    #[inline]
    fn bit(self, index: u32) -> bool {
        (self.to_u64() >> index) & 1 == 1
    }

    /// `bits` wide digit starting at bit `shift`.
    #[inline]
    fn digit(self, shift: u32, bits: u32) -> usize {
        ((self.to_u64() >> shift) & ((1u64 << bits) - 1)) as usize
    }

    /// Whether the particle lies in the upper half of its depth-`depth` cell.
    #[inline]
    fn split_bit(self, depth: usize) -> bool {
        self.bit(Self::BITS - 1 - depth as u32)
    }
}

impl SpatialKey for u32 {
    const BITS: u32 = 32;

    fn from_u64(value: u64) -> Self {
        value as u32
    }

    fn to_u64(self) -> u64 {
        self as u64
    }
}

impl SpatialKey for u64 {
    const BITS: u32 = 64;

    fn from_u64(value: u64) -> Self {
        value
    }

    fn to_u64(self) -> u64 {
        self
    }
}

/// Spreads the low 21 bits of `v` so that bit `i` lands on bit `3 * i`.
#[inline]
pub fn spread3(v: u64) -> u64 {
    let mut x = v & 0x1f_ffff;
    x = (x | x << 32) & 0x001f_0000_0000_ffff;
    x = (x | x << 16) & 0x001f_0000_ff00_00ff;
    x = (x | x << 8) & 0x100f_00f0_0f00_f00f;
    x = (x | x << 4) & 0x10c3_0c30_c30c_30c3;
    x = (x | x << 2) & 0x1249_2492_4924_9249;
    x
}

/// Inverse of [`spread3`].
#[cfg(test)]
fn compact3(v: u64) -> u64 {
    let mut x = v & 0x1249_2492_4924_9249;
    x = (x | x >> 2) & 0x10c3_0c30_c30c_30c3;
    x = (x | x >> 4) & 0x100f_00f0_0f00_f00f;
    x = (x | x >> 8) & 0x001f_0000_ff00_00ff;
    x = (x | x >> 16) & 0x001f_0000_0000_ffff;
    x = (x | x >> 32) & 0x1f_ffff;
    x
}

/// Geometry of the key box around a cubic domain of half-width `half_width`.
#[derive(Clone, Copy, Debug)]
pub struct KeyDomain<F: Float> {
    half_width: F,
    half_extent: [f64; 3],
}

impl<F: Float> KeyDomain<F> {
    pub fn new(half_width: F) -> Self {
        let l = to_f64(half_width);
        Self {
            half_width,
            half_extent: [l * 2f64.powf(2.0 / 3.0), l * 2f64.powf(1.0 / 3.0), l],
        }
    }

    pub fn half_width(&self) -> F {
        self.half_width
    }

    /// Half extent of the root cell along `axis`.
    pub fn root_half_extent(&self, axis: Axis) -> f64 {
        self.half_extent[axis.index()]
    }

    /// Half extents of any cell at `depth`.
    pub fn cell_half_extent(&self, depth: usize) -> Vec3<F> {
        Vec3::from_fn(|k, _| {
            let axis = Axis::from_index(k);
            let h = self.half_extent[k] / (1u64 << axis_splits(axis, depth).min(63)) as f64;
            crate::shared::cast(h)
        })
    }

    /// Number of cells along each axis at `depth`.
    pub fn grid_size(depth: usize) -> [u64; 3] {
        Axis::ALL.map(|axis| 1u64 << axis_splits(axis, depth).min(63))
    }

    /// Centre of the depth-`depth` cell with grid coordinates `cell`.
    pub fn cell_center(&self, cell: [i64; 3], depth: usize) -> Vec3<F> {
        let n = Self::grid_size(depth);
        Vec3::from_fn(|k, _| {
            let h = self.half_extent[k];
            crate::shared::cast(-h + (cell[k] as f64 + 0.5) * 2.0 * h / n[k] as f64)
        })
    }

    /// Per-axis bit budgets, sign bit included, for a `bits` wide key.
    pub fn axis_bits(bits: u32) -> [u32; 3] {
        [(bits + 2) / 3, (bits + 1) / 3, bits / 3]
    }

    pub fn encode<K: SpatialKey>(&self, x: &Vec3<F>) -> K {
        let w = K::BITS;
        let depth = Self::axis_bits(w);
        let offset = ((3 - w % 3) % 3) as usize;
        let mut sig = 0u64;
        for k in 0..3 {
            let mag_bits = depth[k] - 1;
            let max = (1u64 << mag_bits) - 1;
            let coord = to_f64(x[k]);
            let scaled = coord.abs() / self.half_extent[k] * (1u64 << mag_bits) as f64;
            // Positions on or beyond the boundary saturate into the outermost cell.
            let mut s = if scaled.is_finite() {
                (scaled as u64).min(max)
            } else {
                max
            };
            let positive = coord > 0.0;
            if !positive {
                s = max - s;
            }
            sig |= spread3(s) << (2 - (k + offset) % 3);
            sig |= (positive as u64) << (w - 1 - k as u32);
        }
        K::from_u64(sig)
    }

    /// Bit-by-bit construction of the same key, by repeated halving of the key box.
    pub fn encode_reference<K: SpatialKey>(&self, x: &Vec3<F>) -> K {
        let mut lo = [0f64; 3];
        let mut hi = [0f64; 3];
        for k in 0..3 {
            lo[k] = -self.half_extent[k];
            hi[k] = self.half_extent[k];
        }
        let mut negative = [false; 3];
        let mut sig = 0u64;
        for depth in 0..K::BITS as usize {
            let k = Axis::split_at(depth).index();
            let coord = to_f64(x[k]).clamp(lo[k], hi[k]);
            let mid = 0.5 * (lo[k] + hi[k]);
            // Ties go towards zero on the negative side and away from it on the positive side.
            let upper = if depth < 3 || negative[k] {
                coord > mid
            } else {
                coord >= mid
            };
            if depth < 3 {
                negative[k] = !upper;
            }
            sig = (sig << 1) | upper as u64;
            if upper {
                lo[k] = mid;
            } else {
                hi[k] = mid;
            }
        }
        K::from_u64(sig)
    }

    /// Grid coordinates of the depth-`depth` cell holding `key`.
    pub fn cell_of<K: SpatialKey>(key: K, depth: usize) -> [i64; 3] {
        let mut cell = [0i64; 3];
        for d in 0..depth {
            let axis = Axis::split_at(d).index();
            cell[axis] = (cell[axis] << 1) | key.split_bit(d) as i64;
        }
        cell
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    #[test]
    fn spread_and_compact_are_inverse() {
        for v in [0u64, 1, 0b1011, 0x15_5555, 0x1f_ffff] {
            assert_eq!(compact3(spread3(v)), v);
        }
        assert_eq!(spread3(0b111), 0b1001001);
    }

    #[test]
    fn layout_puts_signs_on_top() {
        let domain = KeyDomain::new(4.0f64);
        let key: u64 = domain.encode(&Vec3::new(1.0, -1.0, 1.0));
        assert!(key.bit(63));
        assert!(!key.bit(62));
        assert!(key.bit(61));

        let key: u32 = domain.encode(&Vec3::new(-1.0, 1.0, -1.0));
        assert!(!key.bit(31));
        assert!(key.bit(30));
        assert!(!key.bit(29));
    }

    #[test]
    fn fast_encoder_matches_reference() {
        let domain = KeyDomain::new(4.0f64);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..2000 {
            let x = Vec3::from_fn(|_, _| rng.random_range(-4.0..4.0));
            assert_eq!(
                domain.encode::<u64>(&x),
                domain.encode_reference::<u64>(&x),
                "u64 mismatch at {x:?}"
            );
            assert_eq!(
                domain.encode::<u32>(&x),
                domain.encode_reference::<u32>(&x),
                "u32 mismatch at {x:?}"
            );
        }
    }

    #[test]
    fn monotone_along_each_axis() {
        let domain = KeyDomain::new(4.0f64);
        for axis in 0..3 {
            let mut last = 0u64;
            for i in 0..200 {
                let mut x = Vec3::new(0.3, -0.7, 1.1);
                x[axis] = -3.99 + i as f64 * 0.04;
                let key: u64 = domain.encode(&x);
                assert!(key >= last, "axis {axis} step {i}");
                last = key;
            }
        }
    }

    #[test]
    fn boundary_saturates_into_last_cell() {
        let domain = KeyDomain::new(4.0f64);
        let inside: u64 = domain.encode(&Vec3::new(0.0, 0.0, 3.999_999));
        let edge: u64 = domain.encode(&Vec3::new(0.0, 0.0, 4.0));
        let beyond: u64 = domain.encode(&Vec3::new(0.0, 0.0, 9.0));
        assert_eq!(edge, beyond);
        assert_eq!(KeyDomain::<f64>::cell_of(inside, 30), KeyDomain::<f64>::cell_of(edge, 30));
    }

    #[test]
    fn cell_geometry_is_self_similar() {
        let domain = KeyDomain::new(1.0f64);
        for depth in 0..9 {
            let h = domain.cell_half_extent(depth);
            let r = crate::shared::rot(&h, Axis::frame_step(depth));
            let scale = r[2];
            assert!((r[0] / scale - 2f64.powf(-1.0 / 3.0)).abs() < 1e-12);
            assert!((r[1] / scale - 2f64.powf(1.0 / 3.0)).abs() < 1e-12);
        }
    }

    #[test]
    fn cells_contain_their_particles() {
        let domain = KeyDomain::new(4.0f64);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let x = Vec3::from_fn(|_, _| rng.random_range(-4.0..4.0));
            let key: u64 = domain.encode(&x);
            for depth in [0, 1, 5, 17, 40] {
                let c = domain.cell_center(KeyDomain::<f64>::cell_of(key, depth), depth);
                let h = domain.cell_half_extent(depth);
                for k in 0..3 {
                    assert!((x[k] - c[k]).abs() <= h[k] * (1.0 + 1e-9), "depth {depth}");
                }
            }
        }
    }
}
