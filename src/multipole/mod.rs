//! Truncated Cartesian multipole and local expansions of the gravitational potential.
//!
//! The same type carries both kinds of expansion. As a multipole about a centre `c` it
//! describes the far field of the masses it was built from; after [`Multipole::makelocal`]
//! it is a Taylor polynomial `A + B.r + C:rr + D:rrr + E:rrrr` in `r = c - x` that gives the
//! potential near `c`, and its gradient in `r` gives the acceleration.
//!
//! Offsets passed to the operators are always "position minus centre" or "new centre
//! minus old centre"; the sign flips the polynomial variable needs happen inside.

mod eval;
pub mod index;
mod translate;

use std::iter::Sum;
use std::ops::{Add, AddAssign};

use crate::shared::{Float, Vec3, cast};
use index::{MI2, MI3, MI4};

/// Expansion truncated after order `N` (0 to 4). Terms above `N` stay zero.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Multipole<F: Float, const N: usize> {
    pub a: F,
    pub b: [F; 3],
    pub c: [F; 6],
    pub d: [F; 10],
    pub e: [F; 15],
}

#[inline]
pub(crate) fn delta<F: Float>(i: usize, k: usize) -> F {
    if i == k { F::one() } else { F::zero() }
}

impl<F: Float, const N: usize> Default for Multipole<F, N> {
    fn default() -> Self {
        Self::zero()
    }
}

impl<F: Float, const N: usize> Multipole<F, N> {
    const SUPPORTED_ORDER: () = assert!(N <= 4, "multipole order must be between 0 and 4");

    /// Number of independent coefficients up to order `N`.
    pub const DATASIZE: usize = [1, 4, 10, 20, 35][if N > 4 { 4 } else { N }];

    pub fn zero() -> Self {
        let () = Self::SUPPORTED_ORDER;
        Self {
            a: F::zero(),
            b: [F::zero(); 3],
            c: [F::zero(); 6],
            d: [F::zero(); 10],
            e: [F::zero(); 15],
        }
    }

    /// Used coefficients, lowest order first.
    pub fn components(&self) -> impl Iterator<Item = F> + '_ {
        std::iter::once(self.a)
            .chain(self.b.iter().copied())
            .chain(self.c.iter().copied())
            .chain(self.d.iter().copied())
            .chain(self.e.iter().copied())
            .take(Self::DATASIZE)
    }

    /// Multipole of a point mass at `offset` from the expansion centre.
    pub fn from_particle(offset: &Vec3<F>, mass: F) -> Self {
        let a = -offset;
        let a2 = a.norm_squared();
        let m = -mass;
        let mut out = Self::zero();
        out.a = m;
        if N >= 1 {
            for k in 0..3 {
                out.b[k] = m * a[k];
            }
        }
        if N >= 2 {
            for i in 0..3 {
                for k in i..3 {
                    out.c[MI2[i][k]] =
                        m * (cast::<F>(1.5) * a[i] * a[k] - cast::<F>(0.5) * delta::<F>(i, k) * a2);
                }
            }
        }
        if N >= 3 {
            for i in 0..3 {
                for k in i..3 {
                    for l in k..3 {
                        out.d[MI3[i][k][l]] = m
                            * (cast::<F>(2.5) * a[i] * a[k] * a[l]
                                - cast::<F>(0.5)
                                    * a2
                                    * (a[i] * delta::<F>(k, l) + a[k] * delta::<F>(i, l) + a[l] * delta::<F>(i, k)));
                    }
                }
            }
        }
        if N >= 4 {
            for i in 0..3 {
                for k in i..3 {
                    for l in k..3 {
                        for n in l..3 {
                            let pairs = a[i] * a[k] * delta::<F>(l, n)
                                + a[i] * a[l] * delta::<F>(k, n)
                                + a[i] * a[n] * delta::<F>(k, l)
                                + a[k] * a[l] * delta::<F>(i, n)
                                + a[k] * a[n] * delta::<F>(i, l)
                                + a[l] * a[n] * delta::<F>(i, k);
                            let deltas = delta::<F>(i, k) * delta::<F>(l, n)
                                + delta::<F>(i, l) * delta::<F>(k, n)
                                + delta::<F>(i, n) * delta::<F>(k, l);
                            out.e[MI4[i][k][l][n]] = m
                                * (cast::<F>(35.0 / 8.0) * a[i] * a[k] * a[l] * a[n]
                                    - cast::<F>(5.0 / 8.0) * pairs * a2
                                    + cast::<F>(1.0 / 8.0) * a2 * a2 * deltas);
                        }
                    }
                }
            }
        }
        out
    }

    /// Cyclic rotation of every tensor, matching [`crate::shared::rot`] on vectors.
    pub fn rot(&self, step: i32) -> Self {
        let step = step.rem_euclid(3);
        let mut out = *self;
        for _ in 0..step {
            out = out.rot_once();
        }
        out
    }

    fn rot_once(&self) -> Self {
        let mut out = *self;
        for i in 0..3 {
            let io = (i + 1) % 3;
            if N >= 1 {
                out.b[i] = self.b[io];
            }
            for k in 0..3 {
                let ko = (k + 1) % 3;
                if N >= 2 {
                    out.c[MI2[i][k]] = self.c[MI2[io][ko]];
                }
                for l in 0..3 {
                    let lo = (l + 1) % 3;
                    if N >= 3 {
                        out.d[MI3[i][k][l]] = self.d[MI3[io][ko][lo]];
                    }
                    if N >= 4 {
                        for m in 0..3 {
                            let mo = (m + 1) % 3;
                            out.e[MI4[i][k][l][m]] = self.e[MI4[io][ko][lo][mo]];
                        }
                    }
                }
            }
        }
        out
    }
}

impl<F: Float, const N: usize> AddAssign for Multipole<F, N> {
    fn add_assign(&mut self, rhs: Self) {
        self.a += rhs.a;
        for (x, y) in self.b.iter_mut().zip(rhs.b) {
            *x += y;
        }
        for (x, y) in self.c.iter_mut().zip(rhs.c) {
            *x += y;
        }
        for (x, y) in self.d.iter_mut().zip(rhs.d) {
            *x += y;
        }
        for (x, y) in self.e.iter_mut().zip(rhs.e) {
            *x += y;
        }
    }
}

impl<F: Float, const N: usize> Add for Multipole<F, N> {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl<F: Float, const N: usize> Sum for Multipole<F, N> {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, m| acc + m)
    }
}

#[cfg(test)]
mod tests;
