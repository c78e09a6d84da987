// Translation operators: multipole to multipole, local to local and multipole to local.

use super::index::{MI2, MI3, MI4};
use super::{Multipole, delta};
use crate::shared::{Float, Vec3, cast};

impl<F: Float, const N: usize> Multipole<F, N> {
    /// Re-expresses a multipole about a centre displaced by `a` (new centre minus old centre).
    pub fn shift_ext(&self, a: &Vec3<F>) -> Self {
        let c = |x: f64| cast::<F>(x);
        let d = |i: usize, k: usize| delta::<F>(i, k);
        let a2 = a.norm_squared();
        let (ma, mb, mc, md) = (self.a, &self.b, &self.c, &self.d);
        let mut out = *self;

        if N >= 1 {
            for k in 0..3 {
                out.b[k] += a[k] * ma;
            }
        }
        if N >= 2 {
            for i in 0..3 {
                for k in i..3 {
                    let mut v = c(1.5) * a[i] * a[k] * ma - c(0.5) * ma * a2 * d(i, k)
                        + c(1.5) * (mb[i] * a[k] + mb[k] * a[i]);
                    for n in 0..3 {
                        v -= mb[n] * a[n] * d(i, k);
                    }
                    out.c[MI2[i][k]] += v;
                }
            }
        }
        if N >= 3 {
            for i in 0..3 {
                for k in i..3 {
                    for l in k..3 {
                        let mut v = c(2.5) * ma * a[i] * a[k] * a[l]
                            - c(0.5) * ma * a2 * (a[i] * d(k, l) + a[k] * d(i, l) + a[l] * d(i, k))
                            + c(5.0 / 3.0)
                                * (mc[MI2[i][k]] * a[l] + mc[MI2[i][l]] * a[k] + mc[MI2[k][l]] * a[i])
                            + c(2.5) * (mb[i] * a[k] * a[l] + mb[k] * a[i] * a[l] + mb[l] * a[i] * a[k])
                            - c(0.5) * a2 * (mb[i] * d(k, l) + mb[k] * d(i, l) + mb[l] * d(i, k));
                        for n in 0..3 {
                            v -= c(2.0 / 3.0)
                                * a[n]
                                * (mc[MI2[n][k]] * d(i, l)
                                    + mc[MI2[n][i]] * d(k, l)
                                    + mc[MI2[n][l]] * d(i, k));
                            v -= a[n] * mb[n] * (a[i] * d(k, l) + a[k] * d(i, l) + a[l] * d(i, k));
                        }
                        out.d[MI3[i][k][l]] += v;
                    }
                }
            }
        }
        if N >= 4 {
            for i in 0..3 {
                for k in i..3 {
                    for l in k..3 {
                        for m in l..3 {
                            let deltas = d(i, k) * d(l, m) + d(i, l) * d(k, m) + d(i, m) * d(k, l);
                            let pairs = a[i] * a[k] * d(l, m)
                                + a[i] * a[l] * d(k, m)
                                + a[i] * a[m] * d(k, l)
                                + a[k] * a[l] * d(i, m)
                                + a[k] * a[m] * d(i, l)
                                + a[l] * a[m] * d(i, k);
                            let mut v = c(35.0 / 8.0) * ma * a[i] * a[k] * a[l] * a[m]
                                - c(5.0 / 8.0) * ma * a2 * pairs
                                + c(1.0 / 8.0) * ma * a2 * a2 * deltas
                                + c(7.0 / 4.0)
                                    * (md[MI3[i][k][l]] * a[m]
                                        + md[MI3[i][k][m]] * a[l]
                                        + md[MI3[i][l][m]] * a[k]
                                        + md[MI3[k][l][m]] * a[i])
                                + c(35.0 / 12.0)
                                    * (mc[MI2[i][k]] * a[l] * a[m]
                                        + mc[MI2[i][l]] * a[k] * a[m]
                                        + mc[MI2[i][m]] * a[k] * a[l]
                                        + mc[MI2[k][l]] * a[i] * a[m]
                                        + mc[MI2[k][m]] * a[i] * a[l]
                                        + mc[MI2[l][m]] * a[i] * a[k])
                                - c(5.0 / 12.0)
                                    * a2
                                    * (mc[MI2[i][k]] * d(l, m)
                                        + mc[MI2[i][l]] * d(k, m)
                                        + mc[MI2[i][m]] * d(k, l)
                                        + mc[MI2[k][l]] * d(i, m)
                                        + mc[MI2[k][m]] * d(i, l)
                                        + mc[MI2[l][m]] * d(i, k))
                                + c(35.0 / 8.0)
                                    * (mb[i] * a[k] * a[l] * a[m]
                                        + mb[k] * a[i] * a[l] * a[m]
                                        + mb[l] * a[i] * a[k] * a[m]
                                        + mb[m] * a[i] * a[k] * a[l])
                                - c(5.0 / 8.0)
                                    * a2
                                    * (mb[i] * (a[k] * d(l, m) + a[l] * d(k, m) + a[m] * d(k, l))
                                        + mb[k] * (a[i] * d(l, m) + a[l] * d(i, m) + a[m] * d(i, l))
                                        + mb[l] * (a[i] * d(k, m) + a[k] * d(i, m) + a[m] * d(i, k))
                                        + mb[m] * (a[i] * d(k, l) + a[k] * d(i, l) + a[l] * d(i, k)));
                            for n in 0..3 {
                                v -= c(0.5)
                                    * a[n]
                                    * (md[MI3[n][i][k]] * d(l, m)
                                        + md[MI3[n][i][l]] * d(k, m)
                                        + md[MI3[n][i][m]] * d(k, l)
                                        + md[MI3[n][k][l]] * d(i, m)
                                        + md[MI3[n][k][m]] * d(i, l)
                                        + md[MI3[n][l][m]] * d(i, k));
                                v -= c(5.0 / 6.0)
                                    * a[n]
                                    * (mc[MI2[n][i]] * (a[k] * d(l, m) + a[l] * d(k, m) + a[m] * d(k, l))
                                        + mc[MI2[n][k]] * (a[i] * d(l, m) + a[l] * d(i, m) + a[m] * d(i, l))
                                        + mc[MI2[n][l]] * (a[i] * d(k, m) + a[k] * d(i, m) + a[m] * d(i, k))
                                        + mc[MI2[n][m]] * (a[i] * d(k, l) + a[k] * d(i, l) + a[l] * d(i, k)));
                                v -= c(5.0 / 4.0) * mb[n] * a[n] * pairs;
                                v += c(0.5) * a2 * a[n] * mb[n] * deltas;
                                for o in 0..3 {
                                    v += c(1.0 / 3.0) * mc[MI2[n][o]] * a[n] * a[o] * deltas;
                                }
                            }
                            out.e[MI4[i][k][l][m]] += v;
                        }
                    }
                }
            }
        }
        out
    }

    /// Re-expresses a local expansion about a centre displaced by `shift` (new minus old).
    pub fn shift_loc(&self, shift: &Vec3<F>) -> Self {
        let c = |x: f64| cast::<F>(x);
        let a = -shift;
        let mut out = *self;

        if N >= 1 {
            for i in 0..3 {
                out.a += self.b[i] * a[i];
            }
        }
        if N >= 2 {
            for i in 0..3 {
                for k in 0..3 {
                    let cik = self.c[MI2[i][k]];
                    out.a += cik * a[i] * a[k];
                    out.b[i] += c(2.0) * cik * a[k];
                }
            }
        }
        if N >= 3 {
            for i in 0..3 {
                for k in 0..3 {
                    for l in 0..3 {
                        let dikl = self.d[MI3[i][k][l]];
                        out.a += dikl * a[i] * a[k] * a[l];
                        out.b[i] += c(3.0) * dikl * a[k] * a[l];
                        if i <= k {
                            out.c[MI2[i][k]] += c(3.0) * dikl * a[l];
                        }
                    }
                }
            }
        }
        if N >= 4 {
            for i in 0..3 {
                for k in 0..3 {
                    for l in 0..3 {
                        for m in 0..3 {
                            let eiklm = self.e[MI4[i][k][l][m]];
                            out.a += eiklm * a[i] * a[k] * a[l] * a[m];
                            out.b[i] += c(4.0) * eiklm * a[k] * a[l] * a[m];
                            if i <= k {
                                out.c[MI2[i][k]] += c(6.0) * eiklm * a[l] * a[m];
                            }
                            if i <= k && k <= l {
                                out.d[MI3[i][k][l]] += c(4.0) * eiklm * a[m];
                            }
                        }
                    }
                }
            }
        }
        out
    }

    /// Local expansion, about a target centre, of the field of this multipole.
    /// `offset` is the target centre minus the source centre.
    pub fn makelocal(&self, offset: &Vec3<F>) -> Self {
        let c = |x: f64| cast::<F>(x);
        let d = |i: usize, k: usize| delta::<F>(i, k);
        let a = -offset;
        let inva = F::one() / a.norm();
        let e = a * inva;
        let inva2 = inva * inva;
        let inva3 = inva2 * inva;
        let inva4 = inva3 * inva;
        let inva5 = inva4 * inva;
        let (ma, mb, mc, md, me) = (self.a, &self.b, &self.c, &self.d, &self.e);
        let mut out = Self::zero();

        out.a = inva * ma;
        if N >= 1 {
            for n in 0..3 {
                out.b[n] = -inva2 * ma * e[n];
                out.a += inva2 * mb[n] * e[n];
            }
        }
        if N >= 2 {
            for i in 0..3 {
                for k in 0..3 {
                    if i <= k {
                        out.c[MI2[i][k]] = inva3 * (c(1.5) * ma * e[i] * e[k] - c(0.5) * ma * d(i, k));
                    }
                    out.b[i] += inva3 * (c(-3.0) * mb[k] * e[k] * e[i]);
                    out.a += inva3 * mc[MI2[i][k]] * e[i] * e[k];
                }
            }
            for i in 0..3 {
                out.b[i] += inva3 * mb[i];
            }
        }
        if N >= 3 {
            for i in 0..3 {
                for k in 0..3 {
                    for l in 0..3 {
                        if i <= k && k <= l {
                            out.d[MI3[i][k][l]] = inva4
                                * (c(-2.5) * ma * e[i] * e[k] * e[l]
                                    + c(0.5) * ma * (e[i] * d(k, l) + e[k] * d(i, l) + e[l] * d(i, k)));
                        }
                        if i <= k {
                            out.c[MI2[i][k]] += inva4
                                * (c(7.5) * mb[l] * e[l] * e[i] * e[k] - c(1.5) * mb[l] * e[l] * d(i, k));
                        }
                        out.b[i] += inva4 * (c(-5.0) * mc[MI2[k][l]] * e[k] * e[l] * e[i]);
                        out.a += inva4 * (md[MI3[i][k][l]] * e[i] * e[k] * e[l]);
                    }
                    if i <= k {
                        out.c[MI2[i][k]] += inva4 * (c(-1.5) * (mb[i] * e[k] + mb[k] * e[i]));
                    }
                    out.b[i] += inva4 * c(2.0) * mc[MI2[i][k]] * e[k];
                }
            }
        }
        if N >= 4 {
            for i in 0..3 {
                for k in 0..3 {
                    for l in 0..3 {
                        for m in 0..3 {
                            if i <= k && k <= l && l <= m {
                                out.e[MI4[i][k][l][m]] = inva5
                                    * (c(35.0 / 8.0) * ma * e[i] * e[k] * e[l] * e[m]
                                        + c(1.0 / 8.0)
                                            * ma
                                            * (d(i, k) * d(l, m) + d(i, l) * d(k, m) + d(i, m) * d(k, l))
                                        - c(5.0 / 8.0)
                                            * ma
                                            * (e[i] * e[k] * d(l, m)
                                                + e[i] * e[l] * d(k, m)
                                                + e[i] * e[m] * d(k, l)
                                                + e[k] * e[l] * d(i, m)
                                                + e[k] * e[m] * d(i, l)
                                                + e[l] * e[m] * d(i, k)));
                            }
                            if i <= k && k <= l {
                                out.d[MI3[i][k][l]] += inva5
                                    * (c(-17.5) * mb[m] * e[m] * e[i] * e[k] * e[l]
                                        + c(2.5)
                                            * mb[m]
                                            * e[m]
                                            * (e[i] * d(k, l) + e[k] * d(i, l) + e[l] * d(i, k)));
                            }
                            if i <= k {
                                out.c[MI2[i][k]] += inva5
                                    * (c(17.5) * mc[MI2[l][m]] * e[l] * e[m] * e[i] * e[k]
                                        - c(2.5) * mc[MI2[l][m]] * e[l] * e[m] * d(i, k));
                            }
                            out.b[i] += inva5 * (c(-7.0) * md[MI3[k][l][m]] * e[k] * e[l] * e[m] * e[i]);
                            out.a += inva5 * (me[MI4[i][k][l][m]] * e[i] * e[k] * e[l] * e[m]);
                        }
                        if i <= k && k <= l {
                            out.d[MI3[i][k][l]] += inva5
                                * (c(2.5) * (mb[i] * e[k] * e[l] + mb[k] * e[i] * e[l] + mb[l] * e[i] * e[k])
                                    - c(0.5) * (mb[i] * d(k, l) + mb[k] * d(i, l) + mb[l] * d(i, k)));
                        }
                        if i <= k {
                            out.c[MI2[i][k]] +=
                                inva5 * (c(-5.0) * e[l] * (mc[MI2[l][k]] * e[i] + mc[MI2[l][i]] * e[k]));
                        }
                        out.b[i] += inva5 * c(3.0) * md[MI3[i][k][l]] * e[k] * e[l];
                    }
                    if i <= k {
                        out.c[MI2[i][k]] += inva5 * mc[MI2[i][k]];
                    }
                }
            }
        }
        out
    }
}
