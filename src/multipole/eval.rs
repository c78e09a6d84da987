use super::Multipole;
use super::index::{MI2, MI3, MI4, MULT2, MULT3, MULT4};
use crate::shared::{Float, Vec3, cast};

impl<F: Float, const N: usize> Multipole<F, N> {
    /// Potential of a local expansion at `offset` (position minus centre).
    pub fn calc_loc_potential(&self, offset: &Vec3<F>) -> F {
        let r = -offset;
        let mut ret = self.a;
        for i in 0..3 {
            if N >= 1 {
                ret += self.b[i] * r[i];
            }
            for k in i..3 {
                if N >= 2 {
                    let s = MI2[i][k];
                    ret += self.c[s] * r[i] * r[k] * cast::<F>(MULT2[s] as f64);
                }
                for l in k..3 {
                    if N >= 3 {
                        let s = MI3[i][k][l];
                        ret += self.d[s] * r[i] * r[k] * r[l] * cast::<F>(MULT3[s] as f64);
                    }
                    if N >= 4 {
                        for m in l..3 {
                            let s = MI4[i][k][l][m];
                            ret += self.e[s] * r[i] * r[k] * r[l] * r[m] * cast::<F>(MULT4[s] as f64);
                        }
                    }
                }
            }
        }
        ret
    }

    /// Acceleration of a local expansion at `offset` (position minus centre).
    pub fn calc_force(&self, offset: &Vec3<F>) -> Vec3<F> {
        let r = -offset;
        let (two, three, four) = (cast::<F>(2.0), cast::<F>(3.0), cast::<F>(4.0));
        let mut f = Vec3::zeros();
        for i in 0..3 {
            if N >= 1 {
                f[i] += self.b[i];
            }
            for k in 0..3 {
                if N >= 2 {
                    f[i] += two * self.c[MI2[k][i]] * r[k];
                }
                for l in 0..3 {
                    if N >= 3 {
                        f[i] += three * self.d[MI3[i][k][l]] * r[k] * r[l];
                    }
                    if N >= 4 {
                        for m in 0..3 {
                            f[i] += four * self.e[MI4[i][k][l][m]] * r[k] * r[l] * r[m];
                        }
                    }
                }
            }
        }
        f
    }
}
