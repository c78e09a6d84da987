use rand::{Rng, SeedableRng, rngs::StdRng};

use super::Multipole;
use crate::shared::{Vec3, rot};

type M4 = Multipole<f64, 4>;

fn random_cluster(rng: &mut StdRng, n: usize, center: Vec3<f64>, radius: f64) -> Vec<(Vec3<f64>, f64)> {
    (0..n)
        .map(|_| {
            let offset = Vec3::from_fn(|_, _| rng.random_range(-1.0..1.0)) * (radius / 3f64.sqrt());
            (center + offset, rng.random_range(0.5..1.5))
        })
        .collect()
}

fn multipole_of<const N: usize>(cluster: &[(Vec3<f64>, f64)], center: &Vec3<f64>) -> Multipole<f64, N> {
    cluster
        .iter()
        .map(|(x, m)| Multipole::from_particle(&(x - center), *m))
        .sum()
}

fn direct(cluster: &[(Vec3<f64>, f64)], x: &Vec3<f64>) -> (Vec3<f64>, f64) {
    let mut force = Vec3::zeros();
    let mut pot = 0.0;
    for (y, m) in cluster {
        let d = y - x;
        let r = d.norm();
        force += d * (m / (r * r * r));
        pot -= m / r;
    }
    (force, pot)
}

fn max_diff(a: &M4, b: &M4) -> f64 {
    a.components()
        .zip(b.components())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

#[test]
fn point_mass_monopole_and_dipole() {
    let m = M4::from_particle(&Vec3::new(0.5, -0.25, 1.0), 2.0);
    assert_eq!(m.a, -2.0);
    assert_eq!(m.b, [1.0, -0.5, 2.0]);
    let at_center = M4::from_particle(&Vec3::zeros(), 3.0);
    assert!(at_center.components().skip(1).all(|x| x == 0.0));
    assert_eq!(M4::DATASIZE, 35);
    assert_eq!(Multipole::<f32, 2>::DATASIZE, 10);
}

#[test]
fn additivity() {
    let mut rng = StdRng::seed_from_u64(11);
    let center = Vec3::new(0.1, 0.2, -0.3);
    let s1 = random_cluster(&mut rng, 20, center, 0.5);
    let s2 = random_cluster(&mut rng, 30, center, 0.5);
    let union: Vec<_> = s1.iter().chain(s2.iter()).copied().collect();

    let m1: M4 = multipole_of(&s1, &center);
    let m2: M4 = multipole_of(&s2, &center);
    let both: M4 = multipole_of(&union, &center);
    assert!(max_diff(&(m1 + m2), &both) < 1e-12);

    // The translation operators are linear as well.
    let shift = Vec3::new(0.3, -0.1, 0.2);
    let target = Vec3::new(4.0, 1.0, -2.0);
    assert!(max_diff(&(m1.shift_ext(&shift) + m2.shift_ext(&shift)), &both.shift_ext(&shift)) < 1e-12);
    assert!(max_diff(&(m1.makelocal(&target) + m2.makelocal(&target)), &both.makelocal(&target)) < 1e-12);
}

#[test]
fn shift_ext_reproduces_direct_expansion() {
    let mut rng = StdRng::seed_from_u64(12);
    let c1 = Vec3::new(0.0, 0.0, 0.0);
    let c2 = Vec3::new(0.4, -0.3, 0.25);
    let cluster = random_cluster(&mut rng, 10, c1, 0.4);

    let about_c1: M4 = multipole_of(&cluster, &c1);
    let about_c2: M4 = multipole_of(&cluster, &c2);
    let shifted = about_c1.shift_ext(&(c2 - c1));
    assert!(max_diff(&shifted, &about_c2) < 1e-12, "{shifted:?}\n{about_c2:?}");
}

#[test]
fn shift_ext_keeps_far_field() {
    let mut rng = StdRng::seed_from_u64(13);
    let c1 = Vec3::new(0.0, 0.0, 0.0);
    let c2 = Vec3::new(0.1, 0.05, -0.08);
    let cluster = random_cluster(&mut rng, 25, c1, 0.2);
    let m: M4 = multipole_of(&cluster, &c1);
    let shifted = m.shift_ext(&(c2 - c1));

    for target in [Vec3::new(5.0, 0.0, 0.0), Vec3::new(-2.0, 3.0, 3.0), Vec3::new(0.5, 0.5, -4.0)] {
        let (force, pot) = direct(&cluster, &target);
        let before = m.makelocal(&(target - c1));
        let after = shifted.makelocal(&(target - c2));
        let pot_before = before.calc_loc_potential(&Vec3::zeros());
        let pot_after = after.calc_loc_potential(&Vec3::zeros());
        assert!((pot_before - pot).abs() < 1e-4 * pot.abs());
        assert!((pot_after - pot).abs() < 1e-4 * pot.abs());
        let f_after = after.calc_force(&Vec3::zeros());
        assert!((f_after - force).norm() < 1e-3 * force.norm());
    }
}

#[test]
fn shift_loc_is_exact_polynomial_shift() {
    let mut rng = StdRng::seed_from_u64(14);
    let source = Vec3::new(3.0, -2.0, 1.0);
    let cluster = random_cluster(&mut rng, 15, source, 0.5);
    let m: M4 = multipole_of(&cluster, &source);

    let old_center = Vec3::new(0.0, 0.0, 0.0);
    let new_center = Vec3::new(0.2, -0.1, 0.05);
    let local = m.makelocal(&(old_center - source));
    let moved = local.shift_loc(&(new_center - old_center));

    for _ in 0..20 {
        let x = new_center + Vec3::from_fn(|_, _| rng.random_range(-0.2..0.2));
        let p_old = local.calc_loc_potential(&(x - old_center));
        let p_new = moved.calc_loc_potential(&(x - new_center));
        assert!((p_old - p_new).abs() < 1e-12 * p_old.abs().max(1.0));
        let f_old = local.calc_force(&(x - old_center));
        let f_new = moved.calc_force(&(x - new_center));
        assert!((f_old - f_new).norm() < 1e-12 * f_old.norm().max(1.0));
    }
}

#[test]
fn rotation_is_covariant() {
    let mut rng = StdRng::seed_from_u64(15);
    let offset = Vec3::new(0.3, -0.7, 0.45);
    for step in [-1, 1, 2] {
        let rotated = M4::from_particle(&rot(&offset, step), 1.3);
        let expected = M4::from_particle(&offset, 1.3).rot(step);
        assert!(max_diff(&rotated, &expected) < 1e-14);
    }

    let cluster = random_cluster(&mut rng, 5, Vec3::new(2.5, 1.0, -1.0), 0.3);
    let local = multipole_of::<4>(&cluster, &Vec3::new(2.5, 1.0, -1.0)).makelocal(&Vec3::new(-2.5, -1.0, 1.0));
    let r = Vec3::new(0.1, 0.05, -0.12);
    let rotated = local.rot(1);
    assert!((rotated.calc_loc_potential(&rot(&r, 1)) - local.calc_loc_potential(&r)).abs() < 1e-13);
    assert!((rotated.calc_force(&rot(&r, 1)) - rot(&local.calc_force(&r), 1)).norm() < 1e-13);
    assert!(max_diff(&local.rot(1).rot(1).rot(1), &local) == 0.0);
}

#[test]
fn local_expansion_matches_direct_sum() {
    let mut rng = StdRng::seed_from_u64(16);
    let source = Vec3::new(0.0, 0.0, 0.0);
    let target = Vec3::new(2.0, 3.0, -2.0);
    let cluster = random_cluster(&mut rng, 40, source, 0.4);
    let local = multipole_of::<4>(&cluster, &source).makelocal(&(target - source));

    for _ in 0..10 {
        let x = target + Vec3::from_fn(|_, _| rng.random_range(-0.15..0.15));
        let (force, pot) = direct(&cluster, &x);
        let f = local.calc_force(&(x - target));
        let p = local.calc_loc_potential(&(x - target));
        assert!((f - force).norm() < 2e-3 * force.norm(), "{f:?} vs {force:?}");
        assert!((p - pot).abs() < 5e-4 * pot.abs(), "{p} vs {pot}");
    }
}

fn far_field_error<const N: usize>() -> f64 {
    let mut rng = StdRng::seed_from_u64(17);
    let source = Vec3::new(0.0, 0.0, 0.0);
    let cluster = random_cluster(&mut rng, 30, source, 0.5);
    let m: Multipole<f64, N> = multipole_of(&cluster, &source);

    let mut err = 0.0;
    let mut norm = 0.0;
    for _ in 0..50 {
        let direction = Vec3::from_fn(|_, _| rng.random_range(-1.0..1.0)).normalize();
        let target = source + direction * 4.0;
        let local = m.makelocal(&(target - source));
        for _ in 0..5 {
            let x = target + Vec3::from_fn(|_, _| rng.random_range(-0.15..0.15));
            let (force, _) = direct(&cluster, &x);
            err += (local.calc_force(&(x - target)) - force).norm_squared();
            norm += force.norm_squared();
        }
    }
    (err / norm).sqrt()
}

#[test]
fn error_shrinks_with_order() {
    let errors = [
        far_field_error::<0>(),
        far_field_error::<1>(),
        far_field_error::<2>(),
        far_field_error::<3>(),
        far_field_error::<4>(),
    ];
    for w in errors.windows(2) {
        assert!(w[1] < w[0], "errors by order: {errors:?}");
    }
    assert!(errors[4] < 1e-3, "errors by order: {errors:?}");
}
