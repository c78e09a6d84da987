use rayon::prelude::*;

use crate::error::Result;
use crate::integrator::LeapFrogIntegrator;
use crate::particles::ParticleBuffers;
use crate::shared::{Float, Integrator, Simulation, SimulationSettings, Vec3};

/// Acceleration and potential at particle `index` from every other particle.
pub fn direct_sum<F: Float>(positions: &[Vec3<F>], masses: &[F], index: usize, g: F, softening: F) -> (Vec3<F>, F) {
    let x = positions[index];
    let soft2 = softening * softening;
    let mut acc = Vec3::zeros();
    let mut pot = F::zero();
    for (j, (y, &m)) in positions.iter().zip(masses).enumerate() {
        if j == index {
            continue;
        }
        let d = y - x;
        let r2 = d.norm_squared() + soft2;
        if r2 == F::zero() {
            continue;
        }
        let inv = F::one() / r2.sqrt();
        acc += d * (m * inv * inv * inv);
        pot -= m * inv;
    }
    (acc * g, pot * g)
}

/// [`direct_sum`] for each of `indices`, in parallel.
pub fn direct_forces<F: Float>(
    positions: &[Vec3<F>],
    masses: &[F],
    indices: &[usize],
    g: F,
    softening: F,
) -> Vec<(Vec3<F>, F)> {
    indices
        .par_iter()
        .map(|&i| direct_sum(positions, masses, i, g, softening))
        .collect()
}

/// O(N^2) reference simulation.
#[derive(Clone, Debug)]
pub struct BruteForceSimulation<F: Float, I = LeapFrogIntegrator<F>> {
    particles: ParticleBuffers<F>,
    integrator: I,
    settings: SimulationSettings<F>,
    elapsed: F,
}

impl<F: Float, I: Integrator<F>> BruteForceSimulation<F, I> {
    pub fn new(particles: ParticleBuffers<F>, integrator: I, mut settings: SimulationSettings<F>) -> Result<Self> {
        settings.num_particles = particles.len();
        settings.validate()?;
        Ok(Self {
            particles,
            integrator,
            settings,
            elapsed: F::zero(),
        })
    }
}

impl<F: Float, I: Integrator<F>> Simulation<F> for BruteForceSimulation<F, I> {
    fn init(&mut self) -> Result<()> {
        self.integrator.init();
        self.elapsed = F::zero();
        self.update_forces()
    }

    fn settings(&self) -> &SimulationSettings<F> {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut SimulationSettings<F> {
        &mut self.settings
    }

    fn elapsed(&self) -> F {
        self.elapsed
    }

    fn update_forces(&mut self) -> Result<()> {
        let (g, softening) = (self.settings.g, self.settings.softening);
        let particles = &mut self.particles;
        let (positions, masses) = (&particles.positions, &particles.masses);
        particles
            .accelerations
            .par_iter_mut()
            .zip(particles.potentials.par_iter_mut())
            .enumerate()
            .for_each(|(i, (a, p))| {
                (*a, *p) = direct_sum(positions, masses, i, g, softening);
            });
        Ok(())
    }

    fn step_by(&mut self, dt: F) -> Result<()> {
        self.integrator.integrate_pre_force(&mut self.particles, dt);
        self.update_forces()?;
        self.integrator.integrate_after_force(&mut self.particles, dt);
        self.elapsed += dt;
        Ok(())
    }

    fn particles(&self) -> &ParticleBuffers<F> {
        &self.particles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrator::ShrinkAndStop;
    use crate::shared::PointParticle;

    fn pair() -> ParticleBuffers<f64> {
        ParticleBuffers::from_particles([
            PointParticle::new(Vec3::new(-1.0, 0.0, 0.0), Vec3::zeros(), 1.0),
            PointParticle::new(Vec3::new(1.0, 0.0, 0.0), Vec3::zeros(), 1.0),
        ])
    }

    #[test]
    fn two_bodies_attract() {
        let particles = pair();
        let (a, p) = direct_sum(&particles.positions, &particles.masses, 0, 1.0, 0.0);
        assert!((a - Vec3::new(0.25, 0.0, 0.0)).norm() < 1e-15);
        assert!((p + 0.5).abs() < 1e-15);
    }

    #[test]
    fn momentum_is_conserved() {
        let settings = SimulationSettings {
            num_particles: 2,
            ..Default::default()
        };
        let integrator = LeapFrogIntegrator::new(settings.half_width, ShrinkAndStop);
        let mut sim = BruteForceSimulation::new(pair(), integrator, settings).unwrap();
        sim.init().unwrap();
        for _ in 0..50 {
            sim.step().unwrap();
        }
        let particles = sim.particles();
        assert!(particles.total_momentum().norm() < 1e-12);
        assert!(particles.positions[0][0] > -1.0 && particles.positions[0][0] < 0.0);
        assert!((sim.elapsed() - 50.0 * 5e-3).abs() < 1e-12);
    }
}
