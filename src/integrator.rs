use log::warn;
use rayon::prelude::*;

use crate::particles::ParticleBuffers;
use crate::shared::{Float, Integrator, Vec3, cast};

/// What happens to a particle that drifted out of the cubic domain `[-L, L]^3`.
pub trait BoundaryCondition<F: Float>: Send + Sync {
    /// Moves the particle back inside; returns whether it had left.
    fn apply(&self, position: &mut Vec3<F>, velocity: &mut Vec3<F>, half_width: F) -> bool;
}

/// Clamps the particle to the domain, pulls it slightly inwards and stops it.
#[derive(Clone, Copy, Debug, Default)]
pub struct ShrinkAndStop;

impl<F: Float> BoundaryCondition<F> for ShrinkAndStop {
    fn apply(&self, position: &mut Vec3<F>, velocity: &mut Vec3<F>, half_width: F) -> bool {
        let mut outside = false;
        for k in 0..3 {
            if position[k] > half_width {
                position[k] = half_width;
                outside = true;
            } else if position[k] < -half_width {
                position[k] = -half_width;
                outside = true;
            }
        }
        if outside {
            *position *= cast::<F>(0.99);
            *velocity = Vec3::zeros();
        }
        outside
    }
}

/// Mirrors the particle at the wall it crossed and flips that velocity component.
#[derive(Clone, Copy, Debug, Default)]
pub struct Reflect;

impl<F: Float> BoundaryCondition<F> for Reflect {
    fn apply(&self, position: &mut Vec3<F>, velocity: &mut Vec3<F>, half_width: F) -> bool {
        let two = cast::<F>(2.0);
        let mut outside = false;
        for k in 0..3 {
            if position[k] > half_width {
                position[k] = two * half_width - position[k];
                velocity[k] = -velocity[k];
                outside = true;
            } else if position[k] < -half_width {
                position[k] = -two * half_width - position[k];
                velocity[k] = -velocity[k];
                outside = true;
            }
            // Far escapes would still be outside after mirroring.
            if position[k] > half_width {
                position[k] = half_width;
            } else if position[k] < -half_width {
                position[k] = -half_width;
            }
        }
        outside
    }
}

/// Drift half a step, evaluate forces, kick a full step, drift half a step.
#[derive(Clone, Debug)]
pub struct LeapFrogIntegrator<F: Float, B = ShrinkAndStop> {
    half_width: F,
    boundary: B,
    contained: usize,
}

impl<F: Float, B: BoundaryCondition<F>> LeapFrogIntegrator<F, B> {
    pub fn new(half_width: F, boundary: B) -> Self {
        Self {
            half_width,
            boundary,
            contained: 0,
        }
    }

    pub fn half_width(&self) -> F {
        self.half_width
    }

    pub fn set_half_width(&mut self, half_width: F) {
        self.half_width = half_width;
    }

    /// Particles the boundary condition had to act on since `init`.
    pub fn contained(&self) -> usize {
        self.contained
    }

    fn drift(&mut self, particles: &mut ParticleBuffers<F>, dt: F) {
        let half_width = self.half_width;
        let boundary = &self.boundary;
        let moved = particles
            .positions
            .par_iter_mut()
            .zip(particles.velocities.par_iter_mut())
            .map(|(x, v)| {
                *x += *v * dt;
                boundary.apply(x, v, half_width)
            })
            .filter(|&moved| moved)
            .count();
        if moved > 0 {
            warn!("boundary condition applied to {moved} particles");
            self.contained += moved;
        }
    }
}

impl<F: Float, B: BoundaryCondition<F>> Integrator<F> for LeapFrogIntegrator<F, B> {
    fn init(&mut self) {
        self.contained = 0;
    }

    fn integrate_pre_force(&mut self, particles: &mut ParticleBuffers<F>, dt: F) {
        self.drift(particles, dt * cast::<F>(0.5));
    }

    fn integrate_after_force(&mut self, particles: &mut ParticleBuffers<F>, dt: F) {
        particles
            .velocities
            .par_iter_mut()
            .zip(particles.accelerations.par_iter())
            .for_each(|(v, a)| *v += *a * dt);
        self.drift(particles, dt * cast::<F>(0.5));
    }
}
