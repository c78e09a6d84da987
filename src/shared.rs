// Behaviour shared by the tree code and the direct-summation reference.

use nalgebra::{RealField, SVector};
use num_traits::NumCast;

use crate::error::{FmmError, Result};
use crate::particles::ParticleBuffers;

pub trait Float: RealField + Copy + NumCast + Send + Sync + 'static {}

impl<T> Float for T where T: RealField + Copy + NumCast + Send + Sync + 'static {}

pub type Vec3<F> = SVector<F, 3>;

#[inline]
pub fn cast<F: Float>(x: f64) -> F {
    nalgebra::convert(x)
}

#[inline]
pub fn to_f64<F: Float>(x: F) -> f64 {
    num_traits::cast::<F, f64>(x).unwrap_or(f64::NAN)
}

/// Cyclic axis rotation: one step maps `(a0, a1, a2)` to `(a1, a2, a0)`.
#[inline]
pub fn rot<F: Float>(a: &Vec3<F>, step: i32) -> Vec3<F> {
    match step.rem_euclid(3) {
        0 => *a,
        1 => Vec3::new(a[1], a[2], a[0]),
        _ => Vec3::new(a[2], a[0], a[1]),
    }
}

#[derive(Clone, Debug)]
pub struct PointParticle<F: Float> {
    pub position: Vec3<F>,
    pub velocity: Vec3<F>,
    pub mass: F,
}

impl<F: Float> PointParticle<F> {
    pub fn new(position: Vec3<F>, velocity: Vec3<F>, mass: F) -> Self {
        Self {
            position,
            velocity,
            mass,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SimulationSettings<F: Float> {
    pub num_particles: usize,
    pub dt: F,
    pub g: F,
    pub softening: F,
    /// Half-width of the cubic domain the particles are kept in.
    pub half_width: F,
    pub max_depth: usize,
    /// Nodes above this depth are split regardless of their size.
    pub min_depth: usize,
    pub max_leaf_size: usize,
    /// Multipole acceptance distance in units of the cell size.
    pub acceptance_distance: f64,
    /// Cost of one multipole-to-local conversion relative to one particle pair.
    pub cost_factor: f64,
    /// Preallocated tree nodes. `None` means `0.3 * num_particles + 1000`.
    pub node_budget: Option<usize>,
    pub register_budget: usize,
    pub seed: u64,
}

impl<F: Float> Default for SimulationSettings<F> {
    fn default() -> Self {
        Self {
            num_particles: 1_000_000,
            dt: cast(5e-3),
            g: F::one(),
            softening: F::zero(),
            half_width: cast(4.0),
            max_depth: 64,
            min_depth: 0,
            max_leaf_size: 16,
            acceptance_distance: 1.2,
            cost_factor: 40.0,
            node_budget: None,
            register_budget: 128,
            seed: 0,
        }
    }
}

impl<F: Float> SimulationSettings<F> {
    pub fn node_capacity(&self) -> usize {
        self.node_budget
            .unwrap_or(self.num_particles * 3 / 10 + 1000)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_particles == 0 || self.num_particles > u32::MAX as usize {
            return Err(FmmError::invalid(
                "num_particles",
                format!("{} is outside 1..=u32::MAX", self.num_particles),
            ));
        }
        if !(self.half_width > F::zero()) {
            return Err(FmmError::invalid("half_width", "must be positive"));
        }
        if !to_f64(self.dt).is_finite() {
            return Err(FmmError::invalid("dt", "must be finite"));
        }
        if self.softening < F::zero() {
            return Err(FmmError::invalid("softening", "must not be negative"));
        }
        if self.max_depth == 0 {
            return Err(FmmError::invalid("max_depth", "must be at least 1"));
        }
        if self.min_depth > self.max_depth {
            return Err(FmmError::invalid(
                "min_depth",
                format!("{} exceeds max_depth {}", self.min_depth, self.max_depth),
            ));
        }
        if self.max_leaf_size == 0 {
            return Err(FmmError::invalid("max_leaf_size", "must be at least 1"));
        }
        if !(self.acceptance_distance > 0.0 && self.acceptance_distance.is_finite()) {
            return Err(FmmError::invalid(
                "acceptance_distance",
                format!("{} is not a positive distance", self.acceptance_distance),
            ));
        }
        if !(self.cost_factor >= 0.0) {
            return Err(FmmError::invalid("cost_factor", "must not be negative"));
        }
        if self.node_capacity() < 2 {
            return Err(FmmError::invalid("node_budget", "must hold at least the root"));
        }
        Ok(())
    }
}

pub trait Simulation<F: Float> {
    fn init(&mut self) -> Result<()>;
    fn settings(&self) -> &SimulationSettings<F>;
    fn settings_mut(&mut self) -> &mut SimulationSettings<F>;
    fn elapsed(&self) -> F;
    /// Recomputes accelerations and potentials for the current positions.
    fn update_forces(&mut self) -> Result<()>;
    fn step_by(&mut self, dt: F) -> Result<()>;
    fn step(&mut self) -> Result<()> {
        let dt = self.settings().dt;
        self.step_by(dt)
    }
    fn particles(&self) -> &ParticleBuffers<F>;
}

pub trait Integrator<F: Float> {
    fn init(&mut self);
    fn integrate_pre_force(&mut self, particles: &mut ParticleBuffers<F>, dt: F);
    fn integrate_after_force(&mut self, particles: &mut ParticleBuffers<F>, dt: F);
}
