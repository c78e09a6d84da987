//! Fast multipole simulation: key, sort, build, upward pass, downward pass, every step.

mod downward;
mod upward;

pub use downward::{TraversalParams, TraversalStats};
pub use upward::upward_pass;

use log::{debug, info};
use rand::{SeedableRng, rngs::StdRng};
use rayon::prelude::*;
use web_time::Instant;

use crate::direct::direct_forces;
use crate::error::{FmmError, Result};
use crate::initial::InitialConditions;
use crate::integrator::{BoundaryCondition, LeapFrogIntegrator, ShrinkAndStop};
use crate::key::{KeyDomain, SpatialKey};
use crate::particles::{ParticleBuffers, PingPong};
use crate::radix_sort::{KeyPair, RadixSort};
use crate::shared::{Float, Integrator, Simulation, SimulationSettings, to_f64};
use crate::tree::{Tree, TreeParams};
use crate::vicinity::VicinityData;
use downward::Downward;

/// Result of comparing tree forces against direct summation on a subsample.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrecisionReport {
    pub samples: usize,
    pub force_rms: f64,
    /// `force_rms` relative to the RMS of the reference accelerations.
    pub force_rel: f64,
    pub potential_rms: f64,
    pub potential_rel: f64,
}

pub struct FmmSimulation<F: Float, K: SpatialKey = u64, const N: usize = 4, B = ShrinkAndStop>
where
    B: BoundaryCondition<F>,
{
    settings: SimulationSettings<F>,
    domain: KeyDomain<F>,
    vicinity: VicinityData,
    sorter: RadixSort,
    integrator: LeapFrogIntegrator<F, B>,
    particles: PingPong<ParticleBuffers<F>>,
    pairs: PingPong<Vec<KeyPair<K>>>,
    keys: Vec<K>,
    order: Vec<u32>,
    tree: Tree<F, N>,
    stats: TraversalStats,
    elapsed: F,
    steps: usize,
}

impl<F: Float, K: SpatialKey, const N: usize> FmmSimulation<F, K, N, ShrinkAndStop> {
    pub fn new(settings: SimulationSettings<F>) -> Result<Self> {
        Self::with_boundary(settings, ShrinkAndStop)
    }
}

impl<F: Float, K: SpatialKey, const N: usize, B: BoundaryCondition<F>> FmmSimulation<F, K, N, B> {
    /// Validates the settings and precomputes the neighbourhood lists.
    pub fn with_boundary(settings: SimulationSettings<F>, boundary: B) -> Result<Self> {
        settings.validate()?;
        let vicinity = VicinityData::new(settings.acceptance_distance)?;
        let sorter = RadixSort::new(settings.register_budget, std::mem::size_of::<KeyPair<K>>());
        info!(
            "fmm: order {N}, {}-bit keys, {}-bit radix digits, node budget {}",
            K::BITS,
            sorter.digit_bits(),
            settings.node_capacity()
        );
        Ok(Self {
            domain: KeyDomain::new(settings.half_width),
            integrator: LeapFrogIntegrator::new(settings.half_width, boundary),
            particles: PingPong::default(),
            pairs: PingPong::default(),
            keys: Vec::new(),
            order: Vec::new(),
            tree: Tree::default(),
            stats: TraversalStats::default(),
            elapsed: F::zero(),
            steps: 0,
            settings,
            vicinity,
            sorter,
        })
    }

    /// Replaces the particle state with freshly generated initial conditions.
    pub fn init_conditions(&mut self, conditions: &InitialConditions) -> Result<()> {
        let mut rng = StdRng::seed_from_u64(self.settings.seed);
        let particles = conditions.generate::<F>(self.settings.num_particles, &mut rng)?;
        self.set_particles(ParticleBuffers::from_particles(particles))
    }

    pub fn set_particles(&mut self, particles: ParticleBuffers<F>) -> Result<()> {
        if particles.is_empty() || particles.len() > u32::MAX as usize {
            return Err(FmmError::invalid(
                "num_particles",
                format!("{} is outside 1..=u32::MAX", particles.len()),
            ));
        }
        self.settings.num_particles = particles.len();
        self.particles = PingPong::new(particles, ParticleBuffers::default());
        self.init()
    }

    /// One leapfrog step of the configured length.
    pub fn advance(&mut self) -> Result<()> {
        self.step()
    }

    pub fn tree(&self) -> &Tree<F, N> {
        &self.tree
    }

    pub fn vicinity(&self) -> &VicinityData {
        &self.vicinity
    }

    pub fn domain(&self) -> &KeyDomain<F> {
        &self.domain
    }

    /// Sorted keys of the last force evaluation, aligned with the particle buffers.
    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    pub fn traversal_stats(&self) -> TraversalStats {
        self.stats
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Rebuilds the state derived from settings that were changed through `settings_mut`.
    fn sync_settings(&mut self) -> Result<()> {
        self.settings.validate()?;
        let half_width = self.settings.half_width;
        if self.domain.half_width() != half_width {
            debug!("domain half-width changed to {}", to_f64(half_width));
            self.domain = KeyDomain::new(half_width);
            self.integrator.set_half_width(half_width);
        }
        if self.vicinity.acceptance_distance() != self.settings.acceptance_distance {
            self.vicinity = VicinityData::new(self.settings.acceptance_distance)?;
        }
        self.sorter = RadixSort::new(self.settings.register_budget, std::mem::size_of::<KeyPair<K>>());
        Ok(())
    }

    fn sort_particles(&mut self) {
        let domain = self.domain;
        let positions = &self.particles.front().positions;
        positions
            .par_iter()
            .enumerate()
            .map(|(i, x)| (domain.encode::<K>(x), i as u32))
            .collect_into_vec(self.pairs.front_mut());
        self.sorter.sort(&mut self.pairs, K::BITS);

        let sorted = self.pairs.front();
        sorted.par_iter().map(|p| p.0).collect_into_vec(&mut self.keys);
        sorted.par_iter().map(|p| p.1).collect_into_vec(&mut self.order);
        let order = &self.order;
        self.particles.flip_with(|src, dst| src.gather_into(order, dst));
    }

    /// Compares the current accelerations and potentials with direct summation on
    /// `samples` evenly spaced particles.
    pub fn precision_test(&mut self, samples: usize) -> Result<PrecisionReport> {
        self.update_forces()?;
        let particles = self.particles.front();
        let n = particles.len();
        let samples = samples.clamp(1, n);
        let indices: Vec<usize> = (0..samples).map(|k| k * n / samples).collect();
        let reference = direct_forces(
            &particles.positions,
            &particles.masses,
            &indices,
            self.settings.g,
            self.settings.softening,
        );

        let (mut df, mut rf, mut dp, mut rp) = (0.0, 0.0, 0.0, 0.0);
        for (&i, (acc, pot)) in indices.iter().zip(&reference) {
            df += to_f64((particles.accelerations[i] - acc).norm_squared());
            rf += to_f64(acc.norm_squared());
            let d = to_f64(particles.potentials[i] - *pot);
            dp += d * d;
            rp += to_f64(*pot * *pot);
        }
        let m = samples as f64;
        let report = PrecisionReport {
            samples,
            force_rms: (df / m).sqrt(),
            force_rel: if rf > 0.0 { (df / rf).sqrt() } else { 0.0 },
            potential_rms: (dp / m).sqrt(),
            potential_rel: if rp > 0.0 { (dp / rp).sqrt() } else { 0.0 },
        };
        info!(
            "precision over {samples} particles: force {:.3e} (rel {:.3e}), potential {:.3e} (rel {:.3e})",
            report.force_rms, report.force_rel, report.potential_rms, report.potential_rel
        );
        Ok(report)
    }
}

impl<F: Float, K: SpatialKey, const N: usize, B: BoundaryCondition<F>> Simulation<F> for FmmSimulation<F, K, N, B> {
    fn init(&mut self) -> Result<()> {
        self.integrator.init();
        self.elapsed = F::zero();
        self.steps = 0;
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
        if self.particles.front().is_empty() {
            return Ok(());
        }
        self.sync_settings()?;
        let start = Instant::now();
        self.sort_particles();
        let sorted = start.elapsed();

        let params = TreeParams::new::<F, K>(&self.settings);
        self.tree.build(&self.keys, &self.domain, &params)?;
        let particles = self.particles.front_mut();
        if cfg!(debug_assertions) {
            self.tree.validate(&particles.positions, &self.domain)?;
        }
        let built = start.elapsed();

        upward_pass(&mut self.tree, &particles.positions, &particles.masses);
        let upward = start.elapsed();

        let ParticleBuffers {
            positions,
            masses,
            accelerations,
            potentials,
            ..
        } = particles;
        let downward = Downward {
            tree: &self.tree,
            keys: &self.keys,
            positions,
            masses,
            domain: &self.domain,
            vicinity: &self.vicinity,
            params: TraversalParams {
                max_depth: params.max_depth,
                cost_factor: self.settings.cost_factor,
                g: self.settings.g,
                softening: self.settings.softening,
            },
        };
        self.stats = downward.run(accelerations, potentials)?;

        debug!(
            "forces for {} particles: sort {:?}, build {:?}, upward {:?}, downward {:?}",
            positions.len(),
            sorted,
            built - sorted,
            upward - built,
            start.elapsed() - upward
        );
        Ok(())
    }

    fn step_by(&mut self, dt: F) -> Result<()> {
        self.sync_settings()?;
        self.integrator.integrate_pre_force(self.particles.front_mut(), dt);
        self.update_forces()?;
        self.integrator.integrate_after_force(self.particles.front_mut(), dt);
        self.elapsed += dt;
        self.steps += 1;
        Ok(())
    }

    fn particles(&self) -> &ParticleBuffers<F> {
        self.particles.front()
    }
}
