use rayon::prelude::*;

use crate::shared::{Float, PointParticle, Vec3};

/// Two buffers of the same kind; a pass reads the front, writes the back, then they swap.
#[derive(Clone, Debug, Default)]
pub struct PingPong<T> {
    front: T,
    back: T,
}

impl<T> PingPong<T> {
    pub fn new(front: T, back: T) -> Self {
        Self { front, back }
    }

    pub fn front(&self) -> &T {
        &self.front
    }

    pub fn front_mut(&mut self) -> &mut T {
        &mut self.front
    }

    /// Runs `pass` from front to back and hands ownership of the result to the front.
    pub fn flip_with<R>(&mut self, pass: impl FnOnce(&T, &mut T) -> R) -> R {
        let ret = pass(&self.front, &mut self.back);
        std::mem::swap(&mut self.front, &mut self.back);
        ret
    }

    pub fn split_mut(&mut self) -> (&mut T, &mut T) {
        (&mut self.front, &mut self.back)
    }
}

/// Particle state stored as parallel arrays so a sort permutation can move everything at once.
#[derive(Clone, Debug)]
pub struct ParticleBuffers<F: Float> {
    pub positions: Vec<Vec3<F>>,
    pub velocities: Vec<Vec3<F>>,
    pub masses: Vec<F>,
    pub potentials: Vec<F>,
    pub accelerations: Vec<Vec3<F>>,
    /// Creation index of each particle, carried along through every reordering.
    pub ids: Vec<u32>,
}

impl<F: Float> Default for ParticleBuffers<F> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl<F: Float> ParticleBuffers<F> {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            positions: Vec::with_capacity(n),
            velocities: Vec::with_capacity(n),
            masses: Vec::with_capacity(n),
            potentials: Vec::with_capacity(n),
            accelerations: Vec::with_capacity(n),
            ids: Vec::with_capacity(n),
        }
    }

    pub fn from_particles(particles: impl IntoIterator<Item = PointParticle<F>>) -> Self {
        let particles = particles.into_iter();
        let mut buffers = Self::with_capacity(particles.size_hint().0);
        for particle in particles {
            buffers.push(particle);
        }
        buffers
    }

    pub fn push(&mut self, particle: PointParticle<F>) {
        self.ids.push(self.positions.len() as u32);
        self.positions.push(particle.position);
        self.velocities.push(particle.velocity);
        self.masses.push(particle.mass);
        self.potentials.push(F::zero());
        self.accelerations.push(Vec3::zeros());
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get(&self, index: usize) -> PointParticle<F> {
        PointParticle::new(self.positions[index], self.velocities[index], self.masses[index])
    }

    /// Current slot of the particle created with `id`.
    pub fn find(&self, id: u32) -> Option<usize> {
        self.ids.par_iter().position_any(|&i| i == id)
    }

    fn resize_like(&mut self, n: usize) {
        self.positions.resize(n, Vec3::zeros());
        self.velocities.resize(n, Vec3::zeros());
        self.masses.resize(n, F::zero());
        self.potentials.resize(n, F::zero());
        self.accelerations.resize(n, Vec3::zeros());
        self.ids.resize(n, 0);
    }

    /// Writes `out[k] = self[order[k]]` for every buffer.
    pub fn gather_into(&self, order: &[u32], out: &mut Self) {
        debug_assert_eq!(order.len(), self.len());
        out.resize_like(order.len());

        fn gather<T: Copy + Send + Sync>(src: &[T], order: &[u32], dst: &mut [T]) {
            dst.par_iter_mut()
                .zip(order.par_iter())
                .for_each(|(d, &i)| *d = src[i as usize]);
        }

        gather(&self.positions, order, &mut out.positions);
        gather(&self.velocities, order, &mut out.velocities);
        gather(&self.masses, order, &mut out.masses);
        gather(&self.potentials, order, &mut out.potentials);
        gather(&self.accelerations, order, &mut out.accelerations);
        gather(&self.ids, order, &mut out.ids);
    }

    pub fn total_mass(&self) -> F {
        self.masses.iter().fold(F::zero(), |acc, &m| acc + m)
    }

    pub fn total_momentum(&self) -> Vec3<F> {
        self.velocities
            .par_iter()
            .zip(self.masses.par_iter())
            .map(|(v, &m)| v * m)
            .reduce(Vec3::zeros, |a, b| a + b)
    }

    pub fn kinetic_energy(&self) -> F {
        let twice: F = self
            .velocities
            .par_iter()
            .zip(self.masses.par_iter())
            .map(|(v, &m)| v.norm_squared() * m)
            .reduce(F::zero, |a, b| a + b);
        twice * crate::shared::cast(0.5)
    }

    /// Uses the potentials of the last force evaluation.
    pub fn potential_energy(&self) -> F {
        let twice: F = self
            .potentials
            .par_iter()
            .zip(self.masses.par_iter())
            .map(|(&p, &m)| p * m)
            .reduce(F::zero, |a, b| a + b);
        twice * crate::shared::cast(0.5)
    }

    pub fn positions_f32(&self) -> Vec<[f32; 3]> {
        self.positions
            .iter()
            .map(|p| p.map(|x| num_traits::cast::<F, f32>(x).unwrap_or(f32::NAN)).into())
            .collect()
    }

    pub fn potentials_f32(&self) -> Vec<f32> {
        self.potentials
            .iter()
            .map(|&p| num_traits::cast::<F, f32>(p).unwrap_or(f32::NAN))
            .collect()
    }

    /// Positions packed as `f32` triples, ready for upload as a vertex buffer.
    pub fn position_bytes(&self) -> Vec<u8> {
        let positions = self.positions_f32();
        bytemuck::cast_slice::<[f32; 3], u8>(&positions).to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ParticleBuffers<f64> {
        ParticleBuffers::from_particles((0..4).map(|i| {
            let x = i as f64;
            PointParticle::new(Vec3::new(x, 0.0, 0.0), Vec3::new(0.0, x, 0.0), 1.0 + x)
        }))
    }

    #[test]
    fn gather_moves_every_buffer_together() {
        let mut buffers = PingPong::new(sample(), ParticleBuffers::default());
        buffers.flip_with(|front, back| front.gather_into(&[3, 1, 0, 2], back));

        let p = buffers.front();
        assert_eq!(p.ids, vec![3, 1, 0, 2]);
        for k in 0..4 {
            let id = p.ids[k] as f64;
            assert_eq!(p.positions[k].x, id);
            assert_eq!(p.velocities[k].y, id);
            assert_eq!(p.masses[k], 1.0 + id);
        }
        assert_eq!(p.find(2), Some(3));
    }

    #[test]
    fn default_buffers_are_empty() {
        let buffers: PingPong<ParticleBuffers<f32>> = PingPong::default();
        assert!(buffers.front().is_empty());
        assert_eq!(ParticleBuffers::<f64>::default().total_mass(), 0.0);
    }

    #[test]
    fn momentum_and_energy() {
        let p = sample();
        assert_eq!(p.total_mass(), 10.0);
        // 2*1 + 3*2 + 4*3
        assert_eq!(p.total_momentum(), Vec3::new(0.0, 20.0, 0.0));
        assert_eq!(p.kinetic_energy(), 0.5 * (2.0 + 3.0 * 4.0 + 4.0 * 9.0));
        assert_eq!(p.position_bytes().len(), 4 * 3 * 4);
    }
}
