//! Initial particle distributions.

use std::path::Path;

use log::info;
use rand::{Rng, rngs::StdRng};
use rand_distr::StandardNormal;

use crate::error::{FmmError, Result};
use crate::shared::{Float, PointParticle, Vec3, cast};

/// Grey-scale image; pixel brightness is the probability of placing a particle there.
#[derive(Clone, Debug)]
pub struct IntensityMap {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl IntensityMap {
    pub fn new(width: usize, height: usize, pixels: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 || width.checked_mul(height) != Some(pixels.len()) {
            return Err(FmmError::InvalidImage(format!(
                "{} pixels do not fill a {width}x{height} image",
                pixels.len()
            )));
        }
        if pixels.iter().all(|&p| p == 0) {
            return Err(FmmError::InvalidImage("image is completely dark".into()));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Reads a binary (`P5`) or plain (`P2`) PGM file.
    pub fn load_pgm(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let map = Self::from_pgm_bytes(&bytes)?;
        info!(
            "loaded {}x{} intensity map from {}",
            map.width,
            map.height,
            path.as_ref().display()
        );
        Ok(map)
    }

    pub fn from_pgm_bytes(bytes: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let mut header = [0usize; 3];
        let magic = next_token(bytes, &mut pos).ok_or_else(|| bad("missing magic number"))?;
        let binary = match magic {
            b"P5" => true,
            b"P2" => false,
            _ => return Err(bad("not a PGM file")),
        };
        for value in header.iter_mut() {
            let token = next_token(bytes, &mut pos).ok_or_else(|| bad("truncated header"))?;
            *value = parse_number(token)?;
        }
        let [width, height, maxval] = header;
        if maxval == 0 || maxval > 255 {
            return Err(bad("only 8-bit images are supported"));
        }

        let count = width
            .checked_mul(height)
            .ok_or_else(|| bad("image dimensions overflow"))?;
        let raw: Vec<usize> = if binary {
            // A single whitespace byte separates the header from the raster.
            let start = pos + 1;
            let data = start
                .checked_add(count)
                .and_then(|end| bytes.get(start..end))
                .ok_or_else(|| bad("raster is shorter than the header says"))?;
            data.iter().map(|&b| b as usize).collect()
        } else {
            let mut values = Vec::with_capacity(count.min(bytes.len()));
            for _ in 0..count {
                let token = next_token(bytes, &mut pos).ok_or_else(|| bad("raster is shorter than the header says"))?;
                values.push(parse_number(token)?);
            }
            values
        };
        let pixels = raw.into_iter().map(|v| (v.min(maxval) * 255 / maxval) as u8).collect();
        Self::new(width, height, pixels)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Brightness at normalised image coordinates in `[0, 1)`.
    pub fn brightness(&self, u: f64, v: f64) -> u8 {
        let x = ((u * self.width as f64) as usize).min(self.width - 1);
        let y = ((v * self.height as f64) as usize).min(self.height - 1);
        self.pixels[y * self.width + x]
    }

    /// Rejection-samples a point in a thin slab over the image.
    pub fn sample(&self, rng: &mut StdRng) -> Vec3<f64> {
        loop {
            let r = Vec3::new(rng.random::<f64>(), rng.random::<f64>(), rng.random::<f64>() * 0.1);
            let u: f64 = rng.random();
            if u * 255.0 < self.brightness(r[0], r[1]) as f64 {
                return r;
            }
        }
    }
}

fn bad(reason: &str) -> FmmError {
    FmmError::InvalidImage(reason.to_string())
}

fn parse_number(token: &[u8]) -> Result<usize> {
    std::str::from_utf8(token)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| bad("malformed number"))
}

/// Next whitespace-separated token, skipping `#` comments.
fn next_token<'a>(bytes: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    loop {
        while *pos < bytes.len() && bytes[*pos].is_ascii_whitespace() {
            *pos += 1;
        }
        if *pos < bytes.len() && bytes[*pos] == b'#' {
            while *pos < bytes.len() && bytes[*pos] != b'\n' {
                *pos += 1;
            }
            continue;
        }
        break;
    }
    let start = *pos;
    while *pos < bytes.len() && !bytes[*pos].is_ascii_whitespace() {
        *pos += 1;
    }
    (*pos > start).then(|| &bytes[start..*pos])
}

#[derive(Clone, Debug)]
pub enum InitialConditions {
    /// Uniform density ball at rest.
    UniformSphere { radius: f64 },
    /// Two rotating Gaussian clusters on a collision course.
    CollidingSpheres,
    /// Truncated Gaussian in every coordinate, at rest.
    GaussianCube,
    /// Particles placed by image brightness, at rest.
    Image(IntensityMap),
}

fn normal(rng: &mut StdRng, sigma: f64) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    z * sigma
}

impl InitialConditions {
    /// `n` particles of mass `1 / n`.
    pub fn generate<F: Float>(&self, n: usize, rng: &mut StdRng) -> Result<Vec<PointParticle<F>>> {
        if n == 0 {
            return Err(FmmError::invalid("num_particles", "must be at least 1"));
        }
        let states: Vec<(Vec3<f64>, Vec3<f64>)> = match self {
            InitialConditions::UniformSphere { radius } => {
                if !(*radius > 0.0) {
                    return Err(FmmError::invalid("radius", format!("{radius} is not positive")));
                }
                (0..n)
                    .map(|_| loop {
                        let x = Vec3::from_fn(|_, _| rng.random_range(-1.0..1.0));
                        if x.norm_squared() < 1.0 {
                            break (x * *radius, Vec3::zeros());
                        }
                    })
                    .collect()
            }
            InitialConditions::CollidingSpheres => (0..n).map(|i| colliding(rng, i < n / 2)).collect(),
            InitialConditions::GaussianCube => (0..n)
                .map(|_| {
                    let x = Vec3::from_fn(|_, _| loop {
                        let c = normal(rng, 0.5);
                        if c.abs() < 1.0 {
                            break c;
                        }
                    });
                    (x, Vec3::zeros())
                })
                .collect(),
            InitialConditions::Image(map) => {
                let mut points: Vec<Vec3<f64>> = (0..n).map(|_| map.sample(rng)).collect();
                normalise_image_points(&mut points);
                points.into_iter().map(|x| (x, Vec3::zeros())).collect()
            }
        };

        let mass = cast::<F>(1.0 / n as f64);
        Ok(states
            .into_iter()
            .map(|(x, v)| PointParticle::new(x.map(cast::<F>), v.map(cast::<F>), mass))
            .collect())
    }
}

fn colliding(rng: &mut StdRng, first: bool) -> (Vec3<f64>, Vec3<f64>) {
    let mut x = loop {
        let x = Vec3::from_fn(|_, _| normal(rng, 0.2));
        if x.norm() < 1.0 {
            break x;
        }
    };
    let mut v = Vec3::from_fn(|_, _| normal(rng, 0.2));
    let spin = Vec3::new(-x[1], x[0], 0.0);
    let spin_norm = spin.norm();
    if spin_norm > 0.0 {
        v += spin * (0.4 * (10.0 * x.norm()).min(1.0) / spin_norm);
    }
    let offset = Vec3::new(0.8, 0.2, 0.0);
    if first {
        v = -v;
        x += offset;
        v += Vec3::new(-0.4, 0.0, 0.0);
    } else {
        x -= offset;
        v += Vec3::new(0.4, 0.0, 0.0);
    }
    (x, v)
}

/// Centres the points on their mean, scales them to an RMS radius of 0.5 and flips the
/// image's downward y axis.
fn normalise_image_points(points: &mut [Vec3<f64>]) {
    let n = points.len() as f64;
    let mean = points.iter().fold(Vec3::zeros(), |acc, x| acc + x) / n;
    let rms = (points.iter().map(|x| (x - mean).norm_squared()).sum::<f64>() / n).sqrt();
    let scale = if rms > 0.0 { 0.5 / rms } else { 1.0 };
    for x in points.iter_mut() {
        *x = (*x - mean) * scale;
        x[1] = -x[1];
    }
}
