pub mod direct;
pub mod error;
pub mod fmm;
pub mod initial;
pub mod integrator;
pub mod key;
pub mod multipole;
pub mod particles;
pub mod radix_sort;
pub mod shared;
pub mod tree;
pub mod vicinity;

pub use error::{FmmError, Result};
pub use fmm::{FmmSimulation, PrecisionReport};
