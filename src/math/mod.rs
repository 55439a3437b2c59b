//! Numeric primitives for dp-query.
//!
//! Provides the array-level operations the queries are built from:
//!
//! - [`norms`] - L2 norm computations, including the joint norm of several arrays
//! - [`clip`] - Global-norm clipping
//! - [`noise`] - Seeded Gaussian noise

pub mod clip;
pub mod noise;
pub mod norms;

pub use clip::{clip_by_global_norm, clip_scale};
pub use noise::GaussianNoise;
pub use norms::{global_l2_norm, l2_norm, l2_norm_sq};
