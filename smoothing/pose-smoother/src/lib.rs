//! Sliding-window factor-graph smoother.
//!
//! State variables are SE(2) poses keyed by microsecond timestamps.
//! Measurements arrive out of order as factors; each [`Smoother::update`]
//! re-linearizes the window and runs Gauss-Newton on the dense normal
//! equations (the window holds tens of 3-dof variables, so dense
//! Cholesky beats any sparse bookkeeping). States older than the lag
//! window are marginalised out through a linear approximation around
//! their current estimate.

pub type Result<M> = std::result::Result<M, SmootherError>;

#[derive(thiserror::Error, Debug)]
pub enum SmootherError {
    /// Programmer error: a factor referenced a state that was never
    /// added. Fatal at the call site.
    #[error("factor references unknown state key {key}")]
    InvalidKey { key: i64 },
    #[error("smoother is not initialized")]
    Uninitialized,
}

mod values;
pub use crate::values::Values;

mod noise;
pub use crate::noise::DiagonalNoise;

mod factor;
pub use crate::factor::{numerical_jacobians, Factor};

pub mod factors;

mod smoother;
pub use crate::smoother::{Smoother, SmootherConfig, UpdateReport};
