//! Crate-level error type.
//!
//! Mirrors the teacher's `linalg::solver::LinearSolverError` convention: one
//! enum, one `#[display]` message per variant, no string-typed errors.

use derive_more::{Display, Error};

/// Failure modes that can be surfaced across the learner contract.
///
/// Non-finite samples, machine-precision saturation, and stale refinements
/// are *not* represented here: the spec treats them as internal, silently
/// handled conditions (coefficient downdating, `_err_final`/`_igral_final`,
/// `discard`), never as an `Err` returned to the caller.
#[derive(Debug, Display, Error, PartialEq)]
pub enum AdaptiveError {
    /// `tell` was called with a point that was never dispensed by `ask`.
    #[display("point was not dispensed by ask() and belongs to no interval or simplex")]
    UnknownPoint,

    /// An `IntegratorConfig` was built without an absolute or a relative tolerance.
    #[display("at least one of `tol` or `rtol` must be provided")]
    MissingTolerance,

    /// A `TriangulatorConfig` was built with fewer than two dimensions.
    #[display("triangulator bounds must specify at least two dimensions")]
    InsufficientDimensions,

    /// A bounds pair had `lo >= hi` on some axis.
    #[display("bounds axis {axis} is empty or inverted (lo={lo}, hi={hi})")]
    InvalidBounds { axis: usize, lo: f64, hi: f64 },

    /// The integrand appears non-integrable: the divergence counter on some
    /// interval crossed the threshold relative to its split depth.
    #[display("integral appears divergent near [{a}, {b}] (ndiv={ndiv}, rdepth={rdepth})")]
    Divergent {
        a: f64,
        b: f64,
        ndiv: u32,
        rdepth: u32,
    },
}

/// Crate-level result alias, used at every public fallible boundary.
pub type Result<T> = core::result::Result<T, AdaptiveError>;
