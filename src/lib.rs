//! Adaptive sampling engines for expensive black-box functions.
//!
//! The caller drives a learner by alternating [`Learner::ask`] and
//! [`Learner::tell`]: `ask` hands out candidate input points (plus a
//! loss-improvement estimate per point), and `tell` supplies the computed
//! value once it is available. Calls may interleave arbitrarily — a caller
//! may dispense many points before any value comes back, simulating an
//! asynchronous evaluator.
//!
//! Two learners are provided:
//!
//! - [`integrator::IntegratorLearner`]: recursive Clenshaw-Curtis quadrature
//!   on a 1-D interval.
//! - [`triangulation::TriangulatingLearner`]: online Delaunay-style
//!   triangulation in `ℝⁿ`.
//!
//! Evaluating the user's function, plotting, and persistence are all the
//! caller's responsibility; this crate only decides *where* to sample next.

pub mod error;
pub mod geometry;
pub mod integrator;
pub mod triangulation;

pub use error::{AdaptiveError, Result};

/// Floating-point element type used throughout the crate.
///
/// The spec's non-goals exclude arbitrary-precision arithmetic, so this is a
/// fixed alias rather than a generic `ComplexField` bound.
pub type E = f64;

/// The shared learner contract that both sampling engines implement.
///
/// `done` is deliberately not part of the trait: the integrator has an
/// intrinsic stopping rule, but the triangulator leaves the stopping
/// decision to the caller (it only exposes [`Learner::loss`]).
pub trait Learner {
    /// A single candidate input point.
    type Point;
    /// The value supplied via [`Learner::tell`].
    type Value;

    /// Request up to `n` candidate points, each paired with an estimate of
    /// how much evaluating it would improve the reported loss.
    ///
    /// Fallible because the integrator may discover, while completing an
    /// interval whose points were all already known, that the integrand
    /// looks divergent.
    fn ask(&mut self, n: usize) -> Result<(Vec<Self::Point>, Vec<E>)>;

    /// Supply the computed value for a point previously returned by `ask`.
    fn tell(&mut self, point: Self::Point, value: Self::Value) -> Result<()>;

    /// Current scalar "how badly resolved" estimate. Smaller is better.
    fn loss(&self) -> E;

    /// Drop all pending (dispensed-but-not-told) state so the caller can
    /// restart sampling from scratch without losing already-told data.
    fn remove_unfinished(&mut self);
}
