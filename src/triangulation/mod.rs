//! Online Delaunay-style triangulation over a box in `ℝⁿ`.
//!
//! [`TriangulatingLearner`] maintains a [`crate::geometry::Triangulation`]
//! of every point it has been told, and a per-simplex loss. `ask` always
//! samples the `2^n` corners of the bounding box first (so the first
//! triangulation is exact, not approximate), then repeatedly bisects the
//! longest edge of whichever simplex — real or still-pending — carries the
//! highest loss.

pub mod loss;

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use crate::error::{AdaptiveError, Result};
use crate::geometry::{Simplex, Triangulation};
use crate::triangulation::loss::{LossFunction, StdLoss};
use crate::{Learner, E};

fn point_key(p: &[E]) -> Vec<u64> {
    p.iter().map(|x| x.to_bits()).collect()
}

fn corner_points(bounds: &[(E, E)]) -> Vec<Vec<E>> {
    let ndim = bounds.len();
    (0..1usize << ndim)
        .map(|bits| (0..ndim).map(|axis| if bits & (1 << axis) != 0 { bounds[axis].1 } else { bounds[axis].0 }).collect())
        .collect()
}

/// Midpoint of the longest edge of `pts`, measured after scaling each axis
/// by `scale` (so an anisotropic box doesn't bias the choice toward its
/// longer axis).
fn choose_point_in_simplex(pts: &[Vec<E>], scale: &[E]) -> Vec<E> {
    let scaled: Vec<Vec<E>> = pts.iter().map(|p| p.iter().zip(scale).map(|(x, s)| x * s).collect()).collect();

    let mut best = (0usize, 1usize, -1.0);
    for i in 0..scaled.len() {
        for j in (i + 1)..scaled.len() {
            let d: E = scaled[i].iter().zip(&scaled[j]).map(|(a, b)| (a - b) * (a - b)).sum::<E>().sqrt();
            if d > best.2 {
                best = (i, j, d);
            }
        }
    }
    let (i, j, _) = best;
    pts[i].iter().zip(&pts[j]).map(|(a, b)| (a + b) / 2.0).collect()
}

#[derive(Debug, Clone)]
struct HeapItem {
    loss: E,
    simplex: Simplex,
}
impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.loss == other.loss
    }
}
impl Eq for HeapItem {}
impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.loss.partial_cmp(&other.loss).unwrap_or(Ordering::Equal)
    }
}

#[derive(Debug, Clone)]
struct PendingItem {
    loss: E,
    real: Simplex,
    pending: Simplex,
}
impl PartialEq for PendingItem {
    fn eq(&self, other: &Self) -> bool {
        self.loss == other.loss
    }
}
impl Eq for PendingItem {}
impl PartialOrd for PendingItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PendingItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.loss.partial_cmp(&other.loss).unwrap_or(Ordering::Equal)
    }
}

/// Builder for a [`TriangulatingLearner`].
pub struct TriangulatorConfig {
    bounds: Vec<(E, E)>,
    loss_fn: Box<dyn LossFunction>,
    seed: u64,
}

impl TriangulatorConfig {
    /// One `(lo, hi)` pair per dimension; at least two dimensions.
    pub fn new(bounds: Vec<(E, E)>) -> Self {
        TriangulatorConfig { bounds, loss_fn: Box::new(StdLoss), seed: 1 }
    }

    /// Override the default [`StdLoss`].
    pub fn loss_fn(mut self, loss_fn: Box<dyn LossFunction>) -> Self {
        self.loss_fn = loss_fn;
        self
    }

    /// Seed for the interior-point fallback sampler. Fixed by default so
    /// identical `ask`/`tell` sequences reproduce bit-identical state.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(self) -> Result<TriangulatingLearner> {
        if self.bounds.len() < 2 {
            return Err(AdaptiveError::InsufficientDimensions);
        }
        for (axis, &(lo, hi)) in self.bounds.iter().enumerate() {
            if hi <= lo {
                return Err(AdaptiveError::InvalidBounds { axis, lo, hi });
            }
        }
        Ok(TriangulatingLearner::new(self.bounds, self.loss_fn, self.seed))
    }
}

/// Online triangulation learner for `f: ℝⁿ → ℝ`.
pub struct TriangulatingLearner {
    bounds: Vec<(E, E)>,
    scale: Vec<E>,
    bounds_points: Vec<Vec<E>>,
    data: HashMap<Vec<u64>, (Vec<E>, E)>,
    pending: HashSet<Vec<u64>>,
    tri: Option<Triangulation>,
    losses: HashMap<Simplex, E>,
    pending_to_simplex: HashMap<Vec<u64>, Simplex>,
    subtriangulations: HashMap<Simplex, Triangulation>,
    loss_fn: Box<dyn LossFunction>,
    rng: StdRng,
}

impl std::fmt::Debug for TriangulatingLearner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriangulatingLearner")
            .field("bounds", &self.bounds)
            .field("scale", &self.scale)
            .field("bounds_points", &self.bounds_points)
            .field("data", &self.data)
            .field("pending", &self.pending)
            .field("tri", &self.tri)
            .field("losses", &self.losses)
            .field("pending_to_simplex", &self.pending_to_simplex)
            .field("subtriangulations", &self.subtriangulations)
            .field("loss_fn", &"<dyn LossFunction>")
            .field("rng", &self.rng)
            .finish()
    }
}

impl TriangulatingLearner {
    fn new(bounds: Vec<(E, E)>, loss_fn: Box<dyn LossFunction>, seed: u64) -> Self {
        let scale: Vec<E> = bounds.iter().map(|&(lo, hi)| 1.0 / (hi - lo)).collect();
        let bounds_points = corner_points(&bounds);
        TriangulatingLearner {
            bounds,
            scale,
            bounds_points,
            data: HashMap::new(),
            pending: HashSet::new(),
            tri: None,
            losses: HashMap::new(),
            pending_to_simplex: HashMap::new(),
            subtriangulations: HashMap::new(),
            loss_fn,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Number of points with a known value.
    pub fn npoints(&self) -> usize {
        self.data.len()
    }

    fn bounds_are_done(&self) -> bool {
        self.bounds_points.iter().all(|p| self.data.contains_key(&point_key(p)))
    }

    fn ensure_tri(&mut self) {
        if self.tri.is_some() || self.data.len() < 2 {
            return;
        }
        if !self.bounds_are_done() {
            return;
        }
        self.tri = Some(Triangulation::from_box(&self.bounds));
        let to_add: HashSet<Simplex> = self.tri.as_ref().unwrap().simplices().into_iter().collect();
        self.update_losses(HashSet::new(), to_add);
    }

    fn update_losses(&mut self, to_delete: HashSet<Simplex>, to_add: HashSet<Simplex>) {
        if self.tri.is_none() {
            return;
        }

        let mut pending_unbound: HashMap<Vec<u64>, Vec<E>> = HashMap::new();
        for simplex in &to_delete {
            self.losses.remove(simplex);
            if let Some(subtri) = self.subtriangulations.remove(simplex) {
                for v in subtri.vertices() {
                    let coords = subtri.point(v).to_vec();
                    pending_unbound.insert(point_key(&coords), coords);
                }
            }
        }
        pending_unbound.retain(|k, _| !self.data.contains_key(k));

        for simplex in &to_add {
            let verts = self.tri.as_ref().unwrap().get_vertices(simplex);
            let values: Vec<E> = verts.iter().map(|v| self.data[&point_key(v)].1).collect();
            let loss_val = self.loss_fn.loss(&verts, &values);
            self.losses.insert(simplex.clone(), loss_val);

            for (key, coords) in &pending_unbound {
                if self.tri.as_ref().unwrap().point_in_simplex(coords, simplex) {
                    self.subtriangulations.entry(simplex.clone()).or_insert_with(|| Triangulation::from_simplex(verts.clone()));
                    self.subtriangulations.get_mut(simplex).unwrap().add_point(coords.clone());
                    self.pending_to_simplex.insert(key.clone(), simplex.clone());
                }
            }
        }
    }

    fn tell_pending(&mut self, point: Vec<E>, simplex_hint: Option<Simplex>) {
        let key = point_key(&point);
        self.pending.insert(key);

        let Some(tri) = self.tri.as_ref() else { return };
        let simplex = match simplex_hint.or_else(|| tri.locate_point(&point)) {
            Some(s) if !s.is_empty() => s,
            _ => return,
        };

        let mut neighbours: HashSet<Simplex> = HashSet::new();
        for &v in &simplex {
            neighbours.extend(tri.vertex_to_simplices(v));
        }

        for simpl in neighbours {
            if self.tri.as_ref().unwrap().point_in_simplex(&point, &simpl) {
                let verts = self.tri.as_ref().unwrap().get_vertices(&simpl);
                self.subtriangulations.entry(simpl.clone()).or_insert_with(|| Triangulation::from_simplex(verts));
                self.subtriangulations.get_mut(&simpl).unwrap().add_point(point.clone());
            }
        }
    }

    fn random_point(&mut self) -> Vec<E> {
        self.bounds.iter().map(|&(lo, hi)| self.rng.random_range(lo..hi)).collect()
    }

    fn ask_one(&mut self) -> (Vec<E>, E) {
        if !self.bounds_are_done() {
            let key_of = |p: &Vec<E>| point_key(p);
            if let Some(p) = self.bounds_points.iter().find(|p| !self.data.contains_key(&key_of(p)) && !self.pending.contains(&key_of(p))).cloned() {
                self.tell_pending(p.clone(), None);
                return (p, E::INFINITY);
            }
        }

        self.ensure_tri();
        if self.tri.is_none() {
            return (self.random_point(), E::INFINITY);
        }

        let mut heap: BinaryHeap<HeapItem> = self.losses.iter().map(|(s, &l)| HeapItem { loss: l, simplex: s.clone() }).collect();
        if heap.is_empty() {
            return (self.random_point(), E::INFINITY);
        }

        let mut pending_heap: BinaryHeap<PendingItem> = BinaryHeap::new();
        loop {
            let (loss, simplex) = match heap.pop() {
                Some(top) => {
                    if let Some(subtri) = self.subtriangulations.get(&top.simplex) {
                        let vol = self.tri.as_ref().unwrap().volume_of(&top.simplex);
                        let loss_density = if vol > 0.0 { top.loss / vol } else { 0.0 };
                        for pend_simplex in subtri.simplices() {
                            let pend_loss = subtri.volume_of(&pend_simplex) * loss_density;
                            pending_heap.push(PendingItem { loss: pend_loss, real: top.simplex.clone(), pending: pend_simplex });
                        }
                        continue;
                    }
                    (top.loss, top.simplex)
                }
                None => (0.0, Vec::new()),
            };

            let mut points = if simplex.is_empty() { Vec::new() } else { self.tri.as_ref().unwrap().get_vertices(&simplex) };
            let mut loss_abs = loss.abs();
            let mut chosen_simplex = simplex;

            if let Some(top_pending) = pending_heap.peek() {
                if top_pending.loss.abs() > loss_abs {
                    let top_pending = pending_heap.pop().unwrap();
                    let subtri = &self.subtriangulations[&top_pending.real];
                    points = subtri.get_vertices(&top_pending.pending);
                    chosen_simplex = top_pending.real;
                    loss_abs = top_pending.loss.abs();
                }
            }

            let new_point = choose_point_in_simplex(&points, &self.scale);
            self.pending_to_simplex.insert(point_key(&new_point), chosen_simplex.clone());
            self.tell_pending(new_point.clone(), Some(chosen_simplex));
            return (new_point, loss_abs);
        }
    }

    fn record(&mut self, point: Vec<E>, value: E) {
        let key = point_key(&point);
        if self.data.contains_key(&key) {
            return;
        }
        self.pending.remove(&key);
        self.data.insert(key.clone(), (point.clone(), value));

        self.ensure_tri();
        let Some(mut tri) = self.tri.take() else { return };

        // `ensure_tri` may have just bootstrapped the box triangulation
        // from the corner set, which already contains `point` as a vertex
        // when this `tell` is the one completing that set.
        if tri.has_point(&point) {
            self.tri = Some(tri);
            return;
        }

        let (to_delete, to_add) = tri.add_point(point);
        self.tri = Some(tri);
        self.update_losses(to_delete, to_add);
    }
}

impl Learner for TriangulatingLearner {
    type Point = Vec<E>;
    type Value = E;

    fn ask(&mut self, n: usize) -> Result<(Vec<Vec<E>>, Vec<E>)> {
        let mut points = Vec::with_capacity(n);
        let mut losses = Vec::with_capacity(n);
        for _ in 0..n {
            let (p, l) = self.ask_one();
            points.push(p);
            losses.push(l);
        }
        Ok((points, losses))
    }

    fn tell(&mut self, point: Vec<E>, value: E) -> Result<()> {
        self.record(point, value);
        Ok(())
    }

    fn loss(&self) -> E {
        if self.losses.is_empty() {
            E::INFINITY
        } else {
            self.losses.values().copied().fold(E::NEG_INFINITY, E::max)
        }
    }

    fn remove_unfinished(&mut self) {
        self.pending.clear();
        self.subtriangulations.clear();
        self.pending_to_simplex.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triangulation::loss::UniformLoss;

    fn drive<F: Fn(&[E]) -> E>(mut learner: TriangulatingLearner, f: F, budget: usize) -> TriangulatingLearner {
        for _ in 0..budget {
            let (points, _) = learner.ask(4).unwrap();
            for p in points {
                let v = f(&p);
                learner.tell(p, v).unwrap();
            }
        }
        learner
    }

    #[test]
    fn samples_corners_first() {
        let mut learner = TriangulatorConfig::new(vec![(0.0, 1.0), (0.0, 1.0)]).build().unwrap();
        let (points, losses) = learner.ask(4).unwrap();
        assert_eq!(points.len(), 4);
        assert!(losses.iter().all(|l| l.is_infinite()));

        let corners: HashSet<Vec<u64>> = corner_points(&learner.bounds).iter().map(|p| point_key(p)).collect();
        for p in &points {
            assert!(corners.contains(&point_key(p)));
        }
    }

    #[test]
    fn builds_a_triangulation_after_corners_are_told() {
        let learner = TriangulatorConfig::new(vec![(0.0, 1.0), (0.0, 1.0)]).build().unwrap();
        let learner = drive(learner, |p| p[0] + p[1], 20);
        assert!(learner.npoints() >= 4);
        assert!(learner.tri.is_some());
        assert!(learner.loss().is_finite());
    }

    #[test]
    fn rejects_one_dimensional_bounds() {
        let err = TriangulatorConfig::new(vec![(0.0, 1.0)]).build().unwrap_err();
        assert_eq!(err, AdaptiveError::InsufficientDimensions);
    }

    #[test]
    fn rejects_inverted_bounds() {
        let err = TriangulatorConfig::new(vec![(0.0, 1.0), (1.0, 1.0)]).build().unwrap_err();
        assert!(matches!(err, AdaptiveError::InvalidBounds { .. }));
    }

    #[rstest_reuse::template]
    #[rstest::rstest]
    #[case::std_loss(Box::new(StdLoss))]
    #[case::uniform_loss(Box::new(UniformLoss))]
    fn any_loss_function(#[case] loss_fn: Box<dyn LossFunction>) {}

    #[rstest_reuse::apply(any_loss_function)]
    fn loss_shrinks_as_the_saddle_is_refined(loss_fn: Box<dyn LossFunction>) {
        let learner = TriangulatorConfig::new(vec![(0.0, 1.0), (0.0, 1.0)])
            .loss_fn(loss_fn)
            .build()
            .unwrap();
        let before = learner.loss();
        let learner = drive(learner, |p| p[0] * p[0] - p[1] * p[1], 30);
        assert!(learner.loss() < before);
        assert!(learner.loss().is_finite());
    }
}
