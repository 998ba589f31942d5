//! Arena-allocated interval tree.
//!
//! Each [`Interval`] node is addressed by an [`IntervalId`] handle rather
//! than a parent/child pointer graph, which keeps the borrow checker happy
//! when a node needs to read a sibling or a parent while mutating itself
//! (see [`IntervalArena::complete_process`]).

use faer::{Col, Mat};

use crate::error::{AdaptiveError, Result};
use crate::integrator::coefficients::{downdate, tables, N, NDIV_MAX};
use crate::E;

/// Handle into an [`IntervalArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntervalId(usize);

/// One node of the recursive bisection tree.
///
/// `c` accumulates one Legendre-coefficient row per depth (`0..=3`) as the
/// node refines, because a later divergence check on a `split` child needs
/// to compare against the depth-0 coefficient of its ancestor, however many
/// refines ago that was.
#[derive(Debug)]
pub struct Interval {
    pub a: E,
    pub b: E,
    pub depth: usize,
    pub samples: Vec<Option<E>>,
    pub c: Mat<E>,
    pub c_old: Col<E>,
    pub igral: Option<E>,
    pub err: E,
    pub est_err: E,
    pub tol: E,
    pub rdepth: u32,
    pub ndiv: u32,
    pub parent: Option<IntervalId>,
    pub children: Vec<IntervalId>,
    pub discard: bool,
    processed: bool,
}

impl Interval {
    fn new(a: E, b: E, depth: usize, tol: E, rdepth: u32, ndiv: u32, parent: Option<IntervalId>) -> Self {
        Interval {
            a,
            b,
            depth,
            samples: vec![None; N[depth]],
            c: Mat::zeros(4, N[3]),
            c_old: Col::zeros(N[3]),
            igral: None,
            err: E::INFINITY,
            est_err: E::INFINITY,
            tol,
            rdepth,
            ndiv,
            parent,
            children: Vec::new(),
            discard: false,
            processed: false,
        }
    }

    /// All sample slots for the current depth have been filled.
    pub fn complete(&self) -> bool {
        self.samples.iter().all(Option::is_some)
    }

    /// `complete` and the coefficient fit for this depth has actually run.
    pub fn done(&self) -> bool {
        self.complete() && self.processed
    }

    /// Abscissae for this node's current depth, in ascending order.
    pub fn points(&self) -> Vec<E> {
        points(self.a, self.b, self.depth)
    }

    /// Record a value for one of this node's abscissae, matched by exact
    /// float equality (every abscissa is deterministically recomputed from
    /// `a`, `b`, `depth`, so the same call always produces the same bits).
    pub fn set_sample(&mut self, x: E, value: E) -> bool {
        let points = self.points();
        for (slot, px) in self.samples.iter_mut().zip(points) {
            if px == x {
                *slot = Some(value);
                return true;
            }
        }
        false
    }
}

/// Abscissae of the depth-`depth` Chebyshev-Lobatto node set mapped onto
/// `[a, b]`.
pub fn points(a: E, b: E, depth: usize) -> Vec<E> {
    let t = tables();
    t.xi[depth]
        .iter()
        .map(|&xi| (a + b) / 2.0 + (b - a) * xi / 2.0)
        .collect()
}

fn zero_nans(fx: &mut [E]) -> Vec<usize> {
    let mut nans = Vec::new();
    for (i, v) in fx.iter_mut().enumerate() {
        if !v.is_finite() {
            nans.push(i);
            *v = 0.0;
        }
    }
    nans
}

fn l2norm(v: &[E]) -> E {
    v.iter().map(|x| x * x).sum::<E>().sqrt()
}

fn get_two_mut<T>(v: &mut [T], i: usize, j: usize) -> (&mut T, &mut T) {
    assert_ne!(i, j);
    if i < j {
        let (left, right) = v.split_at_mut(j);
        (&mut left[i], &mut right[0])
    } else {
        let (left, right) = v.split_at_mut(i);
        (&mut right[0], &mut left[j])
    }
}

/// Owns every [`Interval`] ever created for one [`super::IntegratorLearner`]
/// run. Nodes are never freed: a discarded node just stops being walked.
#[derive(Default, Debug)]
pub struct IntervalArena {
    nodes: Vec<Interval>,
}

impl IntervalArena {
    pub fn new() -> Self {
        IntervalArena { nodes: Vec::new() }
    }

    fn alloc(&mut self, node: Interval) -> IntervalId {
        self.nodes.push(node);
        IntervalId(self.nodes.len() - 1)
    }

    pub fn get(&self, id: IntervalId) -> &Interval {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: IntervalId) -> &mut Interval {
        &mut self.nodes[id.0]
    }

    /// Allocate the root interval covering `[a, b]`, at full depth-3
    /// resolution straight away (there is no parent to refine from).
    pub fn make_first(&mut self, a: E, b: E, tol: E) -> (IntervalId, Vec<E>) {
        let id = self.alloc(Interval::new(a, b, 3, tol, 1, 0, None));
        let pts = self.nodes[id.0].points();
        (id, pts)
    }

    /// Allocate the next-finer-depth child of `id`, covering the same
    /// domain. `id` must not already have a child.
    pub fn refine(&mut self, id: IntervalId) -> (IntervalId, Vec<E>) {
        let parent = &self.nodes[id.0];
        assert!(parent.children.is_empty(), "interval already refined");
        let (a, b, tol, rdepth, ndiv) = (parent.a, parent.b, parent.tol, parent.rdepth, parent.ndiv);
        let mut child = Interval::new(a, b, parent.depth + 1, tol, rdepth, ndiv, Some(id));
        child.c = parent.c.clone();
        child.err = parent.err;
        let child_id = self.alloc(child);
        self.nodes[id.0].children.push(child_id);
        let pts = self.nodes[child_id.0].points();
        (child_id, pts)
    }

    /// Split `id` in half, allocating two fresh depth-0 children.
    pub fn split(&mut self, id: IntervalId) -> [(IntervalId, Vec<E>); 2] {
        let parent = &self.nodes[id.0];
        assert!(parent.children.is_empty(), "interval already split/refined");
        let pts = parent.points();
        let m = pts[pts.len() / 2];
        let (a, b, tol, rdepth, ndiv) = (parent.a, parent.b, parent.tol, parent.rdepth, parent.ndiv);

        let left = Interval::new(a, m, 0, tol / 2.0_f64.sqrt(), rdepth + 1, ndiv, Some(id));
        let right = Interval::new(m, b, 0, tol / 2.0_f64.sqrt(), rdepth + 1, ndiv, Some(id));
        let left_id = self.alloc(left);
        let right_id = self.alloc(right);
        self.nodes[id.0].children.push(left_id);
        self.nodes[id.0].children.push(right_id);

        let left_pts = self.nodes[left_id.0].points();
        let right_pts = self.nodes[right_id.0].points();
        [(left_id, left_pts), (right_id, right_pts)]
    }

    fn process_make_first(&mut self, id: IntervalId) {
        let t = tables();
        let node = &mut self.nodes[id.0];
        let n3 = N[3];
        let mut fx: Vec<E> = node.samples.iter().map(|s| s.expect("incomplete interval")).collect();
        zero_nans(&mut fx);

        let fx3 = Col::<E>::from_fn(n3, |i| fx[i]);
        let c3 = &t.v_inv[3] * &fx3;
        let fx2 = Col::<E>::from_fn(N[2], |i| fx[2 * i]);
        let c2 = &t.v_inv[2] * &fx2;

        for j in 0..n3 {
            node.c[(3, j)] = c3[j];
        }
        for j in 0..N[2] {
            node.c[(2, j)] = c2[j];
        }

        let c3_vec: Vec<E> = (0..n3).map(|j| node.c[(3, j)]).collect();
        let diff: Vec<E> = (0..n3)
            .map(|j| node.c[(3, j)] - if j < N[2] { node.c[(2, j)] } else { 0.0 })
            .collect();
        let c_diff = l2norm(&diff);
        let norm_c3 = l2norm(&c3_vec);

        let (a, b) = (node.a, node.b);
        let mut err = (b - a) * c_diff;
        if norm_c3 > 0.0 && c_diff / norm_c3 > 0.1 {
            err = err.max((b - a) * norm_c3);
        }
        node.err = err;
        node.igral = Some((b - a) * node.c[(3, 0)] / 2.0_f64.sqrt());
        node.processed = true;
    }

    fn process_refine(&mut self, id: IntervalId) -> bool {
        let t = tables();
        let node = &mut self.nodes[id.0];
        let depth = node.depth;
        let n = N[depth];
        let mut fx: Vec<E> = node.samples.iter().map(|s| s.expect("incomplete interval")).collect();
        let nans = zero_nans(&mut fx);

        let fx_col = Col::<E>::from_fn(n, |i| fx[i]);
        let mut c_new: Vec<E> = {
            let c = &t.v_inv[depth] * &fx_col;
            (0..n).map(|i| c[i]).collect()
        };
        if !nans.is_empty() {
            downdate(&mut c_new, &nans, depth);
        }
        for (j, &v) in c_new.iter().enumerate() {
            node.c[(depth, j)] = v;
        }

        let n3 = N[3];
        let prev: Vec<E> = (0..n3)
            .map(|j| if j < N[depth - 1] { node.c[(depth - 1, j)] } else { 0.0 })
            .collect();
        let cur: Vec<E> = (0..n3).map(|j| if j < n { node.c[(depth, j)] } else { 0.0 }).collect();
        let diff: Vec<E> = (0..n3).map(|j| cur[j] - prev[j]).collect();
        let c_diff = l2norm(&diff);
        let nc = l2norm(&cur);

        let (a, b) = (node.a, node.b);
        node.err = (b - a) * c_diff;
        node.igral = Some((b - a) * c_new[0] / 2.0_f64.sqrt());
        node.processed = true;

        nc > 0.0 && c_diff / nc > 0.1
    }

    fn process_split(&mut self, id: IntervalId, parent_id: IntervalId) -> Result<()> {
        let t = tables();
        let depth = self.nodes[id.0].depth;
        let n = N[depth];
        let mut fx: Vec<E> = self.nodes[id.0]
            .samples
            .iter()
            .map(|s| s.expect("incomplete interval"))
            .collect();
        let nans = zero_nans(&mut fx);

        let fx_col = Col::<E>::from_fn(n, |i| fx[i]);
        let mut c_new: Vec<E> = {
            let c = &t.v_inv[depth] * &fx_col;
            (0..n).map(|i| c[i]).collect()
        };
        if !nans.is_empty() {
            downdate(&mut c_new, &nans, depth);
        }

        let (child, parent) = get_two_mut(&mut self.nodes, id.0, parent_id.0);
        for (j, &v) in c_new.iter().enumerate() {
            child.c[(depth, j)] = v;
        }

        let n3 = N[3];
        let shares_left_endpoint = child.a == parent.a;
        let transform = if shares_left_endpoint { &t.t_left } else { &t.t_right };
        let parent_row = Col::<E>::from_fn(n3, |j| parent.c[(parent.depth, j)]);
        let c_old = transform * &parent_row;

        let diff: Vec<E> = (0..n3)
            .map(|j| {
                let cj = if j < n { child.c[(depth, j)] } else { 0.0 };
                cj - c_old[j]
            })
            .collect();
        let c_diff = l2norm(&diff);

        let (a, b) = (child.a, child.b);
        child.err = (b - a) * c_diff;
        child.igral = Some((b - a) * c_new[0] / 2.0_f64.sqrt());
        child.processed = true;
        child.c_old = c_old;

        let parent_c00 = parent.c[(0, 0)];
        let child_c00 = child.c[(0, 0)];
        if parent_c00.abs() > 0.0 && (child_c00 / parent_c00).abs() > 2.0 {
            child.ndiv += 1;
        }

        if child.ndiv > NDIV_MAX && 2 * child.ndiv > child.rdepth {
            return Err(AdaptiveError::Divergent {
                a: child.a,
                b: child.b,
                ndiv: child.ndiv,
                rdepth: child.rdepth,
            });
        }
        Ok(())
    }

    /// Fit coefficients for a just-completed node, propagate its
    /// `est_err` toward the root, and report whether the node should be
    /// force-split (low-order fit unstable) or removed outright (hit
    /// machine precision).
    pub fn complete_process(&mut self, id: IntervalId) -> Result<(bool, bool)> {
        let parent_id = self.nodes[id.0].parent;
        let force_split = match parent_id {
            None => {
                self.process_make_first(id);
                false
            }
            Some(pid) => {
                let parent_rdepth = self.nodes[pid.0].rdepth;
                let my_rdepth = self.nodes[id.0].rdepth;
                if my_rdepth > parent_rdepth {
                    self.process_split(id, pid)?;
                    false
                } else {
                    self.process_refine(id)
                }
            }
        };

        if !self.nodes[id.0].est_err.is_finite() {
            self.nodes[id.0].est_err = self.nodes[id.0].err;
        }
        let mut cur = self.nodes[id.0].parent;
        while let Some(pid) = cur {
            let children_err: E = self.nodes[pid.0].children.iter().map(|c| self.nodes[c.0].est_err).sum();
            if !children_err.is_finite() {
                break;
            }
            self.nodes[pid.0].est_err = children_err;
            cur = self.nodes[pid.0].parent;
        }

        let node = &self.nodes[id.0];
        let igral_abs = node.igral.map(E::abs).unwrap_or(0.0);
        let remove = node.err < igral_abs * E::EPSILON * tables().vcond[node.depth];
        Ok((force_split && !remove, remove))
    }
}
