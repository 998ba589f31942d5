//! A minimal incremental Delaunay-style triangulation.
//!
//! [`Triangulation`] covers exactly the two situations
//! [`crate::triangulation::TriangulatingLearner`] needs:
//!
//! - bootstrapping a convex region from the `2^n` corners of an axis-aligned
//!   box ([`Triangulation::from_box`]), using the classical Kuhn
//!   (path/staircase) decomposition of a hypercube into `n!` simplices of
//!   equal volume — no incremental insertion needed for this step, since the
//!   decomposition is exact by construction;
//! - subdividing one simplex at a time as new interior points arrive
//!   ([`Triangulation::add_point`]), via the Bowyer-Watson cavity
//!   algorithm restricted to interior insertion (every point this crate
//!   ever inserts is the midpoint of an edge of an existing simplex, so it
//!   is always already inside the hull — hull extension is never needed).
//!
//! Vertices are addressed by an arena index rather than by coordinate value
//! so that a [`Simplex`] can be a plain sorted `Vec<usize>`, directly usable
//! as a hash-map key.

use std::collections::{HashMap, HashSet};

use crate::E;

/// A simplex is `ndim + 1` vertex indices, always kept sorted so that two
/// references to "the same" simplex compare and hash equal.
pub type Simplex = Vec<usize>;

fn point_key(p: &[E]) -> Vec<u64> {
    p.iter().map(|x| x.to_bits()).collect()
}

fn permutations(n: usize) -> Vec<Vec<usize>> {
    fn go(items: &mut Vec<usize>, k: usize, out: &mut Vec<Vec<usize>>) {
        if k == items.len() {
            out.push(items.clone());
            return;
        }
        for i in k..items.len() {
            items.swap(k, i);
            go(items, k + 1, out);
            items.swap(k, i);
        }
    }
    let mut items: Vec<usize> = (0..n).collect();
    let mut out = Vec::new();
    go(&mut items, 0, &mut out);
    out
}

fn factorial(n: usize) -> E {
    (1..=n).fold(1.0, |acc, k| acc * k as E)
}

/// Determinant of a square matrix via Gaussian elimination with partial
/// pivoting. Used only for small (`ndim <= ~8`) geometric predicates.
fn det(a: &[Vec<E>]) -> E {
    let n = a.len();
    let mut m: Vec<Vec<E>> = a.to_vec();
    let mut sign = 1.0;
    for col in 0..n {
        let mut pivot = col;
        let mut best = m[col][col].abs();
        for row in (col + 1)..n {
            if m[row][col].abs() > best {
                best = m[row][col].abs();
                pivot = row;
            }
        }
        if best < 1e-300 {
            return 0.0;
        }
        if pivot != col {
            m.swap(col, pivot);
            sign = -sign;
        }
        for row in (col + 1)..n {
            let factor = m[row][col] / m[col][col];
            if factor != 0.0 {
                for j in col..n {
                    m[row][j] -= factor * m[col][j];
                }
            }
        }
    }
    m.iter().enumerate().map(|(i, row)| row[i]).fold(sign, |acc, d| acc * d)
}

fn edge_vectors(pts: &[Vec<E>]) -> Vec<Vec<E>> {
    let last = pts.last().unwrap();
    pts[..pts.len() - 1]
        .iter()
        .map(|p| p.iter().zip(last).map(|(a, b)| a - b).collect())
        .collect()
}

/// Unsigned `ndim`-volume of a simplex given as `ndim + 1` point coordinates.
pub fn volume(pts: &[Vec<E>]) -> E {
    let dim = pts.len() - 1;
    det(&edge_vectors(pts)).abs() / factorial(dim)
}

fn orientation_sign(pts: &[Vec<E>]) -> E {
    det(&edge_vectors(pts)).signum()
}

/// `true` if `q` lies strictly inside the circumsphere of the simplex
/// `pts`, using the standard lifted-paraboloid in-sphere determinant.
fn insphere(pts: &[Vec<E>], q: &[E]) -> bool {
    let rows: Vec<Vec<E>> = pts
        .iter()
        .chain(std::iter::once(&q.to_vec()))
        .map(|p| {
            let sq: E = p.iter().map(|x| x * x).sum();
            let mut row = p.clone();
            row.push(sq);
            row.push(1.0);
            row
        })
        .collect();
    det(&rows) * orientation_sign(pts) > 1e-12
}

/// Barycentric coordinates of `p` with respect to `pts`, or `None` if the
/// simplex is degenerate.
fn barycentric(pts: &[Vec<E>], p: &[E]) -> Option<Vec<E>> {
    let dim = pts.len() - 1;
    let last = pts.last().unwrap();
    let cols = edge_vectors(pts); // dim vectors, each length dim
    let rhs: Vec<E> = p.iter().zip(last).map(|(a, b)| a - b).collect();

    let a: Vec<Vec<E>> = (0..dim).map(|row| (0..dim).map(|col| cols[col][row]).collect()).collect();
    let denom = det(&a);
    if denom.abs() < 1e-14 {
        return None;
    }
    let mut lambdas = Vec::with_capacity(dim + 1);
    for col in 0..dim {
        let mut a_sub = a.clone();
        for row in 0..dim {
            a_sub[row][col] = rhs[row];
        }
        lambdas.push(det(&a_sub) / denom);
    }
    let last_lambda = 1.0 - lambdas.iter().sum::<E>();
    lambdas.push(last_lambda);
    Some(lambdas)
}

fn facets_of(simplex: &[usize]) -> Vec<Simplex> {
    (0..simplex.len())
        .map(|skip| {
            let mut f: Simplex = simplex.iter().enumerate().filter(|&(i, _)| i != skip).map(|(_, &v)| v).collect();
            f.sort_unstable();
            f
        })
        .collect()
}

fn canonical(mut simplex: Simplex) -> Simplex {
    simplex.sort_unstable();
    simplex
}

/// An incremental triangulation over a fixed arena of points.
#[derive(Debug, Clone)]
pub struct Triangulation {
    points: Vec<Vec<E>>,
    index: HashMap<Vec<u64>, usize>,
    simplices: HashSet<Simplex>,
    vertex_to_simplices: HashMap<usize, HashSet<Simplex>>,
}

impl Triangulation {
    fn empty() -> Self {
        Triangulation { points: Vec::new(), index: HashMap::new(), simplices: HashSet::new(), vertex_to_simplices: HashMap::new() }
    }

    fn intern(&mut self, p: Vec<E>) -> usize {
        let key = point_key(&p);
        if let Some(&i) = self.index.get(&key) {
            return i;
        }
        let i = self.points.len();
        self.index.insert(key, i);
        self.points.push(p);
        i
    }

    fn insert_simplex(&mut self, s: Simplex) {
        for &v in &s {
            self.vertex_to_simplices.entry(v).or_default().insert(s.clone());
        }
        self.simplices.insert(s);
    }

    fn remove_simplex(&mut self, s: &Simplex) {
        for &v in s {
            if let Some(set) = self.vertex_to_simplices.get_mut(&v) {
                set.remove(s);
            }
        }
        self.simplices.remove(s);
    }

    /// Build a triangulation with a single simplex spanning `vertices`
    /// (`vertices.len()` coordinate vectors, all of the same dimension).
    pub fn from_simplex(vertices: Vec<Vec<E>>) -> Self {
        let mut tri = Triangulation::empty();
        let ids: Simplex = vertices.into_iter().map(|p| tri.intern(p)).collect();
        tri.insert_simplex(canonical(ids));
        tri
    }

    /// Build the full Kuhn (path) decomposition of the axis-aligned box
    /// `bounds` (one `(lo, hi)` pair per dimension) into `ndim!` simplices.
    pub fn from_box(bounds: &[(E, E)]) -> Self {
        let ndim = bounds.len();
        let mut tri = Triangulation::empty();

        let corner_count = 1usize << ndim;
        let mut corner_ids = vec![0usize; corner_count];
        for bits in 0..corner_count {
            let coords: Vec<E> = (0..ndim).map(|axis| if bits & (1 << axis) != 0 { bounds[axis].1 } else { bounds[axis].0 }).collect();
            corner_ids[bits] = tri.intern(coords);
        }

        for perm in permutations(ndim) {
            let mut bits = 0usize;
            let mut simplex = vec![corner_ids[bits]];
            for axis in perm {
                bits |= 1 << axis;
                simplex.push(corner_ids[bits]);
            }
            tri.insert_simplex(canonical(simplex));
        }
        tri
    }

    /// Whether `p` is already a vertex of this triangulation.
    pub fn has_point(&self, p: &[E]) -> bool {
        self.index.contains_key(&point_key(p))
    }

    /// Insert `p`, assumed to lie inside the current hull, via a
    /// Bowyer-Watson cavity re-triangulation. Returns the simplices removed
    /// and the simplices added.
    ///
    /// `p` must not already be a vertex: re-interning an existing point
    /// would mark every simplex that touches it as part of the cavity and
    /// then re-add a boundary face with that same vertex appended, producing
    /// a simplex with a duplicated vertex. Callers must check
    /// [`Triangulation::has_point`] first.
    pub fn add_point(&mut self, p: Vec<E>) -> (HashSet<Simplex>, HashSet<Simplex>) {
        debug_assert!(!self.has_point(&p), "point is already a vertex of this triangulation");
        let p_idx = self.intern(p.clone());

        let bad: HashSet<Simplex> = self
            .simplices
            .iter()
            .filter(|s| {
                let pts = self.get_vertices(s);
                insphere(&pts, &p) || self.point_in_simplex(&p, s)
            })
            .cloned()
            .collect();

        let mut face_count: HashMap<Simplex, usize> = HashMap::new();
        for s in &bad {
            for f in facets_of(s) {
                *face_count.entry(f).or_insert(0) += 1;
            }
        }
        let boundary: Vec<Simplex> = face_count.into_iter().filter(|&(_, c)| c == 1).map(|(f, _)| f).collect();

        for s in &bad {
            self.remove_simplex(s);
        }

        let mut to_add = HashSet::new();
        for face in boundary {
            let mut s = face;
            s.push(p_idx);
            let s = canonical(s);
            self.insert_simplex(s.clone());
            to_add.insert(s);
        }

        (bad, to_add)
    }

    /// The simplex containing `p`, if any.
    pub fn locate_point(&self, p: &[E]) -> Option<Simplex> {
        self.simplices.iter().find(|s| self.point_in_simplex(p, s)).cloned()
    }

    /// Whether `p` lies within `simplex` (within a small tolerance).
    pub fn point_in_simplex(&self, p: &[E], simplex: &[usize]) -> bool {
        let pts = self.get_vertices(simplex);
        match barycentric(&pts, p) {
            Some(lambdas) => lambdas.iter().all(|&l| l >= -1e-9 && l <= 1.0 + 1e-9),
            None => false,
        }
    }

    /// Coordinates of each vertex of `simplex`, in the given order.
    pub fn get_vertices(&self, simplex: &[usize]) -> Vec<Vec<E>> {
        simplex.iter().map(|&i| self.points[i].clone()).collect()
    }

    /// All simplices currently touching vertex `v`.
    pub fn vertex_to_simplices(&self, v: usize) -> HashSet<Simplex> {
        self.vertex_to_simplices.get(&v).cloned().unwrap_or_default()
    }

    /// Volume of a single simplex.
    pub fn volume_of(&self, simplex: &[usize]) -> E {
        volume(&self.get_vertices(simplex))
    }

    /// Volumes of every simplex currently in the triangulation.
    pub fn volumes(&self) -> Vec<E> {
        self.simplices.iter().map(|s| self.volume_of(s)).collect()
    }

    /// A snapshot of every simplex currently in the triangulation.
    pub fn simplices(&self) -> Vec<Simplex> {
        self.simplices.iter().cloned().collect()
    }

    /// Whether `simplex` (as a *set* of vertices) is still present.
    pub fn simplex_exists(&self, simplex: &[usize]) -> bool {
        self.simplices.contains(&canonical(simplex.to_vec()))
    }

    /// Every vertex index currently referenced by some simplex.
    pub fn vertices(&self) -> HashSet<usize> {
        self.simplices.iter().flatten().copied().collect()
    }

    pub fn point(&self, i: usize) -> &[E] {
        &self.points[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kuhn_decomposition_covers_the_box_volume() {
        let bounds = [(0.0, 2.0), (0.0, 3.0)];
        let tri = Triangulation::from_box(&bounds);
        assert_eq!(tri.simplices().len(), 2); // 2! = 2 triangles
        let total: E = tri.volumes().iter().sum();
        assert!((total - 6.0).abs() < 1e-9);
    }

    #[test]
    fn adding_a_midpoint_splits_the_containing_simplex() {
        let bounds = [(0.0, 1.0), (0.0, 1.0)];
        let mut tri = Triangulation::from_box(&bounds);
        let before: E = tri.volumes().iter().sum();

        let simplex = tri.locate_point(&[0.5, 0.4]).unwrap();
        let verts = tri.get_vertices(&simplex);
        let mid: Vec<E> = (0..2).map(|d| (verts[0][d] + verts[1][d]) / 2.0).collect();

        let (to_delete, to_add) = tri.add_point(mid);
        assert!(!to_delete.is_empty());
        assert!(!to_add.is_empty());

        let after: E = tri.volumes().iter().sum();
        assert!((before - after).abs() < 1e-9);
    }

    #[test]
    fn point_in_simplex_matches_barycentric_bounds() {
        let tri = Triangulation::from_simplex(vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]]);
        let simplex = tri.simplices().into_iter().next().unwrap();
        assert!(tri.point_in_simplex(&[0.2, 0.2], &simplex));
        assert!(!tri.point_in_simplex(&[2.0, 2.0], &simplex));
    }
}
