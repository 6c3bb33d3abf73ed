use crate::geometry::{Point3, Vector3};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use tracing::debug;

/// Triangle surface mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolyData {
	pub points: Vec<Point3>,
	pub triangles: Vec<[usize; 3]>,
	/// Per-point texture coordinates, when the mesh carries a texture.
	pub texture_coords: Option<Vec<[f32; 2]>>,
}

impl PolyData {
	pub fn is_empty(&self) -> bool {
		self.triangles.is_empty()
	}

	/// Axis-aligned bounds as `(min, max)`.
	pub fn bounds(&self) -> Option<(Point3, Point3)> {
		let first = *self.points.first()?;
		Some(
			self.points
				.iter()
				.fold((first, first), |(lo, hi), p| (lo.inf(p), hi.sup(p))),
		)
	}

	pub fn surface_area(&self) -> f64 {
		self.triangles
			.iter()
			.map(|&[a, b, c]| triangle_normal(self.points[a], self.points[b], self.points[c]))
			.map(|n| n.norm() / 2.0)
			.sum()
	}

	/// Count of edges used by exactly one triangle. Zero for a closed surface.
	pub fn boundary_edge_count(&self) -> usize {
		let mut edges = std::collections::HashMap::<(usize, usize), usize>::new();
		for &[a, b, c] in &self.triangles {
			for (u, v) in [(a, b), (b, c), (c, a)] {
				*edges.entry((u.min(v), u.max(v))).or_default() += 1;
			}
		}
		edges.values().filter(|&&count| count == 1).count()
	}

	/// Applies `f` to every point.
	pub fn map_points(&mut self, f: impl Fn(Point3) -> Point3) {
		for point in &mut self.points {
			*point = f(*point);
		}
	}
}

/// Unnormalised normal, twice the triangle area in length.
pub fn triangle_normal(a: Point3, b: Point3, c: Point3) -> Vector3 {
	(b - a).cross(&(c - a))
}

#[derive(Debug, Clone, Copy)]
struct Collapse {
	length: f64,
	a: usize,
	b: usize,
	version_a: u32,
	version_b: u32,
}

impl PartialEq for Collapse {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == Ordering::Equal
	}
}

impl Eq for Collapse {}

impl PartialOrd for Collapse {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Collapse {
	fn cmp(&self, other: &Self) -> Ordering {
		self.length
			.total_cmp(&other.length)
			.then(self.a.cmp(&other.a))
			.then(self.b.cmp(&other.b))
	}
}

struct Decimator {
	points: Vec<Point3>,
	triangles: Vec<[usize; 3]>,
	triangle_alive: Vec<bool>,
	point_alive: Vec<bool>,
	point_triangles: Vec<Vec<usize>>,
	versions: Vec<u32>,
	heap: BinaryHeap<Reverse<Collapse>>,
	alive: usize,
}

impl Decimator {
	fn new(mesh: &PolyData) -> Self {
		let mut point_triangles = vec![Vec::new(); mesh.points.len()];
		for (t, triangle) in mesh.triangles.iter().enumerate() {
			for &v in triangle {
				point_triangles[v].push(t);
			}
		}

		let mut decimator = Self {
			points: mesh.points.clone(),
			triangles: mesh.triangles.clone(),
			triangle_alive: vec![true; mesh.triangles.len()],
			point_alive: vec![true; mesh.points.len()],
			point_triangles,
			versions: vec![0; mesh.points.len()],
			heap: BinaryHeap::new(),
			alive: mesh.triangles.len(),
		};
		for t in 0..decimator.triangles.len() {
			let [a, b, c] = decimator.triangles[t];
			for (u, v) in [(a, b), (b, c), (c, a)] {
				if u < v {
					decimator.push_edge(u, v);
				} else {
					decimator.push_edge(v, u);
				}
			}
		}
		decimator
	}

	fn push_edge(&mut self, a: usize, b: usize) {
		self.heap.push(Reverse(Collapse {
			length: nalgebra::distance(&self.points[a], &self.points[b]),
			a,
			b,
			version_a: self.versions[a],
			version_b: self.versions[b],
		}));
	}

	fn live_triangles(&self, v: usize) -> Vec<usize> {
		self.point_triangles[v]
			.iter()
			.copied()
			.filter(|&t| self.triangle_alive[t])
			.collect()
	}

	fn neighbours(&self, v: usize, triangles: &[usize]) -> HashSet<usize> {
		triangles
			.iter()
			.flat_map(|&t| self.triangles[t])
			.filter(|&u| u != v)
			.collect()
	}

	fn is_stale(&self, collapse: &Collapse) -> bool {
		!self.point_alive[collapse.a]
			|| !self.point_alive[collapse.b]
			|| self.versions[collapse.a] != collapse.version_a
			|| self.versions[collapse.b] != collapse.version_b
	}

	/// Collapses `b` into `a` at the edge midpoint if the result stays manifold
	/// and no surviving triangle flips.
	fn try_collapse(&mut self, a: usize, b: usize) -> bool {
		let triangles_a = self.live_triangles(a);
		let triangles_b = self.live_triangles(b);
		let shared: Vec<usize> = triangles_a
			.iter()
			.copied()
			.filter(|t| triangles_b.contains(t))
			.collect();
		if shared.is_empty() {
			return false;
		}

		let neighbours_a = self.neighbours(a, &triangles_a);
		let neighbours_b = self.neighbours(b, &triangles_b);
		let common = neighbours_a
			.iter()
			.filter(|&&v| v != b && neighbours_b.contains(&v))
			.count();
		if common != shared.len() {
			return false;
		}

		let midpoint = nalgebra::center(&self.points[a], &self.points[b]);
		let moved = |v: usize, points: &[Point3]| {
			if v == a || v == b {
				midpoint
			} else {
				points[v]
			}
		};
		for &t in triangles_a.iter().chain(&triangles_b) {
			if shared.contains(&t) {
				continue;
			}
			let [p, q, r] = self.triangles[t];
			let before = triangle_normal(self.points[p], self.points[q], self.points[r]);
			let after = triangle_normal(
				moved(p, &self.points),
				moved(q, &self.points),
				moved(r, &self.points),
			);
			if before.dot(&after) <= 0.0 || after.norm() < 1e-12 {
				return false;
			}
		}

		self.points[a] = midpoint;
		for &t in &shared {
			self.triangle_alive[t] = false;
			self.alive -= 1;
		}
		for &t in &triangles_b {
			if shared.contains(&t) {
				continue;
			}
			for v in &mut self.triangles[t] {
				if *v == b {
					*v = a;
				}
			}
			self.point_triangles[a].push(t);
		}
		self.point_alive[b] = false;
		self.versions[a] += 1;
		self.versions[b] += 1;

		let live = self.live_triangles(a);
		let neighbours = self.neighbours(a, &live);
		self.point_triangles[a] = live;
		for n in neighbours {
			if a < n {
				self.push_edge(a, n);
			} else {
				self.push_edge(n, a);
			}
		}
		true
	}

	fn run(&mut self, target: usize) {
		while self.alive > target {
			let Some(Reverse(collapse)) = self.heap.pop() else {
				break;
			};
			if self.is_stale(&collapse) {
				continue;
			}
			self.try_collapse(collapse.a, collapse.b);
		}
	}

	fn finish(self) -> PolyData {
		let mut remap = vec![usize::MAX; self.points.len()];
		let mut points = Vec::new();
		let mut triangles = Vec::with_capacity(self.alive);
		for (t, triangle) in self.triangles.iter().enumerate() {
			if !self.triangle_alive[t] {
				continue;
			}
			let mapped = triangle.map(|v| {
				if remap[v] == usize::MAX {
					remap[v] = points.len();
					points.push(self.points[v]);
				}
				remap[v]
			});
			triangles.push(mapped);
		}
		PolyData {
			points,
			triangles,
			texture_coords: None,
		}
	}
}

/// Reduces the triangle count by `target_reduction` (0 keeps the mesh, 0.9
/// removes about 90 % of the triangles) with shortest-edge collapses.
///
/// Collapses that would make the surface non-manifold or flip a triangle are
/// skipped, so the requested reduction is an upper bound. Non-finite
/// reductions are treated as 0.
pub fn decimate(mesh: &PolyData, target_reduction: f64) -> PolyData {
	if !target_reduction.is_finite() {
		return mesh.clone();
	}
	let reduction = target_reduction.clamp(0.0, 0.99);
	if reduction <= 0.0 || mesh.triangles.is_empty() {
		return mesh.clone();
	}

	let total = mesh.triangles.len();
	let target = ((1.0 - reduction) * total as f64).ceil() as usize;
	let mut decimator = Decimator::new(mesh);
	decimator.run(target);
	let decimated = decimator.finish();
	debug!(
		triangles.before = total,
		triangles.after = decimated.triangles.len(),
		"Decimated mesh"
	);
	decimated
}
