use std::collections::HashMap;

use faer_core::Mat;

use crate::error::SimError;

/// Node tag marking a partially reflecting wall.
pub const REFLECTING_TAG: i32 = 99;

/// Unstructured P1 triangulation with nodal bathymetry and tags.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub(crate) coords: Vec<[f64; 2]>,
    pub(crate) triangles: Vec<[usize; 3]>,
    pub(crate) bathymetry: Vec<f64>,
    pub(crate) node_tags: Vec<i32>,
}

impl Mesh {
    /// Triangles are reoriented counter-clockwise; degenerate ones are rejected.
    pub fn new(coords: Vec<[f64; 2]>, triangles: Vec<[usize; 3]>) -> Result<Self, SimError> {
        let n = coords.len();
        if n == 0 || triangles.is_empty() {
            return Err(SimError::structure("empty mesh"));
        }

        let mut oriented = Vec::with_capacity(triangles.len());
        for (k, tri) in triangles.into_iter().enumerate() {
            if tri.iter().any(|&a| a >= n) {
                return Err(SimError::structure(format!(
                    "triangle {k} references a node outside 0..{n}"
                )));
            }
            let area = signed_area(&coords, tri);
            if area.abs() <= f64::EPSILON * diameter(&coords, tri).powi(2) {
                return Err(SimError::structure(format!("triangle {k} is degenerate")));
            }
            oriented.push(if area > 0.0 { tri } else { [tri[0], tri[2], tri[1]] });
        }

        Ok(Self {
            bathymetry: vec![0.0; n],
            node_tags: vec![0; n],
            coords,
            triangles: oriented,
        })
    }

    /// Structured triangulation of `[lower, upper]` with `nx × ny` cells split along a diagonal.
    pub fn rectangle(lower: [f64; 2], upper: [f64; 2], nx: usize, ny: usize) -> Result<Self, SimError> {
        if nx == 0 || ny == 0 || upper[0] <= lower[0] || upper[1] <= lower[1] {
            return Err(SimError::structure("invalid rectangle"));
        }
        let dx = (upper[0] - lower[0]) / nx as f64;
        let dy = (upper[1] - lower[1]) / ny as f64;

        let coords = (0..=ny)
            .flat_map(|j| (0..=nx).map(move |i| [lower[0] + i as f64 * dx, lower[1] + j as f64 * dy]))
            .collect();

        let node = |i: usize, j: usize| i + j * (nx + 1);
        let mut triangles = Vec::with_capacity(2 * nx * ny);
        for j in 0..ny {
            for i in 0..nx {
                let (a, b, c, d) = (node(i, j), node(i + 1, j), node(i + 1, j + 1), node(i, j + 1));
                triangles.push([a, b, c]);
                triangles.push([a, c, d]);
            }
        }

        Self::new(coords, triangles)
    }

    pub fn with_bathymetry(mut self, z: impl Fn([f64; 2]) -> f64) -> Self {
        self.bathymetry = self.coords.iter().map(|&x| z(x)).collect();
        self
    }

    pub fn with_node_tags(mut self, tag: impl Fn([f64; 2]) -> i32) -> Self {
        self.node_tags = self.coords.iter().map(|&x| tag(x)).collect();
        self
    }

    pub fn num_nodes(&self) -> usize {
        self.coords.len()
    }

    pub fn num_triangles(&self) -> usize {
        self.triangles.len()
    }

    pub fn coords(&self) -> &[[f64; 2]] {
        &self.coords
    }

    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    pub fn bathymetry(&self) -> &[f64] {
        &self.bathymetry
    }

    pub fn node_tags(&self) -> &[i32] {
        &self.node_tags
    }

    pub fn area(&self, k: usize) -> f64 {
        signed_area(&self.coords, self.triangles[k])
    }

    pub fn volume(&self) -> f64 {
        (0..self.num_triangles()).map(|k| self.area(k)).sum()
    }

    /// Row sums of the P1 mass matrix, `|K|/3` from every triangle touching a node.
    pub fn lumped_mass(&self) -> Vec<f64> {
        let mut mass = vec![0.0; self.num_nodes()];
        for (k, tri) in self.triangles.iter().enumerate() {
            let share = self.area(k) / 3.0;
            for &a in tri {
                mass[a] += share;
            }
        }
        mass
    }

    /// Gradients of the three barycentric shape functions, one row per local node.
    pub fn shape_gradients(&self, k: usize) -> Mat<f64> {
        let [p0, p1, p2] = self.triangles[k].map(|a| self.coords[a]);
        let two_area = 2.0 * self.area(k);
        let rows = [
            [p1[1] - p2[1], p2[0] - p1[0]],
            [p2[1] - p0[1], p0[0] - p2[0]],
            [p0[1] - p1[1], p1[0] - p0[0]],
        ];
        Mat::from_fn(3, 2, |a, d| rows[a][d] / two_area)
    }

    /// Unit outward normal per node, zero on interior nodes.
    ///
    /// Normals of the exterior edges touching a node are summed with their
    /// lengths as weights before normalization, so corners get the bisector.
    pub fn boundary_normals(&self) -> Vec<[f64; 2]> {
        let mut edges: HashMap<(usize, usize), (usize, usize, u32)> = HashMap::new();
        for tri in &self.triangles {
            for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
                edges
                    .entry((a.min(b), a.max(b)))
                    .and_modify(|e| e.2 += 1)
                    .or_insert((a, b, 1));
            }
        }

        let mut normals = vec![[0.0; 2]; self.num_nodes()];
        for &(a, b, count) in edges.values() {
            if count != 1 {
                continue;
            }
            let (pa, pb) = (self.coords[a], self.coords[b]);
            // counter-clockwise triangles: the interior lies left of a → b
            let n = [pb[1] - pa[1], pa[0] - pb[0]];
            for node in [a, b] {
                normals[node][0] += n[0];
                normals[node][1] += n[1];
            }
        }

        for n in normals.iter_mut() {
            let norm = n[0].hypot(n[1]);
            if norm > 0.0 {
                *n = [n[0] / norm, n[1] / norm];
            }
        }
        normals
    }

    pub fn boundary_nodes(&self) -> Vec<usize> {
        self.boundary_normals()
            .iter()
            .enumerate()
            .filter(|(_, n)| n[0] != 0.0 || n[1] != 0.0)
            .map(|(i, _)| i)
            .collect()
    }
}

fn signed_area(coords: &[[f64; 2]], [a, b, c]: [usize; 3]) -> f64 {
    let (p0, p1, p2) = (coords[a], coords[b], coords[c]);
    0.5 * ((p1[0] - p0[0]) * (p2[1] - p0[1]) - (p2[0] - p0[0]) * (p1[1] - p0[1]))
}

fn diameter(coords: &[[f64; 2]], tri: [usize; 3]) -> f64 {
    let d = |a: usize, b: usize| {
        let (p, q) = (coords[tri[a]], coords[tri[b]]);
        (p[0] - q[0]).hypot(p[1] - q[1])
    };
    d(0, 1).max(d(1, 2)).max(d(2, 0))
}
