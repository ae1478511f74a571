use std::ops::Range;

use faer_core::Mat;

use crate::{error::SimError, mesh::Mesh, state::NUM_FIELDS};

/// Compressed sparse row pattern with sorted column indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sparsity {
    rowptr: Vec<usize>,
    colind: Vec<usize>,
}

impl Sparsity {
    pub fn new(rowptr: Vec<usize>, colind: Vec<usize>) -> Result<Self, SimError> {
        if rowptr.first() != Some(&0) || rowptr.last() != Some(&colind.len()) {
            return Err(SimError::structure("row pointer does not span the column indices"));
        }
        if rowptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(SimError::structure("row pointer is not monotone"));
        }
        let n = rowptr.len() - 1;
        for i in 0..n {
            let row = &colind[rowptr[i]..rowptr[i + 1]];
            if row.windows(2).any(|w| w[0] >= w[1]) || row.iter().any(|&j| j >= n) {
                return Err(SimError::structure(format!("row {i} is not sorted or out of range")));
            }
        }
        Ok(Self { rowptr, colind })
    }

    /// Node-to-node graph of a triangulation, diagonal included.
    pub fn from_mesh(mesh: &Mesh) -> Self {
        let mut rows = vec![Vec::new(); mesh.num_nodes()];
        for (i, row) in rows.iter_mut().enumerate() {
            row.push(i);
        }
        for tri in mesh.triangles() {
            for &a in tri {
                rows[a].extend_from_slice(tri);
            }
        }

        let mut rowptr = Vec::with_capacity(rows.len() + 1);
        let mut colind = Vec::new();
        rowptr.push(0);
        for mut row in rows {
            row.sort_unstable();
            row.dedup();
            colind.extend(row);
            rowptr.push(colind.len());
        }
        Self { rowptr, colind }
    }

    /// Expands every entry into a dense `block × block` block, as the
    /// assembled Jacobian of a `block`-field system is laid out.
    pub fn to_blocks(&self, block: usize) -> Self {
        let mut rowptr = Vec::with_capacity(self.num_rows() * block + 1);
        let mut colind = Vec::with_capacity(self.nnz() * block * block);
        rowptr.push(0);
        for i in 0..self.num_rows() {
            for _ in 0..block {
                for &j in &self.colind[self.row(i)] {
                    colind.extend((0..block).map(|b| block * j + b));
                }
                rowptr.push(colind.len());
            }
        }
        Self { rowptr, colind }
    }

    /// Contracts a block pattern back to one entry per block.
    ///
    /// Fails when the row count, a row length or the number of nonzeros does
    /// not factor by `block`, or when a block row is not block-aligned.
    pub fn from_blocks(blocks: &Self, block: usize) -> Result<Self, SimError> {
        let rows = blocks.num_rows();
        let nnz = blocks.nnz();
        if block == 0 || rows % block != 0 || nnz % (block * block) != 0 {
            return Err(SimError::structure(format!(
                "block sparsity ({rows} rows, {nnz} nonzeros) does not factor into {block}x{block} blocks"
            )));
        }

        let mut rowptr = Vec::with_capacity(rows / block + 1);
        let mut colind = Vec::with_capacity(nnz / (block * block));
        rowptr.push(0);
        for i in (0..rows).step_by(block) {
            let first = &blocks.colind[blocks.row(i)];
            if first.len() % block != 0 {
                return Err(SimError::structure(format!(
                    "row {i} has {} entries, not a multiple of {block}",
                    first.len()
                )));
            }
            for r in i + 1..i + block {
                if blocks.colind[blocks.row(r)].len() != first.len() {
                    return Err(SimError::structure(format!(
                        "rows {i} and {r} of the same block row differ in length"
                    )));
                }
            }
            for chunk in first.chunks(block) {
                if chunk[0] % block != 0 {
                    return Err(SimError::structure(format!(
                        "row {i} has a block starting at column {}",
                        chunk[0]
                    )));
                }
                colind.push(chunk[0] / block);
            }
            rowptr.push(colind.len());
        }
        Self::new(rowptr, colind)
    }

    pub fn num_rows(&self) -> usize {
        self.rowptr.len() - 1
    }

    pub fn nnz(&self) -> usize {
        self.colind.len()
    }

    pub fn row(&self, i: usize) -> Range<usize> {
        self.rowptr[i]..self.rowptr[i + 1]
    }

    pub fn row_len(&self, i: usize) -> usize {
        self.rowptr[i + 1] - self.rowptr[i]
    }

    pub fn rowptr(&self) -> &[usize] {
        &self.rowptr
    }

    pub fn colind(&self) -> &[usize] {
        &self.colind
    }

    /// Storage position of entry `(i, j)`.
    pub fn find(&self, i: usize, j: usize) -> Option<usize> {
        let range = self.row(i);
        self.colind[range.clone()]
            .binary_search(&j)
            .ok()
            .map(|k| range.start + k)
    }
}

/// Mass and derivative matrices of the P1 graph, stored on one sparsity.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphOperators {
    pub(crate) sparsity: Sparsity,
    pub(crate) mass: Vec<f64>,
    pub(crate) lumped: Vec<f64>,
    pub(crate) inverse_mesh: Vec<f64>,
    pub(crate) cx: Vec<f64>,
    pub(crate) cy: Vec<f64>,
    pub(crate) ctx: Vec<f64>,
    pub(crate) cty: Vec<f64>,
    pub(crate) volume: f64,
}

impl GraphOperators {
    pub fn assemble(mesh: &Mesh, sparsity: Sparsity) -> Result<Self, SimError> {
        if sparsity.num_rows() != mesh.num_nodes() {
            return Err(SimError::structure(format!(
                "graph has {} rows for {} nodes",
                sparsity.num_rows(),
                mesh.num_nodes()
            )));
        }

        let nnz = sparsity.nnz();
        let mut mass = vec![0.0; nnz];
        let mut cx = vec![0.0; nnz];
        let mut cy = vec![0.0; nnz];
        let mut ctx = vec![0.0; nnz];
        let mut cty = vec![0.0; nnz];

        for (k, tri) in mesh.triangles().iter().enumerate() {
            let area = mesh.area(k);
            let grad = mesh.shape_gradients(k);
            let mass_e = Mat::from_fn(3, 3, |a, b| if a == b { area / 6.0 } else { area / 12.0 });
            let cx_e = Mat::from_fn(3, 3, |_, b| area / 3.0 * grad.read(b, 0));
            let cy_e = Mat::from_fn(3, 3, |_, b| area / 3.0 * grad.read(b, 1));

            for a in 0..3 {
                for b in 0..3 {
                    let ij = sparsity.find(tri[a], tri[b]).ok_or_else(|| {
                        SimError::structure(format!(
                            "graph misses the coupling ({}, {}) of triangle {k}",
                            tri[a], tri[b]
                        ))
                    })?;
                    mass[ij] += mass_e.read(a, b);
                    cx[ij] += cx_e.read(a, b);
                    cy[ij] += cy_e.read(a, b);
                    ctx[ij] += cx_e.read(b, a);
                    cty[ij] += cy_e.read(b, a);
                }
            }
        }

        let lumped: Vec<f64> = (0..sparsity.num_rows())
            .map(|i| mass[sparsity.row(i)].iter().sum())
            .collect();
        if let Some(i) = lumped.iter().position(|&m| m <= 0.0) {
            return Err(SimError::structure(format!("node {i} has no positive lumped mass")));
        }
        let inverse_mesh = lumped.iter().map(|m| 1.0 / m.sqrt()).collect();

        Ok(Self {
            sparsity,
            mass,
            lumped,
            inverse_mesh,
            cx,
            cy,
            ctx,
            cty,
            volume: mesh.volume(),
        })
    }

    pub fn sparsity(&self) -> &Sparsity {
        &self.sparsity
    }

    pub fn num_dofs(&self) -> usize {
        self.lumped.len()
    }

    pub fn consistent_mass(&self) -> &[f64] {
        &self.mass
    }

    pub fn lumped_mass(&self) -> &[f64] {
        &self.lumped
    }

    pub fn inverse_mesh(&self) -> &[f64] {
        &self.inverse_mesh
    }

    pub fn cx(&self) -> &[f64] {
        &self.cx
    }

    pub fn cy(&self) -> &[f64] {
        &self.cy
    }

    pub fn ctx(&self) -> &[f64] {
        &self.ctx
    }

    pub fn cty(&self) -> &[f64] {
        &self.cty
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// `Σ_j C_ij f_j / m_i` for both directions.
    pub fn gradient(&self, f: &[f64]) -> Vec<[f64; 2]> {
        (0..self.num_dofs())
            .map(|i| {
                let mut g = [0.0; 2];
                for ij in self.sparsity.row(i) {
                    let j = self.sparsity.colind[ij];
                    g[0] += self.cx[ij] * f[j];
                    g[1] += self.cy[ij] * f[j];
                }
                [g[0] / self.lumped[i], g[1] / self.lumped[i]]
            })
            .collect()
    }
}

/// Builds the graph operators on first use; later calls return the cached value.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    operators: Option<GraphOperators>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_built(&self) -> bool {
        self.operators.is_some()
    }

    pub fn operators(&self) -> Option<&GraphOperators> {
        self.operators.as_ref()
    }

    /// `blocks` is the sparsity of the assembled six-field system.
    pub fn build(&mut self, mesh: &Mesh, blocks: &Sparsity) -> Result<&GraphOperators, SimError> {
        if self.operators.is_none() {
            let sparsity = Sparsity::from_blocks(blocks, NUM_FIELDS)?;
            let operators = GraphOperators::assemble(mesh, sparsity)?;
            tracing::event!(
                tracing::Level::DEBUG,
                "assembled graph operators: {} dofs, {} edges",
                operators.num_dofs(),
                operators.sparsity.nnz() - operators.num_dofs()
            );
            self.operators = Some(operators);
        }
        self.operators
            .as_ref()
            .ok_or_else(|| SimError::structure("graph operators unavailable"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Mesh {
        Mesh::rectangle([0.0, 0.0], [1.0, 2.0], 3, 4)
            .unwrap()
            .with_bathymetry(|[x, y]| 0.1 * x - 0.05 * y)
    }

    #[test]
    fn block_round_trip_recovers_the_graph() {
        let mesh = square();
        let graph = Sparsity::from_mesh(&mesh);
        let blocks = graph.to_blocks(NUM_FIELDS);
        assert_eq!(blocks.num_rows(), NUM_FIELDS * graph.num_rows());
        assert_eq!(blocks.nnz(), NUM_FIELDS * NUM_FIELDS * graph.nnz());
        assert_eq!(Sparsity::from_blocks(&blocks, NUM_FIELDS).unwrap(), graph);
    }

    #[test]
    fn uneven_blocks_are_rejected() {
        let graph = Sparsity::from_mesh(&square());
        assert!(matches!(
            Sparsity::from_blocks(&graph, NUM_FIELDS),
            Err(SimError::Structure(_))
        ));

        let mut blocks = graph.to_blocks(2);
        // shift the first block row by one column
        for c in blocks.colind[..blocks.rowptr[2]].iter_mut() {
            *c += 1;
        }
        assert!(Sparsity::from_blocks(&blocks, 2).is_err());
    }

    #[test]
    fn operators_satisfy_the_discrete_identities() {
        let mesh = square();
        let ops = GraphOperators::assemble(&mesh, Sparsity::from_mesh(&mesh)).unwrap();
        let s = ops.sparsity();

        let total: f64 = ops.lumped_mass().iter().sum();
        assert!((total - 2.0).abs() < 1e-12);
        assert!((ops.volume() - 2.0).abs() < 1e-12);

        for i in 0..ops.num_dofs() {
            let row = s.row(i);
            let sx: f64 = ops.cx()[row.clone()].iter().sum();
            let sy: f64 = ops.cy()[row.clone()].iter().sum();
            assert!(sx.abs() < 1e-14 && sy.abs() < 1e-14);
            assert!((ops.inverse_mesh()[i] * ops.lumped_mass()[i].sqrt() - 1.0).abs() < 1e-14);

            for ij in row {
                let j = s.colind()[ij];
                let ji = s.find(j, i).unwrap();
                assert_eq!(ops.ctx()[ij], ops.cx()[ji]);
                assert_eq!(ops.cty()[ij], ops.cy()[ji]);
                assert_eq!(ops.consistent_mass()[ij], ops.consistent_mass()[ji]);
            }
        }
    }

    #[test]
    fn gradient_is_exact_for_linear_functions() {
        let mesh = square();
        let ops = GraphOperators::assemble(&mesh, Sparsity::from_mesh(&mesh)).unwrap();
        let f: Vec<f64> = mesh.coords().iter().map(|[x, y]| 2.0 * x - 3.0 * y).collect();
        let boundary = mesh.boundary_normals();
        for (i, g) in ops.gradient(&f).iter().enumerate() {
            if boundary[i] == [0.0, 0.0] {
                assert!((g[0] - 2.0).abs() < 1e-12 && (g[1] + 3.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn second_build_is_a_no_op() {
        let mesh = square();
        let blocks = Sparsity::from_mesh(&mesh).to_blocks(NUM_FIELDS);
        let mut builder = GraphBuilder::new();
        assert!(!builder.is_built());
        let first = builder.build(&mesh, &blocks).unwrap().clone();
        let second = builder.build(&mesh, &blocks).unwrap();
        assert_eq!(&first, second);
        assert!(builder.is_built());
    }
}
