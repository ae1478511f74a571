//! Stage evaluation of the convex-limited graph scheme.
//!
//! One stage runs, in order: smoothness indicators, entropy residual,
//! sources, low-order update with bounds and high-order fluxes, limiter,
//! relaxation zones and constraint enforcement. Every transient array lives in a [`Workspace`]
//! created for that stage only.

mod bounds;
mod entropy;
mod limiter;
pub(crate) mod physics;
mod smoothness;
mod sources;

pub use sources::relaxation_weight;

use crate::{
    bc,
    error::SimError,
    graph::{GraphBuilder, GraphOperators, Sparsity},
    mesh::Mesh,
    method::{StageDiagnostics, StageEvaluator},
    state::{Buffers, DofState, Field, NUM_FIELDS},
    Ctx,
};

use physics::State;

pub(crate) const H_MIN: usize = 0;
pub(crate) const H_MAX: usize = 1;
pub(crate) const HETA_MIN: usize = 2;
pub(crate) const HETA_MAX: usize = 3;
pub(crate) const KIN_MAX: usize = 4;
pub(crate) const NUM_BOUNDS: usize = 5;

/// Per-stage buffers; nothing here outlives the stage.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub(crate) rows: Vec<State>,

    pub(crate) entropy: Vec<f64>,
    pub(crate) delta_sqd_h: Vec<f64>,
    pub(crate) delta_sqd_heta: Vec<f64>,
    pub(crate) dij_small: f64,

    pub(crate) entropy_residual: Vec<f64>,
    pub(crate) ke_tiny: f64,

    pub(crate) relaxation: Vec<f64>,
    pub(crate) sources: DofState,

    pub(crate) low: DofState,
    pub(crate) rhs_high: DofState,
    pub(crate) bounds: Buffers<NUM_BOUNDS>,

    // per stored graph entry
    pub(crate) dl: Vec<f64>,
    pub(crate) dh: Vec<f64>,
    pub(crate) jump: Vec<State>,
    pub(crate) fluxes: Vec<State>,

    pub(crate) limiter: Vec<f64>,
}

impl Workspace {
    fn new(u: &DofState, nnz: usize) -> Self {
        let n = u.len();
        Self {
            rows: u.rows(),
            entropy: vec![0.0; n],
            delta_sqd_h: vec![0.0; n],
            delta_sqd_heta: vec![0.0; n],
            dij_small: 0.0,
            entropy_residual: vec![0.0; n],
            ke_tiny: 0.0,
            relaxation: vec![0.0; n],
            sources: DofState::zeros(n),
            low: DofState::zeros(n),
            rhs_high: DofState::zeros(n),
            bounds: Buffers::zeros(n),
            dl: vec![0.0; nnz],
            dh: vec![0.0; nnz],
            jump: vec![[0.0; NUM_FIELDS]; nnz],
            fluxes: vec![[0.0; NUM_FIELDS]; nnz],
            limiter: vec![1.0; n],
        }
    }

    pub fn low_order(&self) -> &DofState {
        &self.low
    }

    /// `m_i dU_i/dt` of the unlimited high-order scheme.
    pub fn high_order_rhs(&self) -> &DofState {
        &self.rhs_high
    }

    pub fn sources(&self) -> &DofState {
        &self.sources
    }

    pub fn entropy_residual(&self) -> &[f64] {
        &self.entropy_residual
    }

    pub fn limiter_coefficients(&self) -> &[f64] {
        &self.limiter
    }

    pub fn dij_small(&self) -> f64 {
        self.dij_small
    }

    pub fn h_bounds(&self, i: usize) -> (f64, f64) {
        (self.bounds.read(i, H_MIN), self.bounds.read(i, H_MAX))
    }

    pub fn heta_bounds(&self, i: usize) -> (f64, f64) {
        (self.bounds.read(i, HETA_MIN), self.bounds.read(i, HETA_MAX))
    }

    pub fn kin_max(&self, i: usize) -> f64 {
        self.bounds.read(i, KIN_MAX)
    }

    /// Antidiffusive flux `A_ij` stored at graph position `ij`.
    pub fn antidiffusive_flux(&self, ij: usize) -> [f64; NUM_FIELDS] {
        self.fluxes[ij]
    }

    fn diagnostics(&self) -> StageDiagnostics {
        StageDiagnostics {
            max_entropy_residual: self.entropy_residual.iter().copied().fold(0.0, f64::max),
            min_low_height: self.low.min(Field::H),
            max_low_height: self.low.max(Field::H),
            min_limiter: self.limiter.iter().copied().fold(1.0, f64::min),
            dij_small: self.dij_small,
        }
    }
}

/// Graph-based low-order/high-order scheme with convex limiting.
#[derive(Debug)]
pub struct ConvexLimiting {
    builder: GraphBuilder,
    blocks: Sparsity,
}

impl ConvexLimiting {
    /// `blocks` is the sparsity of the assembled six-field system.
    pub fn new(blocks: Sparsity) -> Self {
        Self {
            builder: GraphBuilder::new(),
            blocks,
        }
    }

    /// Uses the six-field block pattern of the mesh's own node graph.
    pub fn for_mesh(mesh: &Mesh) -> Self {
        Self::new(Sparsity::from_mesh(mesh).to_blocks(NUM_FIELDS))
    }

    pub fn operators(&mut self, mesh: &Mesh) -> Result<&GraphOperators, SimError> {
        self.builder.build(mesh, &self.blocks)
    }

    pub fn is_built(&self) -> bool {
        self.builder.is_built()
    }

    /// Runs every stage up to and including the limiter coefficients.
    pub fn prepare_stage(&mut self, ctx: Ctx<'_, '_>, old: &DofState) -> Result<Workspace, SimError> {
        let ops = self.builder.build(ctx.mesh, &self.blocks)?;
        if old.len() != ops.num_dofs() {
            return Err(SimError::structure(format!(
                "state has {} dofs, graph has {}",
                old.len(),
                ops.num_dofs()
            )));
        }

        let mut ws = Workspace::new(old, ops.sparsity().nnz());
        smoothness::run(ctx, ops, &mut ws);
        entropy::run(ctx, ops, &mut ws);
        sources::run(ctx, ops, &mut ws);
        bounds::run(ctx, ops, &mut ws);
        limiter::coefficients(ctx, ops, &mut ws)?;
        Ok(ws)
    }

    /// Limited update for the given per-DOF coefficients; all zeros gives the low-order state.
    pub fn limit(&self, ctx: Ctx<'_, '_>, ws: &Workspace, theta: &[f64]) -> Result<DofState, SimError> {
        let ops = self
            .builder
            .operators()
            .ok_or_else(|| SimError::structure("graph operators are not built"))?;
        if theta.len() != ops.num_dofs() {
            return Err(SimError::structure("one limiter coefficient per dof is required"));
        }
        Ok(limiter::apply(ctx, ops, ws, theta))
    }
}

impl StageEvaluator for ConvexLimiting {
    fn evaluate_stage(
        &mut self,
        ctx: Ctx<'_, '_>,
        old: &DofState,
    ) -> Result<(DofState, StageDiagnostics), SimError> {
        if ctx.params().check_positivity {
            bc::check_positivity(old, ctx.comm)?;
        }

        let ws = self.prepare_stage(ctx, old)?;
        let mut new = self.limit(ctx, &ws, &ws.limiter)?;
        sources::relax_zones(ctx, &mut new);

        if let Some(dof) = (0..new.len()).find(|&i| new.value(i, Field::H) < -ctx.h_eps) {
            return Err(SimError::BoundViolation {
                dof,
                field: Field::H,
                value: new.value(dof, Field::H),
            });
        }

        // the stage result approximates the solution at t + dt
        for constraint in &ctx.problem.constraints {
            constraint.apply(ctx.mesh, ctx.t + ctx.dt, &mut new);
        }

        let diagnostics = ws.diagnostics();
        tracing::event!(
            tracing::Level::TRACE,
            "stage at t={:e}: max residual {:e}, low h in [{:e}, {:e}], min θ {:e}",
            ctx.t,
            diagnostics.max_entropy_residual,
            diagnostics.min_low_height,
            diagnostics.max_low_height,
            diagnostics.min_limiter
        );
        Ok((new, diagnostics))
    }

    fn max_edge_cfl(&mut self, ctx: Ctx<'_, '_>, u: &DofState) -> Result<f64, SimError> {
        let ops = self.builder.build(ctx.mesh, &self.blocks)?;
        let relaxation = sources::relaxation_coefficients(ctx, ops);
        let local = bounds::max_edge_cfl(
            ops,
            &u.rows(),
            &relaxation,
            ctx.params().gravity(),
            ctx.h_eps,
        );
        Ok(ctx.comm.all_reduce_max(local))
    }

    fn name(&self) -> &'static str {
        "convex-limited graph viscosity"
    }
}
