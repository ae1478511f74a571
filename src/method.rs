use crate::{error::SimError, state::DofState, Ctx};

/// A forward Euler stage `u_old ↦ u_new` over `ctx.dt`, starting at `ctx.t`.
pub trait StageEvaluator {
    fn evaluate_stage(
        &mut self,
        ctx: Ctx<'_, '_>,
        old: &DofState,
    ) -> Result<(DofState, StageDiagnostics), SimError>;

    /// All-reduced `max_i 2 Σ_{j≠i} d_ij / m_i` of `u`, the inverse of the largest stable step.
    fn max_edge_cfl(&mut self, ctx: Ctx<'_, '_>, u: &DofState) -> Result<f64, SimError>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StageDiagnostics {
    pub max_entropy_residual: f64,
    pub min_low_height: f64,
    pub max_low_height: f64,
    pub min_limiter: f64,
    pub dij_small: f64,
}
