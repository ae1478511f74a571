use super::{
    physics::{State, H, HETA, HU, HV},
    Workspace, H_MAX, H_MIN, HETA_MAX, HETA_MIN, KIN_MAX, NUM_BOUNDS,
};
use crate::{
    error::SimError,
    graph::GraphOperators,
    state::{DofState, NUM_FIELDS},
    Ctx,
};

/// Largest `θ ∈ [0, 1]` keeping `x + θ p` inside `[lo, hi]`, assuming `x` is.
fn interval(x: f64, p: f64, lo: f64, hi: f64) -> f64 {
    let theta = if p > 0.0 {
        (hi - x) / p
    } else if p < 0.0 {
        (lo - x) / p
    } else {
        1.0
    };
    theta.clamp(0.0, 1.0)
}

/// Largest `θ ∈ [0, 1]` with `|q + θ p_q|² ≤ 2 (h + θ p_h) K`.
///
/// The constraint is a concave quadratic in `θ`; its positive root is taken
/// in the cancellation-free form.
fn kinetic(low: &State, p: &State, kin_max: f64) -> f64 {
    let a = -0.5 * (p[HU] * p[HU] + p[HV] * p[HV]);
    let b = p[H] * kin_max - (low[HU] * p[HU] + low[HV] * p[HV]);
    let c = (low[H] * kin_max - 0.5 * (low[HU] * low[HU] + low[HV] * low[HV])).max(0.0);

    if a + b + c >= 0.0 {
        return 1.0;
    }
    let theta = if a == 0.0 {
        -c / b
    } else {
        let root = (b * b - 4.0 * a * c).max(0.0).sqrt();
        if b >= 0.0 {
            (b + root) / (-2.0 * a)
        } else {
            2.0 * c / (root - b)
        }
    };
    theta.clamp(0.0, 1.0)
}

fn edge_coefficient(low: &State, p: &State, bounds: &[f64; NUM_BOUNDS]) -> f64 {
    interval(low[H], p[H], bounds[H_MIN], bounds[H_MAX])
        .min(interval(low[HETA], p[HETA], bounds[HETA_MIN], bounds[HETA_MAX]))
        .min(kinetic(low, p, bounds[KIN_MAX]))
}

/// Per-DOF limiter coefficients `θ_i = min_j θ_ij`.
pub(crate) fn coefficients(
    ctx: Ctx<'_, '_>,
    ops: &GraphOperators,
    ws: &mut Workspace,
) -> Result<(), SimError> {
    let s = ops.sparsity();
    for i in 0..ops.num_dofs() {
        let low = ws.low.row(i);
        if low[H] < -ctx.h_eps {
            return Err(SimError::NegativeHeight {
                dof: i,
                value: low[H],
            });
        }

        let neighbours = s.row_len(i) - 1;
        if neighbours == 0 {
            ws.limiter[i] = 1.0;
            continue;
        }
        // U_i = Σ_j λ_i (U^L_i + θ P_ij) with λ_i = 1/neighbours
        let scale = ctx.dt * neighbours as f64 / ops.lumped[i];
        let bounds = ws.bounds.row(i);

        let mut theta = 1.0f64;
        for ij in s.row(i) {
            if s.colind()[ij] == i {
                continue;
            }
            let p = ws.fluxes[ij].map(|a| scale * a);
            theta = theta.min(edge_coefficient(&low, &p, &bounds));
        }
        ws.limiter[i] = theta;
    }

    ctx.comm.scatter_forward(&mut ws.limiter);
    Ok(())
}

/// `U_i = U^L_i + dt/m_i Σ_j min(θ_i, θ_j) A_ij`.
pub(crate) fn apply(ctx: Ctx<'_, '_>, ops: &GraphOperators, ws: &Workspace, theta: &[f64]) -> DofState {
    let s = ops.sparsity();
    let mut limited = ws.low.clone();
    for i in 0..ops.num_dofs() {
        let mut correction = [0.0; NUM_FIELDS];
        for ij in s.row(i) {
            let j = s.colind()[ij];
            if j == i {
                continue;
            }
            let l = theta[i].min(theta[j]);
            for (c, a) in correction.iter_mut().zip(ws.fluxes[ij]) {
                *c += l * a;
            }
        }
        let factor = ctx.dt / ops.lumped[i];
        let low = ws.low.row(i);
        limited.set_row(i, std::array::from_fn(|k| low[k] + factor * correction[k]));
    }
    ctx.comm.scatter_forward_state(&mut limited);
    limited
}
