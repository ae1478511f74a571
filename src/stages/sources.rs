use std::f64::consts::E;

use super::{
    physics::{dot, velocity, State, H, HBETA, HETA, HU, HV, HW},
    Workspace,
};
use crate::{
    graph::GraphOperators,
    problem::{Friction, RelaxationZones},
    state::{DofState, NUM_FIELDS},
    Ctx,
};

const MANNING_GAMMA: f64 = 4.0 / 3.0;
const MANNING_XI: f64 = 10.0;

/// Zone weight `1 − (e^{ξ^3.5} − 1)/(e − 1)`: one at the outer edge, zero at the inner edge.
pub fn relaxation_weight(xi: f64) -> f64 {
    let xi = xi.clamp(0.0, 1.0);
    1.0 - (xi.powf(3.5).exp() - 1.0) / (E - 1.0)
}

/// Generation and absorption weights at abscissa `x`.
pub(crate) fn zone_weights(zones: &RelaxationZones, x: f64) -> (f64, f64) {
    let generation = zones
        .generation()
        .filter(|z| z.start <= x && x <= z.end())
        .map_or(0.0, |z| relaxation_weight((x - z.start) / z.length));
    let absorption = zones
        .absorption()
        .filter(|z| z.start <= x && x <= z.end())
        .map_or(0.0, |z| relaxation_weight((z.end() - x) / z.length));
    (generation, absorption)
}

/// Momentum friction source, already multiplied by the lumped mass.
///
/// The Manning law is semi-implicit in `dt`, so a forward Euler step cannot
/// reverse the flow.
pub(crate) fn friction(law: Friction, u: &State, g: f64, dt: f64, m: f64, h_eps: f64) -> [f64; 2] {
    match law {
        Friction::None => [0.0; 2],
        Friction::Linear { coefficient } => {
            [-g * coefficient * u[HU] * m, -g * coefficient * u[HV] * m]
        }
        Friction::Manning { n } => {
            let v = velocity(u, h_eps);
            let speed = dot(v, v).sqrt();
            if speed == 0.0 {
                return [0.0; 2];
            }
            let h_gamma = u[H].max(h_eps).powf(MANNING_GAMMA);
            let gn2 = g * n * n;
            let aux = 2.0 * gn2 * speed * m / (h_gamma + h_gamma.max(MANNING_XI * gn2 * dt * speed));
            [-aux * u[HU], -aux * u[HV]]
        }
    }
}

/// Relaxation sources of `heta`, `hw` and `hbeta`, multiplied by the lumped mass.
pub(crate) fn dispersion(u: &State, lambda: f64, grad_z: [f64; 2], m: f64, h_eps: f64) -> [f64; 3] {
    let h = u[H];
    let slope = h * dot(velocity(u, h_eps), grad_z);
    [
        m * u[HW],
        -m * lambda * (u[HETA] - h * h),
        -m * lambda.sqrt() * (u[HBETA] - slope),
    ]
}

/// Relaxation parameter `λ_i = α g / sqrt(m_i)` of every dof.
pub(crate) fn relaxation_coefficients(ctx: Ctx<'_, '_>, ops: &GraphOperators) -> Vec<f64> {
    let params = ctx.params();
    let scale = params.dispersion() * params.gravity();
    ops.inverse_mesh.iter().map(|inv| scale * inv).collect()
}

/// Evaluates friction and dispersion and fills the per-DOF source vector.
pub(crate) fn run(ctx: Ctx<'_, '_>, ops: &GraphOperators, ws: &mut Workspace) {
    let params = ctx.params();
    let g = params.gravity();
    let alpha = params.dispersion();
    let z = ctx.mesh.bathymetry();

    let grad_z = if alpha > 0.0 {
        ops.gradient(z)
    } else {
        vec![[0.0; 2]; ops.num_dofs()]
    };
    ws.relaxation = relaxation_coefficients(ctx, ops);

    for (i, u) in ws.rows.iter().enumerate() {
        let m = ops.lumped[i];

        let mut s = [0.0; NUM_FIELDS];
        let [fx, fy] = friction(params.friction(), u, g, ctx.dt, m, ctx.h_eps);
        s[HU] += fx;
        s[HV] += fy;

        if alpha > 0.0 {
            let [heta, hw, hbeta] = dispersion(u, ws.relaxation[i], grad_z[i], m, ctx.h_eps);
            s[HETA] += heta;
            s[HW] += hw;
            s[HBETA] += hbeta;
        }

        ws.sources.set_row(i, s);
    }
}

/// Blends a stage result toward the incident waves and the still water state.
///
/// The blend `(1 − w) U + w U_target` is applied at the stage's end time
/// `t + dt`, so a positive height stays positive.
pub(crate) fn relax_zones(ctx: Ctx<'_, '_>, u: &mut DofState) {
    let params = ctx.params();
    let zones = params.zones();
    if !zones.is_active() {
        return;
    }
    let z = ctx.mesh.bathymetry();
    let coords = ctx.mesh.coords();
    let time = ctx.t + ctx.dt;

    for i in 0..u.len() {
        let (w_gen, w_abs) = zone_weights(zones, coords[i][0]);
        let mut row = u.row(i);
        if w_gen > 0.0 {
            if let Some(wave) = ctx.problem.wave_state(coords[i], time) {
                row = blend(&row, &wave, w_gen);
            }
        }
        if w_abs > 0.0 {
            let h_rest = (params.still_water_level() - z[i]).max(0.0);
            let mut rest = [0.0; NUM_FIELDS];
            rest[H] = h_rest;
            rest[HETA] = h_rest * h_rest;
            row = blend(&row, &rest, w_abs);
        }
        u.set_row(i, row);
    }
}

#[inline]
fn blend(u: &State, target: &State, w: f64) -> State {
    std::array::from_fn(|k| (1.0 - w) * u[k] + w * target[k])
}
