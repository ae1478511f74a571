use super::{
    physics::{
        dispersive_pressure, dot, flux, kinetic_energy, reconstructed_height, star, velocity,
        wave_speed, Flux, State, H, HETA, HU, HV,
    },
    Workspace, H_MAX, H_MIN, HETA_MAX, HETA_MIN, KIN_MAX,
};
use crate::{
    graph::GraphOperators,
    problem::MassMatrix,
    state::NUM_FIELDS,
    Ctx,
};

const RELAXATION_POWER: f64 = 0.75;

/// Relaxation parameters `λ_i`, `λ_j` of the two ends of an edge.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EdgeRelaxation {
    pub i: f64,
    pub j: f64,
}

/// `max(λ_ij |c_ij|, λ_ji |c_ji|)` for the stored entry `ij`, without the floor.
pub(crate) fn edge_viscosity(
    ops: &GraphOperators,
    ij: usize,
    ui: &State,
    uj: &State,
    lambda: EdgeRelaxation,
    g: f64,
    h_eps: f64,
) -> f64 {
    let one_way = |c: [f64; 2]| {
        let norm = c[0].hypot(c[1]);
        if norm == 0.0 {
            return 0.0;
        }
        let n = [c[0] / norm, c[1] / norm];
        norm * wave_speed(ui, n, g, lambda.i, h_eps).max(wave_speed(uj, n, g, lambda.j, h_eps))
    };
    one_way([ops.cx[ij], ops.cy[ij]]).max(one_way([ops.ctx[ij], ops.cty[ij]]))
}

/// Local `max_i 2 Σ_{j≠i} d_ij / m_i`.
pub(crate) fn max_edge_cfl(
    ops: &GraphOperators,
    rows: &[State],
    relaxation: &[f64],
    g: f64,
    h_eps: f64,
) -> f64 {
    let s = ops.sparsity();
    (0..ops.num_dofs())
        .map(|i| {
            let sum: f64 = s
                .row(i)
                .filter(|&ij| s.colind()[ij] != i)
                .map(|ij| {
                    let j = s.colind()[ij];
                    let lambda = EdgeRelaxation {
                        i: relaxation[i],
                        j: relaxation[j],
                    };
                    edge_viscosity(ops, ij, &rows[i], &rows[j], lambda, g, h_eps)
                })
                .sum();
            2.0 * sum / ops.lumped[i]
        })
        .fold(0.0, f64::max)
}

/// Flux without the hydrostatic pressure.
fn transport_flux(u: &State, lambda: f64, h_eps: f64) -> Flux {
    flux(u, velocity(u, h_eps), dispersive_pressure(u, lambda))
}

/// Hydrostatically reconstructed edge term, without dissipation:
/// `−(F(U*_ij) + F(U*_ji) − 2 F(U_i))·c_ij`, plus `−½ g (h*_ji² − h*_ij²) c_ij`
/// on the momentum rows.
///
/// Summed over `j ≠ i` it is the Galerkin term `−Σ_j F(U_j)·c_ij` on a flat
/// bottom, since `Σ_j c_ij = 0`. It vanishes for a lake at rest, dry nodes included.
fn edge_transport(
    fi: &Flux,
    si: &State,
    sj: &State,
    lambda: EdgeRelaxation,
    c: [f64; 2],
    g: f64,
    h_eps: f64,
) -> State {
    let fsi = transport_flux(si, lambda.i, h_eps);
    let fsj = transport_flux(sj, lambda.j, h_eps);
    let mut t: State = std::array::from_fn(|k| {
        -dot(
            [
                fsi[k][0] + fsj[k][0] - 2.0 * fi[k][0],
                fsi[k][1] + fsj[k][1] - 2.0 * fi[k][1],
            ],
            c,
        )
    });
    let hydrostatic = 0.5 * g * (sj[H] * sj[H] - si[H] * si[H]);
    t[HU] -= hydrostatic * c[0];
    t[HV] -= hydrostatic * c[1];
    t
}

/// Edge state `W_ij = U_i + (T_ij + d_ij (U*_ji − U*_ij)) / (2 d_ij)`.
///
/// The low-order update is `(1 − Σ_j 2 dt d_ij / m_i) U_i + Σ_j (2 dt d_ij / m_i) W_ij`,
/// and `W_ij` has a non-negative height whenever `d_ij ≥ |v·c_ij|` at both ends.
fn edge_state(ui: &State, transport: &State, jump: &State, d: f64) -> State {
    std::array::from_fn(|k| ui[k] + (transport[k] + d * jump[k]) / (2.0 * d))
}

/// Low-order update, local bounds and the high-order right-hand side.
///
/// The low-order state is a convex combination of the edge states shifted by
/// the source increment, so the bounds gathered from them contain it.
pub(crate) fn run(ctx: Ctx<'_, '_>, ops: &GraphOperators, ws: &mut Workspace) {
    let params = ctx.params();
    let g = params.gravity();
    let (dt, h_eps) = (ctx.dt, ctx.h_eps);
    let s = ops.sparsity();
    let z = ctx.mesh.bathymetry();
    let volume = ctx.comm.all_reduce_sum(ops.volume());

    for i in 0..ops.num_dofs() {
        let ui = ws.rows[i];
        let mi = ops.lumped[i];
        let fi = transport_flux(&ui, ws.relaxation[i], h_eps);
        let src = ws.sources.row(i);
        let shift: State = std::array::from_fn(|k| dt / mi * src[k]);
        let anchor: State = std::array::from_fn(|k| ui[k] + shift[k]);

        let mut low_sum = [0.0; NUM_FIELDS];
        let mut high_sum = [0.0; NUM_FIELDS];
        let mut b = [
            anchor[H],
            anchor[H],
            anchor[HETA],
            anchor[HETA],
            kinetic_energy(&anchor, h_eps),
        ];
        let (mut avg_h, mut avg_heta, mut edges) = (0.0, 0.0, 0usize);

        for ij in s.row(i) {
            let j = s.colind()[ij];
            if j == i {
                continue;
            }
            let uj = ws.rows[j];
            let c = [ops.cx[ij], ops.cy[ij]];
            let lambda = EdgeRelaxation {
                i: ws.relaxation[i],
                j: ws.relaxation[j],
            };

            let dl = edge_viscosity(ops, ij, &ui, &uj, lambda, g, h_eps).max(ws.dij_small);
            let dh = dl.min(ws.entropy_residual[i].max(ws.entropy_residual[j]));

            let z_max = z[i].max(z[j]);
            let si = star(&ui, reconstructed_height(ui[H], z[i], z_max), h_eps);
            let sj = star(&uj, reconstructed_height(uj[H], z[j], z_max), h_eps);
            let jump: State = std::array::from_fn(|k| sj[k] - si[k]);
            let transport = edge_transport(&fi, &si, &sj, lambda, c, g, h_eps);
            for k in 0..NUM_FIELDS {
                low_sum[k] += transport[k] + dl * jump[k];
                high_sum[k] += transport[k] + dh * jump[k];
            }
            ws.dl[ij] = dl;
            ws.dh[ij] = dh;
            ws.jump[ij] = jump;

            // dl ≥ dij_small > 0
            let w = edge_state(&ui, &transport, &jump, dl);
            let w: State = std::array::from_fn(|k| w[k] + shift[k]);
            b[H_MIN] = b[H_MIN].min(w[H]);
            b[H_MAX] = b[H_MAX].max(w[H]);
            b[HETA_MIN] = b[HETA_MIN].min(w[HETA]);
            b[HETA_MAX] = b[HETA_MAX].max(w[HETA]);
            b[KIN_MAX] = b[KIN_MAX].max(kinetic_energy(&w, h_eps));

            avg_h += ws.delta_sqd_h[i] + ws.delta_sqd_h[j];
            avg_heta += ws.delta_sqd_heta[i] + ws.delta_sqd_heta[j];
            edges += 1;
        }

        let low: State = std::array::from_fn(|k| ui[k] + dt / mi * (low_sum[k] + src[k]));
        let rhs: State = std::array::from_fn(|k| high_sum[k] + src[k]);
        ws.low.set_row(i, low);
        ws.rhs_high.set_row(i, rhs);

        if edges > 0 {
            let r = (mi / volume).powf(RELAXATION_POWER);
            let scale = 4.0 * edges as f64;
            (b[H_MIN], b[H_MAX]) = relax(b[H_MIN], b[H_MAX], r, (avg_h / scale).abs());
            (b[HETA_MIN], b[HETA_MAX]) =
                relax(b[HETA_MIN], b[HETA_MAX], r, (avg_heta / scale).abs());
        }
        ws.bounds.set_row(i, b);
    }

    ctx.comm.scatter_forward_state(&mut ws.low);
    ctx.comm.scatter_forward_state(&mut ws.rhs_high);

    antidiffusive_fluxes(ops, params.mass_matrix(), ws);
}

/// Widens `[min, max]` by `r` relative to the bounds, but never by more than `avg`.
fn relax(min: f64, max: f64, r: f64, avg: f64) -> (f64, f64) {
    (((1.0 - r) * min).max(min - avg), ((1.0 + r) * max).min(max + avg))
}

/// `A_ij = (dH_ij − dL_ij)(U*_ji − U*_ij) − m_ij (V_j − V_i)`, antisymmetric by construction.
fn antidiffusive_fluxes(ops: &GraphOperators, mass_matrix: MassMatrix, ws: &mut Workspace) {
    let s = ops.sparsity();
    let v: Vec<State> = (0..ops.num_dofs())
        .map(|i| ws.rhs_high.row(i).map(|r| r / ops.lumped[i]))
        .collect();

    for i in 0..ops.num_dofs() {
        for ij in s.row(i) {
            let j = s.colind()[ij];
            if j == i {
                ws.fluxes[ij] = [0.0; NUM_FIELDS];
                continue;
            }
            let visc = ws.dh[ij] - ws.dl[ij];
            ws.fluxes[ij] = std::array::from_fn(|k| {
                let diffusive = visc * ws.jump[ij][k];
                match mass_matrix {
                    MassMatrix::Lumped => diffusive,
                    MassMatrix::Consistent => diffusive - ops.mass[ij] * (v[j][k] - v[i][k]),
                }
            });
        }
    }
}
