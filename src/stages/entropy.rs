use super::{
    physics::{dot, kinetic_energy, velocity, H, HU, HV},
    Workspace,
};
use crate::{graph::GraphOperators, Ctx};

/// Entropy-viscosity residual `R_i`, in units of a graph viscosity.
///
/// Requires the nodal entropy of [`super::smoothness::run`].
pub(crate) fn run(ctx: Ctx<'_, '_>, ops: &GraphOperators, ws: &mut Workspace) {
    let g = ctx.params().gravity();
    let h_eps = ctx.h_eps;
    let s = ops.sparsity();

    let local_kin = ws
        .rows
        .iter()
        .map(|u| kinetic_energy(u, h_eps))
        .fold(0.0, f64::max);
    ws.ke_tiny = h_eps * ctx.comm.all_reduce_max(local_kin);
    let floor = 0.5 * g * h_eps * h_eps;

    for (i, ui) in ws.rows.iter().enumerate() {
        let vi = velocity(ui, h_eps);
        // entropy variables
        let w = [g * ui[H] - 0.5 * dot(vi, vi), vi[0], vi[1]];

        let mut entropy_flux = 0.0;
        let mut mass_flux = 0.0;
        let mut momentum_flux = [0.0; 2];
        let (mut e_min, mut e_max) = (ws.entropy[i], ws.entropy[i]);

        for ij in s.row(i) {
            let j = s.colind()[ij];
            let uj = &ws.rows[j];
            let c = [ops.cx[ij], ops.cy[ij]];
            let vj = velocity(uj, h_eps);
            let vc = dot(vj, c);
            let pressure = 0.5 * g * uj[H] * uj[H];

            entropy_flux += (ws.entropy[j] + pressure) * vc;
            mass_flux += uj[HU] * c[0] + uj[HV] * c[1];
            momentum_flux[0] += uj[HU] * vc + pressure * c[0];
            momentum_flux[1] += uj[HV] * vc + pressure * c[1];

            e_min = e_min.min(ws.entropy[j]);
            e_max = e_max.max(ws.entropy[j]);
        }

        let residual =
            (entropy_flux - w[0] * mass_flux - w[1] * momentum_flux[0] - w[2] * momentum_flux[1]).abs();
        ws.entropy_residual[i] = residual / (e_max - e_min).max(ws.ke_tiny).max(floor);
    }

    ctx.comm.scatter_forward(&mut ws.entropy_residual);
}
