use super::{
    physics::{entropy, H, HETA},
    Workspace,
};
use crate::{graph::GraphOperators, Ctx};

/// Floor factor of the low-order graph viscosity.
const DIJ_SMALL_FACTOR: f64 = 1e-14;

/// Nodal entropy, graph second differences of `h` and `heta`, and `dij_small`.
pub(crate) fn run(ctx: Ctx<'_, '_>, ops: &GraphOperators, ws: &mut Workspace) {
    let g = ctx.params().gravity();
    let s = ops.sparsity();
    let mut max_c = 0.0f64;

    for (i, ui) in ws.rows.iter().enumerate() {
        ws.entropy[i] = entropy(ui, g, ctx.h_eps);

        let (mut dh, mut deta) = (0.0, 0.0);
        for ij in s.row(i) {
            let j = s.colind()[ij];
            max_c = max_c.max(ops.cx[ij].abs() + ops.cy[ij].abs());
            if j != i {
                dh += ui[H] - ws.rows[j][H];
                deta += ui[HETA] - ws.rows[j][HETA];
            }
        }
        ws.delta_sqd_h[i] = dh;
        ws.delta_sqd_heta[i] = deta;
    }

    ws.dij_small =
        DIJ_SMALL_FACTOR * (g * ctx.h0_max).sqrt() * ctx.comm.all_reduce_max(max_c);

    ctx.comm.scatter_forward(&mut ws.entropy);
    ctx.comm.scatter_forward(&mut ws.delta_sqd_h);
    ctx.comm.scatter_forward(&mut ws.delta_sqd_heta);
}
