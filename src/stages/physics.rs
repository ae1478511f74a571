//! Pointwise relations of the hyperbolized Serre–Green–Naghdi system.
//!
//! States are `[h, hu, hv, heta, hw, hbeta]`; `heta` relaxes toward `h²`.

use crate::state::NUM_FIELDS;

pub(crate) const H: usize = 0;
pub(crate) const HU: usize = 1;
pub(crate) const HV: usize = 2;
pub(crate) const HETA: usize = 3;
pub(crate) const HW: usize = 4;
pub(crate) const HBETA: usize = 5;

pub(crate) type State = [f64; NUM_FIELDS];
pub(crate) type Flux = [[f64; 2]; NUM_FIELDS];

/// `1/h` regularized below `h_eps`, exact above.
#[inline]
pub(crate) fn inv_h(h: f64, h_eps: f64) -> f64 {
    let hm = h.max(h_eps);
    2.0 * h / (h * h + hm * hm)
}

#[inline]
pub(crate) fn velocity(u: &State, h_eps: f64) -> [f64; 2] {
    let r = inv_h(u[H], h_eps);
    [u[HU] * r, u[HV] * r]
}

#[inline]
pub(crate) fn kinetic_energy(u: &State, h_eps: f64) -> f64 {
    0.5 * (u[HU] * u[HU] + u[HV] * u[HV]) * inv_h(u[H], h_eps)
}

/// `½ g h² + ½ |q|²/h`
#[inline]
pub(crate) fn entropy(u: &State, g: f64, h_eps: f64) -> f64 {
    0.5 * g * u[H] * u[H] + kinetic_energy(u, h_eps)
}

/// Dispersive pressure `(λ/3) h (h² − heta)`, zero at rest.
///
/// It is `h ∂W/∂h − W` for the relaxation energy `W = (λ/6) h (heta/h − h)²`,
/// the potential that drives `hw` through `−λ (heta − h²)`.
#[inline]
pub(crate) fn dispersive_pressure(u: &State, lambda: f64) -> f64 {
    lambda / 3.0 * u[H] * (u[H] * u[H] - u[HETA])
}

/// Advective flux `u ⊗ v` with mass flux `q` and an isotropic momentum pressure.
pub(crate) fn flux(u: &State, v: [f64; 2], pressure: f64) -> Flux {
    let mut f = [[0.0; 2]; NUM_FIELDS];
    for (fk, uk) in f.iter_mut().zip(u) {
        *fk = [uk * v[0], uk * v[1]];
    }
    f[H] = [u[HU], u[HV]];
    f[HU][0] += pressure;
    f[HV][1] += pressure;
    f
}

#[inline]
pub(crate) fn dot(f: [f64; 2], c: [f64; 2]) -> f64 {
    f[0] * c[0] + f[1] * c[1]
}

/// Largest one-sided wave speed `|v·n| + c` of the relaxed system.
///
/// `c² = g h + (λ/3)(3h² − 2 heta)`, never taken below the hydrostatic `g h`.
#[inline]
pub(crate) fn wave_speed(u: &State, n: [f64; 2], g: f64, lambda: f64, h_eps: f64) -> f64 {
    let h = u[H].max(0.0);
    let dispersive = (lambda / 3.0 * (3.0 * h * h - 2.0 * u[HETA])).max(0.0);
    dot(velocity(u, h_eps), n).abs() + (g * h + dispersive).sqrt()
}

/// State rescaled to the reconstructed height `h_star ≤ h`.
///
/// `heta` scales quadratically so that `heta = h²` is preserved.
pub(crate) fn star(u: &State, h_star: f64, h_eps: f64) -> State {
    let ratio = h_star * inv_h(u[H], h_eps);
    let mut s = u.map(|uk| uk * ratio);
    s[H] = h_star;
    s[HETA] = u[HETA] * ratio * ratio;
    s
}

/// Hydrostatic reconstruction `max(0, h + z − max(z_i, z_j))`.
#[inline]
pub(crate) fn reconstructed_height(h: f64, z: f64, z_max: f64) -> f64 {
    (h + z - z_max).max(0.0)
}
