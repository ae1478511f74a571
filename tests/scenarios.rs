//! End-to-end scenarios for the convex-limited dispersive shallow water stepper.
//!
//! These tests verify:
//! - Lake at rest (well-balanced property), flat, over a bump and around an island
//! - Dam break positivity, wet/dry fronts and conservation of mass and momentum
//! - Limiter reductions to the low-order update
//! - Configuration and structural failures

use std::cell::RefCell;

use sgn_convex::{
    bc::ConstrainedDofs, graph::Sparsity, ConvexLimiting, Ctx, DofState, Field, Friction, Mesh,
    Parameters, Problem, Serial, SimError, Simulation,
};

const G: f64 = 9.81;

fn rest(h: f64) -> [f64; 6] {
    [h, 0.0, 0.0, h * h, 0.0, 0.0]
}

/// Square cells of width 0.1 on `[-2, 2] × [0, 0.4]`.
fn channel() -> Mesh {
    Mesh::rectangle([-2.0, 0.0], [2.0, 0.4], 40, 4).unwrap()
}

fn dam_break(params: Parameters) -> Problem<'static> {
    Problem::new("dam break", params, |x: [f64; 2], _: f64| {
        rest(if x[0] < 0.0 { 2.0 } else { 1.0 })
    })
}

fn initial_state(mesh: &Mesh, u0: impl Fn([f64; 2], f64) -> [f64; 6]) -> DofState {
    let z = mesh.bathymetry();
    let x = mesh.coords();
    DofState::from_fn(mesh.num_nodes(), |i| u0(x[i], z[i]))
}

fn ctx<'a, 'pb>(mesh: &'a Mesh, problem: &'a Problem<'pb>, h0_max: f64, dt: f64) -> Ctx<'a, 'pb> {
    Ctx {
        mesh,
        problem,
        comm: &Serial,
        t: 0.0,
        dt,
        h0_max,
        h_eps: 1e-5 * h0_max,
    }
}

/// Test lake-at-rest over a flat bottom: the state must not move.
#[test]
fn test_flat_lake_at_rest() {
    let mesh = Mesh::rectangle([0.0, 0.0], [1.0, 1.0], 8, 8).unwrap();
    let problem = Problem::new("lake", Parameters::default(), |_: [f64; 2], _: f64| rest(1.0));
    let mut sim = Simulation::new(problem, mesh).unwrap();
    let initial = sim.state().clone();

    for _ in 0..5 {
        sim.step().unwrap();
    }

    let drift = sim.state().max_abs_diff(&initial);
    assert!(drift < 1e-10, "lake at rest drifted by {drift:e}");
}

/// Test lake-at-rest over a Gaussian bump: the free surface stays flat.
#[test]
fn test_lake_at_rest_over_bathymetry() {
    let level = 1.0;
    let mesh = Mesh::rectangle([0.0, 0.0], [2.0, 1.0], 16, 8)
        .unwrap()
        .with_bathymetry(|x| 0.4 * (-10.0 * ((x[0] - 1.0).powi(2) + (x[1] - 0.5).powi(2))).exp());
    let problem = Problem::new(
        "lake over bump",
        Parameters::default().with_still_water_level(level),
        move |_: [f64; 2], z: f64| rest((level - z).max(0.0)),
    );
    let mut sim = Simulation::new(problem, mesh).unwrap();
    let initial = sim.state().clone();

    for _ in 0..5 {
        sim.step().unwrap();
    }

    let drift = sim.state().max_abs_diff(&initial);
    assert!(drift < 1e-10, "lake at rest drifted by {drift:e}");
}

/// Test lake-at-rest around an emerged island: dry nodes and the shoreline stay still.
#[test]
fn test_lake_at_rest_around_an_island() {
    let level = 1.0;
    for order in 1..=3 {
        let mesh = Mesh::rectangle([0.0, 0.0], [2.0, 1.0], 20, 10)
            .unwrap()
            .with_bathymetry(|x| {
                1.5 * (-10.0 * ((x[0] - 1.0).powi(2) + (x[1] - 0.5).powi(2))).exp()
            });
        let params = Parameters::default()
            .with_dispersion(0.0)
            .with_time_order(order)
            .with_still_water_level(level);
        let problem = Problem::new("island", params, move |_: [f64; 2], z: f64| {
            rest((level - z).max(0.0))
        });
        let mut sim = Simulation::new(problem, mesh).unwrap();
        assert!(sim.state().min(Field::H) == 0.0, "the island must emerge");
        let initial = sim.state().clone();

        for _ in 0..5 {
            let report = sim.step().unwrap();
            assert!(report.min_h >= 0.0);
        }

        let drift = sim.state().max_abs_diff(&initial);
        assert!(drift < 1e-10, "SSP{order}: island lake drifted by {drift:e}");
        assert!(sim.total(Field::Hu).abs() < 1e-12 && sim.total(Field::Hv).abs() < 1e-12);
    }
}

#[test]
fn test_dam_break_stays_positive_and_bounded() {
    let params = Parameters::default().with_reflecting_boundaries(true);
    let mut sim = Simulation::new(dam_break(params), channel()).unwrap();

    sim.run_until(0.2).unwrap();

    assert!((sim.time() - 0.2).abs() < 1e-12);
    let h_eps = sim.h_eps();
    let speed_bound = 2.0 * (2.0 * G).sqrt();
    for i in 0..sim.mesh().num_nodes() {
        let h = sim.state().value(i, Field::H);
        assert!(h >= -h_eps, "negative height {h:e} at {i}");
        assert!(h <= 2.0 + 1e-2, "height {h} above the initial maximum at {i}");
        assert!(sim.state().value(i, Field::Hu).abs() <= speed_bound);
    }
}

/// Test the relaxed dispersive system on a default-dispersion dam break.
#[test]
fn test_dispersive_dam_break_stays_bounded() {
    let params = Parameters::default().with_reflecting_boundaries(true);
    let problem = Problem::new("dispersive dam break", params, |x: [f64; 2], _: f64| {
        rest(if x[0] < 0.0 { 1.0 } else { 0.5 })
    });
    let mut sim = Simulation::new(problem, channel()).unwrap();

    sim.run_until(0.15).unwrap();

    let speed_bound = 2.0 * G.sqrt();
    for i in 0..sim.mesh().num_nodes() {
        let h = sim.state().value(i, Field::H);
        assert!((0.4..=1.1).contains(&h), "height {h} out of range at {i}");
        assert!(sim.state().value(i, Field::Hu).abs() <= speed_bound);
        assert!(sim.state().value(i, Field::Heta).is_finite());
    }
}

/// Test a dam break onto a dry bed: heights stay non-negative and the front advances.
#[test]
fn test_dry_bed_dam_break() {
    let params = Parameters::default()
        .with_dispersion(0.0)
        .with_reflecting_boundaries(true);
    let problem = Problem::new("dry bed", params, |x: [f64; 2], _: f64| {
        rest(if x[0] < 0.0 { 1.0 } else { 0.0 })
    });
    let mut sim = Simulation::new(problem, channel()).unwrap();
    let initial_mass = sim.total(Field::H);

    while sim.time() < 0.1 - 1e-12 {
        let report = sim.step().unwrap();
        assert!(report.min_h >= -sim.h_eps(), "negative height at step {}", report.step);
    }

    let error = (sim.total(Field::H) - initial_mass).abs() / initial_mass;
    assert!(error < 1e-12, "mass error {error:e}");
    let x = sim.mesh().coords();
    let wet_ahead = (0..x.len())
        .filter(|&i| x[i][0] >= 0.25)
        .map(|i| sim.state().value(i, Field::H))
        .fold(0.0, f64::max);
    assert!(wet_ahead > 1e-3, "the front did not advance: {wet_ahead:e}");
}

/// Test momentum conservation of a moving hump far from the open boundary.
#[test]
fn test_momentum_conservation() {
    let mesh = Mesh::rectangle([-2.0, -2.0], [2.0, 2.0], 40, 40).unwrap();
    let problem = Problem::new("moving hump", Parameters::default(), |x: [f64; 2], _: f64| {
        let bump = 0.2 * (-16.0 * ((x[0] + 0.3).powi(2) + (x[1] - 0.2).powi(2))).exp();
        let h = 1.0 + bump;
        [h, 2.0 * bump, -bump, h * h, 0.0, 0.0]
    });
    let mut sim = Simulation::new(problem, mesh).unwrap();
    let initial = [sim.total(Field::Hu), sim.total(Field::Hv)];
    assert!(initial[0].abs() > 1e-3);

    for _ in 0..5 {
        let report = sim.step().unwrap();
        for (now, then) in report.momentum.iter().zip(initial) {
            let error = (now - then).abs() / initial[0].abs();
            assert!(error < 1e-10, "momentum error {error:e} at step {}", report.step);
        }
    }
}

/// Test mass conservation with reflecting walls on square cells.
#[test]
fn test_mass_conservation() {
    let params = Parameters::default().with_reflecting_boundaries(true);
    let mut sim = Simulation::new(dam_break(params), channel()).unwrap();
    let initial_mass = sim.total(Field::H);

    for _ in 0..20 {
        let report = sim.step().unwrap();
        let error = (report.mass - initial_mass).abs() / initial_mass;
        assert!(error < 1e-12, "mass error {error:e} at step {}", report.step);
    }
}

#[test]
fn test_time_step_growth_is_bounded() {
    let params = Parameters::default().with_reflecting_boundaries(true);
    let mut sim = Simulation::new(dam_break(params), channel()).unwrap();

    let mut previous = sim.step().unwrap().dt;
    for _ in 0..10 {
        let dt = sim.step().unwrap().dt;
        assert!(dt > 0.0);
        assert!(dt <= 2.0 * previous * (1.0 + 1e-14));
        previous = dt;
    }
}

#[test]
fn test_zero_limiter_gives_the_low_order_update() {
    let mesh = channel();
    let problem = dam_break(Parameters::default());
    let u = initial_state(&mesh, |x: [f64; 2], _: f64| {
        rest(if x[0] < 0.0 { 2.0 } else { 1.0 })
    });
    let mut method = ConvexLimiting::for_mesh(&mesh);
    let ctx = ctx(&mesh, &problem, 2.0, 1e-3);

    let ws = method.prepare_stage(ctx, &u).unwrap();
    let limited = method.limit(ctx, &ws, &vec![0.0; u.len()]).unwrap();

    assert_eq!(limited.max_abs_diff(ws.low_order()), 0.0);
}

#[test]
fn test_limited_state_respects_the_local_bounds() {
    let mesh = channel();
    let problem = dam_break(Parameters::default());
    let u = initial_state(&mesh, |x: [f64; 2], _: f64| {
        let h = if x[0] < 0.0 { 2.0 } else { 1.0 };
        let hu = if x[0].abs() < 0.5 { 0.3 * h } else { 0.0 };
        [h, hu, 0.0, h * h, 0.0, 0.0]
    });
    let mut method = ConvexLimiting::for_mesh(&mesh);
    let ctx = ctx(&mesh, &problem, 2.0, 5e-4);

    let ws = method.prepare_stage(ctx, &u).unwrap();
    let limited = method.limit(ctx, &ws, ws.limiter_coefficients()).unwrap();

    assert!(ws.limiter_coefficients().iter().all(|&l| (0.0..=1.0).contains(&l)));
    for i in 0..u.len() {
        let [h, hu, hv, heta] =
            [Field::H, Field::Hu, Field::Hv, Field::Heta].map(|f| limited.value(i, f));
        let (h_min, h_max) = ws.h_bounds(i);
        let (heta_min, heta_max) = ws.heta_bounds(i);
        assert!(h >= h_min - 1e-12 && h <= h_max + 1e-12, "h out of bounds at {i}");
        assert!(heta >= heta_min - 1e-12 && heta <= heta_max + 1e-12, "heta out of bounds at {i}");
        if h >= ctx.h_eps {
            let ke = 0.5 * (hu * hu + hv * hv) / h;
            assert!(ke <= ws.kin_max(i) * (1.0 + 1e-10) + 1e-14, "kinetic energy above bound at {i}");
        }
    }
}

/// Zero friction coefficients and zero-length zones must not perturb the right-hand side.
#[test]
fn test_inactive_sources_are_exact_no_ops() {
    let mesh = channel();
    let u0 = |x: [f64; 2], _: f64| {
        let h = 1.0 + 0.1 * (3.0 * x[0]).sin();
        [h, 0.3 * h, -0.1 * h, h * h, 0.01, 0.0]
    };
    let plain = Problem::new("plain", Parameters::default().with_friction(Friction::None), u0);
    let inert = Problem::new(
        "inert",
        Parameters::default()
            .with_friction(Friction::Manning { n: 0.0 })
            .with_generation_zone(-2.0, 0.0)
            .with_absorption_zone(2.0, 0.0),
        u0,
    );
    let u = initial_state(&mesh, u0);

    let mut method = ConvexLimiting::for_mesh(&mesh);
    let a = method.prepare_stage(ctx(&mesh, &plain, 1.1, 1e-3), &u).unwrap();
    let b = method.prepare_stage(ctx(&mesh, &inert, 1.1, 1e-3), &u).unwrap();

    assert_eq!(a.sources().max_abs_diff(b.sources()), 0.0);
    assert_eq!(a.high_order_rhs().max_abs_diff(b.high_order_rhs()), 0.0);
    assert_eq!(a.low_order().max_abs_diff(b.low_order()), 0.0);
}

#[test]
fn test_manning_friction_opposes_the_flow() {
    let mesh = channel();
    let u0 = |_: [f64; 2], _: f64| [1.0, 0.5, -0.2, 1.0, 0.0, 0.0];
    let problem = Problem::new(
        "rough",
        Parameters::default()
            .with_dispersion(0.0)
            .with_friction(Friction::Manning { n: 0.03 }),
        u0,
    );
    let u = initial_state(&mesh, u0);

    let mut method = ConvexLimiting::for_mesh(&mesh);
    let ws = method.prepare_stage(ctx(&mesh, &problem, 1.0, 1e-3), &u).unwrap();

    for i in 0..u.len() {
        assert!(ws.sources().value(i, Field::Hu) < 0.0);
        assert!(ws.sources().value(i, Field::Hv) > 0.0);
        assert_eq!(ws.sources().value(i, Field::H), 0.0);
    }
}

#[test]
fn test_antidiffusive_fluxes_are_antisymmetric() {
    let mesh = channel();
    let problem = dam_break(Parameters::default());
    let u = initial_state(&mesh, |x: [f64; 2], _: f64| {
        let h = 1.0 + 0.2 * (4.0 * x[0]).sin();
        [h, 0.1 * h, 0.05, h * h, 0.01, 0.0]
    });
    let mut method = ConvexLimiting::for_mesh(&mesh);
    let ws = method.prepare_stage(ctx(&mesh, &problem, 1.2, 1e-3), &u).unwrap();
    let s = method.operators(&mesh).unwrap().sparsity().clone();

    for i in 0..u.len() {
        for ij in s.row(i) {
            let j = s.colind()[ij];
            let ji = s.find(j, i).unwrap();
            let (a, b) = (ws.antidiffusive_flux(ij), ws.antidiffusive_flux(ji));
            for k in 0..a.len() {
                assert!((a[k] + b[k]).abs() < 1e-12, "A_ij + A_ji = {:e}", a[k] + b[k]);
            }
        }
    }
}

/// Stage results are constrained at the end time of their forward Euler step.
#[test]
fn test_constraints_see_the_stage_end_time() {
    let seen = RefCell::new(Vec::new());
    let recorder = ConstrainedDofs::new(
        |x: [f64; 2]| x[0] < -1.95 && x[1] < 0.05,
        |_: [f64; 2], t: f64, _: [f64; 6]| {
            seen.borrow_mut().push(t);
            [None; 6]
        },
    );
    let params = Parameters::default()
        .with_time_order(2)
        .with_reflecting_boundaries(true);
    let problem = dam_break(params).with_constraint(recorder);
    let mut sim = Simulation::new(problem, channel()).unwrap();
    assert_eq!(seen.borrow().as_slice(), &[0.0]);

    let dt = sim.step().unwrap().dt;
    drop(sim);

    // stage one, stage two starting at t + dt, then the accepted step
    assert_eq!(seen.into_inner(), vec![0.0, dt, dt + dt, dt]);
}

#[test]
fn test_graph_build_is_idempotent() {
    let mesh = channel();
    let mut method = ConvexLimiting::for_mesh(&mesh);
    assert!(!method.is_built());

    let first = method.operators(&mesh).unwrap().clone();
    let second = method.operators(&mesh).unwrap().clone();
    assert!(method.is_built());
    assert_eq!(first, second);
}

#[test]
fn test_uneven_block_sparsity_is_a_structural_error() {
    let mesh = channel();
    let rows = 6 * mesh.num_nodes() + 1;
    let blocks = Sparsity::new((0..=rows).collect(), (0..rows).collect()).unwrap();
    let mut method = ConvexLimiting::new(blocks);

    assert!(matches!(method.operators(&mesh), Err(SimError::Structure(_))));
}

#[test]
fn test_invalid_configurations_are_rejected() {
    let config_error = |params: Parameters| {
        matches!(
            Simulation::new(dam_break(params), channel()),
            Err(SimError::Config(_))
        )
    };

    assert!(config_error(Parameters::default().with_cfl(1.5)));
    assert!(config_error(Parameters::default().with_time_order(4)));
    assert!(config_error(Parameters::default().with_gravity(0.0)));
    // generation zone without incident waves
    assert!(config_error(Parameters::default().with_generation_zone(-2.0, 1.0)));
    assert!(config_error(
        Parameters::default()
            .with_absorption_zone(-1.5, 1.0)
            .with_generation_zone(-2.0, 1.0)
    ));

    let dry = Problem::new("dry", Parameters::default(), |_: [f64; 2], _: f64| rest(0.0));
    assert!(matches!(Simulation::new(dry, channel()), Err(SimError::Config(_))));
}

#[test]
fn test_waves_enter_through_the_generation_zone() {
    let params = Parameters::default()
        .with_reflecting_boundaries(true)
        .with_still_water_level(1.0)
        .with_generation_zone(-2.0, 0.5)
        .with_absorption_zone(1.5, 0.5);
    let problem = Problem::new("flume", params, |_: [f64; 2], _: f64| rest(1.0))
        .with_waves(|_: [f64; 2], _: f64| rest(1.1));
    let mut sim = Simulation::new(problem, channel()).unwrap();
    let initial_mass = sim.total(Field::H);

    sim.run_until(0.05).unwrap();

    // the outermost column relaxes towards the incident state
    assert!(sim.state().value(0, Field::H) > 1.0 + 1e-3);
    assert!(sim.total(Field::H) > initial_mass);
}
