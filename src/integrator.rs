use crate::{
    error::SimError,
    method::{StageDiagnostics, StageEvaluator},
    state::DofState,
    Ctx,
};

/// Largest allowed growth of the time step between two steps.
pub const DT_RATIO_MAX: f64 = 2.0;
/// Steps at or below this are treated as a blow-up.
pub const MIN_DT: f64 = 1e-8;
const MIN_EDGE_CFL: f64 = 1e-6;

/// Shu–Osher weights `(old, stage)` of stage `stage` (1-based).
fn stage_weights(order: usize, stage: usize) -> (f64, f64) {
    match (order, stage) {
        (2, 2) => (0.5, 0.5),
        (3, 2) => (0.75, 0.25),
        (3, 3) => (1.0 / 3.0, 2.0 / 3.0),
        _ => (0.0, 1.0),
    }
}

/// Offsets `c_k` of the stage start times `t_n + c_k dt`.
fn stage_offsets(order: usize) -> &'static [f64] {
    match order {
        1 => &[0.0],
        2 => &[0.0, 1.0],
        _ => &[0.0, 1.0, 0.5],
    }
}

/// Strong-stability-preserving Runge–Kutta of order 1, 2 or 3 with adaptive `dt`.
#[derive(Debug, Clone)]
pub struct SspIntegrator {
    order: usize,
    cfl: f64,
    t: f64,
    dt: f64,
    // step before the output cap, the reference for the next growth clamp
    dt_cfl: f64,
    dt_last: Option<f64>,
    dt_cap: Option<f64>,
    steps: usize,
    stage: usize,
    u_last: DofState,
}

impl SspIntegrator {
    pub fn new(order: usize, cfl: f64, t0: f64) -> Result<Self, SimError> {
        if !(1..=3).contains(&order) {
            return Err(SimError::config(format!("SSP order must be 1, 2 or 3, got {order}")));
        }
        Ok(Self {
            order,
            cfl,
            t: t0,
            dt: 0.0,
            dt_cfl: 0.0,
            dt_last: None,
            dt_cap: None,
            steps: 0,
            stage: 0,
            u_last: DofState::default(),
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn time(&self) -> f64 {
        self.t
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Caps the next steps, e.g. to land on an output time.
    pub fn set_dt_cap(&mut self, cap: Option<f64>) {
        self.dt_cap = cap;
    }

    /// `runCFL / max(edge cfl)`, clamped to `DT_RATIO_MAX` times the previous step.
    ///
    /// The previous step is taken before the cap, so landing on an output
    /// time does not slow down the steps after it.
    pub fn choose_dt(&mut self, max_edge_cfl: f64) -> Result<f64, SimError> {
        let max_cfl = max_edge_cfl.max(MIN_EDGE_CFL);
        let mut dt = self.cfl / max_cfl;
        if let Some(last) = self.dt_last {
            if dt > DT_RATIO_MAX * last {
                tracing::event!(
                    tracing::Level::WARN,
                    "time step growth clamped: {:e} -> {:e}",
                    dt,
                    DT_RATIO_MAX * last
                );
                dt = DT_RATIO_MAX * last;
            }
        }
        self.dt_cfl = dt;
        if let Some(cap) = self.dt_cap {
            dt = dt.min(cap);
        }
        if dt <= MIN_DT {
            return Err(SimError::StepTooSmall { dt, max_cfl });
        }
        self.dt = dt;
        Ok(dt)
    }

    /// Blends the freshly evaluated stage with the step's initial state.
    pub fn update_stage(&mut self, mut stage_state: DofState) -> DofState {
        self.stage += 1;
        let (a, b) = stage_weights(self.order, self.stage);
        if a != 0.0 {
            stage_state.combine(b, &self.u_last, a);
        }
        stage_state
    }

    /// Commits the accepted step: advances time, remembers the uncapped `dt`, resets the stage counter.
    pub fn update_time_history(&mut self) {
        self.t += self.dt;
        self.dt_last = Some(self.dt_cfl);
        self.steps += 1;
        self.stage = 0;
    }

    /// Advances `u` by one full step; `ctx.t` and `ctx.dt` are overwritten per stage.
    pub fn step<E: StageEvaluator + ?Sized>(
        &mut self,
        evaluator: &mut E,
        ctx: Ctx<'_, '_>,
        u: &mut DofState,
    ) -> Result<StageDiagnostics, SimError> {
        let max_cfl = evaluator.max_edge_cfl(ctx.at(self.t, self.dt), u)?;
        let dt = self.choose_dt(max_cfl)?;

        self.u_last = u.clone();
        self.stage = 0;

        let mut current = u.clone();
        let mut diagnostics = StageDiagnostics::default();
        for &c in stage_offsets(self.order) {
            let (next, stage_diagnostics) =
                evaluator.evaluate_stage(ctx.at(self.t + c * dt, dt), &current)?;
            current = self.update_stage(next);
            diagnostics = stage_diagnostics;
        }

        u.assign(&current);
        self.update_time_history();
        Ok(diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{comm::Serial, mesh::Mesh, problem::Parameters, problem::Problem, state::NUM_FIELDS};

    /// Forward Euler for `u' = λ u` with a fixed edge CFL.
    struct Decay {
        lambda: f64,
        cfl: f64,
    }

    impl StageEvaluator for Decay {
        fn evaluate_stage(
            &mut self,
            ctx: Ctx<'_, '_>,
            old: &DofState,
        ) -> Result<(DofState, StageDiagnostics), SimError> {
            let mut new = old.clone();
            new.combine(1.0 + self.lambda * ctx.dt, old, 0.0);
            Ok((new, StageDiagnostics::default()))
        }

        fn max_edge_cfl(&mut self, _ctx: Ctx<'_, '_>, _u: &DofState) -> Result<f64, SimError> {
            Ok(self.cfl)
        }

        fn name(&self) -> &'static str {
            "decay"
        }
    }

    fn run_one_step(order: usize) -> (f64, f64) {
        let mesh = Mesh::rectangle([0.0, 0.0], [1.0, 1.0], 1, 1).unwrap();
        let problem = Problem::new("decay", Parameters::default(), |_: [f64; 2], _: f64| {
            [0.0; NUM_FIELDS]
        });
        let ctx = Ctx {
            mesh: &mesh,
            problem: &problem,
            comm: &Serial,
            t: 0.0,
            dt: 0.0,
            h0_max: 1.0,
            h_eps: 1e-5,
        };
        let mut integrator = SspIntegrator::new(order, 0.5, 0.0).unwrap();
        let mut u = DofState::from_fn(4, |_| [1.0; NUM_FIELDS]);
        integrator
            .step(&mut Decay { lambda: -1.0, cfl: 10.0 }, ctx, &mut u)
            .unwrap();
        assert!((integrator.time() - 0.05).abs() < 1e-15);
        (integrator.dt(), u.value(0, crate::state::Field::H))
    }

    #[test]
    fn stability_polynomials_match_the_taylor_expansion() {
        let (dt, u1) = run_one_step(1);
        let z = -dt;
        assert!((u1 - (1.0 + z)).abs() < 1e-15);

        let (_, u2) = run_one_step(2);
        assert!((u2 - (1.0 + z + z * z / 2.0)).abs() < 1e-15);

        let (_, u3) = run_one_step(3);
        assert!((u3 - (1.0 + z + z * z / 2.0 + z * z * z / 6.0)).abs() < 1e-15);
    }

    #[test]
    fn step_growth_is_clamped() {
        let mut integrator = SspIntegrator::new(3, 0.5, 0.0).unwrap();
        assert_eq!(integrator.choose_dt(1.0).unwrap(), 0.5);
        integrator.update_time_history();
        assert_eq!(integrator.choose_dt(1e-3).unwrap(), 1.0);
        integrator.update_time_history();
        assert_eq!(integrator.choose_dt(0.0).unwrap(), 2.0);
    }

    #[test]
    fn a_capped_step_does_not_throttle_the_next() {
        let mut integrator = SspIntegrator::new(2, 0.5, 0.0).unwrap();
        integrator.set_dt_cap(Some(1e-3));
        assert_eq!(integrator.choose_dt(1.0).unwrap(), 1e-3);
        integrator.update_time_history();

        integrator.set_dt_cap(None);
        assert_eq!(integrator.choose_dt(1.0).unwrap(), 0.5);
        integrator.update_time_history();
        assert!((integrator.time() - 0.501).abs() < 1e-15);
    }

    #[test]
    fn tiny_steps_are_fatal() {
        let mut integrator = SspIntegrator::new(2, 0.5, 0.0).unwrap();
        assert!(matches!(
            integrator.choose_dt(1e9),
            Err(SimError::StepTooSmall { .. })
        ));
    }

    #[test]
    fn only_orders_one_to_three_exist() {
        assert!(SspIntegrator::new(0, 0.5, 0.0).is_err());
        assert!(SspIntegrator::new(4, 0.5, 0.0).is_err());
    }
}
