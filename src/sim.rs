use std::fmt;

use crate::{
    bc::Reflecting,
    comm::{Communicator, Serial},
    error::SimError,
    integrator::{SspIntegrator, MIN_DT},
    mesh::Mesh,
    method::{StageDiagnostics, StageEvaluator},
    problem::Problem,
    stages::ConvexLimiting,
    state::{DofState, Field},
    Ctx,
};

/// `hEps = H_EPS_FACTOR · h0_max`.
pub const H_EPS_FACTOR: f64 = 1e-5;

/// Summary of one accepted step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    pub step: usize,
    pub time: f64,
    pub dt: f64,
    pub min_h: f64,
    pub max_h: f64,
    /// `Σ_i m_i h_i`
    pub mass: f64,
    pub momentum: [f64; 2],
    pub stage: StageDiagnostics,
}

pub struct Simulation<'pb, M = ConvexLimiting> {
    pub(crate) problem: Problem<'pb>,
    pub(crate) mesh: Mesh,
    pub(crate) method: M,
    pub(crate) integrator: SspIntegrator,
    pub(crate) comm: Box<dyn Communicator + 'pb>,
    pub(crate) state: DofState,
    pub(crate) lumped: Vec<f64>,
    pub(crate) h0_max: f64,
    pub(crate) h_eps: f64,
}

impl<'pb> Simulation<'pb, ConvexLimiting> {
    pub fn new(problem: Problem<'pb>, mesh: Mesh) -> Result<Self, SimError> {
        let method = ConvexLimiting::for_mesh(&mesh);
        Self::with_method(problem, mesh, method)
    }
}

impl<'pb, M: StageEvaluator> Simulation<'pb, M> {
    pub fn with_method(problem: Problem<'pb>, mesh: Mesh, method: M) -> Result<Self, SimError> {
        Self::with_communicator(problem, mesh, method, Serial)
    }

    /// Validates the configuration, binds the constraints and evaluates the initial state.
    pub fn with_communicator(
        mut problem: Problem<'pb>,
        mesh: Mesh,
        method: M,
        comm: impl Communicator + 'pb,
    ) -> Result<Self, SimError> {
        problem.validate()?;

        let walls = if problem.params.reflecting_boundaries {
            Reflecting::all()
        } else {
            Reflecting::partial()
        };
        problem.constraints.insert(0, Box::new(walls));
        for constraint in problem.constraints.iter_mut() {
            constraint.bind(&mesh);
        }

        let z = mesh.bathymetry();
        let coords = mesh.coords();
        let mut state = DofState::from_fn(mesh.num_nodes(), |i| (problem.u0)(coords[i], z[i]));

        let h0_max = comm.all_reduce_max(state.max(Field::H));
        if !(h0_max.is_finite() && h0_max > 0.0) {
            return Err(SimError::config(format!(
                "initial height must be positive somewhere, max is {h0_max}"
            )));
        }
        for constraint in &problem.constraints {
            constraint.apply(&mesh, 0.0, &mut state);
        }

        let integrator = SspIntegrator::new(problem.params.time_order, problem.params.cfl, 0.0)?;
        let lumped = mesh.lumped_mass();

        tracing::event!(
            tracing::Level::DEBUG,
            "initialized `{}`: {} dofs, h0_max={:e}, constraints {:?}",
            problem.name,
            mesh.num_nodes(),
            h0_max,
            problem.constraints.iter().map(|c| c.name()).collect::<Vec<_>>()
        );

        Ok(Self {
            problem,
            mesh,
            method,
            integrator,
            comm: Box::new(comm),
            state,
            lumped,
            h0_max,
            h_eps: H_EPS_FACTOR * h0_max,
        })
    }

    pub fn problem(&self) -> &Problem<'pb> {
        &self.problem
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn method(&self) -> &M {
        &self.method
    }

    pub fn state(&self) -> &DofState {
        &self.state
    }

    pub fn time(&self) -> f64 {
        self.integrator.time()
    }

    /// Last accepted step size, zero before the first step.
    pub fn dt(&self) -> f64 {
        self.integrator.dt()
    }

    pub fn steps(&self) -> usize {
        self.integrator.steps()
    }

    pub fn h_eps(&self) -> f64 {
        self.h_eps
    }

    pub fn h0_max(&self) -> f64 {
        self.h0_max
    }

    /// Context of a stage starting at `t`.
    pub fn ctx(&self, t: f64, dt: f64) -> Ctx<'_, 'pb> {
        Ctx {
            mesh: &self.mesh,
            problem: &self.problem,
            comm: &*self.comm,
            t,
            dt,
            h0_max: self.h0_max,
            h_eps: self.h_eps,
        }
    }

    /// All-reduced `Σ_i m_i u_i` of one field.
    pub fn total(&self, field: Field) -> f64 {
        self.comm.all_reduce_sum(self.state.weighted_sum(field, &self.lumped))
    }

    pub fn step(&mut self) -> Result<StepReport, SimError> {
        let ctx = Ctx {
            mesh: &self.mesh,
            problem: &self.problem,
            comm: &*self.comm,
            t: self.integrator.time(),
            dt: self.integrator.dt(),
            h0_max: self.h0_max,
            h_eps: self.h_eps,
        };
        let stage = self.integrator.step(&mut self.method, ctx, &mut self.state)?;

        let t = self.integrator.time();
        for constraint in &self.problem.constraints {
            constraint.apply(&self.mesh, t, &mut self.state);
        }

        let report = StepReport {
            step: self.integrator.steps(),
            time: t,
            dt: self.integrator.dt(),
            min_h: self.comm.all_reduce_min(self.state.min(Field::H)),
            max_h: self.comm.all_reduce_max(self.state.max(Field::H)),
            mass: self.total(Field::H),
            momentum: [self.total(Field::Hu), self.total(Field::Hv)],
            stage,
        };
        tracing::event!(
            tracing::Level::DEBUG,
            "step {}: t={:e}, dt={:e}, h in [{:e}, {:e}], mass={:e}",
            report.step,
            report.time,
            report.dt,
            report.min_h,
            report.max_h,
            report.mass
        );
        Ok(report)
    }

    /// Steps until `t_final`, shortening the last step to land on it.
    pub fn run_until(&mut self, t_final: f64) -> Result<Option<StepReport>, SimError> {
        let mut last = None;
        while t_final - self.time() > MIN_DT {
            self.integrator.set_dt_cap(Some(t_final - self.time()));
            last = Some(self.step()?);
        }
        self.integrator.set_dt_cap(None);
        Ok(last)
    }
}

impl<M: StageEvaluator> fmt::Display for Simulation<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = &self.problem.params;
        write!(
            f,
            "simulation of `{}` problem:\n\t- `{}` method\n\t- SSP{} with CFL {}\n\t- {} dofs, {} triangles\n\t- g = {}, friction {:?}, dispersion α = {}",
            self.problem.name,
            self.method.name(),
            params.time_order,
            params.cfl,
            self.mesh.num_nodes(),
            self.mesh.num_triangles(),
            params.gravity,
            params.friction,
            params.dispersion
        )
    }
}
