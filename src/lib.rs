pub mod bc;
pub mod comm;
pub mod driver;
pub mod error;
pub mod graph;
pub mod integrator;
pub mod mesh;
pub mod method;
pub mod problem;
pub mod sim;
pub mod stages;
pub mod state;

pub use comm::{Communicator, Serial};
pub use driver::{Driver, Logger, ObsCtx, Observer, Sampling, SnapshotWriter};
pub use error::SimError;
pub use mesh::Mesh;
pub use problem::{Friction, MassMatrix, Parameters, Problem};
pub use sim::{Simulation, StepReport};
pub use stages::ConvexLimiting;
pub use state::{DofState, Field};

/// Everything a stage needs to know besides the state it advances.
#[derive(Clone, Copy)]
pub struct Ctx<'a, 'pb> {
    pub mesh: &'a Mesh,
    pub problem: &'a Problem<'pb>,
    pub comm: &'a dyn Communicator,
    /// Stage start time.
    pub t: f64,
    pub dt: f64,
    /// Maximum initial height over all ranks.
    pub h0_max: f64,
    /// Dry-state threshold used to regularize `1/h`.
    pub h_eps: f64,
}

impl<'a, 'pb> Ctx<'a, 'pb> {
    pub fn params(&self) -> &'a Parameters {
        &self.problem.params
    }

    pub fn at(self, t: f64, dt: f64) -> Self {
        Self { t, dt, ..self }
    }
}
