use std::io::Write;

use bytemuck::bytes_of;
use faer_core::MatRef;
use reborrow::*;

use crate::{
    error::SimError,
    integrator::MIN_DT,
    mesh::Mesh,
    method::StageEvaluator,
    problem::Problem,
    sim::{Simulation, StepReport},
    stages::ConvexLimiting,
    state::{Field, NUM_FIELDS},
};

/// How often observers see the solution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sampling {
    /// Every `n`-th accepted step.
    Steps(usize),
    /// Every `Δt` of simulated time; steps are shortened to land on the sample times.
    Delta(f64),
}

#[derive(Clone, Copy)]
pub struct ObsCtx<'ctx, 'pb> {
    // Meta
    problem: &'ctx Problem<'pb>,
    mesh: &'ctx Mesh,
    method: &'static str,
    sampling: Sampling,

    // Iteration info
    iter: usize,
    time: f64,
    mass: f64,
    report: Option<StepReport>,
    solution: MatRef<'ctx, f64>,
}

impl<'ctx, 'pb> ObsCtx<'ctx, 'pb> {
    fn new<M: StageEvaluator>(
        sim: &'ctx Simulation<'pb, M>,
        sampling: Sampling,
        report: Option<StepReport>,
    ) -> Self {
        Self {
            problem: sim.problem(),
            mesh: sim.mesh(),
            method: sim.method().name(),
            sampling,
            iter: sim.steps(),
            time: sim.time(),
            mass: sim.total(Field::H),
            report,
            solution: sim.state().as_ref(),
        }
    }

    pub fn problem(&self) -> &Problem<'pb> {
        self.problem
    }

    pub fn mesh(&self) -> &Mesh {
        self.mesh
    }

    pub fn method_name(&self) -> &'static str {
        self.method
    }

    pub fn iter(&self) -> usize {
        self.iter
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// All-reduced `Σ_i m_i h_i`.
    pub fn mass(&self) -> f64 {
        self.mass
    }

    /// The step that produced this solution, `None` at startup.
    pub fn report(&self) -> Option<&StepReport> {
        self.report.as_ref()
    }

    /// One row per owned DOF, one column per field.
    pub fn solution(&self) -> MatRef<'_, f64> {
        self.solution.rb()
    }

    pub fn sampling(&self) -> Sampling {
        self.sampling
    }
}

#[allow(unused_variables)]
pub trait Observer {
    fn at_startup(&mut self, ctx: ObsCtx<'_, '_>) -> Result<(), SimError> {
        Ok(())
    }

    fn at_each_iteration(&mut self, ctx: ObsCtx<'_, '_>) -> Result<(), SimError> {
        Ok(())
    }

    fn at_cleanup(&mut self, ctx: ObsCtx<'_, '_>) -> Result<(), SimError> {
        Ok(())
    }
}

pub struct Driver<'pb, 'd, M = ConvexLimiting> {
    pub(crate) sim: Simulation<'pb, M>,
    pub(crate) observers: Vec<Box<dyn Observer + 'd>>,
    pub(crate) sampling: Sampling,
    pub(crate) t_final: f64,
}

impl<'pb, 'd, M: StageEvaluator> Driver<'pb, 'd, M> {
    pub fn new(sim: Simulation<'pb, M>, t_final: f64) -> Self {
        Self {
            sim,
            observers: Vec::new(),
            sampling: Sampling::Steps(1),
            t_final,
        }
    }

    pub fn with_time_sampling(mut self, sampling: Sampling) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_observer(mut self, observer: impl Observer + 'd) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn simulation(&self) -> &Simulation<'pb, M> {
        &self.sim
    }

    pub fn into_simulation(self) -> Simulation<'pb, M> {
        self.sim
    }

    pub fn run(&mut self) -> Result<(), SimError> {
        let sampling = self.sampling;
        let mut next_output = match sampling {
            Sampling::Steps(0) => {
                return Err(SimError::config("sampling period must be at least one step"))
            }
            Sampling::Delta(delta) if !(delta > MIN_DT) => {
                return Err(SimError::config(format!(
                    "sampling interval must exceed {MIN_DT:e}, got {delta}"
                )))
            }
            Sampling::Delta(delta) => Some(self.sim.time() + delta),
            Sampling::Steps(_) => None,
        };

        let ctx = ObsCtx::new(&self.sim, sampling, None);
        for o in self.observers.iter_mut() {
            o.at_startup(ctx)?;
        }

        let mut last = None;
        while self.t_final - self.sim.time() > MIN_DT {
            let target = next_output.map_or(self.t_final, |t: f64| t.min(self.t_final));
            self.sim
                .integrator
                .set_dt_cap(Some(target - self.sim.time()));
            let report = self.sim.step()?;
            last = Some(report);

            let sample = match (sampling, next_output.as_mut()) {
                (Sampling::Steps(period), _) => report.step % period == 0,
                (Sampling::Delta(delta), Some(next)) if *next - report.time <= MIN_DT => {
                    *next += delta;
                    true
                }
                _ => false,
            };
            if sample {
                let ctx = ObsCtx::new(&self.sim, sampling, Some(report));
                for o in self.observers.iter_mut() {
                    o.at_each_iteration(ctx)?;
                }
            }
        }
        self.sim.integrator.set_dt_cap(None);

        let ctx = ObsCtx::new(&self.sim, sampling, last);
        for o in self.observers.iter_mut() {
            o.at_cleanup(ctx)?;
        }

        Ok(())
    }
}

/// Reports progress through `tracing`, including the drift of the total mass.
#[derive(Debug, Default)]
pub struct Logger {
    initial_mass: f64,
}

impl Observer for Logger {
    fn at_startup(&mut self, ctx: ObsCtx<'_, '_>) -> Result<(), SimError> {
        self.initial_mass = ctx.mass();
        tracing::event!(
            tracing::Level::INFO,
            "start of simulation of problem `{}` (`{}` method, {} dofs, SSP{}, CFL {}, mass {:e})",
            ctx.problem().name(),
            ctx.method_name(),
            ctx.mesh().num_nodes(),
            ctx.problem().params().time_order(),
            ctx.problem().params().cfl(),
            ctx.mass(),
        );
        Ok(())
    }

    fn at_each_iteration(&mut self, ctx: ObsCtx<'_, '_>) -> Result<(), SimError> {
        if let Some(report) = ctx.report() {
            tracing::event!(
                tracing::Level::DEBUG,
                "problem `{}`: step {}, t={:e}, dt={:e}, h in [{:e}, {:e}], min limiter {:.3}",
                ctx.problem().name(),
                report.step,
                report.time,
                report.dt,
                report.min_h,
                report.max_h,
                report.stage.min_limiter,
            );
        }
        Ok(())
    }

    fn at_cleanup(&mut self, ctx: ObsCtx<'_, '_>) -> Result<(), SimError> {
        let drift = (ctx.mass() - self.initial_mass) / self.initial_mass.abs().max(f64::MIN_POSITIVE);
        tracing::event!(
            tracing::Level::INFO,
            "finished simulation of problem `{}` after {} steps at t={:e} (relative mass drift {:e})",
            ctx.problem().name(),
            ctx.iter(),
            ctx.time(),
            drift
        );
        Ok(())
    }
}

const SWGR1_HEADER: &[u8] = b"SWGR1";
const MARKER: [u8; 4] = [0xFF; 4];

/// Binary snapshots of the six fields.
///
/// Layout: magic bytes, float size, DOF count, field count, step period,
/// time period, method name, node coordinates, bathymetry, marker; then per
/// sample the time followed by each field column; a final marker.
pub struct SnapshotWriter<W> {
    output: W,
}

impl<W: Write> SnapshotWriter<W> {
    pub fn new(output: W) -> Self {
        Self { output }
    }

    pub fn into_inner(self) -> W {
        self.output
    }
}

impl<W: Write> Observer for SnapshotWriter<W> {
    fn at_startup(&mut self, ctx: ObsCtx<'_, '_>) -> Result<(), SimError> {
        let output = &mut self.output;
        // magic bytes
        output.write_all(SWGR1_HEADER)?;
        output.write_all(bytes_of(&(std::mem::size_of::<f64>() as u8)))?;
        // dimensions
        output.write_all(bytes_of(&(ctx.mesh().num_nodes() as u32)))?;
        output.write_all(bytes_of(&(NUM_FIELDS as u32)))?;
        let (steps, delta) = match ctx.sampling() {
            Sampling::Steps(n) => (n as u32, 0.0f64),
            Sampling::Delta(delta) => (0, delta),
        };
        output.write_all(bytes_of(&steps))?;
        output.write_all(bytes_of(&delta))?;
        // method name
        let name = ctx.method_name().as_bytes();
        output.write_all(bytes_of(&(name.len() as u32)))?;
        output.write_all(name)?;
        // geometry
        output.write_all(bytemuck::cast_slice(ctx.mesh().coords()))?;
        output.write_all(bytemuck::cast_slice(ctx.mesh().bathymetry()))?;

        output.write_all(&MARKER)?;

        // initial condition
        self.at_each_iteration(ctx)
    }

    fn at_each_iteration(&mut self, ctx: ObsCtx<'_, '_>) -> Result<(), SimError> {
        let u = ctx.solution();
        self.output.write_all(bytes_of(&ctx.time()))?;
        let mut column = Vec::with_capacity(u.nrows());
        for field in Field::ALL {
            let col = u.rb().col(field.index());
            column.clear();
            column.extend((0..col.nrows()).map(|i| col.read(i, 0)));
            self.output.write_all(bytemuck::cast_slice(&column))?;
        }
        Ok(())
    }

    fn at_cleanup(&mut self, _ctx: ObsCtx<'_, '_>) -> Result<(), SimError> {
        self.output.write_all(&MARKER)?;
        self.output.flush().map_err(SimError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::Parameters;

    #[derive(Default)]
    struct Count {
        startup: usize,
        samples: Vec<f64>,
        cleanup: usize,
    }

    impl Observer for &mut Count {
        fn at_startup(&mut self, _ctx: ObsCtx<'_, '_>) -> Result<(), SimError> {
            self.startup += 1;
            Ok(())
        }

        fn at_each_iteration(&mut self, ctx: ObsCtx<'_, '_>) -> Result<(), SimError> {
            self.samples.push(ctx.time());
            Ok(())
        }

        fn at_cleanup(&mut self, _ctx: ObsCtx<'_, '_>) -> Result<(), SimError> {
            self.cleanup += 1;
            Ok(())
        }
    }

    fn lake() -> Simulation<'static> {
        let mesh = Mesh::rectangle([0.0, 0.0], [1.0, 1.0], 4, 4).unwrap();
        let problem = Problem::new(
            "lake",
            Parameters::default().with_reflecting_boundaries(true),
            |_: [f64; 2], _: f64| [1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
        );
        Simulation::new(problem, mesh).unwrap()
    }

    #[test]
    fn time_sampling_lands_on_output_times() {
        let mut count = Count::default();
        Driver::new(lake(), 0.1)
            .with_time_sampling(Sampling::Delta(0.025))
            .with_observer(&mut count)
            .run()
            .unwrap();

        assert_eq!(count.startup, 1);
        assert_eq!(count.cleanup, 1);
        assert_eq!(count.samples.len(), 4);
        for (k, t) in count.samples.iter().enumerate() {
            assert!((t - 0.025 * (k + 1) as f64).abs() < 1e-12);
        }
    }

    #[test]
    fn zero_step_period_is_rejected() {
        let result = Driver::new(lake(), 0.1)
            .with_time_sampling(Sampling::Steps(0))
            .run();
        assert!(matches!(result, Err(SimError::Config(_))));
    }

    #[test]
    fn snapshot_layout() {
        let mut bytes = Vec::new();
        let mut driver = Driver::new(lake(), 0.05)
            .with_time_sampling(Sampling::Delta(0.05))
            .with_observer(SnapshotWriter::new(&mut bytes));
        driver.run().unwrap();
        let sim = driver.into_simulation();
        let n = sim.mesh().num_nodes();
        let name = sim.method().name().len();

        let header = 5 + 1 + 4 + 4 + 4 + 8 + 4 + name + 8 * 3 * n + 4;
        let sample = 8 + 8 * NUM_FIELDS * n;
        assert_eq!(bytes.len(), header + 2 * sample + 4);
        assert_eq!(&bytes[..5], b"SWGR1");
        assert_eq!(&bytes[bytes.len() - 4..], &MARKER);
    }
}
