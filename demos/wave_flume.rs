use sgn_convex::{
    Driver, Friction, Logger, Mesh, Parameters, Problem, Sampling, Simulation, SnapshotWriter,
};
use std::{f64::consts::PI, fs, io};

const DEPTH: f64 = 0.5;
const AMPLITUDE: f64 = 0.02;
const PERIOD: f64 = 2.0;

/// Linear progressive wave over a flat bottom at depth `DEPTH`.
fn incident_wave(x: [f64; 2], t: f64) -> [f64; 6] {
    let omega = 2.0 * PI / PERIOD;
    let g: f64 = 9.81;
    // shallow water dispersion relation
    let k = omega / (g * DEPTH).sqrt();
    let phase = k * x[0] - omega * t;
    let h = DEPTH + AMPLITUDE * phase.cos();
    let u = omega / (k * DEPTH) * AMPLITUDE * phase.cos();
    let w = -DEPTH * omega * AMPLITUDE * phase.sin() / h;
    [h, h * u, 0.0, h * h, h * w, 0.0]
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let problem_name = "wave_flume";

    let mesh = Mesh::rectangle([0.0, 0.0], [30.0, 1.0], 300, 10)
        .expect("couldn't build mesh")
        // a gentle bar in the middle of the flume
        .with_bathymetry(|x| 0.3 * (-(x[0] - 15.0).powi(2) / 4.0).exp());

    let params = Parameters::default()
        .with_still_water_level(DEPTH)
        .with_friction(Friction::Manning { n: 0.012 })
        .with_generation_zone(0.0, 3.0)
        .with_absorption_zone(24.0, 6.0)
        .with_reflecting_boundaries(true);

    let problem = Problem::new(problem_name, params, |_: [f64; 2], z: f64| {
        let h = (DEPTH - z).max(0.0);
        [h, 0.0, 0.0, h * h, 0.0, 0.0]
    })
    .with_waves(incident_wave);

    let sim = Simulation::new(problem, mesh).expect("invalid simulation setup");
    println!("{sim}");

    fs::create_dir_all("bin").expect("couldn't create output directory");
    let mut output = io::BufWriter::new(
        fs::File::create(format!("bin/{}.swgr1", problem_name))
            .expect("couldn't create output file"),
    );

    Driver::new(sim, 20.0)
        .with_time_sampling(Sampling::Delta(0.1))
        .with_observer(Logger::default())
        .with_observer(SnapshotWriter::new(&mut output))
        .run()
        .expect("failed to run simulation");
}
