use sgn_convex::{Driver, Logger, Mesh, Parameters, Problem, Sampling, Simulation, SnapshotWriter};
use std::{fs, io};

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let problem_name = "dam_break";

    let mesh = Mesh::rectangle([-5.0, -1.0], [5.0, 1.0], 100, 20).expect("couldn't build mesh");

    let problem = Problem::new(
        problem_name,
        Parameters::default()
            .with_reflecting_boundaries(true)
            .with_dispersion(0.0),
        |x: [f64; 2], _z: f64| {
            let h = if x[0] < 0.0 { 2.0 } else { 1.0 };
            [h, 0.0, 0.0, h * h, 0.0, 0.0]
        },
    );

    let sim = Simulation::new(problem, mesh).expect("invalid simulation setup");
    println!("{sim}");

    fs::create_dir_all("bin").expect("couldn't create output directory");
    let mut output = io::BufWriter::new(
        fs::File::create(format!("bin/{}.swgr1", problem_name))
            .expect("couldn't create output file"),
    );

    Driver::new(sim, 1.0)
        .with_time_sampling(Sampling::Delta(0.05))
        .with_observer(Logger::default())
        .with_observer(SnapshotWriter::new(&mut output))
        .run()
        .expect("failed to run simulation");
}
