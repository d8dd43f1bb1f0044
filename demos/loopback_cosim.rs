use std::env;

use rustpower_cosim::prelude::*;
use tracing_subscriber::EnvFilter;

/// Runs the four-bus transmission federate against a replayed feeder profile
/// and prints a table per time step.
fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let config = CoSimConfig::from_file(format!("{dir}/cases/cosim.json")).unwrap();
    let schedule = load_schedule(format!("{dir}/cases/feeder_profile.csv")).unwrap();
    let runtime = LoopbackFederate::new(1.0).with_schedule(schedule);

    let mut clock = CoSimClock::from_config(
        &config,
        |_| NewtonEngine::<DefaultSolver>::default(),
        runtime,
    )
    .unwrap();
    let summary = clock.run().unwrap();

    for report in clock.reports() {
        println!("t = {:.1} s", report.time);
        println!("{}", report.to_table());
    }
    println!(
        "{} steps up to t = {:.1} s, {} unconverged phase solves",
        summary.steps, summary.granted_time, summary.unconverged_solves
    );
    for key in ["Va", "Vb", "Vc"] {
        if let Some(&(time, value)) = clock.runtime().published(key).and_then(|h| h.last()) {
            println!("{key} @ {time:.1} s: {:.1} V ∠ {:.2}°", value.norm(), value.arg().to_degrees());
        }
    }
}
