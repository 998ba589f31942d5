//! Sampling-loop benchmarks for both learners, run with `divan` in place of
//! `criterion` (matches the teacher's LP-solver benches).

use quadtri::integrator::IntegratorConfig;
use quadtri::triangulation::TriangulatorConfig;
use quadtri::Learner;

fn main() {
    divan::main();
}

#[divan::bench]
fn integrator_ask_tell_loop() {
    let mut learner = IntegratorConfig::new(0.0, 1.0).rtol(1e-6).build().unwrap();
    while !learner.done() {
        let (points, _loss) = learner.ask(32).unwrap();
        if points.is_empty() {
            break;
        }
        for x in points {
            let v = divan::black_box((x * 10.0).sin());
            learner.tell(x, v).unwrap();
        }
    }
}

#[divan::bench]
fn triangulator_ask_tell_loop() {
    let mut learner = TriangulatorConfig::new(vec![(0.0, 1.0), (0.0, 1.0)]).build().unwrap();
    for _ in 0..200 {
        let (points, _loss) = learner.ask(8).unwrap();
        for p in points {
            let v = divan::black_box(p[0] * p[0] + p[1]);
            learner.tell(p, v).unwrap();
        }
    }
}
