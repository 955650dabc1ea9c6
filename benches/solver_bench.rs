//! Benchmarks for impulse2d
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use impulse2d::prelude::*;

// ============================================================================
// Scene builders
// ============================================================================

/// A chain of `links` bodies connected by distance constraints (one island).
fn chain_scene(links: u32) -> (Vec<Body>, Vec<Constraint2d>) {
    let mut bodies = vec![Body::new_static(
        Vec2::ZERO,
        Shape2d::Circle { radius: 0.25 },
    )];
    let mut constraints = Vec::new();
    for i in 1..=links {
        bodies.push(Body::new_dynamic(
            Vec2::new(f64::from(i), 0.0),
            1.0,
            Shape2d::Circle { radius: 0.25 },
        ));
        constraints.push(Constraint2d::Distance(DistanceConstraint::new(
            BodyHandle(i - 1),
            BodyHandle(i),
            Vec2::ZERO,
            Vec2::ZERO,
            1.0,
        )));
    }
    (bodies, constraints)
}

/// Many small disconnected clusters (many islands, parallel-friendly).
fn cluster_scene(clusters: u32) -> (Vec<Body>, Vec<Constraint2d>) {
    let mut bodies = Vec::new();
    let mut constraints = Vec::new();
    for c in 0..clusters {
        let base = c * 3;
        let x = f64::from(c) * 10.0;
        for i in 0..3 {
            bodies.push(Body::new_dynamic(
                Vec2::new(x + f64::from(i) * 1.5, 0.0),
                1.0,
                Shape2d::Circle { radius: 0.25 },
            ));
        }
        constraints.push(Constraint2d::Distance(DistanceConstraint::new(
            BodyHandle(base),
            BodyHandle(base + 1),
            Vec2::ZERO,
            Vec2::ZERO,
            1.5,
        )));
        constraints.push(Constraint2d::Distance(DistanceConstraint::new(
            BodyHandle(base + 1),
            BodyHandle(base + 2),
            Vec2::ZERO,
            Vec2::ZERO,
            1.5,
        )));
    }
    (bodies, constraints)
}

fn run_steps(
    bodies: &mut [Body],
    constraints: &mut [Constraint2d],
    solver: &mut ConstraintSolver,
    options: &SolveOptions,
    steps: usize,
) {
    let dt = 1.0 / 60.0;
    for _ in 0..steps {
        solver.begin_step();
        solver.solve(bodies, constraints, dt, options).unwrap();
        solver.end_step();
        for body in bodies.iter_mut() {
            if !body.is_static() {
                let velocity = body.velocity;
                let angular_velocity = body.angular_velocity;
                body.position += velocity * dt;
                body.angle += angular_velocity * dt;
            }
        }
    }
}

// ============================================================================
// Batch solve benchmarks
// ============================================================================

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");

    for links in [16u32, 64] {
        group.bench_function(format!("{links}_links_serial"), |b| {
            b.iter(|| {
                let (mut bodies, mut constraints) = chain_scene(links);
                let mut solver = ConstraintSolver::new();
                let options = SolveOptions {
                    parallel: false,
                    ..SolveOptions::default()
                };
                run_steps(
                    &mut bodies,
                    &mut constraints,
                    &mut solver,
                    &options,
                    black_box(30),
                );
                bodies.last().unwrap().position
            });
        });
    }

    group.finish();
}

fn bench_islands(c: &mut Criterion) {
    let mut group = c.benchmark_group("islands");

    for clusters in [8u32, 64] {
        group.bench_function(format!("{clusters}_clusters_serial"), |b| {
            b.iter(|| {
                let (mut bodies, mut constraints) = cluster_scene(clusters);
                let mut solver = ConstraintSolver::new();
                let options = SolveOptions {
                    parallel: false,
                    ..SolveOptions::default()
                };
                run_steps(
                    &mut bodies,
                    &mut constraints,
                    &mut solver,
                    &options,
                    black_box(10),
                );
                solver.stats().islands
            });
        });

        group.bench_function(format!("{clusters}_clusters_work_stealing"), |b| {
            b.iter(|| {
                let (mut bodies, mut constraints) = cluster_scene(clusters);
                let mut solver = ConstraintSolver::new();
                let options = SolveOptions {
                    parallel: true,
                    backend: SchedulerBackend::WorkStealing,
                    ..SolveOptions::default()
                };
                run_steps(
                    &mut bodies,
                    &mut constraints,
                    &mut solver,
                    &options,
                    black_box(10),
                );
                solver.stats().islands
            });
        });
    }

    group.finish();
}

// ============================================================================
// Coupled-constraint benchmarks
// ============================================================================

fn bench_coupled(c: &mut Criterion) {
    let mut group = c.benchmark_group("coupled");

    group.bench_function("gear_pair_30_steps", |b| {
        b.iter(|| {
            let mut a = Body::new_dynamic(Vec2::ZERO, 1.0, Shape2d::Circle { radius: 1.0 });
            let mut bb = Body::new_dynamic(
                Vec2::new(3.0, 0.0),
                1.0,
                Shape2d::Circle { radius: 1.0 },
            );
            a.set_mass_properties(1.0, 4.0);
            bb.set_mass_properties(1.0, 4.0);
            a.angular_velocity = 2.0;
            let mut bodies = vec![a, bb];

            let mut coupled = CoupledConstraint::new(
                BodyHandle(0),
                BodyHandle(1),
                Vec2::ZERO,
                Vec2::ZERO,
                3.0,
                0.0,
            );
            coupled.add_equation(CoupledEquation::angle(1.0)).unwrap();
            coupled
                .add_equation(CoupledEquation::distance(1.0))
                .unwrap();
            let mut constraints = vec![Constraint2d::Coupled(coupled)];

            let mut solver = ConstraintSolver::new();
            let options = SolveOptions {
                parallel: false,
                ..SolveOptions::default()
            };
            run_steps(
                &mut bodies,
                &mut constraints,
                &mut solver,
                &options,
                black_box(30),
            );
            solver.kkt_stats().calls
        });
    });

    group.finish();
}

criterion_group!(benches, bench_chain, bench_islands, bench_coupled);
criterion_main!(benches);
