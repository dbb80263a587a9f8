//! benches/bench.rs
//! • Run with:  `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fixed_effects_core::{
    components, group, group_columns, normalize, solve_coefficients, FixedEffect, GroupInput,
    SolverConfig,
};
use ndarray::Array1;
use rand::{Rng, SeedableRng};

const N_OBS: usize = 200_000;
const N_FIRMS: u32 = 10_000;
const N_YEARS: u32 = 20;

fn columns(seed: u64) -> (Vec<Option<u32>>, Vec<Option<u32>>, Array1<f64>) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let firm: Vec<Option<u32>> = (0..N_OBS).map(|_| Some(rng.gen_range(0..N_FIRMS))).collect();
    let year: Vec<Option<u32>> = (0..N_OBS).map(|_| Some(rng.gen_range(0..N_YEARS))).collect();
    let y: Array1<f64> = (0..N_OBS).map(|_| rng.gen::<f64>()).collect();
    (firm, year, y)
}

fn bench_group(c: &mut Criterion) {
    let (firm, year, _) = columns(1);

    c.bench_function("group_single", |b| {
        b.iter(|| group(GroupInput::Raw(black_box(&firm))).unwrap())
    });
    c.bench_function("group_firm_year", |b| {
        b.iter(|| {
            group_columns(&[GroupInput::Raw(black_box(&firm)), GroupInput::Raw(&year)]).unwrap()
        })
    });
}

fn bench_components_normalize(c: &mut Criterion) {
    let (firm, year, y) = columns(2);
    let fes = vec![
        FixedEffect::new(group(GroupInput::Raw(&firm)).unwrap()),
        FixedEffect::new(group(GroupInput::Raw(&year)).unwrap()),
    ];

    c.bench_function("components_2fe", |b| {
        b.iter(|| components(black_box(&fes)).unwrap())
    });

    let raw = solve_coefficients(&fes, y.view(), None, &SolverConfig::default())
        .unwrap()
        .coefficients;
    c.bench_function("normalize_2fe", |b| {
        b.iter(|| normalize(black_box(raw.clone()), &fes).unwrap())
    });
}

fn bench_solver(c: &mut Criterion) {
    let (firm, year, y) = columns(3);
    let fes = vec![
        FixedEffect::new(group(GroupInput::Raw(&firm)).unwrap()),
        FixedEffect::new(group(GroupInput::Raw(&year)).unwrap()),
    ];
    let config = SolverConfig::default();

    let mut solver_group = c.benchmark_group("solver");
    solver_group.sample_size(10);
    solver_group.bench_function("solve_coefficients_2fe", |b| {
        b.iter(|| solve_coefficients(&fes, black_box(y.view()), None, &config).unwrap())
    });
    solver_group.finish();
}

criterion_group!(benches, bench_group, bench_components_normalize, bench_solver);
criterion_main!(benches);
