//! End-to-end: group raw columns, solve, normalize and expand.

use approx::assert_relative_eq;
use fixed_effects_core::{
    components, detect_singletons, full, group, group_columns, normalize, solve_coefficients,
    FixedEffect, FixedEffectError, GroupInput, SolverConfig,
};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn firm_year_panel(n_obs: usize, seed: u64) -> (Vec<Option<u32>>, Vec<Option<u32>>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let firm_effect: Vec<f64> = (0..40).map(|_| rng.gen_range(-3.0..3.0)).collect();
    let year_effect: Vec<f64> = (0..8).map(|_| rng.gen_range(-1.0..1.0)).collect();

    let mut firm = Vec::with_capacity(n_obs);
    let mut year = Vec::with_capacity(n_obs);
    let mut y = Vec::with_capacity(n_obs);
    for _ in 0..n_obs {
        let f = rng.gen_range(0..40u32);
        let t = rng.gen_range(0..8u32);
        firm.push(Some(f));
        year.push(Some(t));
        y.push(firm_effect[f as usize] + year_effect[t as usize] + rng.gen_range(-0.1..0.1));
    }
    (firm, year, y)
}

#[test]
fn test_pipeline_preserves_fitted_values() {
    let (firm, year, y) = firm_year_panel(2_000, 42);
    let fes = vec![
        FixedEffect::new(group(GroupInput::Raw(&firm)).unwrap()),
        FixedEffect::new(group(GroupInput::Raw(&year)).unwrap()),
    ];
    let y = Array1::from(y);

    let result = solve_coefficients(&fes, y.view(), None, &SolverConfig::default()).unwrap();
    let raw_fitted = &y - &result.residuals;

    let canonical = normalize(result.coefficients, &fes).unwrap();
    let expanded = full(&canonical, &fes).unwrap();
    for i in 0..y.len() {
        assert_relative_eq!(
            expanded[0][i] + expanded[1][i],
            raw_fitted[i],
            epsilon = 1e-6
        );
    }

    // Dense random panel: everything is one component, years centred
    assert_eq!(components(&fes).unwrap().len(), 1);
    assert_relative_eq!(canonical[1].sum(), 0.0, epsilon = 1e-9);
}

#[test]
fn test_interacted_fixed_effects_group_jointly() {
    let firm: Vec<Option<&str>> = vec![Some("a"), Some("a"), Some("b"), Some("b"), None];
    let year: Vec<Option<&str>> = vec![Some("x"), Some("y"), Some("x"), Some("x"), Some("y")];

    let firm_year = group_columns(&[GroupInput::Raw(&firm), GroupInput::Raw(&year)]).unwrap();
    assert_eq!(firm_year.n_groups(), 3);
    assert_eq!(firm_year.refs().to_vec(), vec![1, 2, 3, 3, 0]);

    let fe = FixedEffect::new(firm_year);
    let singletons = detect_singletons(&[fe]).unwrap();
    assert_eq!(singletons.to_vec(), vec![true, true, false, false, false]);
}

#[test]
fn test_interaction_length_is_checked() {
    let values = vec![Some(1), Some(2), Some(1)];
    let g = group(GroupInput::Raw(&values)).unwrap();
    let err = FixedEffect::with_interaction(g, Array1::from(vec![1.0, 2.0])).unwrap_err();
    assert!(matches!(err, FixedEffectError::DimensionMismatch { .. }));
}

#[test]
fn test_subsample_keeps_coefficient_shape() {
    let (firm, year, y) = firm_year_panel(500, 7);
    let fes = vec![
        FixedEffect::new(group(GroupInput::Raw(&firm)).unwrap()),
        FixedEffect::new(group(GroupInput::Raw(&year)).unwrap()),
    ];
    let keep: Vec<usize> = (0..y.len()).filter(|i| i % 3 != 0).collect();
    let sub: Vec<FixedEffect> = fes.iter().map(|fe| fe.select(&keep).unwrap()).collect();
    let y_sub: Array1<f64> = keep.iter().map(|&i| y[i]).collect();

    let result = solve_coefficients(&sub, y_sub.view(), None, &SolverConfig::default()).unwrap();
    for (coef, fe) in result.coefficients.iter().zip(&fes) {
        assert_eq!(coef.len(), fe.n_groups());
    }
}
