//! Canonical fixed-effect coefficients.
//!
//! With two or more unweighted fixed effects, least squares only pins down
//! the coefficients up to constants that move between dimensions inside a
//! connected component. Normalization picks one representative: every
//! unweighted dimension except the first is centred to zero mean within each
//! component, and the removed level is added to the first (anchor) dimension.
//! The fitted predictor `Σ_q coef_q[refs_q[i]]` does not change.

use crate::components::components;
use crate::errors::{check_len, FixedEffectError, Result};
use crate::fixed_effect::FixedEffect;
use ndarray::Array1;
use rayon::prelude::*;
use tracing::debug;

/// Normalize coefficient vectors in place.
///
/// `coefs[q][g - 1]` is the coefficient of label `g` of `fes[q]`. Only
/// records with the implicit unit weight take part; with fewer than two of
/// them the vectors are left untouched.
///
/// # Errors
///
/// `DimensionMismatch` if `coefs` and `fes` differ in length,
/// `CoefficientShape` if a vector does not have one entry per group.
pub fn normalize_in_place(coefs: &mut [Array1<f64>], fes: &[FixedEffect]) -> Result<()> {
    check_coefficient_shapes(coefs, fes)?;

    let eligible: Vec<usize> = fes
        .iter()
        .enumerate()
        .filter_map(|(q, fe)| fe.is_unweighted().then_some(q))
        .collect();

    if eligible.len() < 2 {
        debug!(
            "Skipping normalization: {} unweighted fixed effect(s)",
            eligible.len()
        );
        return Ok(());
    }

    let eligible_fes: Vec<&FixedEffect> = eligible.iter().map(|&q| &fes[q]).collect();
    let cc = components(&eligible_fes)?;
    debug!(
        "Normalizing {} unweighted fixed effects over {} components",
        eligible.len(),
        cc.len()
    );

    let anchor = eligible[0];
    for component in &cc {
        // Nowhere to put the removed level back
        if component.labels(0).is_empty() {
            continue;
        }
        let mut m = 0.0;
        for (k, &q) in eligible.iter().enumerate().skip(1).rev() {
            let labels = component.labels(k);
            if labels.is_empty() {
                continue;
            }
            let out = &mut coefs[q];
            let mean = labels.iter().map(|&g| out[g as usize - 1]).sum::<f64>()
                / labels.len() as f64;
            for &g in labels {
                out[g as usize - 1] -= mean;
            }
            m += mean;
        }

        let out = &mut coefs[anchor];
        for &g in component.labels(0) {
            out[g as usize - 1] += m;
        }
    }
    Ok(())
}

/// Consuming form of [`normalize_in_place`] that hands the vectors back.
pub fn normalize(mut coefs: Vec<Array1<f64>>, fes: &[FixedEffect]) -> Result<Vec<Array1<f64>>> {
    normalize_in_place(&mut coefs, fes)?;
    Ok(coefs)
}

/// Expand per-group coefficients to one value per observation.
///
/// Observations missing in a fixed effect get `NaN` for that dimension.
pub fn full(coefs: &[Array1<f64>], fes: &[FixedEffect]) -> Result<Vec<Array1<f64>>> {
    check_coefficient_shapes(coefs, fes)?;

    Ok(coefs
        .par_iter()
        .zip(fes.par_iter())
        .map(|(coef, fe)| {
            fe.refs()
                .mapv(|g| if g == 0 { f64::NAN } else { coef[g as usize - 1] })
        })
        .collect())
}

fn check_coefficient_shapes(coefs: &[Array1<f64>], fes: &[FixedEffect]) -> Result<()> {
    check_len("coefficient vectors", fes.len(), coefs.len())?;
    for (dimension, (coef, fe)) in coefs.iter().zip(fes).enumerate() {
        if coef.len() != fe.n_groups() {
            return Err(FixedEffectError::CoefficientShape {
                dimension,
                expected: fe.n_groups(),
                found: coef.len(),
            });
        }
    }
    Ok(())
}
