use crate::components::components;
use crate::errors::{FixedEffectError, Result};
use crate::fixed_effect::FixedEffect;
use crate::group::{group_factorized, group_many};
use crate::normalize::{full, normalize};
use crate::singletons::detect_singletons;
use crate::solver::{solve_residuals_columns, SolverConfig};
use ndarray::{Array1, ArrayView2};
use numpy::{IntoPyArray, PyArray1, PyArray2, PyReadonlyArray1, PyReadonlyArray2};
use pyo3::exceptions::{PyIndexError, PyValueError};
use pyo3::prelude::*;

impl From<FixedEffectError> for PyErr {
    fn from(err: FixedEffectError) -> PyErr {
        match err {
            FixedEffectError::OutOfBounds { .. } => PyIndexError::new_err(err.to_string()),
            _ => PyValueError::new_err(err.to_string()),
        }
    }
}

/// One `FixedEffect` per column of `refs`, converting the interactions.
fn fixed_effects_from(
    refs: ArrayView2<u32>,
    n_groups: Option<&[usize]>,
    interactions: Option<Vec<Option<PyReadonlyArray1<f64>>>>,
) -> Result<Vec<FixedEffect>> {
    let interactions = interactions.map(|v| {
        v.iter()
            .map(|w| w.as_ref().map(|w| w.as_array().to_owned()))
            .collect()
    });
    FixedEffect::from_columns(refs, n_groups, interactions)
}

/// Jointly group several categorical columns.
///
/// Parameters
/// ----------
/// columns : list of numpy.ndarray (int64)
///     Codes as returned by `pandas.factorize`; `-1` marks missing values.
///
/// Returns
/// -------
/// (refs, n) : (numpy.ndarray[uint32], int)
///     Dense labels in `1..=n`, `0` where any column is missing.
#[pyfunction]
pub fn _group_rs<'py>(
    py: Python<'py>,
    columns: Vec<PyReadonlyArray1<'py, i64>>,
) -> PyResult<(Bound<'py, PyArray1<u32>>, usize)> {
    let grouped = columns
        .iter()
        .map(|c| group_factorized(c.as_array()))
        .collect::<Result<Vec<_>>>()?;
    let g = group_many(grouped)?;
    let n = g.n_groups();
    Ok((g.into_refs().into_pyarray(py), n))
}

/// Connected components of the fixed effects in `refs` (n_obs, n_fe).
///
/// Returns one list per component holding, for every fixed effect, the
/// array of labels in that component.
#[pyfunction]
pub fn _components_rs<'py>(
    py: Python<'py>,
    refs: PyReadonlyArray2<'py, u32>,
) -> PyResult<Vec<Vec<Bound<'py, PyArray1<u32>>>>> {
    let fes = fixed_effects_from(refs.as_array(), None, None)?;
    let cc = py.allow_threads(|| components(&fes))?;
    Ok(cc
        .iter()
        .map(|c| c.iter().map(|labels| labels.to_vec().into_pyarray(py)).collect())
        .collect())
}

/// Normalize raw coefficient vectors.
///
/// `coefs[q][g - 1]` is the coefficient of label `g` in column `q` of `refs`.
/// `interactions[q]` is `None` for unweighted fixed effects.
#[pyfunction]
#[pyo3(signature = (coefs, refs, interactions=None))]
pub fn _normalize_rs<'py>(
    py: Python<'py>,
    coefs: Vec<PyReadonlyArray1<'py, f64>>,
    refs: PyReadonlyArray2<'py, u32>,
    interactions: Option<Vec<Option<PyReadonlyArray1<'py, f64>>>>,
) -> PyResult<Vec<Bound<'py, PyArray1<f64>>>> {
    let coefs: Vec<Array1<f64>> = coefs.iter().map(|c| c.as_array().to_owned()).collect();
    let n_groups: Vec<usize> = coefs.iter().map(|c| c.len()).collect();
    let fes = fixed_effects_from(refs.as_array(), Some(&n_groups), interactions)?;

    let normalized = py.allow_threads(|| normalize(coefs, &fes))?;
    Ok(normalized.into_iter().map(|c| c.into_pyarray(py)).collect())
}

/// Expand coefficient vectors to one value per observation (`nan` if missing).
#[pyfunction]
pub fn _full_rs<'py>(
    py: Python<'py>,
    coefs: Vec<PyReadonlyArray1<'py, f64>>,
    refs: PyReadonlyArray2<'py, u32>,
) -> PyResult<Vec<Bound<'py, PyArray1<f64>>>> {
    let coefs: Vec<Array1<f64>> = coefs.iter().map(|c| c.as_array().to_owned()).collect();
    let n_groups: Vec<usize> = coefs.iter().map(|c| c.len()).collect();
    let fes = fixed_effects_from(refs.as_array(), Some(&n_groups), None)?;

    let expanded = full(&coefs, &fes)?;
    Ok(expanded.into_iter().map(|c| c.into_pyarray(py)).collect())
}

/// Flag observations that are singletons in some fixed effect.
#[pyfunction]
pub fn _detect_singletons_rs<'py>(
    py: Python<'py>,
    refs: PyReadonlyArray2<'py, u32>,
) -> PyResult<Bound<'py, PyArray1<bool>>> {
    let fes = fixed_effects_from(refs.as_array(), None, None)?;
    let mask = py.allow_threads(|| detect_singletons(&fes))?;
    Ok(mask.into_pyarray(py))
}

/// Residualize every column of `x` on the fixed effects in `refs`.
///
/// Returns `(residuals, success)`.
#[pyfunction]
#[pyo3(signature = (x, refs, weights=None, tol=1e-8, maxiter=10_000))]
pub fn _solve_residuals_rs<'py>(
    py: Python<'py>,
    x: PyReadonlyArray2<'py, f64>,
    refs: PyReadonlyArray2<'py, u32>,
    weights: Option<PyReadonlyArray1<'py, f64>>,
    tol: f64,
    maxiter: usize,
) -> PyResult<(Bound<'py, PyArray2<f64>>, bool)> {
    let fes = fixed_effects_from(refs.as_array(), None, None)?;
    let x_arr = x.as_array();
    let weights_arr = weights.as_ref().map(|w| w.as_array());
    let config = SolverConfig { tol, maxiter };

    let result =
        py.allow_threads(|| solve_residuals_columns(&fes, x_arr, weights_arr, &config))?;
    Ok((result.residuals.into_pyarray(py), result.success))
}

#[pymodule]
fn fixed_effects_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(_group_rs, m)?)?;
    m.add_function(wrap_pyfunction!(_components_rs, m)?)?;
    m.add_function(wrap_pyfunction!(_normalize_rs, m)?)?;
    m.add_function(wrap_pyfunction!(_full_rs, m)?)?;
    m.add_function(wrap_pyfunction!(_detect_singletons_rs, m)?)?;
    m.add_function(wrap_pyfunction!(_solve_residuals_rs, m)?)?;
    Ok(())
}
