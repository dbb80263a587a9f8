use thiserror::Error;

/// Errors raised by the grouping, fixed-effect and normalization routines.
///
/// Every variant is a caller-input error. Missing observations are never
/// reported here; they travel as label `0`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FixedEffectError {
    #[error("Dimension mismatch for {what}: expected length {expected}, got {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Index {index} is out of bounds for extent {len}")]
    OutOfBounds { index: usize, len: usize },

    #[error("Grouping {n_obs} observations needs more than u32::MAX labels")]
    GroupCountOverflow { n_obs: usize },

    #[error("Coefficient vector {dimension} must have {expected} entries, got {found}")]
    CoefficientShape {
        dimension: usize,
        expected: usize,
        found: usize,
    },
}

pub type Result<T> = std::result::Result<T, FixedEffectError>;

/// Fail with `DimensionMismatch` unless `found == expected`.
#[inline]
pub(crate) fn check_len(what: &'static str, expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(FixedEffectError::DimensionMismatch {
            what,
            expected,
            found,
        });
    }
    Ok(())
}
