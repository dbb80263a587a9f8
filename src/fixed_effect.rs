//! Fixed effect records: a group labelling plus a per-observation interaction.

use crate::errors::{check_len, FixedEffectError, Result};
use crate::group::GroupedArray;
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

/// Per-observation multiplier applied to a fixed effect's indicator.
#[derive(Clone, Debug, PartialEq)]
pub enum Interaction {
    /// Implicit all-ones weight. Nothing is materialized, and a record using it
    /// takes part in coefficient normalization, unlike an explicit array of ones.
    Unit,
    /// Explicit weights (e.g. fixed effect × continuous covariate).
    Values(Array1<f64>),
}

/// A categorical dimension absorbed from a regression.
///
/// `refs` uses the same convention as [`GroupedArray`]: `0` is missing,
/// other labels lie in `1..=n`. Records are immutable; restricting to a
/// sample returns a new record.
#[derive(Clone, Debug, PartialEq)]
pub struct FixedEffect {
    refs: Array1<u32>,
    interaction: Interaction,
    n: usize,
}

impl FixedEffect {
    /// Unweighted fixed effect over a grouping.
    pub fn new(grouped: GroupedArray) -> Self {
        let n = grouped.n_groups();
        Self {
            refs: grouped.into_refs(),
            interaction: Interaction::Unit,
            n,
        }
    }

    /// Fixed effect interacted with a continuous series.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if `interaction` and the grouping differ in length.
    pub fn with_interaction(grouped: GroupedArray, interaction: Array1<f64>) -> Result<Self> {
        check_len("interaction", grouped.len(), interaction.len())?;
        let n = grouped.n_groups();
        Ok(Self {
            refs: grouped.into_refs(),
            interaction: Interaction::Values(interaction),
            n,
        })
    }

    /// Build a record from labels that must be kept as they are, e.g. labels
    /// that already index an external coefficient vector.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if a label exceeds `n`, `DimensionMismatch` if the
    /// interaction has the wrong length.
    pub fn from_labels(
        refs: Array1<u32>,
        n: usize,
        interaction: Option<Array1<f64>>,
    ) -> Result<Self> {
        if let Some(&max) = refs.iter().max() {
            if max as usize > n {
                return Err(FixedEffectError::OutOfBounds {
                    index: max as usize,
                    len: n,
                });
            }
        }
        let interaction = match interaction {
            Some(values) => {
                check_len("interaction", refs.len(), values.len())?;
                Interaction::Values(values)
            }
            None => Interaction::Unit,
        };
        Ok(Self {
            refs,
            interaction,
            n,
        })
    }

    /// One record per column of an `(n_obs, n_fe)` label matrix.
    ///
    /// `n_groups[q]`, when given, fixes the group count of column `q`;
    /// otherwise it is the largest label. `interactions`, when given, must
    /// hold one entry per column, `None` for the unit weight.
    pub fn from_columns(
        refs: ArrayView2<u32>,
        n_groups: Option<&[usize]>,
        interactions: Option<Vec<Option<Array1<f64>>>>,
    ) -> Result<Vec<Self>> {
        let n_fe = refs.ncols();
        if let Some(n) = n_groups {
            check_len("coefficient vectors", n_fe, n.len())?;
        }
        let interactions = match interactions {
            Some(v) => {
                check_len("interactions", n_fe, v.len())?;
                v
            }
            None => vec![None; n_fe],
        };

        refs.axis_iter(Axis(1))
            .zip(interactions)
            .enumerate()
            .map(|(q, (col, interaction))| {
                let n = match n_groups {
                    Some(n) => n[q],
                    None => col.iter().copied().max().unwrap_or(0) as usize,
                };
                Self::from_labels(col.to_owned(), n, interaction)
            })
            .collect()
    }

    #[inline]
    pub fn refs(&self) -> ArrayView1<'_, u32> {
        self.refs.view()
    }

    #[inline]
    pub fn interaction(&self) -> &Interaction {
        &self.interaction
    }

    /// Number of groups; coefficient vectors for this record have this length.
    #[inline]
    pub fn n_groups(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// True when the record uses the implicit unit weight.
    #[inline]
    pub fn is_unweighted(&self) -> bool {
        matches!(self.interaction, Interaction::Unit)
    }

    /// Interaction value of observation `i`.
    #[inline]
    pub fn weight(&self, i: usize) -> f64 {
        match &self.interaction {
            Interaction::Unit => 1.0,
            Interaction::Values(values) => values[i],
        }
    }

    /// Materialized interaction series.
    pub fn interaction_values(&self) -> Array1<f64> {
        match &self.interaction {
            Interaction::Unit => Array1::ones(self.len()),
            Interaction::Values(values) => values.clone(),
        }
    }

    /// Restrict to the observations in `indices`, keeping `n`.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` for the first index past the end of the record.
    pub fn select(&self, indices: &[usize]) -> Result<Self> {
        let len = self.len();
        if let Some(&index) = indices.iter().find(|&&i| i >= len) {
            return Err(FixedEffectError::OutOfBounds { index, len });
        }

        let interaction = match &self.interaction {
            Interaction::Unit => Interaction::Unit,
            Interaction::Values(values) => Interaction::Values(values.select(Axis(0), indices)),
        };
        Ok(Self {
            refs: self.refs.select(Axis(0), indices),
            interaction,
            n: self.n,
        })
    }

    /// Restrict to the observations where `mask` is true, keeping `n`.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if the mask does not cover exactly the record's observations.
    pub fn select_mask(&self, mask: &[bool]) -> Result<Self> {
        if mask.len() != self.len() {
            return Err(FixedEffectError::OutOfBounds {
                index: mask.len(),
                len: self.len(),
            });
        }
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &keep)| keep.then_some(i))
            .collect();
        self.select(&indices)
    }
}
