//! Connected components of fixed-effect groups.
//!
//! Two groups (possibly from different fixed effects) are connected when some
//! observation carries both labels. A component collects every group that can
//! be reached from another through a chain of such observations. Within a
//! component, unweighted fixed effects are only identified up to constants
//! that can be shifted between dimensions, which is what
//! [`normalize`](crate::normalize) resolves.
//!
//! The graph is never materialized. Each fixed effect gets a reverse index
//! (label → observations), and a worklist walks observations:
//!
//! ```text
//! obs    0  1  2  3
//! firm   1  1  2  2
//! year   1  2  3  3
//!
//! component 0: firm {1}, year {1, 2}   (obs 0, 1)
//! component 1: firm {2}, year {3}      (obs 2, 3)
//! ```

use crate::errors::{check_len, Result};
use crate::fixed_effect::FixedEffect;
use ndarray::ArrayView1;
use rayon::prelude::*;
use std::borrow::Borrow;
use tracing::debug;

// =============================================================================
// Component
// =============================================================================

/// One maximal set of mutually reachable groups.
///
/// `labels(q)` holds the labels of fixed effect `q` (sorted ascending) that
/// belong to this component. Across all components of one call, every
/// non-missing label of every fixed effect appears exactly once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Component {
    labels: Vec<Vec<u32>>,
}

impl Component {
    /// Labels of fixed effect `dimension` inside this component.
    #[inline]
    pub fn labels(&self, dimension: usize) -> &[u32] {
        &self.labels[dimension]
    }

    #[inline]
    pub fn n_dimensions(&self) -> usize {
        self.labels.len()
    }

    /// Total number of labels across all dimensions.
    pub fn n_labels(&self) -> usize {
        self.labels.iter().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u32]> {
        self.labels.iter().map(Vec::as_slice)
    }
}

// =============================================================================
// ReverseIndex
// =============================================================================

/// Observations grouped by label, stored as one arena with offsets.
///
/// `observations[starts[g]..starts[g + 1]]` lists, in increasing order, the
/// observations whose label is `g`.
struct ReverseIndex {
    observations: Vec<usize>,
    starts: Vec<usize>,
}

impl ReverseIndex {
    fn new(refs: ArrayView1<u32>, n_groups: usize) -> Self {
        // 1. Count frequencies (bucket 0 collects missing observations)
        let mut counts = vec![0usize; n_groups + 1];
        refs.iter().for_each(|&g| counts[g as usize] += 1);

        // 2. Prefix sums, prepended with 0
        let prefix_sum_iterator = counts.iter().scan(0, |acc, &count| {
            *acc += count;
            Some(*acc)
        });
        let starts: Vec<usize> = std::iter::once(0).chain(prefix_sum_iterator).collect();

        // 3. Scatter observations into their buckets
        let mut pos = starts[..counts.len()].to_vec();
        let mut observations = vec![0usize; refs.len()];
        for (i, &g) in refs.iter().enumerate() {
            observations[pos[g as usize]] = i;
            pos[g as usize] += 1;
        }

        Self {
            observations,
            starts,
        }
    }

    #[inline]
    fn observations(&self, label: u32) -> &[usize] {
        let g = label as usize;
        &self.observations[self.starts[g]..self.starts[g + 1]]
    }
}

// =============================================================================
// components
// =============================================================================

/// Find the connected components of `fes`.
///
/// Components are returned in the order of the smallest observation they
/// contain. Observations that are missing in every fixed effect belong to no
/// component. The traversal is an explicit worklist, so deep chains never
/// grow the call stack.
///
/// # Errors
///
/// `DimensionMismatch` if the records do not share one observation count.
pub fn components<F>(fes: &[F]) -> Result<Vec<Component>>
where
    F: Borrow<FixedEffect>,
{
    let fes: Vec<&FixedEffect> = fes.iter().map(<F as Borrow<FixedEffect>>::borrow).collect();
    let Some(first) = fes.first() else {
        return Ok(Vec::new());
    };
    let n_obs = first.len();
    for fe in &fes[1..] {
        check_len("fixed effect", n_obs, fe.len())?;
    }

    let refs: Vec<ArrayView1<u32>> = fes.iter().map(|fe| fe.refs()).collect();
    let reverse: Vec<ReverseIndex> = fes
        .par_iter()
        .map(|fe| ReverseIndex::new(fe.refs(), fe.n_groups()))
        .collect();

    // A label joins exactly one component, so "already in this component"
    // and "already in some component" are the same test.
    let mut label_taken: Vec<Vec<bool>> =
        fes.iter().map(|fe| vec![false; fe.n_groups() + 1]).collect();
    let mut visited = vec![false; n_obs];
    let mut worklist: Vec<usize> = Vec::new();
    let mut out = Vec::new();

    for seed in 0..n_obs {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;
        worklist.push(seed);

        let mut labels: Vec<Vec<u32>> = vec![Vec::new(); fes.len()];
        while let Some(obs) = worklist.pop() {
            for q in 0..fes.len() {
                let label = refs[q][obs];
                if label == 0 || label_taken[q][label as usize] {
                    continue;
                }
                label_taken[q][label as usize] = true;
                labels[q].push(label);

                for &other in reverse[q].observations(label) {
                    if !visited[other] {
                        visited[other] = true;
                        worklist.push(other);
                    }
                }
            }
        }

        if labels.iter().all(Vec::is_empty) {
            continue;
        }
        labels.iter_mut().for_each(|l| l.sort_unstable());
        out.push(Component { labels });
    }

    debug!(
        "Found {} connected components across {} fixed effects and {} observations",
        out.len(),
        fes.len(),
        n_obs
    );
    Ok(out)
}
