//! Integer partitions of categorical columns.
//!
//! A [`GroupedArray`] labels every observation with a dense group code in
//! `1..=n`, reserving `0` for observations that are missing. Several columns
//! are grouped jointly by folding them into a mixed-radix code and then
//! factorizing the (sparse) result back into a dense range:
//!
//! ```text
//! a      = [1, 1, 2, 0]     n = 2
//! b      = [1, 2, 1, 1]     n = 2
//! a ⊗ b  = [1, 3, 2, 0]     n = 4   (a + (b - 1) * 2)
//! dense  = [1, 2, 3, 0]     n = 3
//! ```

use crate::errors::{check_len, FixedEffectError, Result};
use ndarray::{Array1, ArrayView1};
use rayon::prelude::*;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;

// =============================================================================
// GroupedArray
// =============================================================================

/// Dense integer labelling of observations.
///
/// `refs[i] == 0` marks observation `i` as missing; every other value lies in
/// `1..=n` and each of them occurs at least once. Labels carry no meaning
/// outside the instance that produced them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupedArray {
    refs: Array1<u32>,
    n: usize,
}

impl GroupedArray {
    /// Relabel arbitrary codes into a dense partition (first-seen order, `0` kept).
    pub fn from_refs(refs: ArrayView1<u32>) -> Result<Self> {
        let codes: Vec<u64> = refs.iter().map(|&r| r as u64).collect();
        let n = refs.iter().copied().max().unwrap_or(0) as u64;
        factorize(&codes, n)
    }

    /// Group labels, `0` for missing.
    #[inline]
    pub fn refs(&self) -> ArrayView1<'_, u32> {
        self.refs.view()
    }

    /// Number of distinct non-missing groups.
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

    pub fn into_refs(self) -> Array1<u32> {
        self.refs
    }

    /// Jointly group `self` and `other`; a row is missing if it is missing in either.
    pub fn combine(&self, other: &GroupedArray) -> Result<GroupedArray> {
        group_many([self.clone(), other.clone()])
    }
}

// =============================================================================
// Inputs
// =============================================================================

/// One categorical column, resolved once at the API boundary.
#[derive(Debug)]
pub enum GroupInput<'a, T> {
    /// Raw values; `None` is missing. Labels are derived by hashing.
    Raw(&'a [Option<T>]),
    /// A column that already carries a categorical coding.
    ///
    /// `codes[i]` is a 1-based index into `pool`, `0` is missing. Pool slots
    /// holding `None` are missing as well. The codes are reused through a
    /// pool-sized lookup table, so values are never hashed.
    Coded {
        codes: &'a [u32],
        pool: &'a [Option<T>],
    },
}

impl<T> Clone for GroupInput<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for GroupInput<'_, T> {}

impl<T> GroupInput<'_, T> {
    pub fn len(&self) -> usize {
        match self {
            GroupInput::Raw(values) => values.len(),
            GroupInput::Coded { codes, .. } => codes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Grouping
// =============================================================================

/// Group a single column.
///
/// Labels are assigned in first-seen order starting at 1.
pub fn group<T: Hash + Eq>(input: GroupInput<'_, T>) -> Result<GroupedArray> {
    let n_obs = input.len();
    if n_obs > u32::MAX as usize {
        return Err(FixedEffectError::GroupCountOverflow { n_obs });
    }

    match input {
        GroupInput::Raw(values) => Ok(group_raw(values)),
        GroupInput::Coded { codes, pool } => group_coded(codes, pool),
    }
}

fn group_raw<T: Hash + Eq>(values: &[Option<T>]) -> GroupedArray {
    let mut labels: HashMap<&T, u32> = HashMap::new();
    let mut refs = Array1::<u32>::zeros(values.len());

    for (r, value) in refs.iter_mut().zip(values) {
        let Some(value) = value else { continue };
        let next = labels.len() as u32 + 1;
        *r = *labels.entry(value).or_insert(next);
    }

    GroupedArray {
        refs,
        n: labels.len(),
    }
}

fn group_coded<T>(codes: &[u32], pool: &[Option<T>]) -> Result<GroupedArray> {
    // lookup[c] is the dense label of pool slot c, 0 while unseen
    let mut lookup = vec![0u32; pool.len() + 1];
    let mut refs = Array1::<u32>::zeros(codes.len());
    let mut n = 0u32;

    for (r, &code) in refs.iter_mut().zip(codes) {
        if code == 0 {
            continue;
        }
        let slot = code as usize;
        match pool.get(slot - 1) {
            None => {
                return Err(FixedEffectError::OutOfBounds {
                    index: slot,
                    len: pool.len(),
                })
            }
            Some(None) => continue,
            Some(Some(_)) => {}
        }
        if lookup[slot] == 0 {
            n += 1;
            lookup[slot] = n;
        }
        *r = lookup[slot];
    }

    Ok(GroupedArray {
        refs,
        n: n as usize,
    })
}

/// Group 0-based factorization codes, negative codes being missing.
///
/// Codes such as those of `pandas.factorize` are already a categorical
/// coding, so they go through the coded path with a pool of one slot per
/// level instead of being hashed.
pub fn group_factorized(codes: ArrayView1<i64>) -> Result<GroupedArray> {
    let mut shifted = Vec::with_capacity(codes.len());
    let mut n_levels = 0usize;
    for &c in codes {
        if c < 0 {
            shifted.push(0);
            continue;
        }
        let code = u32::try_from(c)
            .ok()
            .and_then(|c| c.checked_add(1))
            .ok_or(FixedEffectError::OutOfBounds {
                index: c as usize,
                len: u32::MAX as usize,
            })?;
        n_levels = n_levels.max(code as usize);
        shifted.push(code);
    }

    let pool = vec![Some(()); n_levels];
    group(GroupInput::Coded {
        codes: &shifted,
        pool: &pool,
    })
}

/// Group several columns of possibly different types, already grouped one by one.
///
/// The result distinguishes every observed combination of labels. A row
/// missing in any column is missing in the result.
pub fn group_many<I>(groups: I) -> Result<GroupedArray>
where
    I: IntoIterator<Item = GroupedArray>,
{
    let mut groups = groups.into_iter();
    let Some(first) = groups.next() else {
        return Ok(GroupedArray {
            refs: Array1::zeros(0),
            n: 0,
        });
    };

    let Some(second) = groups.next() else {
        return Ok(first);
    };

    let mut combiner = Combiner::start(&first);
    for g in std::iter::once(second).chain(groups) {
        check_len("grouped column", first.len(), g.len())?;
        combiner.absorb(&g)?;
    }
    combiner.finish()
}

/// Group several same-typed columns, hashing each column on its own rayon task.
pub fn group_columns<T>(columns: &[GroupInput<'_, T>]) -> Result<GroupedArray>
where
    T: Hash + Eq + Sync,
{
    if let Some(first) = columns.first() {
        for column in &columns[1..] {
            check_len("grouped column", first.len(), column.len())?;
        }
    }

    let grouped = columns
        .par_iter()
        .map(|&column| group(column))
        .collect::<Result<Vec<_>>>()?;

    group_many(grouped)
}

// =============================================================================
// Combiner
// =============================================================================

/// Mixed-radix accumulator owned by one fold.
///
/// Codes are kept in `u64`. When the next product of group counts would not
/// fit, the accumulator is factorized first, which bounds `n` by the number of
/// observations.
struct Combiner {
    codes: Vec<u64>,
    n: u64,
}

impl Combiner {
    fn start(g: &GroupedArray) -> Self {
        Self {
            codes: g.refs.iter().map(|&r| r as u64).collect(),
            n: g.n as u64,
        }
    }

    fn absorb(&mut self, g: &GroupedArray) -> Result<()> {
        let g_n = g.n as u64;
        let n = match self.n.checked_mul(g_n) {
            Some(n) => n,
            None => {
                self.compact()?;
                self.n
                    .checked_mul(g_n)
                    .ok_or(FixedEffectError::GroupCountOverflow {
                        n_obs: self.codes.len(),
                    })?
            }
        };

        let radix = self.n;
        for (code, &r) in self.codes.iter_mut().zip(g.refs.iter()) {
            *code = if *code == 0 || r == 0 {
                0
            } else {
                *code + (r as u64 - 1) * radix
            };
        }
        self.n = n;
        Ok(())
    }

    fn compact(&mut self) -> Result<()> {
        let dense = factorize(&self.codes, self.n)?;
        self.codes = dense.refs.iter().map(|&r| r as u64).collect();
        self.n = dense.n as u64;
        Ok(())
    }

    fn finish(self) -> Result<GroupedArray> {
        factorize(&self.codes, self.n)
    }
}

/// Relabel sparse codes in `0..=n` into a dense `1..=k` range, first-seen order.
fn factorize(codes: &[u64], n: u64) -> Result<GroupedArray> {
    let n_obs = codes.len();
    let mut refs = Array1::<u32>::zeros(n_obs);
    let mut k = 0u32;

    let fresh = |k: &mut u32| -> Result<u32> {
        *k = k
            .checked_add(1)
            .ok_or(FixedEffectError::GroupCountOverflow { n_obs })?;
        Ok(*k)
    };

    // A table indexed by code beats hashing while the code space stays small.
    if n <= (n_obs as u64).saturating_mul(4) {
        let mut lookup = vec![0u32; n as usize + 1];
        for (r, &code) in refs.iter_mut().zip(codes) {
            if code == 0 {
                continue;
            }
            let slot = &mut lookup[code as usize];
            if *slot == 0 {
                *slot = fresh(&mut k)?;
            }
            *r = *slot;
        }
    } else {
        let mut lookup: HashMap<u64, u32> = HashMap::new();
        for (r, &code) in refs.iter_mut().zip(codes) {
            if code == 0 {
                continue;
            }
            *r = match lookup.entry(code) {
                Entry::Occupied(e) => *e.get(),
                Entry::Vacant(e) => *e.insert(fresh(&mut k)?),
            };
        }
    }

    Ok(GroupedArray {
        refs,
        n: k as usize,
    })
}
