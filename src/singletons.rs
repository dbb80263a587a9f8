use crate::errors::{check_len, Result};
use crate::fixed_effect::FixedEffect;
use ndarray::Array1;
use tracing::debug;

/// Detect observations that are alone in their group for some fixed effect.
///
/// # Arguments
/// * `fes` - Fixed effects over the same observations.
///
/// # Returns
/// A boolean array of length `n_obs`, true for singleton observations.
///
/// # Notes
/// The fixed effects are scanned repeatedly. Dropping a singleton in one
/// dimension can leave another observation alone in a different dimension,
/// so the scan stops only once a full pass removes nothing. Missing labels
/// (`0`) never form a group, and observations missing everywhere are not
/// flagged.
pub fn detect_singletons(fes: &[FixedEffect]) -> Result<Array1<bool>> {
    let Some(first) = fes.first() else {
        return Ok(Array1::from_elem(0, false));
    };
    let n_obs = first.len();
    for fe in &fes[1..] {
        check_len("fixed effect", n_obs, fe.len())?;
    }

    let max_groups = fes.iter().map(FixedEffect::n_groups).max().unwrap_or(0);
    let mut counts = vec![0u32; max_groups + 1];

    // Track non-singleton indices
    let mut non_singletons: Vec<usize> = (0..n_obs).collect();
    let mut n_non_singletons = n_obs;
    let mut n_passes = 0usize;

    loop {
        let n_non_singletons_curr = n_non_singletons;
        n_passes += 1;

        for fe in fes {
            let refs = fe.refs();
            counts.iter_mut().for_each(|c| *c = 0);

            // Count occurrences and track singleton count
            let mut n_singletons: i64 = 0;
            for &idx in &non_singletons[..n_non_singletons] {
                let e = refs[idx] as usize;
                if e == 0 {
                    continue;
                }
                let c = counts[e];
                // +1 when a group is first seen, -1 when it stops being a singleton
                n_singletons += (c == 0) as i64 - (c == 1) as i64;
                counts[e] += 1;
            }

            if n_singletons == 0 {
                continue;
            }

            // Compact the surviving observations in place
            let mut cnt = 0;
            for i in 0..n_non_singletons {
                let idx = non_singletons[i];
                let e = refs[idx] as usize;
                if e == 0 || counts[e] != 1 {
                    non_singletons[cnt] = idx;
                    cnt += 1;
                }
            }
            n_non_singletons = cnt;
        }

        if n_non_singletons_curr == n_non_singletons {
            break;
        }
    }

    let mut is_singleton = Array1::from_elem(n_obs, true);
    for &idx in &non_singletons[..n_non_singletons] {
        is_singleton[idx] = false;
    }

    debug!(
        "Flagged {} singleton observations in {} passes",
        n_obs - n_non_singletons,
        n_passes
    );
    Ok(is_singleton)
}
