//! Weighted round robin with deficit correction.
//!
//! Each candidate carries a target weight and a running selection count.
//! The pick is the candidate whose observed share of selections is
//! furthest below its target share, which converges long-run frequencies
//! to the configured weights; the error per pick is bounded by the
//! largest single weight share.

/// Pick the next candidate from `(weight, count)` pairs.
///
/// The deficit `weight_i / totalWeight - count_i / totalCount` is compared
/// in exact integer arithmetic as `weight_i * totalCount - count_i *
/// totalWeight`, which orders identically and makes ties exact. Ties break
/// to the earliest candidate, so a pool with no selections yet yields the
/// first positive-weight candidate.
///
/// Zero-weight candidates are never picked, unless every candidate has
/// weight zero, in which case selection degrades to uniform round robin.
///
/// Returns `None` only for an empty slice.
pub(crate) fn pick(candidates: &[(u32, u64)]) -> Option<usize> {
    let total_weight: u64 = candidates.iter().map(|&(weight, _)| u64::from(weight)).sum();

    if total_weight == 0 {
        return candidates
            .iter()
            .enumerate()
            .min_by_key(|&(_, &(_, count))| count)
            .map(|(index, _)| index);
    }

    let total_count: u64 = candidates.iter().map(|&(_, count)| count).sum();

    let mut best: Option<(usize, i128)> = None;
    for (index, &(weight, count)) in candidates.iter().enumerate() {
        if weight == 0 {
            continue;
        }

        let deficit = i128::from(weight) * i128::from(total_count)
            - i128::from(count) * i128::from(total_weight);

        if best.is_none_or(|(_, best_deficit)| deficit > best_deficit) {
            best = Some((index, deficit));
        }
    }

    best.map(|(index, _)| index)
}
