use crate::error::SweepResult;
use crate::state::StateVector;

/// Looks for the most recent earlier state matching `history[current]`.
///
/// Candidates are scanned from `current - 1` back to `current - max_period`
/// (clamped at 0) and the first hit wins, so the smallest period is always
/// reported. Returns `Ok(None)` when nothing matches, which is the normal outcome
/// early in a trajectory.
pub fn find_period(
    history: &[StateVector],
    current: usize,
    max_period: usize,
    tolerance: f64,
) -> SweepResult<Option<usize>> {
    let Some(latest) = history.get(current) else {
        return Ok(None);
    };
    let oldest = current.saturating_sub(max_period);
    for m in (oldest..current).rev() {
        if history[m].matches(latest, tolerance)? {
            return Ok(Some(current - m));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SweepError;

    fn history(values: &[f64]) -> Vec<StateVector> {
        values.iter().map(|&v| StateVector::new(vec![v])).collect()
    }

    #[test]
    fn finds_nearest_period_first() {
        // Period-3 cycle from index 2; index 0 repeats the value seen at the end
        // only at a much larger offset.
        let h = history(&[0.3, 9.0, 0.1, 0.2, 0.3, 0.1, 0.2, 0.3, 0.1, 0.2, 0.3]);
        let current = h.len() - 1;
        assert_eq!(find_period(&h, current, current, 1e-9).unwrap(), Some(3));
    }

    #[test]
    fn fixed_point_has_period_one() {
        let h = history(&[0.5, 0.7, 0.7]);
        assert_eq!(find_period(&h, 2, 5, 0.0).unwrap(), Some(1));
    }

    #[test]
    fn respects_max_period_window() {
        let h = history(&[0.1, 0.2, 0.3, 0.4, 0.1]);
        assert_eq!(find_period(&h, 4, 3, 1e-9).unwrap(), None);
        assert_eq!(find_period(&h, 4, 4, 1e-9).unwrap(), Some(4));
    }

    #[test]
    fn no_candidates_at_start_of_trajectory() {
        let h = history(&[0.1]);
        assert_eq!(find_period(&h, 0, 10, 1.0).unwrap(), None);
        assert_eq!(find_period(&h, 3, 10, 1.0).unwrap(), None);
    }

    #[test]
    fn uses_tolerance() {
        let h = history(&[0.1, 0.5, 0.1001]);
        assert_eq!(find_period(&h, 2, 2, 1e-5).unwrap(), None);
        assert_eq!(find_period(&h, 2, 2, 1e-3).unwrap(), Some(2));
    }

    #[test]
    fn propagates_length_mismatch() {
        let h = vec![StateVector::new(vec![0.0, 0.0]), StateVector::new(vec![0.0])];
        assert!(matches!(
            find_period(&h, 1, 1, 0.1),
            Err(SweepError::StateLengthMismatch { .. })
        ));
    }
}
