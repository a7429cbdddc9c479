use crate::error::{SweepError, SweepResult};
use crate::host::ObservableRegistry;
use serde::{Deserialize, Serialize};

/// Snapshot of every tracked observable at one time step, in registry order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateVector(Vec<f64>);

impl StateVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    /// Reads `handles` in order. Returns `None` when there is nothing to read or any
    /// handle fails to resolve; callers must treat that as a fatal state for the run.
    pub fn capture<R: ObservableRegistry + ?Sized>(registry: &R, handles: &[R::Handle]) -> Option<Self> {
        if handles.is_empty() {
            return None;
        }
        handles
            .iter()
            .map(|handle| registry.read(handle))
            .collect::<Option<Vec<f64>>>()
            .map(Self)
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Largest pointwise absolute difference.
    pub fn max_abs_diff(&self, other: &StateVector) -> SweepResult<f64> {
        self.check_len(other)?;
        Ok(self
            .0
            .iter()
            .zip(&other.0)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max))
    }

    /// Tolerance equality: every |a_i - b_i| <= tolerance. States of different
    /// length are rejected rather than compared.
    pub fn matches(&self, other: &StateVector, tolerance: f64) -> SweepResult<bool> {
        self.check_len(other)?;
        Ok(self
            .0
            .iter()
            .zip(&other.0)
            .all(|(a, b)| (a - b).abs() <= tolerance))
    }

    fn check_len(&self, other: &StateVector) -> SweepResult<()> {
        if self.0.len() != other.0.len() {
            return Err(SweepError::StateLengthMismatch {
                left: self.0.len(),
                right: other.0.len(),
            });
        }
        Ok(())
    }
}

impl From<Vec<f64>> for StateVector {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<Option<f64>>);

    impl ObservableRegistry for Fixed {
        type Handle = usize;

        fn list_observables(&self) -> Vec<usize> {
            (0..self.0.len()).collect()
        }

        fn read(&self, handle: &usize) -> Option<f64> {
            self.0.get(*handle).copied().flatten()
        }
    }

    #[test]
    fn tolerance_boundary_is_inclusive() {
        let a = StateVector::new(vec![0.0, 1.0]);
        let b = StateVector::new(vec![0.25, 1.0]);
        assert!(a.matches(&b, 0.25).unwrap());
        assert!(!a.matches(&b, 0.2499).unwrap());
        assert_eq!(a.max_abs_diff(&b).unwrap(), 0.25);
    }

    #[test]
    fn matches_iff_max_difference_within_tolerance() {
        let base = StateVector::new(vec![0.1, -0.4, 0.9]);
        let others = [
            vec![0.1, -0.4, 0.9],
            vec![0.11, -0.4, 0.9],
            vec![0.1, -0.35, 0.95],
            vec![-0.1, -0.4, 0.9],
        ];
        for values in others {
            let other = StateVector::new(values);
            for tol in [0.0, 0.01, 0.05, 0.2, 1.0] {
                let expected = base.max_abs_diff(&other).unwrap() <= tol;
                assert_eq!(base.matches(&other, tol).unwrap(), expected);
            }
        }
    }

    #[test]
    fn rejects_length_mismatch() {
        let a = StateVector::new(vec![0.0]);
        let b = StateVector::new(vec![0.0, 0.0]);
        let err = a.matches(&b, 1.0).unwrap_err();
        assert!(matches!(err, SweepError::StateLengthMismatch { left: 1, right: 2 }));
    }

    #[test]
    fn capture_reads_in_handle_order() {
        let registry = Fixed(vec![Some(1.0), Some(2.0), Some(3.0)]);
        let state = StateVector::capture(&registry, &[2, 0]).expect("state");
        assert_eq!(state.values(), &[3.0, 1.0]);
    }

    #[test]
    fn capture_fails_on_unreadable_or_empty() {
        let registry = Fixed(vec![Some(1.0), None]);
        assert!(StateVector::capture(&registry, &[0, 1]).is_none());
        assert!(StateVector::capture(&registry, &[]).is_none());
    }
}
