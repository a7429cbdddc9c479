use crate::state::StateVector;

/// Positions this close outside the range still land in the first or last cell.
const EDGE_SLACK: f64 = 1e-9;

/// Discretises a continuous range into `resolution` 1-based cells, cell `k`
/// centred on `min + (k - 1) * increment`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputBuckets {
    pub min: f64,
    pub max: f64,
    pub resolution: usize,
}

impl OutputBuckets {
    pub fn new(min: f64, max: f64, resolution: usize) -> Self {
        Self { min, max, resolution }
    }

    pub fn increment(&self) -> f64 {
        (self.max - self.min) / self.resolution.saturating_sub(1).max(1) as f64
    }

    /// Cell for `value`, rounding half up; `None` outside `[min, max]`. Works for
    /// descending ranges too.
    pub fn bucket(&self, value: f64) -> Option<usize> {
        let last = self.resolution.saturating_sub(1) as f64;
        let position = (value - self.min) / self.increment();
        if !(-EDGE_SLACK..=last + EDGE_SLACK).contains(&position) {
            return None;
        }
        let index = (position + 0.5).floor().clamp(0.0, last);
        Some(index as usize + 1)
    }

    /// Centre value of a 1-based cell.
    pub fn level(&self, bucket: usize) -> f64 {
        self.min + bucket.saturating_sub(1) as f64 * self.increment()
    }
}

/// Rounds half away from zero to `digits` decimals. Values too large to scale
/// come back unchanged.
pub fn round_to_digits(value: f64, digits: u32) -> f64 {
    let scale = 10f64.powi(digits.min(i32::MAX as u32) as i32);
    let scaled = value * scale;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round() / scale
}

/// How an attractor state is placed back onto a swept axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AxisProjection {
    /// The axis' first target is itself observed; read it from the state.
    Observable(usize),
    /// The target is a pure parameter; use the value applied at this point.
    Parameter,
}

impl AxisProjection {
    pub(crate) fn value(&self, state: &StateVector, applied: f64) -> f64 {
        match self {
            AxisProjection::Observable(index) => state.values().get(*index).copied().unwrap_or(applied),
            AxisProjection::Parameter => applied,
        }
    }
}

/// Grid shape for one sweep. Bidirectional sweeps get a second bank of layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GridLayout {
    pub width: usize,
    pub height: usize,
    pub layers: usize,
    pub banks: usize,
}

impl GridLayout {
    pub(crate) fn depth(&self) -> usize {
        self.layers * self.banks
    }

    pub(crate) fn layer(&self, bank: usize, layer: usize) -> usize {
        bank * self.layers + layer
    }

    /// Every layer index belonging to `bank`.
    pub(crate) fn bank_layers(&self, bank: usize) -> std::ops::Range<usize> {
        bank * self.layers..(bank + 1) * self.layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_round_half_up() {
        let buckets = OutputBuckets::new(0.0, 1.0, 11);
        assert_eq!(buckets.bucket(0.0), Some(1));
        assert_eq!(buckets.bucket(0.04), Some(1));
        assert_eq!(buckets.bucket(0.05), Some(2));
        assert_eq!(buckets.bucket(0.6), Some(7));
        assert_eq!(buckets.bucket(1.0), Some(11));
        assert!((buckets.level(7) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn values_outside_range_are_dropped() {
        let buckets = OutputBuckets::new(-1.0, 1.0, 5);
        assert_eq!(buckets.bucket(-1.01), None);
        assert_eq!(buckets.bucket(1.2), None);
        assert_eq!(buckets.bucket(f64::NAN), None);
    }

    #[test]
    fn descending_ranges_map_from_the_minimum() {
        let buckets = OutputBuckets::new(1.0, 0.0, 3);
        assert_eq!(buckets.bucket(1.0), Some(1));
        assert_eq!(buckets.bucket(0.5), Some(2));
        assert_eq!(buckets.bucket(0.0), Some(3));
        assert_eq!(buckets.bucket(1.5), None);
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round_to_digits(0.125, 2), 0.13);
        assert_eq!(round_to_digits(-0.125, 2), -0.13);
        assert_eq!(round_to_digits(2.4, 0), 2.0);
    }

    #[test]
    fn rounding_never_produces_nan() {
        assert_eq!(round_to_digits(0.5, 400), 0.5);
        assert_eq!(round_to_digits(1e300, 15), 1e300);
        assert_eq!(round_to_digits(-0.25, 15), -0.25);
    }

    #[test]
    fn projection_falls_back_to_applied_value() {
        let state = StateVector::new(vec![0.25, 0.75]);
        assert_eq!(AxisProjection::Observable(1).value(&state, 9.0), 0.75);
        assert_eq!(AxisProjection::Observable(5).value(&state, 9.0), 9.0);
        assert_eq!(AxisProjection::Parameter.value(&state, 9.0), 9.0);
    }

    #[test]
    fn layout_banks() {
        let layout = GridLayout {
            width: 4,
            height: 3,
            layers: 3,
            banks: 2,
        };
        assert_eq!(layout.depth(), 6);
        assert_eq!(layout.layer(1, 2), 5);
        assert_eq!(layout.bank_layers(1), 3..6);
    }
}
