use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// Numeric type usable as a state or parameter value of an equation-driven system.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// A right-hand side that can be iterated (map) or integrated (flow).
pub trait DynamicalSystem<T: Scalar> {
    /// Number of state variables.
    fn dimension(&self) -> usize;

    /// Writes f(t, x) into `out`. For maps this is the next iterate, for flows dx/dt.
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// Advances a state vector in place by one step of a `DynamicalSystem`.
pub trait Steppable<T: Scalar> {
    /// `t` and `state` are updated after the step. Maps ignore `dt` apart from
    /// advancing `t`.
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T);
}
