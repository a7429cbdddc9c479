use crate::traits::{DynamicalSystem, Scalar, Steppable};
use serde::{Deserialize, Serialize};

/// Selects how an equation-driven host advances its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepperKind {
    /// x_{n+1} = f(x_n)
    Map,
    /// One classic Runge-Kutta step of the flow dx/dt = f(x).
    Rk4,
}

impl StepperKind {
    pub(crate) fn build(self, dim: usize) -> Stepper {
        match self {
            StepperKind::Map => Stepper::Map(DiscreteMap::new(dim)),
            StepperKind::Rk4 => Stepper::Rk4(RK4::new(dim)),
        }
    }
}

pub(crate) enum Stepper {
    Map(DiscreteMap<f64>),
    Rk4(RK4<f64>),
}

impl Stepper {
    pub(crate) fn step(
        &mut self,
        system: &impl DynamicalSystem<f64>,
        t: &mut f64,
        state: &mut [f64],
        dt: f64,
    ) {
        match self {
            Stepper::Map(s) => s.step(system, t, state, dt),
            Stepper::Rk4(s) => s.step(system, t, state, dt),
        }
    }
}

/// Classic Runge-Kutta 4th order integrator with preallocated stage buffers.
pub struct RK4<T: Scalar> {
    stages: [Vec<T>; 4],
    tmp: Vec<T>,
}

impl<T: Scalar> RK4<T> {
    pub fn new(dim: usize) -> Self {
        let z = T::zero();
        Self {
            stages: [vec![z; dim], vec![z; dim], vec![z; dim], vec![z; dim]],
            tmp: vec![z; dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for RK4<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let one = T::one();
        let two = one + one;
        let half = one / two;
        let sixth = one / (two + two + two);
        let t0 = *t;
        let [k1, k2, k3, k4] = &mut self.stages;

        system.apply(t0, state, k1);

        for (tmp, (&x, &k)) in self.tmp.iter_mut().zip(state.iter().zip(k1.iter())) {
            *tmp = x + dt * k * half;
        }
        system.apply(t0 + dt * half, &self.tmp, k2);

        for (tmp, (&x, &k)) in self.tmp.iter_mut().zip(state.iter().zip(k2.iter())) {
            *tmp = x + dt * k * half;
        }
        system.apply(t0 + dt * half, &self.tmp, k3);

        for (tmp, (&x, &k)) in self.tmp.iter_mut().zip(state.iter().zip(k3.iter())) {
            *tmp = x + dt * k;
        }
        system.apply(t0 + dt, &self.tmp, k4);

        for i in 0..state.len() {
            state[i] = state[i] + dt * sixth * (k1[i] + two * k2[i] + two * k3[i] + k4[i]);
        }

        *t = t0 + dt;
    }
}

/// Iterates a map once per step; `t` counts iterations in units of `dt`.
pub struct DiscreteMap<T: Scalar> {
    next: Vec<T>,
}

impl<T: Scalar> DiscreteMap<T> {
    pub fn new(dim: usize) -> Self {
        Self {
            next: vec![T::zero(); dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for DiscreteMap<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        system.apply(*t, state, &mut self.next);
        state.copy_from_slice(&self.next);
        *t = *t + dt;
    }
}
