//! Collaborator interfaces through which the sweep engine drives a dynamical system
//! it does not own, plus stock implementations for hosts without an event loop.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Ordered, readable scalar observables of a system. The order returned by
/// `list_observables` must be identical for every call during a sweep.
pub trait ObservableRegistry {
    type Handle: Clone + PartialEq + Debug;

    fn list_observables(&self) -> Vec<Self::Handle>;

    /// `None` if the handle does not resolve to a value.
    fn read(&self, handle: &Self::Handle) -> Option<f64>;
}

/// Writable scalars: sweep targets and the values making up the system configuration.
pub trait ParameterTarget: ObservableRegistry {
    /// Handles whose values form the restorable configuration (biases, weights, ...).
    fn list_parameters(&self) -> Vec<Self::Handle>;

    /// Returns false if the handle cannot be written.
    fn write(&mut self, handle: &Self::Handle, value: f64) -> bool;
}

pub trait SystemStepper {
    /// Advances the system by exactly one discrete time unit.
    fn step(&mut self);

    /// Propagates externally written parameters before the next step.
    fn notify_parameters_changed(&mut self) -> anyhow::Result<()>;

    /// Full external reset, e.g. re-initialising an attached simulation.
    fn reset(&mut self);
}

/// Save/restore of the complete dynamical state.
pub trait ActivationSnapshot {
    type Snapshot: Clone;

    fn capture(&self) -> Self::Snapshot;
    fn restore(&mut self, snapshot: &Self::Snapshot);
}

/// Everything the engine needs from the system under test.
pub trait DynamicsHost: ParameterTarget + SystemStepper + ActivationSnapshot {}

impl<T: ParameterTarget + SystemStepper + ActivationSnapshot> DynamicsHost for T {}

pub trait CancellationSource {
    fn is_active(&self) -> bool;
    fn is_shutting_down(&self) -> bool;

    fn should_stop(&self) -> bool {
        !self.is_active() || self.is_shutting_down()
    }
}

pub trait HostScheduler {
    /// Cooperative yield point; hosts with an event loop process pending work here.
    fn yield_pending_tasks(&mut self);

    /// Called once per finished grid point.
    fn report_progress(&mut self, _completed: usize, _total: usize) {}
}

pub trait ProblemReporter {
    fn report(&mut self, message: &str);
}

/// Shared "active" and "shutting down" flags. Clones observe the same state, so a
/// host (or another thread) can stop a running sweep.
#[derive(Debug, Clone)]
pub struct CancellationFlag {
    active: Arc<AtomicBool>,
    shutting_down: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(true)),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.set_active(false);
    }

    pub fn shut_down(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }
}

impl Default for CancellationFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationSource for CancellationFlag {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

/// Scheduler for hosts that have nothing to service between steps.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScheduler;

impl HostScheduler for NoopScheduler {
    fn yield_pending_tasks(&mut self) {}
}

/// Routes problems to the `tracing` subscriber at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProblemReporter for TracingReporter {
    fn report(&mut self, message: &str) {
        tracing::warn!(target: "basin_core::problem", "{message}");
    }
}

/// Keeps every reported message; handy for hosts that show them in bulk.
#[derive(Debug, Default, Clone)]
pub struct CollectingReporter {
    pub messages: Vec<String>,
}

impl ProblemReporter for CollectingReporter {
    fn report(&mut self, message: &str) {
        tracing::warn!(target: "basin_core::problem", "{message}");
        self.messages.push(message.to_string());
    }
}

/// The non-system collaborators of one sweep, bundled so they can be passed down
/// through the sampler without threading three arguments everywhere.
pub struct SweepHooks<'a> {
    pub cancel: &'a dyn CancellationSource,
    pub scheduler: &'a mut dyn HostScheduler,
    pub reporter: &'a mut dyn ProblemReporter,
}

impl<'a> SweepHooks<'a> {
    pub fn new(
        cancel: &'a dyn CancellationSource,
        scheduler: &'a mut dyn HostScheduler,
        reporter: &'a mut dyn ProblemReporter,
    ) -> Self {
        Self {
            cancel,
            scheduler,
            reporter,
        }
    }

    pub(crate) fn should_stop(&self) -> bool {
        self.cancel.should_stop()
    }

    pub(crate) fn yield_now(&mut self) {
        self.scheduler.yield_pending_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_flag_is_shared_between_clones() {
        let flag = CancellationFlag::new();
        let observer = flag.clone();
        assert!(!observer.should_stop());

        flag.cancel();
        assert!(!observer.is_active());
        assert!(observer.should_stop());

        flag.set_active(true);
        assert!(!observer.should_stop());
        flag.shut_down();
        assert!(observer.is_shutting_down());
        assert!(observer.should_stop());
    }

    #[test]
    fn collecting_reporter_keeps_messages_in_order() {
        let mut reporter = CollectingReporter::default();
        reporter.report("first");
        reporter.report("second");
        assert_eq!(reporter.messages, vec!["first", "second"]);
    }
}
