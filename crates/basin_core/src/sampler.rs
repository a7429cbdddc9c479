use crate::error::{SweepError, SweepResult};
use crate::host::{DynamicsHost, SweepHooks};
use crate::recurrence::find_period;
use crate::state::StateVector;
use serde::{Deserialize, Serialize};

/// History slots reserved up front; longer budgets grow the buffer on demand.
const HISTORY_RESERVE: usize = 4096;

/// Step budget and equality threshold for one trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplerSettings {
    /// Unrecorded transient steps before evaluation starts.
    pub pre_run_steps: usize,
    /// Hard bound on recorded states per trajectory.
    pub max_steps: usize,
    pub max_period: usize,
    pub tolerance: f64,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            pre_run_steps: 100,
            max_steps: 500,
            max_period: 500,
            tolerance: 1e-5,
        }
    }
}

impl SamplerSettings {
    pub fn validate(&self) -> SweepResult<()> {
        if self.max_period == 0 {
            return Err(SweepError::ZeroMaxPeriod);
        }
        if self.max_period > self.max_steps {
            return Err(SweepError::MaxPeriodExceedsSteps {
                max_period: self.max_period,
                max_steps: self.max_steps,
            });
        }
        if self.tolerance.is_nan() || self.tolerance < 0.0 {
            return Err(SweepError::InvalidTolerance(self.tolerance));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    /// `tail` holds the last `period` states, one full cycle.
    Converged {
        period: usize,
        steps: usize,
        tail: Vec<StateVector>,
    },
    /// The budget ran out; every recorded state is kept for raw plotting.
    NotConverged { history: Vec<StateVector> },
    /// A cancellation flag was raised before a step.
    Cancelled,
}

impl SampleOutcome {
    pub fn period(&self) -> Option<usize> {
        match self {
            SampleOutcome::Converged { period, .. } => Some(*period),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SampleOutcome::Cancelled)
    }
}

/// Runs one trajectory: optional restore, pre-run, then bounded evaluation with
/// recurrence detection after every recorded step.
pub struct TrajectorySampler {
    settings: SamplerSettings,
    history: Vec<StateVector>,
}

impl TrajectorySampler {
    pub fn new(settings: SamplerSettings) -> SweepResult<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            history: Vec::with_capacity(settings.max_steps.min(HISTORY_RESERVE)),
        })
    }

    pub fn settings(&self) -> &SamplerSettings {
        &self.settings
    }

    /// Samples `host` from its current state, or from `restore` when given.
    ///
    /// The host scheduler is yielded to after every step, pre-run included, and
    /// cancellation is checked before every step. An unreadable state aborts with
    /// `SweepError::EmptyState`.
    pub fn sample<H: DynamicsHost + ?Sized>(
        &mut self,
        host: &mut H,
        hooks: &mut SweepHooks<'_>,
        observables: &[H::Handle],
        restore: Option<&H::Snapshot>,
    ) -> SweepResult<SampleOutcome> {
        if let Some(snapshot) = restore {
            host.restore(snapshot);
        }

        for _ in 0..self.settings.pre_run_steps {
            if hooks.should_stop() {
                return Ok(SampleOutcome::Cancelled);
            }
            host.step();
            hooks.yield_now();
        }

        self.history.clear();
        for step in 0..self.settings.max_steps {
            if hooks.should_stop() {
                return Ok(SampleOutcome::Cancelled);
            }
            host.step();
            let state = StateVector::capture(&*host, observables).ok_or(SweepError::EmptyState { step })?;
            self.history.push(state);

            let found = find_period(&self.history, step, self.settings.max_period, self.settings.tolerance)?;
            hooks.yield_now();

            if let Some(period) = found {
                let tail = self.history[step + 1 - period..=step].to_vec();
                return Ok(SampleOutcome::Converged {
                    period,
                    steps: step + 1,
                    tail,
                });
            }
        }

        Ok(SampleOutcome::NotConverged {
            history: std::mem::take(&mut self.history),
        })
    }
}
