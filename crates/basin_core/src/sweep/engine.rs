//! Grid traversal, per-point reset/apply/sample, classification and host cleanup.

use super::classify::{round_to_digits, AxisProjection, GridLayout, OutputBuckets};
use super::config::{ClassificationMode, SweepAxis, SweepConfig, UnconvergedPolicy};
use crate::catalog::AttractorCatalog;
use crate::error::{SweepError, SweepResult};
use crate::grid::GridSink;
use crate::host::{DynamicsHost, ObservableRegistry, ParameterTarget, SweepHooks};
use crate::sampler::{SampleOutcome, TrajectorySampler};
use crate::state::StateVector;
use serde::Serialize;
use std::fmt::Debug;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SweepStatus {
    Completed,
    Cancelled,
}

/// Outcome of one sweep, handed back to whoever started it.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub calculator: String,
    pub status: SweepStatus,
    /// Grid points fully classified and written.
    pub grid_points: usize,
    pub attractors: usize,
    pub elapsed: Duration,
}

/// Drives sweeps. The attractor catalog of the last run stays available for
/// inspection until the next run clears it.
#[derive(Debug, Default)]
pub struct SweepEngine {
    catalog: AttractorCatalog,
}

impl SweepEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn catalog(&self) -> &AttractorCatalog {
        &self.catalog
    }

    /// Runs `config` against `host`, writing into `grid`.
    ///
    /// Configuration and missing-resource errors are returned before the grid is
    /// resized or the host is touched. Once stepping has started the host is always
    /// restored before returning, whether the sweep completed, was cancelled or
    /// failed. Every error is also passed to the problem reporter.
    pub fn run<H, G>(
        &mut self,
        host: &mut H,
        hooks: &mut SweepHooks<'_>,
        config: &SweepConfig<H::Handle>,
        grid: &mut G,
    ) -> SweepResult<SweepReport>
    where
        H: DynamicsHost + ?Sized,
        G: GridSink + ?Sized,
    {
        let started = Instant::now();
        match self.execute(host, hooks, config, grid) {
            Ok((status, grid_points)) => {
                let report = SweepReport {
                    calculator: config.name.clone(),
                    status,
                    grid_points,
                    attractors: self.catalog.len(),
                    elapsed: started.elapsed(),
                };
                info!(
                    calculator = %report.calculator,
                    status = ?report.status,
                    grid_points,
                    attractors = report.attractors,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "sweep finished"
                );
                Ok(report)
            }
            Err(err) => {
                hooks.reporter.report(&err.to_string());
                Err(err)
            }
        }
    }

    fn execute<H, G>(
        &mut self,
        host: &mut H,
        hooks: &mut SweepHooks<'_>,
        config: &SweepConfig<H::Handle>,
        grid: &mut G,
    ) -> SweepResult<(SweepStatus, usize)>
    where
        H: DynamicsHost + ?Sized,
        G: GridSink + ?Sized,
    {
        config.validate()?;
        for target in config.cross_axis_overlap() {
            let message = format!("target {target:?} is varied on both axes");
            warn!(calculator = %config.name, "{message}");
            hooks.reporter.report(&message);
        }
        let plan = SweepPlan::resolve(&*host, config)?;
        let sampler = TrajectorySampler::new(config.sampler)?;

        self.catalog.clear();
        let layout = plan.layout;
        grid.resize(layout.width, layout.height, layout.depth());
        plan.write_output_labels(grid);
        info!(
            calculator = %config.name,
            width = layout.width,
            height = layout.height,
            depth = layout.depth(),
            points = plan.total_points,
            "starting sweep"
        );

        let backup = HostBackup::capture(&*host, &plan.targets);
        let mut run = SweepRun {
            config,
            plan: &plan,
            backup: &backup,
            sampler,
            catalog: &mut self.catalog,
            completed: 0,
        };
        let swept = run.all_passes(host, hooks, grid);
        let completed = run.completed;
        let restored = backup.restore(host, config.reset.reset_simulation);

        match (swept, restored) {
            (Ok(status), Ok(())) => Ok((status, completed)),
            (Ok(status), Err(restore_err)) => {
                let message = format!("restoring the system after the sweep: {restore_err}");
                warn!(calculator = %config.name, "{message}");
                hooks.reporter.report(&message);
                Ok((status, completed))
            }
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(restore_err)) => {
                hooks
                    .reporter
                    .report(&format!("restoring the system after a failed sweep: {restore_err}"));
                Err(err)
            }
        }
    }
}

/// Host values captured before the first grid point.
struct HostBackup<H: DynamicsHost + ?Sized> {
    activation: H::Snapshot,
    configuration: Vec<(H::Handle, f64)>,
    swept: Vec<(H::Handle, f64)>,
}

impl<H: DynamicsHost + ?Sized> HostBackup<H> {
    fn capture(host: &H, targets: &[H::Handle]) -> Self {
        Self {
            activation: host.capture(),
            configuration: read_values(host, host.list_parameters()),
            swept: read_values(host, targets.to_vec()),
        }
    }

    fn restore_configuration(&self, host: &mut H) {
        for (handle, value) in &self.configuration {
            host.write(handle, *value);
        }
    }

    /// Consumes the backup, so the host can only be restored once per sweep.
    fn restore(self, host: &mut H, reset_simulation: bool) -> SweepResult<()> {
        for (handle, value) in &self.swept {
            host.write(handle, *value);
        }
        self.restore_configuration(host);
        let notified = host
            .notify_parameters_changed()
            .map_err(SweepError::ParameterUpdate);
        if reset_simulation {
            host.reset();
        }
        host.restore(&self.activation);
        debug!("system restored to its pre-sweep state");
        notified
    }
}

fn read_values<R: ObservableRegistry + ?Sized>(host: &R, handles: Vec<R::Handle>) -> Vec<(R::Handle, f64)> {
    handles
        .into_iter()
        .filter_map(|handle| host.read(&handle).map(|value| (handle, value)))
        .collect()
}

struct AxisPlan {
    increments: Vec<f64>,
    projection: AxisProjection,
    cells: OutputBuckets,
}

impl AxisPlan {
    fn new<K: PartialEq>(axis: &SweepAxis<K>, observables: &[K]) -> Self {
        let projection = axis
            .targets
            .first()
            .and_then(|target| observables.iter().position(|handle| handle == target))
            .map_or(AxisProjection::Parameter, AxisProjection::Observable);
        let (min, max) = match (axis.minima.first(), axis.maxima.first()) {
            (Some(min), Some(max)) => (*min, *max),
            _ => (0.0, 1.0),
        };
        Self {
            increments: axis.increments(),
            projection,
            cells: OutputBuckets::new(min, max, axis.resolution),
        }
    }

    /// Grid cell an attractor state occupies on this axis.
    fn cell(&self, state: &StateVector, applied: f64) -> Option<usize> {
        self.cells.bucket(self.projection.value(state, applied))
    }
}

/// Observable index and discretisation of one bifurcation output.
struct OutputChannel {
    observed: usize,
    buckets: OutputBuckets,
}

impl OutputChannel {
    fn bucket(&self, state: &StateVector) -> Option<usize> {
        state
            .values()
            .get(self.observed)
            .and_then(|value| self.buckets.bucket(*value))
    }
}

struct OutputPlan {
    channels: Vec<OutputChannel>,
    resolution: usize,
    unconverged: UnconvergedPolicy,
}

impl OutputPlan {
    /// Channel whose labels and samples belong on `layer` within a bank.
    fn channel_for_layer(&self, layer: usize) -> Option<&OutputChannel> {
        match self.channels.len() {
            0 => None,
            n => self.channels.get(layer % n),
        }
    }

    /// Layer receiving raw samples of unconverged trajectories for channel `k`.
    fn unconverged_layer(&self, k: usize) -> Option<usize> {
        match self.unconverged {
            UnconvergedPolicy::Discard => None,
            UnconvergedPolicy::SameLayer => Some(k),
            UnconvergedPolicy::SeparateLayer => Some(self.channels.len() + k),
        }
    }
}

/// Everything about a sweep that depends on both the config and the host.
struct SweepPlan<K> {
    observables: Vec<K>,
    targets: Vec<K>,
    layout: GridLayout,
    x: AxisPlan,
    y: Option<AxisPlan>,
    output: Option<OutputPlan>,
    total_points: usize,
}

impl<K: Clone + PartialEq + Debug> SweepPlan<K> {
    fn resolve<R>(host: &R, config: &SweepConfig<K>) -> SweepResult<Self>
    where
        R: ObservableRegistry<Handle = K> + ?Sized,
    {
        let observables = host.list_observables();
        if observables.is_empty() {
            return Err(SweepError::MissingResource(
                "the system exposes no observables".to_string(),
            ));
        }

        let mut targets = Vec::new();
        for (axis_id, axis) in config.axes() {
            for target in &axis.targets {
                if host.read(target).is_none() {
                    return Err(SweepError::MissingResource(format!(
                        "{axis_id}-axis target {target:?} cannot be resolved"
                    )));
                }
                targets.push(target.clone());
            }
        }

        let output = match &config.mode {
            ClassificationMode::Bifurcation {
                outputs,
                output_resolution,
                unconverged,
            } => {
                let mut channels = Vec::with_capacity(outputs.len());
                for output in outputs {
                    let observed = match &output.observed {
                        None => 0,
                        Some(handle) => observables.iter().position(|h| h == handle).ok_or_else(|| {
                            SweepError::MissingResource(format!("observed output {handle:?} is not an observable"))
                        })?,
                    };
                    channels.push(OutputChannel {
                        observed,
                        buckets: OutputBuckets::new(output.min, output.max, *output_resolution),
                    });
                }
                Some(OutputPlan {
                    channels,
                    resolution: *output_resolution,
                    unconverged: *unconverged,
                })
            }
            _ => None,
        };

        let x = AxisPlan::new(&config.x_axis, &observables);
        let y = config.y_axis.as_ref().map(|axis| AxisPlan::new(axis, &observables));
        let height = match (&output, &config.y_axis) {
            (Some(output), _) => output.resolution + 1,
            (None, Some(y_axis)) => y_axis.resolution + 1,
            (None, None) => 2,
        };
        let layout = GridLayout {
            width: config.x_axis.resolution + 1,
            height,
            layers: config.mode.layers(),
            banks: if config.bidirectional { 2 } else { 1 },
        };
        let inner = config.y_axis.as_ref().map_or(1, |axis| axis.resolution);
        let total_points = config.x_axis.resolution * inner * layout.banks;

        Ok(Self {
            observables,
            targets,
            layout,
            x,
            y,
            output,
            total_points,
        })
    }

    /// Column 0 of a bifurcation grid lists the output level of every row, per
    /// observed output.
    fn write_output_labels<G: GridSink + ?Sized>(&self, grid: &mut G) {
        let Some(output) = &self.output else {
            return;
        };
        for bank in 0..self.layout.banks {
            for (offset, layer) in self.layout.bank_layers(bank).enumerate() {
                let Some(channel) = output.channel_for_layer(offset) else {
                    continue;
                };
                for row in 1..=output.resolution {
                    grid.set(channel.buckets.level(row), 0, row, layer);
                }
            }
        }
    }
}

/// One grid coordinate within a pass.
struct GridPoint {
    bank: usize,
    x: usize,
    y: usize,
    first_x_visit: bool,
    first_y_visit: bool,
}

struct SweepRun<'r, H: DynamicsHost + ?Sized> {
    config: &'r SweepConfig<H::Handle>,
    plan: &'r SweepPlan<H::Handle>,
    backup: &'r HostBackup<H>,
    sampler: TrajectorySampler,
    catalog: &'r mut AttractorCatalog,
    completed: usize,
}

impl<'r, H: DynamicsHost + ?Sized> SweepRun<'r, H> {
    fn all_passes<G: GridSink + ?Sized>(
        &mut self,
        host: &mut H,
        hooks: &mut SweepHooks<'_>,
        grid: &mut G,
    ) -> SweepResult<SweepStatus> {
        for bank in 0..self.plan.layout.banks {
            if self.pass(host, hooks, grid, bank)? == SweepStatus::Cancelled {
                info!(calculator = %self.config.name, completed = self.completed, "sweep cancelled");
                return Ok(SweepStatus::Cancelled);
            }
        }
        Ok(SweepStatus::Completed)
    }

    /// Bank 0 walks the x-axis from its minima, bank 1 from its maxima with negated
    /// increments. The inner axis always restarts from its minima.
    fn pass<G: GridSink + ?Sized>(
        &mut self,
        host: &mut H,
        hooks: &mut SweepHooks<'_>,
        grid: &mut G,
        bank: usize,
    ) -> SweepResult<SweepStatus> {
        let config = self.config;
        let plan = self.plan;
        let forward = bank == 0;
        let resolution = config.x_axis.resolution;
        let (mut x_values, x_steps): (Vec<f64>, Vec<f64>) = if forward {
            (config.x_axis.minima.clone(), plan.x.increments.clone())
        } else {
            (
                config.x_axis.maxima.clone(),
                plan.x.increments.iter().map(|inc| -inc).collect(),
            )
        };
        let inner = config.y_axis.as_ref().map_or(1, |axis| axis.resolution);

        for i in 0..resolution {
            let x = if forward { i + 1 } else { resolution - i };
            let mut y_values = config
                .y_axis
                .as_ref()
                .map(|axis| axis.minima.clone())
                .unwrap_or_default();
            for j in 0..inner {
                if hooks.should_stop() {
                    return Ok(SweepStatus::Cancelled);
                }
                let at = GridPoint {
                    bank,
                    x,
                    y: j + 1,
                    first_x_visit: j == 0,
                    first_y_visit: i == 0,
                };
                if self.point(host, hooks, grid, &at, &x_values, &y_values)? == SweepStatus::Cancelled {
                    return Ok(SweepStatus::Cancelled);
                }
                self.completed += 1;
                hooks.yield_now();
                hooks.scheduler.report_progress(self.completed, plan.total_points);
                if let Some(y_plan) = &plan.y {
                    advance(&mut y_values, &y_plan.increments);
                }
            }
            advance(&mut x_values, &x_steps);
        }
        Ok(SweepStatus::Completed)
    }

    fn point<G: GridSink + ?Sized>(
        &mut self,
        host: &mut H,
        hooks: &mut SweepHooks<'_>,
        grid: &mut G,
        at: &GridPoint,
        x_values: &[f64],
        y_values: &[f64],
    ) -> SweepResult<SweepStatus> {
        let config = self.config;
        let reset = config.reset;
        if reset.reset_simulation {
            host.reset();
        }
        if reset.restore_configuration {
            self.backup.restore_configuration(host);
        }
        if reset.reset_activation {
            host.restore(&self.backup.activation);
        }

        let applied_x = apply_values(host, &config.x_axis.targets, x_values, config.round_digits)?;
        let applied_y = match &config.y_axis {
            Some(axis) => apply_values(host, &axis.targets, y_values, config.round_digits)?,
            None => Vec::new(),
        };
        host.notify_parameters_changed()
            .map_err(SweepError::ParameterUpdate)?;

        let outcome = self.sampler.sample(host, hooks, &self.plan.observables, None)?;
        if outcome.is_cancelled() {
            return Ok(SweepStatus::Cancelled);
        }

        self.write_labels(grid, at, x_values, y_values);
        self.classify(grid, at, &applied_x, &applied_y, &outcome)?;
        trace!(bank = at.bank, x = at.x, y = at.y, period = ?outcome.period(), "grid point classified");
        Ok(SweepStatus::Completed)
    }

    /// Labels carry the raw accumulated value of each axis' first target.
    fn write_labels<G: GridSink + ?Sized>(&self, grid: &mut G, at: &GridPoint, x_values: &[f64], y_values: &[f64]) {
        for layer in self.plan.layout.bank_layers(at.bank) {
            if at.first_x_visit {
                if let Some(value) = x_values.first() {
                    grid.set(*value, at.x, 0, layer);
                }
            }
            if at.first_y_visit && self.plan.y.is_some() {
                if let Some(value) = y_values.first() {
                    grid.set(*value, 0, at.y, layer);
                }
            }
        }
    }

    fn classify<G: GridSink + ?Sized>(
        &mut self,
        grid: &mut G,
        at: &GridPoint,
        applied_x: &[f64],
        applied_y: &[f64],
        outcome: &SampleOutcome,
    ) -> SweepResult<()> {
        let layout = self.plan.layout;
        let layer = |index: usize| layout.layer(at.bank, index);

        match outcome {
            SampleOutcome::Converged { period, tail, .. } => {
                let id = self.register(tail, *period)? as f64;
                match &self.config.mode {
                    ClassificationMode::Basin { project_attractors } => {
                        grid.set(id, at.x, at.y, layer(0));
                        grid.set(*period as f64, at.x, at.y, layer(1));
                        if *project_attractors {
                            self.project(grid, at, tail, applied_x, applied_y, id);
                        }
                    }
                    ClassificationMode::Period => grid.set(*period as f64, at.x, at.y, layer(0)),
                    ClassificationMode::Bifurcation { .. } => {
                        if let Some(output) = &self.plan.output {
                            for (k, channel) in output.channels.iter().enumerate() {
                                for row in tail.iter().filter_map(|state| channel.bucket(state)) {
                                    grid.set(id, at.x, row, layer(k));
                                }
                            }
                        }
                    }
                }
            }
            SampleOutcome::NotConverged { history } => match &self.plan.output {
                Some(output) => {
                    for (k, channel) in output.channels.iter().enumerate() {
                        let Some(target) = output.unconverged_layer(k) else {
                            continue;
                        };
                        for row in history.iter().filter_map(|state| channel.bucket(state)) {
                            grid.set(-1.0, at.x, row, layer(target));
                        }
                    }
                }
                None => {
                    for index in 0..layout.layers.min(2) {
                        grid.set(0.0, at.x, at.y, layer(index));
                    }
                }
            },
            SampleOutcome::Cancelled => {}
        }
        Ok(())
    }

    fn register(&mut self, tail: &[StateVector], period: usize) -> SweepResult<usize> {
        let found = self
            .catalog
            .match_or_register(tail, self.config.sampler.tolerance)?;
        if found.is_new {
            debug!(id = found.id, period, "registered new attractor");
        }
        Ok(found.id)
    }

    /// Marks the cells an attractor's states occupy on the swept axes.
    fn project<G: GridSink + ?Sized>(
        &self,
        grid: &mut G,
        at: &GridPoint,
        tail: &[StateVector],
        applied_x: &[f64],
        applied_y: &[f64],
        id: f64,
    ) {
        let plan = self.plan;
        let layer = plan.layout.layer(at.bank, 2);
        let x_applied = applied_x.first().copied().unwrap_or_default();
        for state in tail {
            let Some(x) = plan.x.cell(state, x_applied) else {
                continue;
            };
            let y = match (&plan.y, applied_y.first()) {
                (Some(y_plan), Some(applied)) => y_plan.cell(state, *applied),
                _ => Some(1),
            };
            if let Some(y) = y {
                grid.set(id, x, y, layer);
            }
        }
    }
}

fn advance(values: &mut [f64], increments: &[f64]) {
    for (value, inc) in values.iter_mut().zip(increments) {
        *value += inc;
    }
}

/// Writes one value per target, rounded if requested; returns what was written.
fn apply_values<H: ParameterTarget + ?Sized>(
    host: &mut H,
    targets: &[H::Handle],
    values: &[f64],
    round_digits: Option<u32>,
) -> SweepResult<Vec<f64>> {
    targets
        .iter()
        .zip(values)
        .map(|(target, value)| {
            let value = round_digits.map_or(*value, |digits| round_to_digits(*value, digits));
            if host.write(target, value) {
                Ok(value)
            } else {
                Err(SweepError::MissingResource(format!(
                    "target {target:?} rejected value {value}"
                )))
            }
        })
        .collect()
}
