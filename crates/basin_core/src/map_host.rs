use crate::equation_engine::EquationSystem;
use crate::host::{ActivationSnapshot, ObservableRegistry, ParameterTarget, SystemStepper};
use crate::solvers::{Stepper, StepperKind};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MapHandle {
    /// Index into the state vector.
    State(usize),
    /// Index into the parameter vector.
    Param(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapSnapshot {
    pub state: Vec<f64>,
    pub t: f64,
}

/// Host for a system defined by equation strings, iterated as a map or sampled
/// from a flow with fixed RK4 steps. Every state variable is an observable and
/// every parameter a configuration value.
pub struct MapHost {
    system: EquationSystem<f64>,
    var_names: Vec<String>,
    param_names: Vec<String>,
    stepper: Stepper,
    dt: f64,
    initial: Vec<f64>,
    state: Vec<f64>,
    t: f64,
}

impl MapHost {
    pub fn new(
        equations: &[String],
        var_names: &[String],
        param_names: &[String],
        params: &[f64],
        initial: &[f64],
        kind: StepperKind,
        dt: f64,
    ) -> Result<Self> {
        if var_names.is_empty() {
            bail!("System has zero dimension.");
        }
        if initial.len() != var_names.len() {
            bail!(
                "Initial state dimension mismatch. Expected {}, got {}.",
                var_names.len(),
                initial.len()
            );
        }
        if kind == StepperKind::Rk4 && (dt.is_nan() || dt <= 0.0) {
            bail!("dt must be positive for sampled flows, got {}.", dt);
        }
        let system = EquationSystem::from_sources(equations, var_names, param_names, params.to_vec())
            .context("Failed to compile system equations")?;
        Ok(Self {
            system,
            var_names: var_names.to_vec(),
            param_names: param_names.to_vec(),
            stepper: kind.build(var_names.len()),
            dt,
            initial: initial.to_vec(),
            state: initial.to_vec(),
            t: 0.0,
        })
    }

    /// Handle for a state variable or parameter name.
    pub fn handle(&self, name: &str) -> Result<MapHandle> {
        if let Some(&i) = self.system.var_map.get(name) {
            return Ok(MapHandle::State(i));
        }
        if let Some(&i) = self.system.param_map.get(name) {
            return Ok(MapHandle::Param(i));
        }
        bail!("Unknown variable or parameter '{}'.", name)
    }

    pub fn name(&self, handle: MapHandle) -> Option<&str> {
        let name = match handle {
            MapHandle::State(i) => self.var_names.get(i),
            MapHandle::Param(i) => self.param_names.get(i),
        };
        name.map(String::as_str)
    }

    pub fn state(&self) -> &[f64] {
        &self.state
    }

    pub fn time(&self) -> f64 {
        self.t
    }
}

impl ObservableRegistry for MapHost {
    type Handle = MapHandle;

    fn list_observables(&self) -> Vec<MapHandle> {
        (0..self.state.len()).map(MapHandle::State).collect()
    }

    fn read(&self, handle: &MapHandle) -> Option<f64> {
        match *handle {
            MapHandle::State(i) => self.state.get(i).copied(),
            MapHandle::Param(i) => self.system.params.get(i).copied(),
        }
    }
}

impl ParameterTarget for MapHost {
    fn list_parameters(&self) -> Vec<MapHandle> {
        (0..self.system.params.len()).map(MapHandle::Param).collect()
    }

    fn write(&mut self, handle: &MapHandle, value: f64) -> bool {
        let slot = match *handle {
            MapHandle::State(i) => self.state.get_mut(i),
            MapHandle::Param(i) => self.system.params.get_mut(i),
        };
        match slot {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

impl SystemStepper for MapHost {
    fn step(&mut self) {
        self.stepper.step(&self.system, &mut self.t, &mut self.state, self.dt);
    }

    fn notify_parameters_changed(&mut self) -> Result<()> {
        for (name, value) in self.param_names.iter().zip(&self.system.params) {
            if !value.is_finite() {
                bail!("Parameter {} is not finite ({}).", name, value);
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.state.copy_from_slice(&self.initial);
        self.t = 0.0;
    }
}

impl ActivationSnapshot for MapHost {
    type Snapshot = MapSnapshot;

    fn capture(&self) -> MapSnapshot {
        MapSnapshot {
            state: self.state.clone(),
            t: self.t,
        }
    }

    fn restore(&mut self, snapshot: &MapSnapshot) {
        if snapshot.state.len() == self.state.len() {
            self.state.copy_from_slice(&snapshot.state);
            self.t = snapshot.t;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{DataGrid, GridSink};
    use crate::host::{CancellationFlag, CollectingReporter, NoopScheduler, SweepHooks};
    use crate::sweep::{
        ClassificationMode, ObservedOutput, SweepAxis, SweepConfig, SweepEngine, UnconvergedPolicy,
    };

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn logistic(r: f64, x0: f64) -> MapHost {
        MapHost::new(
            &strings(&["r * x * (1 - x)"]),
            &strings(&["x"]),
            &strings(&["r"]),
            &[r],
            &[x0],
            StepperKind::Map,
            1.0,
        )
        .unwrap()
    }

    fn assert_err_contains<T>(result: Result<T>, needle: &str) {
        match result {
            Ok(_) => panic!("expected error containing '{needle}'"),
            Err(err) => {
                let message = format!("{err:#}");
                assert!(message.contains(needle), "'{message}' does not contain '{needle}'");
            }
        }
    }

    #[test]
    fn resolves_names_to_handles() {
        let host = logistic(3.0, 0.2);
        assert_eq!(host.handle("x").unwrap(), MapHandle::State(0));
        assert_eq!(host.handle("r").unwrap(), MapHandle::Param(0));
        assert_eq!(host.name(MapHandle::Param(0)), Some("r"));
        assert_err_contains(host.handle("y"), "Unknown variable or parameter 'y'");
    }

    #[test]
    fn rejects_bad_construction() {
        let eqs = strings(&["x"]);
        let vars = strings(&["x"]);
        assert_err_contains(
            MapHost::new(&eqs, &vars, &[], &[], &[0.0, 1.0], StepperKind::Map, 1.0),
            "Initial state dimension mismatch",
        );
        assert_err_contains(
            MapHost::new(&eqs, &vars, &[], &[], &[0.0], StepperKind::Rk4, 0.0),
            "dt must be positive",
        );
        assert_err_contains(
            MapHost::new(&strings(&["x +"]), &vars, &[], &[], &[0.0], StepperKind::Map, 1.0),
            "Failed to compile system equations",
        );
    }

    #[test]
    fn steps_reset_and_snapshots() {
        let mut host = logistic(2.0, 0.25);
        host.step();
        assert_eq!(host.state(), &[0.375]);
        assert_eq!(host.time(), 1.0);

        let snapshot = host.capture();
        host.step();
        host.restore(&snapshot);
        assert_eq!(host.state(), &[0.375]);

        host.reset();
        assert_eq!(host.state(), &[0.25]);
        assert_eq!(host.time(), 0.0);
    }

    #[test]
    fn rejects_non_finite_parameters() {
        let mut host = logistic(2.0, 0.25);
        assert!(host.write(&MapHandle::Param(0), f64::INFINITY));
        assert_err_contains(host.notify_parameters_changed(), "Parameter r is not finite");
        assert!(!host.write(&MapHandle::Param(3), 1.0));
    }

    #[test]
    fn flow_relaxes_to_equilibrium() {
        let mut host = MapHost::new(
            &strings(&["k * (c - y)"]),
            &strings(&["y"]),
            &strings(&["k", "c"]),
            &[1.0, 2.0],
            &[0.0],
            StepperKind::Rk4,
            0.1,
        )
        .unwrap();
        for _ in 0..200 {
            host.step();
        }
        assert!((host.state()[0] - 2.0).abs() < 1e-6);
        assert!((host.time() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn logistic_bifurcation_diagram() {
        let mut host = logistic(2.0, 0.2);
        let r = host.handle("r").unwrap();
        let mut config = SweepConfig::new("bifurcation", SweepAxis::new(3).with_target(r, 2.5, 3.3));
        config.mode = ClassificationMode::Bifurcation {
            outputs: vec![ObservedOutput::new(None, 0.0, 1.0)],
            output_resolution: 11,
            unconverged: UnconvergedPolicy::SameLayer,
        };

        let flag = CancellationFlag::new();
        let mut scheduler = NoopScheduler;
        let mut reporter = CollectingReporter::default();
        let mut hooks = SweepHooks::new(&flag, &mut scheduler, &mut reporter);
        let mut grid = DataGrid::default();
        let mut engine = SweepEngine::new();
        let report = engine.run(&mut host, &mut hooks, &config, &mut grid).unwrap();

        assert_eq!(report.attractors, 3);
        assert_eq!((grid.width(), grid.height(), grid.depth()), (4, 12, 1));
        let column = |x: usize| -> Vec<(usize, f64)> {
            (1..12)
                .map(|y| (y, grid.get(x, y, 0)))
                .filter(|(_, v)| *v != 0.0)
                .collect()
        };
        // r = 2.5: fixed point 0.6; r = 2.9: fixed point ~0.655; r = 3.3: 2-cycle
        // ~{0.479, 0.824}.
        assert_eq!(column(1), vec![(7, 1.0)]);
        assert_eq!(column(2), vec![(8, 2.0)]);
        assert_eq!(column(3), vec![(6, 3.0), (9, 3.0)]);
        assert_eq!(engine.catalog().get(3).unwrap().period(), 2);
        assert!((grid.get(0, 11, 0) - 1.0).abs() < 1e-12);
        assert!((grid.get(2, 0, 0) - 2.9).abs() < 1e-12);
        assert_eq!(host.read(&r), Some(2.0));
        assert_eq!(host.state(), &[0.2]);
    }

    #[test]
    fn each_observed_output_gets_its_own_layer() {
        // y follows x with a scale of -2, so both outputs settle together.
        let mut host = MapHost::new(
            &strings(&["a * x", "-2 * x"]),
            &strings(&["x", "y"]),
            &strings(&["a"]),
            &[0.0],
            &[0.5, 0.0],
            StepperKind::Map,
            1.0,
        )
        .unwrap();
        let x = host.handle("x").unwrap();
        let y = host.handle("y").unwrap();
        let a = host.handle("a").unwrap();
        let mut config = SweepConfig::new("bifurcation", SweepAxis::new(2).with_target(a, 0.0, 0.5));
        config.mode = ClassificationMode::Bifurcation {
            outputs: vec![ObservedOutput::new(Some(x), 0.0, 1.0), ObservedOutput::new(Some(y), -1.0, 1.0)],
            output_resolution: 5,
            unconverged: UnconvergedPolicy::SameLayer,
        };
        config.sampler.pre_run_steps = 200;

        let flag = CancellationFlag::new();
        let mut scheduler = NoopScheduler;
        let mut reporter = CollectingReporter::default();
        let mut hooks = SweepHooks::new(&flag, &mut scheduler, &mut reporter);
        let mut grid = DataGrid::default();
        let report = SweepEngine::new()
            .run(&mut host, &mut hooks, &config, &mut grid)
            .unwrap();

        // Both parameter values collapse onto the origin.
        assert_eq!(report.attractors, 1);
        assert_eq!((grid.width(), grid.height(), grid.depth()), (3, 6, 2));
        // x = 0 is the first level of [0, 1]; y = 0 is the middle level of [-1, 1].
        assert_eq!(grid.get(1, 1, 0), 1.0);
        assert_eq!(grid.get(2, 1, 0), 1.0);
        assert_eq!(grid.get(1, 3, 1), 1.0);
        assert_eq!(grid.get(2, 3, 1), 1.0);
        assert_eq!(grid.count_nonzero(0), 2);
        assert_eq!(grid.count_nonzero(1), 2);
        // Each layer carries the levels of its own output range.
        assert!((grid.get(0, 5, 0) - 1.0).abs() < 1e-12);
        assert!((grid.get(0, 1, 1) + 1.0).abs() < 1e-12);
        assert!((grid.get(2, 0, 1) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn unconverged_samples_go_to_separate_layer() {
        // r = 4 is chaotic; nothing repeats within the budget.
        let mut host = logistic(4.0, 0.2);
        let r = host.handle("r").unwrap();
        let mut config = SweepConfig::new("bifurcation", SweepAxis::new(2).with_target(r, 3.99, 4.0));
        config.sampler.pre_run_steps = 10;
        config.sampler.max_steps = 60;
        config.sampler.max_period = 60;
        config.sampler.tolerance = 1e-12;
        config.mode = ClassificationMode::Bifurcation {
            outputs: vec![ObservedOutput::new(Some(MapHandle::State(0)), 0.0, 1.0)],
            output_resolution: 21,
            unconverged: UnconvergedPolicy::SeparateLayer,
        };

        let flag = CancellationFlag::new();
        let mut scheduler = NoopScheduler;
        let mut reporter = CollectingReporter::default();
        let mut hooks = SweepHooks::new(&flag, &mut scheduler, &mut reporter);
        let mut grid = DataGrid::default();
        let report = SweepEngine::new()
            .run(&mut host, &mut hooks, &config, &mut grid)
            .unwrap();

        assert_eq!(report.attractors, 0);
        assert_eq!(grid.depth(), 2);
        assert_eq!(grid.count_nonzero(0), 0);
        let marked = grid.data_cells(1).into_iter().filter(|(_, v)| *v == -1.0).count();
        assert!(marked > 5, "expected a spread of raw samples, got {marked}");
    }

    #[test]
    fn observed_output_must_be_an_observable() {
        let mut host = logistic(3.0, 0.2);
        let r = host.handle("r").unwrap();
        let mut config = SweepConfig::new("bifurcation", SweepAxis::new(2).with_target(r, 2.0, 3.0));
        config.mode = ClassificationMode::Bifurcation {
            outputs: vec![ObservedOutput::new(None, 0.0, 1.0), ObservedOutput::new(Some(r), 0.0, 1.0)],
            output_resolution: 5,
            unconverged: UnconvergedPolicy::Discard,
        };
        let flag = CancellationFlag::new();
        let mut scheduler = NoopScheduler;
        let mut reporter = CollectingReporter::default();
        let mut hooks = SweepHooks::new(&flag, &mut scheduler, &mut reporter);
        let mut grid = DataGrid::default();
        let err = SweepEngine::new()
            .run(&mut host, &mut hooks, &config, &mut grid)
            .unwrap_err();
        assert!(err.to_string().contains("is not an observable"));
        assert_eq!(reporter.messages.len(), 1);
    }
}
