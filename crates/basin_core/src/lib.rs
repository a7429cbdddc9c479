pub mod catalog;
pub mod equation_engine;
pub mod error;
pub mod grid;
pub mod host;
pub mod map_host;
pub mod network;
pub mod recurrence;
pub mod registry;
pub mod sampler;
pub mod solvers;
pub mod state;
pub mod sweep;
/// The `basin_core` crate samples discrete-time dynamical systems over parameter grids
/// and classifies every grid point by the attractor its trajectory settles on.
///
/// Key components:
/// - **Host traits**: `ObservableRegistry`, `ParameterTarget`, `SystemStepper`, `ActivationSnapshot`
///   describe the system under test; `CancellationSource`, `HostScheduler`, `ProblemReporter`
///   connect a sweep to its embedding application.
/// - **Detection**: `StateVector` comparison, `find_period` and the `AttractorCatalog`.
/// - **Sweeps**: `TrajectorySampler`, `SweepEngine` and the layered `GridSink` output.
/// - **Reference hosts**: a recurrent neural network and an equation-driven map/flow
///   built on the bytecode equation engine.
pub mod traits;

pub use catalog::{AttractorCatalog, AttractorSignature, CatalogMatch};
pub use error::{AxisId, SweepError, SweepResult};
pub use grid::{DataGrid, GridSink};
pub use host::{
    ActivationSnapshot, CancellationFlag, CancellationSource, DynamicsHost, HostScheduler, ObservableRegistry,
    ParameterTarget, ProblemReporter, SweepHooks, SystemStepper,
};
pub use recurrence::find_period;
pub use registry::CalculatorRegistry;
pub use sampler::{SampleOutcome, SamplerSettings, TrajectorySampler};
pub use state::StateVector;
pub use sweep::{ClassificationMode, ObservedOutput, ResetPolicy, SweepAxis, SweepConfig, SweepEngine, SweepReport, SweepStatus};
