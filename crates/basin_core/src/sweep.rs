//! One- and two-dimensional parameter sweeps that classify every grid point by the
//! attractor its trajectory settles on.

mod classify;
pub mod config;
pub mod engine;

pub use classify::{round_to_digits, OutputBuckets};
pub use config::{
    parse_doubles, parse_list, ClassificationMode, ObservedOutput, ResetPolicy, SweepAxis, SweepConfig,
    UnconvergedPolicy, MAX_ROUND_DIGITS,
};
pub use engine::{SweepEngine, SweepReport, SweepStatus};
