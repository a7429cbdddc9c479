//! Sweep configuration: axes, reset switches and classification modes.

use crate::error::{AxisId, SweepError, SweepResult};
use crate::sampler::SamplerSettings;
use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::str::FromStr;

/// Largest `round_digits` for which scaling by `10^digits` stays exact enough in `f64`.
pub const MAX_ROUND_DIGITS: u32 = 15;

/// One independently varied dimension. Every target moves from its minimum to its
/// maximum in `resolution` samples; all targets of one axis move together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepAxis<H> {
    pub targets: Vec<H>,
    pub minima: Vec<f64>,
    pub maxima: Vec<f64>,
    pub resolution: usize,
}

impl<H> SweepAxis<H> {
    pub fn new(resolution: usize) -> Self {
        Self {
            targets: Vec::new(),
            minima: Vec::new(),
            maxima: Vec::new(),
            resolution,
        }
    }

    pub fn with_target(mut self, target: H, min: f64, max: f64) -> Self {
        self.targets.push(target);
        self.minima.push(min);
        self.maxima.push(max);
        self
    }

    /// Per-target step `(max - min) / (resolution - 1)`. Only meaningful once the
    /// axis has been validated.
    pub fn increments(&self) -> Vec<f64> {
        let divisions = self.resolution.saturating_sub(1).max(1) as f64;
        self.minima
            .iter()
            .zip(&self.maxima)
            .map(|(min, max)| (max - min) / divisions)
            .collect()
    }

    /// Parses the comma/pipe separated list syntax used by calculator settings,
    /// e.g. targets `"1:b,2:b"`, minima `"-2,-2"`, maxima `"2|2"`.
    pub fn from_strings(targets: &str, minima: &str, maxima: &str, resolution: usize) -> Result<Self>
    where
        H: FromStr,
        H::Err: Display,
    {
        Ok(Self {
            targets: parse_list(targets)?,
            minima: parse_doubles(minima)?,
            maxima: parse_doubles(maxima)?,
            resolution,
        })
    }
}

impl<H: Debug + PartialEq> SweepAxis<H> {
    pub fn validate(&self, axis: AxisId) -> SweepResult<()> {
        let targets = self.targets.len();
        if targets != self.minima.len() || targets != self.maxima.len() {
            return Err(SweepError::AxisLengthMismatch {
                axis,
                targets,
                minima: self.minima.len(),
                maxima: self.maxima.len(),
            });
        }
        if targets == 0 {
            return Err(SweepError::EmptyAxis { axis });
        }
        if self.resolution < 2 {
            return Err(SweepError::ResolutionTooSmall {
                axis,
                resolution: self.resolution,
            });
        }
        for (index, (min, max)) in self.minima.iter().zip(&self.maxima).enumerate() {
            if !min.is_finite() || !max.is_finite() {
                return Err(SweepError::NonFiniteBound {
                    axis,
                    index,
                    min: *min,
                    max: *max,
                });
            }
            if min == max {
                return Err(SweepError::DegenerateRange {
                    axis,
                    index,
                    value: *min,
                });
            }
        }
        for (i, target) in self.targets.iter().enumerate() {
            if self.targets[..i].contains(target) {
                return Err(SweepError::DuplicateTarget {
                    axis,
                    target: format!("{target:?}"),
                });
            }
        }
        Ok(())
    }
}

/// Independent switches applied before every grid point. All enabled by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetPolicy {
    /// Restore the activation snapshot taken before the sweep.
    pub reset_activation: bool,
    /// Rewrite every configuration parameter with its pre-sweep value.
    pub restore_configuration: bool,
    /// Trigger the host's full external reset.
    pub reset_simulation: bool,
}

impl Default for ResetPolicy {
    fn default() -> Self {
        Self {
            reset_activation: true,
            restore_configuration: true,
            reset_simulation: true,
        }
    }
}

impl ResetPolicy {
    /// No resets at all: every point continues from where the previous one ended.
    pub fn follow_attractor() -> Self {
        Self {
            reset_activation: false,
            restore_configuration: false,
            reset_simulation: false,
        }
    }
}

/// Where samples of trajectories without a detected attractor go in bifurcation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UnconvergedPolicy {
    /// Leave the column empty.
    Discard,
    /// Mark raw output buckets with -1 on the attractor layer.
    #[default]
    SameLayer,
    /// Mark raw output buckets with -1 on a dedicated second layer.
    SeparateLayer,
}

/// One observed element of a bifurcation diagram and the output range it is
/// discretised over. Each observed output gets its own layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedOutput<H> {
    /// The first observable when `None`.
    pub observed: Option<H>,
    pub min: f64,
    pub max: f64,
}

impl<H> ObservedOutput<H> {
    pub fn new(observed: Option<H>, min: f64, max: f64) -> Self {
        Self { observed, min, max }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClassificationMode<H> {
    /// Layer 0 attractor id, layer 1 period, layer 2 (optional) the positions the
    /// attractor's states occupy on the swept axes.
    Basin { project_attractors: bool },
    /// A single layer holding the detected period.
    Period,
    /// One swept axis against the discretised values of every observed output,
    /// layer `k` for output `k`. `SeparateLayer` appends one raw-sample layer per
    /// output after them.
    Bifurcation {
        outputs: Vec<ObservedOutput<H>>,
        output_resolution: usize,
        unconverged: UnconvergedPolicy,
    },
}

impl<H> Default for ClassificationMode<H> {
    fn default() -> Self {
        ClassificationMode::Basin {
            project_attractors: true,
        }
    }
}

impl<H> ClassificationMode<H> {
    /// Bifurcation mode over the first observable in `[-1, 1]` with 500 output buckets.
    pub fn bifurcation() -> Self {
        ClassificationMode::Bifurcation {
            outputs: vec![ObservedOutput::new(None, -1.0, 1.0)],
            output_resolution: 500,
            unconverged: UnconvergedPolicy::default(),
        }
    }

    /// Layers written per pass.
    pub fn layers(&self) -> usize {
        match self {
            ClassificationMode::Basin { project_attractors } => {
                if *project_attractors {
                    3
                } else {
                    2
                }
            }
            ClassificationMode::Period => 1,
            ClassificationMode::Bifurcation { outputs, unconverged, .. } => match unconverged {
                UnconvergedPolicy::SeparateLayer => 2 * outputs.len(),
                _ => outputs.len(),
            },
        }
    }
}

/// Everything needed to run one sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig<H> {
    /// Calculator name, echoed in the report.
    pub name: String,
    pub x_axis: SweepAxis<H>,
    pub y_axis: Option<SweepAxis<H>>,
    #[serde(default)]
    pub sampler: SamplerSettings,
    #[serde(default)]
    pub reset: ResetPolicy,
    #[serde(default)]
    pub mode: ClassificationMode<H>,
    /// Repeat the sweep over the x-axis from its maxima back to its minima.
    #[serde(default)]
    pub bidirectional: bool,
    /// Round applied parameter values to this many decimal digits.
    #[serde(default)]
    pub round_digits: Option<u32>,
}

impl<H> SweepConfig<H> {
    pub fn new(name: impl Into<String>, x_axis: SweepAxis<H>) -> Self {
        Self {
            name: name.into(),
            x_axis,
            y_axis: None,
            sampler: SamplerSettings::default(),
            reset: ResetPolicy::default(),
            mode: ClassificationMode::default(),
            bidirectional: false,
            round_digits: None,
        }
    }

    pub fn axes(&self) -> impl Iterator<Item = (AxisId, &SweepAxis<H>)> {
        std::iter::once((AxisId::X, &self.x_axis)).chain(self.y_axis.iter().map(|axis| (AxisId::Y, axis)))
    }
}

impl<H: Debug + PartialEq> SweepConfig<H> {
    /// Checks every structural rule that can be decided without a host.
    pub fn validate(&self) -> SweepResult<()> {
        for (id, axis) in self.axes() {
            axis.validate(id)?;
        }
        self.sampler.validate()?;
        if let Some(digits) = self.round_digits {
            if digits > MAX_ROUND_DIGITS {
                return Err(SweepError::TooManyRoundDigits(digits));
            }
        }
        if let ClassificationMode::Bifurcation {
            outputs,
            output_resolution,
            ..
        } = &self.mode
        {
            if self.y_axis.is_some() {
                return Err(SweepError::BifurcationWithSecondAxis);
            }
            if outputs.is_empty() {
                return Err(SweepError::NoObservedOutputs);
            }
            for (index, output) in outputs.iter().enumerate() {
                if !output.min.is_finite() || !output.max.is_finite() || output.min >= output.max {
                    return Err(SweepError::InvalidOutputRange {
                        index,
                        min: output.min,
                        max: output.max,
                    });
                }
            }
            if *output_resolution < 2 {
                return Err(SweepError::OutputResolutionTooSmall(*output_resolution));
            }
        }
        Ok(())
    }

    /// Targets listed on both axes. Allowed, but almost always a mistake.
    pub fn cross_axis_overlap(&self) -> Vec<&H> {
        let Some(y_axis) = &self.y_axis else {
            return Vec::new();
        };
        self.x_axis
            .targets
            .iter()
            .filter(|target| y_axis.targets.contains(target))
            .collect()
    }
}

fn split_items(input: &str) -> impl Iterator<Item = &str> {
    input
        .split([',', '|'])
        .map(str::trim)
        .filter(|item| !item.is_empty())
}

/// Parses a list of numbers separated by `,` or `|`. Empty items are skipped.
pub fn parse_doubles(input: &str) -> Result<Vec<f64>> {
    split_items(input)
        .map(|item| {
            item.parse::<f64>()
                .map_err(|_| anyhow!("Could not parse '{}' as a number.", item))
        })
        .collect()
}

/// Parses a list of `FromStr` items separated by `,` or `|`.
pub fn parse_list<T>(input: &str) -> Result<Vec<T>>
where
    T: FromStr,
    T::Err: Display,
{
    let items: Vec<T> = split_items(input)
        .map(|item| {
            item.parse::<T>()
                .map_err(|err| anyhow!("Invalid list entry '{}': {}", item, err))
        })
        .collect::<Result<_>>()?;
    if items.is_empty() && !input.trim().is_empty() {
        bail!("List '{}' contains no entries.", input);
    }
    Ok(items)
}
