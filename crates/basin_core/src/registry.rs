use crate::sampler::SamplerSettings;
use crate::sweep::{ClassificationMode, SweepAxis, SweepConfig};
use anyhow::{anyhow, bail, Result};
use std::collections::BTreeMap;

/// Produces a calculator's default configuration. Axes come back empty and must be
/// filled in with the host's targets before running.
pub type CalculatorFactory<H> = fn() -> SweepConfig<H>;

/// Name to factory map populated explicitly by the embedding application.
pub struct CalculatorRegistry<H> {
    factories: BTreeMap<String, CalculatorFactory<H>>,
}

impl<H> Default for CalculatorRegistry<H> {
    fn default() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }
}

impl<H> CalculatorRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `basin_of_attraction`, `isoperiod` and `bifurcation`.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.factories.insert("basin_of_attraction".to_string(), basin_of_attraction::<H>);
        registry.factories.insert("isoperiod".to_string(), isoperiod::<H>);
        registry.factories.insert("bifurcation".to_string(), bifurcation::<H>);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: CalculatorFactory<H>) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            bail!("Calculator '{}' is already registered.", name);
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    pub fn create(&self, name: &str) -> Result<SweepConfig<H>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| anyhow!("Unknown calculator '{}'.", name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

fn basin_of_attraction<H>() -> SweepConfig<H> {
    let mut config = SweepConfig::new("basin_of_attraction", SweepAxis::new(200));
    config.y_axis = Some(SweepAxis::new(200));
    config.sampler = SamplerSettings {
        pre_run_steps: 100,
        max_steps: 2000,
        max_period: 2000,
        tolerance: 1e-3,
    };
    config
}

fn isoperiod<H>() -> SweepConfig<H> {
    let mut config = basin_of_attraction();
    config.name = "isoperiod".to_string();
    config.mode = ClassificationMode::Period;
    config
}

fn bifurcation<H>() -> SweepConfig<H> {
    let mut config = SweepConfig::new("bifurcation", SweepAxis::new(600));
    config.mode = ClassificationMode::bifurcation();
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::UnconvergedPolicy;

    #[test]
    fn builtin_calculators_are_listed_in_order() {
        let registry = CalculatorRegistry::<u32>::with_builtin();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec!["basin_of_attraction", "bifurcation", "isoperiod"]);
    }

    #[test]
    fn factories_produce_fresh_templates() {
        let registry = CalculatorRegistry::<u32>::with_builtin();
        let mut config = registry.create("isoperiod").unwrap();
        assert_eq!(config.name, "isoperiod");
        assert_eq!(config.mode, ClassificationMode::Period);
        assert_eq!(config.y_axis.as_ref().map(|axis| axis.resolution), Some(200));

        config.x_axis = SweepAxis::new(10).with_target(1, -1.0, 1.0);
        config.y_axis = Some(SweepAxis::new(10).with_target(2, -1.0, 1.0));
        assert!(config.validate().is_ok());
        // Mutating one template leaves the next untouched.
        assert!(registry.create("isoperiod").unwrap().x_axis.targets.is_empty());

        let bifurcation = registry.create("bifurcation").unwrap();
        assert!(bifurcation.y_axis.is_none());
        assert!(matches!(
            bifurcation.mode,
            ClassificationMode::Bifurcation {
                output_resolution: 500,
                unconverged: UnconvergedPolicy::SameLayer,
                ..
            }
        ));
    }

    #[test]
    fn custom_registration() {
        fn tiny() -> SweepConfig<u32> {
            SweepConfig::new("tiny", SweepAxis::new(2).with_target(0, 0.0, 1.0))
        }

        let mut registry = CalculatorRegistry::new();
        registry.register("tiny", tiny).unwrap();
        assert!(registry.contains("tiny"));
        assert!(registry.register("tiny", tiny).is_err());
        assert!(registry.create("tiny").unwrap().validate().is_ok());

        let err = registry.create("missing").unwrap_err();
        assert_eq!(err.to_string(), "Unknown calculator 'missing'.");
    }
}
