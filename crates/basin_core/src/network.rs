//! Discrete-time additive recurrent neural network used as a reference host.
//!
//! Each step updates all neurons synchronously:
//! `a_i = b_i + sum_j w_ji * o_j`, `o_i = tanh(a_i)`.
//! Elements are addressed with the `ID:kind` syntax of the calculator settings:
//! `3:o` output, `3:a` activation, `3:b` bias of neuron 3 and `7:w` weight of synapse 7.

use crate::host::{ActivationSnapshot, ObservableRegistry, ParameterTarget, SystemStepper};
use crate::sweep::parse_list;
use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Element {
    Activation,
    Output,
    Bias,
    Weight,
}

impl Element {
    fn code(self) -> &'static str {
        match self {
            Element::Activation => "a",
            Element::Output => "o",
            Element::Bias => "b",
            Element::Weight => "w",
        }
    }
}

/// Address of one scalar in a [`RecurrentNetwork`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle {
    pub id: u32,
    pub element: Element,
}

impl ElementHandle {
    pub fn output(id: u32) -> Self {
        Self { id, element: Element::Output }
    }

    pub fn activation(id: u32) -> Self {
        Self { id, element: Element::Activation }
    }

    pub fn bias(id: u32) -> Self {
        Self { id, element: Element::Bias }
    }

    pub fn weight(id: u32) -> Self {
        Self { id, element: Element::Weight }
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.element.code())
    }
}

impl FromStr for ElementHandle {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let Some((id, kind)) = s.split_once(':') else {
            bail!("Invalid element identifier '{}'. Expected ID:o, ID:a, ID:b or ID:w.", s);
        };
        let id = id
            .trim()
            .parse::<u32>()
            .map_err(|_| anyhow!("Invalid element id in '{}'.", s))?;
        let element = match kind.trim() {
            "a" => Element::Activation,
            "o" => Element::Output,
            "b" => Element::Bias,
            "w" => Element::Weight,
            other => bail!("Unknown element kind '{}' in '{}'.", other, s),
        };
        Ok(Self { id, element })
    }
}

/// Parses `"1:b,2:b|3:o"` style lists.
pub fn parse_element_list(input: &str) -> Result<Vec<ElementHandle>> {
    parse_list(input)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neuron {
    pub id: u32,
    pub bias: f64,
    #[serde(default)]
    pub activation: f64,
    #[serde(default)]
    pub output: f64,
}

impl Neuron {
    pub fn new(id: u32, bias: f64) -> Self {
        Self {
            id,
            bias,
            activation: 0.0,
            output: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synapse {
    pub id: u32,
    pub source: u32,
    pub target: u32,
    pub weight: f64,
}

/// Activations and outputs in neuron id order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub activations: Vec<f64>,
    pub outputs: Vec<f64>,
}

pub struct RecurrentNetwork {
    neurons: Vec<Neuron>,
    synapses: Vec<Synapse>,
    /// `(synapse, source neuron)` index pairs grouped by target neuron index.
    incoming: Vec<Vec<(usize, usize)>>,
    initial: NetworkSnapshot,
    /// Neurons whose activation was written since the last notification.
    pending_activation: Vec<usize>,
    scratch: Vec<f64>,
}

impl RecurrentNetwork {
    /// Builds a network whose current activations and outputs become the state
    /// `reset` returns to.
    pub fn new(mut neurons: Vec<Neuron>, synapses: Vec<Synapse>) -> Result<Self> {
        neurons.sort_by_key(|n| n.id);
        if let Some(pair) = neurons.windows(2).find(|pair| pair[0].id == pair[1].id) {
            bail!("Neuron id {} is used twice.", pair[0].id);
        }
        let mut seen = Vec::with_capacity(synapses.len());
        let mut incoming = vec![Vec::new(); neurons.len()];
        for (index, synapse) in synapses.iter().enumerate() {
            if seen.contains(&synapse.id) {
                bail!("Synapse id {} is used twice.", synapse.id);
            }
            seen.push(synapse.id);
            let lookup = |id: u32| neurons.binary_search_by_key(&id, |n| n.id).ok();
            let Some(source) = lookup(synapse.source) else {
                bail!("Synapse {} starts at unknown neuron {}.", synapse.id, synapse.source);
            };
            let Some(target) = lookup(synapse.target) else {
                bail!("Synapse {} ends at unknown neuron {}.", synapse.id, synapse.target);
            };
            incoming[target].push((index, source));
        }

        let mut network = Self {
            scratch: vec![0.0; neurons.len()],
            neurons,
            synapses,
            incoming,
            initial: NetworkSnapshot {
                activations: Vec::new(),
                outputs: Vec::new(),
            },
            pending_activation: Vec::new(),
        };
        network.initial = network.capture();
        Ok(network)
    }

    pub fn neurons(&self) -> &[Neuron] {
        &self.neurons
    }

    pub fn synapses(&self) -> &[Synapse] {
        &self.synapses
    }

    fn neuron_index(&self, id: u32) -> Option<usize> {
        self.neurons.binary_search_by_key(&id, |n| n.id).ok()
    }

    fn synapse_index(&self, id: u32) -> Option<usize> {
        self.synapses.iter().position(|s| s.id == id)
    }
}

impl ObservableRegistry for RecurrentNetwork {
    type Handle = ElementHandle;

    fn list_observables(&self) -> Vec<ElementHandle> {
        self.neurons.iter().map(|n| ElementHandle::output(n.id)).collect()
    }

    fn read(&self, handle: &ElementHandle) -> Option<f64> {
        let neuron = || self.neuron_index(handle.id).map(|i| &self.neurons[i]);
        match handle.element {
            Element::Activation => neuron().map(|n| n.activation),
            Element::Output => neuron().map(|n| n.output),
            Element::Bias => neuron().map(|n| n.bias),
            Element::Weight => self.synapse_index(handle.id).map(|i| self.synapses[i].weight),
        }
    }
}

impl ParameterTarget for RecurrentNetwork {
    fn list_parameters(&self) -> Vec<ElementHandle> {
        self.neurons
            .iter()
            .map(|n| ElementHandle::bias(n.id))
            .chain(self.synapses.iter().map(|s| ElementHandle::weight(s.id)))
            .collect()
    }

    fn write(&mut self, handle: &ElementHandle, value: f64) -> bool {
        if handle.element == Element::Weight {
            return match self.synapse_index(handle.id) {
                Some(i) => {
                    self.synapses[i].weight = value;
                    true
                }
                None => false,
            };
        }
        let Some(index) = self.neuron_index(handle.id) else {
            return false;
        };
        let neuron = &mut self.neurons[index];
        match handle.element {
            Element::Activation => {
                neuron.activation = value;
                if !self.pending_activation.contains(&index) {
                    self.pending_activation.push(index);
                }
            }
            Element::Output => neuron.output = value,
            Element::Bias => neuron.bias = value,
            Element::Weight => return false,
        }
        true
    }
}

impl SystemStepper for RecurrentNetwork {
    fn step(&mut self) {
        for (i, neuron) in self.neurons.iter().enumerate() {
            let input: f64 = self.incoming[i]
                .iter()
                .map(|&(s, j)| self.synapses[s].weight * self.neurons[j].output)
                .sum();
            self.scratch[i] = neuron.bias + input;
        }
        for (neuron, activation) in self.neurons.iter_mut().zip(&self.scratch) {
            neuron.activation = *activation;
            neuron.output = activation.tanh();
        }
    }

    /// Recomputes outputs of neurons whose activation was written directly.
    fn notify_parameters_changed(&mut self) -> Result<()> {
        if let Some(n) = self.neurons.iter().find(|n| !n.bias.is_finite()) {
            bail!("Bias of neuron {} is not finite.", n.id);
        }
        if let Some(s) = self.synapses.iter().find(|s| !s.weight.is_finite()) {
            bail!("Weight of synapse {} is not finite.", s.id);
        }
        for index in self.pending_activation.drain(..) {
            let neuron = &mut self.neurons[index];
            neuron.output = neuron.activation.tanh();
        }
        Ok(())
    }

    fn reset(&mut self) {
        let initial = self.initial.clone();
        self.restore(&initial);
    }
}

impl ActivationSnapshot for RecurrentNetwork {
    type Snapshot = NetworkSnapshot;

    fn capture(&self) -> NetworkSnapshot {
        NetworkSnapshot {
            activations: self.neurons.iter().map(|n| n.activation).collect(),
            outputs: self.neurons.iter().map(|n| n.output).collect(),
        }
    }

    fn restore(&mut self, snapshot: &NetworkSnapshot) {
        for ((neuron, activation), output) in self
            .neurons
            .iter_mut()
            .zip(&snapshot.activations)
            .zip(&snapshot.outputs)
        {
            neuron.activation = *activation;
            neuron.output = *output;
        }
        self.pending_activation.clear();
    }
}
