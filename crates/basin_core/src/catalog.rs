use crate::error::SweepResult;
use crate::state::StateVector;
use serde::Serialize;

/// One full cycle of a discovered attractor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttractorSignature {
    pub states: Vec<StateVector>,
}

impl AttractorSignature {
    pub fn period(&self) -> usize {
        self.states.len()
    }

    /// All-or-nothing comparison against a candidate cycle of the same period.
    ///
    /// The candidate may start anywhere on the cycle, so every cyclic alignment is
    /// tried; an alignment only counts if all `period` states match.
    fn matches_cycle(&self, candidate: &[StateVector], tolerance: f64) -> SweepResult<bool> {
        let period = self.period();
        if candidate.len() != period {
            return Ok(false);
        }
        'shift: for shift in 0..period {
            for (i, state) in candidate.iter().enumerate() {
                if !self.states[(i + shift) % period].matches(state, tolerance)? {
                    continue 'shift;
                }
            }
            return Ok(true);
        }
        Ok(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogMatch {
    /// 1-based identity; 0 is reserved for "no attractor".
    pub id: usize,
    pub is_new: bool,
}

/// Append-only list of attractors seen during one sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AttractorCatalog {
    signatures: Vec<AttractorSignature>,
}

impl AttractorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Signature for a 1-based id.
    pub fn get(&self, id: usize) -> Option<&AttractorSignature> {
        id.checked_sub(1).and_then(|idx| self.signatures.get(idx))
    }

    pub fn signatures(&self) -> &[AttractorSignature] {
        &self.signatures
    }

    /// Returns the id of the oldest stored attractor matching `tail`, registering
    /// `tail` as a new attractor if none does. An empty tail is not an attractor
    /// and yields id 0 without touching the catalog.
    pub fn match_or_register(&mut self, tail: &[StateVector], tolerance: f64) -> SweepResult<CatalogMatch> {
        if tail.is_empty() {
            return Ok(CatalogMatch { id: 0, is_new: false });
        }
        for (idx, signature) in self.signatures.iter().enumerate() {
            if signature.matches_cycle(tail, tolerance)? {
                return Ok(CatalogMatch {
                    id: idx + 1,
                    is_new: false,
                });
            }
        }
        self.signatures.push(AttractorSignature {
            states: tail.to_vec(),
        });
        Ok(CatalogMatch {
            id: self.signatures.len(),
            is_new: true,
        })
    }

    pub fn clear(&mut self) {
        self.signatures.clear();
    }
}
