//! Reaction networks stored as JSON, including the bundled Robertson problem.

use crate::backends::BackendKind;
use crate::odesys::OdeSys;
use crate::reaction::{rate_equations, RateEquations, Reaction};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const ROBERTSON: &str = include_str!("../data/robertson.json");

/// A reaction network with rate-constant values and initial conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionDataset {
    pub name: String,
    pub species: Vec<String>,
    pub reactions: Vec<Reaction>,
    pub rate_constants: HashMap<String, f64>,
    /// Species left out start at zero.
    #[serde(default)]
    pub initial: HashMap<String, f64>,
    pub t_end: f64,
}

impl ReactionDataset {
    /// Robertson's stiff three-species kinetics problem.
    pub fn robertson() -> Result<Self> {
        Self::from_json_str(ROBERTSON).context("Failed to parse bundled Robertson dataset")
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let dataset: Self = serde_json::from_str(json)?;
        Ok(dataset)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read dataset: {}", path.as_ref().display()))?;
        Self::from_json_str(&content)
            .with_context(|| format!("Failed to parse dataset: {}", path.as_ref().display()))
    }

    pub fn rate_equations(&self) -> Result<RateEquations> {
        rate_equations(&self.reactions, &self.species)
            .with_context(|| format!("Invalid reaction network in dataset {}", self.name))
    }

    pub fn to_odesys(&self, kind: BackendKind) -> Result<OdeSys> {
        let system = OdeSys::from_reactions(&self.reactions, &self.species, kind)
            .with_context(|| format!("Failed to set up dataset {} on the {kind} backend", self.name))?;
        Ok(system)
    }

    /// Rate-constant values ordered like the system's parameters.
    pub fn parameters(&self, system: &OdeSys) -> Result<Vec<f64>> {
        system
            .params_from_map(&self.rate_constants)
            .with_context(|| format!("Rate constants of dataset {}", self.name))
    }

    pub fn initial_state(&self, system: &OdeSys) -> Result<Vec<f64>> {
        system
            .initial_state(&self.initial)
            .with_context(|| format!("Initial conditions of dataset {}", self.name))
    }

    /// `n` output times: zero followed by a geometric sequence from
    /// `t_end * 1e-(n-2)` up to `t_end`, which suits kinetics spanning decades.
    pub fn log_times(&self, n: usize) -> Vec<f64> {
        if n == 0 {
            return Vec::new();
        }
        let mut times = vec![0.0];
        if n == 1 {
            return times;
        }
        let decades = (n - 2) as i32;
        times.extend((0..n - 1).map(|i| self.t_end * 10f64.powi(i as i32 - decades)));
        times
    }
}
