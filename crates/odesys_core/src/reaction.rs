//! Mass-action reaction networks and their rate equations.

use crate::error::ModelError;
use crate::odesys::SymbolicSystem;
use crate::symbolic::Expr;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// One elementary reaction: a rate-constant name, reactant multiplicities
/// and the signed net change of each species.
///
/// Serialises as a three element array, e.g.
/// `["k1", {"A": 1}, {"A": -1, "B": 1}]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction(String, BTreeMap<String, u32>, BTreeMap<String, i32>);

impl Reaction {
    pub fn new<'a>(
        rate_constant: &str,
        reactants: impl IntoIterator<Item = (&'a str, u32)>,
        net: impl IntoIterator<Item = (&'a str, i32)>,
    ) -> Self {
        Self(
            rate_constant.to_string(),
            reactants
                .into_iter()
                .map(|(s, m)| (s.to_string(), m))
                .collect(),
            net.into_iter().map(|(s, n)| (s.to_string(), n)).collect(),
        )
    }

    pub fn rate_constant(&self) -> &str {
        &self.0
    }

    pub fn reactants(&self) -> &BTreeMap<String, u32> {
        &self.1
    }

    pub fn net(&self) -> &BTreeMap<String, i32> {
        &self.2
    }

    /// `k * prod(c_s ^ m_s)` over the reactants.
    pub fn rate_expression(&self) -> Expr {
        let mut factors = vec![Expr::symbol(self.rate_constant())];
        factors.extend(
            self.reactants()
                .iter()
                .map(|(species, &m)| Expr::symbol(species.as_str()).powi(m as i32)),
        );
        Expr::product(factors)
    }

    fn species_names(&self) -> impl Iterator<Item = &String> {
        self.reactants().keys().chain(self.net().keys())
    }
}

/// Rate-of-change expressions aligned with `species`, plus the rate
/// constants in order of first use.
#[derive(Debug, Clone, PartialEq)]
pub struct RateEquations {
    pub rhs: Vec<Expr>,
    pub species: Vec<String>,
    pub rate_constants: Vec<String>,
}

impl RateEquations {
    /// An autonomous system whose parameters are the rate constants.
    pub fn into_system(self) -> SymbolicSystem {
        SymbolicSystem::from_parts(self.rhs, self.species, self.rate_constants, None)
    }
}

/// Builds mass-action rate equations for `reactions` over `species`.
pub fn rate_equations<S: AsRef<str>>(
    reactions: &[Reaction],
    species: &[S],
) -> Result<RateEquations, ModelError> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(species.len());
    for (i, name) in species.iter().enumerate() {
        if index.insert(name.as_ref(), i).is_some() {
            return Err(ModelError::DuplicateSymbol(name.as_ref().to_string()));
        }
    }

    let mut terms: Vec<Vec<Expr>> = vec![Vec::new(); species.len()];
    let mut rate_constants = Vec::new();
    let mut seen = HashSet::new();

    for (i, reaction) in reactions.iter().enumerate() {
        if let Some(unknown) = reaction
            .species_names()
            .find(|name| !index.contains_key(name.as_str()))
        {
            return Err(ModelError::UnknownSpecies {
                reaction: i,
                species: unknown.clone(),
            });
        }
        let k = reaction.rate_constant();
        if index.contains_key(k) {
            return Err(ModelError::DuplicateSymbol(k.to_string()));
        }
        if seen.insert(k.to_string()) {
            rate_constants.push(k.to_string());
        }

        let rate = reaction.rate_expression();
        for (name, &change) in reaction.net() {
            if change != 0 {
                terms[index[name.as_str()]].push(f64::from(change) * rate.clone());
            }
        }
    }

    Ok(RateEquations {
        rhs: terms.into_iter().map(Expr::sum).collect(),
        species: species.iter().map(|s| s.as_ref().to_string()).collect(),
        rate_constants,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn robertson() -> Vec<Reaction> {
        vec![
            Reaction::new("k1", [("A", 1)], [("A", -1), ("B", 1)]),
            Reaction::new("k2", [("B", 2)], [("B", -1), ("C", 1)]),
            Reaction::new("k3", [("B", 1), ("C", 1)], [("B", -1), ("A", 1)]),
        ]
    }

    #[test]
    fn builds_robertson_rate_equations() {
        let eqs = rate_equations(&robertson(), &["A", "B", "C"]).expect("valid network");
        assert_eq!(eqs.rate_constants, vec!["k1", "k2", "k3"]);
        assert_eq!(eqs.rhs[0], parse("-k1*A + k3*B*C").expect("parse"));
        assert_eq!(eqs.rhs[1], parse("k1*A - k2*B^2 - k3*B*C").expect("parse"));
        assert_eq!(eqs.rhs[2], parse("k2*B^2").expect("parse"));
    }

    #[test]
    fn rate_constants_are_deduplicated_in_first_use_order() {
        let reactions = vec![
            Reaction::new("kf", [("A", 1)], [("A", -1), ("B", 1)]),
            Reaction::new("kb", [("B", 1)], [("B", -1), ("A", 1)]),
            Reaction::new("kf", [("B", 1)], [("B", -1), ("C", 1)]),
        ];
        let eqs = rate_equations(&reactions, &["A", "B", "C"]).expect("valid network");
        assert_eq!(eqs.rate_constants, vec!["kf", "kb"]);
    }

    #[test]
    fn species_without_reactions_get_zero_rhs() {
        let reactions = vec![Reaction::new("k", [("A", 1)], [("A", -1)])];
        let eqs = rate_equations(&reactions, &["A", "X"]).expect("valid network");
        assert!(eqs.rhs[1].is_zero());
    }

    #[test]
    fn rejects_malformed_networks() {
        let reactions = vec![Reaction::new("k", [("A", 1)], [("A", -1), ("Q", 1)])];
        assert_eq!(
            rate_equations(&reactions, &["A", "B"]),
            Err(ModelError::UnknownSpecies {
                reaction: 0,
                species: "Q".to_string()
            })
        );
        assert_eq!(
            rate_equations(&robertson(), &["A", "B", "A"]),
            Err(ModelError::DuplicateSymbol("A".to_string()))
        );
        let clash = vec![Reaction::new("A", [("A", 1)], [("A", -1)])];
        assert_eq!(
            rate_equations(&clash, &["A"]),
            Err(ModelError::DuplicateSymbol("A".to_string()))
        );
    }

    #[test]
    fn reactions_round_trip_through_json_arrays() {
        let json = r#"["k2", {"B": 2}, {"B": -1, "C": 1}]"#;
        let reaction: Reaction = serde_json::from_str(json).expect("deserialize");
        assert_eq!(reaction, robertson()[1]);
        assert_eq!(reaction.reactants()["B"], 2);
        assert_eq!(
            serde_json::to_string(&reaction).expect("serialize"),
            r#"["k2",{"B":2},{"B":-1,"C":1}]"#
        );
    }
}
