//! The derivation built by a prover: obligations in an arena, connected by rule applications.

use id_collections::IdVec;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Index;

use crate::constraint::Constraint;
use crate::obligation::{Obligation, ObligationId};
use crate::rules::{ApplicationResult, Rule};

#[derive(Clone, Debug)]
pub struct Edge {
    pub source: ObligationId,
    pub target: ObligationId,
    pub rule: Rule,
    pub constraints: Vec<Constraint>,
}

/// One rule application with the constraints that relate several of its obligations.
#[derive(Clone, Debug)]
pub struct Step {
    pub source: ObligationId,
    pub rule: Rule,
    pub general: Vec<Constraint>,
}

#[derive(Clone, Debug)]
pub struct Proof {
    obligations: IdVec<ObligationId, Obligation>,
    roots: Vec<ObligationId>,
    edges: Vec<Edge>,
    steps: Vec<Step>,
    named: BTreeMap<String, ObligationId>,
}

impl Proof {
    pub fn new() -> Self {
        Proof {
            obligations: IdVec::new(),
            roots: Vec::new(),
            edges: Vec::new(),
            steps: Vec::new(),
            named: BTreeMap::new(),
        }
    }

    pub fn add_root(&mut self, obligation: Obligation) -> ObligationId {
        let id = self.obligations.push(obligation);
        self.roots.push(id);
        id
    }

    /// Records an application of `rule` to `source`, returning the ids of its sub-obligations in
    /// order.
    pub fn add_application(
        &mut self,
        source: ObligationId,
        rule: Rule,
        result: ApplicationResult,
    ) -> Vec<ObligationId> {
        let ApplicationResult {
            obligations,
            constraints,
            general,
        } = result;
        if obligations.len() != constraints.len() {
            bug!(
                "({}) produced {} obligations but {} constraint lists",
                rule.name(),
                obligations.len(),
                constraints.len()
            );
        }

        let targets: Vec<_> = obligations
            .into_iter()
            .zip(constraints)
            .map(|(obligation, constraints)| {
                let target = self.obligations.push(obligation);
                self.edges.push(Edge {
                    source,
                    target,
                    rule,
                    constraints,
                });
                target
            })
            .collect();
        self.steps.push(Step {
            source,
            rule,
            general,
        });
        targets
    }

    /// Returns false if the name is already taken.
    pub fn record(&mut self, name: &str, id: ObligationId) -> bool {
        if self.named.contains_key(name) {
            return false;
        }
        self.named.insert(name.to_owned(), id);
        true
    }

    pub fn named(&self, name: &str) -> Option<ObligationId> {
        self.named.get(name).copied()
    }

    pub fn roots(&self) -> &[ObligationId] {
        &self.roots
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.obligations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obligations.len() == 0
    }

    /// Obligations no rule has been applied to yet.
    pub fn open(&self) -> Vec<ObligationId> {
        let mut closed = vec![false; self.obligations.len()];
        for step in &self.steps {
            closed[step.source.0] = true;
        }
        self.obligations
            .iter()
            .filter(|(id, _)| !closed[id.0])
            .map(|(id, _)| id)
            .collect()
    }

    pub fn constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.edges
            .iter()
            .flat_map(|edge| &edge.constraints)
            .chain(self.steps.iter().flat_map(|step| &step.general))
    }

    pub fn export(&self) -> ProofExport {
        let obligations = self
            .obligations
            .iter()
            .map(|(id, obligation)| ObligationExport {
                id: id.0,
                context: obligation.context.ids.iter().map(|id| id.0.clone()).collect(),
                annotation: obligation.context.annotation.to_string(),
                expr: obligation.expr.to_string(),
                result: obligation.result.to_string(),
                cost: obligation.cost,
                coin: obligation.coin,
            })
            .collect();
        let constraints = |constraints: &[Constraint]| {
            constraints
                .iter()
                .map(|constraint| constraint.to_string())
                .collect()
        };
        ProofExport {
            roots: self.roots.iter().map(|id| id.0).collect(),
            obligations,
            edges: self
                .edges
                .iter()
                .map(|edge| EdgeExport {
                    source: edge.source.0,
                    target: edge.target.0,
                    rule: edge.rule.name(),
                    constraints: constraints(&edge.constraints),
                })
                .collect(),
            steps: self
                .steps
                .iter()
                .filter(|step| !step.general.is_empty())
                .map(|step| StepExport {
                    source: step.source.0,
                    rule: step.rule.name(),
                    constraints: constraints(&step.general),
                })
                .collect(),
            named: self
                .named
                .iter()
                .map(|(name, id)| (name.clone(), id.0))
                .collect(),
        }
    }
}

impl Default for Proof {
    fn default() -> Self {
        Proof::new()
    }
}

impl Index<ObligationId> for Proof {
    type Output = Obligation;

    fn index(&self, id: ObligationId) -> &Obligation {
        &self.obligations[id]
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ObligationExport {
    pub id: usize,
    pub context: Vec<String>,
    pub annotation: String,
    pub expr: String,
    pub result: String,
    pub cost: bool,
    pub coin: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct EdgeExport {
    pub source: usize,
    pub target: usize,
    pub rule: &'static str,
    pub constraints: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct StepExport {
    pub source: usize,
    pub rule: &'static str,
    pub constraints: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ProofExport {
    pub roots: Vec<usize>,
    pub obligations: Vec<ObligationExport>,
    pub edges: Vec<EdgeExport>,
    pub steps: Vec<StepExport>,
    pub named: BTreeMap<String, usize>,
}
