//! Annotations describe potential functions over a sequence of trees t₁ … tₙ:
//!
//! ```text
//! Φ(t₁ … tₙ) = Σᵢ qᵢ · rk(tᵢ) + Σ_(a₁ … aₙ, c) q_(a₁ … aₙ, c) · log₂(a₁·|t₁| + … + aₙ·|tₙ| + c)
//! ```
//!
//! The first sum is carried by the rank coefficients, the second by the indexed coefficients.

use arbor_common::data::typed_ast::Ident;
use num_rational::BigRational;
use num_traits::One;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::coefficient::{Coefficient, Solution, Unknown, UnknownGen};
use crate::constraint::Constraint;

/// One non-negative factor per tree, followed by the constant offset.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Index(Vec<u32>);

impl Index {
    pub fn new(params: impl IntoIterator<Item = u32>, offset: u32) -> Self {
        let mut entries: Vec<_> = params.into_iter().collect();
        entries.push(offset);
        Index(entries)
    }

    /// Panics on an empty vector, which has no offset.
    pub fn from_vec(entries: Vec<u32>) -> Self {
        if entries.is_empty() {
            bug!("an index needs at least an offset");
        }
        Index(entries)
    }

    /// `(0, …, 0, offset)`
    pub fn constant(size: usize, offset: u32) -> Self {
        Index::new(std::iter::repeat(0).take(size), offset)
    }

    /// `(0, …, 0, 2)`, the index of constant potential 1.
    pub fn unit(size: usize) -> Self {
        Index::constant(size, 2)
    }

    pub fn size(&self) -> usize {
        self.0.len() - 1
    }

    pub fn params(&self) -> &[u32] {
        &self.0[..self.0.len() - 1]
    }

    pub fn param(&self, position: usize) -> u32 {
        self.params()[position]
    }

    pub fn offset(&self) -> u32 {
        self.0[self.0.len() - 1]
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    /// Every tree factor is zero.
    pub fn is_constant(&self) -> bool {
        self.params().iter().all(|&a| a == 0)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&a| a == 0)
    }

    pub fn is_unit(&self) -> bool {
        self.is_constant() && self.offset() == 2
    }

    pub fn zero_on(&self, positions: &[usize]) -> bool {
        positions.iter().all(|&pos| self.param(pos) == 0)
    }

    /// The factors at `positions`, in that order, followed by the offset.
    pub fn project(&self, positions: &[usize]) -> Index {
        Index::new(positions.iter().map(|&pos| self.param(pos)), self.offset())
    }

    pub fn with_offset(&self, offset: u32) -> Index {
        Index::new(self.params().iter().copied(), offset)
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("(")?;
        for (i, entry) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", entry)?;
        }
        f.write_str(")")
    }
}

/// Rank coefficients plus indexed coefficients. Absent indices have coefficient zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Annotation {
    pub name: String,
    ranks: Vec<Coefficient>,
    coefficients: BTreeMap<Index, Coefficient>,
}

impl Annotation {
    pub fn new(
        name: impl Into<String>,
        ranks: Vec<Coefficient>,
        coefficients: BTreeMap<Index, Coefficient>,
    ) -> Self {
        let name = name.into();
        for index in coefficients.keys() {
            if index.size() != ranks.len() {
                bug!(
                    "index {} does not fit annotation {} of size {}",
                    index,
                    name,
                    ranks.len()
                );
            }
        }
        Annotation {
            name,
            ranks,
            coefficients,
        }
    }

    pub fn zero(size: usize) -> Self {
        Annotation {
            name: "0".to_owned(),
            ranks: vec![Coefficient::zero(); size],
            coefficients: BTreeMap::new(),
        }
    }

    /// Fresh unknown ranks and no indexed coefficients yet; those are added with
    /// [`Annotation::define`].
    pub fn fresh(size: usize, name: impl Into<String>, unknowns: &UnknownGen) -> Self {
        let name = name.into();
        let ranks = (0..size)
            .map(|i| unknowns.fresh(&format!("{}*{}", name, i)))
            .collect();
        Annotation {
            name,
            ranks,
            coefficients: BTreeMap::new(),
        }
    }

    /// The coefficient at `index`, creating a fresh unknown for it if there is none yet.
    pub fn define(&mut self, index: Index, unknowns: &UnknownGen) -> Coefficient {
        if index.size() != self.size() {
            bug!(
                "index {} does not fit annotation {} of size {}",
                index,
                self.name,
                self.size()
            );
        }
        let name = &self.name;
        self.coefficients
            .entry(index)
            .or_insert_with_key(|index| unknowns.fresh(&format!("{}{}", name, index)))
            .clone()
    }

    pub fn set(&mut self, index: Index, value: Coefficient) {
        if index.size() != self.size() {
            bug!("index {} does not fit annotation {}", index, self.name);
        }
        self.coefficients.insert(index, value);
    }

    pub fn size(&self) -> usize {
        self.ranks.len()
    }

    pub fn rank(&self, position: usize) -> &Coefficient {
        &self.ranks[position]
    }

    pub fn ranks(&self) -> &[Coefficient] {
        &self.ranks
    }

    pub fn coefficient(&self, index: &Index) -> Option<&Coefficient> {
        self.coefficients.get(index)
    }

    pub fn coefficient_or_zero(&self, index: &Index) -> Coefficient {
        self.coefficients
            .get(index)
            .cloned()
            .unwrap_or_else(Coefficient::zero)
    }

    pub fn indices(&self) -> impl Iterator<Item = &Index> {
        self.coefficients.keys()
    }

    pub fn coefficients(&self) -> impl Iterator<Item = (&Index, &Coefficient)> {
        self.coefficients.iter()
    }

    pub fn is_zero(&self) -> bool {
        self.ranks
            .iter()
            .chain(self.coefficients.values())
            .all(Coefficient::is_known_zero)
    }

    pub fn is_unknown(&self) -> bool {
        self.ranks
            .iter()
            .chain(self.coefficients.values())
            .any(|coefficient| coefficient.unknown().is_some())
    }

    pub fn occurring_coefficients(&self) -> BTreeSet<Unknown> {
        self.ranks
            .iter()
            .chain(self.coefficients.values())
            .filter_map(|coefficient| coefficient.unknown().map(Unknown::canonical))
            .collect()
    }

    pub fn substitute(&self, solution: &Solution) -> Annotation {
        Annotation {
            name: self.name.clone(),
            ranks: self
                .ranks
                .iter()
                .map(|rank| rank.substitute(solution))
                .collect(),
            coefficients: self
                .coefficients
                .iter()
                .map(|(index, coefficient)| (index.clone(), coefficient.substitute(solution)))
                .collect(),
        }
    }

    /// Indices present in either annotation.
    pub fn union_indices(&self, other: &Annotation) -> BTreeSet<Index> {
        self.indices().chain(other.indices()).cloned().collect()
    }

    /// Constraints stating `self = other + cost`, where the cost is paid from the unit index.
    pub fn increment(&self, other: &Annotation, cost: &BigRational, reason: &str) -> Vec<Constraint> {
        self.check_same_size(other);
        let ranks = self
            .ranks
            .iter()
            .zip(&other.ranks)
            .map(|(q, p)| Constraint::eq(q.clone(), p.clone(), format!("{}: rank", reason)));

        let mut indices = self.union_indices(other);
        indices.insert(Index::unit(self.size()));
        let coefficients = indices.into_iter().map(|index| {
            let q = self.coefficient_or_zero(&index);
            let p = other.coefficient_or_zero(&index);
            if index.is_unit() {
                Constraint::sum(
                    q,
                    vec![p, Coefficient::Known(cost.clone())],
                    format!("{}: q{} = p{} + {}", reason, index, index, cost),
                )
            } else {
                Constraint::eq(q, p, format!("{}: q{} = p{}", reason, index, index))
            }
        });

        ranks.chain(coefficients).collect()
    }

    /// Constraints stating that the two annotations are equal, pointwise.
    pub fn equate(&self, other: &Annotation, reason: &str) -> Vec<Constraint> {
        self.check_same_size(other);
        let ranks = self
            .ranks
            .iter()
            .zip(&other.ranks)
            .enumerate()
            .map(|(i, (q, p))| Constraint::eq(q.clone(), p.clone(), format!("{}: rank {}", reason, i)));
        let coefficients = self.union_indices(other).into_iter().map(|index| {
            Constraint::eq(
                self.coefficient_or_zero(&index),
                other.coefficient_or_zero(&index),
                format!("{}: {}", reason, index),
            )
        });
        ranks.chain(coefficients).collect()
    }

    /// The pointwise sum of two annotations without unknowns.
    pub fn add(&self, other: &Annotation) -> Annotation {
        self.check_same_size(other);
        let known = |coefficient: &Coefficient| match coefficient {
            Coefficient::Known(value) => value.clone(),
            Coefficient::Unknown(unknown) => {
                bug!("cannot add annotations with unknown {}", unknown)
            }
        };
        let ranks = self
            .ranks
            .iter()
            .zip(&other.ranks)
            .map(|(a, b)| Coefficient::Known(known(a) + known(b)))
            .collect();
        let coefficients = self
            .union_indices(other)
            .into_iter()
            .map(|index| {
                let sum = known(&self.coefficient_or_zero(&index))
                    + known(&other.coefficient_or_zero(&index));
                (index, Coefficient::Known(sum))
            })
            .collect();
        Annotation::new(format!("{}+{}", self.name, other.name), ranks, coefficients)
    }

    fn check_same_size(&self, other: &Annotation) {
        if self.size() != other.size() {
            bug!(
                "annotations {} and {} have sizes {} and {}",
                self.name,
                other.name,
                self.size(),
                other.size()
            );
        }
    }

    /// Renders the potential as a formula over the given tree names, omitting zero terms.
    pub fn potential(&self, ids: &[Ident]) -> String {
        let mut terms = Vec::new();
        let scaled = |coefficient: &Coefficient, term: String| {
            if coefficient.known().map_or(false, One::is_one) {
                term
            } else {
                format!("{}·{}", coefficient, term)
            }
        };

        for (rank, id) in self.ranks.iter().zip(ids) {
            if !rank.is_known_zero() {
                terms.push(scaled(rank, format!("rk({})", id)));
            }
        }
        for (index, coefficient) in &self.coefficients {
            if coefficient.is_known_zero() {
                continue;
            }
            if index.is_unit() {
                terms.push(coefficient.to_string());
                continue;
            }
            let mut args: Vec<_> = index
                .params()
                .iter()
                .zip(ids)
                .filter(|(&a, _)| a != 0)
                .map(|(&a, id)| {
                    if a == 1 {
                        format!("|{}|", id)
                    } else {
                        format!("{}·|{}|", a, id)
                    }
                })
                .collect();
            if index.offset() != 0 {
                args.push(index.offset().to_string());
            }
            terms.push(scaled(coefficient, format!("log({})", args.join(" + "))));
        }

        if terms.is_empty() {
            "0".to_owned()
        } else {
            terms.join(" + ")
        }
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}[", self.name)?;
        for (i, rank) in self.ranks.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", rank)?;
        }
        f.write_str(";")?;
        for (index, coefficient) in &self.coefficients {
            write!(f, " {} ↦ {}", index, coefficient)?;
        }
        f.write_str("]")
    }
}

/// Γ | Q: identifiers of tree type, each annotated by the corresponding position of Q.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnotatingContext {
    pub ids: Vec<Ident>,
    pub annotation: Annotation,
}

impl AnnotatingContext {
    pub fn new(ids: Vec<Ident>, annotation: Annotation) -> Self {
        if ids.len() != annotation.size() {
            bug!(
                "context of {} identifiers annotated by {} of size {}",
                ids.len(),
                annotation.name,
                annotation.size()
            );
        }
        if ids.iter().collect::<BTreeSet<_>>().len() != ids.len() {
            bug!("context identifiers are not unique");
        }
        AnnotatingContext { ids, annotation }
    }

    pub fn size(&self) -> usize {
        self.ids.len()
    }

    pub fn position_of(&self, id: &Ident) -> Option<usize> {
        self.ids.iter().position(|other| other == id)
    }

    /// Like [`AnnotatingContext::position_of`], for identifiers which must be present.
    pub fn expect_position(&self, id: &Ident) -> usize {
        self.position_of(id)
            .unwrap_or_else(|| bug!("'{}' is not in context {}", id, self))
    }

    /// The factor `index` assigns to `id`.
    pub fn index_of(&self, id: &Ident, index: &Index) -> u32 {
        index.param(self.expect_position(id))
    }

    pub fn rank_of(&self, id: &Ident) -> &Coefficient {
        self.annotation.rank(self.expect_position(id))
    }

    /// The same context with its identifiers in the given order.
    pub fn reorder(&self, ids: &[Ident]) -> AnnotatingContext {
        if ids.len() != self.size() {
            bug!("cannot reorder {} to {} identifiers", self, ids.len());
        }
        let positions: Vec<_> = ids.iter().map(|id| self.expect_position(id)).collect();
        let ranks = positions
            .iter()
            .map(|&pos| self.annotation.rank(pos).clone())
            .collect();
        let coefficients = self
            .annotation
            .coefficients()
            .map(|(index, coefficient)| (index.project(&positions), coefficient.clone()))
            .collect();
        AnnotatingContext::new(
            ids.to_vec(),
            Annotation::new(self.annotation.name.clone(), ranks, coefficients),
        )
    }

    pub fn reorder_lexicographically(&self) -> AnnotatingContext {
        let mut ids = self.ids.clone();
        ids.sort();
        self.reorder(&ids)
    }
}

impl fmt::Display for AnnotatingContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let ids: Vec<_> = self.ids.iter().map(|id| id.0.as_str()).collect();
        write!(f, "{} | {}", ids.join(", "), self.annotation)
    }
}

/// Potential before and after evaluating a function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionAnnotation {
    pub from: Annotation,
    pub to: Annotation,
}

impl FunctionAnnotation {
    pub fn is_zero(&self) -> bool {
        self.from.is_zero() && self.to.is_zero()
    }

    pub fn substitute(&self, solution: &Solution) -> FunctionAnnotation {
        FunctionAnnotation {
            from: self.from.substitute(solution),
            to: self.to.substitute(solution),
        }
    }

    pub fn occurring_coefficients(&self) -> BTreeSet<Unknown> {
        let mut unknowns = self.from.occurring_coefficients();
        unknowns.extend(self.to.occurring_coefficients());
        unknowns
    }
}

impl fmt::Display for FunctionAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} → {}", self.from, self.to)
    }
}

/// The annotation a function is called with when evaluation is counted, plus the annotations it
/// may be called with when it is not.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CombinedFunctionAnnotation {
    pub with_cost: FunctionAnnotation,
    pub cost_free: Vec<FunctionAnnotation>,
}

impl CombinedFunctionAnnotation {
    pub fn substitute(&self, solution: &Solution) -> CombinedFunctionAnnotation {
        CombinedFunctionAnnotation {
            with_cost: self.with_cost.substitute(solution),
            cost_free: self
                .cost_free
                .iter()
                .map(|annotation| annotation.substitute(solution))
                .collect(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        std::iter::once(&self.with_cost)
            .chain(&self.cost_free)
            .any(|annotation| annotation.from.is_unknown() || annotation.to.is_unknown())
    }

    /// Renders every annotation as `from → to` potentials over the given parameter names.
    pub fn render(&self, params: &[Ident], result: &str) -> String {
        let result = [Ident::new(result)];
        let render = |annotation: &FunctionAnnotation| {
            format!(
                "{} → {}",
                annotation.from.potential(params),
                annotation.to.potential(&result)
            )
        };
        let mut text = render(&self.with_cost);
        for annotation in &self.cost_free {
            text.push_str(&format!(", cf: {}", render(annotation)));
        }
        text
    }
}

impl fmt::Display for CombinedFunctionAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.with_cost)?;
        for annotation in &self.cost_free {
            write!(f, ", cf {}", annotation)?;
        }
        Ok(())
    }
}
