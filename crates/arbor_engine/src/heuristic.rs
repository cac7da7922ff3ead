use arbor_common::config::HeuristicOptions;
use std::collections::BTreeSet;

use crate::annotation::{Annotation, Index};
use crate::coefficient::UnknownGen;

/// Chooses which indices a fresh annotation gets unknown coefficients for: every combination of
/// small per-tree factors and offsets, minus the tuples that carry no useful potential.
#[derive(Clone, Copy, Debug)]
pub struct SmartRange {
    options: HeuristicOptions,
}

impl SmartRange {
    pub fn new(options: HeuristicOptions) -> Self {
        SmartRange { options }
    }

    pub fn indices(&self, size: usize) -> BTreeSet<Index> {
        let mut tuples = vec![Vec::with_capacity(size + 1)];
        for _ in 0..size {
            tuples = tuples
                .into_iter()
                .flat_map(|prefix: Vec<u32>| {
                    (0..=self.options.max_param_index).map(move |a| {
                        let mut tuple = prefix.clone();
                        tuple.push(a);
                        tuple
                    })
                })
                .collect();
        }

        tuples
            .into_iter()
            .flat_map(|params| {
                (0..=self.options.max_offset).map(move |c| Index::new(params.iter().copied(), c))
            })
            .filter(|index| !index.is_zero())
            .filter(|index| !index.is_constant() || index.is_unit())
            .collect()
    }

    pub fn generate(&self, name: &str, size: usize, unknowns: &UnknownGen) -> Annotation {
        let mut annotation = Annotation::fresh(size, name, unknowns);
        for index in self.indices(size) {
            annotation.define(index, unknowns);
        }
        annotation
    }

    /// Like [`SmartRange::generate`], also covering every index `shape` uses.
    pub fn generate_like(&self, name: &str, shape: &Annotation, unknowns: &UnknownGen) -> Annotation {
        let mut indices = self.indices(shape.size());
        indices.extend(shape.indices().cloned());

        let mut annotation = Annotation::fresh(shape.size(), name, unknowns);
        for index in indices {
            annotation.define(index, unknowns);
        }
        annotation
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn rendered(indices: &BTreeSet<Index>) -> Vec<String> {
        indices.iter().map(|index| index.to_string()).collect()
    }

    #[test]
    fn test_default_range_for_one_tree() {
        let range = SmartRange::new(HeuristicOptions::default());
        assert_eq!(
            rendered(&range.indices(1)),
            vec!["(0,2)", "(1,0)", "(1,1)", "(1,2)"]
        );
    }

    #[test]
    fn test_filtering() {
        let range = SmartRange::new(HeuristicOptions::default());
        assert_eq!(rendered(&range.indices(0)), vec!["(2)"]);

        let indices = range.indices(2);
        // 4 factor combinations times 3 offsets, minus the 3 constant tuples, plus the unit
        assert_eq!(indices.len(), 10);
        assert!(indices.contains(&Index::unit(2)));
        assert!(!indices.contains(&Index::new([0, 0], 1)));
        assert!(indices.iter().all(|index| !index.is_zero()));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let range = SmartRange::new(HeuristicOptions {
            max_param_index: 2,
            max_offset: 1,
        });
        let first = range.generate("Q", 2, &UnknownGen::new());
        let second = range.generate("Q", 2, &UnknownGen::new());
        assert_eq!(first.to_string(), second.to_string());
        assert_eq!(first.size(), 2);
        assert!(first.indices().all(|index| index.as_slice().len() == 3));
        // no offset reaches 2, so not even the unit index is generated
        assert!(first.coefficient(&Index::unit(2)).is_none());
    }

    #[test]
    fn test_generate_like_extends_shape() {
        let gen = UnknownGen::new();
        let range = SmartRange::new(HeuristicOptions::default());
        let mut shape = Annotation::fresh(1, "S", &gen);
        shape.define(Index::new([3], 5), &gen);

        let like = range.generate_like("P", &shape, &gen);
        assert_eq!(like.indices().count(), 5);
        assert!(like.coefficient(&Index::new([3], 5)).is_some());
        assert_ne!(like.rank(0), shape.rank(0));
    }
}
