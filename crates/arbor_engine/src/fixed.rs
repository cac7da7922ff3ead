//! Annotations supplied from outside, either for whole functions or inside tactics.
//!
//! ```json
//! {
//!   "m.append": {
//!     "from": { "ranks": [1, 0], "coefficients": [[[1, 0, 0], 1], [[0, 0, 2], "3/2"]] },
//!     "to": { "ranks": [1] }
//!   }
//! }
//! ```

use num_rational::BigRational;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{fs, io};

use crate::annotation::{Annotation, CombinedFunctionAnnotation, FunctionAnnotation, Index};
use crate::coefficient::Coefficient;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed annotations in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FixError {
    #[error("annotation {name} has {actual} ranks, expected {expected}")]
    ArityMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("index {index:?} of annotation {name} has {actual} entries, expected {expected}")]
    IndexMismatch {
        name: String,
        index: Vec<u32>,
        expected: usize,
        actual: usize,
    },
    #[error("'{value}' in annotation {name} is not a number")]
    NotANumber { name: String, value: String },
}

/// A rational, written as an integer or a string such as `"3/2"`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Text(String),
}

impl Value {
    fn to_rational(&self, name: &str) -> Result<BigRational, FixError> {
        match self {
            Value::Int(value) => Ok(BigRational::from_integer((*value).into())),
            Value::Text(text) => {
                BigRational::from_str(text.trim()).map_err(|_| FixError::NotANumber {
                    name: name.to_owned(),
                    value: text.clone(),
                })
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedAnnotation {
    #[serde(default)]
    pub ranks: Vec<Value>,
    /// Pairs of a full index (factors, then the offset) and its coefficient.
    #[serde(default)]
    pub coefficients: Vec<(Vec<u32>, Value)>,
}

impl FixedAnnotation {
    /// A known annotation over `size` trees.
    pub fn to_annotation(&self, name: &str, size: usize) -> Result<Annotation, FixError> {
        if self.ranks.len() != size {
            return Err(FixError::ArityMismatch {
                name: name.to_owned(),
                expected: size,
                actual: self.ranks.len(),
            });
        }
        let ranks = self
            .ranks
            .iter()
            .map(|rank| Ok(Coefficient::Known(rank.to_rational(name)?)))
            .collect::<Result<_, FixError>>()?;
        let mut coefficients = BTreeMap::new();
        for (entries, value) in &self.coefficients {
            if entries.len() != size + 1 {
                return Err(FixError::IndexMismatch {
                    name: name.to_owned(),
                    index: entries.clone(),
                    expected: size + 1,
                    actual: entries.len(),
                });
            }
            coefficients.insert(
                Index::from_vec(entries.clone()),
                Coefficient::Known(value.to_rational(name)?),
            );
        }
        Ok(Annotation::new(name, ranks, coefficients))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedFunction {
    pub from: FixedAnnotation,
    #[serde(default)]
    pub to: FixedAnnotation,
    /// Cost-free companions.
    #[serde(default)]
    pub cost_free: Vec<FixedFunctionPair>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedFunctionPair {
    pub from: FixedAnnotation,
    #[serde(default)]
    pub to: FixedAnnotation,
}

fn pair(
    name: &str,
    from: &FixedAnnotation,
    to: &FixedAnnotation,
    params: usize,
    returns_tree: bool,
) -> Result<FunctionAnnotation, FixError> {
    Ok(FunctionAnnotation {
        from: from.to_annotation(&format!("Q_{}", name), params)?,
        to: to.to_annotation(&format!("Q'_{}", name), usize::from(returns_tree))?,
    })
}

impl FixedFunction {
    pub fn to_annotation(
        &self,
        name: &str,
        params: usize,
        returns_tree: bool,
    ) -> Result<CombinedFunctionAnnotation, FixError> {
        Ok(CombinedFunctionAnnotation {
            with_cost: pair(name, &self.from, &self.to, params, returns_tree)?,
            cost_free: self
                .cost_free
                .iter()
                .enumerate()
                .map(|(i, companion)| {
                    pair(
                        &format!("{}_cf{}", name, i),
                        &companion.from,
                        &companion.to,
                        params,
                        returns_tree,
                    )
                })
                .collect::<Result<_, _>>()?,
        })
    }
}

/// Fixed annotations by qualified function name.
pub type FixedAnnotations = BTreeMap<String, FixedFunction>;

pub fn parse(src: &str, path: &Path) -> Result<FixedAnnotations, Error> {
    serde_json::from_str(src).map_err(|source| Error::Parse {
        path: path.to_owned(),
        source,
    })
}

pub fn load(path: &Path) -> Result<FixedAnnotations, Error> {
    let src = fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_owned(),
        source,
    })?;
    parse(&src, path)
}

#[cfg(test)]
mod test {
    use super::*;
    use arbor_common::lines;

    const SRC: &str = lines![
        "{",
        "  \"m.append\": {",
        "    \"from\": { \"ranks\": [1, 0], \"coefficients\": [[[1, 0, 0], 1], [[0, 0, 2], \"3/2\"]] },",
        "    \"to\": { \"ranks\": [1] },",
        "    \"cost_free\": [{ \"from\": { \"ranks\": [0, 0] }, \"to\": { \"ranks\": [0] } }]",
        "  }",
        "}",
    ];

    #[test]
    fn test_parse_and_convert() {
        let fixed = parse(SRC, Path::new("fixed.json")).unwrap();
        let append = &fixed["m.append"];
        let annotation = append.to_annotation("append", 2, true).unwrap();

        let from = &annotation.with_cost.from;
        assert_eq!(from.name, "Q_append");
        assert_eq!(from.rank(0), &Coefficient::one());
        assert_eq!(
            from.coefficient(&Index::new([0, 0], 2)),
            Some(&Coefficient::Known(BigRational::new(3.into(), 2.into())))
        );
        assert_eq!(annotation.with_cost.to.size(), 1);
        assert_eq!(annotation.cost_free.len(), 1);
        assert!(annotation.cost_free[0].is_zero());
    }

    #[test]
    fn test_arity_is_checked() {
        let fixed = parse(SRC, Path::new("fixed.json")).unwrap();
        assert!(matches!(
            fixed["m.append"].to_annotation("append", 1, true),
            Err(FixError::ArityMismatch {
                expected: 1,
                actual: 2,
                ..
            })
        ));
        assert!(matches!(
            fixed["m.append"].to_annotation("append", 2, false),
            Err(FixError::ArityMismatch { .. })
        ));

        let bad_index = FixedAnnotation {
            ranks: vec![Value::Int(0)],
            coefficients: vec![(vec![1, 2, 3], Value::Int(1))],
        };
        assert!(matches!(
            bad_index.to_annotation("Q", 1),
            Err(FixError::IndexMismatch { .. })
        ));

        let not_a_number = FixedAnnotation {
            ranks: vec![Value::Text("many".to_owned())],
            coefficients: vec![],
        };
        assert!(matches!(
            not_a_number.to_annotation("Q", 1),
            Err(FixError::NotANumber { .. })
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            parse("{\"m.f\": 3}", Path::new("bad.json")),
            Err(Error::Parse { .. })
        ));
        assert!(matches!(
            load(Path::new("/nonexistent/annotations.json")),
            Err(Error::Read { .. })
        ));
    }
}
