//! # Denial constraints
//!
//! A denial constraint (DC) is a conjunction of binary predicates over two
//! tuples that is asserted never to hold. Predicates reference columns
//! through table aliases (`t1.education`); references are parsed once at
//! load time, and malformed predicates are load-time errors — they are never
//! skipped, since a silently dropped predicate can silently under-protect
//! privacy.
//!

use itertools::Itertools;
use serde::Deserialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    error, fmt, result,
    str::FromStr,
};

use crate::builder::With;

// Error management

#[derive(Debug)]
pub enum Error {
    MalformedReference(String),
    MalformedPredicate(String),
    UnknownOperator(String),
    Other(String),
}

impl Error {
    pub fn malformed_reference(reference: impl fmt::Display) -> Error {
        Error::MalformedReference(format!("{} is not of the shape alias.column", reference))
    }
    pub fn malformed_predicate(predicate: impl fmt::Display) -> Error {
        Error::MalformedPredicate(format!(
            "{} does not have the (left, operator, right) shape",
            predicate
        ))
    }
    pub fn unknown_operator(op: impl fmt::Display) -> Error {
        Error::UnknownOperator(format!("{} is not a comparison operator", op))
    }
    pub fn other(desc: impl fmt::Display) -> Error {
        Error::Other(desc.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MalformedReference(desc) => writeln!(f, "MalformedReference: {}", desc),
            Error::MalformedPredicate(desc) => writeln!(f, "MalformedPredicate: {}", desc),
            Error::UnknownOperator(desc) => writeln!(f, "UnknownOperator: {}", desc),
            Error::Other(desc) => writeln!(f, "{}", desc),
        }
    }
}

impl error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Other(err.to_string())
    }
}

pub type Result<T> = result::Result<T, Error>;

/// A comparison operator between two attribute references
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "=" | "==" => Ok(Operator::Eq),
            "!=" | "<>" => Ok(Operator::NotEq),
            "<" => Ok(Operator::Lt),
            ">" => Ok(Operator::Gt),
            "<=" => Ok(Operator::LtEq),
            ">=" => Ok(Operator::GtEq),
            op => Err(Error::unknown_operator(op)),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Operator::Eq => "==",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::LtEq => "<=",
            Operator::GtEq => ">=",
        };
        write!(f, "{}", op)
    }
}

/// An alias-qualified column reference, parsed once at constraint load time
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct AttributeRef {
    alias: String,
    column: String,
}

impl AttributeRef {
    pub fn new(alias: impl Into<String>, column: impl Into<String>) -> AttributeRef {
        AttributeRef {
            alias: alias.into(),
            column: column.into(),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// The bare column name, alias stripped
    pub fn column(&self) -> &str {
        &self.column
    }
}

impl FromStr for AttributeRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split('.').collect::<Vec<_>>().as_slice() {
            [alias, column] if !alias.is_empty() && !column.is_empty() => {
                Ok(AttributeRef::new(*alias, *column))
            }
            _ => Err(Error::malformed_reference(s)),
        }
    }
}

impl fmt::Display for AttributeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.alias, self.column)
    }
}

/// One predicate of a denial constraint
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Predicate {
    left: AttributeRef,
    op: Operator,
    right: AttributeRef,
}

impl Predicate {
    pub fn new(left: AttributeRef, op: Operator, right: AttributeRef) -> Predicate {
        Predicate { left, op, right }
    }

    /// Parse a `(left, operator, right)` triple, rejecting malformed parts
    pub fn parse(left: &str, op: &str, right: &str) -> Result<Predicate> {
        Ok(Predicate {
            left: left.parse()?,
            op: op.parse()?,
            right: right.parse()?,
        })
    }

    pub fn left(&self) -> &AttributeRef {
        &self.left
    }

    pub fn op(&self) -> Operator {
        self.op
    }

    pub fn right(&self) -> &AttributeRef {
        &self.right
    }

    /// Does the predicate reference the bare column on either side?
    pub fn mentions(&self, column: &str) -> bool {
        self.left.column() == column || self.right.column() == column
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.op, self.right)
    }
}

/// A labeled conjunction of predicates asserted never to hold simultaneously
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct DenialConstraint {
    label: String,
    predicates: Vec<Predicate>,
}

impl DenialConstraint {
    pub fn new(label: impl Into<String>, predicates: Vec<Predicate>) -> DenialConstraint {
        DenialConstraint {
            label: label.into(),
            predicates,
        }
    }

    /// Parse a list of string triples, surfacing the first malformed one
    pub fn parse<'a, I: IntoIterator<Item = &'a (&'a str, &'a str, &'a str)>>(
        label: impl Into<String>,
        triples: I,
    ) -> Result<DenialConstraint> {
        let predicates: Result<Vec<Predicate>> = triples
            .into_iter()
            .map(|(left, op, right)| Predicate::parse(left, op, right))
            .collect();
        Ok(DenialConstraint::new(label, predicates?))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Does some predicate reference the bare column?
    pub fn mentions(&self, column: &str) -> bool {
        self.predicates.iter().any(|p| p.mentions(column))
    }

    /// All bare columns referenced by the constraint, deduplicated
    pub fn columns(&self) -> BTreeSet<&str> {
        self.predicates
            .iter()
            .flat_map(|p| [p.left().column(), p.right().column()])
            .collect()
    }

    /// Index of the first predicate (in original order) mentioning the column
    pub fn head_predicate(&self, column: &str) -> Option<usize> {
        self.predicates.iter().position(|p| p.mentions(column))
    }
}

impl fmt::Display for DenialConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: ¬({})",
            self.label,
            self.predicates.iter().join(" ∧ ")
        )
    }
}

/// Raw JSON shape of a constraint file: a list of lists of triples
#[derive(Deserialize)]
struct RawConstraints(Vec<Vec<(String, String, String)>>);

/// The loaded denial constraints of one dataset, with attribute-level lookup
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConstraintSet {
    constraints: Vec<DenialConstraint>,
}

impl ConstraintSet {
    pub fn new(constraints: Vec<DenialConstraint>) -> ConstraintSet {
        ConstraintSet { constraints }
    }

    /// Load from a JSON list of predicate-triple lists.
    /// Labels are assigned in order: `dc0`, `dc1`, ...
    pub fn from_json(json: &str) -> Result<ConstraintSet> {
        let RawConstraints(raw) = serde_json::from_str(json)?;
        let constraints: Result<Vec<DenialConstraint>> = raw
            .iter()
            .enumerate()
            .map(|(i, triples)| {
                let predicates: Result<Vec<Predicate>> = triples
                    .iter()
                    .map(|(left, op, right)| Predicate::parse(left, op, right))
                    .collect();
                Ok(DenialConstraint::new(format!("dc{}", i), predicates?))
            })
            .collect();
        let constraints = constraints?;
        log::debug!("Loaded {} denial constraints", constraints.len());
        Ok(ConstraintSet::new(constraints))
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DenialConstraint> {
        self.constraints.iter()
    }

    /// Map each bare column to the labels of the constraints mentioning it
    pub fn index_by_attribute(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut index: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for dc in &self.constraints {
            for column in dc.columns() {
                index
                    .entry(column.to_string())
                    .or_default()
                    .insert(dc.label().to_string());
            }
        }
        index
    }

    /// Every constraint where some predicate references the bare column.
    /// An attribute with zero constraints yields an empty collection.
    pub fn constraints_involving(&self, column: &str) -> Vec<&DenialConstraint> {
        self.constraints
            .iter()
            .filter(|dc| dc.mentions(column))
            .collect()
    }
}

impl With<DenialConstraint> for ConstraintSet {
    fn with(mut self, input: DenialConstraint) -> Self {
        self.constraints.push(input);
        self
    }
}

impl fmt::Display for ConstraintSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.constraints.iter().join("\n"))
    }
}
