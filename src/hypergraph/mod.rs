//! # Hyperedges of the inference graph
//!
//! For one fetched row and one head attribute, each denial constraint
//! mentioning the attribute contributes a hyperedge: the set of "tail" cells
//! jointly implicated in constraining the head attribute's value. Hyperedges
//! are deduplicated by their frozen tail-cell set, so two constraints
//! producing the same tails count once.
//!

pub mod tree;

use itertools::Itertools;
use std::{
    collections::{BTreeSet, HashMap},
    error, fmt, hash, result,
};

use crate::{
    cell::{Attribute, Cell, Value},
    constraint::ConstraintSet,
    io::Row,
};

// Error management

#[derive(Debug)]
pub enum Error {
    MissingAttribute(String),
    UnknownCell(String),
    Other(String),
}

impl Error {
    pub fn missing_attribute(column: impl fmt::Display) -> Error {
        Error::MissingAttribute(format!("{} has no value in the fetched row", column))
    }
    pub fn unknown_cell(cell: impl fmt::Display) -> Error {
        Error::UnknownCell(format!("{} is not a node of the graph", cell))
    }
    pub fn other(desc: impl fmt::Display) -> Error {
        Error::Other(desc.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MissingAttribute(desc) => writeln!(f, "MissingAttribute: {}", desc),
            Error::UnknownCell(desc) => writeln!(f, "UnknownCell: {}", desc),
            Error::Other(desc) => writeln!(f, "{}", desc),
        }
    }
}

impl error::Error for Error {}

pub type Result<T> = result::Result<T, Error>;

/// The tail cells implicated by one denial constraint for one head attribute.
///
/// Identity is the frozen set of tail cells: the label of the originating
/// constraint is carried for display only.
#[derive(Clone, Debug)]
pub struct Hyperedge {
    label: String,
    cells: BTreeSet<Cell>,
}

impl Hyperedge {
    pub fn new(label: impl Into<String>, cells: BTreeSet<Cell>) -> Hyperedge {
        Hyperedge {
            label: label.into(),
            cells,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn cells(&self) -> &BTreeSet<Cell> {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// A constraint whose only column is the head yields an empty hyperedge:
    /// vacuous, skipped by the tree builder.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// The bare columns of the tail cells
    pub fn columns(&self) -> BTreeSet<&str> {
        self.cells.iter().map(|c| c.column()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter()
    }
}

impl PartialEq for Hyperedge {
    fn eq(&self, other: &Self) -> bool {
        self.cells == other.cells
    }
}

impl Eq for Hyperedge {}

impl hash::Hash for Hyperedge {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.cells.hash(state)
    }
}

impl fmt::Display for Hyperedge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {{{}}}", self.label, self.cells.iter().join(", "))
    }
}

/// Derives hyperedges from the denial constraints of one dataset table
#[derive(Clone, Debug)]
pub struct HyperedgeBuilder<'a> {
    table: String,
    constraints: &'a ConstraintSet,
}

impl<'a> HyperedgeBuilder<'a> {
    pub fn new(table: impl Into<String>, constraints: &'a ConstraintSet) -> HyperedgeBuilder<'a> {
        HyperedgeBuilder {
            table: table.into(),
            constraints,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// One hyperedge per constraint whose first matching predicate mentions
    /// the target column. Tail cells come from the **left** operand of every
    /// other predicate; columns absent from the row are dropped (a degenerate
    /// hyperedge, not an error). Results are deduplicated by tail-cell set.
    pub fn build_hyperedges(&self, row: &Row, key: &Value, target_column: &str) -> Vec<Hyperedge> {
        let mut seen: Vec<Hyperedge> = Vec::new();
        for dc in self.constraints.iter() {
            let Some(head) = dc.head_predicate(target_column) else {
                continue;
            };
            let cells: BTreeSet<Cell> = dc
                .predicates()
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != head)
                .filter_map(|(_, predicate)| {
                    let column = predicate.left().column();
                    row.get(column).map(|value| {
                        Cell::new(
                            Attribute::new(&self.table, column),
                            key.clone(),
                            value.clone(),
                        )
                    })
                })
                .collect();
            let edge = Hyperedge::new(dc.label(), cells);
            if !seen.contains(&edge) {
                seen.push(edge);
            }
        }
        log::debug!(
            "{} hyperedges for {}.{}",
            seen.len(),
            self.table,
            target_column
        );
        seen
    }

    /// Breadth-first expansion from the start attribute, collecting the
    /// hyperedges of every cell reachable through the constraints.
    pub fn build_hyperedge_map(
        &self,
        row: &Row,
        key: &Value,
        start_column: &str,
    ) -> Result<HashMap<Cell, Vec<Hyperedge>>> {
        if !row.contains_key(start_column) {
            return Err(Error::missing_attribute(start_column));
        }
        let all_cells: HashMap<&str, Cell> = row
            .iter()
            .map(|(column, value)| {
                (
                    column.as_str(),
                    Cell::new(
                        Attribute::new(&self.table, column),
                        key.clone(),
                        value.clone(),
                    ),
                )
            })
            .collect();
        let mut map: HashMap<Cell, Vec<Hyperedge>> =
            all_cells.values().map(|c| (c.clone(), Vec::new())).collect();

        let mut visited: BTreeSet<String> = BTreeSet::from([start_column.to_string()]);
        let mut frontier: Vec<String> = vec![start_column.to_string()];
        while !frontier.is_empty() {
            let mut next_frontier: Vec<String> = Vec::new();
            for column in &frontier {
                let head = &all_cells[column.as_str()];
                for edge in self.build_hyperedges(row, key, column) {
                    for tail in edge.iter() {
                        let tail_column = tail.column();
                        if !visited.contains(tail_column) {
                            visited.insert(tail_column.to_string());
                            next_frontier.push(tail_column.to_string());
                        }
                    }
                    map.get_mut(head)
                        .expect("head cell is always a row cell")
                        .push(edge);
                }
            }
            frontier = next_frontier;
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{builder::With, constraint::DenialConstraint};

    fn constraints() -> ConstraintSet {
        let adult = |label: &str, triples: &[(&str, &str, &str)]| {
            DenialConstraint::parse(label, triples).unwrap()
        };
        ConstraintSet::default()
            .with(adult(
                "dc0",
                &[
                    ("t1.education", "!=", "t2.education"),
                    ("t1.education_num", "==", "t2.education_num"),
                ],
            ))
            .with(adult(
                "dc1",
                &[
                    ("t1.education", "==", "t2.education"),
                    ("t1.education_num", "!=", "t2.education_num"),
                ],
            ))
            .with(adult(
                "dc2",
                &[
                    ("t1.capital_gain", ">", "t2.capital_gain"),
                    ("t1.capital_loss", ">", "t2.capital_loss"),
                ],
            ))
    }

    fn row() -> Row {
        Row::from([
            ("education".to_string(), Value::from("Bachelors")),
            ("education_num".to_string(), Value::from(13)),
            ("capital_gain".to_string(), Value::from(2174)),
            ("capital_loss".to_string(), Value::from(0)),
        ])
    }

    #[test]
    fn test_single_hyperedge_for_education() {
        let constraints = constraints();
        let builder = HyperedgeBuilder::new("adult_data", &constraints);
        let edges = builder.build_hyperedges(&row(), &Value::from(2), "education");
        // dc0 and dc1 produce the same tail set and collapse to one hyperedge
        assert_eq!(edges.len(), 1);
        let tail: Vec<String> = edges[0].iter().map(|c| c.to_string()).collect();
        assert_eq!(tail, vec!["adult_data.education_num[2]=>13"]);
    }

    #[test]
    fn test_dedup_is_order_independent() {
        let constraints = constraints();
        let builder = HyperedgeBuilder::new("adult_data", &constraints);
        let first = builder.build_hyperedges(&row(), &Value::from(2), "education");
        let second = builder.build_hyperedges(&row(), &Value::from(2), "education");
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_column_is_dropped() {
        let constraints = constraints();
        let builder = HyperedgeBuilder::new("adult_data", &constraints);
        let mut row = row();
        row.remove("education_num");
        let edges = builder.build_hyperedges(&row, &Value::from(2), "education");
        // the hyperedge degenerates to an empty one, it is still constructed
        assert_eq!(edges.len(), 1);
        assert!(edges[0].is_empty());
    }

    #[test]
    fn test_irrelevant_constraints_are_skipped() {
        let constraints = constraints();
        let builder = HyperedgeBuilder::new("adult_data", &constraints);
        let edges = builder.build_hyperedges(&row(), &Value::from(2), "capital_gain");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].label(), "dc2");
    }

    #[test]
    fn test_hyperedge_map() {
        let constraints = constraints();
        let builder = HyperedgeBuilder::new("adult_data", &constraints);
        let map = builder
            .build_hyperedge_map(&row(), &Value::from(2), "education")
            .unwrap();
        // every row cell has an entry
        assert_eq!(map.len(), 4);
        let education = Cell::new(
            Attribute::new("adult_data", "education"),
            2,
            "Bachelors",
        );
        assert_eq!(map[&education].len(), 1);
        // capital_gain is unreachable from education
        let capital_gain = Cell::new(Attribute::new("adult_data", "capital_gain"), 2, 2174);
        assert!(map[&capital_gain].is_empty());
    }

    #[test]
    fn test_missing_start_attribute_fails() {
        let constraints = constraints();
        let builder = HyperedgeBuilder::new("adult_data", &constraints);
        let result = builder.build_hyperedge_map(&row(), &Value::from(2), "salary");
        assert!(matches!(result, Err(Error::MissingAttribute(_))));
    }
}
