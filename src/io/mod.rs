//! # External collaborator interfaces
//!
//! The engine consumes, and does not embed, its data store: a [`Database`]
//! executes the row fetch, aggregate and distinct queries the core needs,
//! plus the single null-out mutation; a [`Registry`] resolves dataset names
//! to their primary table, key column, denial constraints and key
//! relationships. Table and column matching is case-insensitive throughout.
//!

pub mod memory;

use std::{
    collections::{BTreeMap, HashMap},
    error, fmt, result,
};

use crate::{
    cell::Value,
    constraint::{ConstraintSet, Operator},
};

// Error management

#[derive(Debug)]
pub enum Error {
    RowNotFound(String),
    UnknownDataset(String),
    UnknownTable(String),
    UnknownColumn(String),
    MissingRelationship(String),
    Other(String),
}

impl Error {
    pub fn row_not_found(table: impl fmt::Display, key: impl fmt::Display) -> Error {
        Error::RowNotFound(format!("no row in {} with key {}", table, key))
    }
    pub fn unknown_dataset(dataset: impl fmt::Display) -> Error {
        Error::UnknownDataset(format!("{} is not a registered dataset", dataset))
    }
    pub fn unknown_table(table: impl fmt::Display) -> Error {
        Error::UnknownTable(format!("{} is not a known table", table))
    }
    pub fn unknown_column(table: impl fmt::Display, column: impl fmt::Display) -> Error {
        Error::UnknownColumn(format!("{} has no column {}", table, column))
    }
    pub fn missing_relationship(left: impl fmt::Display, right: impl fmt::Display) -> Error {
        Error::MissingRelationship(format!(
            "no key relationship declared between {} and {}",
            left, right
        ))
    }
    pub fn other(desc: impl fmt::Display) -> Error {
        Error::Other(desc.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::RowNotFound(desc) => writeln!(f, "RowNotFound: {}", desc),
            Error::UnknownDataset(desc) => writeln!(f, "UnknownDataset: {}", desc),
            Error::UnknownTable(desc) => writeln!(f, "UnknownTable: {}", desc),
            Error::UnknownColumn(desc) => writeln!(f, "UnknownColumn: {}", desc),
            Error::MissingRelationship(desc) => writeln!(f, "MissingRelationship: {}", desc),
            Error::Other(desc) => writeln!(f, "{}", desc),
        }
    }
}

impl error::Error for Error {}

pub type Result<T> = result::Result<T, Error>;

/// One fetched row: column name to value. A nulled cell has no entry.
pub type Row = BTreeMap<String, Value>;

/// Declared column type, used to classify domains
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Numeric,
    Text,
}

/// Declared column metadata
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
}

impl ColumnDef {
    pub fn numeric(name: impl Into<String>) -> ColumnDef {
        ColumnDef {
            name: name.into(),
            kind: ColumnKind::Numeric,
        }
    }

    pub fn text(name: impl Into<String>) -> ColumnDef {
        ColumnDef {
            name: name.into(),
            kind: ColumnKind::Text,
        }
    }
}

/// MIN or MAX over a filtered column
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Aggregate {
    Min,
    Max,
}

/// A declared shared-key relationship between two tables, resolved from
/// configuration, never from database introspection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyRelationship {
    pub left_table: String,
    pub right_table: String,
    pub key_column: String,
}

impl KeyRelationship {
    pub fn new(
        left_table: impl Into<String>,
        right_table: impl Into<String>,
        key_column: impl Into<String>,
    ) -> KeyRelationship {
        KeyRelationship {
            left_table: left_table.into(),
            right_table: right_table.into(),
            key_column: key_column.into(),
        }
    }

    pub fn links(&self, left: &str, right: &str) -> bool {
        (self.left_table.eq_ignore_ascii_case(left) && self.right_table.eq_ignore_ascii_case(right))
            || (self.left_table.eq_ignore_ascii_case(right)
                && self.right_table.eq_ignore_ascii_case(left))
    }
}

/// All reads are blocking, idempotent and side-effect free; [`Database::null_out`]
/// is the single external mutation of a deletion request.
pub trait Database {
    /// Fetch one row by primary key, fails with RowNotFound on a missing key
    fn fetch_row(&self, table: &str, key_column: &str, key: &Value) -> Result<Row>;

    /// Declared columns of a table
    fn columns(&self, table: &str) -> Result<Vec<ColumnDef>>;

    /// Table-wide minimum of a numeric column, None on an empty table
    fn numeric_min(&self, table: &str, column: &str) -> Result<Option<f64>>;

    /// Table-wide maximum of a numeric column, None on an empty table
    fn numeric_max(&self, table: &str, column: &str) -> Result<Option<f64>>;

    /// Ordered distinct non-null values of a column
    fn distinct_values(&self, table: &str, column: &str) -> Result<Vec<Value>>;

    /// Number of distinct non-null values of a column
    fn count_distinct(&self, table: &str, column: &str) -> Result<usize> {
        Ok(self.distinct_values(table, column)?.len())
    }

    /// MIN/MAX of `column` over the rows where `cond_column op threshold`,
    /// None when no row qualifies
    fn aggregate_where(
        &self,
        table: &str,
        column: &str,
        aggregate: Aggregate,
        cond_column: &str,
        op: Operator,
        threshold: &Value,
    ) -> Result<Option<f64>>;

    /// Same aggregate, with the condition evaluated in another table and the
    /// qualifying rows joined back through the declared key relationship
    fn aggregate_join_where(
        &self,
        table: &str,
        column: &str,
        aggregate: Aggregate,
        cond_table: &str,
        cond_column: &str,
        op: Operator,
        threshold: &Value,
        link: &KeyRelationship,
    ) -> Result<Option<f64>>;

    /// Average, over the groups of `cond_column`, of the number of distinct
    /// `column` values in the group
    fn avg_conditional_distinct(&self, table: &str, column: &str, cond_column: &str)
        -> Result<f64>;

    /// Null the value of one cell. The sole external mutation: issued exactly
    /// once per deletion request, before any read that could observe the
    /// prior value.
    fn null_out(&mut self, table: &str, key_column: &str, key: &Value, column: &str) -> Result<()>;
}

/// One registered dataset: where its data lives and which constraints rule it
#[derive(Clone, Debug)]
pub struct Dataset {
    name: String,
    primary_table: String,
    key_column: String,
    constraints: ConstraintSet,
    relationships: Vec<KeyRelationship>,
}

impl Dataset {
    pub fn new(
        name: impl Into<String>,
        primary_table: impl Into<String>,
        key_column: impl Into<String>,
        constraints: ConstraintSet,
    ) -> Dataset {
        Dataset {
            name: name.into(),
            primary_table: primary_table.into(),
            key_column: key_column.into(),
            constraints,
            relationships: Vec::new(),
        }
    }

    pub fn with_relationship(mut self, relationship: KeyRelationship) -> Dataset {
        self.relationships.push(relationship);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_table(&self) -> &str {
        &self.primary_table
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    /// The declared relationship between two tables, a configuration error
    /// when absent
    pub fn relationship(&self, left: &str, right: &str) -> Result<&KeyRelationship> {
        self.relationships
            .iter()
            .find(|r| r.links(left, right))
            .ok_or_else(|| Error::missing_relationship(left, right))
    }
}

/// Name-to-dataset resolution, strictly configuration
#[derive(Clone, Debug, Default)]
pub struct Registry {
    datasets: HashMap<String, Dataset>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    pub fn register(mut self, dataset: Dataset) -> Registry {
        self.datasets
            .insert(dataset.name().to_lowercase(), dataset);
        self
    }

    pub fn dataset(&self, name: &str) -> Result<&Dataset> {
        self.datasets
            .get(&name.to_lowercase())
            .ok_or_else(|| Error::unknown_dataset(name))
    }
}
