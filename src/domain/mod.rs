//! # Attribute domains
//!
//! The global value domain of an attribute over its whole table: a numeric
//! interval `[min, max]` or the ordered set of distinct categorical values.
//! Domains are computed on demand through the database collaborator, cached
//! under lowercase `(table, column)` keys and persisted to a flat JSON file,
//! rewritten only on explicit recomputation.
//!

pub mod bounds;

use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    error, fmt, fs,
    path::{Path, PathBuf},
    result,
};

use crate::{
    cell::Value,
    io::{self, ColumnKind, Database},
};

// Error management

#[derive(Debug)]
pub enum Error {
    EmptyColumn(String),
    Shape(String),
    Persistence(String),
    Other(String),
}

impl Error {
    pub fn empty_column(table: impl fmt::Display, column: impl fmt::Display) -> Error {
        Error::EmptyColumn(format!("{}.{} has no values", table, column))
    }
    pub fn shape(dc: impl fmt::Display) -> Error {
        Error::Shape(format!(
            "{} is not an order-comparison constraint over two attributes",
            dc
        ))
    }
    pub fn persistence(desc: impl fmt::Display) -> Error {
        Error::Persistence(desc.to_string())
    }
    pub fn other(desc: impl fmt::Display) -> Error {
        Error::Other(desc.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::EmptyColumn(desc) => writeln!(f, "EmptyColumn: {}", desc),
            Error::Shape(desc) => writeln!(f, "Shape: {}", desc),
            Error::Persistence(desc) => writeln!(f, "Persistence: {}", desc),
            Error::Other(desc) => writeln!(f, "{}", desc),
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Other(err.to_string())
    }
}
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

pub type Result<T> = result::Result<T, Error>;

/// A numeric interval, possibly unbounded on either side
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub lower: f64,
    pub upper: f64,
}

impl Interval {
    pub fn new(lower: f64, upper: f64) -> Interval {
        Interval { lower, upper }
    }

    /// Unbounded on both sides
    pub fn unconstrained() -> Interval {
        Interval::new(f64::NEG_INFINITY, f64::INFINITY)
    }

    pub fn size(&self) -> f64 {
        self.upper - self.lower
    }

    /// Higher value, more restricted
    pub fn restriction_level(&self) -> f64 {
        1.0 / (self.size() + 1e-10)
    }

    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }

    pub fn intersection(&self, other: &Interval) -> Interval {
        Interval::new(self.lower.max(other.lower), self.upper.min(other.upper))
    }

    pub fn union(&self, other: &Interval) -> Interval {
        Interval::new(self.lower.min(other.lower), self.upper.max(other.upper))
    }

    /// Jaccard distance between two intervals: 0 when identical, 1 when disjoint
    pub fn overlap_distance(&self, other: &Interval) -> f64 {
        let intersection = (self.upper.min(other.upper) - self.lower.max(other.lower)).max(0.0);
        let union = self.upper.max(other.upper) - self.lower.min(other.lower);
        if union == 0.0 {
            0.0
        } else {
            1.0 - intersection / union
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lower, self.upper)
    }
}

/// The global value domain of one attribute
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AttributeDomain {
    Numeric { min: f64, max: f64 },
    #[serde(rename = "string")]
    Categorical { values: Vec<Value> },
}

impl AttributeDomain {
    pub fn is_numeric(&self) -> bool {
        matches!(self, AttributeDomain::Numeric { .. })
    }

    /// The size used by the privacy ratio: the numeric span, or the number
    /// of categorical values
    pub fn size(&self) -> f64 {
        match self {
            AttributeDomain::Numeric { min, max } => max - min,
            AttributeDomain::Categorical { values } => values.len() as f64,
        }
    }

    pub fn interval(&self) -> Option<Interval> {
        match self {
            AttributeDomain::Numeric { min, max } => Some(Interval::new(*min, *max)),
            AttributeDomain::Categorical { .. } => None,
        }
    }
}

impl fmt::Display for AttributeDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeDomain::Numeric { min, max } => write!(f, "[{}, {}]", min, max),
            AttributeDomain::Categorical { values } => write!(f, "{} values", values.len()),
        }
    }
}

/// The cached, optionally persisted, domains of a database
#[derive(Clone, Debug, Default)]
pub struct DomainMap {
    path: Option<PathBuf>,
    cache: HashMap<(String, String), AttributeDomain>,
}

impl DomainMap {
    /// A purely in-memory cache
    pub fn new() -> DomainMap {
        DomainMap::default()
    }

    /// A cache backed by a flat JSON file, loaded when the file exists
    pub fn with_path(path: impl AsRef<Path>) -> Result<DomainMap> {
        let path = path.as_ref().to_path_buf();
        let cache = if path.exists() {
            let flat: HashMap<String, AttributeDomain> =
                serde_json::from_str(&fs::read_to_string(&path)?)?;
            log::info!("Domain map loaded from {} ({} entries)", path.display(), flat.len());
            flat.into_iter()
                .filter_map(|(key, domain)| {
                    key.split_once('.')
                        .map(|(table, column)| (Self::key(table, column), domain))
                })
                .collect()
        } else {
            HashMap::new()
        };
        Ok(DomainMap {
            path: Some(path),
            cache,
        })
    }

    fn key(table: &str, column: &str) -> (String, String) {
        (table.to_lowercase(), column.to_lowercase())
    }

    /// The domain of one attribute: cached, or computed in full and persisted
    pub fn get<D: Database>(
        &mut self,
        db: &D,
        table: &str,
        column: &str,
    ) -> Result<AttributeDomain> {
        let key = Self::key(table, column);
        if let Some(domain) = self.cache.get(&key) {
            return Ok(domain.clone());
        }
        let domain = Self::compute(db, table, column)?;
        log::debug!("Computed domain for {}.{}: {}", table, column, domain);
        self.cache.insert(key, domain.clone());
        self.save()?;
        Ok(domain)
    }

    /// Recompute every column of a table, rewriting the persisted file
    pub fn recompute<D: Database>(&mut self, db: &D, table: &str) -> Result<()> {
        for def in db.columns(table)? {
            let domain = Self::compute(db, table, &def.name)?;
            self.cache.insert(Self::key(table, &def.name), domain);
        }
        self.save()
    }

    fn compute<D: Database>(db: &D, table: &str, column: &str) -> Result<AttributeDomain> {
        let kind = db
            .columns(table)?
            .into_iter()
            .find(|def| def.name.eq_ignore_ascii_case(column))
            .ok_or_else(|| io::Error::unknown_column(table, column))?
            .kind;
        match kind {
            ColumnKind::Numeric => {
                let min = db
                    .numeric_min(table, column)?
                    .ok_or_else(|| Error::empty_column(table, column))?;
                let max = db
                    .numeric_max(table, column)?
                    .ok_or_else(|| Error::empty_column(table, column))?;
                Ok(AttributeDomain::Numeric { min, max })
            }
            ColumnKind::Text => Ok(AttributeDomain::Categorical {
                values: db.distinct_values(table, column)?,
            }),
        }
    }

    fn save(&self) -> Result<()> {
        if let Some(path) = &self.path {
            let flat: HashMap<String, &AttributeDomain> = self
                .cache
                .iter()
                .map(|((table, column), domain)| (format!("{}.{}", table, column), domain))
                .collect();
            fs::write(path, serde_json::to_string_pretty(&flat)?)?;
            log::debug!("Domain map saved to {}", path.display());
        }
        Ok(())
    }
}
