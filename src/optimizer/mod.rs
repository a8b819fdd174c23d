//! # Multi-level deletion optimizer
//!
//! The control loop of a deletion request. Starting from the target cell
//! alone, each round measures how much the target's inferred domain would
//! widen if one more constraint-related cell were deleted, commits the best
//! candidate, and stops when the privacy ratio (current inferred domain size
//! over the original domain size) reaches the configured threshold, when no
//! candidate helps, or when the round ceiling is hit.
//!
//! One request is synchronous and single-threaded; independent requests can
//! be run in parallel by the caller.
//!

use colored::Colorize;
use itertools::Itertools;
use std::{
    collections::BTreeSet,
    error, fmt,
    path::{Path, PathBuf},
    result,
};

use crate::{
    builder::{Ready, With},
    cell::{Attribute, Cell, Value},
    constraint,
    domain::{self, DomainMap},
    hypergraph::{self, HyperedgeBuilder, tree::HyperGraph},
    io::{self, Database, Dataset},
};

pub const DEFAULT_THRESHOLD: f64 = 0.8;
pub const DEFAULT_MAX_ROUNDS: usize = 16;

// Error management

#[derive(Debug)]
pub enum Error {
    MissingInput(String),
    Io(String),
    Domain(String),
    Graph(String),
    Constraint(String),
    Other(String),
}

impl Error {
    pub fn missing_input(input: impl fmt::Display) -> Error {
        Error::MissingInput(format!("{} was not provided to the builder", input))
    }
    pub fn other(desc: impl fmt::Display) -> Error {
        Error::Other(desc.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MissingInput(desc) => writeln!(f, "MissingInput: {}", desc),
            Error::Io(desc) => writeln!(f, "Io: {}", desc),
            Error::Domain(desc) => writeln!(f, "Domain: {}", desc),
            Error::Graph(desc) => writeln!(f, "Graph: {}", desc),
            Error::Constraint(desc) => writeln!(f, "Constraint: {}", desc),
            Error::Other(desc) => writeln!(f, "{}", desc),
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
impl From<domain::Error> for Error {
    fn from(err: domain::Error) -> Self {
        Error::Domain(err.to_string())
    }
}
impl From<hypergraph::Error> for Error {
    fn from(err: hypergraph::Error) -> Self {
        Error::Graph(err.to_string())
    }
}
impl From<constraint::Error> for Error {
    fn from(err: constraint::Error) -> Self {
        Error::Constraint(err.to_string())
    }
}

pub type Result<T> = result::Result<T, Error>;

/// How a request ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Privacy ratio reached the threshold
    Satisfied,
    /// No remaining candidate improves the ratio
    Exhausted,
    /// The round ceiling stopped the loop, threshold not met
    IterationCapped,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Satisfied => write!(f, "satisfied"),
            Outcome::Exhausted => write!(f, "exhausted"),
            Outcome::IterationCapped => write!(f, "iteration-capped"),
        }
    }
}

/// One constraint-related cell and how strongly its constraint restricts
/// the target's domain while the cell is still present
#[derive(Clone, Debug, PartialEq)]
pub struct ConstraintProfile {
    pub cell: Cell,
    pub restriction: f64,
}

/// The outcome of one deletion request
#[derive(Clone, Debug)]
pub struct Report {
    pub target: Cell,
    pub deletion_set: BTreeSet<Cell>,
    /// One-shot minimal blocking set from the cost tree
    pub blocking_set: BTreeSet<Cell>,
    pub original_domain_size: f64,
    pub initial_restricted_size: f64,
    pub final_domain_size: f64,
    pub outcome: Outcome,
    pub rounds: usize,
}

impl Report {
    pub fn privacy_ratio(&self) -> f64 {
        if self.original_domain_size > 0.0 {
            self.final_domain_size / self.original_domain_size
        } else {
            1.0
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "target: {}", self.target)?;
        writeln!(
            f,
            "domain: {} -> {} -> {} (ratio {:.3})",
            self.original_domain_size,
            self.initial_restricted_size,
            self.final_domain_size,
            self.privacy_ratio()
        )?;
        writeln!(f, "outcome: {} after {} rounds", self.outcome, self.rounds)?;
        write!(f, "deletion set: {}", self.deletion_set.iter().join(", "))
    }
}

/// The restricted domain size once every active constraint has been applied
/// independently to the original size, floored at one representable value
pub fn restricted_size<'a, I: IntoIterator<Item = &'a ConstraintProfile>>(
    original: f64,
    active: I,
) -> f64 {
    let shrink: f64 = active
        .into_iter()
        .map(|profile| 1.0 - profile.restriction)
        .product();
    (original * shrink).round().max(1.0)
}

/// The pure greedy loop, separated from data access so it can be driven
/// directly with known restriction factors
#[derive(Clone, Debug)]
struct RoundEngine {
    original: f64,
    threshold: f64,
    max_rounds: usize,
}

struct RoundResult {
    deletion_set: BTreeSet<Cell>,
    initial: f64,
    current: f64,
    outcome: Outcome,
    rounds: usize,
}

impl RoundEngine {
    fn run(&self, target: Cell, profiles: Vec<ConstraintProfile>) -> RoundResult {
        let mut deletion_set: BTreeSet<Cell> = BTreeSet::from([target]);
        // most restrictive first: analysis order and tie-break order
        let mut active = profiles;
        active.sort_by(|a, b| b.restriction.total_cmp(&a.restriction));
        let initial = restricted_size(self.original, active.iter());
        let mut current = initial;
        let mut rounds = 0;

        let outcome = loop {
            if self.original > 0.0 && current / self.original >= self.threshold {
                log::info!(
                    "{} ratio {:.3} after {} rounds",
                    "privacy threshold met:".green(),
                    current / self.original,
                    rounds
                );
                break Outcome::Satisfied;
            }
            if rounds >= self.max_rounds {
                log::warn!("round ceiling {} reached, threshold not met", self.max_rounds);
                break Outcome::IterationCapped;
            }
            // what-if analysis of every active constraint's cell
            let candidate = active
                .iter()
                .enumerate()
                .map(|(i, profile)| {
                    let hypothetical = restricted_size(
                        self.original,
                        active.iter().enumerate().filter(|(j, _)| *j != i).map(|(_, p)| p),
                    );
                    log::debug!(
                        "candidate {}: benefit {:+}",
                        profile.cell,
                        hypothetical - current
                    );
                    (i, hypothetical - current)
                })
                .max_by(|(i, a), (j, b)| a.total_cmp(b).then(j.cmp(i)));
            let Some((winner, benefit)) = candidate else {
                break Outcome::Exhausted;
            };
            if benefit <= 0.0 {
                log::info!("no beneficial candidate remains, stopping");
                break Outcome::Exhausted;
            }
            let committed = active.remove(winner);
            log::info!("round {}: deleting {} (benefit {:+})", rounds + 1, committed.cell, benefit);
            deletion_set.insert(committed.cell);
            current = restricted_size(self.original, active.iter());
            rounds += 1;
        };
        RoundResult {
            deletion_set,
            initial,
            current,
            outcome,
            rounds,
        }
    }
}

/// Builds [MultiLevelOptimizer]s, in the style of the relation builders
pub struct OptimizerBuilder<'a, D: Database> {
    db: Option<&'a mut D>,
    dataset: Option<&'a Dataset>,
    threshold: f64,
    max_rounds: usize,
    domain_path: Option<PathBuf>,
}

impl<'a, D: Database> OptimizerBuilder<'a, D> {
    pub fn new() -> OptimizerBuilder<'a, D> {
        OptimizerBuilder {
            db: None,
            dataset: None,
            threshold: DEFAULT_THRESHOLD,
            max_rounds: DEFAULT_MAX_ROUNDS,
            domain_path: None,
        }
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Persist computed domains at this path
    pub fn domains_at(mut self, path: impl AsRef<Path>) -> Self {
        self.domain_path = Some(path.as_ref().to_path_buf());
        self
    }
}

impl<'a, D: Database> Default for OptimizerBuilder<'a, D> {
    fn default() -> Self {
        OptimizerBuilder::new()
    }
}

impl<'a, D: Database> With<&'a mut D> for OptimizerBuilder<'a, D> {
    fn with(mut self, input: &'a mut D) -> Self {
        self.db = Some(input);
        self
    }
}

impl<'a, D: Database> With<&'a Dataset> for OptimizerBuilder<'a, D> {
    fn with(mut self, input: &'a Dataset) -> Self {
        self.dataset = Some(input);
        self
    }
}

impl<'a, D: Database> Ready<MultiLevelOptimizer<'a, D>> for OptimizerBuilder<'a, D> {
    type Error = Error;

    fn try_build(self) -> Result<MultiLevelOptimizer<'a, D>> {
        let db = self.db.ok_or_else(|| Error::missing_input("a database"))?;
        let dataset = self
            .dataset
            .ok_or_else(|| Error::missing_input("a dataset"))?;
        let domains = match self.domain_path {
            Some(path) => DomainMap::with_path(path)?,
            None => DomainMap::new(),
        };
        Ok(MultiLevelOptimizer {
            db,
            dataset,
            domains,
            threshold: self.threshold,
            max_rounds: self.max_rounds,
        })
    }
}

/// A configured deletion-request runner over one dataset
pub struct MultiLevelOptimizer<'a, D: Database> {
    db: &'a mut D,
    dataset: &'a Dataset,
    domains: DomainMap,
    threshold: f64,
    max_rounds: usize,
}

impl<'a, D: Database> MultiLevelOptimizer<'a, D> {
    /// Run one deletion request for the cell at (key, column)
    pub fn run(&mut self, key: &Value, column: &str) -> Result<Report> {
        let table = self.dataset.primary_table();
        let key_column = self.dataset.key_column();
        let row = self.db.fetch_row(table, key_column, key)?;
        let value = row
            .get(column)
            .ok_or_else(|| hypergraph::Error::missing_attribute(column))?;
        let target = Cell::new(Attribute::new(table, column), key.clone(), value.clone());
        log::info!("Deletion request for {}", target);

        // the one-shot minimal blocking set through the cost tree
        let edge_builder = HyperedgeBuilder::new(table, self.dataset.constraints());
        let edges = edge_builder.build_hyperedge_map(&row, key, column)?;
        let graph = HyperGraph::build(table, &row, key, column, &edges)?;
        let blocking_set = graph.optimal_delete(&target)?;

        // the sole external mutation, issued exactly once
        self.db.null_out(table, key_column, key, column)?;

        let original = self.domains.get(self.db, table, column)?.size();
        let profiles = self.constraint_profiles(&row, key, column)?;
        log::info!(
            "original domain size {}, {} constraint cells",
            original,
            profiles.len()
        );

        let engine = RoundEngine {
            original,
            threshold: self.threshold,
            max_rounds: self.max_rounds,
        };
        let result = engine.run(target.clone(), profiles);
        Ok(Report {
            target,
            deletion_set: result.deletion_set,
            blocking_set,
            original_domain_size: original,
            initial_restricted_size: result.initial,
            final_domain_size: result.current,
            outcome: result.outcome,
            rounds: result.rounds,
        })
    }

    /// The cells of every attribute co-occurring with the target in some
    /// constraint, profiled by how strongly they restrict the target
    fn constraint_profiles(
        &mut self,
        row: &crate::io::Row,
        key: &Value,
        column: &str,
    ) -> Result<Vec<ConstraintProfile>> {
        let table = self.dataset.primary_table();
        let related: BTreeSet<String> = self
            .dataset
            .constraints()
            .constraints_involving(column)
            .iter()
            .flat_map(|dc| dc.columns())
            .filter(|c| *c != column)
            .map(|c| c.to_string())
            .collect();
        related
            .into_iter()
            .filter_map(|related_column| {
                row.get(&related_column).map(|value| {
                    let restriction = self.restriction_factor(column, &related_column)?;
                    Ok(ConstraintProfile {
                        cell: Cell::new(
                            Attribute::new(table, &related_column),
                            key.clone(),
                            value.clone(),
                        ),
                        restriction,
                    })
                })
            })
            .collect()
    }

    /// How much knowing `cond_column` shrinks the target's domain, from the
    /// average per-group distinct count
    fn restriction_factor(&mut self, column: &str, cond_column: &str) -> Result<f64> {
        let table = self.dataset.primary_table();
        let full = self.db.count_distinct(table, column)? as f64;
        if full == 0.0 {
            return Ok(0.0);
        }
        let grouped = self.db.avg_conditional_distinct(table, column, cond_column)?;
        Ok((1.0 - grouped / full).clamp(0.0, 1.0))
    }
}

/// Convenience: the one-shot minimal blocking set for one cell, without
/// running the optimizer
pub fn blocking_set<D: Database>(
    db: &D,
    dataset: &Dataset,
    key: &Value,
    column: &str,
) -> Result<BTreeSet<Cell>> {
    let table = dataset.primary_table();
    let row = db.fetch_row(table, dataset.key_column(), key)?;
    let value = row
        .get(column)
        .ok_or_else(|| hypergraph::Error::missing_attribute(column))?;
    let target = Cell::new(Attribute::new(table, column), key.clone(), value.clone());
    let edge_builder = HyperedgeBuilder::new(table, dataset.constraints());
    let edges = edge_builder.build_hyperedge_map(&row, key, column)?;
    let graph = HyperGraph::build(table, &row, key, column, &edges)?;
    Ok(graph.optimal_delete(&target)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constraint::{ConstraintSet, DenialConstraint},
        io::memory::{census_database, DATA_GENERATION_SEED},
    };

    fn profile(column: &str, restriction: f64) -> ConstraintProfile {
        ConstraintProfile {
            cell: Cell::new(Attribute::new("t", column), 2, 1),
            restriction,
        }
    }

    fn target() -> Cell {
        Cell::new(Attribute::new("t", "salary"), 2, 1000)
    }

    #[test]
    fn test_restricted_size() {
        let none: [ConstraintProfile; 0] = [];
        assert_eq!(restricted_size(16.0, &none), 16.0);
        let profiles = [profile("a", 10.0 / 13.0), profile("b", 3.0 / 16.0)];
        assert_eq!(restricted_size(16.0, profiles.iter()), 3.0);
        // floored at one value
        assert_eq!(restricted_size(16.0, &[profile("a", 1.0)]), 1.0);
    }

    #[test]
    fn test_threshold_scenario() {
        // α = 0.8, original 16, initial restricted 3; deleting the strongest
        // constraint cell brings the domain to 13, ratio 0.8125
        let engine = RoundEngine {
            original: 16.0,
            threshold: 0.8,
            max_rounds: DEFAULT_MAX_ROUNDS,
        };
        let profiles = vec![profile("a", 10.0 / 13.0), profile("b", 3.0 / 16.0)];
        let result = engine.run(target(), profiles);
        assert_eq!(result.initial, 3.0);
        assert_eq!(result.current, 13.0);
        assert_eq!(result.outcome, Outcome::Satisfied);
        assert_eq!(result.rounds, 1);
        // target plus exactly one auxiliary cell
        assert_eq!(result.deletion_set.len(), 2);
        assert!(result.deletion_set.contains(&target()));
    }

    #[test]
    fn test_already_satisfied() {
        let engine = RoundEngine {
            original: 16.0,
            threshold: 0.5,
            max_rounds: DEFAULT_MAX_ROUNDS,
        };
        let result = engine.run(target(), vec![profile("a", 0.1)]);
        assert_eq!(result.outcome, Outcome::Satisfied);
        assert_eq!(result.rounds, 0);
        assert_eq!(result.deletion_set.len(), 1);
    }

    #[test]
    fn test_exhausted_without_beneficial_candidate() {
        // no profile: nothing can improve the ratio
        let engine = RoundEngine {
            original: 16.0,
            threshold: 2.0,
            max_rounds: DEFAULT_MAX_ROUNDS,
        };
        let result = engine.run(target(), vec![]);
        assert_eq!(result.outcome, Outcome::Exhausted);
        // zero-benefit candidates are not committed either
        let result = engine.run(target(), vec![profile("a", 0.0)]);
        assert_eq!(result.outcome, Outcome::Exhausted);
        assert_eq!(result.deletion_set.len(), 1);
    }

    #[test]
    fn test_iteration_cap() {
        let engine = RoundEngine {
            original: 16.0,
            threshold: 1.1,
            max_rounds: 0,
        };
        let result = engine.run(target(), vec![profile("a", 0.5)]);
        assert_eq!(result.outcome, Outcome::IterationCapped);
    }

    #[test]
    fn test_domain_growth_is_monotonic() {
        let engine = RoundEngine {
            original: 100.0,
            threshold: 0.95,
            max_rounds: DEFAULT_MAX_ROUNDS,
        };
        let profiles = vec![
            profile("a", 0.5),
            profile("b", 0.3),
            profile("c", 0.2),
            profile("d", 0.1),
        ];
        let result = engine.run(target(), profiles);
        assert!(result.current >= result.initial);
        assert!(result.deletion_set.len() >= 1);
        assert!(result.deletion_set.contains(&target()));
    }

    fn adult_dataset() -> Dataset {
        let constraints = ConstraintSet::new(vec![
            DenialConstraint::parse(
                "dc0",
                &[
                    ("t1.education", "!=", "t2.education"),
                    ("t1.education_num", "==", "t2.education_num"),
                ],
            )
            .unwrap(),
            DenialConstraint::parse(
                "dc1",
                &[
                    ("t1.capital_gain", ">", "t2.capital_gain"),
                    ("t1.capital_loss", ">", "t2.capital_loss"),
                ],
            )
            .unwrap(),
        ]);
        Dataset::new("adult", "adult_data", "id", constraints)
    }

    #[test]
    fn test_full_run_over_census_data() {
        let mut db = census_database(DATA_GENERATION_SEED, 300);
        let dataset = adult_dataset();
        let mut optimizer = OptimizerBuilder::new()
            .threshold(0.8)
            .with(&mut db)
            .with(&dataset)
            .try_build()
            .unwrap();
        let report = optimizer.run(&Value::from(2), "education").unwrap();
        println!("{}", report);
        assert!(report.deletion_set.contains(&report.target));
        assert!(report.blocking_set.contains(&report.target));
        assert!(report.final_domain_size >= report.initial_restricted_size);
        match report.outcome {
            Outcome::Satisfied => assert!(report.privacy_ratio() >= 0.8),
            Outcome::Exhausted | Outcome::IterationCapped => {
                assert!(report.privacy_ratio() < 0.8)
            }
        }
        // the single external mutation happened
        let row = db.fetch_row("adult_data", "id", &Value::from(2)).unwrap();
        assert!(!row.contains_key("education"));
    }

    #[test]
    fn test_missing_row_aborts() {
        let mut db = census_database(DATA_GENERATION_SEED, 10);
        let dataset = adult_dataset();
        let mut optimizer = OptimizerBuilder::new()
            .with(&mut db)
            .with(&dataset)
            .try_build()
            .unwrap();
        assert!(matches!(
            optimizer.run(&Value::from(9999), "education"),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_builder_requires_inputs() {
        let builder: OptimizerBuilder<'_, crate::io::memory::MemoryDatabase> =
            OptimizerBuilder::new();
        assert!(matches!(
            builder.try_build(),
            Err(Error::MissingInput(_))
        ));
    }
}
