//! # In-memory database
//!
//! A small column-typed table store implementing [`Database`], used by tests
//! and demos, together with a seeded generator of census-like data.
//!

use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::BTreeSet;

use super::{Aggregate, ColumnDef, Database, Error, KeyRelationship, Result, Row};
use crate::{cell::Value, constraint::Operator};

pub const DATA_GENERATION_SEED: u64 = 1234;

/// Education levels paired with their ordinal, as in the census data
const EDUCATION_LEVELS: [&str; 16] = [
    "Preschool",
    "1st-4th",
    "5th-6th",
    "7th-8th",
    "9th",
    "10th",
    "11th",
    "12th",
    "HS-grad",
    "Some-college",
    "Assoc-voc",
    "Assoc-acdm",
    "Bachelors",
    "Masters",
    "Prof-school",
    "Doctorate",
];

const OCCUPATIONS: [&str; 6] = [
    "Adm-clerical",
    "Craft-repair",
    "Exec-managerial",
    "Prof-specialty",
    "Sales",
    "Tech-support",
];

const RELATIONSHIPS: [&str; 4] = ["Husband", "Not-in-family", "Own-child", "Wife"];

/// Does `value op threshold` hold? Numeric pairs compare numerically,
/// anything else textually.
fn satisfies(op: Operator, value: &Value, threshold: &Value) -> bool {
    let ordering = match (value.as_f64(), threshold.as_f64()) {
        (Some(l), Some(r)) => l.total_cmp(&r),
        _ => value.to_string().cmp(&threshold.to_string()),
    };
    match op {
        Operator::Eq => ordering.is_eq(),
        Operator::NotEq => ordering.is_ne(),
        Operator::Lt => ordering.is_lt(),
        Operator::Gt => ordering.is_gt(),
        Operator::LtEq => ordering.is_le(),
        Operator::GtEq => ordering.is_ge(),
    }
}

/// One table: declared columns and rows of nullable values
#[derive(Clone, Debug)]
pub struct MemoryTable {
    name: String,
    columns: Vec<ColumnDef>,
    rows: Vec<Vec<Option<Value>>>,
}

impl MemoryTable {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> MemoryTable {
        MemoryTable {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_row<I: IntoIterator<Item = Value>>(mut self, values: I) -> MemoryTable {
        self.rows
            .push(values.into_iter().map(Some).collect());
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_index(&self, column: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(column))
            .ok_or_else(|| Error::unknown_column(&self.name, column))
    }

    /// Non-null values of one column
    fn column_values<'t>(&'t self, column: &str) -> Result<impl Iterator<Item = &'t Value> + 't> {
        let index = self.column_index(column)?;
        Ok(self.rows.iter().filter_map(move |row| row[index].as_ref()))
    }
}

/// An in-memory [`Database`]
#[derive(Clone, Debug, Default)]
pub struct MemoryDatabase {
    tables: Vec<MemoryTable>,
}

impl MemoryDatabase {
    pub fn new(tables: Vec<MemoryTable>) -> MemoryDatabase {
        MemoryDatabase { tables }
    }

    fn table(&self, name: &str) -> Result<&MemoryTable> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::unknown_table(name))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable> {
        self.tables
            .iter_mut()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::unknown_table(name))
    }

    fn numeric_fold(
        &self,
        table: &str,
        column: &str,
        fold: fn(f64, f64) -> f64,
    ) -> Result<Option<f64>> {
        let table = self.table(table)?;
        Ok(table
            .column_values(column)?
            .filter_map(Value::as_f64)
            .reduce(fold))
    }
}

impl Database for MemoryDatabase {
    fn fetch_row(&self, table: &str, key_column: &str, key: &Value) -> Result<Row> {
        let t = self.table(table)?;
        let key_index = t.column_index(key_column)?;
        let row = t
            .rows
            .iter()
            .find(|row| row[key_index].as_ref() == Some(key))
            .ok_or_else(|| Error::row_not_found(table, key))?;
        Ok(t.columns
            .iter()
            .zip(row)
            .filter_map(|(def, value)| value.clone().map(|v| (def.name.clone(), v)))
            .collect())
    }

    fn columns(&self, table: &str) -> Result<Vec<ColumnDef>> {
        Ok(self.table(table)?.columns.clone())
    }

    fn numeric_min(&self, table: &str, column: &str) -> Result<Option<f64>> {
        self.numeric_fold(table, column, f64::min)
    }

    fn numeric_max(&self, table: &str, column: &str) -> Result<Option<f64>> {
        self.numeric_fold(table, column, f64::max)
    }

    fn distinct_values(&self, table: &str, column: &str) -> Result<Vec<Value>> {
        let values: BTreeSet<Value> = self
            .table(table)?
            .column_values(column)?
            .cloned()
            .collect();
        Ok(values.into_iter().collect())
    }

    fn aggregate_where(
        &self,
        table: &str,
        column: &str,
        aggregate: Aggregate,
        cond_column: &str,
        op: Operator,
        threshold: &Value,
    ) -> Result<Option<f64>> {
        let t = self.table(table)?;
        let column_index = t.column_index(column)?;
        let cond_index = t.column_index(cond_column)?;
        let qualifying = t.rows.iter().filter_map(|row| {
            let cond = row[cond_index].as_ref()?;
            satisfies(op, cond, threshold)
                .then(|| row[column_index].as_ref().and_then(Value::as_f64))
                .flatten()
        });
        Ok(match aggregate {
            Aggregate::Min => qualifying.reduce(f64::min),
            Aggregate::Max => qualifying.reduce(f64::max),
        })
    }

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
    ) -> Result<Option<f64>> {
        let known = self.table(cond_table)?;
        let known_key = known.column_index(&link.key_column)?;
        let known_cond = known.column_index(cond_column)?;
        let keys: BTreeSet<&Value> = known
            .rows
            .iter()
            .filter_map(|row| {
                let cond = row[known_cond].as_ref()?;
                satisfies(op, cond, threshold)
                    .then(|| row[known_key].as_ref())
                    .flatten()
            })
            .collect();
        let target = self.table(table)?;
        let target_key = target.column_index(&link.key_column)?;
        let column_index = target.column_index(column)?;
        let joined = target.rows.iter().filter_map(|row| {
            let key = row[target_key].as_ref()?;
            keys.contains(key)
                .then(|| row[column_index].as_ref().and_then(Value::as_f64))
                .flatten()
        });
        Ok(match aggregate {
            Aggregate::Min => joined.reduce(f64::min),
            Aggregate::Max => joined.reduce(f64::max),
        })
    }

    fn avg_conditional_distinct(
        &self,
        table: &str,
        column: &str,
        cond_column: &str,
    ) -> Result<f64> {
        let t = self.table(table)?;
        let column_index = t.column_index(column)?;
        let cond_index = t.column_index(cond_column)?;
        let mut groups: std::collections::BTreeMap<&Value, BTreeSet<&Value>> = Default::default();
        for row in &t.rows {
            if let (Some(cond), Some(value)) = (row[cond_index].as_ref(), row[column_index].as_ref())
            {
                groups.entry(cond).or_default().insert(value);
            }
        }
        if groups.is_empty() {
            return Ok(1.0);
        }
        let total: usize = groups.values().map(BTreeSet::len).sum();
        Ok(total as f64 / groups.len() as f64)
    }

    fn null_out(&mut self, table: &str, key_column: &str, key: &Value, column: &str) -> Result<()> {
        log::info!("Nulling {}.{} where {} = {}", table, column, key_column, key);
        let t = self.table_mut(table)?;
        let key_index = t.column_index(key_column)?;
        let column_index = t.column_index(column)?;
        let row = t
            .rows
            .iter_mut()
            .find(|row| row[key_index].as_ref() == Some(key))
            .ok_or_else(|| Error::row_not_found(table, key))?;
        row[column_index] = None;
        Ok(())
    }
}

/// A seeded census-like table, in the shape of the adult dataset
pub fn census_database(seed: u64, size: usize) -> MemoryDatabase {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut table = MemoryTable::new(
        "adult_data",
        vec![
            ColumnDef::numeric("id"),
            ColumnDef::numeric("age"),
            ColumnDef::numeric("fnlwgt"),
            ColumnDef::text("education"),
            ColumnDef::numeric("education_num"),
            ColumnDef::text("occupation"),
            ColumnDef::text("relationship"),
            ColumnDef::numeric("capital_gain"),
            ColumnDef::numeric("capital_loss"),
            ColumnDef::numeric("hours_per_week"),
        ],
    );
    for id in 1..=size {
        let education = rng.gen_range(0..EDUCATION_LEVELS.len());
        let gain: i64 = if rng.gen_bool(0.2) {
            rng.gen_range(1000..20000)
        } else {
            0
        };
        table = table.with_row([
            Value::from(id as i64),
            Value::from(rng.gen_range(17..90) as i64),
            Value::from(rng.gen_range(20000..400000) as i64),
            Value::from(EDUCATION_LEVELS[education]),
            Value::from(education as i64 + 1),
            Value::from(OCCUPATIONS[rng.gen_range(0..OCCUPATIONS.len())]),
            Value::from(RELATIONSHIPS[rng.gen_range(0..RELATIONSHIPS.len())]),
            Value::from(gain),
            Value::from(if gain > 0 { 0 } else { rng.gen_range(0..2000) as i64 }),
            Value::from(rng.gen_range(1..99) as i64),
        ]);
    }
    MemoryDatabase::new(vec![table])
}

/// A small fixed payroll fixture for bound-inference tests: `tax` and
/// `payroll` share the `eid` key
pub fn tax_database() -> MemoryDatabase {
    let tax = MemoryTable::new(
        "tax",
        vec![
            ColumnDef::numeric("eid"),
            ColumnDef::numeric("tax"),
            ColumnDef::numeric("salary"),
        ],
    )
    .with_row([Value::from(1), Value::from(100), Value::from(1000)])
    .with_row([Value::from(2), Value::from(200), Value::from(2000)])
    .with_row([Value::from(3), Value::from(300), Value::from(3000)])
    .with_row([Value::from(4), Value::from(150), Value::from(1500)])
    .with_row([Value::from(5), Value::from(250), Value::from(2500)]);
    let payroll = MemoryTable::new(
        "payroll",
        vec![ColumnDef::numeric("eid"), ColumnDef::numeric("bonus")],
    )
    .with_row([Value::from(1), Value::from(10)])
    .with_row([Value::from(2), Value::from(20)])
    .with_row([Value::from(3), Value::from(30)])
    .with_row([Value::from(4), Value::from(15)])
    .with_row([Value::from(5), Value::from(25)]);
    MemoryDatabase::new(vec![tax, payroll])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_row() {
        let db = tax_database();
        let row = db.fetch_row("Tax", "EID", &Value::from(2)).unwrap();
        assert_eq!(row["tax"], Value::from(200));
        assert!(matches!(
            db.fetch_row("tax", "eid", &Value::from(99)),
            Err(Error::RowNotFound(_))
        ));
    }

    #[test]
    fn test_aggregates() {
        let db = tax_database();
        assert_eq!(db.numeric_min("tax", "salary").unwrap(), Some(1000.0));
        assert_eq!(db.numeric_max("tax", "salary").unwrap(), Some(3000.0));
        // MAX(salary) over rows where tax < 200
        let lower = db
            .aggregate_where(
                "tax",
                "salary",
                Aggregate::Max,
                "tax",
                Operator::Lt,
                &Value::from(200),
            )
            .unwrap();
        assert_eq!(lower, Some(1500.0));
        // no row with tax < 100
        let none = db
            .aggregate_where(
                "tax",
                "salary",
                Aggregate::Max,
                "tax",
                Operator::Lt,
                &Value::from(100),
            )
            .unwrap();
        assert_eq!(none, None);
    }

    #[test]
    fn test_join_aggregate() {
        let db = tax_database();
        let link = KeyRelationship::new("tax", "payroll", "eid");
        // MIN(bonus) over payroll rows whose employee has tax > 200
        let upper = db
            .aggregate_join_where(
                "payroll",
                "bonus",
                Aggregate::Min,
                "tax",
                "tax",
                Operator::Gt,
                &Value::from(200),
                &link,
            )
            .unwrap();
        assert_eq!(upper, Some(25.0));
    }

    #[test]
    fn test_null_out() {
        let mut db = tax_database();
        db.null_out("tax", "eid", &Value::from(2), "salary").unwrap();
        let row = db.fetch_row("tax", "eid", &Value::from(2)).unwrap();
        assert!(!row.contains_key("salary"));
        assert_eq!(row["tax"], Value::from(200));
    }

    #[test]
    fn test_census_generation_is_deterministic() {
        let a = census_database(DATA_GENERATION_SEED, 50);
        let b = census_database(DATA_GENERATION_SEED, 50);
        let row_a = a.fetch_row("adult_data", "id", &Value::from(7)).unwrap();
        let row_b = b.fetch_row("adult_data", "id", &Value::from(7)).unwrap();
        assert_eq!(row_a, row_b);
        // education and its ordinal stay paired
        let education = row_a["education"].to_string();
        let index = EDUCATION_LEVELS.iter().position(|e| *e == education).unwrap();
        assert_eq!(row_a["education_num"], Value::from(index as i64 + 1));
    }

    #[test]
    fn test_avg_conditional_distinct() {
        let db = census_database(DATA_GENERATION_SEED, 200);
        let avg = db
            .avg_conditional_distinct("adult_data", "education", "education_num")
            .unwrap();
        // education is functionally determined by education_num
        assert_eq!(avg, 1.0);
        let loose = db
            .avg_conditional_distinct("adult_data", "education", "occupation")
            .unwrap();
        assert!(loose > 1.0);
    }
}
