//! # Constraint-conditioned bound inference
//!
//! Under a denial constraint of the order-comparison shape
//! `¬(t1.A > t2.A ∧ t1.B < t2.B)` — A and B keep the same relative order
//! across any two tuples — a known value `v` of B pins A into an interval:
//! any tuple with a smaller B caps A from below, any tuple with a larger B
//! caps it from above. A side with no qualifying row is unbounded.
//!

use super::{Error, Interval, Result};
use crate::{
    cell::{Attribute, Value},
    constraint::{DenialConstraint, Operator},
    io::{Aggregate, Database, Dataset},
};

/// The (greater, lesser) column pair of an order-comparison constraint:
/// exactly two predicates, each comparing one column across the two tuples,
/// one with `>` and one with `<`. Anything else has no such shape.
pub fn comparison_shape(dc: &DenialConstraint) -> Option<(&str, &str)> {
    match dc.predicates() {
        [first, second] => {
            // each predicate compares a column with itself across tuples
            if first.left().column() != first.right().column()
                || second.left().column() != second.right().column()
            {
                return None;
            }
            match (first.op(), second.op()) {
                (Operator::Gt, Operator::Lt) => {
                    Some((first.left().column(), second.left().column()))
                }
                (Operator::Lt, Operator::Gt) => {
                    Some((second.left().column(), first.left().column()))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// Tightened bounds for `target` given `known = known_value`, under `dc`.
///
/// Lower bound: MAX(target) over rows where known < value; upper bound:
/// MIN(target) over rows where known > value. When target and known live in
/// different tables the aggregates run across the dataset's declared key
/// relationship.
pub fn infer_bounds<D: Database>(
    db: &D,
    dataset: &Dataset,
    dc: &DenialConstraint,
    target: &Attribute,
    known: &Attribute,
    known_value: &Value,
) -> Result<Interval> {
    let (a, b) = comparison_shape(dc).ok_or_else(|| Error::shape(dc))?;
    let pair_matches = (a.eq_ignore_ascii_case(target.column())
        && b.eq_ignore_ascii_case(known.column()))
        || (b.eq_ignore_ascii_case(target.column()) && a.eq_ignore_ascii_case(known.column()));
    if !pair_matches {
        return Err(Error::shape(dc));
    }

    let same_table = target.table().eq_ignore_ascii_case(known.table());
    let side = |aggregate: Aggregate, op: Operator| -> Result<Option<f64>> {
        if same_table {
            Ok(db.aggregate_where(
                target.table(),
                target.column(),
                aggregate,
                known.column(),
                op,
                known_value,
            )?)
        } else {
            let link = dataset.relationship(target.table(), known.table())?;
            Ok(db.aggregate_join_where(
                target.table(),
                target.column(),
                aggregate,
                known.table(),
                known.column(),
                op,
                known_value,
                link,
            )?)
        }
    };

    let lower = side(Aggregate::Max, Operator::Lt)?.unwrap_or(f64::NEG_INFINITY);
    let upper = side(Aggregate::Min, Operator::Gt)?.unwrap_or(f64::INFINITY);
    log::debug!(
        "Bounds for {} given {} = {}: ({}, {})",
        target,
        known,
        known_value,
        lower,
        upper
    );
    Ok(Interval::new(lower, upper))
}
