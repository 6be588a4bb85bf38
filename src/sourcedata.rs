//! One joined source row (§4.7): the raw cells a predicate or conclusion sees for a
//! single primary key value, plus any aggregated data collapsed in from descendant
//! tables via [`crate::aggregate::AggregatorType`].

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::aggregate::AggregatorType;
use crate::error::{CoreError, CoreResult};
use crate::types::{DataType, Value};

/// The result of aggregating one variable's values, under one data type cast, across a
/// foreign-key group (§4.3, §4.7). `None` variants mean the group held no castable
/// values and the statistic is undefined, distinct from `Count(0)` which is well-defined.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregatedValue {
    Count(i64),
    Numeric(Option<f64>),
    Text(Option<String>),
    Set(HashSet<Value>),
}

impl AggregatedValue {
    fn is_unset(&self) -> bool {
        matches!(self, AggregatedValue::Numeric(None) | AggregatedValue::Text(None))
    }
}

type VariableAggregations = IndexMap<(DataType, AggregatorType), AggregatedValue>;

/// `table -> variable -> (data type, aggregator) -> aggregated value`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedData {
    pub data: IndexMap<String, IndexMap<String, VariableAggregations>>,
}

impl AggregatedData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(
        &mut self,
        table: impl Into<String>,
        variable: impl Into<String>,
        data_type: DataType,
        aggregator: AggregatorType,
        value: AggregatedValue,
    ) {
        self.data
            .entry(table.into())
            .or_default()
            .entry(variable.into())
            .or_default()
            .insert((data_type, aggregator), value);
    }

    pub fn get_variable_aggregation(
        &self,
        table: &str,
        variable: &str,
        data_type: DataType,
        aggregator: AggregatorType,
    ) -> CoreResult<&AggregatedValue> {
        let vars = self
            .data
            .get(table)
            .ok_or_else(|| CoreError::schema(table, format!("table {table:?} not found in aggregated source data")))?;
        let aggs = vars.get(variable).ok_or_else(|| {
            CoreError::schema(
                table,
                format!("variable {variable:?} for table {table:?} not found in aggregated source data"),
            )
        })?;
        aggs.get(&(data_type, aggregator)).ok_or_else(|| {
            CoreError::schema(
                table,
                format!(
                    "aggregated data of type {:?} for values of data type {data_type} of variable {variable:?} in table {table:?} does not exist in aggregated source data",
                    aggregator.as_str()
                ),
            )
        })
    }

    /// Combines two aggregated-data sets, as happens when two distinct source rows
    /// contribute aggregations for the same target row under inheritance (§4.8).
    /// Disjoint keys union; shared keys merge only if they agree, with an unset
    /// (`None`) aggregation on either side losing to the other's concrete value.
    pub fn merge(&self, other: &AggregatedData) -> CoreResult<AggregatedData> {
        let mut merged = self.clone();
        for (table, vars) in &other.data {
            let target_vars = merged.data.entry(table.clone()).or_default();
            for (variable, aggs) in vars {
                let target_aggs = target_vars.entry(variable.clone()).or_default();
                for (key, value) in aggs {
                    match target_aggs.get(key) {
                        None => {
                            target_aggs.insert(*key, value.clone());
                        }
                        Some(existing) => {
                            let resolved = if existing.is_unset() {
                                value.clone()
                            } else if value.is_unset() || existing == value {
                                existing.clone()
                            } else {
                                return Err(CoreError::validation(
                                    table.clone(),
                                    format!(
                                        "cannot merge aggregated data objects, because aggregated data for variable {variable:?} of table {table:?}, data type {} and aggregation type {} is contained in both objects and values differ",
                                        key.0, key.1.as_str()
                                    ),
                                ));
                            };
                            target_aggs.insert(*key, resolved);
                        }
                    }
                }
            }
        }
        Ok(merged)
    }
}

/// One joined source row: raw cell strings keyed by table and variable, plus whatever
/// aggregated data a transformation case requires from descendant tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceDataLine {
    pub rows: IndexMap<String, IndexMap<String, String>>,
    pub aggregated_data: AggregatedData,
}

impl SourceDataLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: IndexMap<String, IndexMap<String, String>>) -> Self {
        Self {
            rows,
            aggregated_data: AggregatedData::new(),
        }
    }

    /// The raw cell string for `variable` in `table`, or an error if the table or
    /// variable is absent from this row.
    pub fn get_singular_value(&self, table: &str, variable: &str) -> CoreResult<Option<&str>> {
        let vars = self
            .rows
            .get(table)
            .ok_or_else(|| CoreError::schema(table, format!("table {table:?} not found in source data")))?;
        match vars.get(variable) {
            Some(v) => Ok(Some(v.as_str())),
            None => {
                if vars.contains_key(variable) {
                    Ok(None)
                } else {
                    Err(CoreError::schema(
                        table,
                        format!("variable {variable:?} for table {table:?} not found in source data"),
                    ))
                }
            }
        }
    }
}
