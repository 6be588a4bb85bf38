//! Conclusions (§4.2, §4.8): the value a target variable takes on when a mapping
//! case's condition holds, with the same kind of canonical textual form as
//! [`crate::logic::LogicOperator`].

use crate::aggregate::AggregatorType;
use crate::error::{CoreError, CoreResult};
use crate::logic::{RequiredData, RequiredVariable};
use crate::sourcedata::SourceDataLine;
use crate::types::{DataType, Value};

/// How a target variable's value is produced from one joined source row.
#[derive(Debug, Clone, PartialEq)]
pub enum Conclusion {
    /// Copies a source variable's value, casting it to the target data type.
    Copy {
        target_data_type: DataType,
        origin_table: String,
        var_to_copy: String,
    },
    /// Always returns the same fixed value.
    FixedReturn {
        target_data_type: DataType,
        return_value: Value,
    },
    /// Returns a precomputed aggregation of a descendant table's variable.
    Aggregate {
        source_data_type: DataType,
        origin_table: String,
        var_to_aggregate: String,
        aggregator: AggregatorType,
    },
}

impl Conclusion {
    pub fn copy(
        target_data_type: DataType,
        origin_table: impl Into<String>,
        var_to_copy: impl Into<String>,
    ) -> Self {
        Conclusion::Copy {
            target_data_type,
            origin_table: origin_table.into(),
            var_to_copy: var_to_copy.into(),
        }
    }

    pub fn fixed_return(target_data_type: DataType, raw: &str) -> CoreResult<Self> {
        let return_value = target_data_type
            .cast(raw)
            .ok_or_else(|| CoreError::parse("fixed return value does not match target data type", raw))?;
        Ok(Conclusion::FixedReturn {
            target_data_type,
            return_value,
        })
    }

    pub fn aggregate(
        source_data_type: DataType,
        origin_table: impl Into<String>,
        var_to_aggregate: impl Into<String>,
        aggregator: AggregatorType,
    ) -> CoreResult<Self> {
        let origin_table = origin_table.into();
        let var_to_aggregate = var_to_aggregate.into();
        if aggregator == AggregatorType::List {
            return Err(CoreError::validation(
                origin_table.clone(),
                format!(
                    "aggregator type \"LIST\" for variable {var_to_aggregate:?} of table {origin_table:?} not allowed for conclusion"
                ),
            ));
        }
        AggregatorType::check_compatibility(
            &origin_table,
            &var_to_aggregate,
            source_data_type,
            aggregator,
            false,
        )?;
        Ok(Conclusion::Aggregate {
            source_data_type,
            origin_table,
            var_to_aggregate,
            aggregator,
        })
    }

    /// The data type of the value this conclusion returns.
    pub fn target_data_type(&self) -> DataType {
        match self {
            Conclusion::Copy { target_data_type, .. } => *target_data_type,
            Conclusion::FixedReturn { target_data_type, .. } => *target_data_type,
            Conclusion::Aggregate { aggregator, .. } => aggregator
                .result_data_type()
                .expect("conclusion construction rejects List, the only aggregator without a result type"),
        }
    }

    pub fn get_required_data(&self) -> RequiredData {
        let mut out = RequiredData::new();
        match self {
            Conclusion::Copy {
                origin_table,
                var_to_copy,
                ..
            } => {
                out.insert(origin_table.clone(), vec![(var_to_copy.clone(), None)]);
            }
            Conclusion::FixedReturn { .. } => {}
            Conclusion::Aggregate {
                source_data_type,
                origin_table,
                var_to_aggregate,
                aggregator,
            } => {
                let entry: RequiredVariable =
                    (var_to_aggregate.clone(), Some((*aggregator, *source_data_type)));
                out.insert(origin_table.clone(), vec![entry]);
            }
        }
        out
    }

    /// Evaluates this conclusion against a joined source row.
    pub fn get_return(&self, source_data: &SourceDataLine) -> CoreResult<Option<Value>> {
        match self {
            Conclusion::Copy {
                target_data_type,
                origin_table,
                var_to_copy,
            } => {
                let raw = source_data.get_singular_value(origin_table, var_to_copy)?;
                Ok(raw.and_then(|r| target_data_type.cast(r)))
            }
            Conclusion::FixedReturn { return_value, .. } => Ok(Some(return_value.clone())),
            Conclusion::Aggregate {
                source_data_type,
                origin_table,
                var_to_aggregate,
                aggregator,
            } => {
                let agg = source_data.aggregated_data.get_variable_aggregation(
                    origin_table,
                    var_to_aggregate,
                    *source_data_type,
                    *aggregator,
                )?;
                Ok(agg_to_value(agg))
            }
        }
    }
}

fn agg_to_value(agg: &crate::sourcedata::AggregatedValue) -> Option<Value> {
    use crate::sourcedata::AggregatedValue;
    match agg {
        AggregatedValue::Count(n) => Some(Value::Int(*n)),
        AggregatedValue::Numeric(v) => v.map(Value::Dec),
        AggregatedValue::Text(v) => v.clone().map(Value::Str),
        AggregatedValue::Set(_) => None,
    }
}

impl std::fmt::Display for Conclusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Conclusion::Copy {
                var_to_copy,
                origin_table,
                target_data_type,
            } => write!(f, "COPY VARIABLE {var_to_copy} IN TABLE {origin_table} IF TYPE IS {target_data_type}"),
            Conclusion::FixedReturn {
                return_value,
                target_data_type,
            } => write!(f, "RETURN {} OF TYPE {target_data_type}", return_value.to_raw_string()),
            Conclusion::Aggregate {
                source_data_type,
                origin_table,
                var_to_aggregate,
                aggregator,
            } => write!(
                f,
                "AGGREGATE {} VARIABLE {var_to_aggregate} OF TYPE {source_data_type} IN TABLE {origin_table}",
                aggregator.as_str()
            ),
        }
    }
}

/// Parses the canonical textual form of a [`Conclusion`], trying each variant in turn.
pub fn parse_conclusion(input: &str) -> CoreResult<Conclusion> {
    if let Some(rest) = input.strip_prefix("COPY VARIABLE ") {
        if let Some(idx) = rest.find(" IN TABLE ") {
            let var = &rest[..idx];
            let rest = &rest[idx + " IN TABLE ".len()..];
            if let Some(idx) = rest.find(" IF TYPE IS ") {
                let table = &rest[..idx];
                let data_type_str = &rest[idx + " IF TYPE IS ".len()..];
                if let Ok(data_type) = data_type_str.parse::<DataType>() {
                    return Ok(Conclusion::copy(data_type, table, var));
                }
            }
        }
    }

    if let Some(rest) = input.strip_prefix("RETURN ") {
        if let Some(idx) = rest.find(" OF TYPE ") {
            let value = &rest[..idx];
            let data_type_str = &rest[idx + " OF TYPE ".len()..];
            if let Ok(data_type) = data_type_str.parse::<DataType>() {
                return Conclusion::fixed_return(data_type, value);
            }
        }
    }

    if let Some(rest) = input.strip_prefix("AGGREGATE ") {
        if let Some(idx) = rest.find(" VARIABLE ") {
            let agg_token = &rest[..idx];
            if let Some(aggregator) = AggregatorType::from_str_token(agg_token) {
                let rest = &rest[idx + " VARIABLE ".len()..];
                if let Some(idx) = rest.find(" OF TYPE ") {
                    let var = &rest[..idx];
                    let rest = &rest[idx + " OF TYPE ".len()..];
                    if let Some(idx) = rest.find(" IN TABLE ") {
                        let data_type_str = &rest[..idx];
                        let table = &rest[idx + " IN TABLE ".len()..];
                        if let Ok(data_type) = data_type_str.parse::<DataType>() {
                            return Conclusion::aggregate(data_type, table, var, aggregator);
                        }
                    }
                }
            }
        }
    }

    Err(CoreError::parse("the input string is not a valid conclusion", input))
}
