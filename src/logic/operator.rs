//! The logical expression AST (§4.2): predicates over source rows, with a canonical
//! textual form that round-trips through [`super::parser::parse`].

use indexmap::IndexMap;
use std::fmt;

use crate::aggregate::AggregatorType;
use crate::error::{CoreError, CoreResult};
use crate::sourcedata::{AggregatedValue, SourceDataLine};
use crate::types::{DataType, Value};

/// Comparison used by a [`LogicOperator::String`] predicate or a string-typed
/// [`LogicOperator::Aggregator`] predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringOperatorType {
    Equals,
    Contains,
    UnequalTo,
}

impl StringOperatorType {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            StringOperatorType::Equals => "IS",
            StringOperatorType::Contains => "CONTAINS",
            StringOperatorType::UnequalTo => "<>",
        }
    }

    pub(crate) fn from_token(s: &str) -> Option<Self> {
        match s {
            "IS" => Some(StringOperatorType::Equals),
            "CONTAINS" => Some(StringOperatorType::Contains),
            "<>" => Some(StringOperatorType::UnequalTo),
            _ => None,
        }
    }
}

/// Comparison used by a [`LogicOperator::Metric`] predicate or a numeric-typed
/// [`LogicOperator::Aggregator`] predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricOperatorType {
    Equals,
    Smaller,
    Larger,
    SmallerOrEqual,
    LargerOrEqual,
}

impl MetricOperatorType {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            MetricOperatorType::Equals => "==",
            MetricOperatorType::Smaller => "<",
            MetricOperatorType::Larger => ">",
            MetricOperatorType::SmallerOrEqual => "<=",
            MetricOperatorType::LargerOrEqual => ">=",
        }
    }

    pub(crate) fn from_token(s: &str) -> Option<Self> {
        match s {
            "==" => Some(MetricOperatorType::Equals),
            "<" => Some(MetricOperatorType::Smaller),
            ">" => Some(MetricOperatorType::Larger),
            "<=" => Some(MetricOperatorType::SmallerOrEqual),
            ">=" => Some(MetricOperatorType::LargerOrEqual),
            _ => None,
        }
    }

    pub fn holds(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            MetricOperatorType::Equals => lhs == rhs,
            MetricOperatorType::Smaller => lhs < rhs,
            MetricOperatorType::Larger => lhs > rhs,
            MetricOperatorType::SmallerOrEqual => lhs <= rhs,
            MetricOperatorType::LargerOrEqual => lhs >= rhs,
        }
    }
}

/// Either flavor of comparison an [`LogicOperator::Aggregator`] predicate may use,
/// depending on whether its aggregator produces a string or numeric result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOperator {
    Metric(MetricOperatorType),
    String(StringOperatorType),
}

impl CompareOperator {
    fn as_str(&self) -> &'static str {
        match self {
            CompareOperator::Metric(m) => m.as_str(),
            CompareOperator::String(s) => s.as_str(),
        }
    }
}

/// A required source variable reference: the variable itself, plus (for
/// [`LogicOperator::Aggregator`] predicates) which aggregation of it is needed.
pub type RequiredVariable = (String, Option<(AggregatorType, DataType)>);

/// `table -> required variables of that table`, in first-encountered order.
pub type RequiredData = IndexMap<String, Vec<RequiredVariable>>;

fn merge_required(target: &mut RequiredData, source: RequiredData) {
    for (table, vars) in source {
        let entry = target.entry(table).or_default();
        for v in vars {
            if !entry.contains(&v) {
                entry.push(v);
            }
        }
    }
}

/// A predicate (or boolean composition of predicates) evaluated against one source row
/// spanning possibly several joined tables.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicOperator {
    AlwaysTrue,
    String {
        table: String,
        variable: String,
        value: String,
        compare: StringOperatorType,
    },
    Metric {
        table: String,
        variable: String,
        value: Value,
        data_type: DataType,
        compare: MetricOperatorType,
    },
    InList {
        table: String,
        variable: String,
        data_type: DataType,
        values: Vec<Value>,
    },
    Negated(Box<LogicOperator>),
    And(Vec<LogicOperator>),
    Or(Vec<LogicOperator>),
    Aggregator {
        table: String,
        variable: String,
        value: Value,
        data_type: DataType,
        aggregator: AggregatorType,
        compare: CompareOperator,
    },
}

fn quote_if_whitespace(s: &str) -> String {
    if s.chars().any(|c| c.is_whitespace() || c == ',') {
        format!("{s:?}")
    } else {
        s.to_string()
    }
}

impl LogicOperator {
    /// Constructs an [`LogicOperator::Aggregator`] predicate, checking the same
    /// consistency rules the aggregator vocabulary imposes between the aggregator's
    /// result type and the comparison operator used against it.
    pub fn aggregator(
        table: impl Into<String>,
        variable: impl Into<String>,
        value: Value,
        data_type: DataType,
        aggregator: AggregatorType,
        compare: CompareOperator,
    ) -> CoreResult<Self> {
        let table = table.into();
        let variable = variable.into();
        AggregatorType::check_compatibility(&table, &variable, data_type, aggregator, true)?;

        let result_type = aggregator.result_data_type();
        let expects_string = matches!(result_type, Some(DataType::String));
        match (&compare, expects_string) {
            (CompareOperator::String(_), false) => {
                return Err(CoreError::validation(
                    table.clone(),
                    format!(
                        "aggregator type \"{}\" of variable \"{variable}\" in table \"{table}\" can only be combined with a metric operator type. possible types are: \"==\", \"<\", \">\", \"<=\", \">=\"",
                        aggregator.as_str()
                    ),
                ));
            }
            (CompareOperator::Metric(_), true) => {
                return Err(CoreError::validation(
                    table.clone(),
                    format!(
                        "aggregator type \"{}\" of variable \"{variable}\" in table \"{table}\" must be combined with a string operator type. possible types are: \"IS\", \"CONTAINS\"",
                        aggregator.as_str()
                    ),
                ));
            }
            _ => {}
        }

        match (&compare, &value) {
            (CompareOperator::String(_), Value::Str(_)) => {}
            (CompareOperator::String(op), _) => {
                return Err(CoreError::validation(
                    table.clone(),
                    format!(
                        "variable \"{variable}\" in table \"{table}\" has mismatch of operator type \"{}\" and value type to compare with int",
                        op.as_str()
                    ),
                ));
            }
            (CompareOperator::Metric(op), Value::Str(_)) => {
                return Err(CoreError::validation(
                    table,
                    format!(
                        "variable \"{variable}\" in table \"{table}\" has mismatch of operator type \"{}\" and value type to compare with str",
                        op.as_str()
                    ),
                ));
            }
            (CompareOperator::Metric(_), _) => {}
        }

        Ok(LogicOperator::Aggregator {
            table,
            variable,
            value,
            data_type,
            aggregator,
            compare,
        })
    }

    /// Evaluates this predicate against one joined source row. A missing singular value
    /// or an undefined aggregation makes the predicate false rather than an error, the
    /// same "cast miss is not an error" stance the rest of the crate takes (§7).
    pub fn evaluate(&self, data: &SourceDataLine) -> CoreResult<bool> {
        match self {
            LogicOperator::AlwaysTrue => Ok(true),
            LogicOperator::String {
                table,
                variable,
                value,
                compare,
            } => {
                let raw = data.get_singular_value(table, variable)?;
                Ok(match raw {
                    Some(raw) => match compare {
                        StringOperatorType::Equals => raw == value,
                        StringOperatorType::Contains => raw.contains(value.as_str()),
                        StringOperatorType::UnequalTo => raw != value,
                    },
                    None => false,
                })
            }
            LogicOperator::Metric {
                table,
                variable,
                value,
                data_type,
                compare,
            } => {
                let raw = data.get_singular_value(table, variable)?;
                Ok(match raw.and_then(|r| data_type.cast(r)).and_then(|v| v.as_f64()) {
                    Some(lhs) => match value.as_f64() {
                        Some(rhs) => compare.holds(lhs, rhs),
                        None => false,
                    },
                    None => false,
                })
            }
            LogicOperator::InList {
                table,
                variable,
                data_type,
                values,
            } => {
                let raw = data.get_singular_value(table, variable)?;
                Ok(match raw.and_then(|r| data_type.cast(r)) {
                    Some(casted) => values.contains(&casted),
                    None => false,
                })
            }
            LogicOperator::Negated(inner) => Ok(!inner.evaluate(data)?),
            LogicOperator::And(subs) => {
                for sub in subs {
                    if !sub.evaluate(data)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            LogicOperator::Or(subs) => {
                for sub in subs {
                    if sub.evaluate(data)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            LogicOperator::Aggregator {
                table,
                variable,
                value,
                data_type,
                aggregator,
                compare,
            } => {
                let agg = data
                    .aggregated_data
                    .get_variable_aggregation(table, variable, *data_type, *aggregator)?;
                Ok(match (compare, agg) {
                    (CompareOperator::String(op), AggregatedValue::Text(Some(text))) => match op {
                        StringOperatorType::Equals => text == &value.to_raw_string(),
                        StringOperatorType::Contains => text.contains(&value.to_raw_string()),
                        StringOperatorType::UnequalTo => text != &value.to_raw_string(),
                    },
                    (CompareOperator::Metric(op), AggregatedValue::Count(n)) => match value.as_f64() {
                        Some(rhs) => op.holds(*n as f64, rhs),
                        None => false,
                    },
                    (CompareOperator::Metric(op), AggregatedValue::Numeric(Some(n))) => match value.as_f64() {
                        Some(rhs) => op.holds(*n, rhs),
                        None => false,
                    },
                    _ => false,
                })
            }
        }
    }

    /// The source tables and variables this predicate needs resolved to evaluate.
    pub fn get_required_data(&self) -> RequiredData {
        match self {
            LogicOperator::AlwaysTrue => RequiredData::new(),
            LogicOperator::String { table, variable, .. }
            | LogicOperator::Metric { table, variable, .. }
            | LogicOperator::InList { table, variable, .. } => {
                let mut out = RequiredData::new();
                out.insert(table.clone(), vec![(variable.clone(), None)]);
                out
            }
            LogicOperator::Negated(inner) => inner.get_required_data(),
            LogicOperator::And(subs) | LogicOperator::Or(subs) => {
                let mut out = RequiredData::new();
                for sub in subs {
                    merge_required(&mut out, sub.get_required_data());
                }
                out
            }
            LogicOperator::Aggregator {
                table,
                variable,
                data_type,
                aggregator,
                ..
            } => {
                let mut out = RequiredData::new();
                out.insert(
                    table.clone(),
                    vec![(variable.clone(), Some((*aggregator, *data_type)))],
                );
                out
            }
        }
    }
}

impl fmt::Display for LogicOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicOperator::AlwaysTrue => write!(f, "(TRUE)"),
            LogicOperator::String {
                table,
                variable,
                value,
                compare,
            } => write!(
                f,
                "(VARIABLE {variable} OF TYPE String IN TABLE {table} {} \"{value}\")",
                compare.as_str()
            ),
            LogicOperator::Metric {
                table,
                variable,
                value,
                data_type,
                compare,
            } => write!(
                f,
                "(VARIABLE {variable} OF TYPE {data_type} IN TABLE {table} {} {})",
                compare.as_str(),
                value.to_raw_string()
            ),
            LogicOperator::InList {
                table,
                variable,
                data_type,
                values,
            } => {
                let items = values
                    .iter()
                    .map(|v| quote_if_whitespace(&v.to_raw_string()))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(
                    f,
                    "(VARIABLE {variable} OF TYPE {data_type} IN TABLE {table} IN [{items}])"
                )
            }
            LogicOperator::Negated(inner) => write!(f, "(NOT {inner})"),
            LogicOperator::And(subs) => {
                let joined = subs
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(" AND ");
                write!(f, "({joined})")
            }
            LogicOperator::Or(subs) => {
                let joined = subs
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(" OR ");
                write!(f, "({joined})")
            }
            LogicOperator::Aggregator {
                table,
                variable,
                value,
                data_type,
                aggregator,
                compare,
            } => {
                let value_str = match compare {
                    CompareOperator::String(_) => format!("\"{value}\""),
                    CompareOperator::Metric(_) => value.to_raw_string(),
                };
                write!(
                    f,
                    "(AGGREGATE {} VARIABLE {variable} OF TYPE {data_type} IN TABLE {table} {} {value_str})",
                    aggregator.as_str(),
                    compare.as_str()
                )
            }
        }
    }
}
