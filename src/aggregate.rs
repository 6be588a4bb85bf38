//! Aggregators (§4.3): the vocabulary for collapsing many source rows sharing a foreign
//! key into a single statistic, and the compatibility rules between an aggregator, the
//! data type it aggregates, and the comparison operator it is later combined with.

use std::fmt;

use crate::error::{CoreError, CoreResult};
use crate::types::DataType;

/// How a set of same-variable values belonging to one foreign-key group collapses into
/// one comparable value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregatorType {
    Count,
    Min,
    Max,
    Mean,
    Median,
    Std,
    Sum,
    Amplitude,
    Concatenate,
    List,
}

impl AggregatorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregatorType::Count => "COUNT",
            AggregatorType::Min => "MIN",
            AggregatorType::Max => "MAX",
            AggregatorType::Mean => "MEAN",
            AggregatorType::Median => "MEDIAN",
            AggregatorType::Std => "STD",
            AggregatorType::Sum => "SUM",
            AggregatorType::Amplitude => "AMPLITUDE",
            AggregatorType::Concatenate => "CONCATENATE",
            AggregatorType::List => "LIST",
        }
    }

    pub fn from_str_token(s: &str) -> Option<Self> {
        Some(match s {
            "COUNT" => AggregatorType::Count,
            "MIN" => AggregatorType::Min,
            "MAX" => AggregatorType::Max,
            "MEAN" => AggregatorType::Mean,
            "MEDIAN" => AggregatorType::Median,
            "STD" => AggregatorType::Std,
            "SUM" => AggregatorType::Sum,
            "AMPLITUDE" => AggregatorType::Amplitude,
            "CONCATENATE" => AggregatorType::Concatenate,
            "LIST" => AggregatorType::List,
            _ => return None,
        })
    }

    /// Numeric aggregators that reduce a group of values to a single statistic.
    fn numeric_stat() -> &'static [AggregatorType] {
        &[
            AggregatorType::Min,
            AggregatorType::Max,
            AggregatorType::Mean,
            AggregatorType::Median,
            AggregatorType::Std,
            AggregatorType::Sum,
            AggregatorType::Amplitude,
        ]
    }

    /// The data type an aggregation of this kind produces, regardless of the source
    /// variable's own type: counts are always Integer, numeric stats always collapse to
    /// Decimal (mean, std and median are rarely whole numbers even over integer input),
    /// and concatenation always produces String.
    pub fn result_data_type(&self) -> Option<DataType> {
        match self {
            AggregatorType::Count => Some(DataType::Integer),
            AggregatorType::Concatenate => Some(DataType::String),
            t if Self::numeric_stat().contains(t) => Some(DataType::Decimal),
            AggregatorType::List => None,
        }
    }

    /// The aggregator types valid for aggregating a variable of `data_type`.
    ///
    /// `allow_list` controls whether `List` (return every raw value as a set, used by
    /// conditionals but not by conclusions) is included in the allowed set.
    pub fn valid_for(data_type: DataType, allow_list: bool) -> Vec<AggregatorType> {
        let mut out = match data_type {
            DataType::String => vec![AggregatorType::Concatenate, AggregatorType::Count],
            DataType::Integer | DataType::Decimal => {
                let mut v = vec![AggregatorType::Count];
                v.extend_from_slice(Self::numeric_stat());
                v
            }
        };
        if allow_list {
            out.push(AggregatorType::List);
        }
        out
    }

    /// Checks that `self` may be used to aggregate a variable of `data_type`, returning
    /// the exact error text used throughout the mapping engine when it may not.
    pub fn check_compatibility(
        table: &str,
        variable: &str,
        data_type: DataType,
        aggregator: AggregatorType,
        allow_list: bool,
    ) -> CoreResult<()> {
        let valid = Self::valid_for(data_type, allow_list);
        if valid.contains(&aggregator) {
            return Ok(());
        }
        let kind = match data_type {
            DataType::String => "string",
            DataType::Integer | DataType::Decimal => "numeric",
        };
        let options = valid
            .iter()
            .map(|a| format!("\"{}\"", a.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        Err(CoreError::validation(
            table,
            format!(
                "the aggregator type \"{}\" is invalid for {kind} value aggregation of variable \"{variable}\". possible aggregator types are: {options}",
                aggregator.as_str()
            ),
        ))
    }
}

impl fmt::Display for AggregatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
