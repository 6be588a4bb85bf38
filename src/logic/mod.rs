//! The logical expression language (§4.2): predicates evaluated against joined source
//! rows, used by mapping case conditions and post-aggregation graph filters.

mod operator;
mod parser;

pub use operator::{
    CompareOperator, LogicOperator, MetricOperatorType, RequiredData, RequiredVariable,
    StringOperatorType,
};
pub use parser::parse as parse_logic_operator;
