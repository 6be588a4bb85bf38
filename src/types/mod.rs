//! Shared data types: primitive enumerations, value casting, and the metadata model.

mod common;
mod metadata;

pub use common::{DataType, Value, VariableType};
pub use metadata::{
    Binning, DataTypeDistribution, MetaData, Reviewed, TableInfo, ValueDistribution, VariableInfo,
};
