//! Primitive enumerations and the cast-and-compare value type shared by every engine.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// The three data types a cell can be interpreted as (§3.1).
///
/// `Integer` is a subtype of `Decimal` for casting purposes: any integer casts
/// successfully to `Decimal`, but not every decimal casts to `Integer`. Any value is
/// representable as `String`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    String,
    Integer,
    Decimal,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::String => "String",
            DataType::Integer => "Integer",
            DataType::Decimal => "Decimal",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for DataType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "String" => Ok(DataType::String),
            "Integer" => Ok(DataType::Integer),
            "Decimal" => Ok(DataType::Decimal),
            _ => Err(()),
        }
    }
}

impl DataType {
    /// Parses a raw cell string as this data type. Returns `None` on a cast miss,
    /// which callers treat as a missing value rather than an error (§7).
    ///
    /// `"1.0"` does not parse as `Integer` (no trailing fractional tolerance), but does
    /// parse as `Decimal`. Any string parses as `String`.
    pub fn cast(&self, raw: &str) -> Option<Value> {
        match self {
            DataType::String => Some(Value::Str(raw.to_string())),
            DataType::Integer => raw.trim().parse::<i64>().ok().map(Value::Int),
            DataType::Decimal => raw.trim().parse::<f64>().ok().map(Value::Dec),
        }
    }
}

/// A cell value cast to a concrete [`DataType`].
///
/// `Dec` compares and hashes by bit pattern so it can be used as a map key (needed for
/// categorical distributions and graph attribute-node deduplication); this means `NaN`
/// only ever equals another bit-identical `NaN`, which never occurs for values produced
/// by [`DataType::cast`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Str(String),
    Int(i64),
    Dec(f64),
}

impl Value {
    /// Renders the value the way it would appear as a raw cell string.
    pub fn to_raw_string(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Dec(d) => {
                if d.fract() == 0.0 && d.abs() < 1e15 {
                    format!("{d:.1}")
                } else {
                    format!("{d}")
                }
            }
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Str(_) => DataType::String,
            Value::Int(_) => DataType::Integer,
            Value::Dec(_) => DataType::Decimal,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Dec(d) => Some(*d),
            Value::Str(_) => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Dec(a), Value::Dec(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}
impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Value::Str(s) => {
                0u8.hash(state);
                s.hash(state);
            }
            Value::Int(i) => {
                1u8.hash(state);
                i.hash(state);
            }
            Value::Dec(d) => {
                2u8.hash(state);
                d.to_bits().hash(state);
            }
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Dec(a), Value::Dec(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Dec(b)) => (*a as f64).partial_cmp(b),
            (Value::Dec(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_raw_string())
    }
}

/// The role a variable plays within its table (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableType {
    PrimaryKey,
    ForeignKey,
    Categorical,
    Metric,
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VariableType::PrimaryKey => "PrimaryKey",
            VariableType::ForeignKey => "ForeignKey",
            VariableType::Categorical => "Categorical",
            VariableType::Metric => "Metric",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(DataType::Integer, "42", true)]
    #[case(DataType::Integer, "1.0", false)]
    #[case(DataType::Integer, "abc", false)]
    #[case(DataType::Decimal, "1.0", true)]
    #[case(DataType::Decimal, "42", true)]
    #[case(DataType::Decimal, "abc", false)]
    #[case(DataType::String, "anything at all", true)]
    fn test_cast(#[case] dt: DataType, #[case] raw: &str, #[case] expect_some: bool) {
        assert_eq!(dt.cast(raw).is_some(), expect_some);
    }

    #[test]
    fn test_casting_monotonicity() {
        // Property 2: if Integer cast succeeds, Decimal cast succeeds with the same value.
        for raw in ["0", "-5", "1000000"] {
            let as_int = DataType::Integer.cast(raw).unwrap();
            let as_dec = DataType::Decimal.cast(raw).unwrap();
            if let (Value::Int(i), Value::Dec(d)) = (&as_int, &as_dec) {
                assert_eq!(*i as f64, *d);
            } else {
                panic!("unexpected value variants");
            }
        }
    }

    #[test]
    fn test_value_eq_and_hash_for_decimal() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(Value::Dec(1.5));
        assert!(set.contains(&Value::Dec(1.5)));
        assert!(!set.contains(&Value::Dec(1.6)));
    }

    #[test]
    fn test_value_to_raw_string_roundtrip() {
        assert_eq!(Value::Int(42).to_raw_string(), "42");
        assert_eq!(Value::Str("hi".into()).to_raw_string(), "hi");
        assert_eq!(Value::Dec(3.0).to_raw_string(), "3.0");
    }
}
