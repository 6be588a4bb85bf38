//! The metadata model (§3.2–§3.3): tables, variables, distributions, binning and
//! artifacts, plus the JSON round-trip described in §6.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::common::{DataType, Value, VariableType};

/// Tri-state review flag: `Some(true)`/`Some(false)` are explicit reviewer decisions,
/// `None` means unassigned.
pub type Reviewed = Option<bool>;

/// A metric variable's binning configuration (§3.2, §4.9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Binning {
    pub should_bin: bool,
    pub ref_low: Option<f64>,
    pub ref_high: Option<f64>,
    /// Raw cell strings that should never receive an `ASSIGNED_BIN` edge even though
    /// their variable is binned.
    #[serde(default)]
    pub exclude_from_binning: Vec<String>,
}

impl Binning {
    pub fn validate(&self) -> CoreResult<()> {
        if let (Some(lo), Some(hi)) = (self.ref_low, self.ref_high) {
            if lo > hi {
                return Err(CoreError::validation_unscoped(format!(
                    "binning ref_low ({lo}) must be <= ref_high ({hi})"
                )));
            }
        }
        Ok(())
    }
}

/// The fraction of raw cells in a variable's frequency multiset that successfully cast
/// to each [`DataType`]. Fractions sum to 1.0 (barring floating point slop).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataTypeDistribution {
    pub string: f64,
    pub integer: f64,
    pub decimal: f64,
}

impl DataTypeDistribution {
    pub fn dominant(&self) -> DataType {
        if self.integer >= self.decimal && self.integer >= self.string {
            DataType::Integer
        } else if self.decimal >= self.string {
            DataType::Decimal
        } else {
            DataType::String
        }
    }
}

/// The value distribution variants of §3.3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ValueDistribution {
    Metric {
        median: f64,
        q1: f64,
        q3: f64,
        lower_fence: f64,
        upper_fence: f64,
        outliers: Vec<Value>,
        missing_count: usize,
        artifact_count: usize,
    },
    Categorical {
        /// Insertion order matches descending frequency, per §3.3 ("10 most frequent").
        category_counts: IndexMap<String, usize>,
        other_count: usize,
        missing_count: usize,
        artifact_count: usize,
    },
}

/// Per-variable metadata (§3.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub name: String,
    pub table: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub variable_type: VariableType,
    pub data_type: DataType,
    pub description: Option<String>,
    pub default_value: Option<String>,
    pub reviewed: Reviewed,
    pub artifacts: Option<Vec<String>>,
    pub binning: Option<Binning>,
    pub value_distribution: Option<ValueDistribution>,
    pub data_type_distribution: Option<DataTypeDistribution>,
}

impl VariableInfo {
    pub fn new(name: impl Into<String>, table: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            labels: Vec::new(),
            variable_type: VariableType::Categorical,
            data_type,
            description: None,
            default_value: None,
            reviewed: None,
            artifacts: None,
            binning: None,
            value_distribution: None,
            data_type_distribution: None,
        }
    }

    /// Casts a raw string against this variable's declared data type.
    pub fn cast(&self, raw: &str) -> Option<Value> {
        self.data_type.cast(raw)
    }

    /// Checks the invariants of §3.2 that apply to a single variable in isolation.
    pub fn validate(&self) -> CoreResult<()> {
        match self.variable_type {
            VariableType::PrimaryKey => {
                if self.binning.is_some() {
                    return Err(CoreError::validation(
                        self.table.clone(),
                        format!("primary key variable {} must not have binning", self.name),
                    ));
                }
            }
            VariableType::Metric => {
                if self.data_type == DataType::String {
                    return Err(CoreError::validation(
                        self.table.clone(),
                        format!("metric variable {} must not be String", self.name),
                    ));
                }
            }
            VariableType::ForeignKey | VariableType::Categorical => {}
        }

        if let Some(binning) = &self.binning {
            if binning.should_bin && self.data_type == DataType::String {
                return Err(CoreError::validation(
                    self.table.clone(),
                    format!("variable {} cannot be binned as String", self.name),
                ));
            }
            binning.validate()?;
        }

        if let Some(default) = &self.default_value {
            if self.cast(default).is_none() {
                return Err(CoreError::type_mismatch(
                    self.table.clone(),
                    self.name.clone(),
                    format!("default value {default:?} does not cast to {}", self.data_type),
                ));
            }
        }

        Ok(())
    }
}

/// Per-table metadata (§3.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub label: String,
    pub primary_key: Option<String>,
    #[serde(default)]
    pub foreign_keys: IndexMap<String, String>,
    pub variables: IndexMap<String, VariableInfo>,
}

fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl TableInfo {
    pub fn new(table_name: &str) -> Self {
        Self {
            label: table_name.to_string(),
            primary_key: None,
            foreign_keys: IndexMap::new(),
            variables: IndexMap::new(),
        }
    }

    /// Declares `variable` the primary key, demoting any previously-set primary key
    /// variable to [`VariableType::Categorical`]. Errors if `variable` does not exist.
    pub fn change_primary_key(&mut self, variable: &str) -> CoreResult<()> {
        if !self.variables.contains_key(variable) {
            return Err(CoreError::validation(
                self.label.clone(),
                format!("variable {variable:?} not found in table"),
            ));
        }
        if let Some(old_pk) = self.primary_key.clone() {
            if let Some(old) = self.variables.get_mut(&old_pk) {
                old.variable_type = VariableType::Categorical;
            }
        }
        self.primary_key = Some(variable.to_string());
        self.variables.get_mut(variable).unwrap().variable_type = VariableType::PrimaryKey;
        Ok(())
    }

    /// Sets the primary key for the first time. Errors if one is already assigned; use
    /// [`Self::change_primary_key`] to replace an existing choice.
    pub fn assign_primary_key(&mut self, variable: &str) -> CoreResult<()> {
        if self.primary_key.is_some() {
            return Err(CoreError::validation(
                self.label.clone(),
                format!("primary key already set for table {:?}", self.label),
            ));
        }
        self.change_primary_key(variable)
    }

    /// Marks `variable` as a foreign key referencing `referenced_table`'s primary key.
    pub fn add_foreign_key(&mut self, variable: &str, referenced_table: impl Into<String>) -> CoreResult<()> {
        let var_info = self.variables.get_mut(variable).ok_or_else(|| {
            CoreError::validation(self.label.clone(), format!("variable {variable:?} not found in table"))
        })?;
        var_info.variable_type = VariableType::ForeignKey;
        self.foreign_keys.insert(variable.to_string(), referenced_table.into());
        Ok(())
    }

    pub fn validate(&self, table_name: &str) -> CoreResult<()> {
        if !is_valid_label(&self.label) {
            return Err(CoreError::validation(
                table_name,
                format!(
                    "label {:?} must only contain letters, digits, '_' or '-'",
                    self.label
                ),
            ));
        }

        if let Some(pk) = &self.primary_key {
            let pk_info = self.variables.get(pk).ok_or_else(|| {
                CoreError::validation(table_name, format!("primary key {pk} not in variables"))
            })?;
            if pk_info.variable_type != VariableType::PrimaryKey {
                return Err(CoreError::validation(
                    table_name,
                    format!("primary key variable {pk} must have VariableType::PrimaryKey"),
                ));
            }
        }

        for (fk_var, referenced_table) in &self.foreign_keys {
            let fk_info = self.variables.get(fk_var).ok_or_else(|| {
                CoreError::validation(
                    table_name,
                    format!("foreign key {fk_var} -> {referenced_table} not in variables"),
                )
            })?;
            if fk_info.variable_type != VariableType::ForeignKey {
                return Err(CoreError::validation(
                    table_name,
                    format!("foreign key variable {fk_var} must have VariableType::ForeignKey"),
                ));
            }
        }

        for variable in self.variables.values() {
            variable.validate()?;
        }

        Ok(())
    }
}

/// A mapping from table name to [`TableInfo`] (§3.2).
///
/// `MetaData` is mutated only by its owner; every downstream engine receives a shared
/// reference and never mutates it (§3.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MetaData {
    pub tables: IndexMap<String, TableInfo>,
}

impl MetaData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_table(&mut self, name: impl Into<String>, info: TableInfo) {
        self.tables.insert(name.into(), info);
    }

    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.get(name)
    }

    pub fn variable(&self, table: &str, variable: &str) -> Option<&VariableInfo> {
        self.tables.get(table)?.variables.get(variable)
    }

    pub fn variable_mut(&mut self, table: &str, variable: &str) -> Option<&mut VariableInfo> {
        self.tables.get_mut(table)?.variables.get_mut(variable)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut TableInfo> {
        self.tables.get_mut(name)
    }

    pub fn primary_key(&self, table: &str) -> Option<&str> {
        self.tables.get(table)?.primary_key.as_deref()
    }

    pub fn foreign_keys(&self, table: &str) -> Option<&IndexMap<String, String>> {
        self.tables.get(table).map(|t| &t.foreign_keys)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|s| s.as_str())
    }

    /// Validates every table's invariants (§3.2) and that every declared foreign key
    /// references a table that exists, whose primary key exists, and whose data type
    /// matches the foreign key variable's own data type (§4.8).
    pub fn validate(&self) -> CoreResult<()> {
        for (name, table) in &self.tables {
            table.validate(name)?;
            for (fk_var, referenced) in &table.foreign_keys {
                let target = self.tables.get(referenced).ok_or_else(|| {
                    CoreError::validation(
                        name.clone(),
                        format!("foreign key references unknown table {referenced}"),
                    )
                })?;
                let pk = target.primary_key.as_ref().ok_or_else(|| {
                    CoreError::validation(
                        name.clone(),
                        format!("referenced table {referenced} has no primary key"),
                    )
                })?;
                let pk_type = target.variables.get(pk).map(|v| v.data_type);
                let fk_type = table.variables.get(fk_var).map(|v| v.data_type);
                if fk_type.is_some() && fk_type != pk_type {
                    return Err(CoreError::validation(
                        name.clone(),
                        format!(
                            "foreign key {fk_var} ({fk_type:?}) does not match the data type of {referenced}'s primary key {pk} ({pk_type:?})"
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Serializes to the persisted metadata JSON form (§6): a top-level object keyed by
    /// table name, optional fields always present (rendered `null` when unset).
    pub fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string_pretty(&self.tables)
            .map_err(|e| CoreError::schema_unscoped(format!("failed to serialize metadata: {e}")))
    }

    pub fn from_json(json: &str) -> CoreResult<Self> {
        let tables: IndexMap<String, TableInfo> = serde_json::from_str(json)
            .map_err(|e| CoreError::schema_unscoped(format!("failed to parse metadata: {e}")))?;
        Ok(Self { tables })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> MetaData {
        let mut meta = MetaData::new();
        let mut patients = TableInfo::new("patients");
        let mut pk = VariableInfo::new("PATIENT_ID", "patients", DataType::Integer);
        pk.variable_type = VariableType::PrimaryKey;
        patients.primary_key = Some("PATIENT_ID".into());
        patients.variables.insert("PATIENT_ID".into(), pk);

        let mut age = VariableInfo::new("AGE", "patients", DataType::Integer);
        age.variable_type = VariableType::Metric;
        patients.variables.insert("AGE".into(), age);

        meta.insert_table("patients", patients);
        meta
    }

    #[test]
    fn test_validate_passes_for_well_formed_metadata() {
        assert!(sample_meta().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_label() {
        let mut meta = sample_meta();
        meta.tables.get_mut("patients").unwrap().label = "bad label!".into();
        assert!(meta.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_metric_string() {
        let mut meta = sample_meta();
        let age = meta
            .tables
            .get_mut("patients")
            .unwrap()
            .variables
            .get_mut("AGE")
            .unwrap();
        age.data_type = DataType::String;
        assert!(meta.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_primary_key_with_binning() {
        let mut meta = sample_meta();
        let pk = meta
            .tables
            .get_mut("patients")
            .unwrap()
            .variables
            .get_mut("PATIENT_ID")
            .unwrap();
        pk.binning = Some(Binning {
            should_bin: true,
            ..Default::default()
        });
        assert!(meta.validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let meta = sample_meta();
        let json = meta.to_json().unwrap();
        let back = MetaData::from_json(&json).unwrap();
        assert_eq!(meta, back);
    }

    #[test]
    fn test_foreign_key_must_reference_table_with_primary_key() {
        let mut meta = sample_meta();
        let mut visits = TableInfo::new("visits");
        let mut fk = VariableInfo::new("PATIENT_ID", "visits", DataType::Integer);
        fk.variable_type = VariableType::ForeignKey;
        visits.foreign_keys.insert("PATIENT_ID".into(), "patients".into());
        visits.variables.insert("PATIENT_ID".into(), fk);
        meta.insert_table("visits", visits);
        assert!(meta.validate().is_ok());
    }

    #[test]
    fn test_foreign_key_data_type_mismatch_rejected() {
        let mut meta = sample_meta();
        let mut visits = TableInfo::new("visits");
        let mut fk = VariableInfo::new("PATIENT_ID", "visits", DataType::String);
        fk.variable_type = VariableType::ForeignKey;
        visits.foreign_keys.insert("PATIENT_ID".into(), "patients".into());
        visits.variables.insert("PATIENT_ID".into(), fk);
        meta.insert_table("visits", visits);
        assert!(meta.validate().is_err());
    }
}
