//! Data mapping (§4.8): declares how each target table and variable is populated from
//! one or more source tables, and validates that declaration against both metadata
//! models before a [`crate::transform`] transformer is allowed to run it.

use indexmap::IndexMap;

use crate::conclusion::Conclusion;
use crate::error::{CoreError, CoreResult};
use crate::lattice::TableLattice;
use crate::logic::LogicOperator;
use crate::types::MetaData;

/// How a target table's rows correspond to source rows (§4.8).
#[derive(Debug, Clone, PartialEq)]
pub enum TableMappingKind {
    /// Target rows are in bijection with rows of `source_table`.
    OneToOne { source_table: String },
    /// A target row for primary key `k` joins the first row with `pk=k` across each
    /// source table. A source table missing `k` contributes no singular values.
    Merge { source_tables: Vec<String> },
    /// Source tables are processed sequentially; every source row becomes one target
    /// row. The target primary key is a freshly allocated 0-based integer.
    Concatenate { source_tables: Vec<String> },
    /// This target table shares row identity with `from_target_table`, reachable from
    /// it via a synthesized foreign key; its own primary key is a freshly allocated
    /// 0-based integer unique to this target.
    Inherited { from_target_table: String },
}

/// A target table's table mapping: its correspondence kind plus a row filter applied to
/// every candidate source-data line before any variable mapping runs.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMapping {
    pub kind: TableMappingKind,
    pub condition: LogicOperator,
}

impl TableMapping {
    pub fn new(kind: TableMappingKind) -> Self {
        Self {
            kind,
            condition: LogicOperator::AlwaysTrue,
        }
    }

    pub fn with_condition(kind: TableMappingKind, condition: LogicOperator) -> Self {
        Self { kind, condition }
    }

    pub fn source_tables(&self) -> Vec<String> {
        match &self.kind {
            TableMappingKind::OneToOne { source_table } => vec![source_table.clone()],
            TableMappingKind::Merge { source_tables } | TableMappingKind::Concatenate { source_tables } => {
                source_tables.clone()
            }
            TableMappingKind::Inherited { .. } => Vec::new(),
        }
    }
}

/// One condition/conclusion pair: if `conditional` holds for a source row, `conclusion`
/// produces the target variable's value.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingCase {
    pub conditional: LogicOperator,
    pub conclusion: Conclusion,
}

/// All the cases that populate one target variable, evaluated in order; the first case
/// whose conditional holds wins.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableMapping {
    pub target_table: String,
    pub target_variable: String,
    pub cases: Vec<MappingCase>,
}

impl VariableMapping {
    pub fn new(target_table: impl Into<String>, target_variable: impl Into<String>, cases: Vec<MappingCase>) -> Self {
        Self {
            target_table: target_table.into(),
            target_variable: target_variable.into(),
            cases,
        }
    }
}

/// The full declaration of how a target [`MetaData`] is populated from a source
/// [`MetaData`] (§4.8).
#[derive(Debug, Clone)]
pub struct DataMapping {
    pub source_meta: MetaData,
    pub target_meta: MetaData,
    pub table_mappings: IndexMap<String, TableMapping>,
    pub variable_mappings: IndexMap<String, IndexMap<String, VariableMapping>>,
    source_lattice: TableLattice,
}

impl DataMapping {
    /// Starts a new, empty data mapping. Every target table must already have a primary
    /// key assigned in `target_meta`.
    pub fn new(source_meta: MetaData, target_meta: MetaData) -> CoreResult<Self> {
        source_meta.validate()?;
        target_meta.validate()?;
        for (name, table) in &target_meta.tables {
            if table.primary_key.is_none() {
                return Err(CoreError::validation(
                    name.clone(),
                    format!("target table {name:?} has no assigned primary key"),
                ));
            }
        }
        let source_lattice = TableLattice::build(&source_meta);
        Ok(Self {
            source_meta,
            target_meta,
            table_mappings: IndexMap::new(),
            variable_mappings: IndexMap::new(),
            source_lattice,
        })
    }

    /// Reconstructs a data mapping from its parts (as persisted to JSON, §6),
    /// revalidating every cross-reference between the two metadata models and the
    /// mapping dictionaries.
    pub fn from_parts(
        source_meta: MetaData,
        target_meta: MetaData,
        table_mappings: IndexMap<String, TableMapping>,
        variable_mappings: IndexMap<String, IndexMap<String, VariableMapping>>,
    ) -> CoreResult<Self> {
        let mut mapping = Self::new(source_meta, target_meta)?;
        for (target_table, table_mapping) in table_mappings {
            mapping.assign_table_mapping(&target_table, table_mapping)?;
        }
        for (target_table, variables) in variable_mappings {
            for (target_variable, var_mapping) in variables {
                if var_mapping.target_table != target_table {
                    return Err(CoreError::validation(
                        target_table.clone(),
                        format!(
                            "mismatch in target table {target_table:?} in variable mapping dict and {:?} in variable mapping",
                            var_mapping.target_table
                        ),
                    ));
                }
                if var_mapping.target_variable != target_variable {
                    return Err(CoreError::validation(
                        target_table.clone(),
                        format!(
                            "mismatch in target variable {target_variable:?} of target table {target_table:?} in variable mapping dict and {:?} in variable mapping",
                            var_mapping.target_variable
                        ),
                    ));
                }
                mapping.assign_variable_mapping(var_mapping)?;
            }
        }
        mapping.check_completeness()?;
        Ok(mapping)
    }

    /// Declares how `target_table`'s rows relate to the source dataset.
    pub fn assign_table_mapping(&mut self, target_table: &str, table_mapping: TableMapping) -> CoreResult<()> {
        match &table_mapping.kind {
            TableMappingKind::Inherited { from_target_table } => {
                if !self.table_mappings.contains_key(from_target_table) {
                    return Err(CoreError::validation(
                        target_table,
                        format!(
                            "target table {target_table:?} was marked for inheriting from table {from_target_table:?}, but this table has no assigned table mapping yet"
                        ),
                    ));
                }
            }
            TableMappingKind::OneToOne { .. } | TableMappingKind::Merge { .. } | TableMappingKind::Concatenate { .. } => {
                for source_table in table_mapping.source_tables() {
                    if self.source_meta.table(&source_table).is_none() {
                        return Err(CoreError::validation(
                            target_table,
                            format!(
                                "source table {source_table:?} was specified in table mapping of target table {target_table:?}, but does not exist in source metadata"
                            ),
                        ));
                    }
                }
            }
        }
        for table in table_mapping.condition.get_required_data().keys() {
            if !self.source_table_reachable_via_roots(&table_mapping.source_tables(), table)? {
                return Err(CoreError::validation(
                    target_table,
                    format!(
                        "source table {table:?} used in table mapping condition of target table {target_table:?}, but is not reachable from the declared source tables"
                    ),
                ));
            }
        }
        self.table_mappings.insert(target_table.to_string(), table_mapping);
        Ok(())
    }

    /// Resolves `target_table`'s table mapping to the root set of source tables it
    /// ultimately descends from, following `Inherited` chains.
    fn resolve_source_roots(&self, target_table: &str) -> CoreResult<Vec<String>> {
        let mut current = target_table.to_string();
        loop {
            match self.table_mappings.get(&current) {
                Some(mapping) if !matches!(mapping.kind, TableMappingKind::Inherited { .. }) => {
                    return Ok(mapping.source_tables());
                }
                Some(TableMapping {
                    kind: TableMappingKind::Inherited { from_target_table },
                    ..
                }) => {
                    current = from_target_table.clone();
                }
                _ => {
                    return Err(CoreError::validation(
                        target_table,
                        format!("target table {target_table:?} has no table mapping assigned"),
                    ));
                }
            }
        }
    }

    fn source_table_reachable_via_roots(&self, roots: &[String], source_table: &str) -> CoreResult<bool> {
        if roots.is_empty() {
            return Ok(false);
        }
        let descendants = self.source_lattice.descendants(roots, None, None)?;
        Ok(descendants.contains(source_table))
    }

    /// A source table may back a singular-value comparison (a `Copy`/`FixedReturn`
    /// conclusion, or any non-aggregated operand) for `target_table` only if it sits in
    /// the descendant sub-lattice of the table mapping's source roots and is reached
    /// through exactly one path (not multi-referenced, so it resolves to one scalar).
    fn source_table_usable_for_singular_value(&self, target_table: &str, source_table: &str) -> CoreResult<bool> {
        let roots = self.resolve_source_roots(target_table)?;
        if !self.source_table_reachable_via_roots(&roots, source_table)? {
            return Ok(false);
        }
        let multi = self.source_lattice.multi_referenced_descendants(&roots);
        Ok(!multi.contains(source_table))
    }

    /// Declares how one target variable's value is derived, validating every case's
    /// conclusion against the target table's assigned table mapping.
    pub fn assign_variable_mapping(&mut self, var_mapping: VariableMapping) -> CoreResult<()> {
        let target_table = var_mapping.target_table.clone();
        let target_variable = var_mapping.target_variable.clone();

        if !self.table_mappings.contains_key(&target_table) {
            return Err(CoreError::validation(
                target_table.clone(),
                format!("you have to specify the table mapping for target table {target_table:?} before adding variable mappings"),
            ));
        }

        if self.target_meta.primary_key(&target_table) == Some(target_variable.as_str()) {
            return Err(CoreError::validation(
                target_table.clone(),
                format!(
                    "{target_variable:?} is the primary key of target table {target_table:?}. primary keys have no own variable mapping. their mapping behaviour is defined by the table mapping"
                ),
            ));
        }

        if let Some(TableMapping {
            kind: TableMappingKind::Inherited { from_target_table },
            ..
        }) = self.table_mappings.get(&target_table)
        {
            let info = self.target_meta.table(&target_table).ok_or_else(|| {
                CoreError::validation(target_table.clone(), format!("target table {target_table:?} not found"))
            })?;
            if info.foreign_keys.get(&target_variable).map(String::as_str) == Some(from_target_table.as_str()) {
                return Err(CoreError::validation(
                    target_table.clone(),
                    format!(
                        "{target_variable:?} is the synthesized inheritance foreign key of target table {target_table:?}. it has no own variable mapping"
                    ),
                ));
            }
        }

        let roots = self.resolve_source_roots(&target_table)?;
        for case in &var_mapping.cases {
            for (table, variables) in case.conclusion.get_required_data() {
                for (_, agg) in variables {
                    if agg.is_some() {
                        if !self.source_table_reachable_via_roots(&roots, &table)? {
                            return Err(CoreError::validation(
                                target_table.clone(),
                                format!(
                                    "source table {table:?} used for aggregation in variable mapping of target variable {target_variable:?} in target table {target_table:?}, but is not reachable from the declared table mapping"
                                ),
                            ));
                        }
                    } else if !self.source_table_usable_for_singular_value(&target_table, &table)? {
                        return Err(CoreError::validation(
                            target_table.clone(),
                            format!(
                                "source table {table:?} used for singular value comparison in variable mapping of target variable {target_variable:?} in target table {target_table:?}, but source table data cannot be used for singular value comparison with specified table mapping"
                            ),
                        ));
                    }
                }
            }
        }

        self.variable_mappings
            .entry(target_table)
            .or_default()
            .insert(target_variable, var_mapping);
        Ok(())
    }

    /// Checks that every non-primary-key target variable has a variable mapping, except
    /// the synthesized inheritance foreign key of an `Inherited` table mapping, which is
    /// populated by the transformer itself and must not have one (§4.8).
    pub fn check_completeness(&self) -> CoreResult<()> {
        for (table, info) in &self.target_meta.tables {
            let mapped = self.variable_mappings.get(table);
            let inherited_from = self.table_mappings.get(table).and_then(|m| match &m.kind {
                TableMappingKind::Inherited { from_target_table } => Some(from_target_table.as_str()),
                _ => None,
            });
            for variable in info.variables.keys() {
                if Some(variable.as_str()) == info.primary_key.as_deref() {
                    continue;
                }
                if let Some(from_target_table) = inherited_from {
                    if info.foreign_keys.get(variable).map(String::as_str) == Some(from_target_table) {
                        continue;
                    }
                }
                let has_mapping = mapped.map(|m| m.contains_key(variable)).unwrap_or(false);
                if !has_mapping {
                    return Err(CoreError::validation(
                        table.clone(),
                        format!("target variable {variable:?} of target table {table:?} missing in variable mappings"),
                    ));
                }
            }
        }
        Ok(())
    }
}
