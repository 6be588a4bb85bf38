//! The transformer (§4.8): executes a [`DataMapping`] against a [`RowSource`], producing
//! one target row per source row-family and writing it to a [`RowSink`].

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::aggregate::AggregatorType;
use crate::cancel::CancellationToken;
use crate::error::{CoreError, CoreResult};
use crate::io::{RawRow, RowSink, RowSource};
use crate::logic::RequiredData;
use crate::mapping::{DataMapping, TableMapping, TableMappingKind};
use crate::sourcedata::{AggregatedValue, SourceDataLine};
use crate::types::{DataType, MetaData, Value};

/// Indexes every source table's rows by primary key and by each declared foreign key, so
/// the transformer can resolve ancestor lookups and descendant groupings without
/// rescanning tables for every target row.
struct SourceIndex {
    tables: HashMap<String, Vec<RawRow>>,
    by_pk: HashMap<String, HashMap<String, usize>>,
    by_fk: HashMap<(String, String), HashMap<String, Vec<usize>>>,
}

impl SourceIndex {
    fn build(source: &dyn RowSource, meta: &MetaData) -> CoreResult<Self> {
        let mut tables: HashMap<String, Vec<RawRow>> = HashMap::new();
        for name in source.table_names() {
            let mut rows = Vec::new();
            source.for_each_row(&name, &mut |row| {
                rows.push(row.clone());
                Ok(())
            })?;
            tables.insert(name, rows);
        }

        let mut by_pk: HashMap<String, HashMap<String, usize>> = HashMap::new();
        let mut by_fk: HashMap<(String, String), HashMap<String, Vec<usize>>> = HashMap::new();
        for (name, info) in &meta.tables {
            if let Some(pk) = &info.primary_key {
                let mut idx = HashMap::new();
                if let Some(rows) = tables.get(name) {
                    for (i, row) in rows.iter().enumerate() {
                        if let Some(v) = row.get(pk) {
                            idx.entry(v.clone()).or_insert(i);
                        }
                    }
                }
                by_pk.insert(name.clone(), idx);
            }
            for fk_var in info.foreign_keys.keys() {
                let mut idx: HashMap<String, Vec<usize>> = HashMap::new();
                if let Some(rows) = tables.get(name) {
                    for (i, row) in rows.iter().enumerate() {
                        if let Some(v) = row.get(fk_var) {
                            idx.entry(v.clone()).or_default().push(i);
                        }
                    }
                }
                by_fk.insert((name.clone(), fk_var.clone()), idx);
            }
        }

        Ok(Self { tables, by_pk, by_fk })
    }

    fn rows(&self, table: &str) -> &[RawRow] {
        self.tables.get(table).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn row_by_pk(&self, table: &str, pk_value: &str) -> Option<&RawRow> {
        let idx = *self.by_pk.get(table)?.get(pk_value)?;
        self.tables.get(table)?.get(idx)
    }

    /// Walks up the foreign-key chain from `(table, row)` to find the single row of
    /// `target_table` it descends from, if any.
    fn resolve_ancestor<'a>(&'a self, meta: &MetaData, table: &str, row: &'a RawRow, target_table: &str) -> Option<&'a RawRow> {
        if table == target_table {
            return Some(row);
        }
        let info = meta.table(table)?;
        for (fk_var, referenced) in &info.foreign_keys {
            if let Some(fk_val) = row.get(fk_var) {
                if let Some(next) = self.row_by_pk(referenced, fk_val) {
                    if let Some(found) = self.resolve_ancestor(meta, referenced, next, target_table) {
                        return Some(found);
                    }
                }
            }
        }
        None
    }

    /// Collects every row of `target_table` reachable by following foreign keys down
    /// from `(anchor_table, anchor_pk_value)`, at any depth.
    fn collect_descendants<'a>(
        &'a self,
        meta: &MetaData,
        anchor_table: &str,
        anchor_pk_value: &str,
        target_table: &str,
    ) -> Vec<&'a RawRow> {
        let mut frontier = vec![(anchor_table.to_string(), anchor_pk_value.to_string())];
        let mut result = Vec::new();
        let mut visited: HashSet<(String, String)> = HashSet::new();
        while let Some((table, pk_value)) = frontier.pop() {
            if !visited.insert((table.clone(), pk_value.clone())) {
                continue;
            }
            for (child_name, child_info) in &meta.tables {
                for (fk_var, referenced) in &child_info.foreign_keys {
                    if referenced != &table {
                        continue;
                    }
                    if let Some(rows_idx) = self.by_fk.get(&(child_name.clone(), fk_var.clone())).and_then(|m| m.get(&pk_value)) {
                        for &idx in rows_idx {
                            let row = &self.tables[child_name][idx];
                            if child_name == target_table {
                                result.push(row);
                            }
                            if let Some(child_pk) = meta.primary_key(child_name) {
                                if let Some(v) = row.get(child_pk) {
                                    frontier.push((child_name.clone(), v.clone()));
                                }
                            }
                        }
                    }
                }
            }
        }
        result
    }
}

fn median(values: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

fn std_dev(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

pub(crate) fn compute_aggregation(rows: &[&RawRow], variable: &str, data_type: DataType, aggregator: AggregatorType) -> AggregatedValue {
    let casted: Vec<Value> = rows.iter().filter_map(|r| r.get(variable).and_then(|raw| data_type.cast(raw))).collect();
    match aggregator {
        AggregatorType::Count => AggregatedValue::Count(casted.len() as i64),
        AggregatorType::Concatenate => {
            if casted.is_empty() {
                AggregatedValue::Text(None)
            } else {
                AggregatedValue::Text(Some(
                    casted.iter().map(Value::to_raw_string).collect::<Vec<_>>().join(";"),
                ))
            }
        }
        AggregatorType::List => AggregatedValue::Set(casted.into_iter().collect()),
        numeric_stat => {
            let nums: Vec<f64> = casted.iter().filter_map(Value::as_f64).collect();
            if nums.is_empty() {
                return AggregatedValue::Numeric(None);
            }
            let value = match numeric_stat {
                AggregatorType::Min => nums.iter().cloned().fold(f64::INFINITY, f64::min),
                AggregatorType::Max => nums.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                AggregatorType::Sum => nums.iter().sum(),
                AggregatorType::Mean => nums.iter().sum::<f64>() / nums.len() as f64,
                AggregatorType::Amplitude => {
                    let max = nums.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                    let min = nums.iter().cloned().fold(f64::INFINITY, f64::min);
                    max - min
                }
                AggregatorType::Median => median(&nums),
                AggregatorType::Std => std_dev(&nums),
                _ => unreachable!("numeric_stat match is exhaustive over the non-Count/Concatenate/List variants"),
            };
            AggregatedValue::Numeric(Some(value))
        }
    }
}

/// Executes one [`DataMapping`] against a source and writes the target rows it produces.
pub struct Transformer<'a> {
    mapping: &'a DataMapping,
}

impl<'a> Transformer<'a> {
    pub fn new(mapping: &'a DataMapping) -> Self {
        Self { mapping }
    }

    fn target_table_order(&self) -> CoreResult<Vec<String>> {
        let mut order = Vec::new();
        let mut remaining: Vec<&String> = self.mapping.table_mappings.keys().collect();
        let mut placed: HashSet<String> = HashSet::new();
        while !remaining.is_empty() {
            let mut progressed = false;
            remaining.retain(|table| {
                let ready = match &self.mapping.table_mappings[*table].kind {
                    TableMappingKind::Inherited { from_target_table } => placed.contains(from_target_table),
                    _ => true,
                };
                if ready {
                    order.push((*table).clone());
                    placed.insert((*table).clone());
                    progressed = true;
                }
                !ready
            });
            if !progressed {
                return Err(CoreError::validation_unscoped(
                    "inheritance cycle detected among target table mappings",
                ));
            }
        }
        Ok(order)
    }

    fn build_source_line(
        &self,
        index: &SourceIndex,
        anchor_table: &str,
        anchor_row: &RawRow,
        required: &RequiredData,
    ) -> SourceDataLine {
        let mut line = SourceDataLine::new();
        let anchor_pk_value = self
            .mapping
            .source_meta
            .primary_key(anchor_table)
            .and_then(|pk| anchor_row.get(pk))
            .cloned();

        for (table, variables) in required {
            for (variable, agg) in variables {
                match agg {
                    None => {
                        // A dangling foreign key (no row found at `table`) leaves this
                        // variable absent rather than synthesizing an empty cell: it is a
                        // data integrity problem, not an ordinary missing/uncastable value.
                        if let Some(row) = index.resolve_ancestor(&self.mapping.source_meta, anchor_table, anchor_row, table) {
                            let entry = line.rows.entry(table.clone()).or_default();
                            if let Some(v) = row.get(variable) {
                                entry.insert(variable.clone(), v.clone());
                            }
                        }
                    }
                    Some((aggregator, data_type)) => {
                        if let Some(pk_value) = &anchor_pk_value {
                            let rows = index.collect_descendants(&self.mapping.source_meta, anchor_table, pk_value, table);
                            let value = compute_aggregation(&rows, variable, *data_type, *aggregator);
                            line.aggregated_data.set(table.clone(), variable.clone(), *data_type, *aggregator, value);
                        }
                    }
                }
            }
        }
        line
    }

    fn required_data_for(&self, target_table: &str, table_mapping: &TableMapping) -> RequiredData {
        let mut out: RequiredData = IndexMap::new();
        let mut merge_in = |required: RequiredData| {
            for (table, vars) in required {
                let entry = out.entry(table).or_default();
                for v in vars {
                    if !entry.contains(&v) {
                        entry.push(v);
                    }
                }
            }
        };
        merge_in(table_mapping.condition.get_required_data());
        if let Some(vars) = self.mapping.variable_mappings.get(target_table) {
            for var_mapping in vars.values() {
                for case in &var_mapping.cases {
                    merge_in(case.conditional.get_required_data());
                    merge_in(case.conclusion.get_required_data());
                }
            }
        }
        out
    }

    /// Applies every variable mapping of `target_table` to `line`, returning the raw
    /// cell strings for every non-primary-key target variable (missing cells as `""`).
    fn build_target_cells(&self, target_table: &str, line: &SourceDataLine) -> CoreResult<IndexMap<String, String>> {
        let mut cells = IndexMap::new();
        if let Some(vars) = self.mapping.variable_mappings.get(target_table) {
            for (variable, var_mapping) in vars {
                let mut value = None;
                for case in &var_mapping.cases {
                    if case.conditional.evaluate(line)? {
                        value = case.conclusion.get_return(line)?;
                        break;
                    }
                }
                cells.insert(variable.clone(), value.map(|v| v.to_raw_string()).unwrap_or_default());
            }
        }
        Ok(cells)
    }

    /// Runs the full mapping against `source`, writing every target table's rows to
    /// `sink` in target-table dependency order. `cancel` is checked at every target
    /// table boundary and at every row boundary within a table (§5).
    pub fn transform_to_target(&self, source: &dyn RowSource, sink: &mut dyn RowSink, cancel: &CancellationToken) -> CoreResult<()> {
        let index = SourceIndex::build(source, &self.mapping.source_meta)?;
        let order = self.target_table_order()?;
        // Each produced target row's allocated PK value, alongside the source line it was
        // built from: `Inherited` children reuse both when joining to their parent.
        let mut produced: HashMap<String, Vec<(String, SourceDataLine)>> = HashMap::new();

        for target_table in &order {
            cancel.check()?;
            let table_mapping = self.mapping.table_mappings.get(target_table).ok_or_else(|| {
                CoreError::schema(target_table.clone(), "target table has no assigned table mapping")
            })?;
            let pk_name = self
                .mapping
                .target_meta
                .primary_key(target_table)
                .ok_or_else(|| CoreError::schema(target_table.clone(), "target table has no primary key"))?
                .to_string();
            let required = self.required_data_for(target_table, table_mapping);

            // `parent_pk` carries the inherited-from row's already-allocated PK so it can
            // be written into this table's synthesized inheritance foreign key; `None` for
            // every other table-mapping kind.
            let candidate_lines: Vec<(Option<String>, Option<String>, SourceDataLine)> = match &table_mapping.kind {
                TableMappingKind::OneToOne { source_table } => {
                    let pk_var = self.mapping.source_meta.primary_key(source_table);
                    index
                        .rows(source_table)
                        .iter()
                        .map(|row| {
                            let pk_value = pk_var.and_then(|pk| row.get(pk)).cloned();
                            (pk_value, None, self.build_source_line(&index, source_table, row, &required))
                        })
                        .collect()
                }
                TableMappingKind::Merge { source_tables } => {
                    let mut pk_values = Vec::new();
                    let mut seen = HashSet::new();
                    for table in source_tables {
                        if let Some(pk_var) = self.mapping.source_meta.primary_key(table) {
                            for row in index.rows(table) {
                                if let Some(v) = row.get(pk_var) {
                                    if seen.insert(v.clone()) {
                                        pk_values.push(v.clone());
                                    }
                                }
                            }
                        }
                    }
                    pk_values
                        .into_iter()
                        .map(|pk_value| {
                            let mut merged = SourceDataLine::new();
                            for table in source_tables {
                                if let Some(row) = index.row_by_pk(table, &pk_value) {
                                    let line = self.build_source_line(&index, table, row, &required);
                                    for (t, vars) in line.rows {
                                        merged.rows.entry(t).or_default().extend(vars);
                                    }
                                    merged.aggregated_data = merged.aggregated_data.merge(&line.aggregated_data)?;
                                }
                            }
                            Ok((Some(pk_value), None, merged))
                        })
                        .collect::<CoreResult<Vec<_>>>()?
                }
                TableMappingKind::Concatenate { source_tables } => {
                    let mut lines = Vec::new();
                    for table in source_tables {
                        for row in index.rows(table) {
                            lines.push((None, None, self.build_source_line(&index, table, row, &required)));
                        }
                    }
                    lines
                }
                TableMappingKind::Inherited { from_target_table } => produced
                    .get(from_target_table)
                    .cloned()
                    .ok_or_else(|| CoreError::schema(target_table.clone(), "inherited-from target table not yet produced"))?
                    .into_iter()
                    .map(|(parent_pk, line)| (None, Some(parent_pk), line))
                    .collect(),
            };

            let inheritance_fk = self.mapping.target_meta.foreign_keys(target_table).and_then(|fks| {
                fks.iter().find_map(|(var, referenced)| {
                    if let TableMappingKind::Inherited { from_target_table } = &table_mapping.kind {
                        (referenced == from_target_table).then(|| var.clone())
                    } else {
                        None
                    }
                })
            });

            let mut next_pk: i64 = 0;
            let mut out_lines = Vec::new();
            for (pk_value, parent_pk, line) in candidate_lines {
                cancel.check()?;
                if table_mapping.condition.evaluate(&line)? {
                    out_lines.push((pk_value, parent_pk, line));
                }
            }

            let mut produced_here = Vec::with_capacity(out_lines.len());
            for (pk_value, parent_pk, line) in out_lines {
                let pk_value = pk_value.unwrap_or_else(|| {
                    let v = next_pk.to_string();
                    next_pk += 1;
                    v
                });
                let mut cells = self.build_target_cells(target_table, &line)?;
                if let (Some(fk_var), Some(parent_pk)) = (&inheritance_fk, &parent_pk) {
                    cells.insert(fk_var.clone(), parent_pk.clone());
                }
                cells.insert(pk_name.clone(), pk_value.clone());
                let mut row = RawRow::new();
                for var in self.mapping.target_meta.table(target_table).unwrap().variables.keys() {
                    if let Some(v) = cells.get(var) {
                        row.insert(var.clone(), v.clone());
                    }
                }
                sink.write_row(target_table, row)?;
                produced_here.push((pk_value, line));
            }

            produced.insert(target_table.clone(), produced_here);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::VecRowSource;
    use crate::logic::LogicOperator;
    use crate::mapping::{DataMapping, MappingCase, TableMapping, VariableMapping};
    use crate::types::{TableInfo, VariableType};

    fn row(pairs: &[(&str, &str)]) -> RawRow {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_concatenate_aggregation_joins_with_semicolon() {
        let rows = vec![row(&[("V", "a")]), row(&[("V", "b")]), row(&[("V", "c")])];
        let refs: Vec<&RawRow> = rows.iter().collect();
        let value = compute_aggregation(&refs, "V", DataType::String, AggregatorType::Concatenate);
        assert_eq!(value, AggregatedValue::Text(Some("a;b;c".into())));
    }

    #[test]
    fn test_std_aggregation_is_population_standard_deviation() {
        let rows = vec![row(&[("V", "0")]), row(&[("V", "0")]), row(&[("V", "0")]), row(&[("V", "4")])];
        let refs: Vec<&RawRow> = rows.iter().collect();
        let value = compute_aggregation(&refs, "V", DataType::Decimal, AggregatorType::Std);
        match value {
            AggregatedValue::Numeric(Some(v)) => assert!((v - (3.0f64).sqrt()).abs() < 1e-9),
            other => panic!("expected numeric std, got {other:?}"),
        }
    }

    fn one_to_one(source_table: &str) -> TableMapping {
        TableMapping::new(TableMappingKind::OneToOne {
            source_table: source_table.to_string(),
        })
    }

    fn copy_case(table: &str, variable: &str, data_type: DataType) -> Vec<MappingCase> {
        vec![MappingCase {
            conditional: LogicOperator::AlwaysTrue,
            conclusion: crate::conclusion::Conclusion::copy(data_type, table, variable),
        }]
    }

    fn patients_and_target() -> (MetaData, MetaData, VecRowSource) {
        let mut source = MetaData::new();
        let mut patients = TableInfo::new("patients");
        let mut pk = crate::types::VariableInfo::new("ID", "patients", DataType::Integer);
        pk.variable_type = VariableType::PrimaryKey;
        patients.primary_key = Some("ID".into());
        patients.variables.insert("ID".into(), pk);
        patients
            .variables
            .insert("NAME".into(), crate::types::VariableInfo::new("NAME", "patients", DataType::String));
        source.insert_table("patients", patients);

        let mut target = MetaData::new();
        let mut subjects = TableInfo::new("subjects");
        let mut spk = crate::types::VariableInfo::new("SUBJECT_ID", "subjects", DataType::Integer);
        spk.variable_type = VariableType::PrimaryKey;
        subjects.primary_key = Some("SUBJECT_ID".into());
        subjects.variables.insert("SUBJECT_ID".into(), spk);
        subjects.variables.insert(
            "NAME".into(),
            crate::types::VariableInfo::new("NAME", "subjects", DataType::String),
        );
        target.insert_table("subjects", subjects);

        let mut rows = VecRowSource::new();
        rows.insert_table(
            "patients",
            vec![row(&[("ID", "1"), ("NAME", "Ada")]), row(&[("ID", "2"), ("NAME", "Bo")])],
        );
        (source, target, rows)
    }

    #[test]
    fn test_one_to_one_copies_pk_and_variable() {
        let (source_meta, target_meta, source) = patients_and_target();
        let mut mapping = DataMapping::new(source_meta, target_meta).unwrap();
        mapping.assign_table_mapping("subjects", one_to_one("patients")).unwrap();
        mapping
            .assign_variable_mapping(VariableMapping::new(
                "subjects",
                "NAME",
                copy_case("patients", "NAME", DataType::String),
            ))
            .unwrap();
        mapping.check_completeness().unwrap();

        let mut sink = VecRowSource::new();
        Transformer::new(&mapping)
            .transform_to_target(&source, &mut sink, &CancellationToken::new())
            .unwrap();

        let out = &sink.tables["subjects"];
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["SUBJECT_ID"], "1");
        assert_eq!(out[0]["NAME"], "Ada");
        assert_eq!(out[1]["SUBJECT_ID"], "2");
        assert_eq!(out[1]["NAME"], "Bo");
    }

    #[test]
    fn test_table_mapping_condition_filters_rows() {
        let (source_meta, target_meta, source) = patients_and_target();
        let mut mapping = DataMapping::new(source_meta, target_meta).unwrap();
        mapping
            .assign_table_mapping(
                "subjects",
                TableMapping::with_condition(
                    TableMappingKind::OneToOne {
                        source_table: "patients".into(),
                    },
                    LogicOperator::String {
                        table: "patients".into(),
                        variable: "NAME".into(),
                        value: "Ada".into(),
                        compare: crate::logic::StringOperatorType::Equals,
                    },
                ),
            )
            .unwrap();
        mapping
            .assign_variable_mapping(VariableMapping::new(
                "subjects",
                "NAME",
                copy_case("patients", "NAME", DataType::String),
            ))
            .unwrap();
        mapping.check_completeness().unwrap();

        let mut sink = VecRowSource::new();
        Transformer::new(&mapping)
            .transform_to_target(&source, &mut sink, &CancellationToken::new())
            .unwrap();

        let out = &sink.tables["subjects"];
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["NAME"], "Ada");
    }

    fn root_child_source() -> (MetaData, VecRowSource) {
        let mut source = MetaData::new();
        let mut root = TableInfo::new("root");
        let mut root_pk = crate::types::VariableInfo::new("ROOT_ID", "root", DataType::Integer);
        root_pk.variable_type = VariableType::PrimaryKey;
        root.primary_key = Some("ROOT_ID".into());
        root.variables.insert("ROOT_ID".into(), root_pk);
        source.insert_table("root", root);

        let mut child = TableInfo::new("child");
        let mut child_pk = crate::types::VariableInfo::new("CHILD_ID", "child", DataType::Integer);
        child_pk.variable_type = VariableType::PrimaryKey;
        child.primary_key = Some("CHILD_ID".into());
        child.variables.insert("CHILD_ID".into(), child_pk);
        let mut fk = crate::types::VariableInfo::new("ROOT_ID", "child", DataType::Integer);
        fk.variable_type = VariableType::ForeignKey;
        child.foreign_keys.insert("ROOT_ID".into(), "root".into());
        child.variables.insert("ROOT_ID".into(), fk);
        source.insert_table("child", child);

        let mut rows = VecRowSource::new();
        rows.insert_table("root", vec![row(&[("ROOT_ID", "1")]), row(&[("ROOT_ID", "2")])]);
        rows.insert_table(
            "child",
            vec![
                row(&[("CHILD_ID", "10"), ("ROOT_ID", "1")]),
                row(&[("CHILD_ID", "11"), ("ROOT_ID", "1")]),
                row(&[("CHILD_ID", "12"), ("ROOT_ID", "2")]),
            ],
        );
        (source, rows)
    }

    #[test]
    fn test_aggregate_conclusion_counts_descendants() {
        let (source_meta, source) = root_child_source();
        let mut target = MetaData::new();
        let mut counts = TableInfo::new("counts");
        let mut pk = crate::types::VariableInfo::new("PK", "counts", DataType::Integer);
        pk.variable_type = VariableType::PrimaryKey;
        counts.primary_key = Some("PK".into());
        counts.variables.insert("PK".into(), pk);
        counts
            .variables
            .insert("N_CHILDREN".into(), crate::types::VariableInfo::new("N_CHILDREN", "counts", DataType::Integer));
        target.insert_table("counts", counts);

        let mut mapping = DataMapping::new(source_meta, target).unwrap();
        mapping.assign_table_mapping("counts", one_to_one("root")).unwrap();
        mapping
            .assign_variable_mapping(VariableMapping::new(
                "counts",
                "N_CHILDREN",
                vec![MappingCase {
                    conditional: LogicOperator::AlwaysTrue,
                    conclusion: crate::conclusion::Conclusion::aggregate(
                        DataType::Integer,
                        "child",
                        "CHILD_ID",
                        AggregatorType::Count,
                    )
                    .unwrap(),
                }],
            ))
            .unwrap();
        mapping.check_completeness().unwrap();

        let mut sink = VecRowSource::new();
        Transformer::new(&mapping)
            .transform_to_target(&source, &mut sink, &CancellationToken::new())
            .unwrap();

        let out = &sink.tables["counts"];
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["N_CHILDREN"], "2");
        assert_eq!(out[1]["N_CHILDREN"], "1");
    }

    #[test]
    fn test_concatenate_allocates_sequential_pks() {
        let mut source = MetaData::new();
        for name in ["a", "b"] {
            let mut table = TableInfo::new(name);
            let mut pk = crate::types::VariableInfo::new("ID", name, DataType::Integer);
            pk.variable_type = VariableType::PrimaryKey;
            table.primary_key = Some("ID".into());
            table.variables.insert("ID".into(), pk);
            source.insert_table(name, table);
        }

        let mut target = MetaData::new();
        let mut combined = TableInfo::new("combined");
        let mut pk = crate::types::VariableInfo::new("PK", "combined", DataType::Integer);
        pk.variable_type = VariableType::PrimaryKey;
        combined.primary_key = Some("PK".into());
        combined.variables.insert("PK".into(), pk);
        target.insert_table("combined", combined);

        let mut rows = VecRowSource::new();
        rows.insert_table("a", vec![row(&[("ID", "1")]), row(&[("ID", "2")])]);
        rows.insert_table("b", vec![row(&[("ID", "1")])]);

        let mut mapping = DataMapping::new(source, target).unwrap();
        mapping
            .assign_table_mapping(
                "combined",
                TableMapping::new(TableMappingKind::Concatenate {
                    source_tables: vec!["a".into(), "b".into()],
                }),
            )
            .unwrap();
        mapping.check_completeness().unwrap();

        let mut sink = VecRowSource::new();
        Transformer::new(&mapping)
            .transform_to_target(&rows, &mut sink, &CancellationToken::new())
            .unwrap();

        let out = &sink.tables["combined"];
        assert_eq!(out.len(), 3);
        assert_eq!(out[0]["PK"], "0");
        assert_eq!(out[1]["PK"], "1");
        assert_eq!(out[2]["PK"], "2");
    }

    #[test]
    fn test_inherited_table_writes_synthesized_foreign_key() {
        let (source_meta, target_meta_unused, source) = patients_and_target();
        let _ = target_meta_unused;

        let mut target = MetaData::new();
        let mut subjects = TableInfo::new("subjects");
        let mut spk = crate::types::VariableInfo::new("SUBJECT_ID", "subjects", DataType::Integer);
        spk.variable_type = VariableType::PrimaryKey;
        subjects.primary_key = Some("SUBJECT_ID".into());
        subjects.variables.insert("SUBJECT_ID".into(), spk);
        subjects
            .variables
            .insert("NAME".into(), crate::types::VariableInfo::new("NAME", "subjects", DataType::String));
        target.insert_table("subjects", subjects);

        let mut visits = TableInfo::new("visits");
        let mut vpk = crate::types::VariableInfo::new("VISIT_ID", "visits", DataType::Integer);
        vpk.variable_type = VariableType::PrimaryKey;
        visits.primary_key = Some("VISIT_ID".into());
        visits.variables.insert("VISIT_ID".into(), vpk);
        let mut vfk = crate::types::VariableInfo::new("SUBJECT_ID", "visits", DataType::Integer);
        vfk.variable_type = VariableType::ForeignKey;
        visits.foreign_keys.insert("SUBJECT_ID".into(), "subjects".into());
        visits.variables.insert("SUBJECT_ID".into(), vfk);
        target.insert_table("visits", visits);

        let mut mapping = DataMapping::new(source_meta, target).unwrap();
        mapping.assign_table_mapping("subjects", one_to_one("patients")).unwrap();
        mapping
            .assign_variable_mapping(VariableMapping::new(
                "subjects",
                "NAME",
                copy_case("patients", "NAME", DataType::String),
            ))
            .unwrap();
        mapping
            .assign_table_mapping(
                "visits",
                TableMapping::new(TableMappingKind::Inherited {
                    from_target_table: "subjects".into(),
                }),
            )
            .unwrap();
        mapping.check_completeness().unwrap();

        let mut sink = VecRowSource::new();
        Transformer::new(&mapping)
            .transform_to_target(&source, &mut sink, &CancellationToken::new())
            .unwrap();

        let visits_out = &sink.tables["visits"];
        assert_eq!(visits_out.len(), 2);
        assert_eq!(visits_out[0]["VISIT_ID"], "0");
        assert_eq!(visits_out[0]["SUBJECT_ID"], "1");
        assert_eq!(visits_out[1]["VISIT_ID"], "1");
        assert_eq!(visits_out[1]["SUBJECT_ID"], "2");
    }
}
