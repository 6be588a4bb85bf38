//! Graph translation (§4.6, §4.9): turning raw tabular rows into a Key/Attribute/
//! AttributeBin node graph linked by `HAS_ATTR_VAL`, `CONNECTED_TO` and `ASSIGNED_BIN`
//! edges, written out through a [`GraphSink`].

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::cancel::CancellationToken;
use crate::error::{CoreError, CoreResult};
use crate::generator::quantile;
use crate::io::{GraphEdgeRecord, GraphNodeRecord, GraphSink, RawRow, RowSource};
use crate::types::{Binning, MetaData, Value, VariableType};

pub(crate) const HAS_ATTR_VAL: &str = "HAS_ATTR_VAL";
pub(crate) const CONNECTED_TO: &str = "CONNECTED_TO";
pub(crate) const ASSIGNED_BIN: &str = "ASSIGNED_BIN";

/// The three bins a binned metric value can fall into (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum BinLabel {
    Low,
    Normal,
    High,
}

impl BinLabel {
    fn as_str(self) -> &'static str {
        match self {
            BinLabel::Low => "low",
            BinLabel::Normal => "normal",
            BinLabel::High => "high",
        }
    }

    fn classify(value: f64, lo: f64, hi: f64) -> Self {
        if value < lo {
            BinLabel::Low
        } else if value > hi {
            BinLabel::High
        } else {
            BinLabel::Normal
        }
    }
}

fn format_range(lo: f64, hi: f64) -> String {
    format!("{};{}", Value::Dec(lo).to_raw_string(), Value::Dec(hi).to_raw_string())
}

/// Central 60% of a variable's numeric values, used when [`Binning`] leaves `ref_low` or
/// `ref_high` unset (§4.9).
fn auto_bin_range(values: &[f64]) -> (f64, f64) {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    (quantile(&sorted, 0.2), quantile(&sorted, 0.8))
}

fn effective_bin_range(binning: &Binning, values: &[f64]) -> Option<(f64, f64)> {
    match (binning.ref_low, binning.ref_high) {
        (Some(lo), Some(hi)) => Some((lo, hi)),
        _ if values.is_empty() => None,
        _ => Some(auto_bin_range(values)),
    }
}

/// One materialized source row plus the graph node id allocated for its Key node.
struct RowEntry {
    row: RawRow,
    key_node_id: String,
}

fn collect_rows(source: &dyn RowSource, table: &str) -> CoreResult<Vec<RawRow>> {
    let mut rows = Vec::new();
    source.for_each_row(table, &mut |row| {
        rows.push(row.clone());
        Ok(())
    })?;
    Ok(rows)
}

/// Translates a relational dataset into an attribute-association graph (§4.9), driven
/// by the schema's [`MetaData`].
pub struct GraphTranslator<'a> {
    meta: &'a MetaData,
}

impl<'a> GraphTranslator<'a> {
    pub fn new(meta: &'a MetaData) -> Self {
        Self { meta }
    }

    /// Runs the full translation and writes every node and edge to `sink`.
    pub fn translate(&self, source: &dyn RowSource, sink: &mut dyn GraphSink, cancel: &CancellationToken) -> CoreResult<()> {
        let mut next_id: u64 = 0;
        let mut alloc_id = move || {
            let id = next_id;
            next_id += 1;
            format!("n{id}")
        };

        let mut table_rows: IndexMap<String, Vec<RowEntry>> = IndexMap::new();
        let mut key_index: HashMap<(String, String), String> = HashMap::new();

        for table in self.meta.table_names() {
            let info = self.meta.table(table).ok_or_else(|| {
                CoreError::schema_unscoped(format!("table {table:?} not found in metadata"))
            })?;
            let rows = collect_rows(source, table)?;
            let mut entries = Vec::with_capacity(rows.len());
            for row in rows {
                cancel.check()?;
                let key_node_id = alloc_id();
                let mut properties = IndexMap::new();
                if let Some(pk_var) = &info.primary_key {
                    if let Some(pk_value) = row.get(pk_var) {
                        properties.insert(pk_var.clone(), pk_value.clone());
                        key_index
                            .entry((table.to_string(), pk_value.clone()))
                            .or_insert_with(|| key_node_id.clone());
                    }
                }
                sink.write_node(GraphNodeRecord {
                    id: key_node_id.clone(),
                    labels: vec![table.to_string(), "Key".to_string()],
                    properties,
                })?;
                entries.push(RowEntry { row, key_node_id });
            }
            table_rows.insert(table.to_string(), entries);
        }

        let bin_ranges = self.compute_bin_ranges(&table_rows);

        let mut attr_index: HashMap<(String, String, Value), String> = HashMap::new();
        let mut bin_index: HashMap<(String, String, BinLabel), String> = HashMap::new();

        for (table, entries) in &table_rows {
            let info = self.meta.table(table).ok_or_else(|| {
                CoreError::schema_unscoped(format!("table {table:?} not found in metadata"))
            })?;
            for entry in entries {
                cancel.check()?;
                for (variable, var_info) in &info.variables {
                    if Some(variable.as_str()) == info.primary_key.as_deref() {
                        continue;
                    }
                    let Some(raw) = entry.row.get(variable) else {
                        continue;
                    };
                    if raw.is_empty() {
                        continue;
                    }
                    let Some(value) = var_info.cast(raw) else {
                        continue;
                    };

                    // A foreign key variable links two Key nodes directly; it never gets its
                    // own Attribute node (§4.9).
                    if var_info.variable_type == VariableType::ForeignKey {
                        if let Some(referenced_table) = info.foreign_keys.get(variable) {
                            match key_index.get(&(referenced_table.clone(), raw.clone())) {
                                Some(target_node) => {
                                    sink.write_edge(GraphEdgeRecord {
                                        source_id: entry.key_node_id.clone(),
                                        target_id: target_node.clone(),
                                        edge_type: CONNECTED_TO.to_string(),
                                        properties: IndexMap::new(),
                                    })?;
                                }
                                None => {
                                    #[cfg(feature = "tracing")]
                                    tracing::warn!(
                                        table = %table,
                                        variable = %variable,
                                        value = %raw,
                                        referenced_table = %referenced_table,
                                        "foreign key references a row that does not exist, skipping CONNECTED_TO edge"
                                    );
                                }
                            }
                        }
                        continue;
                    }

                    let attr_key = (table.clone(), variable.clone(), value.clone());
                    let attr_node_id = match attr_index.get(&attr_key) {
                        Some(id) => id.clone(),
                        None => {
                            let id = alloc_id();
                            let mut properties = IndexMap::new();
                            properties.insert("name".to_string(), variable.clone());
                            properties.insert("value".to_string(), value.to_raw_string());
                            sink.write_node(GraphNodeRecord {
                                id: id.clone(),
                                labels: vec![table.clone(), "Attribute".to_string()],
                                properties,
                            })?;
                            attr_index.insert(attr_key, id.clone());
                            id
                        }
                    };
                    sink.write_edge(GraphEdgeRecord {
                        source_id: entry.key_node_id.clone(),
                        target_id: attr_node_id.clone(),
                        edge_type: HAS_ATTR_VAL.to_string(),
                        properties: IndexMap::new(),
                    })?;

                    if var_info.variable_type == VariableType::Metric {
                        if let Some(binning) = &var_info.binning {
                            if binning.should_bin && !binning.exclude_from_binning.iter().any(|v| v == raw) {
                                if let Some(num) = value.as_f64() {
                                    if let Some((lo, hi)) = bin_ranges.get(&(table.clone(), variable.clone())) {
                                        let label = BinLabel::classify(num, *lo, *hi);
                                        let bin_key = (table.clone(), variable.clone(), label);
                                        let bin_node_id = match bin_index.get(&bin_key) {
                                            Some(id) => id.clone(),
                                            None => {
                                                let id = alloc_id();
                                                let mut properties = IndexMap::new();
                                                properties.insert("name".to_string(), variable.clone());
                                                properties.insert("value".to_string(), label.as_str().to_string());
                                                properties.insert("refRange".to_string(), format_range(*lo, *hi));
                                                sink.write_node(GraphNodeRecord {
                                                    id: id.clone(),
                                                    labels: vec![table.clone(), "AttributeBin".to_string()],
                                                    properties,
                                                })?;
                                                bin_index.insert(bin_key, id.clone());
                                                id
                                            }
                                        };
                                        sink.write_edge(GraphEdgeRecord {
                                            source_id: attr_node_id,
                                            target_id: bin_node_id,
                                            edge_type: ASSIGNED_BIN.to_string(),
                                            properties: IndexMap::new(),
                                        })?;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Resolves the effective `(lo, hi)` bin range for every binned metric variable,
    /// falling back to the central 60% of its observed values (§4.9) when `ref_low` or
    /// `ref_high` is unset.
    fn compute_bin_ranges(&self, table_rows: &IndexMap<String, Vec<RowEntry>>) -> HashMap<(String, String), (f64, f64)> {
        let mut ranges = HashMap::new();
        for (table, info) in &self.meta.tables {
            for (variable, var_info) in &info.variables {
                if var_info.variable_type != VariableType::Metric {
                    continue;
                }
                let Some(binning) = &var_info.binning else { continue };
                if !binning.should_bin {
                    continue;
                }
                let values: Vec<f64> = table_rows
                    .get(table)
                    .into_iter()
                    .flatten()
                    .filter_map(|entry| entry.row.get(variable))
                    .filter_map(|raw| var_info.cast(raw))
                    .filter_map(|v| v.as_f64())
                    .collect();
                if let Some(range) = effective_bin_range(binning, &values) {
                    ranges.insert((table.clone(), variable.clone()), range);
                }
            }
        }
        ranges
    }
}
