//! Group membership queries (§4.10): compiling a [`LogicOperator`] condition scoped to a
//! group table into group-membership computation over an already-materialized graph.
//!
//! A specific graph database client is out of scope (§1), so [`GroupSelector`] does not
//! compile its condition into any query language. Instead it validates the condition
//! against the table lattice the way a generated query's `match` chain would imply, then
//! evaluates it directly against a [`GraphSource`] by synthesizing one [`SourceDataLine`]
//! per group-table member and delegating to [`LogicOperator::evaluate`].

use std::collections::{HashSet, VecDeque};

use crate::error::{CoreError, CoreResult};
use crate::graph::{CONNECTED_TO, HAS_ATTR_VAL};
use crate::io::{GraphNodeRecord, GraphSource, RawRow};
use crate::lattice::TableLattice;
use crate::logic::LogicOperator;
use crate::sourcedata::SourceDataLine;
use crate::transform::compute_aggregation;
use crate::types::{DataType, MetaData};

/// Checks the declared data type of one predicate atom against the variable's actual
/// metadata data type.
fn check_data_type(meta: &MetaData, table: &str, variable: &str, declared: DataType) -> CoreResult<()> {
    let info = meta
        .variable(table, variable)
        .ok_or_else(|| CoreError::schema(table.to_string(), format!("variable {variable:?} not found in metadata")))?;
    if info.data_type != declared {
        return Err(CoreError::validation_unscoped(format!(
            "filter data type \"{declared}\" does not match data type of variable {variable:?} for {table:?} in metadata"
        )));
    }
    Ok(())
}

/// A non-aggregate atom needs `filter_table` reachable by following foreign keys
/// outward from `group_table` (or equal to it): the group table has a single FK chain
/// down to one row of `filter_table`.
fn check_descendant(lattice: &TableLattice, group_table: &str, filter_table: &str) -> CoreResult<()> {
    if group_table == filter_table {
        return Ok(());
    }
    let reached = lattice.descendants(std::slice::from_ref(&group_table.to_string()), None, None)?;
    if reached.contains(filter_table) {
        Ok(())
    } else {
        Err(CoreError::validation_unscoped(format!(
            "group table {group_table:?} has no foreign table chain to filter table {filter_table:?}"
        )))
    }
}

/// An [`LogicOperator::Aggregator`] atom needs the dual: `filter_table` reachable by
/// following foreign keys outward *into* `group_table` (or equal to it) — many rows of
/// `filter_table` pointing up to one row of `group_table`.
fn check_ancestor(lattice: &TableLattice, group_table: &str, filter_table: &str) -> CoreResult<()> {
    if group_table == filter_table {
        return Ok(());
    }
    let reached = lattice.ancestors(std::slice::from_ref(&group_table.to_string()), None, None)?;
    if reached.contains(filter_table) {
        Ok(())
    } else {
        Err(CoreError::validation_unscoped(format!(
            "filter table {filter_table:?} is marked for aggregation, but has no foreign table chain to group table {group_table:?}"
        )))
    }
}

fn validate_condition(meta: &MetaData, lattice: &TableLattice, group_table: &str, condition: &LogicOperator) -> CoreResult<()> {
    match condition {
        LogicOperator::AlwaysTrue => Ok(()),
        LogicOperator::String { table, variable, .. } => {
            check_data_type(meta, table, variable, DataType::String)?;
            check_descendant(lattice, group_table, table)
        }
        LogicOperator::Metric { table, variable, data_type, .. } => {
            check_data_type(meta, table, variable, *data_type)?;
            check_descendant(lattice, group_table, table)
        }
        LogicOperator::InList { table, variable, data_type, .. } => {
            check_data_type(meta, table, variable, *data_type)?;
            check_descendant(lattice, group_table, table)
        }
        LogicOperator::Negated(inner) => validate_condition(meta, lattice, group_table, inner),
        LogicOperator::And(subs) | LogicOperator::Or(subs) => {
            for sub in subs {
                validate_condition(meta, lattice, group_table, sub)?;
            }
            Ok(())
        }
        LogicOperator::Aggregator { table, variable, data_type, .. } => {
            check_data_type(meta, table, variable, *data_type)?;
            check_ancestor(lattice, group_table, table)
        }
    }
}

/// Indexes a materialized graph (§4.9) by node id and `CONNECTED_TO`/`HAS_ATTR_VAL`
/// adjacency, so a [`GroupSelector`] can resolve predicate atoms without rescanning the
/// graph for every member it tests. Shared with [`crate::aag`], which walks the same
/// adjacency to collect attribute nodes reachable from group members.
pub(crate) struct GraphIndex {
    pub(crate) nodes: std::collections::HashMap<String, GraphNodeRecord>,
    pub(crate) key_nodes_by_table: std::collections::HashMap<String, Vec<String>>,
    pub(crate) forward: std::collections::HashMap<String, Vec<String>>,
    pub(crate) backward: std::collections::HashMap<String, Vec<String>>,
    pub(crate) attr_of: std::collections::HashMap<String, Vec<String>>,
}

impl GraphIndex {
    pub(crate) fn build(graph: &dyn GraphSource) -> CoreResult<Self> {
        let mut nodes = std::collections::HashMap::new();
        let mut key_nodes_by_table: std::collections::HashMap<String, Vec<String>> = std::collections::HashMap::new();
        graph.for_each_node(&mut |node| {
            if node.labels.iter().any(|l| l == "Key") {
                if let Some(table) = node.labels.first() {
                    key_nodes_by_table.entry(table.clone()).or_default().push(node.id.clone());
                }
            }
            nodes.insert(node.id.clone(), node.clone());
            Ok(())
        })?;

        let mut forward: std::collections::HashMap<String, Vec<String>> = std::collections::HashMap::new();
        let mut backward: std::collections::HashMap<String, Vec<String>> = std::collections::HashMap::new();
        let mut attr_of: std::collections::HashMap<String, Vec<String>> = std::collections::HashMap::new();
        graph.for_each_edge(&mut |edge| {
            match edge.edge_type.as_str() {
                CONNECTED_TO => {
                    forward.entry(edge.source_id.clone()).or_default().push(edge.target_id.clone());
                    backward.entry(edge.target_id.clone()).or_default().push(edge.source_id.clone());
                }
                HAS_ATTR_VAL => {
                    attr_of.entry(edge.source_id.clone()).or_default().push(edge.target_id.clone());
                }
                _ => {}
            }
            Ok(())
        })?;

        Ok(Self {
            nodes,
            key_nodes_by_table,
            forward,
            backward,
            attr_of,
        })
    }

    pub(crate) fn table_of(&self, node_id: &str) -> Option<&str> {
        self.nodes.get(node_id).and_then(|n| n.labels.first()).map(String::as_str)
    }

    /// The raw cell value of `variable` at `node_id`: its own property if `variable` is
    /// that table's primary key, else the value of the `HAS_ATTR_VAL`-linked Attribute
    /// node named `variable`.
    pub(crate) fn variable_value(&self, node_id: &str, variable: &str) -> Option<String> {
        let node = self.nodes.get(node_id)?;
        if let Some(v) = node.properties.get(variable) {
            return Some(v.clone());
        }
        for attr_id in self.attr_of.get(node_id).into_iter().flatten() {
            let Some(attr) = self.nodes.get(attr_id) else { continue };
            if attr.properties.get("name").map(String::as_str) == Some(variable) {
                return attr.properties.get("value").cloned();
            }
        }
        None
    }

    /// The first node reachable from `start` by following `CONNECTED_TO` edges forward,
    /// at any depth, whose table label is `target_table`; `None` if the foreign-key
    /// chain is broken or absent for this particular member.
    fn resolve_descendant(&self, start: &str, target_table: &str) -> Option<String> {
        if self.table_of(start) == Some(target_table) {
            return Some(start.to_string());
        }
        let mut queue = VecDeque::new();
        let mut visited = HashSet::new();
        queue.push_back(start.to_string());
        visited.insert(start.to_string());
        while let Some(current) = queue.pop_front() {
            for next in self.forward.get(&current).into_iter().flatten() {
                if !visited.insert(next.clone()) {
                    continue;
                }
                if self.table_of(next) == Some(target_table) {
                    return Some(next.clone());
                }
                queue.push_back(next.clone());
            }
        }
        None
    }

    /// Every node reachable from `start` by following `CONNECTED_TO` edges backward, at
    /// any depth, whose table label is `target_table` — the rows that aggregate up into
    /// `start` (§4.10).
    fn collect_ancestors(&self, start: &str, target_table: &str) -> Vec<String> {
        let mut result = Vec::new();
        let mut queue = VecDeque::new();
        let mut visited = HashSet::new();
        queue.push_back(start.to_string());
        visited.insert(start.to_string());
        while let Some(current) = queue.pop_front() {
            for prev in self.backward.get(&current).into_iter().flatten() {
                if !visited.insert(prev.clone()) {
                    continue;
                }
                if self.table_of(prev) == Some(target_table) {
                    result.push(prev.clone());
                }
                queue.push_back(prev.clone());
            }
        }
        result
    }
}

/// A validated group-membership predicate (§4.10): `condition` scoped to `group_table`,
/// evaluated over a materialized graph's rows rather than a relational source.
pub struct GroupSelector<'a> {
    meta: &'a MetaData,
    group_table: String,
    condition: LogicOperator,
}

impl<'a> GroupSelector<'a> {
    /// Validates `condition` against `meta`'s table lattice and returns a selector ready
    /// to run over a materialized graph. Fails if `group_table` is unknown, an atom's
    /// declared data type disagrees with the variable's metadata data type, a
    /// non-aggregate atom's table has no foreign-key chain from `group_table`, or an
    /// aggregate atom's table has no foreign-key chain into `group_table`.
    pub fn new(group_table: impl Into<String>, meta: &'a MetaData, condition: LogicOperator) -> CoreResult<Self> {
        let group_table = group_table.into();
        if meta.table(&group_table).is_none() {
            return Err(CoreError::schema_unscoped(format!("group table {group_table:?} not found in metadata")));
        }
        let lattice = TableLattice::build(meta);
        validate_condition(meta, &lattice, &group_table, &condition)?;
        Ok(Self { meta, group_table, condition })
    }

    /// The table this selector's members belong to.
    pub fn group_table(&self) -> &str {
        &self.group_table
    }

    /// Builds the synthetic [`SourceDataLine`] for one group-table member, resolving
    /// singular atoms by following the foreign-key chain forward and aggregate atoms by
    /// collecting every row that chains back up to this member.
    fn build_source_line(&self, index: &GraphIndex, anchor_id: &str) -> SourceDataLine {
        let mut line = SourceDataLine::new();
        for (table, vars) in self.condition.get_required_data() {
            line.rows.entry(table.clone()).or_default();
            for (variable, agg) in &vars {
                match agg {
                    None => {
                        let target = if table == self.group_table {
                            Some(anchor_id.to_string())
                        } else {
                            index.resolve_descendant(anchor_id, &table)
                        };
                        if let Some(target_id) = target {
                            if let Some(value) = index.variable_value(&target_id, variable) {
                                line.rows.get_mut(&table).unwrap().insert(variable.clone(), value);
                            }
                        }
                    }
                    Some((aggregator, data_type)) => {
                        let matched = if table == self.group_table {
                            vec![anchor_id.to_string()]
                        } else {
                            index.collect_ancestors(anchor_id, &table)
                        };
                        let synthetic_rows: Vec<RawRow> = matched
                            .iter()
                            .map(|id| {
                                let mut row = RawRow::new();
                                if let Some(value) = index.variable_value(id, variable) {
                                    row.insert(variable.clone(), value);
                                }
                                row
                            })
                            .collect();
                        let row_refs: Vec<&RawRow> = synthetic_rows.iter().collect();
                        let value = compute_aggregation(&row_refs, variable, *data_type, *aggregator);
                        line.aggregated_data.set(table.clone(), variable.clone(), *data_type, *aggregator, value);
                    }
                }
            }
        }
        line
    }

    /// Runs `condition` against every `group_table` member already indexed in `index`,
    /// returning the internal graph node ids of the members that satisfy it. Shared with
    /// [`crate::aag`], which needs node ids (to keep traversing the graph) rather than
    /// primary-key values.
    pub(crate) fn select_member_node_ids(&self, index: &GraphIndex) -> CoreResult<HashSet<String>> {
        let mut members = HashSet::new();
        for anchor_id in index.key_nodes_by_table.get(&self.group_table).cloned().unwrap_or_default() {
            let line = self.build_source_line(index, &anchor_id);
            if self.condition.evaluate(&line)? {
                members.insert(anchor_id);
            }
        }
        Ok(members)
    }

    /// Runs `condition` against every `group_table` member in `graph`, returning the
    /// primary-key values of the members that satisfy it.
    pub fn select_members(&self, graph: &dyn GraphSource) -> CoreResult<HashSet<String>> {
        let index = GraphIndex::build(graph)?;
        let pk_name = self.meta.primary_key(&self.group_table);
        let node_ids = self.select_member_node_ids(&index)?;
        Ok(node_ids
            .into_iter()
            .map(|anchor_id| {
                pk_name
                    .and_then(|pk| index.variable_value(&anchor_id, pk))
                    .unwrap_or_else(|| anchor_id.clone())
            })
            .collect())
    }
}
