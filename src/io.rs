//! The row and graph source/sink boundary (§6): every engine in this crate is
//! backend-agnostic and talks to raw tabular data and materialized graphs only through
//! these traits. Production embedders implement them against a database driver or a CSV
//! reader; the in-memory implementations here exist purely for tests.

use indexmap::IndexMap;

use crate::error::CoreResult;

/// One raw row: variable name -> raw cell string. Absent keys mean the column did not
/// exist for this row (schema mismatch); present keys with an empty string mean an
/// empty cell, distinct from missing.
pub type RawRow = IndexMap<String, String>;

/// Read access to a table's raw rows, in whatever order the backend stores them.
pub trait RowSource {
    fn table_names(&self) -> Vec<String>;

    /// Streams every row of `table` into `visit`, in storage order.
    fn for_each_row(&self, table: &str, visit: &mut dyn FnMut(&RawRow) -> CoreResult<()>) -> CoreResult<()>;
}

/// Write access for a transformation's output: one target table's rows.
pub trait RowSink {
    fn write_row(&mut self, table: &str, row: RawRow) -> CoreResult<()>;
}

/// A materialized graph node (§4.6).
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNodeRecord {
    pub id: String,
    pub labels: Vec<String>,
    pub properties: IndexMap<String, String>,
}

/// A materialized graph edge (§4.6).
#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdgeRecord {
    pub source_id: String,
    pub target_id: String,
    pub edge_type: String,
    pub properties: IndexMap<String, String>,
}

/// Write access for graph materialization output.
pub trait GraphSink {
    fn write_node(&mut self, node: GraphNodeRecord) -> CoreResult<()>;
    fn write_edge(&mut self, edge: GraphEdgeRecord) -> CoreResult<()>;
}

/// Read access for an already-materialized graph, as consumed by AAG generation and
/// group-selector queries.
pub trait GraphSource {
    fn for_each_node(&self, visit: &mut dyn FnMut(&GraphNodeRecord) -> CoreResult<()>) -> CoreResult<()>;
    fn for_each_edge(&self, visit: &mut dyn FnMut(&GraphEdgeRecord) -> CoreResult<()>) -> CoreResult<()>;
}

/// An in-memory [`RowSource`]/[`RowSink`] keyed by table name, for tests.
#[derive(Debug, Clone, Default)]
pub struct VecRowSource {
    pub tables: IndexMap<String, Vec<RawRow>>,
}

impl VecRowSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_table(&mut self, name: impl Into<String>, rows: Vec<RawRow>) {
        self.tables.insert(name.into(), rows);
    }
}

impl RowSource for VecRowSource {
    fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    fn for_each_row(&self, table: &str, visit: &mut dyn FnMut(&RawRow) -> CoreResult<()>) -> CoreResult<()> {
        if let Some(rows) = self.tables.get(table) {
            for row in rows {
                visit(row)?;
            }
        }
        Ok(())
    }
}

impl RowSink for VecRowSource {
    fn write_row(&mut self, table: &str, row: RawRow) -> CoreResult<()> {
        self.tables.entry(table.to_string()).or_default().push(row);
        Ok(())
    }
}

/// An in-memory [`GraphSink`]/[`GraphSource`], for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGraph {
    pub nodes: Vec<GraphNodeRecord>,
    pub edges: Vec<GraphEdgeRecord>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphSink for InMemoryGraph {
    fn write_node(&mut self, node: GraphNodeRecord) -> CoreResult<()> {
        self.nodes.push(node);
        Ok(())
    }

    fn write_edge(&mut self, edge: GraphEdgeRecord) -> CoreResult<()> {
        self.edges.push(edge);
        Ok(())
    }
}

impl GraphSource for InMemoryGraph {
    fn for_each_node(&self, visit: &mut dyn FnMut(&GraphNodeRecord) -> CoreResult<()>) -> CoreResult<()> {
        for node in &self.nodes {
            visit(node)?;
        }
        Ok(())
    }

    fn for_each_edge(&self, visit: &mut dyn FnMut(&GraphEdgeRecord) -> CoreResult<()>) -> CoreResult<()> {
        for edge in &self.edges {
            visit(edge)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_row_source_round_trip() {
        let mut source = VecRowSource::new();
        let mut row = RawRow::new();
        row.insert("ID".into(), "1".into());
        RowSink::write_row(&mut source, "patients", row.clone()).unwrap();

        let mut seen = Vec::new();
        source
            .for_each_row("patients", &mut |r| {
                seen.push(r.clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![row]);
    }

    #[test]
    fn test_in_memory_graph_round_trip() {
        let mut graph = InMemoryGraph::new();
        graph
            .write_node(GraphNodeRecord {
                id: "1".into(),
                labels: vec!["Key".into()],
                properties: IndexMap::new(),
            })
            .unwrap();
        let mut count = 0;
        graph
            .for_each_node(&mut |_| {
                count += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
