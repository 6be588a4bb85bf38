//! Attribute association graph generation (§4.11): turning a base graph (§4.6/§4.9)
//! plus one or more group selectors (§4.10) into a statistical overlay graph whose
//! nodes are attribute values annotated with per-group prevalence and whose edges carry
//! pairwise co-occurrence and conditional-increase statistics.
//!
//! The base graph is read through the same [`crate::query::GraphIndex`] adjacency the
//! group selectors use to resolve predicate atoms, so membership and attribute
//! reachability share one traversal implementation.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;

use crate::cancel::CancellationToken;
use crate::error::{CoreError, CoreResult};
use crate::io::{GraphEdgeRecord, GraphNodeRecord, GraphSink, GraphSource};
use crate::query::{GraphIndex, GroupSelector};

/// Thresholds and bounds for [`generate`] (§4.11, §4.14).
#[derive(Debug, Clone)]
pub struct AagConfig {
    /// Name of the positive group in a `(positive, negative)` pair; when both are set,
    /// cross-group statistics compare exactly these two groups instead of the
    /// worst-case pair across every group.
    pub positive_group: Option<String>,
    pub negative_group: Option<String>,
    /// `max_g prevalence` below this is `Infrequent`.
    pub frequency_low: f64,
    /// `max_g prevalence` at or above this is `HighlyFrequent`.
    pub frequency_high: f64,
    /// Lower threshold on `prevalence_difference` / `conditional_increase` magnitude.
    pub distinction_diff_low: f64,
    /// Upper threshold on `prevalence_difference` / `conditional_increase` magnitude.
    pub distinction_diff_high: f64,
    /// Lower threshold on `prevalence_ratio` / `increase_ratio` magnitude.
    pub distinction_ratio_low: f64,
    /// Upper threshold on `prevalence_ratio` / `increase_ratio` magnitude.
    pub distinction_ratio_high: f64,
    /// Bound on `CONNECTED_TO` hops from a group member when collecting reachable
    /// attribute nodes.
    pub max_path_length: usize,
}

impl Default for AagConfig {
    fn default() -> Self {
        Self {
            positive_group: None,
            negative_group: None,
            frequency_low: 0.1,
            frequency_high: 0.5,
            distinction_diff_low: 0.1,
            distinction_diff_high: 0.2,
            distinction_ratio_low: 1.5,
            distinction_ratio_high: 2.0,
            max_path_length: 9999,
        }
    }
}

/// Per-group prevalence and missing-ratio, plus the cross-group summary (§4.11 steps
/// 3-4), for one attribute node.
#[derive(Debug, Clone, Default)]
pub struct AagNodeStats {
    pub prevalence: IndexMap<String, f64>,
    pub missing_ratio: IndexMap<String, f64>,
    pub prevalence_difference: f64,
    pub prevalence_ratio: f64,
}

/// A base-graph attribute node (§4.6) annotated with AAG statistics and labels.
#[derive(Debug, Clone)]
pub struct AagNode {
    pub id: String,
    pub table: String,
    pub variable: String,
    pub value: String,
    /// The base graph's own labels for this node (e.g. `[table, "Attribute"]`).
    pub base_labels: Vec<String>,
    /// One of `HighlyFrequent` / `Frequent` / `Infrequent`.
    pub frequency_label: String,
    /// One of `HighlyRelated` / `Related` / `Unrelated` / `Inverse` / `HighlyInverse`,
    /// present only when [`AagConfig::positive_group`]/`negative_group` are both set.
    pub distinction_label: Option<String>,
    pub stats: AagNodeStats,
}

impl AagNode {
    pub fn labels(&self) -> Vec<String> {
        let mut labels = self.base_labels.clone();
        labels.push(self.frequency_label.clone());
        if let Some(d) = &self.distinction_label {
            labels.push(d.clone());
        }
        labels
    }
}

/// The edge-type labels of §4.6/§4.11.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AagEdgeType {
    High,
    Medium,
    Low,
    Unassigned,
}

impl AagEdgeType {
    pub fn as_str(self) -> &'static str {
        match self {
            AagEdgeType::High => "HIGH_RELATION",
            AagEdgeType::Medium => "MEDIUM_RELATION",
            AagEdgeType::Low => "LOW_RELATION",
            AagEdgeType::Unassigned => "UNASSIGNED",
        }
    }
}

/// Per-group pairwise statistics (§4.11 step 5) for one ordered attribute-node pair.
#[derive(Debug, Clone, Default)]
pub struct AagEdgeStats {
    pub co_occurrence: IndexMap<String, usize>,
    pub conditional_prevalence: IndexMap<String, f64>,
    pub conditional_increase: IndexMap<String, f64>,
    pub increase_ratio: IndexMap<String, f64>,
}

/// A directed `A -> B` attribute association: "members who have A also tend to have B".
#[derive(Debug, Clone)]
pub struct AagEdge {
    pub source_id: String,
    pub target_id: String,
    pub edge_type: AagEdgeType,
    pub stats: AagEdgeStats,
}

/// The output of [`generate`]: a statistics-bearing overlay over a base graph's
/// attribute nodes, ready for [`crate::postfilter`] or direct write-out via
/// [`AagGraph::write_to`].
#[derive(Debug, Clone, Default)]
pub struct AagGraph {
    pub nodes: Vec<AagNode>,
    pub edges: Vec<AagEdge>,
}

impl AagGraph {
    /// Writes every surviving node and edge through `sink` (§6), encoding per-group
    /// statistics as string properties keyed `"{field}__{group}"`.
    pub fn write_to(&self, sink: &mut dyn GraphSink) -> CoreResult<()> {
        for node in &self.nodes {
            let mut properties = IndexMap::new();
            properties.insert("name".to_string(), node.variable.clone());
            properties.insert("value".to_string(), node.value.clone());
            properties.insert("prevalenceDifference".to_string(), node.stats.prevalence_difference.to_string());
            properties.insert("prevalenceRatio".to_string(), node.stats.prevalence_ratio.to_string());
            for (group, value) in &node.stats.prevalence {
                properties.insert(format!("prevalence__{group}"), value.to_string());
            }
            for (group, value) in &node.stats.missing_ratio {
                properties.insert(format!("missingRatio__{group}"), value.to_string());
            }
            sink.write_node(GraphNodeRecord {
                id: node.id.clone(),
                labels: node.labels(),
                properties,
            })?;
        }
        for edge in &self.edges {
            let mut properties = IndexMap::new();
            for (group, value) in &edge.stats.co_occurrence {
                properties.insert(format!("coOccurrence__{group}"), value.to_string());
            }
            for (group, value) in &edge.stats.conditional_prevalence {
                properties.insert(format!("conditionalPrevalence__{group}"), value.to_string());
            }
            for (group, value) in &edge.stats.conditional_increase {
                properties.insert(format!("conditionalIncrease__{group}"), value.to_string());
            }
            for (group, value) in &edge.stats.increase_ratio {
                properties.insert(format!("increaseRatio__{group}"), value.to_string());
            }
            sink.write_edge(GraphEdgeRecord {
                source_id: edge.source_id.clone(),
                target_id: edge.target_id.clone(),
                edge_type: edge.edge_type.as_str().to_string(),
                properties,
            })?;
        }
        Ok(())
    }
}

/// `max(a,b) / min(a,b)`, with `min` pinned away from zero (§4.11 step 4): `+inf` when
/// the smaller value is zero and the larger is positive, `1.0` when both are zero.
fn pinned_ratio(a: f64, b: f64) -> f64 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    if lo == 0.0 {
        if hi > 0.0 {
            f64::INFINITY
        } else {
            1.0
        }
    } else {
        hi / lo
    }
}

fn frequency_label(max_prevalence: f64, low: f64, high: f64) -> String {
    if max_prevalence >= high {
        "HighlyFrequent".to_string()
    } else if max_prevalence >= low {
        "Frequent".to_string()
    } else {
        "Infrequent".to_string()
    }
}

/// Distinction level 0 (unrelated) / 1 (regular) / 2 (highly), from the larger of the
/// two thresholded signals (§4.11 step 6/7).
fn magnitude_level(diff_or_incr: f64, ratio: f64, dl: f64, dh: f64, rl: f64, rh: f64) -> u8 {
    if diff_or_incr >= dh || ratio >= rh {
        2
    } else if diff_or_incr >= dl || ratio >= rl {
        1
    } else {
        0
    }
}

fn distinction_label(signed_diff: f64, abs_diff: f64, ratio: f64, config: &AagConfig) -> String {
    let level = magnitude_level(
        abs_diff,
        ratio,
        config.distinction_diff_low,
        config.distinction_diff_high,
        config.distinction_ratio_low,
        config.distinction_ratio_high,
    );
    match (level, signed_diff >= 0.0) {
        (0, _) => "Unrelated".to_string(),
        (1, true) => "Related".to_string(),
        (1, false) => "Inverse".to_string(),
        (_, true) => "HighlyRelated".to_string(),
        (_, false) => "HighlyInverse".to_string(),
    }
}

fn edge_type_for(incr: f64, ratio: f64, config: &AagConfig) -> AagEdgeType {
    match magnitude_level(
        incr.abs(),
        ratio,
        config.distinction_diff_low,
        config.distinction_diff_high,
        config.distinction_ratio_low,
        config.distinction_ratio_high,
    ) {
        2 => AagEdgeType::High,
        1 => AagEdgeType::Medium,
        _ => AagEdgeType::Low,
    }
}

/// Breadth-first `CONNECTED_TO` reachability from `start`, bounded to `max_depth` hops,
/// including `start` itself at depth 0.
fn reachable_key_nodes(index: &GraphIndex, start: &str, max_depth: usize) -> HashSet<String> {
    let mut visited = HashSet::new();
    visited.insert(start.to_string());
    let mut frontier = VecDeque::new();
    frontier.push_back((start.to_string(), 0usize));
    while let Some((current, depth)) = frontier.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for next in index.forward.get(&current).into_iter().flatten() {
            if visited.insert(next.clone()) {
                frontier.push_back((next.clone(), depth + 1));
            }
        }
    }
    visited
}

fn is_attribute_node(node: &GraphNodeRecord) -> bool {
    node.labels.iter().any(|l| l == "Attribute")
}

/// Runs every group selector in `groups` against `graph` and computes the AAG (§4.11).
///
/// Groups are processed in sorted-name order so that cross-group aggregation (the
/// worst-case pairwise difference/ratio when no `(positive, negative)` pair is given)
/// is deterministic regardless of iteration order of the caller's map.
pub fn generate<'a>(
    graph: &dyn GraphSource,
    groups: &IndexMap<String, GroupSelector<'a>>,
    config: &AagConfig,
    cancel: &CancellationToken,
) -> CoreResult<AagGraph> {
    if let (Some(pos), Some(neg)) = (&config.positive_group, &config.negative_group) {
        if !groups.contains_key(pos) {
            return Err(CoreError::validation_unscoped(format!("positive group {pos:?} not found among group selectors")));
        }
        if !groups.contains_key(neg) {
            return Err(CoreError::validation_unscoped(format!("negative group {neg:?} not found among group selectors")));
        }
    }

    let index = GraphIndex::build(graph)?;
    let mut group_names: Vec<String> = groups.keys().cloned().collect();
    group_names.sort();

    let mut group_members: IndexMap<String, HashSet<String>> = IndexMap::new();
    for name in &group_names {
        cancel.check()?;
        let selector = &groups[name];
        let members = selector.select_member_node_ids(&index)?;
        #[cfg(feature = "tracing")]
        tracing::debug!(group = %name, size = members.len(), "resolved group membership");
        group_members.insert(name.clone(), members);
    }

    // For each group, each member's reachable attribute-node set.
    let mut member_attrs: IndexMap<String, HashMap<String, HashSet<String>>> = IndexMap::new();
    for name in &group_names {
        cancel.check()?;
        let mut per_member = HashMap::new();
        for member in &group_members[name] {
            let keys = reachable_key_nodes(&index, member, config.max_path_length);
            let mut attrs = HashSet::new();
            for key in &keys {
                for attr in index.attr_of.get(key).into_iter().flatten() {
                    if index.nodes.get(attr).map(is_attribute_node).unwrap_or(false) {
                        attrs.insert(attr.clone());
                    }
                }
            }
            per_member.insert(member.clone(), attrs);
        }
        member_attrs.insert(name.clone(), per_member);
    }

    // attr_id -> group -> member set.
    let mut attr_group_members: HashMap<String, IndexMap<String, HashSet<String>>> = HashMap::new();
    for name in &group_names {
        for (member, attrs) in &member_attrs[name] {
            for attr in attrs {
                attr_group_members
                    .entry(attr.clone())
                    .or_default()
                    .entry(name.clone())
                    .or_default()
                    .insert(member.clone());
            }
        }
    }

    // (table, variable) -> group -> member set reachable with ANY value of that variable.
    let mut variable_group_members: HashMap<(String, String), IndexMap<String, HashSet<String>>> = HashMap::new();
    let attr_var_key = |attr_id: &str| -> Option<(String, String)> {
        let node = index.nodes.get(attr_id)?;
        let table = node.labels.first()?.clone();
        let variable = node.properties.get("name")?.clone();
        Some((table, variable))
    };
    for (attr_id, per_group) in &attr_group_members {
        let Some(key) = attr_var_key(attr_id) else { continue };
        for (group, members) in per_group {
            variable_group_members
                .entry(key.clone())
                .or_default()
                .entry(group.clone())
                .or_default()
                .extend(members.iter().cloned());
        }
    }

    let group_size = |g: &str| -> usize { group_members.get(g).map(HashSet::len).unwrap_or(0) };

    // Per-node prevalence/missing-ratio, keyed by attribute node id for edge reuse.
    let mut node_prevalence: HashMap<String, IndexMap<String, f64>> = HashMap::new();
    let mut nodes = Vec::with_capacity(attr_group_members.len());
    let mut attr_ids: Vec<String> = attr_group_members.keys().cloned().collect();
    attr_ids.sort();

    for attr_id in &attr_ids {
        cancel.check()?;
        let node_record = index.nodes.get(attr_id).expect("attr id came from indexed nodes");
        let table = node_record.labels.first().cloned().unwrap_or_default();
        let variable = node_record.properties.get("name").cloned().unwrap_or_default();
        let value = node_record.properties.get("value").cloned().unwrap_or_default();
        let var_key = (table.clone(), variable.clone());

        let mut prevalence = IndexMap::new();
        let mut missing_ratio = IndexMap::new();
        for name in &group_names {
            let c_g = attr_group_members
                .get(attr_id)
                .and_then(|m| m.get(name))
                .map(HashSet::len)
                .unwrap_or(0);
            let v_g = variable_group_members
                .get(&var_key)
                .and_then(|m| m.get(name))
                .map(HashSet::len)
                .unwrap_or(0);
            if v_g == 0 {
                prevalence.insert(name.clone(), 0.0);
                missing_ratio.insert(name.clone(), 1.0);
            } else {
                prevalence.insert(name.clone(), c_g as f64 / v_g as f64);
                let m_g = group_size(name).saturating_sub(v_g);
                let size = group_size(name).max(1);
                missing_ratio.insert(name.clone(), m_g as f64 / size as f64);
            }
        }

        let (signed_diff, abs_diff, ratio) = match (&config.positive_group, &config.negative_group) {
            (Some(pos), Some(neg)) => {
                let p = prevalence.get(pos).copied().unwrap_or(0.0);
                let n = prevalence.get(neg).copied().unwrap_or(0.0);
                (p - n, (p - n).abs(), pinned_ratio(p, n))
            }
            _ => {
                let values: Vec<f64> = group_names.iter().map(|g| prevalence.get(g).copied().unwrap_or(0.0)).collect();
                let max_p = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max).max(0.0);
                let min_p = values.iter().cloned().fold(f64::INFINITY, f64::min).min(max_p);
                let mut max_abs_diff = 0.0f64;
                for i in 0..values.len() {
                    for j in (i + 1)..values.len() {
                        max_abs_diff = max_abs_diff.max((values[i] - values[j]).abs());
                    }
                }
                (0.0, max_abs_diff, pinned_ratio(max_p, min_p))
            }
        };

        let max_prevalence = prevalence.values().cloned().fold(0.0f64, f64::max);
        let frequency = frequency_label(max_prevalence, config.frequency_low, config.frequency_high);
        let distinction = if config.positive_group.is_some() && config.negative_group.is_some() {
            Some(distinction_label(signed_diff, abs_diff, ratio, config))
        } else {
            None
        };

        node_prevalence.insert(attr_id.clone(), prevalence.clone());

        nodes.push(AagNode {
            id: attr_id.clone(),
            table,
            variable,
            value,
            base_labels: node_record.labels.clone(),
            frequency_label: frequency,
            distinction_label: distinction,
            stats: AagNodeStats {
                prevalence,
                missing_ratio,
                prevalence_difference: abs_diff,
                prevalence_ratio: ratio,
            },
        });
    }

    // Ordered-pair co-occurrence (§4.11 step 5): only pairs that actually co-occur for
    // some member in some group are ever considered, satisfying "at least one shared
    // member in any group" without a separate existence check.
    let mut co_occurrence: HashMap<(String, String), HashMap<String, usize>> = HashMap::new();
    for name in &group_names {
        for attrs in member_attrs[name].values() {
            for a in attrs {
                for b in attrs {
                    if a == b {
                        continue;
                    }
                    *co_occurrence
                        .entry((a.clone(), b.clone()))
                        .or_default()
                        .entry(name.clone())
                        .or_insert(0) += 1;
                }
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(nodes = nodes.len(), pairs = co_occurrence.len(), "computed AAG pairwise statistics");

    let mut pair_keys: Vec<(String, String)> = co_occurrence.keys().cloned().collect();
    pair_keys.sort();

    let mut edges = Vec::with_capacity(pair_keys.len());
    for (a, b) in pair_keys {
        cancel.check()?;
        let co_g_map = &co_occurrence[&(a.clone(), b.clone())];
        let mut co_occ = IndexMap::new();
        let mut cond_prev = IndexMap::new();
        let mut cond_incr = IndexMap::new();
        let mut incr_ratio = IndexMap::new();

        for name in &group_names {
            let co_g = co_g_map.get(name).copied().unwrap_or(0);
            let c_ag = attr_group_members.get(&a).and_then(|m| m.get(name)).map(HashSet::len).unwrap_or(0);
            let cp_g = if c_ag == 0 { 0.0 } else { co_g as f64 / c_ag as f64 };
            let prev_bg = node_prevalence.get(&b).and_then(|m| m.get(name)).copied().unwrap_or(0.0);
            let incr_g = cp_g - prev_bg;
            // Unlike the node-level `prevalence_ratio` (always >= 1 by construction),
            // `increase_ratio` is a signed conditional/base ratio (S6: 0.2/0.4 = 0.5,
            // a decrease), so it is plain division rather than `pinned_ratio`.
            let ratio_g = if prev_bg == 0.0 {
                if cp_g == 0.0 {
                    1.0
                } else {
                    f64::INFINITY
                }
            } else {
                cp_g / prev_bg
            };

            co_occ.insert(name.clone(), co_g);
            cond_prev.insert(name.clone(), cp_g);
            cond_incr.insert(name.clone(), incr_g);
            incr_ratio.insert(name.clone(), ratio_g);
        }

        let (repr_incr, repr_ratio, has_signal) = match &config.positive_group {
            Some(pos) => {
                let c_ag_pos = attr_group_members.get(&a).and_then(|m| m.get(pos)).map(HashSet::len).unwrap_or(0);
                (
                    cond_incr.get(pos).copied().unwrap_or(0.0),
                    incr_ratio.get(pos).copied().unwrap_or(1.0),
                    c_ag_pos > 0,
                )
            }
            None => {
                let mut best_incr = 0.0f64;
                let mut best_ratio = 1.0f64;
                let mut any = false;
                for name in &group_names {
                    let incr = cond_incr.get(name).copied().unwrap_or(0.0);
                    if attr_group_members.get(&a).and_then(|m| m.get(name)).map(HashSet::len).unwrap_or(0) > 0 {
                        any = true;
                    }
                    if incr.abs() > best_incr.abs() {
                        best_incr = incr;
                        best_ratio = incr_ratio.get(name).copied().unwrap_or(1.0);
                    }
                }
                (best_incr, best_ratio, any)
            }
        };

        let edge_type = if !has_signal {
            AagEdgeType::Unassigned
        } else {
            edge_type_for(repr_incr, repr_ratio, config)
        };

        edges.push(AagEdge {
            source_id: a,
            target_id: b,
            edge_type,
            stats: AagEdgeStats {
                co_occurrence: co_occ,
                conditional_prevalence: cond_prev,
                conditional_increase: cond_incr,
                increase_ratio: incr_ratio,
            },
        });
    }

    Ok(AagGraph { nodes, edges })
}
